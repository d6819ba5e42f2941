//! Integration tests for the operational session event loop


use connio_device::protocol::TopicBuilder;
use connio_device::session::{DeviceSession, SessionError};
use connio_device::testing::{MockBroker, MockCall};
use connio_device::transport::{MqttError, SessionEvent};
use serde_json::json;
use std::time::Duration;
use test_helpers::*;

const WAIT: Duration = Duration::from_secs(2);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const DATA_IN: &str = "connio/data/in/devices/d1/#";

fn session(broker: &MockBroker) -> DeviceSession<MockBroker> {
    DeviceSession::new(broker.clone(), TopicBuilder::default())
        .with_config_property("config")
        .with_reconnect_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_connect_callback_subscribes() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let handler = RecordingHandler::new().subscribing_to(DATA_IN);
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            assert!(wait_until(|| observer.with(|r| r.subscribed == 1), WAIT).await);
        })
        .await;

    assert_eq!(handler.with(|r| r.connected), 1);
    assert!(broker.calls().contains(&MockCall::Subscribe {
        client_id: "d1".to_string(),
        topic: DATA_IN.to_string(),
        qos: connio_device::transport::QoS::AtMostOnce,
    }));
}

#[tokio::test]
async fn test_config_push_swaps_snapshot() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let store = session.config();
    let handler = RecordingHandler::new().subscribing_to(DATA_IN);
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            assert!(wait_until(|| observer.with(|r| r.subscribed == 1), WAIT).await);
            injector.inject_message(
                "connio/data/in/devices/d1/properties/config",
                r#"{"frequency":1,"forever":false}"#,
            );
            injector.inject_message("connio/data/in/devices/d1/properties/temperature", "21.5");
            assert!(
                wait_until(
                    || observer.config_count() == 1 && observer.message_count() == 1,
                    WAIT
                )
                .await
            );
        })
        .await;

    let current = store.current();
    assert_eq!(current.frequency(), Duration::from_secs(1));
    assert!(!current.forever());

    handler.with(|r| {
        assert_eq!(r.configs[0].as_map(), current.as_map());
        assert_eq!(
            r.messages,
            vec![(
                "connio/data/in/devices/d1/properties/temperature".to_string(),
                json!(21.5)
            )]
        );
    });
}

#[tokio::test]
async fn test_config_topic_is_a_plain_message_when_not_accepted() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let store = session.config();
    let handler = RecordingHandler::new().ignoring_config();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject_message(
                "connio/data/in/devices/d1/properties/config",
                r#"{"forever":false}"#,
            );
            assert!(wait_until(|| observer.message_count() == 1, WAIT).await);
        })
        .await;

    assert_eq!(handler.config_count(), 0);
    assert!(store.current().forever());
}

#[tokio::test]
async fn test_config_topic_is_a_plain_message_without_config_property() {
    let broker = MockBroker::new();
    let session = DeviceSession::new(broker.clone(), TopicBuilder::default());
    let handler = RecordingHandler::new();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject_message("connio/data/in/devices/d1/config", r#"{"forever":false}"#);
            assert!(wait_until(|| observer.message_count() == 1, WAIT).await);
        })
        .await;

    assert_eq!(handler.config_count(), 0);
}

#[tokio::test]
async fn test_malformed_payload_reported_as_error() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let handler = RecordingHandler::new();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject_message("connio/data/in/devices/d1/temperature", "{not json");
            injector.inject_message("connio/data/in/devices/d1/temperature", "20");
            assert!(
                wait_until(
                    || observer.error_count() == 1 && observer.message_count() == 1,
                    WAIT
                )
                .await
            );
        })
        .await;

    handler.with(|r| {
        assert!(r.errors[0].starts_with("malformed"));
        assert_eq!(r.messages[0].1, json!(20));
    });
}

#[tokio::test]
async fn test_non_object_config_rejected() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let store = session.config();
    let handler = RecordingHandler::new();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject_message("connio/data/in/devices/d1/config", "[1, 2, 3]");
            assert!(wait_until(|| observer.error_count() == 1, WAIT).await);
        })
        .await;

    assert_eq!(handler.config_count(), 0);
    assert!(handler.with(|r| r.errors[0].starts_with("invalid config")));
    assert_eq!(store.current().frequency(), Duration::from_secs(5));
}

#[tokio::test]
async fn test_unexpected_disconnect_and_transport_error_keep_loop_running() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let handler = RecordingHandler::new();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject(Ok(SessionEvent::Disconnected {
                reason: "keep alive timeout".to_string(),
            }));
            injector.inject(Err(MqttError::ConnectionFailed("connection reset".into())));
            injector.inject_message("connio/data/in/devices/d1/temperature", "19");
            assert!(wait_until(|| observer.message_count() == 1, WAIT).await);
        })
        .await;

    handler.with(|r| {
        assert_eq!(r.disconnects, vec!["keep alive timeout".to_string()]);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].starts_with("transport"));
    });
}

#[tokio::test]
async fn test_reconnect_invokes_connect_callback_again() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let handler = RecordingHandler::new().subscribing_to(DATA_IN);
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            assert!(wait_until(|| observer.with(|r| r.connected == 1), WAIT).await);
            assert!(injector.reconnect());
            assert!(wait_until(|| observer.with(|r| r.connected == 2), WAIT).await);
        })
        .await;

    assert!(wait_until(|| broker.subscribe_count() == 2, WAIT).await);
}

#[tokio::test]
async fn test_workload_error_stops_the_session() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let connection = session
        .connect(device_params("d1"), RecordingHandler::new(), KEEP_ALIVE)
        .unwrap();

    let result: Result<(), &str> = connection
        .run_loop(|_handle| async { Err("sensor failure") })
        .await;

    assert_eq!(result, Err("sensor failure"));
    assert_eq!(broker.disconnect_count(), 1);
    assert!(wait_until(|| broker.events_closed(0), WAIT).await);
}

#[tokio::test]
async fn test_workload_panic_stops_the_session() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let connection = session
        .connect(device_params("d1"), RecordingHandler::new(), KEEP_ALIVE)
        .unwrap();

    let joined = tokio::spawn(async move {
        connection
            .run_loop(|_handle| async {
                panic!("sensor driver crashed");
            })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert!(wait_until(|| broker.events_closed(0), WAIT).await);
}

#[tokio::test]
async fn test_workload_publishes_through_handle() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let connection = session
        .connect(device_params("d1"), RecordingHandler::new(), KEEP_ALIVE)
        .unwrap();

    connection
        .run_loop(|handle| async move {
            handle
                .publish("connio/data/out/devices/d1/properties/temperature", "21.5")
                .await
        })
        .await
        .unwrap();

    assert_eq!(
        broker.published(),
        vec![(
            "connio/data/out/devices/d1/properties/temperature".to_string(),
            b"21.5".to_vec()
        )]
    );
}

#[tokio::test]
async fn test_wildcard_client_id_rejected() {
    let broker = MockBroker::new();
    let session = session(&broker);

    for client_id in ["a/#", "dev+1"] {
        let result = session.connect(device_params(client_id), RecordingHandler::new(), KEEP_ALIVE);
        assert!(matches!(
            result,
            Err(SessionError::InvalidClientId { client_id: rejected, .. }) if rejected == client_id
        ));
    }
    assert!(broker.sessions_opened().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_through_handle() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let connection = session
        .connect(device_params("d1"), RecordingHandler::new(), KEEP_ALIVE)
        .unwrap();

    connection
        .run_loop(|handle| async move {
            handle.subscribe(DATA_IN).await?;
            handle.unsubscribe(DATA_IN).await
        })
        .await
        .unwrap();

    assert!(broker.calls().contains(&MockCall::Unsubscribe {
        client_id: "d1".to_string(),
        topic: DATA_IN.to_string(),
    }));
}

#[tokio::test]
async fn test_huge_frequency_push_keeps_dispatching() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let store = session.config();
    let handler = RecordingHandler::new();
    let connection = session
        .connect(device_params("d1"), handler.clone(), KEEP_ALIVE)
        .unwrap();

    let injector = broker.clone();
    let observer = handler.clone();
    connection
        .run_loop(|_handle| async move {
            injector.inject_message("connio/data/in/devices/d1/config", r#"{"frequency":1e20}"#);
            injector.inject_message("connio/data/in/devices/d1/temperature", "18");
            assert!(
                wait_until(
                    || observer.config_count() == 1 && observer.message_count() == 1,
                    WAIT
                )
                .await
            );
        })
        .await;

    assert_eq!(store.current().frequency(), Duration::from_secs(5));
}
