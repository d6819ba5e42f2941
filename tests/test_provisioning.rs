//! Integration tests for runtime provisioning against the in-memory broker


use connio_device::protocol::TopicBuilder;
use connio_device::session::{ClaimDescriptor, DeviceSession, ProvisionError, SessionError};
use connio_device::testing::{MockBehavior, MockBroker, MockCall};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use test_helpers::*;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

fn session(broker: &MockBroker) -> DeviceSession<MockBroker> {
    DeviceSession::new(broker.clone(), TopicBuilder::default())
        .with_reconnect_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_provisioning_happy_path() {
    let broker = MockBroker::with_provision_reply(CLAIM_RESPONSE.to_vec());
    let mut session = session(&broker);

    let identity = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await
        .unwrap();

    assert_eq!(identity.device_id, "d1");
    assert_eq!(identity.api_key_id, "k1");
    assert_eq!(identity.api_key_secret, "s1");

    assert_eq!(broker.ordering_violations(), 0);
    assert_eq!(broker.subscribe_count(), 1);
    assert_eq!(broker.publish_count(), 1);
    assert_eq!(broker.disconnect_count(), 1);

    let calls = broker.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        MockCall::Subscribe { topic, .. } if topic == "connio/provisions/prov-1"
    )));

    let published = broker.published();
    assert_eq!(published[0].0, "connio/provisions");
    let claim: Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(claim, json!({"sn": "SN-0001", "configProperty": "config"}));

    let config = session.config().current();
    assert_eq!(config.frequency(), Duration::from_secs(5));
    assert!(config.forever());
    assert_eq!(session.config_property(), Some("config"));
}

#[tokio::test]
async fn test_provisioning_replaces_configuration() {
    let broker = MockBroker::with_provision_reply(
        br#"{"deviceId":"d1","apiKeyId":"k1","apiSecret":"s1","config":{"frequency":1,"forever":false}}"#
            .to_vec(),
    );
    let mut session = session(&broker);
    let before = session.config().current();
    assert!(before.forever());

    session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await
        .unwrap();

    let after = session.config().current();
    assert_eq!(after.frequency(), Duration::from_secs(1));
    assert!(!after.forever());
    assert!(before.forever());
}

#[tokio::test]
async fn test_provisioning_without_config_property() {
    let broker = MockBroker::with_provision_reply(CLAIM_RESPONSE.to_vec());
    let mut session = session(&broker);

    session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            None,
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await
        .unwrap();

    let claim: Value = serde_json::from_slice(&broker.published()[0].1).unwrap();
    assert_eq!(claim, json!({"sn": "SN-0001", "configProperty": null}));
    assert_eq!(session.config_property(), None);
}

#[tokio::test]
async fn test_provisioning_times_out_without_reply() {
    let broker = MockBroker::new();
    let mut session = session(&broker);

    let started = Instant::now();
    let result = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_millis(200),
            KEEP_ALIVE,
        )
        .await;

    assert!(matches!(result, Err(ProvisionError::Timeout(d)) if d == Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(broker.publish_count(), 1);
    assert_eq!(broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_provisioning_rejects_malformed_reply() {
    let broker = MockBroker::with_provision_reply(b"not json".to_vec());
    let mut session = session(&broker);

    let result = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await;

    assert!(matches!(result, Err(ProvisionError::MalformedResponse(_))));
    assert_eq!(broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_provisioning_rejects_incomplete_identity() {
    let broker = MockBroker::with_provision_reply(br#"{"deviceId":"d1","apiKeyId":"k1"}"#.to_vec());
    let mut session = session(&broker);

    let result = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await;

    match result {
        Err(ProvisionError::IncompleteIdentity(missing)) => assert!(missing.contains("apiSecret")),
        other => panic!("expected incomplete identity, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let broker = MockBroker::with_behavior(MockBehavior {
        provision_replies: vec![
            CLAIM_RESPONSE.to_vec(),
            br#"{"deviceId":"d2","apiKeyId":"k2","apiSecret":"s2"}"#.to_vec(),
        ],
        ..Default::default()
    });
    let mut session = session(&broker);

    let identity = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await
        .unwrap();

    assert_eq!(identity.device_id, "d1");
    assert_eq!(broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_rejected_subscription_fails_without_claiming() {
    let broker = MockBroker::with_behavior(MockBehavior {
        grant_subscriptions: false,
        provision_replies: vec![CLAIM_RESPONSE.to_vec()],
        ..Default::default()
    });
    let mut session = session(&broker);

    let result = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await;

    assert!(matches!(result, Err(ProvisionError::SubscriptionRejected)));
    assert_eq!(broker.publish_count(), 0);
}

#[tokio::test]
async fn test_refused_connection_runs_into_timeout() {
    let broker = MockBroker::with_behavior(MockBehavior {
        accept_connections: false,
        ..Default::default()
    });
    let mut session = session(&broker);

    let result = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_millis(200),
            KEEP_ALIVE,
        )
        .await;

    assert!(matches!(result, Err(ProvisionError::Timeout(_))));
    assert_eq!(broker.subscribe_count(), 0);
    assert_eq!(broker.publish_count(), 0);
}

#[tokio::test]
async fn test_reconnect_resubscribes_before_claiming_again() {
    let broker = MockBroker::new();
    let handle = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut session = session(&broker);
            session
                .provision(
                    provisioning_params("prov-1"),
                    &ClaimDescriptor::serial_number("SN-0001"),
                    Some("config"),
                    Duration::from_millis(500),
                    KEEP_ALIVE,
                )
                .await
        })
    };

    assert!(wait_until(|| broker.publish_count() == 1, Duration::from_secs(2)).await);
    assert!(broker.reconnect());
    assert!(wait_until(|| broker.publish_count() == 2, Duration::from_secs(2)).await);

    assert_eq!(broker.subscribe_count(), 2);
    assert_eq!(broker.ordering_violations(), 0);
    assert!(matches!(
        handle.await.unwrap(),
        Err(ProvisionError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_operational_session_cannot_reuse_provisioning_client_id() {
    let broker = MockBroker::with_provision_reply(CLAIM_RESPONSE.to_vec());
    let mut session = session(&broker);

    let identity = session
        .provision(
            provisioning_params("prov-1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await
        .unwrap();

    let reused = session.connect(
        device_params("prov-1"),
        RecordingHandler::new(),
        Duration::from_secs(30),
    );
    assert!(matches!(reused, Err(SessionError::ClientIdReused(id)) if id == "prov-1"));

    let params = identity.connection_parameters(&provisioning_params("prov-1"));
    assert_eq!(params.client_id, "d1");
    assert_eq!(params.username, "k1");
    assert_eq!(params.password, "s1");

    let connection = session
        .connect(params, RecordingHandler::new(), Duration::from_secs(30))
        .unwrap();
    assert_eq!(connection.client_id(), "d1");
    assert_eq!(
        broker.sessions_opened(),
        vec!["prov-1".to_string(), "d1".to_string()]
    );
}

#[tokio::test]
async fn test_wildcard_client_id_rejected_before_connecting() {
    let broker = MockBroker::with_provision_reply(CLAIM_RESPONSE.to_vec());
    let mut session = session(&broker);

    let result = session
        .provision(
            provisioning_params("dev+1"),
            &ClaimDescriptor::serial_number("SN-0001"),
            Some("config"),
            Duration::from_secs(2),
            KEEP_ALIVE,
        )
        .await;

    assert!(matches!(
        result,
        Err(ProvisionError::InvalidClientId { client_id, .. }) if client_id == "dev+1"
    ));
    assert!(broker.sessions_opened().is_empty());
}
