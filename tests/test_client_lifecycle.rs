//! Client lifecycle tests against the in-memory broker
//!
//! Connect, disconnect, the five operations, and the preconditions each one
//! enforces.


use device_status_feed::client::{
    ConnectionPhase, PubSubClient, LOG_HISTORY_CAPACITY, MESSAGE_HISTORY_CAPACITY,
};
use device_status_feed::config::{ConfigError, ConnectionConfig};
use device_status_feed::error::ClientError;
use device_status_feed::protocol::STATUS_TOPIC_FILTER;
use device_status_feed::testing::{ConnectOutcome, MockBroker};
use device_status_feed::transport::{QosLevel, TransportError};
use std::time::Duration;
use test_helpers::*;
use tokio::time::sleep;

#[tokio::test]
async fn test_connect_subscribes_default_topics() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    let (states, _handle) = record_states(&client);

    client.connect().await.expect("connect should succeed");

    let state = client.connection_state();
    assert!(state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_connected.is_some());
    assert_eq!(broker.active_filters().await, vec![STATUS_TOPIC_FILTER.to_string()]);
    assert_eq!(client.subscriptions().len(), 1);

    let phases: Vec<ConnectionPhase> = states.lock().unwrap().iter().map(|s| s.phase()).collect();
    assert_eq!(phases, vec![ConnectionPhase::Connecting, ConnectionPhase::Connected]);
    assert!(has_log(&client, "Connected to MQTT broker"));
}

#[tokio::test]
async fn test_invalid_config_refused_at_construction() {
    let broker = MockBroker::new();
    let config = ConnectionConfig {
        host: String::new(),
        port: 0,
        default_topics: vec!["a/#/b".to_string()],
        ..test_config()
    };

    let result = PubSubClient::new(config, broker.connector());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

    let zero_timeout = ConnectionConfig {
        connect_timeout: Duration::ZERO,
        ..test_config()
    };
    assert!(PubSubClient::new(zero_timeout, broker.connector()).is_err());
    assert!(PubSubClient::with_rumqttc(ConnectionConfig {
        port: 0,
        ..test_config()
    })
    .is_err());
    assert_eq!(broker.open_attempts(), 0);
}

#[tokio::test]
async fn test_connect_while_connected_is_noop() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();
    let before = client.connection_state();

    client.connect().await.expect("second connect is not an error");

    assert_eq!(broker.open_attempts(), 1);
    assert_eq!(client.connection_state(), before);
    assert!(has_log(&client, "Connect skipped"));
}

#[tokio::test]
async fn test_refused_connect_surfaces_error() {
    let broker = MockBroker::with_failure();
    let client = client_on(&broker, test_config());

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    let state = client.connection_state();
    assert_eq!(state.phase(), ConnectionPhase::Disconnected);
    assert_eq!(state.connection_error.as_deref(), Some("Connection refused"));
    assert!(state.last_error_at.is_some());
}

#[tokio::test]
async fn test_unreachable_broker_surfaces_error() {
    let broker = MockBroker::new();
    broker
        .set_default_outcome(ConnectOutcome::Unreachable("dns failure".to_string()))
        .await;
    let client = client_on(&broker, test_config());

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    assert!(!client.is_connected());
    assert_eq!(broker.live_sessions().await, 0);
}

#[tokio::test]
async fn test_connect_timeout_tears_down_session() {
    let broker = MockBroker::new();
    broker.script([ConnectOutcome::Hang]).await;
    let config = ConnectionConfig {
        connect_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let client = client_on(&broker, config);

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientError::ConnectTimeout(_))));
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    assert!(client.connection_state().connection_error.is_some());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.live_sessions().await, 0);
}

#[tokio::test]
async fn test_disconnect_resets_state() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();
    let connected_at = client.connection_state().last_connected;

    client.disconnect().await.unwrap();

    let state = client.connection_state();
    assert_eq!(state.phase(), ConnectionPhase::Disconnected);
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.connection_error.is_none());
    assert_eq!(state.last_connected, connected_at);
    assert!(client.subscriptions().is_empty());
    assert_eq!(broker.live_sessions().await, 0);
    assert!(has_log(&client, "Disconnected from MQTT broker"));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();

    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    assert_eq!(broker.open_attempts(), 0);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_connect() {
    let broker = MockBroker::new();
    broker.script([ConnectOutcome::Hang]).await;
    let client = client_on(&broker, test_config());

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_for("connecting", || client.phase() == ConnectionPhase::Connecting).await;

    client.disconnect().await.unwrap();

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test]
async fn test_operations_rejected_while_disconnected() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());

    let subscribe = client.subscribe("devices/+/status", QosLevel::AtMostOnce).await;
    let unsubscribe = client.unsubscribe("devices/+/status").await;
    let publish = client
        .publish("devices/1/status", "up", QosLevel::AtMostOnce, false)
        .await;

    assert!(matches!(subscribe, Err(ClientError::NotConnected)));
    assert!(matches!(unsubscribe, Err(ClientError::NotConnected)));
    assert!(matches!(publish, Err(ClientError::NotConnected)));
    assert_eq!(broker.open_attempts(), 0);
    assert!(broker.get_published_messages().await.is_empty());
    assert!(has_log(&client, "not connected"));
}

#[tokio::test]
async fn test_invalid_topics_rejected_locally() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();

    let publish = client
        .publish("devices/+/status", "up", QosLevel::AtMostOnce, false)
        .await;
    let subscribe = client.subscribe("devices/#/status", QosLevel::AtMostOnce).await;
    let empty = client.unsubscribe("").await;

    assert!(matches!(publish, Err(ClientError::InvalidTopic { .. })));
    assert!(matches!(subscribe, Err(ClientError::InvalidTopic { .. })));
    assert!(matches!(empty, Err(ClientError::InvalidTopic { .. })));
    assert!(broker.get_published_messages().await.is_empty());
}

#[tokio::test]
async fn test_subscribe_is_deduplicated() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();

    client.subscribe("devices/+/status", QosLevel::AtMostOnce).await.unwrap();
    client.subscribe("devices/+/status", QosLevel::AtLeastOnce).await.unwrap();

    let matching: Vec<_> = client
        .subscriptions()
        .into_iter()
        .filter(|s| s.topic == "devices/+/status")
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].qos, QosLevel::AtLeastOnce);
}

#[tokio::test]
async fn test_broker_rejected_subscribe_leaves_set_unchanged() {
    let broker = MockBroker::new();
    broker.fail_subscriptions_to("secure/#").await;
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();
    let before = client.subscriptions();

    let result = client.subscribe("secure/#", QosLevel::AtMostOnce).await;

    match result {
        Err(ClientError::Subscribe { topic, source }) => {
            assert_eq!(topic, "secure/#");
            assert!(matches!(source, TransportError::Rejected(_)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.subscriptions(), before);
    assert!(!error_logs(&client).is_empty());
}

#[tokio::test]
async fn test_failed_default_subscription_does_not_fail_connect() {
    let broker = MockBroker::new();
    broker.fail_subscriptions_to(STATUS_TOPIC_FILTER).await;
    let client = client_on(&broker, test_config());

    client.connect().await.expect("connect still succeeds");

    assert!(client.is_connected());
    assert!(client.subscriptions().is_empty());
    assert!(has_log(&client, "Failed to subscribe to default topic"));
}

#[tokio::test]
async fn test_unsubscribe_removes_topic() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();
    client.subscribe("devices/+/status", QosLevel::AtMostOnce).await.unwrap();

    client.unsubscribe("devices/+/status").await.unwrap();

    assert!(client.subscriptions().iter().all(|s| s.topic != "devices/+/status"));
    assert_eq!(broker.active_filters().await, vec![STATUS_TOPIC_FILTER.to_string()]);
}

#[tokio::test]
async fn test_publish_reaches_broker_once() {
    let broker = MockBroker::new();
    broker.set_loopback(false);
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();

    client
        .publish("devices/3/command", "restart", QosLevel::AtLeastOnce, true)
        .await
        .unwrap();

    let published = broker.get_published_messages().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "devices/3/command");
    assert_eq!(published[0].payload_str(), "restart");
    assert_eq!(published[0].qos, QosLevel::AtLeastOnce);
    assert!(published[0].retain);
}

#[tokio::test]
async fn test_publish_failure_is_not_retried() {
    let broker = MockBroker::new();
    broker.fail_publishes(true);
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();

    let result = client
        .publish("devices/3/command", "restart", QosLevel::AtMostOnce, false)
        .await;

    assert!(matches!(result, Err(ClientError::Publish { .. })));
    assert!(broker.get_published_messages().await.is_empty());
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_histories_are_bounded_newest_first() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();
    client.subscribe("load/#", QosLevel::AtMostOnce).await.unwrap();

    let total = MESSAGE_HISTORY_CAPACITY + 5;
    for i in 0..total {
        broker.push_message(&format!("load/{i}"), format!("{i}")).await;
    }
    let last_topic = format!("load/{}", total - 1);
    wait_for("all messages", || {
        client.messages().first().map(|m| m.topic.clone()) == Some(last_topic.clone())
    })
    .await;

    let messages = client.messages();
    assert_eq!(messages.len(), MESSAGE_HISTORY_CAPACITY);
    assert_eq!(messages[0].payload, format!("{}", total - 1));
    assert_eq!(messages[MESSAGE_HISTORY_CAPACITY - 1].payload, "5");
    assert_eq!(client.logs().len(), LOG_HISTORY_CAPACITY);

    client.clear_messages();
    client.clear_logs();
    assert!(client.messages().is_empty());
    assert!(client.logs().is_empty());
}

#[tokio::test]
async fn test_client_id_is_passed_to_broker() {
    let broker = MockBroker::new();
    let client = client_on(&broker, test_config());
    client.connect().await.unwrap();

    assert_eq!(
        broker.client_ids().await,
        vec!["test_general_2024-01-01_00-00-00-000Z".to_string()]
    );
}
