//! Integration tests for MQTT reconnection
//!
//! The real `MqttClient` supervisor against an in-process broker:
//! - an abrupt socket loss or an abnormal DISCONNECT reconnects with backoff
//! - every ConnAck re-announces ONLINE and replays the subscriptions
//! - a normal-reason DISCONNECT ends the session without reconnecting
//! - an exhausted attempt ceiling is permanent

mod mqtt_broker_helpers;

use mqtt_broker_helpers::{FakeBroker, Session, REASON_NORMAL, REASON_SERVER_SHUTTING_DOWN};
use serde_json::json;
use std::time::Duration;
use test_helpers::engine_config;
use thermoguard::protocol::{DeliveryGuarantee, Subscription};
use thermoguard::service::{AlertDispatcher, ServiceLifecycle};
use thermoguard::testing::ManualClock;
use thermoguard::transport::mqtt::{ConnectionState, MqttClient, ReconnectConfig};
use thermoguard::transport::Transport;
use tokio::time::sleep;

const PRESENCE: &str = "iot/services/alert_strategy/status";

fn fast_backoff(max_attempts: Option<u32>) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        initial_delay_ms: 50,
        max_delay_ms: 200,
    }
}

fn subscriptions() -> Vec<Subscription> {
    vec![
        Subscription::new("home/kitchen/temperature", DeliveryGuarantee::AtMostOnce),
        Subscription::new("home/kitchen/indicator/state", DeliveryGuarantee::AtLeastOnce),
    ]
}

async fn connected_client(broker: &FakeBroker, max_attempts: Option<u32>) -> MqttClient {
    let mut client = MqttClient::new("alert_strategy", broker.config())
        .unwrap()
        .with_reconnect_config(fast_backoff(max_attempts))
        .unwrap();
    client.connect().await.expect("initial connection should succeed");
    client.subscribe(&subscriptions()).await.unwrap();
    broker
        .wait_for("initial subscriptions", |s| {
            s.len() == 1 && s[0].subscriptions.len() == 2
        })
        .await;
    client
}

async fn wait_until_connected(client: &MqttClient) {
    for _ in 0..250 {
        if client.is_connected() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("client state: {:?}", client.connection_state());
}

fn replayed(session: &Session) -> bool {
    session.subscriptions
        == vec![
            "home/kitchen/temperature".to_string(),
            "home/kitchen/indicator/state".to_string(),
        ]
}

#[tokio::test]
async fn test_reconnection_after_connection_loss() {
    let broker = FakeBroker::start().await;
    let mut client = connected_client(&broker, None).await;

    let sessions = broker.sessions();
    let first = &sessions[0];
    assert_eq!(first.presence(PRESENCE), vec!["ONLINE"]);
    assert!(first
        .published_on(PRESENCE)
        .iter()
        .all(|p| p.retain && p.qos == 1));

    broker.drop_connections();

    let sessions = broker
        .wait_for("reconnect with ONLINE and replayed subscriptions", |s| {
            s.len() == 2 && replayed(&s[1]) && s[1].presence(PRESENCE) == vec!["ONLINE"]
        })
        .await;
    assert!(!sessions[0].disconnected_cleanly);
    wait_until_connected(&client).await;

    client
        .publish(
            "home/kitchen/alerts",
            br#"{"type":"OVERHEAT"}"#.to_vec(),
            DeliveryGuarantee::AtLeastOnce,
            false,
        )
        .await
        .unwrap();
    broker
        .wait_for("publish on the new connection", |s| {
            s.len() == 2 && s[1].published_on("home/kitchen/alerts").len() == 1
        })
        .await;

    client.disconnect().await.unwrap();
    let sessions = broker
        .wait_for("clean DISCONNECT", |s| s[1].disconnected_cleanly)
        .await;
    // a clean disconnect never publishes OFFLINE itself
    assert_eq!(sessions[1].presence(PRESENCE), vec!["ONLINE"]);
}

#[tokio::test]
async fn test_abnormal_broker_disconnect_reconnects() {
    let broker = FakeBroker::start().await;
    let mut client = connected_client(&broker, None).await;

    broker.send_disconnect(REASON_SERVER_SHUTTING_DOWN);

    broker
        .wait_for("reconnect after server shutdown reason", |s| {
            s.len() == 2 && replayed(&s[1])
        })
        .await;
    wait_until_connected(&client).await;

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_normal_broker_disconnect_is_final() {
    let broker = FakeBroker::start().await;
    let client = connected_client(&broker, None).await;

    broker.send_disconnect(REASON_NORMAL);

    for _ in 0..250 {
        if matches!(
            client.connection_state(),
            Some(ConnectionState::Disconnected(_))
        ) {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(
        client.connection_state(),
        Some(ConnectionState::Disconnected(_))
    ));

    // well past several backoff periods
    sleep(Duration::from_millis(600)).await;
    assert_eq!(broker.sessions().len(), 1);
    assert!(!client.is_connected());
    assert!(!client.is_permanently_disconnected());
}

#[tokio::test]
async fn test_exhausted_attempts_are_permanent() {
    let broker = FakeBroker::start().await;
    let client = connected_client(&broker, Some(2)).await;

    broker.stop();

    for _ in 0..250 {
        if client.is_permanently_disconnected() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(client.is_permanently_disconnected());
    assert_eq!(broker.sessions().len(), 1);
}

#[tokio::test]
async fn test_alert_service_keeps_state_across_reconnect() {
    let broker = FakeBroker::start().await;
    let dispatcher = AlertDispatcher::new(&engine_config(), ManualClock::new(1_700_000_000)).unwrap();
    let subscriptions = dispatcher.subscriptions();
    let client = MqttClient::new("alert_strategy", broker.config())
        .unwrap()
        .with_reconnect_config(fast_backoff(None))
        .unwrap();
    let mut lifecycle = ServiceLifecycle::new("alert_strategy", client);
    lifecycle.start(dispatcher, &subscriptions).await.unwrap();
    broker
        .wait_for("service subscriptions", |s| {
            s.len() == 1 && s[0].subscriptions.len() == subscriptions.len()
        })
        .await;

    let reading = |temp: f64| json!({"bn": "rpi-1", "ts": 0, "room_id": "kitchen", "temp_c": temp});

    broker.publish("home/kitchen/temperature", &reading(29.0));
    broker
        .wait_for("OVERHEAT alert", |s| {
            s[0].published_on("home/kitchen/alerts").len() == 1
        })
        .await;

    broker.drop_connections();
    broker
        .wait_for("service reconnect", |s| {
            s.len() == 2 && s[1].subscriptions.len() == subscriptions.len()
        })
        .await;
    wait_until_connected(lifecycle.transport().unwrap()).await;

    // still in alert: a second hot reading is not a transition
    broker.publish("home/kitchen/temperature", &reading(30.0));
    broker.publish("home/kitchen/temperature", &reading(23.0));
    let sessions = broker
        .wait_for("RECOVERED alert after reconnect", |s| {
            s[1].published_on("home/kitchen/alerts").len() == 1
        })
        .await;
    assert_eq!(
        sessions[1].published_on("home/kitchen/alerts")[0].json()["type"],
        "RECOVERED"
    );

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_burst_does_not_stall_publishing() {
    let broker = FakeBroker::start().await;
    let dispatcher = AlertDispatcher::new(&engine_config(), ManualClock::new(1_700_000_000)).unwrap();
    let subscriptions = dispatcher.subscriptions();
    let client = MqttClient::new("alert_strategy", broker.config()).unwrap();
    let mut lifecycle = ServiceLifecycle::new("alert_strategy", client);
    lifecycle.start(dispatcher, &subscriptions).await.unwrap();
    broker
        .wait_for("service subscriptions", |s| {
            s.len() == 1 && !s[0].subscriptions.is_empty()
        })
        .await;

    // every reading is a first overheat for its room: two publishes each
    for n in 0..600 {
        broker.publish(
            "home/kitchen/temperature",
            &json!({"bn": "rpi-1", "ts": 0, "room_id": format!("room{n}"), "temp_c": 30.0}),
        );
    }

    // readings may be dropped while the queue is full, but the service must
    // keep consuming and publishing afterwards
    let mut recovered = false;
    for _ in 0..50 {
        broker.publish(
            "home/kitchen/temperature",
            &json!({"bn": "rpi-1", "ts": 0, "room_id": "kitchen", "temp_c": 30.0}),
        );
        sleep(Duration::from_millis(200)).await;
        if !broker.sessions()[0]
            .published_on("home/kitchen/alerts")
            .is_empty()
        {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "alert service stopped publishing after a burst");
    assert!(lifecycle.transport().unwrap().is_connected());

    lifecycle.shutdown().await.unwrap();
}
