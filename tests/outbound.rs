//! Outbound Session Integration Tests
//!
//! Runs the NATS publisher against a scripted NATS server on a local socket.

mod common;

use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

use mqtt_relay::config::OutboundConfig;
use mqtt_relay::outbound;
use mqtt_relay::tls::TlsError;
use mqtt_relay::SessionError;

use common::{bind, closed_addr, scripted_nats, NatsEvent};

const MAX_PAYLOAD: usize = 1024 * 1024;

fn nats_config(addr: &str) -> OutboundConfig {
    OutboundConfig {
        url: format!("nats://{}", addr),
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<NatsEvent>) -> Vec<NatsEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_nats_publish_with_credentials_and_smoke_test() {
    let (listener, addr) = bind().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(scripted_nats(listener, 10, MAX_PAYLOAD, tx));

    let config = OutboundConfig {
        username: Some("relay".to_string()),
        password: Some("secret".to_string()),
        probe_topic: Some("relay.health".to_string()),
        ..nats_config(&addr)
    };

    let publisher = outbound::connect(&config).await.unwrap();
    assert_eq!(publisher.name(), "nats");

    publisher
        .publish("telemetry.temp", Bytes::from_static(b"21.5"))
        .await
        .unwrap();
    // The closing flush is answered only after every PUB before it
    publisher.close().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3, "unexpected events: {:?}", events);

    match &events[0] {
        NatsEvent::Connect(options) => {
            assert!(options.contains("\"user\":\"relay\""), "{}", options);
            assert!(options.contains("\"pass\":\"secret\""), "{}", options);
        }
        other => panic!("expected CONNECT first, got {:?}", other),
    }
    assert_eq!(
        events[1..],
        [
            NatsEvent::Publish {
                subject: "relay.health".to_string(),
                payload: Bytes::from_static(b"test-value"),
            },
            NatsEvent::Publish {
                subject: "telemetry.temp".to_string(),
                payload: Bytes::from_static(b"21.5"),
            },
        ]
    );

    // Closing twice is an error, and publishing after close fails
    assert!(matches!(publisher.close().await, Err(SessionError::Close(_))));
    assert!(matches!(
        publisher.publish("telemetry.temp", Bytes::new()).await,
        Err(SessionError::Publish(_))
    ));

    server.abort();
}

#[tokio::test]
async fn test_nats_without_probe_topic_sends_nothing() {
    let (listener, addr) = bind().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(scripted_nats(listener, 10, MAX_PAYLOAD, tx));

    let publisher = outbound::connect(&nats_config(&addr)).await.unwrap();
    publisher.close().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        NatsEvent::Connect(options) => assert!(!options.contains("\"pass\":\""), "{}", options),
        other => panic!("expected CONNECT, got {:?}", other),
    }

    server.abort();
}

#[tokio::test]
async fn test_nats_failed_smoke_test_is_connection_error() {
    let (listener, addr) = bind().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    // Smaller than the 10-byte smoke-test payload
    let server = tokio::spawn(scripted_nats(listener, 10, 4, tx));

    let config = OutboundConfig {
        probe_topic: Some("relay.health".to_string()),
        ..nats_config(&addr)
    };

    let result = timeout(Duration::from_secs(5), outbound::connect(&config))
        .await
        .unwrap();
    match result {
        Err(SessionError::Connection(msg)) => assert!(msg.contains("relay.health"), "{}", msg),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("smoke test should have failed"),
    }

    server.abort();
}

#[tokio::test]
async fn test_nats_close_bounded_when_server_gone() {
    let (listener, addr) = bind().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    // Handshake PING and the connect-time flush, then the server goes away
    let server = tokio::spawn(scripted_nats(listener, 2, MAX_PAYLOAD, tx));

    let publisher = outbound::connect(&nats_config(&addr)).await.unwrap();

    let result = timeout(Duration::from_secs(5), publisher.close())
        .await
        .expect("close must not hang");
    assert!(matches!(result, Err(SessionError::Close(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn test_nats_connect_bounded_when_server_stops_answering() {
    let (listener, addr) = bind().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    // Handshake only; the connect-time flush is never answered
    let server = tokio::spawn(scripted_nats(listener, 1, MAX_PAYLOAD, tx));

    let result = timeout(Duration::from_secs(5), outbound::connect(&nats_config(&addr)))
        .await
        .expect("connect must not hang");
    assert!(matches!(result, Err(SessionError::Connection(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_nats_is_connection_error() {
    let addr = closed_addr().await;

    let result = timeout(Duration::from_secs(5), outbound::connect(&nats_config(&addr)))
        .await
        .unwrap();
    assert!(matches!(result, Err(SessionError::Connection(_))));
}

#[tokio::test]
async fn test_nats_missing_ca_file_is_tls_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = OutboundConfig {
        ca_cert_file: Some(dir.path().join("ca.pem").to_string_lossy().into_owned()),
        ..nats_config(&closed_addr().await)
    };

    let result = outbound::connect(&config).await;
    assert!(matches!(result, Err(SessionError::Tls(TlsError::Io { .. }))));
}

#[tokio::test]
async fn test_nats_invalid_ca_file_is_tls_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"not a certificate\n").unwrap();

    let config = OutboundConfig {
        ca_cert_file: Some(file.path().to_string_lossy().into_owned()),
        ..nats_config(&closed_addr().await)
    };

    let result = outbound::connect(&config).await;
    assert!(matches!(
        result,
        Err(SessionError::Tls(TlsError::CertificateError(_)))
    ));
}

#[cfg(not(feature = "kafka"))]
#[tokio::test]
async fn test_kafka_backend_requires_feature() {
    use mqtt_relay::config::OutboundBackend;

    let config = OutboundConfig {
        backend: OutboundBackend::Kafka,
        url: "127.0.0.1:9092".to_string(),
        ..Default::default()
    };

    let result = outbound::connect(&config).await;
    assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
}
