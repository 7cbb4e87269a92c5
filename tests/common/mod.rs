//! Scripted MQTT broker and NATS server pieces shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use mqtt_relay::config::{MqttConfig, TopicMapping};

pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

/// Listener on an ephemeral local port, plus its address
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Address of a local port nothing listens on
pub async fn closed_addr() -> String {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

pub fn mqtt_config(broker: &str, topics: &[&str]) -> MqttConfig {
    MqttConfig {
        broker: broker.to_string(),
        client_id: "relay".to_string(),
        connect_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(100),
        topics: topics
            .iter()
            .map(|t| TopicMapping::new(*t, format!("queue.{}", t)))
            .collect(),
        ..Default::default()
    }
}

// MQTT

/// Read one MQTT control packet: (first header byte, body)
pub async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn write_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

pub fn publish_qos0(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    write_remaining_length(2 + topic.len() + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Topic filter carried by a single-topic SUBSCRIBE body
pub fn subscribe_topic(body: &[u8]) -> String {
    let len = u16::from_be_bytes([body[2], body[3]]) as usize;
    String::from_utf8(body[4..4 + len].to_vec()).unwrap()
}

/// SUBACK for the SUBSCRIBE `body`, with a single return code
pub fn suback(body: &[u8], code: u8) -> [u8; 5] {
    [0x90, 0x03, body[0], body[1], code]
}

pub async fn accept_connect(listener: &TcpListener, connack: &[u8]) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (header, _) = read_packet(&mut stream).await.unwrap();
    assert_eq!(header, 0x10, "expected CONNECT");
    stream.write_all(connack).await.unwrap();
    stream
}

// NATS

/// What the scripted NATS server saw from its client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsEvent {
    /// JSON options of the CONNECT line
    Connect(String),
    Publish { subject: String, payload: Bytes },
}

/// NATS server for a single client.
///
/// Answers the first `pongs` PINGs; on the next one it closes the
/// connection and stops listening.
pub async fn scripted_nats(
    listener: TcpListener,
    pongs: usize,
    max_payload: usize,
    events: mpsc::UnboundedSender<NatsEvent>,
) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let info = format!(
        "INFO {{\"server_id\":\"relay-test\",\"server_name\":\"relay-test\",\"version\":\"2.10.0\",\
         \"go\":\"go1.21\",\"host\":\"127.0.0.1\",\"port\":4222,\"headers\":true,\
         \"max_payload\":{},\"proto\":1}}\r\n",
        max_payload
    );
    write.write_all(info.as_bytes()).await.unwrap();

    let mut answered = 0;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let op = line.trim_end();

        if let Some(options) = op.strip_prefix("CONNECT ") {
            let _ = events.send(NatsEvent::Connect(options.to_string()));
        } else if op == "PING" {
            if answered == pongs {
                return;
            }
            answered += 1;
            write.write_all(b"PONG\r\n").await.unwrap();
        } else if let Some(args) = op.strip_prefix("PUB ") {
            let args: Vec<&str> = args.split_whitespace().collect();
            let size: usize = args[args.len() - 1].parse().unwrap();

            // Payload plus trailing CRLF
            let mut payload = vec![0; size + 2];
            reader.read_exact(&mut payload).await.unwrap();
            payload.truncate(size);

            let _ = events.send(NatsEvent::Publish {
                subject: args[0].to_string(),
                payload: Bytes::from(payload),
            });
        }
    }
}
