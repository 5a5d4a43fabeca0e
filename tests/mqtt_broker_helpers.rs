//! In-process MQTT 5 broker stand-in for transport integration tests
//!
//! Speaks just enough of the protocol for `MqttClient`: it answers CONNECT,
//! SUBSCRIBE, QoS 1 PUBLISH and PINGREQ, records what each connection sent,
//! and lets a test drop sockets, send a DISCONNECT with a chosen reason code
//! or push a PUBLISH to every connected client.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thermoguard::config::BrokerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const REASON_NORMAL: u8 = 0x00;
pub const REASON_SERVER_SHUTTING_DOWN: u8 = 0x8B;

/// A PUBLISH received from a client
#[derive(Debug, Clone)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
    pub qos: u8,
}

impl ReceivedPublish {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Everything one TCP connection sent, in arrival order
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub subscriptions: Vec<String>,
    pub publishes: Vec<ReceivedPublish>,
    pub disconnected_cleanly: bool,
}

impl Session {
    pub fn published_on(&self, topic: &str) -> Vec<ReceivedPublish> {
        self.publishes
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Status values published on a presence topic
    pub fn presence(&self, topic: &str) -> Vec<String> {
        self.published_on(topic)
            .iter()
            .filter(|p| p.retain)
            .filter_map(|p| p.json()["status"].as_str().map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Control {
    Drop,
    Disconnect(u8),
    Publish(Vec<u8>),
}

type Sessions = Arc<Mutex<Vec<Session>>>;

pub struct FakeBroker {
    port: u16,
    sessions: Sessions,
    control: broadcast::Sender<Control>,
    acceptor: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions: Sessions = Arc::default();
        let (control, _) = broadcast::channel(1024);

        let accept_sessions = sessions.clone();
        let accept_control = control.clone();
        let acceptor = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = {
                    let mut sessions = accept_sessions.lock().unwrap();
                    sessions.push(Session::default());
                    sessions.len() - 1
                };
                tokio::spawn(serve(
                    stream,
                    index,
                    accept_sessions.clone(),
                    accept_control.subscribe(),
                ));
            }
        });

        FakeBroker {
            port,
            sessions,
            control,
            acceptor,
        }
    }

    pub fn config(&self) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            keepalive: 30,
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    /// Close every open connection without a DISCONNECT packet
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }

    /// Send DISCONNECT with `reason` to every open connection
    pub fn send_disconnect(&self, reason: u8) {
        let _ = self.control.send(Control::Disconnect(reason));
    }

    /// Deliver an at-most-once PUBLISH to every open connection
    pub fn publish(&self, topic: &str, payload: &serde_json::Value) {
        let payload = serde_json::to_vec(payload).unwrap();
        let _ = self.control.send(Control::Publish(encode_publish(topic, &payload)));
    }

    /// Stop listening and close every connection; later connects are refused
    pub fn stop(&self) {
        self.acceptor.abort();
        self.drop_connections();
    }

    /// Poll the recorded sessions until `condition` holds
    pub async fn wait_for<F>(&self, what: &str, condition: F) -> Vec<Session>
    where
        F: Fn(&[Session]) -> bool,
    {
        for _ in 0..500 {
            let sessions = self.sessions();
            if condition(&sessions) {
                return sessions;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("broker never observed: {what}; sessions: {:?}", self.sessions());
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    stream: TcpStream,
    index: usize,
    sessions: Sessions,
    mut control: broadcast::Receiver<Control>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (packet_tx, mut packets) = mpsc::unbounded_channel();
    let read_task = tokio::spawn(async move {
        while let Ok(packet) = read_packet(&mut reader).await {
            if packet_tx.send(packet).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some((header, body)) = packet else { break };
                match respond(header, &body, index, &sessions) {
                    Reply::Send(bytes) => {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Reply::Nothing => {}
                    Reply::Close => break,
                }
            }
            command = control.recv() => match command {
                Ok(Control::Drop) | Err(RecvError::Closed) => break,
                Ok(Control::Disconnect(reason)) => {
                    // the client closes the socket once it has read this
                    let _ = writer.write_all(&[0xE0, 0x01, reason]).await;
                }
                Ok(Control::Publish(bytes)) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
            }
        }
    }

    read_task.abort();
}

enum Reply {
    Send(Vec<u8>),
    Nothing,
    Close,
}

fn respond(header: u8, body: &[u8], index: usize, sessions: &Sessions) -> Reply {
    let mut cursor = Cursor { buf: body, pos: 0 };

    match header >> 4 {
        // CONNECT -> CONNACK, success, no properties
        1 => Reply::Send(vec![0x20, 0x03, 0x00, 0x00, 0x00]),
        // PUBLISH
        3 => {
            let qos = (header >> 1) & 0x03;
            let topic = cursor.string();
            let packet_id = (qos > 0).then(|| cursor.u16());
            cursor.skip_properties();
            let publish = ReceivedPublish {
                topic,
                payload: cursor.rest().to_vec(),
                retain: header & 0x01 == 1,
                qos,
            };
            sessions.lock().unwrap()[index].publishes.push(publish);

            match packet_id {
                Some(id) => {
                    let [high, low] = id.to_be_bytes();
                    Reply::Send(vec![0x40, 0x02, high, low])
                }
                None => Reply::Nothing,
            }
        }
        // SUBSCRIBE -> SUBACK granting the requested QoS
        8 => {
            let packet_id = cursor.u16();
            cursor.skip_properties();
            let mut granted = Vec::new();
            let mut topics = Vec::new();
            while !cursor.is_empty() {
                topics.push(cursor.string());
                granted.push(cursor.u8() & 0x03);
            }
            sessions.lock().unwrap()[index]
                .subscriptions
                .extend(topics);

            let mut variable = packet_id.to_be_bytes().to_vec();
            variable.push(0x00);
            variable.extend(granted);
            Reply::Send(frame(0x90, &variable))
        }
        // PINGREQ -> PINGRESP
        12 => Reply::Send(vec![0xD0, 0x00]),
        // DISCONNECT
        14 => {
            sessions.lock().unwrap()[index].disconnected_cleanly = true;
            Reply::Close
        }
        _ => Reply::Nothing,
    }
}

async fn read_packet(reader: &mut OwnedReadHalf) -> io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed remaining length",
            ));
        }
    }

    let mut body = vec![0; remaining];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut variable = (topic.len() as u16).to_be_bytes().to_vec();
    variable.extend_from_slice(topic.as_bytes());
    variable.push(0x00);
    variable.extend_from_slice(payload);
    frame(0x30, &variable)
}

fn frame(header: u8, variable: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    let mut length = variable.len();
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if length == 0 {
            break;
        }
    }
    packet.extend_from_slice(variable);
    packet
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> u8 {
        let byte = self.buf[self.pos];
        self.pos += 1;
        byte
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes([self.u8(), self.u8()])
    }

    fn string(&mut self) -> String {
        let len = usize::from(self.u16());
        let text = String::from_utf8_lossy(&self.buf[self.pos..self.pos + len]).to_string();
        self.pos += len;
        text
    }

    fn skip_properties(&mut self) {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.u8();
            len |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        self.pos += len;
    }

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }
}
