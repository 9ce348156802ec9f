//! Fake messaging server.
//!
//! Accepts any number of clients on a random local port, records every event
//! they send, answers `ping` with `pingResponse` and can push events or close
//! frames to all connected clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use devsim::codec::{FrameReader, FrameWriter, read_http_head};
use devsim::protocol::{Envelope, HandshakeRequest, HandshakeResponse};
use devsim::{CloseCode, CloseFrame, Config, Endpoint, Message, Role};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Reply to `ping` with `pingResponse`.
    pub answer_pings: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { answer_pings: true }
    }
}

#[derive(Default)]
struct ServerState {
    received: parking_lot::Mutex<Vec<Envelope>>,
    connections: AtomicUsize,
    close_frames: AtomicUsize,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    outbound: broadcast::Sender<Message>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(ServerOptions::default()).await
    }

    pub async fn spawn_with(options: ServerOptions) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let (outbound, _) = broadcast::channel(64);

        let task = tokio::spawn({
            let state = state.clone();
            let outbound = outbound.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = state.clone();
                    let pushes = outbound.subscribe();
                    let options = options.clone();
                    tokio::spawn(async move {
                        let _ = serve_client(stream, state, pushes, options).await;
                    });
                }
            }
        });

        (
            Self {
                addr,
                state,
                outbound,
                task,
            },
            addr,
        )
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&format!("ws://{}/", self.addr)).unwrap()
    }

    /// Push an event to every connected client.
    pub fn broadcast(&self, event: &str, payload: Value) {
        let text = Envelope::new(event, payload).encode();
        let _ = self.outbound.send(Message::Text(text));
    }

    /// Close every connected client with 1001.
    pub fn close_all(&self) {
        let frame = CloseFrame::new(CloseCode::GoingAway, "server restart");
        let _ = self.outbound.send(Message::Close(Some(frame)));
    }

    /// Payloads received under `event`, in arrival order.
    pub fn events(&self, event: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|envelope| envelope.event == event)
            .map(|envelope| envelope.payload.clone())
            .collect()
    }

    /// Poll until `count` events named `event` arrived, or panic after `within`.
    pub async fn wait_for_events(&self, event: &str, count: usize, within: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let events = self.events(event);
            if events.len() >= count {
                return events;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {event} events, got {}",
                events.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_connections(&self, count: usize, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while self.connections() < count {
            assert!(tokio::time::Instant::now() < deadline, "client never connected");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn close_frames(&self) -> usize {
        self.state.close_frames.load(Ordering::SeqCst)
    }

    pub async fn wait_for_close_frames(&self, count: usize, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while self.close_frames() < count {
            assert!(tokio::time::Instant::now() < deadline, "no close frame received");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn serve_client(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut pushes: broadcast::Receiver<Message>,
    options: ServerOptions,
) -> devsim::Result<()> {
    let (mut rd, mut wr) = stream.into_split();
    let (head, rest) = read_http_head(&mut rd, 8192).await?;
    let request = HandshakeRequest::parse(&head)?;
    let mut response = Vec::new();
    HandshakeResponse::from_request(&request).write(&mut response);
    wr.write_all(&response).await?;
    state.connections.fetch_add(1, Ordering::SeqCst);

    let mut reader = FrameReader::with_buffered(rd, Role::Server, &Config::default(), &rest);
    let mut writer = FrameWriter::new(wr, Role::Server);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writing = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                message = rx.recv() => message,
                pushed = pushes.recv() => pushed.ok(),
            };
            let Some(message) = message else { break };
            let closing = matches!(message, Message::Close(_));
            if writer.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        match reader.read_message().await {
            Ok(Message::Text(text)) => {
                let Ok(envelope) = Envelope::decode(&text) else {
                    continue;
                };
                let answer = envelope.event == "ping" && options.answer_pings;
                state.received.lock().push(envelope);
                if answer {
                    let _ = tx.send(Message::text(Envelope::empty("pingResponse").encode()));
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                state.close_frames.fetch_add(1, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    drop(tx);
    writing.abort();
    Ok(())
}
