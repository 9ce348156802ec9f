//! Connect, upgrade and run one event-channel connection.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::codec::{FrameReader, FrameWriter, read_http_head};
use crate::config::{Config, Endpoint};
use crate::connection::subscriptions::Subscriptions;
use crate::connection::{ConnectionState, DisconnectReason, Role};
use crate::error::{ConnectError, Error, SendError};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Envelope, HandshakeRequest, HandshakeResponse};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens connections. Holds no connection state itself and never retries;
/// retry policy belongs to the caller.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    config: Config,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a TCP connection to `endpoint` and perform the upgrade.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Refused`], [`ConnectError::Unreachable`] or
    /// [`ConnectError::Timeout`] for TCP failures, and
    /// [`ConnectError::Handshake`] if the server rejects the upgrade.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<ConnectionHandle, ConnectError> {
        let limit = self.config.timeouts.connect;
        let stream = match timeout(
            limit,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(classify_io(endpoint, &err, limit)),
            Err(_) => {
                return Err(ConnectError::Timeout {
                    endpoint: endpoint.to_string(),
                    after: limit,
                });
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "could not disable Nagle");
        }
        self.establish(stream, endpoint).await
    }

    /// Upgrade an already connected stream and start its reader task.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Timeout`] if the upgrade exceeds the handshake timeout,
    /// [`ConnectError::Handshake`] or [`ConnectError::Io`] otherwise.
    pub async fn establish<S>(
        &self,
        stream: S,
        endpoint: &Endpoint,
    ) -> Result<ConnectionHandle, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let limit = self.config.timeouts.handshake;
        let max_head = self.config.limits.max_handshake_size;

        let upgrade = async {
            let request = HandshakeRequest::client(endpoint.authority(), endpoint.path.clone())?;
            let mut buf = Vec::with_capacity(256);
            request.write(&mut buf);
            write_half.write_all(&buf).await?;
            write_half.flush().await?;

            let (head, leftover) = read_http_head(&mut read_half, max_head).await?;
            HandshakeResponse::parse(&head)?.verify(&request)?;
            Ok::<_, Error>(leftover)
        };
        let leftover = match timeout(limit, upgrade).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectError::Timeout {
                    endpoint: endpoint.to_string(),
                    after: limit,
                });
            }
        };

        let reader = FrameReader::with_buffered(read_half, Role::Client, &self.config, &leftover);
        let writer: FrameWriter<BoxedWriter> = FrameWriter::new(Box::new(write_half), Role::Client);
        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            endpoint: endpoint.to_string(),
            config: self.config.clone(),
            writer: tokio::sync::Mutex::new(writer),
            subscriptions: Subscriptions::default(),
            state,
            reason: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(
            read_loop(reader, shared.clone())
                .instrument(info_span!("connection", endpoint = %shared.endpoint)),
        );
        info!(endpoint = %shared.endpoint, "connected");
        Ok(ConnectionHandle { shared })
    }
}

fn classify_io(endpoint: &Endpoint, err: &std::io::Error, limit: Duration) -> ConnectError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => ConnectError::Refused {
            endpoint: endpoint.to_string(),
        },
        // The OS gave up first; report the budget the attempt ran under.
        ErrorKind::TimedOut => ConnectError::Timeout {
            endpoint: endpoint.to_string(),
            after: limit,
        },
        _ => ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        },
    }
}

struct Shared {
    endpoint: String,
    config: Config,
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriter>>,
    subscriptions: Subscriptions,
    state: watch::Sender<ConnectionState>,
    /// First reason wins; set before the state flips to `Closed`.
    reason: parking_lot::Mutex<Option<DisconnectReason>>,
    cancel: CancellationToken,
}

impl Shared {
    fn claim(&self, reason: &DisconnectReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.clone());
        true
    }

    /// Record an unexpected close and tell subscribers.
    fn lost(&self, reason: DisconnectReason) {
        if !self.claim(&reason) {
            return;
        }
        warn!(endpoint = %self.endpoint, %reason, "connection closed");
        self.cancel.cancel();
        self.state.send_replace(ConnectionState::Closed);
        self.subscriptions.notify_disconnect(&reason);
    }

    async fn write(&self, message: Message) -> Result<(), SendError> {
        let limit = self.config.timeouts.write;
        let result = timeout(limit, async {
            let mut writer = self.writer.lock().await;
            writer.send(message).await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.lost(DisconnectReason::Error(err.to_string()));
                Err(SendError::Transport(err))
            }
            Err(_) => {
                // A cancelled write may have left half a frame on the wire.
                self.lost(DisconnectReason::Error(format!(
                    "write timed out after {limit:?}"
                )));
                Err(SendError::Timeout(limit))
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: FrameReader<R>, shared: Arc<Shared>) {
    let reason = loop {
        let message = tokio::select! {
            () = shared.cancel.cancelled() => return,
            message = reader.read_message() => message,
        };

        match message {
            Ok(Message::Text(text)) => match Envelope::decode(&text) {
                Ok(envelope) => {
                    let delivered = shared
                        .subscriptions
                        .dispatch(&envelope.event, &envelope.payload);
                    trace!(event = %envelope.event, delivered, "inbound event");
                }
                Err(err) => warn!(error = %err, "dropping malformed event"),
            },
            Ok(Message::Binary(data)) => debug!(len = data.len(), "ignoring binary message"),
            Ok(Message::Ping(data)) => {
                if let Err(err) = shared.write(Message::Pong(data)).await {
                    break DisconnectReason::Error(err.to_string());
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                if *shared.state.borrow() == ConnectionState::Open {
                    shared.state.send_replace(ConnectionState::Closing);
                    let echo = Message::Close(frame.clone());
                    if let Err(err) = shared.write(echo).await {
                        debug!(error = %err, "close acknowledgement not delivered");
                    }
                }
                break DisconnectReason::Remote(frame);
            }
            Err(Error::ConnectionClosed(_)) => {
                break DisconnectReason::Error("server went away without a close frame".into());
            }
            Err(err) => break DisconnectReason::Error(err.to_string()),
        }
    };
    shared.lost(reason);
}

/// Cloneable handle to one open connection. Every clone shares the same
/// socket; concurrent sends are serialized.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// `ws://host:port/path` this handle is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().can_send()
    }

    /// Send `payload` as event `event`.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] unless open, [`SendError::Encode`] if the
    /// payload does not serialize, [`SendError::Timeout`] if the write stalls
    /// and [`SendError::Transport`] if it fails. A transport failure also
    /// closes the connection.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: &T,
    ) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotConnected);
        }
        let text = Envelope::encode_with(event, payload)
            .map_err(|err| SendError::Encode(err.to_string()))?;
        self.shared.config.limits.check_message_size(text.len())?;
        trace!(event, len = text.len(), "outbound event");
        self.shared.write(Message::Text(text)).await
    }

    /// Send an event without payload.
    pub async fn emit(&self, event: &str) -> Result<(), SendError> {
        self.send(event, &Value::Null).await
    }

    /// Invoke `handler` on every inbound `event`. Handlers run on the reader
    /// task and must not block.
    pub fn subscribe<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.subscriptions.subscribe(event, Arc::new(handler));
    }

    /// Like [`subscribe`](Self::subscribe) with the payload decoded into `T`.
    /// Payloads of another shape are logged and dropped.
    pub fn subscribe_typed<T, F>(&self, event: &str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.subscribe(event, move |payload| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(value) => handler(value),
                Err(err) => warn!(event = %name, error = %err, "dropping payload with unexpected shape"),
            }
        });
    }

    /// Resolve with the payload of the next `event`. The receiver errors if
    /// the connection closes first.
    pub fn once(&self, event: &str) -> oneshot::Receiver<Value> {
        self.shared.subscriptions.once(event)
    }

    /// Invoke `handler` once when the connection closes, for any reason.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.shared.subscriptions.on_disconnect(Arc::new(handler));
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) -> DisconnectReason {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
        self.shared
            .reason
            .lock()
            .clone()
            .unwrap_or(DisconnectReason::Requested)
    }

    /// Send a close frame and shut the socket down. Bounded by the close
    /// timeout; calling it again, or after the server closed, does nothing.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let reason = DisconnectReason::Requested;
        if !shared.claim(&reason) {
            return;
        }
        shared.state.send_replace(ConnectionState::Closing);

        let limit = shared.config.timeouts.close;
        let close = CloseFrame::new(CloseCode::Normal, "session finished");
        let sent = timeout(limit, async {
            let mut writer = shared.writer.lock().await;
            writer.send(Message::Close(Some(close))).await?;
            writer.shutdown().await
        })
        .await;
        match sent {
            Ok(Ok(())) => debug!(endpoint = %shared.endpoint, "close frame sent"),
            Ok(Err(err)) => debug!(error = %err, "close frame not delivered"),
            Err(_) => warn!(timeout = ?limit, "timed out sending close frame"),
        }

        shared.cancel.cancel();
        shared.state.send_replace(ConnectionState::Closed);
        shared.subscriptions.notify_disconnect(&reason);
        info!(endpoint = %shared.endpoint, "disconnected");
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .field("subscriptions", &self.shared.subscriptions)
            .finish()
    }
}
