//! Session channel: one websocket connection to a ready server, multiplexed into
//! correlated requests and unsolicited events.
//!
//! ```text
//! send_request() --> pending.insert(id) --> writer task --> server
//!                                                             |
//! ResponseHandle <-- pending.remove(id) <-- reader task <-----+
//!                    (or handlers[typehint] for events)
//! ```
//!
//! The reader and writer run as tokio tasks, so `send_request` never waits
//! on the connection. When either side of the connection fails, every
//! request still pending fails with [`ChannelError::ConnectionLost`] and the
//! channel stays closed; the owning session decides when to open a new one.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use ensime_types::CallId;

use crate::codec;
use crate::protocol::{Incoming, WireProtocol, typehint};

/// How long `close` waits for the writer task to flush and exit.
const WRITER_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connection to the server was lost")]
    ConnectionLost,
    #[error("cannot connect to the server: {0}")]
    Connect(#[from] io::Error),
    #[error("websocket handshake with the server failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

type Handler = Box<dyn Fn(&Value) + Send + Sync>;
type FallbackHandler = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Event handlers keyed by the event's `typehint`.
///
/// Handlers run on the channel's reader task and must not block; forward to
/// a queue for anything that touches editor state.
#[derive(Default)]
pub struct EventHandlers {
    by_kind: HashMap<String, Handler>,
    fallback: Option<FallbackHandler>,
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`, replacing any earlier one.
    pub fn on(
        &mut self,
        kind: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> &mut Self {
        self.by_kind.insert(kind.into(), Box::new(handler));
        self
    }

    /// Register `handler` for every kind without a handler of its own.
    pub fn otherwise(
        &mut self,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> &mut Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn handles(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    /// Run the handler for `kind`; returns whether one was registered.
    fn dispatch(&self, kind: Option<&str>, payload: &Value) -> bool {
        let Some(kind) = kind else {
            tracing::debug!("Discarding server event without a typehint");
            return false;
        };
        match (self.by_kind.get(kind), &self.fallback) {
            (Some(handler), _) => {
                handler(payload);
                true
            }
            (None, Some(fallback)) => {
                fallback(kind, payload);
                true
            }
            (None, None) => {
                tracing::debug!(kind, "Discarding server event without a handler");
                false
            }
        }
    }
}

struct PendingRequest {
    tx: oneshot::Sender<Result<Value, ChannelError>>,
    submitted_at: Instant,
}

/// State shared by the channel handle and its tasks.
struct Shared {
    pending: Mutex<HashMap<CallId, PendingRequest>>,
    closed: AtomicBool,
    /// Signalled whenever a pending request is resolved.
    resolved: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            resolved: Notify::new(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CallId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed and fail everything still pending. Idempotent.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(CallId, PendingRequest)> = self.pending().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Failing pending requests");
        }
        for (_, request) in drained {
            let _ = request.tx.send(Err(ChannelError::ConnectionLost));
        }
        self.resolved.notify_waiters();
    }
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Completion of one request.
#[derive(Debug)]
pub struct ResponseHandle {
    id: CallId,
    rx: oneshot::Receiver<Result<Value, ChannelError>>,
}

impl ResponseHandle {
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the reply body, or `ConnectionLost` if the channel closes first.
    pub async fn wait(self) -> Result<Value, ChannelError> {
        self.rx.await.unwrap_or(Err(ChannelError::ConnectionLost))
    }
}

/// One open connection to a server.
pub struct SessionChannel {
    protocol: Arc<dyn WireProtocol>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    next_id: CallId,
    shared: Arc<Shared>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl SessionChannel {
    /// Connect to a server listening on `127.0.0.1:port` and open the
    /// protocol's websocket endpoint.
    pub async fn connect(
        port: u16,
        protocol: Arc<dyn WireProtocol>,
        handlers: EventHandlers,
    ) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
        stream.set_nodelay(true)?;

        let url = format!("ws://127.0.0.1:{port}/{}", protocol.endpoint());
        let mut request = url.as_str().into_client_request()?;
        if let Some(subprotocol) = protocol.subprotocol() {
            request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(subprotocol));
        }
        let (ws, _response) = tokio_tungstenite::client_async(request, stream).await?;

        tracing::info!(%url, protocol = %protocol.version(), "Session channel connected");
        Ok(Self::open(ws, protocol, handlers))
    }

    /// Start the reader and writer tasks over an already-open websocket.
    ///
    /// Must be called within a tokio runtime.
    pub fn open<S>(
        ws: WebSocketStream<S>,
        protocol: Arc<dyn WireProtocol>,
        handlers: EventHandlers,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = codec::split(ws);
        let shared = Arc::new(Shared::new());

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer_shared = shared.clone();
        let writer_handle = tokio::spawn(async move {
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(envelope) => {
                        if let Err(e) = writer.write_message(&envelope).await {
                            tracing::warn!("Session channel write failed: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
            writer_shared.fail_all();
        });

        let reader_shared = shared.clone();
        let reader_protocol = protocol.clone();
        let reader_handle = tokio::spawn(async move {
            loop {
                match reader.read_message().await {
                    Ok(Some(envelope)) => {
                        dispatch(&envelope, reader_protocol.as_ref(), &handlers, &reader_shared);
                    }
                    Ok(None) => {
                        tracing::info!("Server closed the session channel");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Session channel read failed: {e}");
                        break;
                    }
                }
            }
            reader_shared.fail_all();
        });

        Self {
            protocol,
            writer_tx,
            next_id: CallId::FIRST,
            shared,
            reader_handle,
            writer_handle,
        }
    }

    /// Queue `payload` as a request and return immediately.
    ///
    /// The request is registered as pending before it is queued, so a reply
    /// can never overtake its registration.
    pub fn send_request(&mut self, payload: Value) -> Result<ResponseHandle, ChannelError> {
        if self.shared.is_closed() {
            return Err(ChannelError::ConnectionLost);
        }

        let id = self.next_id;
        self.next_id = id.next();

        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(
            id,
            PendingRequest {
                tx,
                submitted_at: Instant::now(),
            },
        );

        let kind = typehint(&payload).unwrap_or("<untyped>").to_string();
        let envelope = self.protocol.envelope(id, payload);
        if self.writer_tx.send(WriterCommand::Send(envelope)).is_err() || self.shared.is_closed()
        {
            // The tasks are gone; don't leave the entry behind.
            self.shared.pending().remove(&id);
            return Err(ChannelError::ConnectionLost);
        }

        tracing::trace!(call_id = %id, kind = %kind, "Request queued");
        Ok(ResponseHandle { id, rx })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Drain, then close.
    ///
    /// Waits up to `drain_timeout` for pending requests to be answered, then
    /// shuts the connection down and fails whatever is still pending.
    pub async fn close(mut self, drain_timeout: Duration) {
        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let resolved = self.shared.resolved.notified();
            tokio::pin!(resolved);
            resolved.as_mut().enable();

            if self.shared.is_closed() || self.pending_count() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, resolved).await.is_err() {
                tracing::debug!(
                    pending = self.pending_count(),
                    "Drain timed out, dropping pending requests"
                );
                break;
            }
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        let _ = tokio::time::timeout(WRITER_EXIT_TIMEOUT, &mut self.writer_handle).await;
        self.shared.fail_all();
        self.reader_handle.abort();
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.shared.fail_all();
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Route one inbound envelope: resolve the matching pending request, or
/// hand it to the event handlers.
fn dispatch(envelope: &Value, protocol: &dyn WireProtocol, handlers: &EventHandlers, shared: &Shared) {
    match protocol.classify(envelope) {
        Incoming::Reply { id, body } => {
            let waiting = shared.pending().remove(&id);
            if let Some(request) = waiting {
                tracing::debug!(
                    call_id = %id,
                    elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                    "Reply received"
                );
                let _ = request.tx.send(Ok(body));
                shared.resolved.notify_waiters();
                return;
            }
            handlers.dispatch(typehint(&body), &body);
        }
        Incoming::Event { kind, payload } => {
            handlers.dispatch(kind.as_deref(), &payload);
        }
    }
}
