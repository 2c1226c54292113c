//! Asynchronous execution context for a held-open HTTP response
//!
//! An [`AsyncContext`] keeps a response open across many worker-pool
//! activations without pinning a thread to it. Chunks are pushed through a
//! bounded channel that feeds the axum response body. A watcher task turns
//! the deadline and client disconnects into lifecycle events, and every
//! terminal path (explicit [`AsyncContext::complete`], timeout, error) goes
//! through one atomic guard so listeners observe exactly one terminal event.

use crate::error::{Error, Result};
use crate::types::RequestId;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Uri;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

type ChunkSender = mpsc::Sender<std::result::Result<Bytes, std::io::Error>>;

/// Identifies the request a transfer serves
///
/// This is what the admission gate sees: the transfer's sequence number plus
/// the URI it was admitted for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferContext {
    request_id: RequestId,
    uri: Uri,
}

impl TransferContext {
    /// Create a context for the given sequence number and URI
    pub fn new(request_id: RequestId, uri: Uri) -> Self {
        Self { request_id, uri }
    }

    /// The transfer's sequence number
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

/// Receives the lifecycle events of an [`AsyncContext`]
///
/// Exactly one of `on_complete`, `on_timeout` or `on_error` is delivered per
/// context.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// The context was completed explicitly
    async fn on_complete(&self);

    /// The context's deadline elapsed before anyone completed it
    async fn on_timeout(&self);

    /// The transport failed (client disconnected)
    async fn on_error(&self, cause: &Error);

    /// The context was restarted; unused by this transport
    async fn on_start_async(&self) {}
}

enum Terminal {
    Complete,
    Timeout,
    Error(Error),
}

struct Inner {
    request: TransferContext,
    terminated: AtomicBool,
    token: CancellationToken,
    sink: Mutex<Option<ChunkSender>>,
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
    timeout_tx: watch::Sender<Duration>,
}

/// Handle to a suspended request/response pair
///
/// Cheap to clone; all clones refer to the same context.
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncContext")
            .field("request_id", &self.inner.request.request_id)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl AsyncContext {
    /// Start an async context for `request` with the given timeout
    ///
    /// Returns the context and the response body it feeds. The body ends when
    /// the context terminates; dropping the body (client disconnect) delivers
    /// an error event. Must be called within a tokio runtime.
    pub fn start(request: TransferContext, timeout: Duration) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(1);
        let (timeout_tx, timeout_rx) = watch::channel(timeout);

        let ctx = Self {
            inner: Arc::new(Inner {
                request,
                terminated: AtomicBool::new(false),
                token: CancellationToken::new(),
                sink: Mutex::new(Some(tx.clone())),
                listeners: Mutex::new(Vec::new()),
                timeout_tx,
            }),
        };

        tokio::spawn(ctx.clone().watch(tx, timeout_rx));

        (ctx, Body::from_stream(ReceiverStream::new(rx)))
    }

    /// The request this context serves
    pub fn request(&self) -> &TransferContext {
        &self.inner.request
    }

    /// Change the timeout, measured from when the context started
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.timeout_tx.send_replace(timeout);
    }

    /// Current timeout
    pub fn timeout(&self) -> Duration {
        *self.inner.timeout_tx.borrow()
    }

    /// Register a listener for this context's lifecycle events
    pub async fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.inner.listeners.lock().await.push(listener);
    }

    /// Whether a terminal event has been delivered (or is being delivered)
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Write one chunk to the response
    ///
    /// Waits while the client is slower than the chunk rate. Fails if the
    /// context has terminated or terminates while waiting, or if the client
    /// has gone away.
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        let sender = self.inner.sink.lock().await.clone();
        let Some(sender) = sender else {
            return Err(Error::Transport("async context already completed".into()));
        };

        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => {
                Err(Error::Transport("async context completed during write".into()))
            }
            sent = sender.send(Ok(chunk)) => {
                sent.map_err(|_| Error::Transport("client disconnected".into()))
            }
        }
    }

    /// Complete the context, ending the response body
    ///
    /// Delivers `on_complete` to listeners unless another terminal event was
    /// already delivered, in which case this is a no-op.
    pub async fn complete(&self) {
        self.terminate(Terminal::Complete).await;
    }

    async fn terminate(&self, terminal: Terminal) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.token.cancel();
        // Dropping the stored sender ends the body once in-flight writes return.
        self.inner.sink.lock().await.take();

        let listeners = self.inner.listeners.lock().await.clone();
        for listener in listeners {
            match &terminal {
                Terminal::Complete => listener.on_complete().await,
                Terminal::Timeout => listener.on_timeout().await,
                Terminal::Error(cause) => listener.on_error(cause).await,
            }
        }
    }

    async fn watch(self, sender: ChunkSender, mut timeout_rx: watch::Receiver<Duration>) {
        let started = Instant::now();
        let token = self.inner.token.clone();

        loop {
            let deadline = started + *timeout_rx.borrow_and_update();
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {
                    drop(sender);
                    self.terminate(Terminal::Timeout).await;
                    return;
                }
                _ = sender.closed() => {
                    drop(sender);
                    self.terminate(Terminal::Error(Error::Transport(
                        "client disconnected".into(),
                    )))
                    .await;
                    return;
                }
                changed = timeout_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
