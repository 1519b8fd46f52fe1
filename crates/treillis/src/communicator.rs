//! The communicator: pending-call table, dispatch, join, teardown.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot, watch};

use crate::driver::Driver;
use crate::error::RpcError;
use crate::frame::{Frame, RemoteError};
use crate::provider::{Handler as _, Provider};

/// Issues uids for request frames. Process-wide so a uid never repeats
/// across communicators, which keeps multi-link traces unambiguous.
static NEXT_UID: AtomicU64 = AtomicU64::new(1);

fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// The extension points a transport supplies.
///
/// `send` hands one structured frame to the channel; serialization is the
/// transport's concern. `inspect` reports why traffic is currently illegal,
/// or `None` while the link is open.
pub trait Transport: Send + Sync + 'static {
    fn inspect(&self) -> Option<RpcError>;
    fn send(&self, frame: Frame) -> Result<(), RpcError>;
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>;

struct Inner {
    transport: Arc<dyn Transport>,
    provider: OnceLock<Arc<Provider>>,
    pending: Pending,
    closed: watch::Sender<bool>,
}

/// One end of an RPC link.
///
/// Cloning is cheap; every clone drives the same link.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
}

impl Communicator {
    /// Create a communicator over `transport`, optionally exposing
    /// `provider` to the peer from the start.
    pub fn new(transport: impl Transport, provider: Option<Provider>) -> Self {
        let inner = Inner {
            transport: Arc::new(transport),
            provider: OnceLock::new(),
            pending: Mutex::new(HashMap::new()),
            closed: watch::Sender::new(false),
        };
        if let Some(provider) = provider {
            let _ = inner.provider.set(Arc::new(provider));
        }
        Communicator {
            inner: Arc::new(inner),
        }
    }

    /// The functions this side exposes to the peer, once assigned.
    pub fn provider(&self) -> Option<Arc<Provider>> {
        self.inner.provider.get().cloned()
    }

    /// Assign the provider; a no-op once one is set. Transports call this
    /// from their accept path.
    pub fn set_provider(&self, provider: Provider) {
        let _ = self.inner.provider.set(Arc::new(provider));
    }

    /// A lazy dotted-path proxy onto the peer's provider.
    pub fn driver(&self) -> Driver {
        Driver::root(self.clone())
    }

    /// Call `listener` on the peer with positional `parameters`.
    ///
    /// The returned future settles when the matching response arrives or the
    /// link is torn down, in whichever order the peer completes calls.
    pub async fn invoke(&self, listener: &str, parameters: Vec<Value>) -> Result<Value, RpcError> {
        if let Some(error) = self.inner.transport.inspect() {
            return Err(error);
        }

        let uid = next_uid();
        let (tx, rx) = oneshot::channel();
        // The entry must exist before the frame leaves, so a response racing
        // straight back always finds it.
        self.inner.pending.lock().await.insert(uid, tx);

        let frame = Frame::Request {
            uid,
            listener: listener.to_owned(),
            parameters,
        };
        if let Err(error) = self.inner.transport.send(frame) {
            // The entry stays; teardown settles it. Transports wanting eager
            // failure call `shutdown` from their send path.
            tracing::debug!(uid, %error, "request frame not sent");
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Disconnected),
        }
    }

    /// Entry point for inbound frames, invoked by the transport after
    /// whatever framing and deserialization it applies.
    pub async fn deliver(&self, frame: Frame) {
        match frame {
            Frame::Response {
                uid,
                success,
                value,
            } => self.settle(uid, success, value).await,
            Frame::Request {
                uid,
                listener,
                parameters,
            } => {
                let communicator = self.clone();
                tokio::spawn(async move {
                    communicator.dispatch(uid, listener, parameters).await;
                });
            }
        }
    }

    async fn settle(&self, uid: u64, success: bool, value: Value) {
        let Some(tx) = self.inner.pending.lock().await.remove(&uid) else {
            // Stale response racing teardown; nothing left to settle.
            tracing::debug!(uid, "response frame without a pending call");
            return;
        };
        let outcome = if success {
            Ok(value)
        } else {
            Err(RpcError::Remote(RemoteError::from_value(value)))
        };
        let _ = tx.send(outcome);
    }

    async fn dispatch(&self, uid: u64, listener: String, parameters: Vec<Value>) {
        let outcome = match self.inner.provider.get() {
            None => Err(RemoteError::new("Error", "Provider is not specified yet.")),
            Some(provider) => match provider.resolve(&listener) {
                Err(error) => Err(error),
                Ok(handler) => {
                    match AssertUnwindSafe(handler.call(parameters)).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(RemoteError::new("Panic", panic_message(&panic))),
                    }
                }
            },
        };

        let frame = match outcome {
            Ok(value) => Frame::Response {
                uid,
                success: true,
                value,
            },
            Err(error) => Frame::Response {
                uid,
                success: false,
                value: error.into_value(),
            },
        };
        if let Err(error) = self.inner.transport.send(frame) {
            tracing::debug!(uid, %error, "response frame not sent");
        }
    }

    /// Tear the link down: reject every pending call with `error` (or the
    /// generic closed-connection error) and release all join waiters.
    ///
    /// Safe to call more than once; later calls find nothing left to settle.
    pub async fn shutdown(&self, error: Option<RpcError>) {
        let error = error.unwrap_or(RpcError::Disconnected);
        let drained: Vec<_> = {
            let mut pending = self.inner.pending.lock().await;
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(calls = drained.len(), %error, "rejecting calls in flight at teardown");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        let _ = self.inner.closed.send(true);
    }

    fn joinable(&self) -> Result<(), RpcError> {
        match self.inner.transport.inspect() {
            None | Some(RpcError::Disconnected) => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Wait until the link is torn down. Returns immediately when it
    /// already was; fails when the link never opened.
    pub async fn join(&self) -> Result<(), RpcError> {
        self.joinable()?;
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        Ok(())
    }

    /// Wait for teardown at most `timeout`: `true` when released by
    /// teardown, `false` when the timeout elapsed first.
    pub async fn join_for(&self, timeout: Duration) -> Result<bool, RpcError> {
        self.joinable()?;
        let mut closed = self.inner.closed.subscribe();
        Ok(tokio::time::timeout(timeout, closed.wait_for(|closed| *closed))
            .await
            .is_ok())
    }

    /// Like [`Self::join_for`], with the bound given as an absolute instant.
    pub async fn join_until(&self, deadline: tokio::time::Instant) -> Result<bool, RpcError> {
        self.joinable()?;
        let mut closed = self.inner.closed.subscribe();
        Ok(
            tokio::time::timeout_at(deadline, closed.wait_for(|closed| *closed))
                .await
                .is_ok(),
        )
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "invocation panicked".to_owned()
    }
}
