//! Accept loop and acceptor registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use treillis::{Communicator, LinkState, StateCell};

use crate::WsError;
use crate::acceptor::WebSocketAcceptor;
use crate::link::{self, WsTransport};

/// Tunables for a [`WebSocketServer`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// How long a fresh connection gets to announce its arguments.
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Listens for connections and hands each one to the application as a
/// [`WebSocketAcceptor`].
pub struct WebSocketServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    local_addr: SocketAddr,
    acceptors: Arc<DashMap<u64, WebSocketAcceptor>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl WebSocketServer {
    /// Bind `addr` and run the accept loop with default options; `handler`
    /// receives every connection that completes its handshake.
    pub async fn open<F, Fut>(addr: SocketAddr, handler: F) -> Result<Self, WsError>
    where
        F: Fn(WebSocketAcceptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::open_with(addr, ServerOptions::default(), handler).await
    }

    /// Like [`Self::open`], with explicit [`ServerOptions`].
    pub async fn open_with<F, Fut>(
        addr: SocketAddr,
        options: ServerOptions,
        handler: F,
    ) -> Result<Self, WsError>
    where
        F: Fn(WebSocketAcceptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "websocket server listening");

        let acceptors: Arc<DashMap<u64, WebSocketAcceptor>> = Arc::new(DashMap::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            options,
            Arc::clone(&acceptors),
            Arc::new(handler),
        ));

        Ok(WebSocketServer {
            inner: Arc::new(ServerInner {
                local_addr,
                acceptors,
                accept_task,
            }),
        })
    }

    /// The address the server actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// How many connections are currently registered.
    pub fn connection_count(&self) -> usize {
        self.inner.acceptors.len()
    }

    /// Stop accepting and settle every registered connection: open links
    /// close, never-accepted ones are rejected.
    pub async fn close(&self) {
        self.inner.accept_task.abort();
        let acceptors: Vec<_> = self
            .inner
            .acceptors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for acceptor in acceptors {
            let result = match acceptor.state() {
                LinkState::Open => acceptor.close().await,
                LinkState::None => acceptor.reject().await,
                _ => Ok(()),
            };
            if let Err(error) = result {
                tracing::debug!(%error, "connection already settling");
            }
        }
        self.inner.acceptors.clear();
        tracing::info!(local_addr = %self.inner.local_addr, "websocket server closed");
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop<F, Fut>(
    listener: TcpListener,
    options: ServerOptions,
    acceptors: Arc<DashMap<u64, WebSocketAcceptor>>,
    handler: Arc<F>,
) where
    F: Fn(WebSocketAcceptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut next_id: u64 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::warn!(%error, "accept failed");
                continue;
            }
        };
        let id = next_id;
        next_id = next_id.wrapping_add(1);
        tracing::debug!(id, ?peer, "inbound connection");

        let acceptors = Arc::clone(&acceptors);
        let handler = Arc::clone(&handler);
        let options = options.clone();
        tokio::spawn(async move {
            match handshake(stream, id, &options, &acceptors).await {
                Ok(acceptor) => (*handler)(acceptor).await,
                Err(error) => tracing::warn!(id, %error, "handshake failed"),
            }
        });
    }
}

/// Upgrade the socket, read the connector's argument message, and register
/// a fresh acceptor.
async fn handshake(
    stream: TcpStream,
    id: u64,
    options: &ServerOptions,
    acceptors: &Arc<DashMap<u64, WebSocketAcceptor>>,
) -> Result<WebSocketAcceptor, WsError> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut reader) = socket.split();

    let first = tokio::time::timeout(options.handshake_timeout, reader.next())
        .await
        .map_err(|_| WsError::Handshake("timed out waiting for arguments".to_owned()))?;
    let arguments = match first {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Vec<String>>(text.as_str())
            .map_err(|error| WsError::Handshake(format!("malformed arguments: {error}")))?,
        Some(Ok(_)) => {
            return Err(WsError::Handshake(
                "expected a text message carrying arguments".to_owned(),
            ));
        }
        Some(Err(error)) => return Err(error.into()),
        None => {
            return Err(WsError::Handshake(
                "connection closed before arguments".to_owned(),
            ));
        }
    };

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    link::spawn_writer(sink, outbound_rx);

    let state = Arc::new(StateCell::new());
    let communicator = Communicator::new(
        WsTransport {
            outbound: outbound.clone(),
            state: Arc::clone(&state),
        },
        None,
    );

    let eraser = link::eraser(Some(Box::new({
        let acceptors = Arc::clone(acceptors);
        move || {
            acceptors.remove(&id);
        }
    })));

    let acceptor = WebSocketAcceptor::new(communicator, state, outbound, arguments, reader, eraser);
    acceptors.insert(id, acceptor.clone());
    Ok(acceptor)
}
