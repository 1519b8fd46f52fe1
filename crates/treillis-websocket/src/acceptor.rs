//! The server-side face of one websocket connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use treillis::{Communicator, Control, Driver, LinkState, Provider, RpcError, StateCell};

use crate::link::{self, Eraser};

/// One accepted connection, waiting for the application to accept or
/// reject it.
///
/// Constructed by [`WebSocketServer`] with the channel, the connector's
/// handshake arguments, and an eraser callback that removes it from the
/// server registry. Cloning shares the same connection.
///
/// [`WebSocketServer`]: crate::WebSocketServer
#[derive(Clone)]
pub struct WebSocketAcceptor {
    inner: Arc<AcceptorInner>,
}

struct AcceptorInner {
    communicator: Communicator,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Message>,
    arguments: Vec<String>,
    reader: Mutex<Option<SplitStream<WebSocketStream<TcpStream>>>>,
    eraser: Eraser,
}

impl WebSocketAcceptor {
    pub(crate) fn new(
        communicator: Communicator,
        state: Arc<StateCell>,
        outbound: mpsc::UnboundedSender<Message>,
        arguments: Vec<String>,
        reader: SplitStream<WebSocketStream<TcpStream>>,
        eraser: Eraser,
    ) -> Self {
        WebSocketAcceptor {
            inner: Arc::new(AcceptorInner {
                communicator,
                state,
                outbound,
                arguments,
                reader: Mutex::new(Some(reader)),
                eraser,
            }),
        }
    }

    /// Arguments the connector supplied with its handshake.
    pub fn arguments(&self) -> &[String] {
        &self.inner.arguments
    }

    pub fn state(&self) -> LinkState {
        self.inner.state.get()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.inner.communicator
    }

    /// A lazy dotted-path proxy onto the connector's provider.
    pub fn driver(&self) -> Driver {
        self.inner.communicator.driver()
    }

    /// Open the link, exposing `provider` to the connector.
    pub async fn accept(&self, provider: Provider) -> Result<(), RpcError> {
        self.inner.state.begin_accept()?;
        self.inner.communicator.set_provider(provider);
        if let Some(reader) = self.inner.reader.lock().await.take() {
            link::spawn_reader(
                reader,
                self.inner.communicator.clone(),
                Arc::clone(&self.inner.state),
                self.inner.outbound.clone(),
                None,
                Arc::clone(&self.inner.eraser),
            );
        }
        let _ = self
            .inner
            .outbound
            .send(Message::text(Control::Accept.as_str()));
        self.inner.state.open();
        tracing::debug!(arguments = ?self.inner.arguments, "connection accepted");
        Ok(())
    }

    /// Refuse the connection before it ever opens.
    pub async fn reject(&self) -> Result<(), RpcError> {
        self.inner.state.begin_reject()?;
        let _ = self
            .inner
            .outbound
            .send(Message::text(Control::Reject.as_str()));
        let _ = self.inner.outbound.send(Message::Close(None));
        link::teardown(
            &self.inner.communicator,
            &self.inner.state,
            &self.inner.eraser,
            None,
        )
        .await;
        tracing::debug!(arguments = ?self.inner.arguments, "connection rejected");
        Ok(())
    }

    /// Close an open link.
    pub async fn close(&self) -> Result<(), RpcError> {
        link::close_link(
            &self.inner.communicator,
            &self.inner.state,
            &self.inner.outbound,
            &self.inner.eraser,
        )
        .await
    }

    pub async fn join(&self) -> Result<(), RpcError> {
        self.inner.communicator.join().await
    }

    pub async fn join_for(&self, timeout: Duration) -> Result<bool, RpcError> {
        self.inner.communicator.join_for(timeout).await
    }

    pub async fn join_until(&self, deadline: tokio::time::Instant) -> Result<bool, RpcError> {
        self.inner.communicator.join_until(deadline).await
    }
}
