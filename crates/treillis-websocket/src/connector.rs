//! The dialing side of a websocket link.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use treillis::{Communicator, Driver, LinkState, Provider, RpcError, StateCell};

use crate::WsError;
use crate::link::{self, WsTransport};

/// An outbound connection to a [`WebSocketServer`].
///
/// [`WebSocketServer`]: crate::WebSocketServer
pub struct WebSocketConnector {
    communicator: Communicator,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl WebSocketConnector {
    /// Dial `url`, announce `arguments`, and wait for the acceptor's
    /// verdict. `provider` is what this side exposes to the peer, if
    /// anything.
    pub async fn connect(
        url: &str,
        arguments: &[String],
        provider: Option<Provider>,
    ) -> Result<Self, WsError> {
        let (socket, _response) = connect_async(url).await?;
        tracing::debug!(%url, "websocket established, handshaking");

        let state = Arc::new(StateCell::new());
        state.begin_connect()?;

        let (sink, reader) = socket.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        link::spawn_writer(sink, outbound_rx);

        let communicator = Communicator::new(
            WsTransport {
                outbound: outbound.clone(),
                state: Arc::clone(&state),
            },
            provider,
        );

        // The first message of the connection carries the arguments.
        let announce = serde_json::to_string(arguments)
            .map_err(|error| WsError::Handshake(error.to_string()))?;
        outbound
            .send(Message::text(announce))
            .map_err(|_| WsError::Handshake("socket writer is gone".to_owned()))?;

        let (handshake_tx, handshake_rx) = oneshot::channel();
        link::spawn_reader(
            reader,
            communicator.clone(),
            Arc::clone(&state),
            outbound.clone(),
            Some(handshake_tx),
            link::eraser(None),
        );

        match handshake_rx.await {
            Ok(true) => Ok(WebSocketConnector {
                communicator,
                state,
                outbound,
            }),
            Ok(false) => Err(WsError::Rejected),
            Err(_) => Err(WsError::Handshake(
                "connection closed during handshake".to_owned(),
            )),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    /// A lazy dotted-path proxy onto the acceptor's provider.
    pub fn driver(&self) -> Driver {
        self.communicator.driver()
    }

    /// Close an open link.
    pub async fn close(&self) -> Result<(), RpcError> {
        link::close_link(
            &self.communicator,
            &self.state,
            &self.outbound,
            &link::eraser(None),
        )
        .await
    }

    pub async fn join(&self) -> Result<(), RpcError> {
        self.communicator.join().await
    }

    pub async fn join_for(&self, timeout: Duration) -> Result<bool, RpcError> {
        self.communicator.join_for(timeout).await
    }

    pub async fn join_until(&self, deadline: tokio::time::Instant) -> Result<bool, RpcError> {
        self.communicator.join_until(deadline).await
    }
}
