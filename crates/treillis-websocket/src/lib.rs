//! WebSocket transport for treillis communicators
//!
//! A [`WebSocketServer`] accepts connections and hands each one to the
//! application as a [`WebSocketAcceptor`]; a [`WebSocketConnector`] dials
//! out. Both sides embed a [`treillis::Communicator`], so once the handshake
//! settles, calls flow in both directions.
//!
//! # Wire mapping
//!
//! Data frames travel as JSON text messages. The control plane shares the
//! text channel using the literal strings `"ACCEPT"`, `"REJECT"` and
//! `"CLOSE"`; receivers check those literals before attempting a structured
//! decode. The very first text message of a connection is the connector's
//! handshake: a JSON array of string arguments the acceptor may inspect
//! before deciding to accept or reject.

mod acceptor;
mod connector;
mod link;
mod server;

pub use acceptor::WebSocketAcceptor;
pub use connector::WebSocketConnector;
pub use server::{ServerOptions, WebSocketServer};

use treillis::RpcError;

/// Failures specific to establishing and running websocket links.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("websocket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The acceptor answered the handshake with `REJECT`.
    #[error("connection rejected by peer")]
    Rejected,

    #[error("handshake failed: {0}")]
    Handshake(String),
}
