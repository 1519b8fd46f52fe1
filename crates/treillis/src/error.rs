//! Error kinds surfaced by communicator operations.

use crate::frame::RemoteError;
use crate::state::LinkState;

/// Why a call, join, or lifecycle operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The operation is illegal in the connection's current lifecycle state.
    #[error("operation not allowed while the connection is {state}")]
    StateViolation { state: LinkState },

    /// The connection was torn down; also the default rejection for calls
    /// still in flight when the link goes away.
    #[error("connection has been closed")]
    Disconnected,

    /// The underlying channel reported a failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer reported a failed invocation.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Parameters or results could not cross the typed boundary.
    #[error("codec failure: {0}")]
    Codec(String),
}

impl RpcError {
    /// The failure payload carried by a rejected call, if the peer sent one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Remote(error) => Some(error),
            _ => None,
        }
    }
}
