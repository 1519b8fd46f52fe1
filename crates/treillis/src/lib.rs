//! Treillis: symmetric async remote function calls over message channels
//!
//! Two peers exchange request and response frames over an arbitrary
//! message-passing channel (a web socket, an in-process port pair, ...).
//! Each side may expose a [`Provider`] of callable functions and hold a
//! [`Driver`] onto the peer's provider, so calls flow in both directions
//! concurrently and complete out of order.
//!
//! # Wire protocol
//!
//! A data frame is a structured message with either shape:
//!
//! ```text
//! { "uid": 3, "listener": "a.b.c", "parameters": [2, 3] }   // request
//! { "uid": 3, "success": true, "value": 5 }                 // response
//! ```
//!
//! The `uid` correlates a response with its request; the presence of
//! `listener` classifies the frame. Transports that multiplex the control
//! plane onto the same channel use the literal strings `"ACCEPT"`,
//! `"REJECT"` and `"CLOSE"` for handshake and teardown, and the receiver
//! rejects those literals before attempting a structured decode.

pub mod channel;
pub mod communicator;
pub mod driver;
pub mod error;
pub mod frame;
pub mod provider;
pub mod service;
pub mod state;

// Re-exports for macro use
pub use paste;
pub use serde_json;

pub use communicator::{Communicator, Transport};
pub use driver::Driver;
pub use error::RpcError;
pub use frame::{Control, Frame, IntoParameters, RemoteError, TextMessage, parse_text};
pub use provider::{Provider, ProviderBuilder};
pub use state::{LinkState, StateCell};
