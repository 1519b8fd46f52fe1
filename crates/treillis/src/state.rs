//! Lifecycle states shared by acceptors and connectors.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::RpcError;

/// Where a link is in its lifecycle.
///
/// Acceptors pass through `Accepting` (or `Rejecting` when they refuse the
/// handshake), connectors through `Connecting`; every path ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    None = 0,
    Accepting = 1,
    Connecting = 2,
    Open = 3,
    Rejecting = 4,
    Closing = 5,
    Closed = 6,
}

impl LinkState {
    fn from_u8(raw: u8) -> LinkState {
        match raw {
            0 => LinkState::None,
            1 => LinkState::Accepting,
            2 => LinkState::Connecting,
            3 => LinkState::Open,
            4 => LinkState::Rejecting,
            5 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LinkState::None => "not opened yet",
            LinkState::Accepting => "accepting",
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Rejecting => "rejecting",
            LinkState::Closing => "closing",
            LinkState::Closed => "closed",
        })
    }
}

/// Atomic holder for a link's [`LinkState`] with guarded transitions.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        StateCell(AtomicU8::new(LinkState::None as u8))
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LinkState, to: LinkState) -> Result<(), RpcError> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|observed| RpcError::StateViolation {
                state: LinkState::from_u8(observed),
            })
    }

    /// `None -> Accepting`; any other starting state is a violation.
    pub fn begin_accept(&self) -> Result<(), RpcError> {
        self.transition(LinkState::None, LinkState::Accepting)
    }

    /// `None -> Rejecting`.
    pub fn begin_reject(&self) -> Result<(), RpcError> {
        self.transition(LinkState::None, LinkState::Rejecting)
    }

    /// `None -> Connecting`.
    pub fn begin_connect(&self) -> Result<(), RpcError> {
        self.transition(LinkState::None, LinkState::Connecting)
    }

    /// `Open -> Closing`; closing twice, or before open, is a violation.
    pub fn begin_close(&self) -> Result<(), RpcError> {
        self.transition(LinkState::Open, LinkState::Closing)
    }

    /// The handshake settled; the link carries traffic now.
    pub fn open(&self) {
        self.0.store(LinkState::Open as u8, Ordering::SeqCst);
    }

    /// Terminal state; all paths end here.
    pub fn close(&self) {
        self.0.store(LinkState::Closed as u8, Ordering::SeqCst);
    }

    /// Whether traffic is legal right now.
    ///
    /// `None` means the link is open. `Disconnected` is the closed-normally
    /// answer: sends treat it as an error while joins keep waiting through
    /// it. Anything else is a state violation.
    pub fn inspect(&self) -> Option<RpcError> {
        match self.get() {
            LinkState::Open => None,
            LinkState::Closing | LinkState::Closed => Some(RpcError::Disconnected),
            state => Some(RpcError::StateViolation { state }),
        }
    }
}
