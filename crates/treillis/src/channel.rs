//! In-process transport over paired message ports.
//!
//! The analog of linking two communicators through worker message ports:
//! each side owns one end of a pair of unbounded queues carrying structured
//! frames and control values, so nothing is serialized in-process. Useful on
//! its own for wiring components of one process together, and as the
//! reference transport for tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::communicator::{Communicator, Transport};
use crate::driver::Driver;
use crate::error::RpcError;
use crate::frame::{Control, Frame};
use crate::provider::Provider;
use crate::state::{LinkState, StateCell};

enum PortMessage {
    Control(Control),
    Data(Frame),
}

struct Port {
    peer: mpsc::UnboundedSender<PortMessage>,
    state: Arc<StateCell>,
}

impl Transport for Port {
    fn inspect(&self) -> Option<RpcError> {
        self.state.inspect()
    }

    fn send(&self, frame: Frame) -> Result<(), RpcError> {
        self.peer
            .send(PortMessage::Data(frame))
            .map_err(|_| RpcError::Transport("peer port is gone".to_owned()))
    }
}

/// Create a linked acceptor/connector pair, carrying `arguments` as the
/// connector-supplied handshake data.
pub fn pair(arguments: Vec<String>) -> (ChannelAcceptor, ChannelConnector) {
    let (to_acceptor, acceptor_inbound) = mpsc::unbounded_channel();
    let (to_connector, connector_inbound) = mpsc::unbounded_channel();

    let acceptor_state = Arc::new(StateCell::new());
    let connector_state = Arc::new(StateCell::new());

    let acceptor = ChannelAcceptor {
        communicator: Communicator::new(
            Port {
                peer: to_connector.clone(),
                state: Arc::clone(&acceptor_state),
            },
            None,
        ),
        state: acceptor_state,
        peer: to_connector,
        inbound: Mutex::new(Some(acceptor_inbound)),
        arguments,
    };
    let connector = ChannelConnector {
        communicator: Communicator::new(
            Port {
                peer: to_acceptor.clone(),
                state: Arc::clone(&connector_state),
            },
            None,
        ),
        state: connector_state,
        peer: to_acceptor,
        inbound: Mutex::new(Some(connector_inbound)),
    };
    (acceptor, connector)
}

/// The accepting side of an in-process port pair.
pub struct ChannelAcceptor {
    communicator: Communicator,
    state: Arc<StateCell>,
    peer: mpsc::UnboundedSender<PortMessage>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<PortMessage>>>,
    arguments: Vec<String>,
}

impl ChannelAcceptor {
    /// Arguments the connector supplied with its handshake.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn driver(&self) -> Driver {
        self.communicator.driver()
    }

    /// Open the link, exposing `provider` to the peer.
    pub async fn accept(&self, provider: Provider) -> Result<(), RpcError> {
        self.state.begin_accept()?;
        self.communicator.set_provider(provider);
        if let Some(inbound) = self.inbound.lock().await.take() {
            spawn_pump(
                self.communicator.clone(),
                Arc::clone(&self.state),
                self.peer.clone(),
                inbound,
                None,
            );
        }
        let _ = self.peer.send(PortMessage::Control(Control::Accept));
        self.state.open();
        Ok(())
    }

    /// Refuse the link before it ever opens.
    pub async fn reject(&self) -> Result<(), RpcError> {
        self.state.begin_reject()?;
        let _ = self.peer.send(PortMessage::Control(Control::Reject));
        self.communicator.shutdown(None).await;
        self.state.close();
        Ok(())
    }

    /// Close an open link.
    pub async fn close(&self) -> Result<(), RpcError> {
        close_link(&self.communicator, &self.state, &self.peer).await
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

/// The connecting side of an in-process port pair.
pub struct ChannelConnector {
    communicator: Communicator,
    state: Arc<StateCell>,
    peer: mpsc::UnboundedSender<PortMessage>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<PortMessage>>>,
}

impl ChannelConnector {
    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn driver(&self) -> Driver {
        self.communicator.driver()
    }

    /// Perform the handshake, optionally exposing `provider` to the peer.
    ///
    /// Resolves once the acceptor answers `ACCEPT` or `REJECT`, in whichever
    /// order the two sides get around to it.
    pub async fn connect(&self, provider: Option<Provider>) -> Result<(), RpcError> {
        self.state.begin_connect()?;
        if let Some(provider) = provider {
            self.communicator.set_provider(provider);
        }
        let inbound = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or_else(|| RpcError::Transport("handshake already consumed".to_owned()))?;

        let (handshake_tx, handshake_rx) = oneshot::channel();
        spawn_pump(
            self.communicator.clone(),
            Arc::clone(&self.state),
            self.peer.clone(),
            inbound,
            Some(handshake_tx),
        );

        match handshake_rx.await {
            // The pump moved the state to `Open` before answering.
            Ok(true) => Ok(()),
            Ok(false) => Err(RpcError::Transport(
                "connection rejected by peer".to_owned(),
            )),
            Err(_) => Err(RpcError::Transport(
                "peer went away during handshake".to_owned(),
            )),
        }
    }

    /// Close an open link.
    pub async fn close(&self) -> Result<(), RpcError> {
        close_link(&self.communicator, &self.state, &self.peer).await
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

async fn close_link(
    communicator: &Communicator,
    state: &StateCell,
    peer: &mpsc::UnboundedSender<PortMessage>,
) -> Result<(), RpcError> {
    state.begin_close()?;
    let _ = peer.send(PortMessage::Control(Control::Close));
    communicator.shutdown(None).await;
    state.close();
    Ok(())
}

fn spawn_pump(
    communicator: Communicator,
    state: Arc<StateCell>,
    peer: mpsc::UnboundedSender<PortMessage>,
    mut inbound: mpsc::UnboundedReceiver<PortMessage>,
    mut handshake: Option<oneshot::Sender<bool>>,
) {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            match message {
                PortMessage::Data(frame) => communicator.deliver(frame).await,
                PortMessage::Control(Control::Accept) => {
                    if let Some(tx) = handshake.take() {
                        state.open();
                        let _ = tx.send(true);
                    }
                }
                PortMessage::Control(Control::Reject) => {
                    if let Some(tx) = handshake.take() {
                        state.close();
                        communicator.shutdown(None).await;
                        let _ = tx.send(false);
                        break;
                    }
                }
                PortMessage::Control(Control::Close) => {
                    // Peer-initiated close runs the local close path; losing
                    // the race to a concurrent local close is fine.
                    if close_link(&communicator, &state, &peer).await.is_err() {
                        state.close();
                        communicator.shutdown(None).await;
                    }
                    break;
                }
            }
        }
        // Hangup without a close handshake is an abrupt disconnect.
        if state.get() != LinkState::Closed {
            tracing::debug!("peer port dropped without a close handshake");
            state.close();
            communicator.shutdown(None).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future;

    fn echo_provider() -> Provider {
        Provider::builder()
            .function("echo", |text: String| async move { Ok(text) })
            .raw("hang", |_parameters| async move {
                future::pending::<()>().await;
                unreachable!()
            })
            .build()
    }

    #[tokio::test]
    async fn handshake_opens_both_sides_in_either_order() {
        // Accept before connect.
        let (acceptor, connector) = pair(vec!["room=alpha".to_owned()]);
        assert_eq!(acceptor.arguments(), ["room=alpha".to_owned()]);
        acceptor.accept(echo_provider()).await.unwrap();
        connector.connect(None).await.unwrap();
        assert_eq!(acceptor.state(), LinkState::Open);
        assert_eq!(connector.state(), LinkState::Open);

        let text: String = connector.driver().entry("echo").invoke(("hi",)).await.unwrap();
        assert_eq!(text, "hi");

        // Connect before accept.
        let (acceptor, connector) = pair(vec![]);
        let connecting = tokio::spawn(async move {
            connector.connect(None).await.unwrap();
            connector
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        acceptor.accept(echo_provider()).await.unwrap();
        let connector = connecting.await.unwrap();
        assert_eq!(connector.state(), LinkState::Open);
    }

    #[tokio::test]
    async fn rejected_handshake_settles_closed() {
        let (acceptor, connector) = pair(vec![]);
        acceptor.reject().await.unwrap();
        let error = connector.connect(None).await.unwrap_err();
        assert_eq!(
            error,
            RpcError::Transport("connection rejected by peer".to_owned())
        );
        assert_eq!(acceptor.state(), LinkState::Closed);
        assert_eq!(connector.state(), LinkState::Closed);

        // A second reject is a state violation.
        assert!(matches!(
            acceptor.reject().await,
            Err(RpcError::StateViolation { .. })
        ));
    }

    #[tokio::test]
    async fn closing_mid_flight_rejects_and_releases_joiners() {
        let (acceptor, connector) = pair(vec![]);
        acceptor.accept(echo_provider()).await.unwrap();
        connector.connect(None).await.unwrap();

        let driver = connector.driver();
        let hanging = tokio::spawn(async move {
            driver.entry("hang").invoke_value(()).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        acceptor.close().await.unwrap();
        assert_eq!(hanging.await.unwrap().unwrap_err(), RpcError::Disconnected);
        connector.join().await.unwrap();
        assert_eq!(connector.state(), LinkState::Closed);

        // Public close on an already-closed link surfaces the violation.
        assert!(matches!(
            connector.close().await,
            Err(RpcError::StateViolation {
                state: LinkState::Closed
            })
        ));
    }

    #[tokio::test]
    async fn both_sides_may_call_each_other() {
        let (acceptor, connector) = pair(vec![]);
        acceptor.accept(echo_provider()).await.unwrap();
        connector
            .connect(Some(
                Provider::builder()
                    .function("shout", |text: String| async move {
                        Ok(text.to_uppercase())
                    })
                    .build(),
            ))
            .await
            .unwrap();

        let from_connector: String = connector
            .driver()
            .entry("echo")
            .invoke(("ping",))
            .await
            .unwrap();
        assert_eq!(from_connector, "ping");

        let from_acceptor: String = acceptor
            .driver()
            .entry("shout")
            .invoke(("pong",))
            .await
            .unwrap();
        assert_eq!(from_acceptor, "PONG");
    }
}
