//! Plumbing shared by the acceptor and connector sides of a link.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use treillis::{
    Communicator, Control, Frame, LinkState, RpcError, StateCell, TextMessage, Transport,
    parse_text,
};

/// Callback that unregisters an acceptor from its parent server; `None` on
/// the connector side.
pub(crate) type Eraser = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

pub(crate) fn eraser(callback: Option<Box<dyn FnOnce() + Send>>) -> Eraser {
    Arc::new(Mutex::new(callback))
}

/// The transport hooks a websocket link gives its communicator: frames are
/// serialized to JSON text and queued for the writer task.
pub(crate) struct WsTransport {
    pub outbound: mpsc::UnboundedSender<Message>,
    pub state: Arc<StateCell>,
}

impl Transport for WsTransport {
    fn inspect(&self) -> Option<RpcError> {
        self.state.inspect()
    }

    fn send(&self, frame: Frame) -> Result<(), RpcError> {
        let text =
            serde_json::to_string(&frame).map_err(|error| RpcError::Codec(error.to_string()))?;
        self.outbound
            .send(Message::text(text))
            .map_err(|_| RpcError::Transport("socket writer is gone".to_owned()))
    }
}

/// Drain the outbound queue into the socket; a queued close frame is the
/// last thing written.
pub(crate) fn spawn_writer<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let last = matches!(message, Message::Close(_));
            if let Err(error) = sink.send(message).await {
                tracing::debug!(%error, "socket write failed");
                break;
            }
            if last {
                break;
            }
        }
        let _ = sink.close().await;
    });
}

/// Route inbound messages: data frames to the communicator, control
/// literals to the lifecycle, socket failure to teardown.
pub(crate) fn spawn_reader<S>(
    mut reader: SplitStream<WebSocketStream<S>>,
    communicator: Communicator,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Message>,
    mut handshake: Option<oneshot::Sender<bool>>,
    eraser: Eraser,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => match parse_text(text.as_str()) {
                    Ok(TextMessage::Data(frame)) => communicator.deliver(frame).await,
                    Ok(TextMessage::Control(Control::Accept)) => {
                        match handshake.take() {
                            Some(tx) => {
                                state.open();
                                let _ = tx.send(true);
                            }
                            None => tracing::warn!("unexpected ACCEPT on a settled link"),
                        }
                    }
                    Ok(TextMessage::Control(Control::Reject)) => match handshake.take() {
                        Some(tx) => {
                            teardown(&communicator, &state, &eraser, None).await;
                            let _ = tx.send(false);
                            break;
                        }
                        None => tracing::warn!("unexpected REJECT on a settled link"),
                    },
                    Ok(TextMessage::Control(Control::Close)) => {
                        // Peer-initiated close runs the local close path;
                        // losing the race to a concurrent local close is fine.
                        if state.begin_close().is_ok() {
                            let _ = outbound.send(Message::text(Control::Close.as_str()));
                            let _ = outbound.send(Message::Close(None));
                        }
                        teardown(&communicator, &state, &eraser, None).await;
                        break;
                    }
                    Err(error) => tracing::warn!(%error, "undecodable text message"),
                },
                Ok(Message::Close(_)) => {
                    teardown(&communicator, &state, &eraser, None).await;
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(_) => tracing::warn!("ignoring non-text message"),
                Err(error) => {
                    teardown(
                        &communicator,
                        &state,
                        &eraser,
                        Some(RpcError::Transport(error.to_string())),
                    )
                    .await;
                    break;
                }
            }
        }
        // Socket gone without a close handshake: abrupt disconnect. A
        // handshake still waiting observes the drop and fails.
        if state.get() != LinkState::Closed {
            teardown(&communicator, &state, &eraser, None).await;
        }
    });
}

/// The local half of closing an open link; the caller observes the state
/// violation when the link is not open.
pub(crate) async fn close_link(
    communicator: &Communicator,
    state: &StateCell,
    outbound: &mpsc::UnboundedSender<Message>,
    eraser: &Eraser,
) -> Result<(), RpcError> {
    state.begin_close()?;
    let _ = outbound.send(Message::text(Control::Close.as_str()));
    communicator.shutdown(None).await;
    let _ = outbound.send(Message::Close(None));
    if let Some(erase) = eraser.lock().await.take() {
        erase();
    }
    state.close();
    Ok(())
}

pub(crate) async fn teardown(
    communicator: &Communicator,
    state: &StateCell,
    eraser: &Eraser,
    error: Option<RpcError>,
) {
    state.close();
    communicator.shutdown(error).await;
    if let Some(erase) = eraser.lock().await.take() {
        erase();
    }
}
