//! Session read loop.

use crate::message::ClientMessage;
use crate::session::{Session, SessionSettings};
use crate::wire::{JsonCodec, WireError};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

/// Decode messages off the stream and forward them to the handler.
///
/// Dropping the recv sender on return is the reader's exit signal to the
/// handler. After forwarding a message the reader blocks on the read-next
/// gate: the handler may stop the session in response to the message just
/// read, and the gate guarantees the reader observes that before touching
/// the socket again.
pub(super) async fn run<R>(
    read_half: R,
    session: Arc<Session>,
    settings: Arc<SessionSettings>,
    recv_tx: mpsc::Sender<Result<ClientMessage, WireError>>,
    mut read_next_rx: mpsc::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(read_half, JsonCodec);

    loop {
        if session.is_stopped() {
            return;
        }

        let frame = match timeout(settings.read_deadline, frames.next()).await {
            Ok(frame) => frame,
            Err(_elapsed) => {
                if !settings.enforce_timeout {
                    // Deadline only exists to observe a stopped session.
                    continue;
                }
                session.stop("Client timed out");
                return;
            }
        };

        match frame {
            None => {
                session.stop("Client disconnected");
                return;
            }
            Some(Ok(fields)) => match ClientMessage::parse(fields) {
                Ok(msg) => {
                    if recv_tx.send(Ok(msg)).await.is_err() {
                        return;
                    }
                    if read_next_rx.recv().await.is_none() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(id = session.id(), error = %e, "Unparseable message from client");
                    let _ = recv_tx.send(Err(WireError::Json(e))).await;
                    return;
                }
            },
            Some(Err(WireError::Json(e))) => {
                debug!(id = session.id(), error = %e, "Undecodable bytes from client");
                let _ = recv_tx.send(Err(WireError::Json(e))).await;
                return;
            }
            Some(Err(WireError::Io(e))) => {
                warn!(id = session.id(), error = %e, "Error reading from client");
                session.stop("Receive error");
                return;
            }
        }
    }
}
