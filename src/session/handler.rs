//! Session handler loop.

use crate::dispatch::{self, Context};
use crate::message::{ClientMessage, Reply};
use crate::session::SessionEvent;
use crate::state::ChannelHandle;
use crate::wire::WireError;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::debug;

/// Serve the recv and event inboxes until the reader is gone.
///
/// Returns the session's current channel (for the supervisor's final part)
/// and the event inbox (for the supervisor's drain).
pub(super) async fn run<W>(
    mut ctx: Context<W>,
    mut recv_rx: mpsc::Receiver<Result<ClientMessage, WireError>>,
    mut events_rx: mpsc::Receiver<SessionEvent>,
    read_next_tx: mpsc::Sender<()>,
) -> (Option<ChannelHandle>, mpsc::Receiver<SessionEvent>)
where
    W: AsyncWrite + Unpin,
{
    if !ctx.settings.motd.is_empty() {
        let motd = ctx.settings.motd.clone();
        ctx.send(Reply::Motd {
            motd,
            force_display: false,
        })
        .await;
    }

    loop {
        // A stop set by the previous iteration (or the MOTD write) ends the
        // session; the supervisor takes over from here.
        if ctx.session.is_stopped() {
            break;
        }

        tokio::select! {
            item = recv_rx.recv() => match item {
                None => break,
                Some(Ok(msg)) => {
                    dispatch::handle_message(&mut ctx, msg).await;
                    // Let the reader pick up the next message; it checks the
                    // stop flag first.
                    let _ = read_next_tx.send(()).await;
                }
                Some(Err(e)) => {
                    debug!(id = ctx.session.id(), error = %e, "Client sent a malformed message");
                    ctx.send(Reply::Error {
                        error: "malformed message".to_string(),
                    })
                    .await;
                    ctx.session.stop("client sent a malformed request");
                }
            },
            event = events_rx.recv() => match event {
                None => break,
                Some(event) => dispatch::handle_event(&mut ctx, event).await,
            },
        }
    }

    (ctx.into_current_channel(), events_rx)
}
