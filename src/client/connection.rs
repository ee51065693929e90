//! Client connection driver.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::session::ClientSession;
use crate::error::Result;
use crate::protocol::{Packet, PacketCodec};

/// Drive a connection to the server.
///
/// Sends Authenticate, re-sending it every `authenticate_timeout` until the
/// server replies, then forwards the session's outgoing packets and hands
/// incoming packets to the session. Returns when the server closes the
/// connection or rejects the authorisation code.
pub async fn run_client<IO>(
    io: IO,
    session: &ClientSession,
    mut outgoing: mpsc::UnboundedReceiver<Packet>,
) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, PacketCodec::new());
    framed.send(session.authenticate_packet()).await?;

    let authenticate_timeout = session.config().authenticate_timeout;
    let mut resend = interval_at(Instant::now() + authenticate_timeout, authenticate_timeout);
    resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            incoming = framed.next() => {
                let Some(packet) = incoming else {
                    info!("Server closed the connection");
                    return Ok(());
                };
                let packet = packet?;
                debug!("Received {} packet", packet.packet_type().name());
                session.handle_packet(packet)?;
            }

            Some(packet) = outgoing.recv() => {
                framed.send(packet).await?;
            }

            _ = resend.tick(), if !session.is_authenticated() => {
                warn!("No reply to authentication, resending");
                framed.send(session.authenticate_packet()).await?;
            }
        }
    }
}
