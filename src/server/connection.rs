//! Connection drivers.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::database::WeatherDatabase;
use super::session::ServerSession;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::PacketCodec;

/// Drive one client connection until the client disconnects.
///
/// Recoverable errors (a database failure, a record for an unknown station)
/// are logged and the connection carries on. Anything else ends it.
pub async fn serve_connection<IO>(io: IO, session: &mut ServerSession) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, PacketCodec::new());

    while let Some(packet) = framed.next().await {
        let packet = packet?;
        debug!("Received {} packet", packet.packet_type().name());

        let replies = match session.handle_packet(packet).await {
            Ok(replies) => replies,
            Err(e) if e.is_recoverable() => {
                warn!("Packet dropped: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        for reply in replies {
            framed.send(reply).await?;
        }
    }

    info!("Client disconnected");
    Ok(())
}

/// Accept connections and serve each with its own session.
pub async fn run_server(
    listener: TcpListener,
    config: ServerConfig,
    database: Arc<dyn WeatherDatabase>,
) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let session = ServerSession::new(config.clone(), Arc::clone(&database));
        tokio::spawn(handle_client(stream, addr, session));
    }
}

async fn handle_client(stream: tokio::net::TcpStream, addr: SocketAddr, mut session: ServerSession) {
    info!(%addr, "Client connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, error = %e, "Failed to set TCP_NODELAY");
    }

    if let Err(e) = serve_connection(stream, &mut session).await {
        warn!(%addr, error = %e, "Connection closed with error");
    }

    info!(%addr, "Session statistics: {}", session.statistics().all_time());
}
