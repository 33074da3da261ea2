//! TCP transport with length-prefixed frames.
//!
//! ## Handshake
//!
//! Each side writes one frame carrying its own identity URL, then reads
//! the peer's. Authentication is not the transport's job: every packet is
//! individually signed, so a lying handshake only mislabels the session.
//!
//! ## Framing
//!
//! Every frame is `u32 BE length || bytes`. A frame carries either the
//! handshake URL or one serialized signed packet.

use std::net::SocketAddr;
use std::sync::Arc;

use garner_types::IdUrl;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::{Result, SessionError};

/// Protocol tag of TCP sessions.
pub const PROTO_TCP: &str = "tcp";

/// Largest accepted frame, matching the packet field limit.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Bind a listener and serve inbound connections onto the gateway.
///
/// Returns the bound address and the accept-loop task.
pub async fn listen(
    gateway: Arc<Gateway>,
    bind_addr: SocketAddr,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| SessionError::Io(e.to_string()))?;
    info!(%local_addr, "tcp transport listening");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let gateway = gateway.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(gateway, stream, remote).await {
                            debug!(%remote, error = %err, "inbound tcp session ended");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "tcp accept failed");
                    break;
                }
            }
        }
    });
    Ok((local_addr, task))
}

/// Connect out to a peer and attach the session; returns the peer's URL
/// as learned in the handshake.
pub async fn connect(gateway: Arc<Gateway>, addr: SocketAddr) -> Result<IdUrl> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let remote = stream
        .peer_addr()
        .map_err(|e| SessionError::Io(e.to_string()))?;
    let peer = serve_handshake_and_spawn(gateway, stream, remote).await?;
    Ok(peer)
}

async fn serve_connection(
    gateway: Arc<Gateway>,
    stream: TcpStream,
    remote: SocketAddr,
) -> Result<()> {
    serve_handshake_and_spawn(gateway, stream, remote).await?;
    Ok(())
}

/// Exchange handshake frames, attach the session, spawn reader and writer.
async fn serve_handshake_and_spawn(
    gateway: Arc<Gateway>,
    stream: TcpStream,
    remote: SocketAddr,
) -> Result<IdUrl> {
    let (mut reader, mut writer) = stream.into_split();

    write_frame(&mut writer, gateway.local().as_str().as_bytes()).await?;
    let hello = read_frame(&mut reader).await?;
    let peer = IdUrl::parse(
        std::str::from_utf8(&hello).map_err(|_| {
            SessionError::Handshake("peer identity URL is not UTF-8".to_string())
        })?,
    )
    .map_err(|e| SessionError::Handshake(e.to_string()))?;

    let queue = gateway.attach(PROTO_TCP, peer.clone(), &remote.to_string());

    // Writer: drain the session queue onto the socket.
    {
        let queue = queue.clone();
        let gateway = gateway.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            while let Some(frame) = queue.pop().await {
                if let Err(err) = write_frame(&mut writer, &frame.bytes).await {
                    debug!(peer = %peer, error = %err, "tcp write failed");
                    gateway.detach(PROTO_TCP, &peer);
                    break;
                }
            }
        });
    }

    // Reader: hand received frames to the gateway until the peer goes away.
    {
        let gateway = gateway.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(bytes) => gateway.handle_inbound(PROTO_TCP, &peer, &bytes),
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "tcp read ended");
                        gateway.detach(PROTO_TCP, &peer);
                        break;
                    }
                }
            }
        });
    }

    Ok(peer)
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;
    writer
        .write_all(bytes)
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| SessionError::Io(e.to_string()))
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| SessionError::ConnectionClosed(e.to_string()))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SessionError::Io(format!("frame of {len} bytes exceeds limit")));
    }
    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| SessionError::ConnectionClosed(e.to_string()))?;
    Ok(bytes)
}
