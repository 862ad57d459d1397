//! Pairing transports.
//!
//! On the wire each handshake message is a 4-byte big-endian length followed
//! by the TLV8 payload.

use crate::responder::{PairingResponder, ResponderSession};
use crate::traits::Transport;
use async_trait::async_trait;
use limelight_core::error::{Error, PairingError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

fn transport_err(context: &str, e: std::io::Error) -> Error {
    Error::Pairing(PairingError::Transport(format!("{}: {}", context, e)))
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| transport_err("read frame length", e))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Pairing(PairingError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        ))));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| transport_err("read frame body", e))?;
    Ok(payload)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Pairing(PairingError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            payload.len(),
            MAX_FRAME_LEN
        ))));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| transport_err("write frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| transport_err("flush frame", e))
}

/// Pairing transport over a TCP connection to the host.
pub struct TcpTransport {
    addr: SocketAddr,
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to the host's pairing port.
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Pairing(PairingError::Timeout(connect_timeout)))?
            .map_err(|e| transport_err(&format!("connect to {}", addr), e))?;
        let _ = stream.set_nodelay(true);
        debug!("Connected pairing transport to {}", addr);
        Ok(Self { addr, stream })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream).await
    }
}

/// In-process transport straight into a [`PairingResponder`].
pub struct LoopbackTransport {
    session: ResponderSession,
}

impl LoopbackTransport {
    pub fn new(responder: &PairingResponder) -> Self {
        Self {
            session: responder.session(),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        // Let other tasks run between messages, as a network would.
        tokio::task::yield_now().await;
        self.session.handle(request)
    }
}

/// Accept pairing connections until the listener fails.
///
/// Each connection runs one handshake on its own task.
pub async fn serve_tcp(responder: PairingResponder, listener: TcpListener) -> Result<()> {
    info!(
        "Serving pairing on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string())
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let session = responder.session();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, session).await {
                debug!("Pairing connection from {} ended: {}", peer, e);
            }
        });
    }
}

async fn serve_connection(mut stream: TcpStream, mut session: ResponderSession) -> Result<()> {
    loop {
        let request = read_frame(&mut stream).await?;
        let reply = match session.handle(&request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Rejecting pairing message: {}", e);
                return Err(e);
            }
        };
        write_frame(&mut stream, &reply).await?;
        if session.is_complete() {
            return Ok(());
        }
    }
}
