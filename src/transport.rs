use async_trait::async_trait;
use log::{debug, warn};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core_types::RpcMessage;
use crate::error::{RaftError, Result};

/// 1 MiB cap on a single frame body.
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// Outbound half of the RPC layer. Any failure comes back as `Err`; callers
/// do not get to tell a refused connect from a lost reply.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, address: &str, message: RpcMessage) -> Result<RpcMessage>;
}

/// Inbound half: turns a request into its reply.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(&self, message: RpcMessage) -> Option<RpcMessage>;
}

/// Writes one length-prefixed bincode frame.
pub async fn write_frame<W>(stream: &mut W, message: &RpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(RaftError::FrameTooLarge(body.len()));
    }
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the next frame. `Ok(None)` means the peer closed the stream
/// cleanly between frames; EOF anywhere inside a frame is an error.
/// Zero-length frames are skipped.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<RpcMessage>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut len_bytes = [0u8; 4];
        if stream.read(&mut len_bytes[..1]).await? == 0 {
            return Ok(None);
        }
        stream.read_exact(&mut len_bytes[1..]).await?;
        let msg_len = u32::from_be_bytes(len_bytes) as usize;
        if msg_len == 0 {
            continue;
        }
        if msg_len > MAX_FRAME_LEN {
            return Err(RaftError::FrameTooLarge(msg_len));
        }
        let mut body = vec![0u8; msg_len];
        stream.read_exact(&mut body).await?;
        return Ok(Some(bincode::deserialize(&body)?));
    }
}

/// Opens a fresh connection per call; the whole exchange is bounded by
/// `rpc_timeout`.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    rpc_timeout: Duration,
}

impl TcpTransport {
    pub fn new(rpc_timeout: Duration) -> Self {
        TcpTransport { rpc_timeout }
    }

    async fn exchange(address: &str, message: &RpcMessage) -> Result<RpcMessage> {
        let mut stream = TcpStream::connect(address).await?;
        write_frame(&mut stream, message).await?;
        let reply = read_frame(&mut stream).await?.ok_or_else(|| {
            RaftError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed before reply",
            ))
        })?;
        let _ = stream.shutdown().await;
        Ok(reply)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, address: &str, message: RpcMessage) -> Result<RpcMessage> {
        tokio::time::timeout(self.rpc_timeout, Self::exchange(address, &message))
            .await
            .map_err(|_| RaftError::Timeout(address.to_string()))?
    }
}

/// Accept loop: one task per connection, each connection may carry any
/// number of request/reply exchanges. Runs until the listener fails hard.
pub async fn serve(listener: TcpListener, handler: Arc<dyn RpcHandler>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                debug!("new connection from {}", addr);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, handler).await {
                        warn!("connection from {} dropped: {}", addr, e);
                    }
                });
            }
            Err(e) => warn!("failed to accept connection: {}", e),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<()> {
    while let Some(request) = read_frame(&mut stream).await? {
        let kind = request.kind();
        match handler.handle(request).await {
            Some(reply) => write_frame(&mut stream, &reply).await?,
            None => warn!("no reply for unexpected {} on listener", kind),
        }
    }
    Ok(())
}
