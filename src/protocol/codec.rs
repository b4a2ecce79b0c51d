use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{ClusterError, Result};
use crate::protocol::{Request, Response};

/// Largest accepted message, newline excluded.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Read one newline-terminated frame. `Ok(None)` on a clean end of stream.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_FRAME_LEN {
        return Err(ClusterError::MalformedRequest(format!(
            "frame exceeds {MAX_FRAME_LEN} bytes"
        )));
    }
    Ok(Some(buf))
}

/// Read the single request of a connection. Protocol violations come back as
/// [`Request::Malformed`]; only transport failures are errors.
pub async fn read_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await {
        Ok(Some(frame)) => Ok(Request::decode(&frame)),
        Ok(None) => Ok(Request::Malformed {
            reason: "connection closed before a request was sent".to_string(),
        }),
        Err(ClusterError::MalformedRequest(reason)) => Ok(Request::Malformed { reason }),
        Err(e) => Err(e),
    }
}

pub async fn read_response<R>(reader: &mut R) -> Result<Response>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some(frame) => Ok(serde_json::from_slice(&frame)?),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a response was sent",
        )
        .into()),
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Open a connection to `addr`, send `request`, wait for the response and
/// close. The whole exchange is bounded by `limit`.
pub async fn send_request(addr: SocketAddr, request: &Request, limit: Duration) -> Result<Response> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.split();
        write_message(&mut writer, request).await?;
        let mut reader = BufReader::new(reader);
        let response = read_response(&mut reader).await?;
        let _ = writer.shutdown().await;
        Ok::<_, ClusterError>(response)
    };

    match tokio::time::timeout(limit, exchange).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no response from {addr} within {limit:?}"),
        )
        .into()),
    }
}
