use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::codec::{read_request, write_message};
use crate::protocol::{Request, Response};

/// Turns one decoded request into one response.
pub trait RequestHandler: Clone + Send + Sync + 'static {
    fn handle(&self, request: Request, peer: SocketAddr)
        -> impl Future<Output = Response> + Send;
}

/// Accept loop for the one-request-per-connection protocol. Each accepted
/// connection is served on its own task.
pub struct ProtocolServer<H> {
    listener: TcpListener,
    handler: H,
    request_timeout: Duration,
}

impl<H: RequestHandler> ProtocolServer<H> {
    pub async fn bind(addr: SocketAddr, handler: H, request_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            request_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, "Protocol server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(addr = ?local, "Protocol server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = self.handler.clone();
                        let limit = self.request_timeout;
                        tokio::spawn(async move {
                            serve_connection(stream, peer, handler, limit).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }
}

async fn serve_connection<H: RequestHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: H,
    limit: Duration,
) {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let request = match tokio::time::timeout(limit, read_request(&mut reader)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer, error = %e, "Connection failed before a request was read");
            return;
        }
        Err(_) => Request::Malformed {
            reason: format!("no request within {limit:?}"),
        },
    };

    if let Request::Malformed { reason } = &request {
        tracing::warn!(peer = %peer, reason = %reason, "Malformed request");
    }

    let response = handler.handle(request, peer).await;
    if let Err(e) = write_message(&mut writer, &response).await {
        tracing::warn!(peer = %peer, error = %e, "Failed to write response");
        return;
    }
    let _ = writer.shutdown().await;
}
