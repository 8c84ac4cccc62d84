//! TCP listener and session dispatcher.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ocrforge_core::OcrError;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::SessionHandler;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct OcrServer {
    listener: TcpListener,
    handler: Arc<SessionHandler>,
    grace: Duration,
}

impl OcrServer {
    /// Bind the listening socket. Failure here is a startup failure.
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<SessionHandler>,
        grace: Duration,
    ) -> Result<Self, OcrError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| OcrError::Bind {
                address: addr.to_string(),
                source,
            })?;
        info!(
            "OCR server listening on {} (max message {} bytes)",
            listener.local_addr().unwrap_or(addr),
            handler.limits().max_message_size
        );
        Ok(Self {
            listener,
            handler,
            grace,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept sessions until `shutdown` fires, then give open sessions the
    /// grace period to reach `CLOSED` before aborting them.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), OcrError> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(error = %e, "Failed to set TCP_NODELAY");
                        }
                        let handler = Arc::clone(&self.handler);
                        sessions.spawn(async move {
                            if let Err(e) = handler.handle(stream, peer.to_string()).await {
                                debug!(peer = %peer, error = %e, "Session ended abnormally");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Session task panicked");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        info!(
            open_sessions = sessions.len(),
            grace_secs = self.grace.as_secs(),
            "Stopped accepting connections; draining sessions"
        );

        let deadline = tokio::time::sleep(self.grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = sessions.join_next() => {
                    if joined.is_none() {
                        info!("All sessions closed");
                        break;
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        remaining = sessions.len(),
                        "Shutdown grace period elapsed; aborting sessions"
                    );
                    sessions.shutdown().await;
                    break;
                }
            }
        }
        Ok(())
    }
}
