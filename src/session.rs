//! Per-connection session handling.
//!
//! A session owns one accepted connection. It reads frames one at a time,
//! hands each to the dispatcher, writes the reply back, and closes on
//! `bye|quit|exit`, `shutdown`, a transport failure, or a service-wide
//! cancellation. Sessions never share state apart from the agent identity.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::CommandRunner;
use crate::config::Config;
use crate::dispatch::{Control, Dispatcher};
use crate::transport::{send_response, FrameReader};

/// Parsed session configuration with `Duration` fields.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Read buffer size and largest accepted frame.
    pub buffer_size: usize,

    /// Pause between a closing reply and closing the socket, so the reply
    /// reaches the peer before the connection goes away.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 14336,
            close_grace: Duration::from_secs(3),
        }
    }
}

impl SessionConfig {
    /// Take the session settings out of the agent configuration.
    pub const fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.buffer_size,
            close_grace: config.shutdown_grace(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading and answering frames.
    Active,
    /// Terminal.
    Closed,
}

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent `bye`, `quit` or `exit`.
    ClientClosed,
    /// Client sent `shutdown`; the service is stopping.
    ShutdownRequested,
    /// Peer closed the connection.
    PeerDisconnected,
    /// Read or write failed, or a frame could not be decoded.
    TransportError,
    /// The service stopped while this session was waiting for a frame.
    Cancelled,
}

/// One client connection.
pub struct Session<R> {
    id: u64,
    dispatcher: Arc<Dispatcher<R>>,
    config: SessionConfig,
    shutdown: CancellationToken,
    state: SessionState,
}

impl<R: CommandRunner> Session<R> {
    /// Create an active session.
    ///
    /// `shutdown` is the service-wide token: the session stops when it is
    /// cancelled and cancels it itself on `TA:shutdown`.
    pub const fn new(
        id: u64,
        dispatcher: Arc<Dispatcher<R>>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            dispatcher,
            config,
            shutdown,
            state: SessionState::Active,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Serve `stream` until the session closes.
    pub async fn serve<S>(&mut self, stream: S) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut frames = FrameReader::new(reader, self.config.buffer_size);

        let end = loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => break SessionEnd::Cancelled,
                next = frames.next_frame() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => break SessionEnd::PeerDisconnected,
                Err(e) => {
                    warn!(error = %e, "Undecodable frame, closing session");
                    break SessionEnd::TransportError;
                }
            };

            info!(frame = %raw, "Message received");
            let (response, control) = self.dispatcher.dispatch(&raw).await;
            debug!(?response, "Sending response");

            if let Err(e) = send_response(&mut writer, &response).await {
                warn!(error = %e, "Failed to send response");
                break SessionEnd::TransportError;
            }

            match control {
                Control::Continue => {}
                Control::EndSession => break SessionEnd::ClientClosed,
                Control::Shutdown => break SessionEnd::ShutdownRequested,
            }
        };

        if matches!(end, SessionEnd::ClientClosed | SessionEnd::ShutdownRequested) {
            tokio::time::sleep(self.config.close_grace).await;
        }
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Error closing connection");
        }
        self.state = SessionState::Closed;

        if end == SessionEnd::ShutdownRequested {
            info!("Propagating shutdown to listener");
            self.shutdown.cancel();
        }

        info!(session = self.id, ?end, "Session closed");
        end
    }
}
