//! TCP listener loop.
//!
//! Binds the configured address, accepts connections and serves each one
//! in its own task. A `TA:shutdown` on any session cancels the shared token;
//! the listener then stops accepting, gives open sessions a bounded drain
//! period, and returns.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::CommandRunner;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::session::{Session, SessionConfig};

/// How long open sessions get to finish once the service stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The agent's TCP server.
pub struct AgentServer<R> {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<R>>,
    session_config: SessionConfig,
    shutdown: CancellationToken,
}

impl<R: CommandRunner + 'static> AgentServer<R> {
    /// Resolve and bind the configured address with the configured backlog.
    pub async fn bind(config: &Config, dispatcher: Dispatcher<R>) -> Result<Self> {
        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", config.host, config.port))?
            .next()
            .with_context(|| format!("No address found for {}", config.host))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("Failed to create socket")?;
        socket
            .set_reuseaddr(true)
            .context("Failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("Agent unable to bind to {addr}"))?;
        let listener = socket
            .listen(config.backlog)
            .with_context(|| format!("Agent unable to listen on {addr}"))?;

        info!(addr = %addr, backlog = config.backlog, "Listener started");

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            session_config: SessionConfig::from_config(config),
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Token that stops the service when cancelled.
    ///
    /// Sessions cancel it on `TA:shutdown`; callers may cancel it too, for
    /// example on Ctrl-C.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept and serve connections until the shutdown token is cancelled.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            dispatcher,
            session_config,
            shutdown,
        } = self;
        let mut sessions = JoinSet::new();
        let mut next_session_id: u64 = 1;

        loop {
            debug!("Waiting for a connection");
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = next_session_id;
                        next_session_id += 1;
                        info!(session = id, peer = %peer, "Connection accepted");
                        let mut session = Session::new(
                            id,
                            Arc::clone(&dispatcher),
                            session_config.clone(),
                            shutdown.clone(),
                        );
                        let span = info_span!("session", id, peer = %peer);
                        sessions.spawn(async move { session.serve(stream).await }.instrument(span));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Session task failed");
                    }
                }
            }
        }

        drop(listener);
        info!("Listener closed, shutting down agent");

        let drain = async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Session task failed");
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(remaining = sessions.len(), "Sessions still busy, aborting");
            sessions.shutdown().await;
        }

        info!("Agent stopped");
        Ok(())
    }
}
