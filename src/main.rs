//! remote-agent
//!
//! Listens on a TCP socket for `TA:` (agent control) and `OS:` (shell)
//! directives and answers each with a JSON line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use remote_agent::agent::AgentIdentity;
use remote_agent::backend::ShellRunner;
use remote_agent::config::Config;
use remote_agent::dispatch::{Dispatcher, AGENT_VERSION};
use remote_agent::logging;
use remote_agent::server::AgentServer;

#[derive(Parser, Debug)]
#[command(name = "remote-agent", version)]
#[command(about = "Remote agent that executes TA/OS directives received over TCP")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The TCP address for the listener
    #[arg(short, long)]
    address: Option<String>,

    /// The TCP port number for the listener (1025-65534)
    #[arg(short, long)]
    port: Option<u16>,

    /// The size of the TCP read buffer (1025-65534)
    #[arg(short, long)]
    buffer: Option<usize>,

    /// Echo activity to the console
    #[arg(short, long)]
    verbose: bool,

    /// Debug output (implies verbose)
    #[arg(short, long)]
    debug: bool,

    /// Append activity to the log file
    #[arg(short, long)]
    logging: bool,

    /// Log file path (implies --logging)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Console log level (trace, debug, info, warn, error), overrides -v/-d
    #[arg(long)]
    log_level: Option<String>,

    /// Initial agent name
    #[arg(long)]
    name: Option<String>,

    /// Kill OS commands running longer than this many seconds
    #[arg(long)]
    command_timeout: Option<u64>,
}

impl Args {
    /// Layer CLI flags over the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.host.clone_from(address);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(buffer) = self.buffer {
            config.buffer_size = buffer;
        }
        if let Some(name) = &self.name {
            config.agent_name.clone_from(name);
        }
        if let Some(timeout) = self.command_timeout {
            config.command_timeout_seconds = Some(timeout);
        }
        if self.logging {
            config.logging.enabled = true;
        }
        if let Some(file) = &self.log_file {
            config.logging.enabled = true;
            config.logging.file.clone_from(file);
        }
    }

    fn console_level(&self) -> &str {
        match (&self.log_level, self.debug, self.verbose) {
            (Some(level), _, _) => level.as_str(),
            (None, true, _) => "debug",
            (None, false, true) => "info",
            (None, false, false) => "warn",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let log_file = config
        .logging
        .enabled
        .then_some(config.logging.file.as_path());
    logging::init(args.console_level(), log_file)?;

    let identity = Arc::new(AgentIdentity::for_current_user(config.agent_name.clone()));
    info!(
        version = AGENT_VERSION,
        user = identity.user(),
        cwd = ?std::env::current_dir().ok(),
        "Agent starting"
    );
    debug!(?config, "Operating parameters");

    let runner = ShellRunner::new(&config.shell, config.command_timeout());
    let server = AgentServer::bind(&config, Dispatcher::new(identity, runner)).await?;

    let token = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Caught interrupt, closing listener");
        token.cancel();
    });

    server.run().await?;
    info!("Agent terminated");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!(error = %e, "Ctrl-c signal handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::try_parse_from([
            "remote-agent",
            "-a",
            "10.0.0.5",
            "-p",
            "4100",
            "-b",
            "2048",
            "--name",
            "rig-2",
            "--log-file",
            "/tmp/agent.log",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 4100);
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.agent_name, "rig-2");
        assert!(config.logging.enabled);
        assert_eq!(config.logging.file, PathBuf::from("/tmp/agent.log"));
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::try_parse_from(["remote-agent"]).unwrap();
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn console_level_precedence() {
        assert_eq!(parse(&["remote-agent"]).console_level(), "warn");
        assert_eq!(parse(&["remote-agent", "-v"]).console_level(), "info");
        assert_eq!(parse(&["remote-agent", "-v", "-d"]).console_level(), "debug");
        assert_eq!(
            parse(&["remote-agent", "-d", "--log-level", "trace"]).console_level(),
            "trace"
        );
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(Args::try_parse_from(["remote-agent", "--port", "http"]).is_err());
    }
}
