//! remote-agent library
//!
//! This crate provides the core functionality for the remote agent:
//! - Directive protocol parsing and JSON-line responses
//! - Dispatch of `TA` agent commands and `OS` shell commands
//! - Per-connection sessions and the TCP listener loop
//! - Configuration and logging setup

pub mod agent;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod server;
pub mod session;
pub mod transport;
