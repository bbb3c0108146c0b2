//! Directive dispatcher.
//!
//! Turns one raw frame into a [`Response`] plus a [`Control`] signal telling
//! the session what to do next. Apart from the shared [`AgentIdentity`] the
//! dispatcher holds no state between frames.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::agent::AgentIdentity;
use crate::backend::CommandRunner;
use crate::transport::protocol::codes;
use crate::transport::{Directive, Frame, Response};

/// Version reported by `TA:version`.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP_TEXT: &str = "Agent commands must be of the form TA:command or OS:command. \
Valid TA commands are: version, getname, setname=<name>, getusername, localtime, \
help, bye, quit, exit, shutdown. Valid OS commands depend on the agent's operating system.";

/// What the session should do after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep reading frames.
    Continue,
    /// Close this session.
    EndSession,
    /// Close this session and stop the whole service.
    Shutdown,
}

/// Routes frames to the TA command table or the command runner.
pub struct Dispatcher<R> {
    identity: Arc<AgentIdentity>,
    runner: R,
    version: String,
}

impl<R: CommandRunner> Dispatcher<R> {
    /// Create a dispatcher reporting the crate version.
    pub fn new(identity: Arc<AgentIdentity>, runner: R) -> Self {
        Self {
            identity,
            runner,
            version: AGENT_VERSION.to_string(),
        }
    }

    /// Override the version reported by `TA:version`.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Handle one frame.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, raw: &str) -> (Response, Control) {
        let frame = match raw.parse::<Frame>() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Malformed frame");
                return (
                    Response::error(codes::MALFORMED_FRAME, e.to_string()),
                    Control::Continue,
                );
            }
        };

        let (response, control) = match frame.directive {
            Directive::Ta => self.dispatch_ta(&frame.payload).await,
            Directive::Os => (self.dispatch_os(&frame.payload).await, Control::Continue),
            Directive::Other(tag) => (
                Response::error(codes::UNKNOWN_DIRECTIVE, format!("UNKNOWN DIRECTIVE: {tag}")),
                Control::Continue,
            ),
        };

        debug!(code = response.code(), ?control, "Directive handled");
        (response, control)
    }

    async fn dispatch_ta(&self, command: &str) -> (Response, Control) {
        let (keyword, assignment) = match command.split_once('=') {
            Some((keyword, value)) => (keyword.trim(), Some(value)),
            None => (command, None),
        };
        let keyword = keyword.to_ascii_lowercase();

        if keyword == "setname" {
            return (self.set_name(assignment).await, Control::Continue);
        }
        if assignment.is_some() {
            return (unknown_ta_command(command), Control::Continue);
        }

        match keyword.as_str() {
            "version" => (
                Response::ta(codes::SUCCESS, format!("VERSION {}", self.version)),
                Control::Continue,
            ),
            "bye" | "quit" | "exit" => (
                Response::ta(codes::SUCCESS, "CLOSING CONNECTION"),
                Control::EndSession,
            ),
            "shutdown" => {
                info!("Shutdown requested");
                (
                    Response::ta(codes::SUCCESS, "SHUTTING DOWN AGENT"),
                    Control::Shutdown,
                )
            }
            "getname" => (
                Response::ta(codes::SUCCESS, self.identity.name().await),
                Control::Continue,
            ),
            "getusername" => (
                Response::ta(codes::SUCCESS, self.identity.user()),
                Control::Continue,
            ),
            "localtime" => (
                Response::ta(codes::SUCCESS, local_timestamp()),
                Control::Continue,
            ),
            "help" => (Response::ta(codes::SUCCESS, HELP_TEXT), Control::Continue),
            _ => (unknown_ta_command(command), Control::Continue),
        }
    }

    async fn set_name(&self, assignment: Option<&str>) -> Response {
        let Some(value) = assignment else {
            return Response::ta(
                codes::SETNAME_MISSING_ASSIGNMENT,
                "TA:setname requires an assignment using '='",
            );
        };

        let value = value.trim();
        if value.is_empty() || value.contains('=') {
            return Response::ta(
                codes::SETNAME_BAD_VALUE,
                "Bad TA:setname - must have a name after the '=' operator",
            );
        }

        self.identity.set_name(value).await;
        Response::ta(codes::SUCCESS, format!("Agent Name set to '{value}'"))
    }

    async fn dispatch_os(&self, command: &str) -> Response {
        info!(command = %command, "Running OS command");
        let result = self.runner.run(command).await;
        Response::os(
            codes::SUCCESS,
            "",
            command,
            &result.stdout,
            &result.stderr,
            result.exit_code,
        )
    }
}

fn unknown_ta_command(command: &str) -> Response {
    Response::ta(
        codes::UNKNOWN_TA_COMMAND,
        format!("UNKNOWN TA COMMAND: {command}"),
    )
}

/// Local time as `YYYY-Mon-DD, HH:MM:SS`.
fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%b-%d, %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::ExecutionResult;

    /// Records commands instead of running them.
    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &str) -> ExecutionResult {
            self.commands.lock().unwrap().push(command.to_string());
            ExecutionResult {
                exit_code: 7,
                stdout: format!("ran: {command}\n"),
                stderr: "warn\n".to_string(),
            }
        }
    }

    fn dispatcher() -> Dispatcher<RecordingRunner> {
        let identity = Arc::new(AgentIdentity::new("NO_NAME", "tester"));
        Dispatcher::new(identity, RecordingRunner::default()).with_version("9.8.7")
    }

    #[tokio::test]
    async fn test_malformed_frames_continue() {
        let d = dispatcher();
        for raw in ["version", "", "TA:", ":version", " : "] {
            let (resp, control) = d.dispatch(raw).await;
            assert_eq!(resp.code(), codes::MALFORMED_FRAME, "frame {raw:?}");
            assert!(matches!(resp, Response::Error { .. }));
            assert_eq!(control, Control::Continue);
        }
    }

    #[tokio::test]
    async fn test_version() {
        let (resp, control) = dispatcher().dispatch("TA:version").await;
        assert_eq!(resp, Response::ta(0, "VERSION 9.8.7"));
        assert_eq!(control, Control::Continue);
    }

    #[tokio::test]
    async fn test_default_version_is_crate_version() {
        let identity = Arc::new(AgentIdentity::new("NO_NAME", "tester"));
        let d = Dispatcher::new(identity, RecordingRunner::default());
        let (resp, _) = d.dispatch("TA:version").await;
        assert!(resp.message().contains(AGENT_VERSION));
    }

    #[tokio::test]
    async fn test_directive_case_insensitive() {
        let (resp, _) = dispatcher().dispatch("  ta : VERSION ").await;
        assert_eq!(resp.code(), 0);
        assert_eq!(resp.message(), "VERSION 9.8.7");
    }

    #[tokio::test]
    async fn test_setname_round_trip() {
        let d = dispatcher();
        let (resp, _) = d.dispatch("TA:setname=Foo Bar").await;
        assert_eq!(resp, Response::ta(0, "Agent Name set to 'Foo Bar'"));

        let (resp, _) = d.dispatch("TA:getname").await;
        assert_eq!(resp, Response::ta(0, "Foo Bar"));
    }

    #[tokio::test]
    async fn test_setname_errors_leave_name_unchanged() {
        let d = dispatcher();

        let (missing, _) = d.dispatch("TA:setname").await;
        let (empty, _) = d.dispatch("TA:setname=   ").await;
        let (double, _) = d.dispatch("TA:setname=a=b").await;

        assert_eq!(missing.code(), codes::SETNAME_MISSING_ASSIGNMENT);
        assert_eq!(empty.code(), codes::SETNAME_BAD_VALUE);
        assert_eq!(double.code(), codes::SETNAME_BAD_VALUE);
        assert_ne!(missing.code(), empty.code());
        assert_eq!(d.identity.name().await, "NO_NAME");
    }

    #[tokio::test]
    async fn test_getusername() {
        let (resp, _) = dispatcher().dispatch("TA:getusername").await;
        assert_eq!(resp, Response::ta(0, "tester"));
    }

    #[tokio::test]
    async fn test_localtime_format() {
        let (resp, _) = dispatcher().dispatch("TA:localtime").await;
        assert_eq!(resp.code(), 0);
        chrono::NaiveDateTime::parse_from_str(resp.message(), "%Y-%b-%d, %H:%M:%S")
            .expect("timestamp should parse");
    }

    #[tokio::test]
    async fn test_help() {
        let (resp, control) = dispatcher().dispatch("TA:help").await;
        assert_eq!(resp.code(), 0);
        assert!(resp.message().contains("setname"));
        assert_eq!(control, Control::Continue);
    }

    #[tokio::test]
    async fn test_close_commands_equivalent() {
        let d = dispatcher();
        for raw in ["TA:bye", "TA:quit", "TA:exit"] {
            let (resp, control) = d.dispatch(raw).await;
            assert_eq!(resp, Response::ta(0, "CLOSING CONNECTION"));
            assert_eq!(control, Control::EndSession);
        }
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (resp, control) = dispatcher().dispatch("TA:SHUTDOWN").await;
        assert_eq!(resp, Response::ta(0, "SHUTTING DOWN AGENT"));
        assert_eq!(control, Control::Shutdown);
    }

    #[tokio::test]
    async fn test_unknown_ta_command() {
        let d = dispatcher();
        let (resp, control) = d.dispatch("TA:qwert").await;
        assert_eq!(resp, Response::ta(201, "UNKNOWN TA COMMAND: qwert"));
        assert_eq!(control, Control::Continue);

        let (resp, _) = d.dispatch("TA:version=2").await;
        assert_eq!(resp.code(), codes::UNKNOWN_TA_COMMAND);
    }

    #[tokio::test]
    async fn test_unknown_directive_echoes_tag() {
        let (resp, control) = dispatcher().dispatch("ZZ:anything").await;
        assert_eq!(resp, Response::error(200, "UNKNOWN DIRECTIVE: ZZ"));
        assert_eq!(control, Control::Continue);
    }

    #[tokio::test]
    async fn test_os_payload_passed_verbatim() {
        let d = dispatcher();
        let (resp, control) = d.dispatch("OS:  ps -a | grep 'a:b'  ").await;

        assert_eq!(
            d.runner.commands.lock().unwrap().as_slice(),
            ["ps -a | grep 'a:b'"]
        );
        assert_eq!(
            resp,
            Response::Os {
                code: 0,
                message: String::new(),
                command: "ps -a | grep 'a:b'".into(),
                stdout: "ran: ps -a | grep 'a:b'".into(),
                stderr: "warn".into(),
                exit_status: 7,
            }
        );
        assert_eq!(control, Control::Continue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_setname() {
        let d = Arc::new(dispatcher());
        let a = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch("TA:setname=A").await })
        };
        let b = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch("TA:setname=B").await })
        };
        assert_eq!(a.await.unwrap().0.code(), 0);
        assert_eq!(b.await.unwrap().0.code(), 0);

        let (resp, _) = d.dispatch("TA:getname").await;
        assert!(resp.message() == "A" || resp.message() == "B");
    }

    #[cfg(unix)]
    mod shell {
        use std::sync::Arc;

        use crate::agent::AgentIdentity;
        use crate::backend::ShellRunner;
        use crate::dispatch::Dispatcher;
        use crate::transport::Response;

        fn shell_dispatcher() -> Dispatcher<ShellRunner> {
            let identity = Arc::new(AgentIdentity::new("NO_NAME", "tester"));
            Dispatcher::new(identity, ShellRunner::default())
        }

        #[tokio::test]
        async fn test_os_echo() {
            let (resp, _) = shell_dispatcher().dispatch("OS:echo hi").await;
            match resp {
                Response::Os {
                    code,
                    stdout,
                    exit_status,
                    ..
                } => {
                    assert_eq!(code, 0);
                    assert_eq!(stdout.trim(), "hi");
                    assert_eq!(exit_status, 0);
                }
                other => panic!("expected OS response, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_os_missing_binary() {
            let (resp, _) = shell_dispatcher()
                .dispatch("OS:no-such-binary-9c1e --flag")
                .await;
            match resp {
                Response::Os {
                    code,
                    stderr,
                    exit_status,
                    ..
                } => {
                    assert_eq!(code, 0);
                    assert_eq!(exit_status, 127);
                    assert!(!stderr.is_empty());
                }
                other => panic!("expected OS response, got {other:?}"),
            }
        }
    }
}
