//! Directive protocol message types.
//!
//! Requests are text frames of the form `DIRECTIVE:PAYLOAD`.
//! Responses are one JSON object per line whose field set depends only on
//! the [`Response`] variant.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Agent return codes carried in the `code` field.
pub mod codes {
    /// Directive executed.
    pub const SUCCESS: i32 = 0;
    /// `TA:setname` without an `=` assignment.
    pub const SETNAME_MISSING_ASSIGNMENT: i32 = 1;
    /// `TA:setname=` with an empty value or more than one `=`.
    pub const SETNAME_BAD_VALUE: i32 = 2;
    /// Response could not be encoded.
    pub const ENCODING_FAILED: i32 = 99;
    /// Directive tag is neither `TA` nor `OS`.
    pub const UNKNOWN_DIRECTIVE: i32 = 200;
    /// `TA` payload is not a known command.
    pub const UNKNOWN_TA_COMMAND: i32 = 201;
    /// Frame has no usable `DIRECTIVE:PAYLOAD` split.
    pub const MALFORMED_FRAME: i32 = 255;
}

/// Line sent when a response cannot be serialized.
const ENCODING_FALLBACK: &str = "{\"code\":99,\"message\":\"unable to process directive\"}\n";

/// Directive tag of a frame, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Commands addressed to the agent itself.
    Ta,
    /// Shell commands executed on the agent host.
    Os,
    /// Any other tag, kept as sent (trimmed).
    Other(String),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ta => f.write_str("TA"),
            Self::Os => f.write_str("OS"),
            Self::Other(tag) => f.write_str(tag),
        }
    }
}

/// Frame without a usable `DIRECTIVE:PAYLOAD` split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("INVALID MESSAGE FORMAT: expected DIRECTIVE:COMMAND")]
pub struct MalformedFrame;

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Directive tag.
    pub directive: Directive,
    /// Trimmed payload, case preserved.
    pub payload: String,
}

impl FromStr for Frame {
    type Err = MalformedFrame;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (tag, payload) = raw.split_once(':').ok_or(MalformedFrame)?;
        let tag = tag.trim();
        let payload = payload.trim();
        if tag.is_empty() || payload.is_empty() {
            return Err(MalformedFrame);
        }

        let directive = if tag.eq_ignore_ascii_case("TA") {
            Directive::Ta
        } else if tag.eq_ignore_ascii_case("OS") {
            Directive::Os
        } else {
            Directive::Other(tag.to_string())
        };

        Ok(Self {
            directive,
            payload: payload.to_string(),
        })
    }
}

/// Reply sent for every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Reply to a `TA` directive.
    Ta { code: i32, message: String },
    /// Reply to an `OS` directive. `code` is the agent code; the process
    /// outcome lives in `exit_status`.
    Os {
        code: i32,
        message: String,
        command: String,
        stdout: String,
        stderr: String,
        exit_status: i32,
    },
    /// Malformed frame or unknown directive.
    Error { code: i32, message: String },
}

impl Response {
    /// Build a `TA` reply.
    pub fn ta(code: i32, message: impl Into<String>) -> Self {
        Self::Ta {
            code,
            message: message.into(),
        }
    }

    /// Build an `OS` reply. Text fields are trimmed.
    pub fn os(
        code: i32,
        message: impl Into<String>,
        command: &str,
        stdout: &str,
        stderr: &str,
        exit_status: i32,
    ) -> Self {
        Self::Os {
            code,
            message: message.into(),
            command: command.trim().to_string(),
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_status,
        }
    }

    /// Build an error reply.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Agent return code.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Ta { code, .. } | Self::Os { code, .. } | Self::Error { code, .. } => *code,
        }
    }

    /// Agent message.
    pub fn message(&self) -> &str {
        match self {
            Self::Ta { message, .. } | Self::Os { message, .. } | Self::Error { message, .. } => {
                message
            }
        }
    }

    /// Encode as a newline-terminated JSON line.
    ///
    /// Falls back to the code 99 sentinel if serialization fails, so a reply
    /// is always available.
    pub fn encode(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(mut line) => {
                line.push(b'\n');
                line
            }
            Err(_) => ENCODING_FALLBACK.as_bytes().to_vec(),
        }
    }
}
