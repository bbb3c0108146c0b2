//! Transport layer for client ↔ agent communication.
//!
//! Frames are newline-terminated text. Until the peer has sent its first
//! newline, a short read's unterminated tail is taken as one whole frame, so
//! clients that write a bare `TA:version` per send keep working. Once a
//! newline has been seen, partial data waits for its terminator.
//! Responses are JSON lines.

pub mod protocol;

pub use protocol::{Directive, Frame, MalformedFrame, Response};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame that cannot be decoded at the transport level.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame longer than the configured buffer size.
    #[error("frame exceeds max size: {len} > {max}")]
    TooLong { len: usize, max: usize },

    /// Frame bytes are not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Underlying read failed.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads frames from a byte stream through a bounded buffer.
pub struct FrameReader<R> {
    reader: R,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    max_frame: usize,
    /// Peer has terminated at least one frame with `\n`.
    line_mode: bool,
    /// Unterminated tail of `pending` is a complete bare frame.
    bare_tail: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader`. Each read pulls at most `max_frame` bytes and no frame
    /// may be longer than that.
    pub fn new(reader: R, max_frame: usize) -> Self {
        Self {
            reader,
            chunk: vec![0u8; max_frame.max(1)],
            pending: Vec::new(),
            max_frame,
            line_mode: false,
            bare_tail: false,
        }
    }

    /// Read the next non-blank frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    pub async fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            if let Some(line) = self.take_line()? {
                if line.trim().is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if std::mem::take(&mut self.bare_tail) {
                if let Some(rest) = self.take_rest()? {
                    if !rest.trim().is_empty() {
                        return Ok(Some(rest));
                    }
                }
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                return self.take_rest().map(|rest| rest.filter(|s| !s.trim().is_empty()));
            }

            let has_newline = self.chunk[..n].contains(&b'\n');
            self.pending.extend_from_slice(&self.chunk[..n]);

            let tail = self
                .pending
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(self.pending.len(), |pos| self.pending.len() - pos - 1);
            if tail > self.max_frame {
                return Err(FrameError::TooLong {
                    len: tail,
                    max: self.max_frame,
                });
            }

            // A full chunk is most likely the head of a longer frame.
            self.bare_tail = !self.line_mode && n < self.chunk.len();
            if has_newline {
                self.line_mode = true;
            }
        }
    }

    /// Pop the first newline-terminated line out of `pending`.
    fn take_line(&mut self) -> Result<Option<String>, FrameError> {
        let Some(pos) = self.pending.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if pos > self.max_frame {
            return Err(FrameError::TooLong {
                len: pos,
                max: self.max_frame,
            });
        }
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        decode(line).map(Some)
    }

    /// Drain whatever is buffered as one frame.
    fn take_rest(&mut self) -> Result<Option<String>, FrameError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let mut rest = std::mem::take(&mut self.pending);
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        decode(rest).map(Some)
    }
}

fn decode(bytes: Vec<u8>) -> Result<String, FrameError> {
    String::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)
}

/// Write one encoded response and flush it.
pub async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    writer.write_all(&response.encode()).await?;
    writer.flush().await
}
