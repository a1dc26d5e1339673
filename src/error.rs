//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns `Result<T>` aliasing
//! `std::result::Result<T, RtError>`. Hot-path call sites (ring-buffer
//! `update`, MIDI byte-feed) never construct one of these for steady-state
//! overflow/underflow/parse conditions — they log, bump a counter, and
//! return `Ok(())`. `RtError` is reserved for setup failures and
//! control-path faults.

use std::io;
use thiserror::Error;

/// Top-level error type returned by every public operation in this crate.
#[derive(Error, Debug)]
pub enum RtError {
    /// Caller violated an input contract (unknown device index, channel out
    /// of range, zero-length buffer where one was required, ...).
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Operation is not valid in the component's current state (e.g. send
    /// on an unconnected control-surface socket, start on a running PCM).
    #[error("invalid operation: {0}")]
    InvalidOp(String),

    /// A socket, file, or device is busy, closed, or disconnected.
    #[error("resource not available: {0}")]
    ResourceNotAvailable(String),

    /// An expected event did not arrive within the allotted time. Not
    /// inherently an error condition — poll timeouts use this variant too.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A syscall or native driver call failed; the OS error is preserved
    /// as the nested cause.
    #[error("operation failed: {context}")]
    OpFail {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A caller-provided buffer is too small to hold the result. The
    /// caller may retry with a buffer of at least `needed` bytes.
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufTooSmall { needed: usize, got: usize },

    /// Normal end of stream.
    #[error("end of stream")]
    Eof,
}

impl RtError {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        RtError::InvalidArg(msg.into())
    }

    pub fn invalid_op(msg: impl Into<String>) -> Self {
        RtError::InvalidOp(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        RtError::ResourceNotAvailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        RtError::Timeout(msg.into())
    }

    pub fn op_fail(context: impl Into<String>, source: io::Error) -> Self {
        RtError::OpFail {
            context: context.into(),
            source,
        }
    }
}

impl From<io::Error> for RtError {
    fn from(e: io::Error) -> Self {
        RtError::OpFail {
            context: "io".to_string(),
            source: e,
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RtError>;

/// Helper trait mirroring the teacher codebase's `ErrorContext`: logs the
/// error with its call-site context before handing it back to the caller.
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<RtError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!(context, error = %err, "operation failed");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_too_small_reports_sizes() {
        let e = RtError::BufTooSmall {
            needed: 16,
            got: 4,
        };
        assert_eq!(e.to_string(), "buffer too small: need 16 bytes, got 4");
    }

    #[test]
    fn op_fail_preserves_source() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let e = RtError::op_fail("snd_pcm_writei", io_err);
        assert!(e.to_string().contains("snd_pcm_writei"));
    }
}
