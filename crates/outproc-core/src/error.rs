//! Error types for outproc.
//!
//! Every failure surfaced to the caller of `register`/`lookup`/`construct`/
//! `call`/`dispose` is an [`OutprocError`]. None of them are retried
//! automatically. Failures raised by a hosted instance travel back as data
//! (`Fault`) and surface as [`OutprocError::InvocationFault`].

use std::time::Duration;
use thiserror::Error;

use crate::directory::ObjectHandle;

/// Main error type for outproc.
#[derive(Debug, Error)]
pub enum OutprocError {
    // Directory errors
    #[error("Object {handle} already has an agent")]
    DuplicateRegistration { handle: ObjectHandle },

    #[error("No agent registered for object {handle}")]
    UnknownObject { handle: ObjectHandle },

    // Protocol errors
    #[error("Protocol violation: expected {expected}, received {received}")]
    ProtocolViolation {
        expected: &'static str,
        received: &'static str,
    },

    #[error("Hosted instance already initialized")]
    AlreadyInitialized,

    #[error("Channel closed by peer")]
    ChannelClosed,

    #[error("Message size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Codec error: {message}")]
    Codec { message: String },

    // Remote failures carried back as data
    #[error("Remote invocation failed: {description}")]
    InvocationFault { description: String },

    #[error("Remote construction failed: {description}")]
    ConstructionFault { description: String },

    // Call bounding
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Call cancelled")]
    Cancelled,

    // Process and transport errors
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Invalid channel endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Value schema errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for outproc operations.
pub type Result<T> = std::result::Result<T, OutprocError>;

impl From<std::io::Error> for OutprocError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset => OutprocError::ChannelClosed,
            _ => OutprocError::Io {
                message: err.to_string(),
                source: Some(err),
            },
        }
    }
}

impl From<rmp_serde::encode::Error> for OutprocError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        OutprocError::Codec {
            message: format!("encode: {}", err),
        }
    }
}

impl From<rmp_serde::decode::Error> for OutprocError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        OutprocError::Codec {
            message: format!("decode: {}", err),
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for OutprocError {
    fn from(err: nix::errno::Errno) -> Self {
        std::io::Error::from(err).into()
    }
}

impl OutprocError {
    /// Whether this error leaves the agent's channel pair unusable.
    ///
    /// A request/reply exchange that stops midway (peer gone, reply never
    /// read, garbage on the wire) desynchronizes the channel for good; there
    /// is no reconnect.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            OutprocError::ChannelClosed
                | OutprocError::Timeout(_)
                | OutprocError::Cancelled
                | OutprocError::FrameTooLarge { .. }
                | OutprocError::Codec { .. }
                | OutprocError::ProtocolViolation { .. }
                | OutprocError::Io { .. }
        )
    }

    /// Whether the remote side reported this failure as data.
    pub fn is_remote_fault(&self) -> bool {
        matches!(
            self,
            OutprocError::InvocationFault { .. } | OutprocError::ConstructionFault { .. }
        )
    }
}
