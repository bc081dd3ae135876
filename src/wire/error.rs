//! Error types for the wire client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::reply::Reply;

/// Failure to establish a usable connection to the counter store.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host name could not be resolved to any address.
    #[error("failed to resolve {endpoint}: {source}")]
    DnsFailure {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// A socket could not be created for the resolved address family.
    #[error("failed to create socket: {0}")]
    SocketFailure(#[source] io::Error),

    /// Every resolved address refused or failed the TCP connect.
    #[error("failed to connect to {endpoint}: {source}")]
    ConnectFailure {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The connect attempt did not finish within the configured timeout.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// The store rejected the namespace selection.
    #[error("failed to select namespace {namespace}: {reply}")]
    Select { namespace: u32, reply: String },

    /// A transport failure happened while sending AUTH or SELECT.
    #[error("handshake failed: {0}")]
    Handshake(#[source] CommandError),
}

/// Failure to exchange one command for one reply.
#[derive(Debug, Error)]
pub enum CommandError {
    /// An argument cannot be expressed in the inline protocol.
    #[error("invalid command argument {0:?}")]
    InvalidArgument(String),

    #[error("failed to write command: {0}")]
    WriteFailure(#[source] io::Error),

    #[error("failed to read reply: {0}")]
    ReadFailure(#[source] io::Error),

    /// The store closed the connection before sending any reply byte.
    #[error("connection closed by peer")]
    PeerClosed,

    /// The reply bytes do not form a valid frame.
    #[error("malformed reply frame: {0}")]
    MalformedFrame(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The store answered with an error line.
    #[error("store error: {0}")]
    Server(String),

    /// The reply was well formed but not the shape the command expects.
    #[error("unexpected reply to {verb}: {reply:?}")]
    UnexpectedReply { verb: &'static str, reply: Reply },

    /// The connection was already closed by the caller.
    #[error("connection is closed")]
    Closed,
}

impl CommandError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        CommandError::MalformedFrame(detail.into())
    }
}
