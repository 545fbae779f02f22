//! Error types for imposter lifecycle management.

use thiserror::Error;

/// Errors returned while talking to a Mountebank-compatible Admin API
#[derive(Error, Debug)]
pub enum Error {
    /// The liveness probe never succeeded within the retry budget
    #[error("imposter server not ready after {attempts} attempt(s): {reason}")]
    Setup { attempts: u32, reason: String },

    /// The server rejected the imposter definition
    #[error("imposter server rejected configuration (status {status}): {body}")]
    Registration { status: u16, body: String },

    /// Deleting a live imposter failed
    #[error("failed to delete imposter on port {port} (status {status}): {body}")]
    Teardown { port: u16, status: u16, body: String },

    /// Any other non-success answer from the Admin API
    #[error("imposter server returned status {status}: {body}")]
    Remote { status: u16, body: String },

    /// API misuse, e.g. reading requests from a session that is not live
    #[error("usage error: {0}")]
    Usage(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O failure, e.g. starting the runtime for a drop-time delete
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    /// Status code reported by the remote server, when the failure carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Registration { status, .. }
            | Error::Teardown { status, .. }
            | Error::Remote { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response body captured from the remote server for diagnostics
    pub fn remote_body(&self) -> Option<&str> {
        match self {
            Error::Registration { body, .. }
            | Error::Teardown { body, .. }
            | Error::Remote { body, .. } => Some(body),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
