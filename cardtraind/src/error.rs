use std::path::PathBuf;

/// Errors from the training socket.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("training socket is not connected")]
    NotConnected,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket transport error: {0}")]
    Transport(String),
}

/// Errors from a REST call. Not retried; surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("failed to read {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Errors from the on-disk credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read credentials from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write credentials to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("credential file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
