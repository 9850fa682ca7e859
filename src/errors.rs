use thiserror::Error;

/// Result type alias for fanout operations
pub type Result<T, E = FanoutError> = std::result::Result<T, E>;

/// Errors that can occur while configuring or executing a fanout
#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("invalid endpoint URL {0:?}: {1}")]
    InvalidEndpoint(String, url::ParseError),

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("replica path must begin with '/': {0:?}")]
    InvalidPath(String),

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("failed to build replica request for {0}: {1}")]
    RequestBuild(String, String),

    #[error("transport error for {0}: {1}")]
    Transport(String, String),

    #[error("client timeout for {0}")]
    Timeout(String),

    #[error("failed to read response body from {0}: {1}")]
    ReadBody(String, String),

    #[error("fanout deadline exceeded")]
    DeadlineExceeded,

    #[error("all endpoints failed")]
    AllFailed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
