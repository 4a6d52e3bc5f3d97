use thiserror::Error;

/// Error type for calls to the processing API.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The request was rejected before any network call was made
    #[error("{0}")]
    Validation(String),

    /// Transport failure (connection refused, timeout, malformed body)
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success HTTP status
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered `success: false`
    #[error("{0}")]
    Api(String),

    /// Reading a local file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// True when the failure happened before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, RelayError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
