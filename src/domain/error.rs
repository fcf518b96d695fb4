use thiserror::Error;

/// Errors returned synchronously by download and manager control calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Download is already running")]
    AlreadyRunning,

    #[error("Download has already finished")]
    AlreadyFinished,

    #[error("Download is scheduled by its manager")]
    Managed,

    #[error("No Tokio runtime is available to run the transfer")]
    NoRuntime,
}

/// Why a transfer stopped before delivering the whole body.
///
/// Stored on the download and handed to listeners through the failed callback,
/// never returned from a control call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server responded with HTTP {0}")]
    Status(u16),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Download canceled")]
    Canceled,
}

impl TransferError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, TransferError::Canceled)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout
        } else if let Some(status) = err.status() {
            TransferError::Status(status.as_u16())
        } else if err.is_connect() {
            TransferError::Connect(err.to_string())
        } else {
            TransferError::Request(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}
