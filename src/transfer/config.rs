use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the HTTP transfer
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Directory every destination file name is resolved against
    pub download_dir: PathBuf,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Upper bound for a whole request, body included
    pub timeout: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            user_agent: format!("fetchq/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(30),
            timeout: None,
        }
    }
}
