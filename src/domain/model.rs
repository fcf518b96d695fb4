use serde::Serialize;

/// Lifecycle of a single download.
///
/// `Queued` is where every download starts; `Finished` and `Failed` are
/// terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    Queued,
    Downloading,
    Finished,
    Failed,
}

impl DownloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadPhase::Finished | DownloadPhase::Failed)
    }
}

/// Point-in-time view of a download, taken under a single lock.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSnapshot {
    pub filename: String,
    pub url: String,
    pub phase: DownloadPhase,
    pub expected_content_length: Option<u64>,
    pub progress_content_length: u64,
    pub error: Option<String>,
}

impl DownloadSnapshot {
    /// Fraction of the body received, when the source advertised a length.
    pub fn fraction(&self) -> Option<f32> {
        match self.expected_content_length {
            Some(0) => Some(1.0),
            Some(total) => Some(self.progress_content_length as f32 / total as f32),
            None => None,
        }
    }
}
