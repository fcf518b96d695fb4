mod download;
mod manager;

pub use download::{Download, DownloadListener};
pub use manager::{DownloadManager, ManagerListener, DEFAULT_MAX_CONCURRENT_DOWNLOADS};
