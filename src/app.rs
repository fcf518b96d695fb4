use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use fetchq::{
    utils::format_bytes, Download, DownloadManager, DownloadSnapshot, ManagerListener,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

/// Prints manager events to stdout and tracks when every download has settled.
pub struct ConsoleReporter {
    json: bool,
    total: usize,
    // last progress step printed, per filename
    reported: Mutex<HashMap<String, u64>>,
    settled: AtomicUsize,
    failed: AtomicUsize,
    done: Notify,
}

impl ConsoleReporter {
    pub fn new(json: bool, total: usize) -> Self {
        Self {
            json,
            total,
            reported: Mutex::new(HashMap::new()),
            settled: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            done: Notify::new(),
        }
    }

    /// Count a download that was rejected before it could be queued
    pub fn skip(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.settle();
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Resolves once every expected download has finished or failed
    pub async fn wait(&self) {
        while self.settled.load(Ordering::SeqCst) < self.total {
            self.done.notified().await;
        }
    }

    fn settle(&self) {
        self.settled.fetch_add(1, Ordering::SeqCst);
        self.done.notify_one();
    }

    fn print_json(&self, snapshot: &DownloadSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(filename = %snapshot.filename, error = %e, "Failed to serialize snapshot"),
        }
    }
}

impl ManagerListener for ConsoleReporter {
    fn on_download_progress(
        &self,
        _manager: &DownloadManager,
        _download: &Download,
        snapshot: &DownloadSnapshot,
    ) {
        let step = progress_step(snapshot);
        {
            let mut reported = self.reported.lock();
            if reported.get(&snapshot.filename) == Some(&step) {
                return;
            }
            reported.insert(snapshot.filename.clone(), step);
        }

        if self.json {
            self.print_json(snapshot);
            return;
        }

        let received = format_bytes(snapshot.progress_content_length);
        match (snapshot.fraction(), snapshot.expected_content_length) {
            (Some(fraction), Some(total)) => println!(
                "[{}] {:>3.0}% ({} / {})",
                snapshot.filename,
                fraction * 100.0,
                received,
                format_bytes(total)
            ),
            _ => println!("[{}] {}", snapshot.filename, received),
        }
    }

    fn on_download_finished(&self, manager: &DownloadManager, download: &Download) {
        let snapshot = download.snapshot();
        if self.json {
            self.print_json(&snapshot);
        } else {
            println!(
                "[{}] done, {} ({} active, {} queued)",
                snapshot.filename,
                format_bytes(snapshot.progress_content_length),
                manager.active_count(),
                manager.queued_count()
            );
        }
        self.settle();
    }

    fn on_download_failed(&self, manager: &DownloadManager, download: &Download) {
        let snapshot = download.snapshot();
        if self.json {
            self.print_json(&snapshot);
        } else {
            eprintln!(
                "[{}] failed: {} ({} active, {} queued)",
                snapshot.filename,
                snapshot.error.as_deref().unwrap_or("unknown error"),
                manager.active_count(),
                manager.queued_count()
            );
        }
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.settle();
    }
}

/// Progress bucket: tens of percent when the length is known, MiB otherwise
fn progress_step(snapshot: &DownloadSnapshot) -> u64 {
    match snapshot.fraction() {
        Some(fraction) => (fraction * 10.0) as u64,
        None => snapshot.progress_content_length / MIB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchq::DownloadPhase;

    fn snapshot(expected: Option<u64>, received: u64) -> DownloadSnapshot {
        DownloadSnapshot {
            filename: "a.zip".to_string(),
            url: "https://example.com/a.zip".to_string(),
            phase: DownloadPhase::Downloading,
            expected_content_length: expected,
            progress_content_length: received,
            error: None,
        }
    }

    #[test]
    fn test_progress_step() {
        assert_eq!(progress_step(&snapshot(Some(100), 0)), 0);
        assert_eq!(progress_step(&snapshot(Some(100), 19)), 1);
        assert_eq!(progress_step(&snapshot(Some(100), 100)), 10);
        assert_eq!(progress_step(&snapshot(None, 3 * MIB + 1)), 3);
    }

    #[tokio::test]
    async fn test_wait_returns_once_all_settled() {
        let reporter = ConsoleReporter::new(false, 2);
        reporter.skip();
        reporter.skip();

        tokio::time::timeout(std::time::Duration::from_secs(1), reporter.wait())
            .await
            .unwrap();
        assert_eq!(reporter.failed(), 2);
    }
}
