use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::download::{Download, DownloadListener};
use crate::{
    domain::{DownloadError, DownloadPhase, DownloadSnapshot},
    transfer::{HttpTransfer, Transfer},
};

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;

/// Observer of every download a manager owns.
///
/// Callbacks come from the manager's event task one at a time, never
/// concurrently. Terminal callbacks run after the queue has been re-admitted.
///
/// The live `Download` may already be ahead of a progress event by the time it
/// is delivered; `progress` is the state at the moment the chunk was applied.
pub trait ManagerListener: Send + Sync {
    fn on_download_progress(
        &self,
        _manager: &DownloadManager,
        _download: &Download,
        _progress: &DownloadSnapshot,
    ) {
    }

    fn on_download_finished(&self, manager: &DownloadManager, download: &Download);

    fn on_download_failed(&self, manager: &DownloadManager, download: &Download);
}

/// FIFO download queue with a cap on simultaneous transfers.
///
/// Must be created inside a Tokio runtime; the manager starts its downloads on
/// that runtime. Clones share the same queue.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Mutex<Queue>,
    listener: Weak<dyn ManagerListener>,
    transfer: Arc<dyn Transfer>,
    inbox: Arc<Inbox>,
    runtime: Handle,
}

struct Queue {
    max_concurrent_downloads: usize,
    downloads: Vec<Download>,
}

enum ManagerEvent {
    Progress(Download, DownloadSnapshot),
    Finished(Download),
    Failed(Download),
}

/// Listener handed to managed downloads; moves their notifications onto the
/// manager's event task.
struct Inbox {
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl DownloadListener for Inbox {
    fn on_progress(&self, download: &Download) {
        let _ = self
            .events
            .send(ManagerEvent::Progress(download.clone(), download.snapshot()));
    }

    fn on_finished(&self, download: &Download) {
        let _ = self.events.send(ManagerEvent::Finished(download.clone()));
    }

    fn on_failed(&self, download: &Download) {
        let _ = self.events.send(ManagerEvent::Failed(download.clone()));
    }
}

impl Queue {
    fn active_count(&self) -> usize {
        self.downloads.iter().filter(|d| d.is_downloading()).count()
    }

    /// Start queued downloads in insertion order until the cap is reached
    fn admit(&self, runtime: &Handle) {
        let mut active = self.active_count();

        for download in &self.downloads {
            if active >= self.max_concurrent_downloads {
                break;
            }
            if download.phase() != DownloadPhase::Queued {
                continue;
            }

            match download.begin(runtime) {
                Ok(()) => {
                    active += 1;
                    debug!(
                        filename = download.filename(),
                        active,
                        max = self.max_concurrent_downloads,
                        "Admitted download"
                    );
                }
                Err(e) => warn!(filename = download.filename(), error = %e, "Could not admit download"),
            }
        }
    }
}

impl DownloadManager {
    /// Manager with the default cap, storing files in the current directory
    pub fn new(listener: Weak<dyn ManagerListener>) -> Result<Self, DownloadError> {
        Self::with_transfer(listener, Arc::new(HttpTransfer::default()))
    }

    pub fn with_transfer(
        listener: Weak<dyn ManagerListener>,
        transfer: Arc<dyn Transfer>,
    ) -> Result<Self, DownloadError> {
        Self::with_options(listener, transfer, DEFAULT_MAX_CONCURRENT_DOWNLOADS)
    }

    pub fn with_options(
        listener: Weak<dyn ManagerListener>,
        transfer: Arc<dyn Transfer>,
        max_concurrent_downloads: usize,
    ) -> Result<Self, DownloadError> {
        check_cap(max_concurrent_downloads)?;
        let runtime = Handle::try_current().map_err(|_| DownloadError::NoRuntime)?;

        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                max_concurrent_downloads,
                downloads: Vec::new(),
            }),
            listener,
            transfer,
            inbox: Arc::new(Inbox { events }),
            runtime: runtime.clone(),
        });

        runtime.spawn(event_loop(Arc::downgrade(&shared), receiver));
        Ok(Self { shared })
    }

    /// Queue a new download and start it if a slot is free.
    pub fn add_download(
        &self,
        filename: impl Into<String>,
        url: &str,
    ) -> Result<Download, DownloadError> {
        let inbox: Weak<Inbox> = Arc::downgrade(&self.shared.inbox);
        let listener: Weak<dyn DownloadListener> = inbox;
        let download = Download::managed(
            filename.into(),
            url,
            listener,
            self.shared.transfer.clone(),
        )?;

        let mut queue = self.shared.queue.lock();
        queue.downloads.push(download.clone());
        info!(
            filename = download.filename(),
            url = %download.url(),
            position = queue.downloads.len(),
            "Queued download"
        );
        queue.admit(&self.shared.runtime);

        Ok(download)
    }

    /// Change the cap. Raising it starts queued downloads right away; lowering
    /// it lets running downloads complete.
    pub fn set_max_concurrent_downloads(&self, max: usize) -> Result<(), DownloadError> {
        check_cap(max)?;

        let mut queue = self.shared.queue.lock();
        info!(
            from = queue.max_concurrent_downloads,
            to = max,
            "Changing concurrency cap"
        );
        queue.max_concurrent_downloads = max;
        queue.admit(&self.shared.runtime);
        Ok(())
    }

    pub fn max_concurrent_downloads(&self) -> usize {
        self.shared.queue.lock().max_concurrent_downloads
    }

    /// Every download in submission order
    pub fn downloads(&self) -> Vec<Download> {
        self.shared.queue.lock().downloads.clone()
    }

    pub fn active_count(&self) -> usize {
        self.shared.queue.lock().active_count()
    }

    pub fn queued_count(&self) -> usize {
        self.shared
            .queue
            .lock()
            .downloads
            .iter()
            .filter(|d| d.phase() == DownloadPhase::Queued)
            .count()
    }

    /// Cancel every running download and fail every queued one.
    ///
    /// Each affected download reports `TransferError::Canceled` through the
    /// failed callback; nothing further is admitted.
    pub fn cancel_all(&self) {
        let queue = self.shared.queue.lock();
        // queued first, so a freed slot has nothing left to admit
        let abandoned = queue.downloads.iter().filter(|d| d.abandon()).count();
        let mut canceled = 0;
        for download in queue.downloads.iter().filter(|d| d.is_downloading()) {
            download.cancel();
            canceled += 1;
        }
        info!(canceled, abandoned, "Canceled all downloads");
    }

    fn handle(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::Progress(download, progress) => {
                self.notify(|listener| listener.on_download_progress(self, &download, &progress));
            }
            ManagerEvent::Finished(download) => {
                self.readmit();
                self.notify(|listener| listener.on_download_finished(self, &download));
            }
            ManagerEvent::Failed(download) => {
                self.readmit();
                self.notify(|listener| listener.on_download_failed(self, &download));
            }
        }
    }

    fn readmit(&self) {
        let queue = self.shared.queue.lock();
        queue.admit(&self.shared.runtime);
    }

    fn notify(&self, callback: impl FnOnce(&dyn ManagerListener)) {
        match self.shared.listener.upgrade() {
            Some(listener) => callback(listener.as_ref()),
            None => debug!("Manager listener dropped, skipping notification"),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for download in self.queue.get_mut().downloads.iter() {
            download.cancel();
        }
    }
}

fn check_cap(max: usize) -> Result<(), DownloadError> {
    if max == 0 {
        return Err(DownloadError::InvalidArgument(
            "max_concurrent_downloads must be at least 1".to_string(),
        ));
    }
    Ok(())
}

async fn event_loop(manager: Weak<Shared>, mut events: mpsc::UnboundedReceiver<ManagerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = manager.upgrade() else {
            break;
        };
        DownloadManager { shared }.handle(event);
    }
    debug!("Manager event loop stopped");
}
