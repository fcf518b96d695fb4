use std::fmt;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    domain::{DownloadError, DownloadPhase, DownloadSnapshot, TransferError},
    transfer::{HttpTransfer, Transfer, TransferEvent, TransferStream},
    utils::{parse_download_url, validate_filename},
};

/// Observer of a single download.
///
/// Callbacks run on the download's transfer task. `on_progress` may fire any
/// number of times; exactly one of `on_finished` / `on_failed` fires, last.
pub trait DownloadListener: Send + Sync {
    fn on_progress(&self, _download: &Download) {}

    fn on_finished(&self, download: &Download);

    fn on_failed(&self, download: &Download);
}

/// One HTTP file download.
///
/// Cheap to clone; clones share state. Two handles compare equal when they
/// refer to the same download.
#[derive(Clone)]
pub struct Download {
    inner: Arc<Inner>,
}

struct Inner {
    filename: String,
    url: Url,
    transfer: Arc<dyn Transfer>,
    listener: Weak<dyn DownloadListener>,
    // set for downloads owned by a manager's admission pass
    managed: bool,
    state: Mutex<State>,
}

struct State {
    phase: DownloadPhase,
    expected_content_length: Option<u64>,
    progress_content_length: u64,
    error: Option<TransferError>,
    cancel: Option<CancellationToken>,
}

impl Download {
    /// Create an idle download that stores into the current directory over HTTP.
    pub fn new(
        filename: impl Into<String>,
        url: &str,
        listener: Weak<dyn DownloadListener>,
    ) -> Result<Self, DownloadError> {
        Self::with_transfer(filename, url, listener, Arc::new(HttpTransfer::default()))
    }

    pub fn with_transfer(
        filename: impl Into<String>,
        url: &str,
        listener: Weak<dyn DownloadListener>,
        transfer: Arc<dyn Transfer>,
    ) -> Result<Self, DownloadError> {
        Self::build(filename.into(), url, listener, transfer, false)
    }

    pub(crate) fn managed(
        filename: String,
        url: &str,
        listener: Weak<dyn DownloadListener>,
        transfer: Arc<dyn Transfer>,
    ) -> Result<Self, DownloadError> {
        Self::build(filename, url, listener, transfer, true)
    }

    fn build(
        filename: String,
        url: &str,
        listener: Weak<dyn DownloadListener>,
        transfer: Arc<dyn Transfer>,
        managed: bool,
    ) -> Result<Self, DownloadError> {
        validate_filename(&filename)?;
        let url = parse_download_url(url)?;

        Ok(Self {
            inner: Arc::new(Inner {
                filename,
                url,
                transfer,
                listener,
                managed,
                state: Mutex::new(State {
                    phase: DownloadPhase::Queued,
                    expected_content_length: None,
                    progress_content_length: 0,
                    error: None,
                    cancel: None,
                }),
            }),
        })
    }

    pub fn filename(&self) -> &str {
        &self.inner.filename
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn phase(&self) -> DownloadPhase {
        self.inner.state.lock().phase
    }

    pub fn is_downloading(&self) -> bool {
        self.phase() == DownloadPhase::Downloading
    }

    /// Length advertised by the source; `None` until headers arrive or when absent.
    pub fn expected_content_length(&self) -> Option<u64> {
        self.inner.state.lock().expected_content_length
    }

    pub fn progress_content_length(&self) -> u64 {
        self.inner.state.lock().progress_content_length
    }

    /// Why the download failed; `None` unless the phase is `Failed`.
    pub fn error(&self) -> Option<TransferError> {
        self.inner.state.lock().error.clone()
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        let state = self.inner.state.lock();
        DownloadSnapshot {
            filename: self.inner.filename.clone(),
            url: self.inner.url.to_string(),
            phase: state.phase,
            expected_content_length: state.expected_content_length,
            progress_content_length: state.progress_content_length,
            error: state.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Start the transfer on the current Tokio runtime.
    ///
    /// Downloads created by a [`DownloadManager`](super::DownloadManager) are
    /// started by its admission pass and reject this call.
    pub fn start(&self) -> Result<(), DownloadError> {
        if self.inner.managed {
            return Err(DownloadError::Managed);
        }
        let runtime = Handle::try_current().map_err(|_| DownloadError::NoRuntime)?;
        self.begin(&runtime)
    }

    pub(crate) fn begin(&self, runtime: &Handle) -> Result<(), DownloadError> {
        let token = CancellationToken::new();
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                DownloadPhase::Queued => {}
                DownloadPhase::Downloading => return Err(DownloadError::AlreadyRunning),
                DownloadPhase::Finished | DownloadPhase::Failed => {
                    return Err(DownloadError::AlreadyFinished)
                }
            }
            state.phase = DownloadPhase::Downloading;
            state.expected_content_length = None;
            state.progress_content_length = 0;
            state.error = None;
            state.cancel = Some(token.clone());
        }

        info!(filename = %self.inner.filename, url = %self.inner.url, "Starting download");
        let stream = self.inner.transfer.open(&self.inner.url, &self.inner.filename);
        runtime.spawn(self.clone().run(stream, token));
        Ok(())
    }

    /// Abort the transfer. The failed callback reports the cancellation.
    ///
    /// Does nothing unless the download is running. `is_downloading` is false
    /// as soon as this returns.
    pub fn cancel(&self) {
        let token = {
            let mut state = self.inner.state.lock();
            if state.phase != DownloadPhase::Downloading {
                return;
            }
            state.phase = DownloadPhase::Failed;
            state.error = Some(TransferError::Canceled);
            state.cancel.take()
        };

        info!(filename = %self.inner.filename, "Canceling download");
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Fail a download that never started, so no admission pass can pick it
    /// up. Reports through the failed callback like a cancel.
    pub(crate) fn abandon(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.phase != DownloadPhase::Queued {
                return false;
            }
            state.phase = DownloadPhase::Failed;
            state.error = Some(TransferError::Canceled);
        }

        info!(filename = %self.inner.filename, "Dropping queued download");
        self.notify(|listener, download| listener.on_failed(download));
        true
    }

    async fn run(self, mut stream: TransferStream, token: CancellationToken) {
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break Err(TransferError::Canceled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if let Err(e) = self.apply(event) {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break self.check_complete(),
            }
        };

        // Release the connection and the file before anyone hears about it
        drop(stream);
        self.settle(outcome);
    }

    fn apply(&self, event: TransferEvent) -> Result<(), TransferError> {
        let mut state = self.inner.state.lock();
        if state.phase != DownloadPhase::Downloading {
            // canceled; the select picks up the token next
            return Ok(());
        }

        match event {
            TransferEvent::Response { content_length } => {
                state.expected_content_length = content_length;
                debug!(filename = %self.inner.filename, content_length = ?content_length, "Headers received");
                Ok(())
            }
            TransferEvent::Received(len) => {
                let received = state.progress_content_length + len;
                if let Some(expected) = state.expected_content_length {
                    if received > expected {
                        return Err(TransferError::LengthMismatch { expected, received });
                    }
                }
                state.progress_content_length = received;
                drop(state);

                self.notify(|listener, download| listener.on_progress(download));
                Ok(())
            }
        }
    }

    fn check_complete(&self) -> Result<(), TransferError> {
        let state = self.inner.state.lock();
        match state.expected_content_length {
            Some(expected) if state.progress_content_length < expected => {
                Err(TransferError::LengthMismatch {
                    expected,
                    received: state.progress_content_length,
                })
            }
            _ => Ok(()),
        }
    }

    fn settle(&self, outcome: Result<(), TransferError>) {
        let finished = {
            let mut state = self.inner.state.lock();
            state.cancel = None;
            if state.phase == DownloadPhase::Downloading {
                match outcome {
                    Ok(()) => {
                        state.phase = DownloadPhase::Finished;
                        state.error = None;
                        true
                    }
                    Err(e) => {
                        state.phase = DownloadPhase::Failed;
                        state.error = Some(e);
                        false
                    }
                }
            } else {
                // cancel() already recorded the failure
                false
            }
        };

        if finished {
            info!(filename = %self.inner.filename, bytes = self.progress_content_length(), "Download finished");
            self.notify(|listener, download| listener.on_finished(download));
        } else {
            warn!(filename = %self.inner.filename, error = ?self.error(), "Download failed");
            self.notify(|listener, download| listener.on_failed(download));
        }
    }

    fn notify(&self, callback: impl FnOnce(&dyn DownloadListener, &Download)) {
        match self.inner.listener.upgrade() {
            Some(listener) => callback(listener.as_ref(), self),
            None => debug!(filename = %self.inner.filename, "Listener dropped, skipping notification"),
        }
    }
}

impl PartialEq for Download {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Download {}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.inner.filename)
            .field("url", &self.inner.url.as_str())
            .field("phase", &self.phase())
            .finish()
    }
}
