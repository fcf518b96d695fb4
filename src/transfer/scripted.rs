//! In-memory transfer whose events are fed step by step from tests.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use super::{Transfer, TransferEvent, TransferStream};
use crate::domain::TransferError;

type Feed = mpsc::UnboundedSender<Result<TransferEvent, TransferError>>;

#[derive(Default)]
pub(crate) struct ScriptedTransfer {
    feeds: Mutex<HashMap<String, Feed>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Filenames in the order their transfers were opened
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub(crate) fn respond(&self, filename: &str, content_length: Option<u64>) {
        self.send(filename, Ok(TransferEvent::Response { content_length }));
    }

    pub(crate) fn receive(&self, filename: &str, len: u64) {
        self.send(filename, Ok(TransferEvent::Received(len)));
    }

    /// Ends the body stream successfully
    pub(crate) fn complete(&self, filename: &str) {
        self.feeds.lock().remove(filename);
    }

    pub(crate) fn fail(&self, filename: &str, error: TransferError) {
        self.send(filename, Err(error));
        self.feeds.lock().remove(filename);
    }

    /// Whether the download is still consuming this transfer
    pub(crate) fn is_consumed(&self, filename: &str) -> bool {
        self.feeds
            .lock()
            .get(filename)
            .is_some_and(|feed| !feed.is_closed())
    }

    fn send(&self, filename: &str, item: Result<TransferEvent, TransferError>) {
        let feeds = self.feeds.lock();
        let feed = feeds
            .get(filename)
            .unwrap_or_else(|| panic!("no open transfer for {}", filename));
        let _ = feed.send(item);
    }
}

impl Transfer for ScriptedTransfer {
    fn open(&self, _url: &Url, filename: &str) -> TransferStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().insert(filename.to_string(), tx);
        self.opened.lock().push(filename.to_string());

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}
