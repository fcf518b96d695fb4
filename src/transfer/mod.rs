//! Transfers: one HTTP request/response cycle that stores a body.
//!
//! A [`Transfer`] turns a URL and a destination name into a lazy stream of
//! [`TransferEvent`]s. The stream ends once the body has been stored; an `Err`
//! item is terminal. Nothing happens until the stream is polled, so opening a
//! transfer is cheap and never blocks the caller.

mod config;
mod http;
#[cfg(test)]
pub(crate) mod scripted;

pub use config::TransferConfig;
pub use http::HttpTransfer;

use futures::stream::BoxStream;
use url::Url;

use crate::domain::TransferError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Response headers arrived; `None` when the source sent no length.
    Response { content_length: Option<u64> },
    /// This many more bytes were written to the destination.
    Received(u64),
}

pub type TransferStream = BoxStream<'static, Result<TransferEvent, TransferError>>;

pub trait Transfer: Send + Sync + 'static {
    fn open(&self, url: &Url, filename: &str) -> TransferStream;
}
