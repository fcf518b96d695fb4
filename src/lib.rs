//! Queued HTTP downloads with a cap on how many run at once.
//!
//! A [`DownloadManager`] owns an ordered list of [`Download`]s and starts them
//! in submission order whenever a slot is free. Progress and completion are
//! reported through [`ManagerListener`] (or [`DownloadListener`] for a
//! standalone download).

pub mod application;
pub mod domain;
pub mod transfer;
pub mod utils;

pub use application::{
    Download, DownloadListener, DownloadManager, ManagerListener, DEFAULT_MAX_CONCURRENT_DOWNLOADS,
};
pub use domain::{DownloadError, DownloadPhase, DownloadSnapshot, TransferError};
pub use transfer::{HttpTransfer, Transfer, TransferConfig, TransferEvent, TransferStream};
