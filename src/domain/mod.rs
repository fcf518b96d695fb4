pub mod error;
pub mod model;

pub use error::{DownloadError, TransferError};
pub use model::{DownloadPhase, DownloadSnapshot};
