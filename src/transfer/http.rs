use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::{Transfer, TransferConfig, TransferEvent, TransferStream};
use crate::domain::TransferError;

/// Streams a GET response body into `download_dir/<filename>`.
#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
    config: TransferConfig,
}

impl HttpTransfer {
    pub fn new(config: TransferConfig) -> Result<Self, TransferError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Send the GET and return the advertised length with the body stream
    async fn request(
        client: &Client,
        url: Url,
    ) -> Result<(Option<u64>, impl Stream<Item = Result<Bytes, TransferError>>), TransferError>
    {
        let response = client.get(url).send().await?.error_for_status()?;

        let total_size = response.content_length();
        let stream = response.bytes_stream().map_err(TransferError::from);

        Ok((total_size, stream))
    }
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new(TransferConfig::default()).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using reqwest defaults");
            Self {
                client: Client::default(),
                config: TransferConfig::default(),
            }
        })
    }
}

impl Transfer for HttpTransfer {
    fn open(&self, url: &Url, filename: &str) -> TransferStream {
        futures::stream::unfold(
            TransferState::Start {
                client: self.client.clone(),
                url: url.clone(),
                dir: self.config.download_dir.clone(),
                path: self.config.download_dir.join(filename),
            },
            |state| async move {
                match state {
                    TransferState::Start {
                        client,
                        url,
                        dir,
                        path,
                    } => {
                        let (total_size, stream) = match Self::request(&client, url).await {
                            Ok(response) => response,
                            Err(e) => return Some((Err(e), TransferState::Finished)),
                        };

                        // The file only appears once the server has accepted the request
                        let file = match PartialFile::create(&dir, path).await {
                            Ok(file) => file,
                            Err(e) => return Some((Err(e), TransferState::Finished)),
                        };
                        debug!(path = %file.path.display(), content_length = ?total_size, "Response received");

                        Some((
                            Ok(TransferEvent::Response {
                                content_length: total_size,
                            }),
                            TransferState::Streaming {
                                file,
                                stream: stream.boxed(),
                                expected: total_size,
                                written: 0,
                            },
                        ))
                    }
                    TransferState::Streaming {
                        mut file,
                        mut stream,
                        expected,
                        mut written,
                    } => loop {
                        match stream.next().await {
                            Some(Ok(chunk)) if chunk.is_empty() => continue,
                            Some(Ok(chunk)) => {
                                if let Err(e) = file.write(&chunk).await {
                                    return Some((Err(e), TransferState::Finished));
                                }
                                written += chunk.len() as u64;

                                return Some((
                                    Ok(TransferEvent::Received(chunk.len() as u64)),
                                    TransferState::Streaming {
                                        file,
                                        stream,
                                        expected,
                                        written,
                                    },
                                ));
                            }
                            Some(Err(e)) => return Some((Err(e), TransferState::Finished)),
                            None => {
                                if let Some(expected) = expected.filter(|&n| n > written) {
                                    let e = TransferError::LengthMismatch {
                                        expected,
                                        received: written,
                                    };
                                    return Some((Err(e), TransferState::Finished));
                                }
                                return match file.finish().await {
                                    Ok(()) => None,
                                    Err(e) => Some((Err(e), TransferState::Finished)),
                                };
                            }
                        }
                    },
                    TransferState::Finished => None,
                }
            },
        )
        .boxed()
    }
}

enum TransferState {
    Start {
        client: Client,
        url: Url,
        dir: PathBuf,
        path: PathBuf,
    },
    Streaming {
        file: PartialFile,
        stream: BoxStream<'static, Result<Bytes, TransferError>>,
        expected: Option<u64>,
        written: u64,
    },
    Finished,
}

/// Destination file that is removed again on drop unless `finish` succeeded.
///
/// Covers failed writes, body errors and a transfer whose stream is dropped
/// midway, e.g. on cancel.
struct PartialFile {
    file: Option<tokio::fs::File>,
    path: PathBuf,
    complete: bool,
}

impl PartialFile {
    async fn create(dir: &Path, path: PathBuf) -> Result<Self, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            file: Some(file),
            path,
            complete: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransferError> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.complete = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.complete {
            return;
        }
        // close before unlinking
        drop(self.file.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial download"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial download"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_into(dir: &Path) -> HttpTransfer {
        HttpTransfer::new(TransferConfig {
            download_dir: dir.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    fn received_bytes(events: &[Result<TransferEvent, TransferError>]) -> u64 {
        events
            .iter()
            .filter_map(|event| match event {
                Ok(TransferEvent::Received(len)) => Some(*len),
                _ => None,
            })
            .sum()
    }

    #[tokio::test]
    async fn test_streams_body_into_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/a.bin")
            .with_status(200)
            .with_body("hello world")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transfer = transfer_into(dir.path());
        let url = Url::parse(&format!("{}/files/a.bin", server.url())).unwrap();

        let events: Vec<_> = transfer.open(&url, "a.bin").collect().await;

        mock.assert_async().await;
        assert_eq!(
            events.first(),
            Some(&Ok(TransferEvent::Response {
                content_length: Some(11)
            }))
        );
        assert!(events.iter().all(|event| event.is_ok()));
        assert_eq!(received_bytes(&events), 11);

        let content = tokio::fs::read_to_string(dir.path().join("a.bin"))
            .await
            .unwrap();
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn test_error_status_fails_without_creating_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.bin")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transfer = transfer_into(dir.path());
        let url = Url::parse(&format!("{}/missing.bin", server.url())).unwrap();

        let events: Vec<_> = transfer.open(&url, "missing.bin").collect().await;

        assert_eq!(events, vec![Err(TransferError::Status(404))]);
        assert!(!dir.path().join("missing.bin").exists());
    }

    #[tokio::test]
    async fn test_nothing_is_sent_until_polled() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/lazy.bin")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transfer = transfer_into(dir.path());
        let url = Url::parse(&format!("{}/lazy.bin", server.url())).unwrap();

        drop(transfer.open(&url, "lazy.bin"));

        mock.assert_async().await;
    }

    #[test]
    fn test_default_transfer_uses_default_config() {
        let transfer = HttpTransfer::default();
        let defaults = TransferConfig::default();

        assert_eq!(transfer.config().user_agent, defaults.user_agent);
        assert!(transfer.config().user_agent.starts_with("fetchq/"));
        assert_eq!(transfer.config().connect_timeout, defaults.connect_timeout);
    }

    #[tokio::test]
    async fn test_abandoned_transfer_removes_partial_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big.bin")
            .with_status(200)
            .with_body(vec![1u8; 64 * 1024])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transfer = transfer_into(dir.path());
        let url = Url::parse(&format!("{}/big.bin", server.url())).unwrap();
        let path = dir.path().join("big.bin");

        let mut stream = transfer.open(&url, "big.bin");
        assert!(matches!(
            stream.next().await,
            Some(Ok(TransferEvent::Response { .. }))
        ));
        assert!(matches!(
            stream.next().await,
            Some(Ok(TransferEvent::Received(_)))
        ));
        assert!(path.exists());

        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_creates_download_dir_and_sends_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/b.bin")
            .match_header("user-agent", "fetchq-test/1.0")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("deeper");
        let transfer = HttpTransfer::new(TransferConfig {
            download_dir: nested.clone(),
            user_agent: "fetchq-test/1.0".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/b.bin", server.url())).unwrap();

        let events: Vec<_> = transfer.open(&url, "b.bin").collect().await;

        mock.assert_async().await;
        assert_eq!(received_bytes(&events), 4096);
        let written = tokio::fs::read(nested.join("b.bin")).await.unwrap();
        assert_eq!(written.len(), 4096);
    }
}
