//! Package download client.
//!
//! The restore orchestrator fetches packages through the [`PackageSource`]
//! trait and verifies them itself; sources only move bytes.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use updraft_schema::{ReleaseMetadata, UpdateFeed};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Unreadable package: {0}")]
    Corrupt(String),

    #[error("Response exceeds the declared package size of {expected} bytes (got {actual})")]
    TooLarge { expected: u64, actual: u64 },

    #[error("Download cancelled")]
    Cancelled,
}

/// Upper bound on the up-front buffer reservation; larger bodies grow as they stream.
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Called with the number of bytes received so far for one download.
pub type BytesReceived<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Somewhere packages can be fetched from.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Fetch the archive described by `release` (full or delta view) into memory.
    async fn download(
        &self,
        release: &ReleaseMetadata,
        progress: BytesReceived<'_>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError>;
}

/// Downloads packages from a feed over HTTP(S).
///
/// Package filenames are appended to the feed's source URL. Basic auth is
/// sent when the feed carries credentials.
#[derive(Debug, Clone)]
pub struct HttpPackageSource {
    client: reqwest::Client,
    feed: UpdateFeed,
}

impl HttpPackageSource {
    pub fn new(feed: UpdateFeed) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, feed))
    }

    pub fn with_client(client: reqwest::Client, feed: UpdateFeed) -> Self {
        Self { client, feed }
    }

    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{filename}", self.feed.source().trim_end_matches('/'))
    }
}

#[async_trait]
impl PackageSource for HttpPackageSource {
    async fn download(
        &self,
        release: &ReleaseMetadata,
        progress: BytesReceived<'_>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let url = self.url_for(release.filename());
        tracing::debug!("Downloading {url}");

        let mut request = self.client.get(&url);
        if let Some((username, password)) = self.feed.credentials() {
            request = request.basic_auth(username, Some(password));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?.error_for_status()?,
        };

        // The server's Content-Length is only trusted up to the declared size.
        let limit = release.size();
        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(DownloadError::TooLarge {
                    expected: limit,
                    actual: len,
                });
            }
        }
        let capacity = usize::try_from(limit).unwrap_or(0).min(MAX_PREALLOCATION);
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            let received = (buffer.len() + chunk.len()) as u64;
            if received > limit {
                return Err(DownloadError::TooLarge {
                    expected: limit,
                    actual: received,
                });
            }
            buffer.extend_from_slice(&chunk);
            progress(buffer.len() as u64);
        }

        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use updraft_schema::{ReleaseArtifact, ReleaseHeader, Sha512Digest, Target};

    fn release() -> ReleaseMetadata {
        ReleaseMetadata::genesis(
            ReleaseHeader {
                id: "demoapp".into(),
                version: semver::Version::new(1, 0, 0),
                channels: vec!["test".into()],
                target: Target::from_rid("linux-x64").unwrap(),
            },
            ReleaseArtifact {
                size: 11,
                digest: Sha512Digest::compute(b"hello world"),
            },
            Vec::new(),
        )
        .unwrap()
    }

    fn feed(url: &str, credentials: bool) -> UpdateFeed {
        UpdateFeed::Http {
            source: format!("{url}/"),
            username: credentials.then(|| "user".to_string()),
            password: credentials.then(|| "pass".to_string()),
        }
    }

    #[tokio::test]
    async fn downloads_with_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/demoapp_full_linux-x64.1.0.0.upkg")
            .match_header(
                "user-agent",
                mockito::Matcher::Regex("^updraft-core/".into()),
            )
            .with_status(200)
            .with_body("hello world")
            .create_async()
            .await;

        let source = HttpPackageSource::new(feed(&server.url(), false)).unwrap();
        let seen = AtomicU64::new(0);
        let bytes = source
            .download(
                &release(),
                &|n| seen.store(n, Ordering::SeqCst),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"hello world");
        assert_eq!(seen.load(Ordering::SeqCst), 11);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/demoapp_full_linux-x64.1.0.0.upkg")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_body("ok")
            .create_async()
            .await;

        let source = HttpPackageSource::new(feed(&server.url(), true)).unwrap();
        source
            .download(&release(), &|_| {}, &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_errors_surface() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/demoapp_full_linux-x64.1.0.0.upkg")
            .with_status(404)
            .create_async()
            .await;

        let source = HttpPackageSource::new(feed(&server.url(), false)).unwrap();
        let err = source
            .download(&release(), &|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Http(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let server = mockito::Server::new_async().await;
        let source = HttpPackageSource::new(feed(&server.url(), false)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = Mutex::new(0);
        let err = source
            .download(&release(), &|_| *calls.lock().unwrap() += 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    /// Serve one connection with a canned raw HTTP response.
    async fn raw_server(response: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(response).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn huge_content_length_is_rejected() {
        let url = raw_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 9223372036854775807\r\n\r\nabc",
        )
        .await;
        let source = HttpPackageSource::new(feed(&url, false)).unwrap();

        let err = source
            .download(&release(), &|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::TooLarge {
                expected: 11,
                actual: 9_223_372_036_854_775_807
            }
        ));
    }

    #[tokio::test]
    async fn body_past_declared_size_is_rejected() {
        let url = raw_server(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n",
        )
        .await;
        let source = HttpPackageSource::new(feed(&url, false)).unwrap();

        let err = source
            .download(&release(), &|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TooLarge { expected: 11, .. }));
    }

    #[tokio::test]
    async fn oversized_mock_body_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/demoapp_full_linux-x64.1.0.0.upkg")
            .with_body("hello world, and then some")
            .create_async()
            .await;

        let source = HttpPackageSource::new(feed(&server.url(), false)).unwrap();
        let err = source
            .download(&release(), &|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::TooLarge {
                expected: 11,
                actual: 26
            }
        ));
    }

    #[test]
    fn url_joining() {
        let source =
            HttpPackageSource::new(feed("https://cdn.example.com/app", false)).unwrap();
        assert_eq!(
            source.url_for("a.upkg"),
            "https://cdn.example.com/app/a.upkg"
        );
    }
}
