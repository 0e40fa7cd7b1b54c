use std::fs::File;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::LAST_MODIFIED;
use reqwest::{Client, Url};

use crate::error::ProvisionError;

const USER_AGENT: &str = concat!("cloud-vm-provisioner/", env!("CARGO_PKG_VERSION"));

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteHead {
    /// Raw `Last-Modified` header value.
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

/// Read-only access to the published image directory.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn head(&self, url: &Url) -> Result<RemoteHead, ProvisionError>;

    async fn fetch_text(&self, url: &Url) -> Result<String, ProvisionError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    /// `expected_len` only feeds the progress bar.
    async fn download(&self, url: &Url, dest: &Path, expected_len: Option<u64>) -> Result<u64, ProvisionError>;
}

/// HTTP(S) implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    show_progress: bool,
}

impl HttpSource {
    /// Build a client, optionally routed through `proxy` for every scheme.
    pub fn new(proxy: Option<&str>) -> Result<Self, ProvisionError> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ProvisionError::InvalidInput(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ProvisionError::InvalidInput(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            show_progress: true,
        })
    }

    /// Disable the download progress bar (tests, non-interactive use).
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&self, url: &Url, expected_len: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(expected_len.unwrap_or(0));
        if let Ok(style) = ProgressStyle::with_template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] \
             {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Downloading {url}"));
        pb
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn head(&self, url: &Url) -> Result<RemoteHead, ProvisionError> {
        let res = self
            .client
            .head(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::network(url, e))?;

        let last_modified = res
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(RemoteHead {
            last_modified,
            content_length: res.content_length().filter(|len| *len > 0),
        })
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, ProvisionError> {
        self.client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::network(url, e))?
            .text()
            .await
            .map_err(|e| ProvisionError::network(url, e))
    }

    async fn download(&self, url: &Url, dest: &Path, expected_len: Option<u64>) -> Result<u64, ProvisionError> {
        let mut res = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::network(url, e))?;

        let total = expected_len.or(res.content_length());
        let pb = self.progress_bar(url, total);

        let mut file = File::create(dest).map_err(|e| ProvisionError::Io {
            context: format!("create {}", dest.display()),
            source: e,
        })?;
        let mut downloaded: u64 = 0;

        // Download chunks (use chunk() to avoid bytes_stream() feature issues)
        loop {
            let chunk = match res.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    pb.abandon();
                    return Err(ProvisionError::network(url, e));
                }
            };
            file.write_all(&chunk).map_err(|e| ProvisionError::Io {
                context: format!("write {}", dest.display()),
                source: e,
            })?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        file.sync_all().map_err(|e| ProvisionError::Io {
            context: format!("flush {}", dest.display()),
            source: e,
        })?;
        pb.finish_with_message(format!("Downloaded {url}"));

        Ok(downloaded)
    }
}
