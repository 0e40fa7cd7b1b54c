use std::path::PathBuf;

/// Every failure the provisioning pipeline can surface. None of them are
/// retried internally; the first one aborts the run.
#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error("unsupported image version '{version}' (supported: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("checksum {digest} of {} not found in {manifest}", file.display())]
    Integrity { file: PathBuf, digest: String, manifest: String },

    #[error("failed to convert {}: {reason}", source_path.display())]
    Conversion { source_path: PathBuf, reason: String },

    #[error("failed to package provisioning disc: {0}")]
    Packaging(String),

    #[error("{operation} failed: {reason}")]
    PlatformApi { operation: String, reason: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("image cache {} is in use by another run", path.display())]
    CacheLocked { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn network(url: impl ToString, reason: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn platform(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::PlatformApi {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Attach a human readable context to `std::io` failures, mirroring
/// `anyhow::Context` for the typed error.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| ProvisionError::Io {
            context: f().into(),
            source,
        })
    }
}
