//! Local, version-stamped store of converted cloud images.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<image-key>/version.stamp
//! <root>/<image-key>/<stem>-<stamp><archive-ext>
//! <root>/<image-key>/<stem>-<stamp>.vhd
//! <root>/<image-key>/<stem>-<stamp>-nocloud.vhd
//! <root>/<image-key>/.lock
//! ```

pub mod checksum;
pub mod convert;
pub mod datasource;
pub mod download;
pub mod lock;
pub mod stamp;
pub mod tools;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use self::lock::CacheLock;
use crate::cloud::{ArchiveKind, ImageSpec, Protocol};
use crate::error::{IoContext, ProvisionError};
use crate::helpers::command::ToolFailure;
use crate::helpers::remote::RemoteSource;

pub use self::tools::HostDiskTools;

/// External programs the cache shells out to.
pub trait DiskTools: Send + Sync {
    /// Unpack `archive` into the existing directory `dest`.
    fn extract(&self, kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<(), ToolFailure>;

    /// Convert to a dynamic VHD with the platform's own tooling.
    fn convert_native(&self, source: &Path, dest: &Path) -> Result<(), ToolFailure>;

    /// Convert to a dynamic VHD with the portable converter.
    fn convert_fallback(&self, source: &Path, dest: &Path) -> Result<(), ToolFailure>;

    fn compact(&self, disk: &Path) -> Result<(), ToolFailure>;

    /// Replace `guest_path` inside the root filesystem of `disk`.
    fn rewrite_guest_file(&self, disk: &Path, guest_path: &str, contents: &str) -> Result<(), ProvisionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Probe the remote manifest even when a stamp is cached.
    pub check_for_update: bool,
    /// Provision Azure images through the NoCloud disc instead.
    pub nocloud: bool,
    /// Delete the downloaded archive once the VHD exists.
    pub prune_archive: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            check_for_update: true,
            nocloud: false,
            prune_archive: false,
        }
    }
}

/// A ready-to-copy system disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub path: PathBuf,
    pub stamp: String,
    /// Protocol the disk will boot with, after any datasource patch.
    pub protocol: Protocol,
}

pub struct ImageCache<S, T> {
    root: PathBuf,
    source: S,
    tools: T,
}

impl<S: RemoteSource, T: DiskTools> ImageCache<S, T> {
    pub fn new(root: impl Into<PathBuf>, source: S, tools: T) -> Self {
        Self {
            root: root.into(),
            source,
            tools,
        }
    }

    pub fn image_dir(&self, spec: &ImageSpec) -> PathBuf {
        self.root.join(spec.key())
    }

    /// Take the per-image lock; hold the guard for the whole run.
    pub fn lock(&self, spec: &ImageSpec) -> Result<CacheLock, ProvisionError> {
        CacheLock::acquire(&self.image_dir(spec))
    }

    /// Resolve, download, convert and patch as needed, returning the disk the
    /// machine should be created from.
    ///
    /// Once the converted disk for the resolved stamp exists, nothing is
    /// downloaded or converted again, even if the archive was pruned.
    pub async fn acquire(&self, spec: &ImageSpec, options: &CacheOptions) -> Result<CachedImage, ProvisionError> {
        let dir = self.image_dir(spec);
        fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))?;

        let cached_stamp = stamp::read_cached_stamp(&dir)?;
        let stamp = self
            .resolve_version_stamp(spec, options.check_for_update, cached_stamp.as_deref())
            .await?;

        let disk = spec.cached_disk(&dir, &stamp);
        let disk = if disk.exists() {
            info!("using cached image {} ({stamp})", spec.key());
            disk
        } else {
            let archive = self.ensure_raw_image_downloaded(spec, &stamp).await?;
            let disk = self.ensure_extracted_and_converted(&archive, spec, &stamp)?;
            if options.prune_archive
                && let Err(e) = fs::remove_file(&archive)
            {
                warn!("failed to prune archive {}: {e}", archive.display());
            }
            disk
        };

        let path = self.maybe_convert_datasource_mode(&disk, spec, options.nocloud)?;
        let protocol = if options.nocloud {
            Protocol::NoCloud
        } else {
            spec.protocol()
        };

        Ok(CachedImage { path, stamp, protocol })
    }
}

/// Default cache root: the user cache directory, else the temp directory.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cloud-vm-provisioner")
        .join("images")
}
