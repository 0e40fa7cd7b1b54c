use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::checksum::ChecksumManifest;
use super::{DiskTools, ImageCache};
use crate::cloud::ImageSpec;
use crate::error::{IoContext, ProvisionError};
use crate::helpers::remote::RemoteSource;

impl<S: RemoteSource, T: DiskTools> ImageCache<S, T> {
    /// Make sure the published archive for `stamp` is on disk and verified.
    /// Downloads land in `<archive>.tmp` and are renamed once their digest
    /// has been found in the checksum manifest.
    ///
    /// The cache holds one version per image: observing a new stamp removes
    /// every artifact of older ones before the download starts.
    pub async fn ensure_raw_image_downloaded(&self, spec: &ImageSpec, stamp: &str) -> Result<PathBuf, ProvisionError> {
        let dir = self.image_dir(spec);
        fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))?;

        let archive = spec.cached_archive(&dir, stamp);
        if archive.exists() {
            debug!("archive {} already cached", archive.display());
            return Ok(archive);
        }

        prune_stale(&dir, spec.file_stem(), stamp)?;

        let url = spec
            .image_url()
            .map_err(|e| ProvisionError::InvalidInput(format!("image URL for {}: {e}", spec.key())))?;

        // Size is only used for the progress bar.
        let expected_len = match self.source.head(&url).await {
            Ok(head) => head.content_length,
            Err(err) => {
                warn!("could not determine download size: {err}");
                None
            }
        };

        let mut tmp = archive.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        info!("downloading {url}");
        if let Err(err) = self.source.download(&url, &tmp, expected_len).await {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        // Only a verified archive gets its final name, so its presence alone
        // means it was checked.
        if let Err(err) = self.verify_checksum(spec, &tmp).await {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!("failed to remove rejected download {}: {e}", tmp.display());
            }
            return Err(err);
        }
        fs::rename(&tmp, &archive).io_context(|| format!("move {} -> {}", tmp.display(), archive.display()))?;

        Ok(archive)
    }

    async fn verify_checksum(&self, spec: &ImageSpec, archive: &Path) -> Result<(), ProvisionError> {
        let url = spec
            .checksum_url()
            .map_err(|e| ProvisionError::InvalidInput(format!("checksum URL for {}: {e}", spec.key())))?;
        let manifest = ChecksumManifest::parse(&self.source.fetch_text(&url).await?);
        if manifest.is_empty() {
            return Err(ProvisionError::network(&url, "no checksums listed"));
        }

        let computed = spec
            .checksum_kind()
            .digest_file(archive)
            .io_context(|| format!("hash {}", archive.display()))?;

        if !manifest.contains(&computed) {
            if let Some(published) = manifest.digest_for(&spec.archive_file_name()) {
                debug!("{} is published with digest {published}", spec.archive_file_name());
            }
            return Err(ProvisionError::Integrity {
                file: archive.to_path_buf(),
                digest: computed.value().to_string(),
                manifest: url.to_string(),
            });
        }

        debug!("{} {} verified against {url}", computed.kind(), archive.display());
        Ok(())
    }
}

/// Remove every artifact in `dir` belonging to `file_stem` but not to `stamp`.
pub(crate) fn prune_stale(dir: &Path, file_stem: &str, stamp: &str) -> Result<(), ProvisionError> {
    let prefix = format!("{file_stem}-");
    let current = format!("{file_stem}-{stamp}");

    let entries = fs::read_dir(dir).io_context(|| format!("read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.io_context(|| format!("read {}", dir.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || name.starts_with(&current) {
            continue;
        }

        let path = entry.path();
        info!("removing stale cache entry {}", path.display());
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.io_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::prune_stale;
    use std::fs;

    #[test]
    fn prune_keeps_current_stamp_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        for name in [
            "debian-12-azure-amd64-20240101000000.tar.xz",
            "debian-12-azure-amd64-20240101000000.vhd",
            "debian-12-azure-amd64-20240202000000.tar.xz",
            "debian-12-azure-amd64-20240202000000-nocloud.vhd",
            "version.stamp",
            ".lock",
        ] {
            fs::write(p.join(name), b"x").unwrap();
        }
        fs::create_dir(p.join("debian-12-azure-amd64-20240101000000.extract")).unwrap();

        prune_stale(p, "debian-12-azure-amd64", "20240202000000").unwrap();

        let mut left: Vec<String> = fs::read_dir(p)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                ".lock",
                "debian-12-azure-amd64-20240202000000-nocloud.vhd",
                "debian-12-azure-amd64-20240202000000.tar.xz",
                "version.stamp",
            ]
        );
    }
}
