use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{DiskTools, ImageCache};
use crate::cloud::{ArchiveKind, ImageSpec};
use crate::error::{IoContext, ProvisionError};
use crate::helpers::remote::RemoteSource;

/// File extensions recognised as disk images inside an archive.
pub const DISK_EXTENSIONS: [&str; 5] = ["vhd", "vhdx", "img", "raw", "qcow2"];

impl<S: RemoteSource, T: DiskTools> ImageCache<S, T> {
    /// Turn the downloaded archive into the cached dynamic VHD for `stamp`.
    pub fn ensure_extracted_and_converted(
        &self,
        archive: &Path,
        spec: &ImageSpec,
        stamp: &str,
    ) -> Result<PathBuf, ProvisionError> {
        let dir = self.image_dir(spec);
        let disk = spec.cached_disk(&dir, stamp);
        if disk.exists() {
            debug!("converted disk {} already cached", disk.display());
            return Ok(disk);
        }

        let scratch = dir.join(format!("{}-{stamp}.extract", spec.file_stem()));
        let result = self.extract_and_convert(archive, spec.archive(), &scratch, &disk);

        if scratch.exists()
            && let Err(e) = fs::remove_dir_all(&scratch)
        {
            warn!("failed to remove scratch directory {}: {e}", scratch.display());
        }

        result.map(|()| disk)
    }

    fn extract_and_convert(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        scratch: &Path,
        disk: &Path,
    ) -> Result<(), ProvisionError> {
        let source = if kind == ArchiveKind::Disk {
            archive.to_path_buf()
        } else {
            if scratch.exists() {
                fs::remove_dir_all(scratch).io_context(|| format!("remove {}", scratch.display()))?;
            }
            fs::create_dir_all(scratch).io_context(|| format!("create {}", scratch.display()))?;

            info!("extracting {} ({kind})", archive.display());
            self.tools
                .extract(kind, archive, scratch)
                .map_err(|e| ProvisionError::Conversion {
                    source_path: archive.to_path_buf(),
                    reason: format!("extraction failed: {e}"),
                })?;

            newest_disk_image(scratch)?.ok_or_else(|| ProvisionError::Conversion {
                source_path: archive.to_path_buf(),
                reason: "archive contains no disk image".to_string(),
            })?
        };

        let partial = partial_path(disk);
        let _ = fs::remove_file(&partial);

        info!("converting {} to dynamic VHD", source.display());
        if let Err(native) = self.tools.convert_native(&source, &partial) {
            warn!("Convert-VHD failed ({native}); falling back to qemu-img");
            let _ = fs::remove_file(&partial);
            if let Err(fallback) = self.tools.convert_fallback(&source, &partial) {
                let _ = fs::remove_file(&partial);
                return Err(ProvisionError::Conversion {
                    source_path: source,
                    reason: format!("{native}; {fallback}"),
                });
            }
        }

        if let Err(e) = self.tools.compact(&partial) {
            warn!("could not compact {}: {e}", partial.display());
        }

        fs::rename(&partial, disk).io_context(|| format!("move {} -> {}", partial.display(), disk.display()))
    }
}

/// `<name>.vhd` -> `<name>.partial.vhd`, so a crashed run never leaves a file
/// under the final name.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let stem = target.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = target.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    target.with_file_name(format!("{stem}.partial.{ext}"))
}

/// Most recently modified disk image under `dir`.
pub fn newest_disk_image(dir: &Path) -> Result<Option<PathBuf>, ProvisionError> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| ProvisionError::Io {
            context: format!("scan {}", dir.display()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || !is_disk_image(entry.path()) {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, entry.into_path()));
    }

    if candidates.len() > 1 {
        let names: Vec<String> = candidates.iter().map(|(_, p)| p.display().to_string()).collect();
        warn!("archive holds several disk images, using the newest: {}", names.join(", "));
    }

    Ok(candidates.into_iter().max_by_key(|(modified, _)| *modified).map(|(_, p)| p))
}

fn is_disk_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DISK_EXTENSIONS.iter().any(|d| e.eq_ignore_ascii_case(d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn newest_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("old.vhd"), 3600);
        touch(&dir.path().join("nested/new.VHD"), 10);
        touch(&dir.path().join("README.txt"), 0);

        let picked = newest_disk_image(dir.path()).unwrap().unwrap();
        assert_eq!(picked, dir.path().join("nested/new.VHD"));
    }

    #[test]
    fn no_candidate_is_none() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("manifest.json"), 0);
        assert!(newest_disk_image(dir.path()).unwrap().is_none());
    }

    #[test]
    fn partial_name_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/c/ubuntu-20240101000000.vhd")),
            Path::new("/c/ubuntu-20240101000000.partial.vhd")
        );
    }
}
