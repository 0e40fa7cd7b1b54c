//! Version stamps: the remote manifest's `Last-Modified` time, used as a
//! cheap freshness token for the cached image.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{DiskTools, ImageCache};
use crate::cloud::ImageSpec;
use crate::error::{IoContext, ProvisionError};
use crate::helpers::remote::RemoteSource;

/// Name of the per-image file holding the last resolved stamp.
pub const STAMP_FILE: &str = "version.stamp";

/// Format an HTTP date as a sortable `yyyyMMddHHmmss` UTC string.
pub fn format_stamp(last_modified: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc2822(last_modified.trim()).ok()?;
    Some(parsed.with_timezone(&Utc).format("%Y%m%d%H%M%S").to_string())
}

pub fn read_cached_stamp(dir: &Path) -> Result<Option<String>, ProvisionError> {
    let path = dir.join(STAMP_FILE);
    match fs::read_to_string(&path) {
        Ok(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProvisionError::Io {
            context: format!("read {}", path.display()),
            source: e,
        }),
    }
}

fn write_stamp(dir: &Path, stamp: &str) -> Result<(), ProvisionError> {
    fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(STAMP_FILE);
    fs::write(&path, format!("{stamp}\n")).io_context(|| format!("write {}", path.display()))
}

impl<S: RemoteSource, T: DiskTools> ImageCache<S, T> {
    /// Decide which version of `spec` the run works with.
    ///
    /// Without `check_for_update` a cached stamp is returned untouched. Otherwise
    /// the manifest is probed; if that fails the cached stamp (if any) is used.
    pub async fn resolve_version_stamp(
        &self,
        spec: &ImageSpec,
        check_for_update: bool,
        cached_stamp: Option<&str>,
    ) -> Result<String, ProvisionError> {
        if !check_for_update && let Some(stamp) = cached_stamp {
            debug!("using cached stamp {stamp} for {} without checking for updates", spec.key());
            return Ok(stamp.to_string());
        }

        let url = spec
            .manifest_url()
            .map_err(|e| ProvisionError::InvalidInput(format!("manifest URL for {}: {e}", spec.key())))?;

        let probed = self.source.head(&url).await.and_then(|head| {
            let raw = head
                .last_modified
                .ok_or_else(|| ProvisionError::network(&url, "response has no Last-Modified header"))?;
            format_stamp(&raw)
                .ok_or_else(|| ProvisionError::network(&url, format!("unparseable Last-Modified '{raw}'")))
        });

        match (probed, cached_stamp) {
            (Ok(stamp), _) => {
                let dir = self.image_dir(spec);
                write_stamp(&dir, &stamp)?;
                if cached_stamp.is_some_and(|cached| cached != stamp) {
                    debug!("remote image {} changed: {} -> {stamp}", spec.key(), cached_stamp.unwrap_or_default());
                }
                Ok(stamp)
            }
            (Err(err), Some(cached)) => {
                warn!("could not check {} for updates ({err}); using cached version {cached}", spec.key());
                Ok(cached.to_string())
            }
            (Err(err), None) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_dates_become_sortable_stamps() {
        assert_eq!(
            format_stamp("Wed, 21 Oct 2015 07:28:00 GMT").as_deref(),
            Some("20151021072800")
        );
        assert_eq!(
            format_stamp("Tue, 14 Apr 2020 10:12:31 +0200").as_deref(),
            Some("20200414081231")
        );
        assert_eq!(format_stamp("yesterday"), None);
    }

    #[test]
    fn stamp_file_roundtrip_ignores_blank_content() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_cached_stamp(dir.path()).unwrap(), None);

        write_stamp(dir.path(), "20240101000000").unwrap();
        assert_eq!(read_cached_stamp(dir.path()).unwrap().as_deref(), Some("20240101000000"));

        fs::write(dir.path().join(STAMP_FILE), "  \n").unwrap();
        assert_eq!(read_cached_stamp(dir.path()).unwrap(), None);
    }
}
