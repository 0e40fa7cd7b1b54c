use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::convert::partial_path;
use super::{DiskTools, ImageCache};
use crate::cloud::{ImageSpec, ImageVariant};
use crate::error::{IoContext, ProvisionError};
use crate::helpers::remote::RemoteSource;

/// cloud-init drop-in that pins the datasource search order.
pub const DATASOURCE_CFG: &str = "/etc/cloud/cloud.cfg.d/90_dpkg.cfg";
pub const NOCLOUD_DATASOURCE_LIST: &str = "datasource_list: [ NoCloud, None ]\n";

/// `<stem>-<stamp>.vhd` -> `<stem>-<stamp>-nocloud.vhd`
pub fn nocloud_disk_path(vhd: &Path) -> PathBuf {
    let stem = vhd.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    vhd.with_file_name(format!("{stem}-nocloud.vhd"))
}

impl<S: RemoteSource, T: DiskTools> ImageCache<S, T> {
    /// Switch an Azure image to the NoCloud datasource when the caller wants
    /// to provision it like a generic image.
    ///
    /// The patched copy is kept next to the original and reused for the same
    /// stamp. Other images are returned unchanged.
    pub fn maybe_convert_datasource_mode(
        &self,
        vhd: &Path,
        spec: &ImageSpec,
        wants_offline: bool,
    ) -> Result<PathBuf, ProvisionError> {
        if !wants_offline || spec.variant() != ImageVariant::Azure {
            return Ok(vhd.to_path_buf());
        }

        let target = nocloud_disk_path(vhd);
        if target.exists() {
            debug!("NoCloud copy {} already cached", target.display());
            return Ok(target);
        }

        let partial = partial_path(&target);
        info!("patching {} to use the NoCloud datasource", vhd.display());
        fs::copy(vhd, &partial).io_context(|| format!("copy {} -> {}", vhd.display(), partial.display()))?;

        let patched = self
            .tools
            .rewrite_guest_file(&partial, DATASOURCE_CFG, NOCLOUD_DATASOURCE_LIST)
            .and_then(|()| {
                fs::rename(&partial, &target)
                    .io_context(|| format!("move {} -> {}", partial.display(), target.display()))
            });

        if let Err(err) = patched {
            if let Err(e) = fs::remove_file(&partial) {
                warn!("failed to remove {}: {e}", partial.display());
            }
            return Err(err);
        }
        Ok(target)
    }
}
