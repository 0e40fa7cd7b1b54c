use crate::cloud::{ArchiveKind, Distribution, ImageSpec, ImageVariant};

use super::{ReposError, Release, Repository, SourceParameters};

/// First release whose Azure VHD is published as a gzip tarball instead of a
/// zip archive.
const FIRST_TARBALL_RELEASE: u32 = 22;

/// Build the image spec of an Ubuntu release.
///
/// Canonical publishes, per release directory:
/// - `ubuntu-22.04-server-cloudimg-amd64.img` (generic, qcow2 disk)
/// - `ubuntu-22.04-server-cloudimg-amd64-azure.vhd.tar.gz` (azure; `.vhd.zip` before 22.04)
/// - a `.manifest` next to each image, and `SHA256SUMS`
pub fn image_spec(repo: &Repository, release: &Release, variant: ImageVariant) -> Result<ImageSpec, ReposError> {
    let params = SourceParameters::for_release(repo, release)?;
    let version = release.version();

    let (file_stem, archive) = match variant {
        ImageVariant::Generic => (format!("ubuntu-{version}-server-cloudimg-amd64"), ArchiveKind::Disk),
        ImageVariant::Azure => {
            let archive = if major_version(version)? >= FIRST_TARBALL_RELEASE {
                ArchiveKind::TarGz
            } else {
                ArchiveKind::Zip
            };
            (format!("ubuntu-{version}-server-cloudimg-amd64-azure.vhd"), archive)
        }
    };

    Ok(ImageSpec::new(
        Distribution::Ubuntu,
        version,
        release.codename(),
        variant,
        params.url_root,
        file_stem,
        archive,
        params.checksum_file,
        params.checksum_kind,
        params.manifest_suffix,
    ))
}

/// "20.04" -> 20
fn major_version(version: &str) -> Result<u32, ReposError> {
    version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| ReposError::InvalidParameter {
            repository: "ubuntu".to_string(),
            reason: format!("release version '{version}' is not numeric"),
        })
}

#[cfg(test)]
mod tests {
    use super::major_version;

    #[test]
    fn major_version_reads_the_year() {
        assert_eq!(major_version("18.04").unwrap(), 18);
        assert_eq!(major_version("24.04").unwrap(), 24);
        assert!(major_version("devel").is_err());
    }
}
