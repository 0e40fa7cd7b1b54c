use crate::cloud::{ArchiveKind, Distribution, ImageSpec, ImageVariant};

use super::{ReposError, Release, Repository, SourceParameters};

/// Build the image spec of a Debian release.
///
/// Filenames under `<codename>/latest/` look like:
///   debian-12-genericcloud-amd64.tar.xz
///   debian-12-azure-amd64.tar.xz
/// each with a `.json` manifest, and a `SHA512SUMS` for the directory.
/// The tarballs carry a single `disk.raw`.
pub fn image_spec(repo: &Repository, release: &Release, variant: ImageVariant) -> Result<ImageSpec, ReposError> {
    let params = SourceParameters::for_release(repo, release)?;
    let version = release.version();

    let flavour = match variant {
        ImageVariant::Generic => "genericcloud",
        ImageVariant::Azure => "azure",
    };

    Ok(ImageSpec::new(
        Distribution::Debian,
        version,
        release.codename(),
        variant,
        params.url_root,
        format!("debian-{version}-{flavour}-amd64"),
        ArchiveKind::TarXz,
        params.checksum_file,
        params.checksum_kind,
        params.manifest_suffix,
    ))
}
