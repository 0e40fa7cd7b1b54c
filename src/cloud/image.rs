use reqwest::Url;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Sha256,
    Sha512,
}

impl ChecksumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Sha256 => 64,
            ChecksumKind::Sha512 => 128,
        }
    }

    /// Hash the file at `path` with this algorithm, streaming its contents.
    pub fn digest_file(&self, path: &Path) -> io::Result<ImageChecksum> {
        let file = File::open(path)?;
        let value = match self {
            ChecksumKind::Sha256 => hash_reader::<Sha256>(file)?,
            ChecksumKind::Sha512 => hash_reader::<Sha512>(file)?,
        };
        Ok(ImageChecksum::new(*self, value))
    }
}

fn hash_reader<D: Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumKind::Sha256),
            "sha512" => Ok(ChecksumKind::Sha512),
            other => Err(format!("unknown checksum algorithm '{other}'")),
        }
    }
}

/// Convenience wrapper that couples the checksum value with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChecksum {
    kind: ChecksumKind,
    value: String,
}

impl ImageChecksum {
    pub fn new(kind: ChecksumKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// How a published image is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarXz,
    /// A bare disk image that needs no extraction.
    Disk,
}

impl ArchiveKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => ".zip",
            ArchiveKind::TarGz => ".tar.gz",
            ArchiveKind::TarXz => ".tar.xz",
            ArchiveKind::Disk => ".img",
        }
    }

    /// Build the extraction command unpacking `archive` into `dest`.
    ///
    /// Returns `None` for [`ArchiveKind::Disk`]: the download already is the
    /// disk image.
    pub fn extract_command(&self, archive: &Path, dest: &Path) -> Option<Command> {
        let mut cmd = match self {
            ArchiveKind::Zip => {
                let mut cmd = Command::new("unzip");
                cmd.args(["-o", "-q"]).arg(archive).arg("-d").arg(dest);
                cmd
            }
            ArchiveKind::TarGz => {
                let mut cmd = Command::new("tar");
                cmd.arg("-xzf").arg(archive).arg("-C").arg(dest);
                cmd
            }
            ArchiveKind::TarXz => {
                let mut cmd = Command::new("tar");
                cmd.arg("-xJf").arg(archive).arg("-C").arg(dest);
                cmd
            }
            ArchiveKind::Disk => return None,
        };
        cmd.current_dir(dest);
        Some(cmd)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarXz => "tar.xz",
            ArchiveKind::Disk => "disk",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Ubuntu,
    Debian,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Ubuntu => "ubuntu",
            Distribution::Debian => "debian",
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image flavour published by the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant {
    /// Generic cloud image, provisioned through the NoCloud disc.
    Generic,
    /// Azure image, provisioned through the OVF environment disc.
    Azure,
}

impl ImageVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageVariant::Generic => "generic",
            ImageVariant::Azure => "azure",
        }
    }
}

impl FromStr for ImageVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(ImageVariant::Generic),
            "azure" => Ok(ImageVariant::Azure),
            other => Err(format!("unknown image variant '{other}'")),
        }
    }
}

/// First-boot provisioning protocol the guest expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    NoCloud,
    Azure,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::NoCloud => "NoCloud",
            Protocol::Azure => "Azure",
        })
    }
}

/// One entry of the image catalog: everything needed to locate, verify and
/// unpack a published cloud image.
#[derive(Debug, Clone)]
pub struct ImageSpec {
    distribution: Distribution,
    version: String,
    codename: String,
    variant: ImageVariant,
    url_root: Url,
    file_stem: String,
    archive: ArchiveKind,
    checksum_file: String,
    checksum_kind: ChecksumKind,
    manifest_suffix: String,
}

impl ImageSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        distribution: Distribution,
        version: impl Into<String>,
        codename: impl Into<String>,
        variant: ImageVariant,
        url_root: Url,
        file_stem: impl Into<String>,
        archive: ArchiveKind,
        checksum_file: impl Into<String>,
        checksum_kind: ChecksumKind,
        manifest_suffix: impl Into<String>,
    ) -> Self {
        Self {
            distribution,
            version: version.into(),
            codename: codename.into(),
            variant,
            url_root,
            file_stem: file_stem.into(),
            archive,
            checksum_file: checksum_file.into(),
            checksum_kind,
            manifest_suffix: manifest_suffix.into(),
        }
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Release version
    /// eg. 22.04
    pub fn version(&self) -> &str {
        &self.version
    }

    /// eg. jammy
    pub fn codename(&self) -> &str {
        &self.codename
    }

    pub fn variant(&self) -> ImageVariant {
        self.variant
    }

    /// Same image served from another mirror.
    #[cfg(test)]
    pub fn with_url_root(mut self, url_root: Url) -> Self {
        self.url_root = url_root;
        self
    }

    /// Published file name without the archive extension.
    pub fn file_stem(&self) -> &str {
        &self.file_stem
    }

    pub fn archive(&self) -> ArchiveKind {
        self.archive
    }

    pub fn checksum_kind(&self) -> ChecksumKind {
        self.checksum_kind
    }

    /// Stable key naming this image in the cache, eg. `ubuntu-22.04-azure`.
    pub fn key(&self) -> String {
        match self.variant {
            ImageVariant::Generic => format!("{}-{}", self.distribution, self.version),
            ImageVariant::Azure => format!("{}-{}-azure", self.distribution, self.version),
        }
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}{}", self.file_stem, self.archive.extension())
    }

    pub fn manifest_file_name(&self) -> String {
        format!("{}{}", self.file_stem, self.manifest_suffix)
    }

    pub fn image_url(&self) -> Result<Url, url::ParseError> {
        self.url_root.join(&self.archive_file_name())
    }

    pub fn manifest_url(&self) -> Result<Url, url::ParseError> {
        self.url_root.join(&self.manifest_file_name())
    }

    pub fn checksum_url(&self) -> Result<Url, url::ParseError> {
        self.url_root.join(&self.checksum_file)
    }

    /// Protocol the unmodified image boots with.
    pub fn protocol(&self) -> Protocol {
        match self.variant {
            ImageVariant::Generic => Protocol::NoCloud,
            ImageVariant::Azure => Protocol::Azure,
        }
    }

    /// Path of the archive for `stamp` inside `dir`.
    pub fn cached_archive(&self, dir: &Path, stamp: &str) -> PathBuf {
        dir.join(format!("{}-{}{}", self.file_stem, stamp, self.archive.extension()))
    }

    /// Path of the converted disk for `stamp` inside `dir`.
    pub fn cached_disk(&self, dir: &Path, stamp: &str) -> PathBuf {
        dir.join(format!("{}-{}.vhd", self.file_stem, stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec() -> ImageSpec {
        ImageSpec::new(
            Distribution::Debian,
            "12",
            "bookworm",
            ImageVariant::Azure,
            Url::parse("https://cloud.debian.org/images/cloud/bookworm/latest/").unwrap(),
            "debian-12-azure-amd64",
            ArchiveKind::TarXz,
            "SHA512SUMS",
            ChecksumKind::Sha512,
            ".json",
        )
    }

    #[test]
    fn urls_are_joined_under_root() {
        let spec = spec();
        assert_eq!(
            spec.image_url().unwrap().as_str(),
            "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-azure-amd64.tar.xz"
        );
        assert_eq!(
            spec.manifest_url().unwrap().as_str(),
            "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-azure-amd64.json"
        );
        assert_eq!(
            spec.checksum_url().unwrap().as_str(),
            "https://cloud.debian.org/images/cloud/bookworm/latest/SHA512SUMS"
        );
        assert_eq!(spec.key(), "debian-12-azure");
        assert_eq!(spec.protocol(), Protocol::Azure);
    }

    #[test]
    fn cached_paths_carry_the_stamp() {
        let spec = spec();
        let dir = Path::new("/cache");
        assert_eq!(
            spec.cached_archive(dir, "20240101120000"),
            Path::new("/cache/debian-12-azure-amd64-20240101120000.tar.xz")
        );
        assert_eq!(
            spec.cached_disk(dir, "20240101120000"),
            Path::new("/cache/debian-12-azure-amd64-20240101120000.vhd")
        );
    }

    #[test]
    fn digest_file_matches_known_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let sha256 = ChecksumKind::Sha256.digest_file(file.path()).unwrap();
        assert_eq!(
            sha256.value(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256.value().len(), ChecksumKind::Sha256.hex_len());

        let sha512 = ChecksumKind::Sha512.digest_file(file.path()).unwrap();
        assert!(sha512.value().starts_with("ddaf35a193617aba"));
        assert_eq!(sha512.value().len(), ChecksumKind::Sha512.hex_len());
    }

    #[test]
    fn disk_images_need_no_extraction() {
        let p = Path::new("/tmp/a");
        assert!(ArchiveKind::Disk.extract_command(p, p).is_none());
        let cmd = ArchiveKind::TarXz.extract_command(p, p).unwrap();
        assert_eq!(cmd.get_program(), "tar");
        assert!(cmd.get_args().any(|a| a == "-xJf"));
    }

    #[test]
    fn checksum_kind_parses_case_insensitively() {
        assert_eq!("SHA512".parse::<ChecksumKind>().unwrap(), ChecksumKind::Sha512);
        assert!("md5".parse::<ChecksumKind>().is_err());
    }
}
