pub mod debian;
mod models;
pub mod ubuntu;

use reqwest::Url;

pub use models::{Release, Repository}; // Re-export the model types to callers.

use crate::cloud::{ChecksumKind, ImageSpec, ImageVariant};
use crate::error::ProvisionError;

/// Index shipped with the binary.
const BUILTIN_INDEX: &str = include_str!("../../resources/indexes.json");

/// Variant used when an identifier carries no `-azure`/`-generic` suffix
/// and the repository does not say otherwise.
const FALLBACK_VARIANT: ImageVariant = ImageVariant::Generic;

const VARIANTS: [ImageVariant; 2] = [ImageVariant::Generic, ImageVariant::Azure];

/// The closed catalog of supported images, loaded once per invocation and
/// passed explicitly to whoever needs it.
#[derive(Debug, Clone)]
pub struct Catalog {
    repositories: Vec<Repository>,
}

impl Catalog {
    /// Catalog compiled into the binary.
    pub fn builtin() -> Result<Self, ReposError> {
        Self::from_json_str(BUILTIN_INDEX)
    }

    /// Initialize from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ReposError> {
        let repositories: Vec<Repository> = serde_json::from_str(json).map_err(ReposError::Json)?;
        if repositories.is_empty() {
            return Err(ReposError::Empty);
        }
        for repo in &repositories {
            default_variant(repo)?;
        }
        Ok(Self { repositories })
    }

    /// Every identifier `resolve` accepts in its canonical (version) form: the
    /// bare version for the repository's default variant, plus the suffixed
    /// form of the other one.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for repo in &self.repositories {
            let default = default_variant(repo).unwrap_or(FALLBACK_VARIANT);
            for release in repo.releases() {
                ids.push(release.version().to_string());
                for variant in VARIANTS.into_iter().filter(|v| *v != default) {
                    ids.push(format!("{}-{}", release.version(), variant.as_str()));
                }
            }
        }
        ids
    }

    /// Map a caller supplied identifier to its image.
    ///
    /// Accepted forms: `22.04`, `jammy`, `ubuntu-22.04`, each optionally with
    /// an `-azure` or `-generic` suffix. Without a suffix the repository's
    /// `default_variant` applies; Ubuntu defaults to the archived Azure VHD.
    pub fn resolve(&self, id: &str) -> Result<ImageSpec, ProvisionError> {
        let unsupported = || ProvisionError::UnsupportedVersion {
            version: id.to_string(),
            supported: self.identifiers().join(", "),
        };

        let normalized = id.trim().to_ascii_lowercase();
        let (release_id, requested) = VARIANTS
            .into_iter()
            .find_map(|variant| {
                normalized
                    .strip_suffix(variant.as_str())
                    .and_then(|rest| rest.strip_suffix('-'))
                    .map(|rest| (rest, Some(variant)))
            })
            .unwrap_or((normalized.as_str(), None));

        let candidates = self.repositories.iter().filter_map(|repo| {
            let scoped = match release_id.strip_prefix(repo.name()).and_then(|r| r.strip_prefix('-')) {
                Some(rest) => rest,
                None => release_id,
            };
            repo.release(scoped).map(|release| (repo, release))
        });

        let mut found = None;
        for candidate in candidates {
            if found.is_some() {
                // Versions and codenames are unique across distributions today;
                // refuse to guess if an index ever breaks that.
                return Err(unsupported());
            }
            found = Some(candidate);
        }
        let (repo, release) = found.ok_or_else(unsupported)?;
        let variant = match requested {
            Some(variant) => variant,
            None => default_variant(repo)?,
        };

        let spec = match repo.name() {
            "ubuntu" => ubuntu::image_spec(repo, release, variant)?,
            "debian" => debian::image_spec(repo, release, variant)?,
            other => return Err(ReposError::UnknownRepository(other.to_string()).into()),
        };
        tracing::debug!(
            "resolved '{id}' to {} {} ({}): {}",
            spec.distribution(),
            spec.version(),
            spec.codename(),
            spec.archive_file_name()
        );
        Ok(spec)
    }
}

/// Variant a bare identifier selects in `repo`.
fn default_variant(repo: &Repository) -> Result<ImageVariant, ReposError> {
    match repo.parameter("default_variant") {
        Some(raw) => raw.parse().map_err(|reason| ReposError::InvalidParameter {
            repository: repo.name().to_string(),
            reason,
        }),
        None => Ok(FALLBACK_VARIANT),
    }
}

/// Checksum and manifest settings shared by every release of a repository.
pub(crate) struct SourceParameters {
    pub(crate) url_root: Url,
    pub(crate) checksum_file: String,
    pub(crate) checksum_kind: ChecksumKind,
    pub(crate) manifest_suffix: String,
}

impl SourceParameters {
    pub(crate) fn for_release(repo: &Repository, release: &Release) -> Result<Self, ReposError> {
        let param = |key: &'static str| {
            repo.parameter(key).map(str::to_string).ok_or_else(|| ReposError::MissingParameter {
                repository: repo.name().to_string(),
                key,
            })
        };

        let root = repo.release_root(release.codename());
        let url_root = Url::parse(&root).map_err(|e| ReposError::InvalidUrl {
            repository: repo.name().to_string(),
            reason: format!("{root}: {e}"),
        })?;

        let checksum_kind = param("checksum_kind")?
            .parse()
            .map_err(|reason| ReposError::InvalidParameter {
                repository: repo.name().to_string(),
                reason,
            })?;

        Ok(Self {
            url_root,
            checksum_file: param("checksum_file")?,
            checksum_kind,
            manifest_suffix: param("manifest_suffix")?,
        })
    }
}

/// ---- Errors ----
#[derive(thiserror::Error, Debug)]
pub enum ReposError {
    #[error("image index contains no repositories")]
    Empty,
    #[error("repository '{0}' is not supported")]
    UnknownRepository(String),
    #[error("repository '{repository}' is missing parameter '{key}'")]
    MissingParameter { repository: String, key: &'static str },
    #[error("repository '{repository}' has an invalid parameter: {reason}")]
    InvalidParameter { repository: String, reason: String },
    #[error("repository '{repository}' has an invalid URL: {reason}")]
    InvalidUrl { repository: String, reason: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ReposError> for ProvisionError {
    fn from(err: ReposError) -> Self {
        ProvisionError::InvalidInput(format!("image index: {err}"))
    }
}
