use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Public model; serde is confined to this module tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub(crate) name: String,
    /// URL template; the first `{}` is replaced by the release codename.
    pub(crate) url: String,
    #[serde(rename = "parameters")]
    pub(crate) other_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub(crate) releases: Vec<Release>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub(crate) version: String,
    pub(crate) codename: String,
}

impl Repository {
    // Borrowing getters (no clones).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.other_parameters.as_ref()?.get(key).map(String::as_str)
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Look a release up by version ("22.04") or codename ("jammy").
    pub fn release(&self, id: &str) -> Option<&Release> {
        self.releases
            .iter()
            .find(|r| r.version.eq_ignore_ascii_case(id) || r.codename.eq_ignore_ascii_case(id))
    }

    /// Expand the URL template for `codename`, always ending with `/`.
    pub fn release_root(&self, codename: &str) -> String {
        let root = self.url.replacen("{}", codename, 1);
        if root.ends_with('/') { root } else { format!("{root}/") }
    }
}

impl Release {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn codename(&self) -> &str {
        &self.codename
    }
}
