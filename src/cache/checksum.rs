use std::sync::OnceLock;

use regex::Regex;

use crate::cloud::ImageChecksum;

fn checksum_line_regex() -> &'static Regex {
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    // `<sha>  <file>` or `<sha> *<file>` (binary mode marker)
    LINE_RE.get_or_init(|| {
        Regex::new(r"^(?P<sha>[A-Fa-f0-9]{64}|[A-Fa-f0-9]{128})\s+\*?(?P<file>\S.*)$")
            .expect("invalid checksum line regex")
    })
}

/// Parsed `SHA256SUMS` / `SHA512SUMS` document.
#[derive(Debug, Clone, Default)]
pub struct ChecksumManifest {
    entries: Vec<(String, String)>,
}

impl ChecksumManifest {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| checksum_line_regex().captures(line.trim()))
            .map(|caps| (caps["sha"].to_ascii_lowercase(), caps["file"].trim().to_string()))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published digest for `file_name`, if listed.
    pub fn digest_for(&self, file_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, file)| file == file_name)
            .map(|(sha, _)| sha.as_str())
    }

    /// Whether the computed `checksum` is published anywhere in the manifest.
    pub fn contains(&self, checksum: &ImageChecksum) -> bool {
        checksum.value().len() == checksum.kind().hex_len()
            && self.entries.iter().any(|(sha, _)| sha == checksum.value())
    }
}
