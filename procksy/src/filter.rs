//! Client/target allow-deny filtering.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::warn;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    None,
    Allow,
    Deny,
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::None
    }
}

/// An address filter over either the client's peer IP (checked without a
/// port) or a CONNECT target (checked with its port). Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    mode: FilterMode,
    values: HashSet<String>,
}

/// Deserialized shape of a `client_filter`/`target_filter` config stanza.
/// Every field is optional so a partial stanza merges onto the defaults,
/// matching the default-on-missing-key merge used elsewhere in this crate's
/// config decoding.
#[derive(Debug, Deserialize, Default)]
pub struct RawFilter {
    pub mode: Option<FilterMode>,
    pub values: Option<Vec<String>>,
    pub filepath: Option<String>,
}

impl AddressFilter {
    pub fn new(mode: FilterMode, values: HashSet<String>) -> Self {
        Self { mode, values }
    }

    pub fn from_raw(raw: RawFilter) -> Self {
        let mut values = HashSet::new();
        if let Some(inline) = raw.values {
            values.extend(inline.iter().map(|v| v.trim().to_lowercase()));
        }
        if let Some(path) = raw.filepath {
            values.extend(values_from_filepath(Path::new(&path)));
        }
        Self {
            mode: raw.mode.unwrap_or_default(),
            values,
        }
    }

    /// `AddressFilter.is_allowed(candidate, port?) -> bool`.
    pub fn is_allowed(&self, candidate: &str, port: Option<u16>) -> bool {
        if self.mode == FilterMode::None {
            return true;
        }
        let candidate = candidate.to_lowercase();
        let hit = self.values.contains(&candidate)
            || port
                .map(|p| self.values.contains(&format!("{candidate}:{p}")))
                .unwrap_or(false);
        match self.mode {
            FilterMode::None => true,
            FilterMode::Allow => hit,
            FilterMode::Deny => !hit,
        }
    }
}

fn values_from_filepath(path: &Path) -> Vec<String> {
    if !path.is_file() {
        warn!("ignored, file not found: {}", path.display());
        return Vec::new();
    }
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|line| !line.is_empty())
            .collect(),
        Err(err) => {
            warn!("failed to read filter file {}: {err}", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(mode: FilterMode, values: &[&str]) -> AddressFilter {
        AddressFilter::new(mode, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn none_mode_allows_everything() {
        let f = filter(FilterMode::None, &[]);
        assert!(f.is_allowed("10.0.0.1", None));
        assert!(f.is_allowed("evil.example", Some(80)));
    }

    #[test]
    fn allow_mode_is_monotone_in_the_set() {
        let f = filter(FilterMode::Allow, &["10.0.0.1"]);
        assert!(f.is_allowed("10.0.0.1", None));
        assert!(!f.is_allowed("192.0.2.7", None));
    }

    #[test]
    fn deny_mode_is_the_complement() {
        let f = filter(FilterMode::Deny, &["evil.example:80"]);
        assert!(!f.is_allowed("evil.example", Some(80)));
        assert!(f.is_allowed("evil.example", Some(443)));
        assert!(f.is_allowed("good.example", Some(80)));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = filter(FilterMode::Allow, &["Evil.Example"]);
        assert!(f.is_allowed("evil.example", None));
    }

    #[test]
    fn host_and_host_port_both_match() {
        let f = filter(FilterMode::Allow, &["a.example", "b.example:80"]);
        assert!(f.is_allowed("a.example", Some(9999)));
        assert!(f.is_allowed("b.example", Some(80)));
        assert!(!f.is_allowed("b.example", Some(81)));
    }
}
