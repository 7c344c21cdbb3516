//! Data model shared by the catalog, pool, delta, and indexer modules
//! (spec §3).

use serde::{Deserialize, Serialize};

/// One entry of a package's build history; `history[0]` is the newest and
/// always matches the owning `PkgMeta.release`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: String,
    pub release: u32,
}

/// Metadata produced by inspecting a pkg archive (`toolkit::inspect`).
/// Only the fields needed to compute delta names and display versions are
/// kept — the full toolkit metadata graph is never serialized (spec §9).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgMeta {
    pub binary_name: String,
    pub source_name: String,
    pub version: String,
    pub release: u32,
    pub distribution_release: String,
    pub architecture: String,
    pub history: Vec<HistoryEntry>,
}

/// The catalog record (spec §3). Equality is the `(filename, source_name,
/// release)` triple — *not* the embedded metadata, matching spec's fix for
/// the distilled source's equality typo (spec §9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoPackage {
    pub filename: String,
    pub source_name: String,
    pub binary_name: String,
    pub release: u32,
    pub meta: PkgMeta,
}

impl RepoPackage {
    pub fn new(filename: String, meta: PkgMeta) -> Self {
        RepoPackage {
            filename,
            source_name: meta.source_name.clone(),
            binary_name: meta.binary_name.clone(),
            release: meta.release,
            meta,
        }
    }
}

impl PartialEq for RepoPackage {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.source_name == other.source_name
            && self.release == other.release
    }
}

impl Eq for RepoPackage {}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str, binary: &str, release: u32) -> PkgMeta {
        PkgMeta {
            binary_name: binary.to_string(),
            source_name: source.to_string(),
            version: "1.0".to_string(),
            release,
            distribution_release: "1".to_string(),
            architecture: "x86_64".to_string(),
            history: vec![HistoryEntry {
                version: "1.0".to_string(),
                release,
            }],
        }
    }

    #[test]
    fn equality_is_the_filename_source_release_triple() {
        let a = RepoPackage::new("foo-1.0-1-1-x86_64.pkg".into(), meta("foo", "foo", 1));
        let mut b = a.clone();
        // differing embedded metadata should not affect equality
        b.meta.version = "9.9".to_string();
        assert_eq!(a, b);

        let mut c = a.clone();
        c.release = 2;
        assert_ne!(a, c);
    }
}
