//! Per-repository package catalog (spec §3, §4.2).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RepoError, Result};
use crate::meta::RepoPackage;
use crate::paths;

const CATALOG_FORMAT: &str = "repoman-catalog-v1";

#[derive(Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(rename = "_format")]
    format: String,
    sources: BTreeMap<String, Vec<RepoPackage>>,
}

/// In-memory catalog for one repository: `sourceName -> ordered list of
/// RepoPackage`, insertion order preserved per source.
#[derive(Default)]
pub struct Catalog {
    sources: BTreeMap<String, Vec<RepoPackage>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            sources: BTreeMap::new(),
        }
    }

    /// Load the persisted catalog for `repo`, or an empty one if no file
    /// exists yet. A present-but-unparseable file is `CatalogCorrupt`
    /// (fatal — the process must not silently drop records).
    pub fn load(config: &Config, repo: &str) -> Result<Self> {
        let path = paths::repo_catalog_file(config, repo);
        if !path.exists() {
            return Ok(Catalog::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| RepoError::CatalogCorrupt {
            repo: repo.to_string(),
            source: anyhow::Error::new(e),
        })?;
        let doc: CatalogDocument =
            serde_json::from_str(&content).map_err(|e| RepoError::CatalogCorrupt {
                repo: repo.to_string(),
                source: anyhow::Error::new(e),
            })?;
        if doc.format != CATALOG_FORMAT {
            return Err(RepoError::CatalogCorrupt {
                repo: repo.to_string(),
                source: anyhow::anyhow!(
                    "unrecognized catalog format tag: {} (expected {})",
                    doc.format,
                    CATALOG_FORMAT
                ),
            });
        }

        Ok(Catalog {
            sources: doc.sources,
        })
    }

    /// Atomically persist this catalog for `repo`: write to a temp file in
    /// the same directory, then rename over the destination.
    pub fn save(&self, config: &Config, repo: &str) -> Result<()> {
        let path = paths::repo_catalog_file(config, repo);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| RepoError::CatalogWrite {
            repo: repo.to_string(),
            source: anyhow::Error::new(e),
        })?;

        let doc = CatalogDocument {
            format: CATALOG_FORMAT.to_string(),
            sources: self.sources.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&doc).map_err(|e| RepoError::CatalogWrite {
            repo: repo.to_string(),
            source: anyhow::Error::new(e),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| RepoError::CatalogWrite {
            repo: repo.to_string(),
            source: anyhow::Error::new(e),
        })?;
        use std::io::Write;
        tmp.write_all(&serialized)
            .and_then(|_| tmp.flush())
            .with_context(|| format!("writing catalog for {repo}"))
            .map_err(|e| RepoError::CatalogWrite {
                repo: repo.to_string(),
                source: e,
            })?;
        tmp.persist(&path).map_err(|e| RepoError::CatalogWrite {
            repo: repo.to_string(),
            source: anyhow::anyhow!(e.to_string()),
        })?;

        Ok(())
    }

    /// Append `pkg`. If an equal record is already present, the catalog is
    /// left unchanged and `Ok(false)` is returned (non-fatal duplicate); a
    /// genuine append returns `Ok(true)`.
    pub fn append(&mut self, pkg: RepoPackage) -> bool {
        let list = self.sources.entry(pkg.source_name.clone()).or_default();
        if list.contains(&pkg) {
            return false;
        }
        list.push(pkg);

        true
    }

    /// Idempotent: does nothing if `pkg` is absent.
    pub fn remove(&mut self, pkg: &RepoPackage) {
        if let Some(list) = self.sources.get_mut(&pkg.source_name) {
            list.retain(|p| p != pkg);
            if list.is_empty() {
                self.sources.remove(&pkg.source_name);
            }
        }
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.sources.contains_key(source_name)
    }

    pub fn get(&self, source_name: &str) -> &[RepoPackage] {
        self.sources
            .get(source_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn source_names(&self) -> impl Iterator<Item = &String> {
        self.sources.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn all_packages(&self) -> impl Iterator<Item = &RepoPackage> {
        self.sources.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{HistoryEntry, PkgMeta};

    fn test_config(base: &Path) -> Config {
        Config {
            basedir: base.join("repo").to_string_lossy().to_string(),
            incomingbase: base.join("incoming").to_string_lossy().to_string(),
            max_versions: 3,
        }
    }

    fn pkg(source: &str, release: u32) -> RepoPackage {
        RepoPackage::new(
            format!("{source}-1.0-{release}-1-x86_64.pkg"),
            PkgMeta {
                binary_name: source.to_string(),
                source_name: source.to_string(),
                version: "1.0".to_string(),
                release,
                distribution_release: "1".to_string(),
                architecture: "x86_64".to_string(),
                history: vec![HistoryEntry {
                    version: "1.0".to_string(),
                    release,
                }],
            },
        )
    }

    #[test]
    fn append_rejects_exact_duplicates() {
        let mut catalog = Catalog::new();
        assert!(catalog.append(pkg("foo", 1)));
        assert!(!catalog.append(pkg("foo", 1)));
        assert_eq!(catalog.get("foo").len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut catalog = Catalog::new();
        catalog.append(pkg("foo", 1));
        catalog.remove(&pkg("foo", 1));
        catalog.remove(&pkg("foo", 1));
        assert!(!catalog.contains("foo"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut catalog = Catalog::new();
        catalog.append(pkg("foo", 1));
        catalog.append(pkg("foo", 2));
        catalog.save(&config, "stable").unwrap();

        let loaded = Catalog::load(&config, "stable").unwrap();
        assert_eq!(loaded.get("foo").len(), 2);
        assert_eq!(loaded.get("foo")[0].release, 1);
        assert_eq!(loaded.get("foo")[1].release, 2);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let loaded = Catalog::load(&config, "stable").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_rejects_bad_format_tag() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = paths::repo_catalog_file(&config, "stable");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"_format":"something-else","sources":{}}"#).unwrap();

        assert!(Catalog::load(&config, "stable").is_err());
    }
}
