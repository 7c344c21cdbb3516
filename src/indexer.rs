//! Regenerates the on-disk index (and installs asset files) for one
//! repository once its catalog has settled.

use std::fs;

use log::warn;
use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::delta;
use crate::error::{RepoError, Result};
use crate::paths;
use crate::toolkit::{self, IndexEntry, WriteIndexOptions};

/// What the engine remembers it still owes a repo's index: the set of
/// source names awaiting delta regeneration, scoped to whichever repo last
/// produced them.
#[derive(Default)]
pub struct PendingDelta {
    pub repo: Option<String>,
    pub sources: Vec<String>,
}

impl PendingDelta {
    pub fn take_for(&mut self, repo: &str) -> Vec<String> {
        if self.repo.as_deref() == Some(repo) {
            self.repo = None;
            std::mem::take(&mut self.sources)
        } else {
            Vec::new()
        }
    }
}

/// Regenerate `repo`'s index file and sync its asset triple. `pending`'s
/// queued sources are drained and rebuilt first, provided they were queued
/// for this same repo.
pub fn reindex(config: &Config, repo: &str, catalog: &Catalog, pending: &mut PendingDelta) -> Result<()> {
    if !paths::is_repo(config, repo) {
        return Err(RepoError::NoSuchRepo(repo.to_string()));
    }

    for source_name in pending.take_for(repo) {
        delta::create_for(config, repo, catalog, &source_name)?;
    }

    // hashing every package file is the expensive step; fan it out across
    // threads the same way the pack's own package scanner parallelizes
    // per-file Sha256 digests.
    let records: Vec<_> = catalog.all_packages().collect();
    let entries: Vec<IndexEntry> = records
        .par_iter()
        .map(|p| {
            let shard = paths::shard_for_source(&p.source_name);
            let uri = format!("{shard}/{}/{}", p.source_name, p.filename);
            let target = paths::package_target(config, repo, &p.source_name, &p.filename);
            let size = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
            let sha256 = sha256_of(&target).unwrap_or_default();
            IndexEntry {
                binary_name: p.binary_name.clone(),
                source_name: p.source_name.clone(),
                version: p.meta.version.clone(),
                release: p.release,
                distribution_release: p.meta.distribution_release.clone(),
                architecture: p.meta.architecture.clone(),
                uri,
                size,
                sha256,
            }
        })
        .collect();

    let repo_dir = paths::repo_root(config, repo);
    toolkit::write_index(&repo_dir, &entries, &WriteIndexOptions::default())
        .map_err(RepoError::Other)?;

    install_assets(config, repo);

    Ok(())
}

fn sha256_of(path: &std::path::Path) -> Option<String> {
    use faster_hex::hex_string;
    use sha2::{Digest, Sha256};
    let mut f = fs::File::open(path).ok()?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher).ok()?;
    Some(hex_string(&hasher.finalize()))
}

/// Copy the three known asset files from `<repo>.assets/` over the repo
/// root. Missing assets are fine; copy errors are logged, never fatal.
fn install_assets(config: &Config, repo: &str) {
    let assets_dir = paths::assets_dir(config, repo);
    let repo_dir = paths::repo_root(config, repo);
    for name in paths::known_asset_files() {
        let src = assets_dir.join(name);
        if !src.exists() {
            continue;
        }
        let dst = repo_dir.join(name);
        if let Err(e) = fs::copy(&src, &dst) {
            warn!("{}", RepoError::AssetCopyFailed(name.to_string(), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{HistoryEntry, PkgMeta};
    use crate::meta::RepoPackage;
    use std::path::Path;

    fn test_config(base: &Path) -> Config {
        Config {
            basedir: base.join("repo").to_string_lossy().to_string(),
            incomingbase: base.join("incoming").to_string_lossy().to_string(),
            max_versions: 3,
        }
    }

    fn pkg(binary: &str, release: u32) -> RepoPackage {
        RepoPackage::new(
            format!("{binary}-1.0-{release}-1-x86_64.pkg"),
            PkgMeta {
                binary_name: binary.to_string(),
                source_name: binary.to_string(),
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
    fn reindex_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let catalog = Catalog::new();
        let mut pending = PendingDelta::default();
        assert!(reindex(&config, "stable", &catalog, &mut pending).is_err());
    }

    #[test]
    fn reindex_writes_index_and_installs_assets() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(paths::repo_root(&config, "stable")).unwrap();
        fs::write(paths::repo_marker(&config, "stable"), b"").unwrap();

        let target = paths::package_target(&config, "stable", "foo", "foo-1.0-1-1-x86_64.pkg");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"content").unwrap();

        let assets = paths::assets_dir(&config, "stable");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("components.xml"), b"<Components/>").unwrap();

        let mut catalog = Catalog::new();
        catalog.append(pkg("foo", 1));
        let mut pending = PendingDelta::default();

        reindex(&config, "stable", &catalog, &mut pending).unwrap();

        assert!(paths::repo_index_file(&config, "stable").exists());
        assert!(paths::repo_root(&config, "stable")
            .join("components.xml")
            .exists());
    }

    #[test]
    fn pending_delta_only_fires_for_matching_repo() {
        let mut pending = PendingDelta {
            repo: Some("stable".to_string()),
            sources: vec!["foo".to_string()],
        };
        assert!(pending.take_for("unstable").is_empty());
        assert_eq!(pending.take_for("stable"), vec!["foo".to_string()]);
        assert!(pending.take_for("stable").is_empty());
    }
}
