//! Shared content-addressed-by-basename artifact store (spec §4.3).

use std::fs;
use std::path::Path;

use anyhow::Context;
use log::info;

use crate::config::Config;
use crate::error::{RepoError, Result};
use crate::paths;

pub fn has(config: &Config, filename: &str) -> bool {
    paths::pool_entry(config, filename).exists()
}

/// Copy `external_path` into the pool under `filename` unless already
/// present. Fails with `PoolIo`.
pub fn ingest(config: &Config, external_path: &Path, filename: &str) -> Result<()> {
    if has(config, filename) {
        return Ok(());
    }
    let pool_dir = paths::pool_dir(config);
    fs::create_dir_all(&pool_dir).map_err(|e| RepoError::PoolIo {
        path: pool_dir.clone(),
        source: anyhow::Error::new(e),
    })?;
    let target = paths::pool_entry(config, filename);
    fs::copy(external_path, &target)
        .with_context(|| format!("copying {} into pool", external_path.display()))
        .map_err(|e| RepoError::PoolIo {
            path: target,
            source: e,
        })?;

    Ok(())
}

/// Hardlink the pool entry for `filename` into `target_path`, creating
/// parent directories as needed. Fails with `PoolIo`.
pub fn link_into(config: &Config, filename: &str, target_path: &Path) -> Result<()> {
    let pool_entry = paths::pool_entry(config, filename);
    if !pool_entry.exists() {
        return Err(RepoError::PoolIo {
            path: pool_entry,
            source: anyhow::anyhow!("pool file must exist before linking"),
        });
    }
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| RepoError::PoolIo {
            path: parent.to_path_buf(),
            source: anyhow::Error::new(e),
        })?;
    }
    fs::hard_link(&pool_entry, target_path).map_err(|e| RepoError::PoolIo {
        path: target_path.to_path_buf(),
        source: anyhow::Error::new(e),
    })?;

    Ok(())
}

/// Delete the pool entry for `filename` iff none of `reachable_targets`
/// exist on disk (spec §4.3). `reachable_targets` is the set of paths that
/// *would* reference this pool entry across every known repository.
pub fn gc_if_unreferenced(
    config: &Config,
    filename: &str,
    reachable_targets: &[std::path::PathBuf],
) -> Result<()> {
    if reachable_targets.iter().any(|p| p.exists()) {
        return Ok(());
    }
    let pool_entry = paths::pool_entry(config, filename);
    if pool_entry.exists() {
        info!("Removing no-longer-used pool file: {}", pool_entry.display());
        fs::remove_file(&pool_entry).map_err(|e| RepoError::PoolIo {
            path: pool_entry,
            source: anyhow::Error::new(e),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base: &Path) -> Config {
        Config {
            basedir: base.join("repo").to_string_lossy().to_string(),
            incomingbase: base.join("incoming").to_string_lossy().to_string(),
            max_versions: 3,
        }
    }

    #[test]
    fn ingest_then_link_then_gc() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let external = dir.path().join("foo.pkg");
        fs::write(&external, b"content").unwrap();

        ingest(&config, &external, "foo.pkg").unwrap();
        assert!(has(&config, "foo.pkg"));

        let target = dir.path().join("repo/stable/f/foo/foo.pkg");
        link_into(&config, "foo.pkg", &target).unwrap();
        assert!(target.exists());

        // still reachable via `target`
        gc_if_unreferenced(&config, "foo.pkg", &[target.clone()]).unwrap();
        assert!(has(&config, "foo.pkg"));

        fs::remove_file(&target).unwrap();
        gc_if_unreferenced(&config, "foo.pkg", &[target]).unwrap();
        assert!(!has(&config, "foo.pkg"));
    }

    #[test]
    fn ingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let external = dir.path().join("foo.pkg");
        fs::write(&external, b"content").unwrap();

        ingest(&config, &external, "foo.pkg").unwrap();
        ingest(&config, &external, "foo.pkg").unwrap();
        assert!(has(&config, "foo.pkg"));
    }
}
