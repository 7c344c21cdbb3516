//! Delta artifact bookkeeping: the set of derived `.delta.pkg` files between
//! releases of the same binary, and the logic that keeps them consistent
//! with the catalog they're generated from.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::meta::RepoPackage;
use crate::paths;
use crate::pool;
use crate::toolkit::DeltaBuilder;

/// Filename for the delta artifact that upgrades `from.release` to
/// `to.release` of the same binary.
pub fn name_for_pair(from: &RepoPackage, to: &RepoPackage) -> String {
    format!(
        "{}-{}-{}-{}-{}.delta.pkg",
        to.binary_name, from.release, to.release, to.meta.distribution_release, to.meta.architecture
    )
}

/// Every on-disk filename in `p`'s package directory that names a delta
/// either from or to `p`'s release, for the same binary. Anchored to the
/// exact `<binary>-<from>-<to>-<distRel>-<arch>.delta.pkg` field layout (spec
/// §4.4) rather than a bare substring test, so a release number that happens
/// to equal `distRel` can't produce a false match.
pub fn enumerate_involving(config: &Config, repo: &str, p: &RepoPackage) -> Result<Vec<PathBuf>> {
    let dir = paths::package_dir(config, repo, &p.source_name);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let binary_prefix = format!("{}-", p.binary_name);
    let fixed_suffix = format!(
        "-{}-{}.delta.pkg",
        p.meta.distribution_release, p.meta.architecture
    );

    let mut matches = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy().into_owned();
        if !name.starts_with(&binary_prefix) || !name.ends_with(&fixed_suffix) {
            continue;
        }
        let middle = &name[binary_prefix.len()..name.len() - fixed_suffix.len()];
        let Some((from_str, to_str)) = middle.split_once('-') else {
            continue;
        };
        let (Ok(from_release), Ok(to_release)) = (from_str.parse::<u32>(), to_str.parse::<u32>())
        else {
            continue;
        };
        if from_release == p.release || to_release == p.release {
            matches.push(entry.path());
        }
    }

    Ok(matches)
}

/// Every path that would reference `filename` if every known repository held
/// a hardlink to it under `source_name`'s package directory — the delta
/// analogue of the engine's own cross-repo reachability check, needed
/// because a pooled delta can be linked into more than one repository (spec
/// §4.4: "reusable across repositories").
fn reachable_delta_targets(config: &Config, source_name: &str, filename: &str) -> Vec<PathBuf> {
    let basedir = Path::new(&config.basedir);
    let mut repos = Vec::new();
    if let Ok(entries) = fs::read_dir(basedir) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if paths::is_repo(config, name) {
                    repos.push(name.to_string());
                }
            }
        }
    }

    repos
        .iter()
        .map(|r| paths::package_target(config, r, source_name, filename))
        .collect()
}

/// Remove every delta artifact touching `p`'s release, garbage-collect their
/// pool entries, and report that `p.source_name` needs delta regeneration.
pub fn invalidate_for(config: &Config, repo: &str, p: &RepoPackage) -> Result<()> {
    for path in enumerate_involving(config, repo, p)? {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        fs::remove_file(&path)?;
        // another repository may hold a hardlink to the same pooled delta
        // (spec §4.4); only collect it once none of them still reference it.
        let reachable = reachable_delta_targets(config, &p.source_name, &filename);
        pool::gc_if_unreferenced(config, &filename, &reachable)?;
    }

    Ok(())
}

/// Build (or reuse, via the pool) every missing delta artifact between
/// consecutive releases of each binary under `source_name`.
pub fn create_for(config: &Config, repo: &str, catalog: &Catalog, source_name: &str) -> Result<()> {
    let records = catalog.get(source_name);
    if records.is_empty() {
        return Ok(());
    }

    let mut by_binary: std::collections::BTreeMap<&str, Vec<&RepoPackage>> =
        std::collections::BTreeMap::new();
    for record in records {
        by_binary.entry(&record.binary_name).or_default().push(record);
    }

    let dir = paths::package_dir(config, repo, source_name);

    for (binary_name, mut group) in by_binary {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| b.release.cmp(&a.release));
        let top = group[0];
        let top_path = dir.join(&top.filename);

        for older in &group[1..] {
            let delta_name = name_for_pair(older, top);
            let delta_path = dir.join(&delta_name);
            if delta_path.exists() {
                continue;
            }

            if pool::has(config, &delta_name) {
                pool::link_into(config, &delta_name, &delta_path)?;
                continue;
            }

            let older_path = dir.join(&older.filename);
            let artifacts = DeltaBuilder::create(&older_path, &top_path, &dir)
                .map_err(|e| crate::error::RepoError::DeltaBuildFailed {
                    binary_name: binary_name.to_string(),
                    source: e,
                })?;

            if artifacts.is_empty() {
                info!(
                    "no delta possible for {binary_name} ({} -> {})",
                    older.release, top.release
                );
                continue;
            }

            for artifact in artifacts {
                if let Some(name) = artifact.file_name().and_then(|n| n.to_str()) {
                    pool::ingest(config, &artifact, name)?;
                    let target = dir.join(name);
                    if !target.exists() {
                        pool::link_into(config, name, &target)?;
                    }
                }
            }
        }
    }

    Ok(())
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
    fn name_for_pair_matches_expected_shape() {
        let from = pkg("foo", 1);
        let to = pkg("foo", 2);
        assert_eq!(name_for_pair(&from, &to), "foo-1-2-1-x86_64.delta.pkg");
    }

    #[test]
    fn create_for_skips_single_release_sources() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut catalog = Catalog::new();
        catalog.append(pkg("foo", 1));

        // no package directory exists at all; a single-release source must
        // short-circuit before ever touching the filesystem.
        create_for(&config, "stable", &catalog, "foo").unwrap();
    }

    #[test]
    fn create_for_logs_and_continues_when_builder_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pkg_dir = paths::package_dir(&config, "stable", "foo");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("foo-1.0-1-1-x86_64.pkg"), b"old").unwrap();
        fs::write(pkg_dir.join("foo-1.0-2-1-x86_64.pkg"), b"new").unwrap();

        let mut catalog = Catalog::new();
        catalog.append(pkg("foo", 1));
        catalog.append(pkg("foo", 2));

        create_for(&config, "stable", &catalog, "foo").unwrap();
        // the stubbed builder returns no artifacts, so no delta file exists
        assert!(!pkg_dir.join("foo-1-2-1-x86_64.delta.pkg").exists());
    }

    #[test]
    fn invalidate_for_removes_matching_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pkg_dir = paths::package_dir(&config, "stable", "foo");
        fs::create_dir_all(&pkg_dir).unwrap();
        let delta_name = "foo-1-2-1-x86_64.delta.pkg";
        fs::write(pkg_dir.join(delta_name), b"delta").unwrap();

        invalidate_for(&config, "stable", &pkg("foo", 2)).unwrap();
        assert!(!pkg_dir.join(delta_name).exists());
    }

    #[test]
    fn enumerate_involving_does_not_false_match_on_distrel_collision() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pkg_dir = paths::package_dir(&config, "stable", "foo");
        fs::create_dir_all(&pkg_dir).unwrap();

        // unrelated delta (release 5 -> 9, distRel "2") whose distRel happens
        // to equal p's release number; a bare substring test over-matches on
        // "-2-" here even though neither endpoint is release 2.
        let unrelated = "foo-5-9-2-x86_64.delta.pkg";
        fs::write(pkg_dir.join(unrelated), b"delta").unwrap();

        let mut p = pkg("foo", 2);
        p.meta.distribution_release = "2".to_string();

        let matches = enumerate_involving(&config, "stable", &p).unwrap();
        assert!(matches.is_empty(), "unrelated delta must not match: {matches:?}");
    }

    #[test]
    fn invalidate_for_preserves_pool_entry_still_linked_from_another_repo() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        for repo in ["stable", "stable2"] {
            fs::create_dir_all(paths::repo_root(&config, repo)).unwrap();
            fs::write(paths::repo_marker(&config, repo), b"").unwrap();
        }

        let delta_name = "foo-1-2-1-x86_64.delta.pkg";
        fs::create_dir_all(paths::pool_dir(&config)).unwrap();
        fs::write(paths::pool_entry(&config, delta_name), b"delta").unwrap();

        let target_stable = paths::package_target(&config, "stable", "foo", delta_name);
        let target_stable2 = paths::package_target(&config, "stable2", "foo", delta_name);
        pool::link_into(&config, delta_name, &target_stable).unwrap();
        pool::link_into(&config, delta_name, &target_stable2).unwrap();

        invalidate_for(&config, "stable", &pkg("foo", 2)).unwrap();

        assert!(!target_stable.exists());
        assert!(target_stable2.exists(), "other repo's hardlink should remain");
        assert!(
            pool::has(&config, delta_name),
            "pool entry must survive while stable2 still links it"
        );
    }
}
