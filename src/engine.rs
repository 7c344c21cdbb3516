//! The mutating core: add/remove packages, trim, clone/pull/copy-source,
//! repo lifecycle, and the delta pass, all funneling through a per-process
//! catalog cache and a shared operation-group epilogue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use log::{info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::delta;
use crate::error::{RepoError, Result};
use crate::indexer::{self, PendingDelta};
use crate::meta::RepoPackage;
use crate::paths;
use crate::pool;
use crate::toolkit;

/// Where a package being added comes from: a fresh external archive (needs
/// inspection and pooling) or a record already known to this pool, carried
/// over from another repository during clone/pull/copy-source.
pub enum PackageSource {
    External(PathBuf),
    Existing(RepoPackage),
}

/// Holds the mutable state a single CLI invocation accumulates: the set of
/// repos touched since the last epilogue, and which sources still owe a
/// delta rebuild.
pub struct RepoEngine {
    config: Config,
    catalogs: HashMap<String, Catalog>,
    altered: HashSet<String>,
    pending: PendingDelta,
    process_mode: bool,
}

impl RepoEngine {
    pub fn new(config: Config) -> Self {
        RepoEngine {
            config,
            catalogs: HashMap::new(),
            altered: HashSet::new(),
            pending: PendingDelta::default(),
            process_mode: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Batch ingestion (watcher drains, `process-incoming`) enables
    /// speculative delta regeneration on release bumps.
    pub fn set_process_mode(&mut self, enabled: bool) {
        self.process_mode = enabled;
    }

    fn ensure_catalog_loaded(&mut self, repo: &str) -> Result<()> {
        if !self.catalogs.contains_key(repo) {
            let catalog = Catalog::load(&self.config, repo)?;
            self.catalogs.insert(repo.to_string(), catalog);
        }
        Ok(())
    }

    pub fn list_repos(&self) -> Result<Vec<String>> {
        let basedir = Path::new(&self.config.basedir);
        if !basedir.exists() {
            return Ok(Vec::new());
        }
        let mut repos = Vec::new();
        for entry in fs::read_dir(basedir).map_err(|e| RepoError::Other(e.into()))? {
            let entry = entry.map_err(|e| RepoError::Other(e.into()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if paths::is_repo(&self.config, name) {
                    repos.push(name.to_string());
                }
            }
        }
        repos.sort();
        Ok(repos)
    }

    /// Every path that would reference `filename` if it were linked into
    /// every known repository's copy of `source_name`.
    fn reachable_targets(&self, source_name: &str, filename: &str) -> Vec<PathBuf> {
        self.list_repos()
            .unwrap_or_default()
            .iter()
            .map(|r| paths::package_target(&self.config, r, source_name, filename))
            .collect()
    }

    /// Persist and reindex every repo touched since the last epilogue, then
    /// clear the bookkeeping.
    pub fn run_epilogue(&mut self) -> Result<()> {
        let repos: Vec<String> = self.altered.drain().collect();
        for repo in repos {
            self.ensure_catalog_loaded(&repo)?;
            let config = self.config.clone();
            {
                let catalog = self.catalogs.get(&repo).expect("just loaded");
                catalog.save(&config, &repo)?;
            }
            let catalog = self.catalogs.get(&repo).expect("just loaded");
            indexer::reindex(&config, &repo, catalog, &mut self.pending)?;
        }
        Ok(())
    }

    fn create_repo_marker(&self, name: &str) -> Result<()> {
        let repo_dir = paths::repo_root(&self.config, name);
        fs::create_dir_all(&repo_dir).map_err(|e| RepoError::Other(e.into()))?;
        fs::write(paths::repo_marker(&self.config, name), b"").map_err(|e| RepoError::Other(e.into()))?;
        Ok(())
    }

    pub fn create_repo(&mut self, name: &str) -> Result<()> {
        if paths::is_repo(&self.config, name) {
            return Err(RepoError::RepoExists(name.to_string()));
        }
        let repo_dir = paths::repo_root(&self.config, name);
        if repo_dir.exists() {
            return Err(RepoError::Other(anyhow!(
                "{} exists and is not a repository",
                name
            )));
        }
        let assets = paths::assets_dir(&self.config, name);
        if assets.exists() {
            return Err(RepoError::Other(anyhow!(
                "assets directory already exists: {}",
                assets.display()
            )));
        }
        fs::create_dir_all(&assets).map_err(|e| RepoError::Other(e.into()))?;
        self.create_repo_marker(name)
    }

    pub fn remove_repo(&mut self, name: &str) -> Result<()> {
        if !paths::is_repo(&self.config, name) {
            return Err(RepoError::NoSuchRepo(name.to_string()));
        }
        let config = self.config.clone();
        self.ensure_catalog_loaded(name)?;
        let records: Vec<RepoPackage> = self
            .catalogs
            .get(name)
            .expect("just loaded")
            .all_packages()
            .cloned()
            .collect();
        for record in &records {
            self.remove_package(name, record, true)?;
        }
        // the repo is being torn down; removing its packages must not
        // trigger a reindex of a directory we're about to delete.
        self.altered.remove(name);

        let repo_dir = paths::repo_root(&config, name);
        let _ = fs::remove_file(paths::repo_marker(&config, name));
        for candidate in [paths::INDEX_FILE.to_string(), format!("{}.xz", paths::INDEX_FILE)] {
            let p = repo_dir.join(candidate);
            if p.exists() {
                let _ = fs::remove_file(&p);
            }
        }
        fs::remove_dir(&repo_dir)
            .map_err(|e| RepoError::Other(anyhow!("removing {}: {}", repo_dir.display(), e)))?;

        self.catalogs.remove(name);
        let catalog_file = paths::repo_catalog_file(&config, name);
        if catalog_file.exists() {
            fs::remove_file(&catalog_file).map_err(|e| RepoError::Other(e.into()))?;
        }

        let assets = paths::assets_dir(&config, name);
        if assets.exists() {
            let is_empty = fs::read_dir(&assets)
                .map(|mut d| d.next().is_none())
                .unwrap_or(false);
            if is_empty {
                let _ = fs::remove_dir(&assets);
            } else {
                warn!("not removing non-empty assets directory: {}", assets.display());
            }
        }

        info!("successfully removed repository: {name}");
        Ok(())
    }

    pub fn add_package(&mut self, repo: &str, source: PackageSource) -> Result<()> {
        if !paths::is_repo(&self.config, repo) {
            return Err(RepoError::NoSuchRepo(repo.to_string()));
        }
        let config = self.config.clone();

        let (pkg, external_path) = match source {
            PackageSource::External(path) => {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| RepoError::IncomingInvalid(path.display().to_string()))?
                    .to_string();
                let meta = toolkit::inspect(&path).map_err(RepoError::Other)?;
                (RepoPackage::new(filename, meta), Some(path))
            }
            PackageSource::Existing(pkg) => (pkg, None),
        };

        let target = paths::package_target(&config, repo, &pkg.source_name, &pkg.filename);
        if target.exists() {
            return Err(RepoError::AddToExisting(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| RepoError::PoolIo {
                path: parent.to_path_buf(),
                source: e.into(),
            })?;
        }

        match &external_path {
            Some(path) => pool::ingest(&config, path, &pkg.filename)?,
            None => {
                if !pool::has(&config, &pkg.filename) {
                    return Err(RepoError::PoolIo {
                        path: paths::pool_entry(&config, &pkg.filename),
                        source: anyhow!("package not pooled: {}", pkg.filename),
                    });
                }
            }
        }

        pool::link_into(&config, &pkg.filename, &target)?;
        info!("imported {}", pkg.filename);
        self.altered.insert(repo.to_string());

        self.ensure_catalog_loaded(repo)?;
        let prior_top: Option<RepoPackage> = {
            let catalog = self.catalogs.get(repo).expect("just loaded");
            let mut records: Vec<RepoPackage> = catalog.get(&pkg.source_name).to_vec();
            records.sort_by(|a, b| b.release.cmp(&a.release));
            records.into_iter().next()
        };

        if let Some(top) = &prior_top {
            if top.release != pkg.release {
                delta::invalidate_for(&config, repo, top)?;
                if self.process_mode && !self.pending.sources.contains(&pkg.source_name) {
                    self.pending.sources.push(pkg.source_name.clone());
                    self.pending.repo = Some(repo.to_string());
                }
                self.altered.insert(repo.to_string());
            }
        }

        let catalog = self.catalogs.get_mut(repo).expect("just loaded");
        if !catalog.append(pkg.clone()) {
            warn!("{}", RepoError::DuplicateEntry(pkg.filename.clone()));
        }

        Ok(())
    }

    /// Add a batch of external archives, then run the epilogue once. The
    /// `add` CLI command's shape.
    pub fn add_packages(&mut self, repo: &str, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            self.add_package(repo, PackageSource::External(path.clone()))?;
        }
        self.run_epilogue()
    }

    pub fn remove_package(&mut self, repo: &str, pkg: &RepoPackage, bypass: bool) -> Result<()> {
        let config = self.config.clone();
        let target = paths::package_target(&config, repo, &pkg.source_name, &pkg.filename);
        if target.exists() {
            fs::remove_file(&target).map_err(|e| RepoError::PoolIo {
                path: target.clone(),
                source: e.into(),
            })?;
        }

        self.ensure_catalog_loaded(repo)?;
        {
            let catalog = self.catalogs.get_mut(repo).expect("just loaded");
            catalog.remove(pkg);
        }

        delta::invalidate_for(&config, repo, pkg)?;

        if let Some(parent) = target.parent() {
            if parent.exists() && dir_is_empty(parent) {
                let _ = fs::remove_dir(parent);
                if let Some(grandparent) = parent.parent() {
                    if grandparent.exists() && dir_is_empty(grandparent) {
                        let _ = fs::remove_dir(grandparent);
                    }
                }
            }
        }

        let reachable = self.reachable_targets(&pkg.source_name, &pkg.filename);
        pool::gc_if_unreferenced(&config, &pkg.filename, &reachable)?;

        if !bypass {
            self.altered.insert(repo.to_string());
        }

        Ok(())
    }

    pub fn trim(&mut self, repo: &str) -> Result<()> {
        if !paths::is_repo(&self.config, repo) {
            return Err(RepoError::NoSuchRepo(repo.to_string()));
        }
        self.ensure_catalog_loaded(repo)?;
        let max_versions = self.config.max_versions;

        let to_remove: Vec<RepoPackage> = {
            let catalog = self.catalogs.get(repo).expect("just loaded");
            let mut out = Vec::new();
            for source_name in catalog.source_names().cloned().collect::<Vec<_>>() {
                let mut by_binary: BTreeMap<String, Vec<RepoPackage>> = BTreeMap::new();
                for record in catalog.get(&source_name) {
                    by_binary
                        .entry(record.binary_name.clone())
                        .or_default()
                        .push(record.clone());
                }
                for (_, mut group) in by_binary {
                    group.sort_by(|a, b| b.release.cmp(&a.release));
                    if group.len() > max_versions {
                        out.extend(group.split_off(max_versions));
                    }
                }
            }
            out
        };

        info!("trimming {} package(s) from {repo}", to_remove.len());
        for record in &to_remove {
            self.remove_package(repo, record, true)?;
        }

        self.altered.insert(repo.to_string());
        self.run_epilogue()
    }

    pub fn remove_source(&mut self, repo: &str, names: &[String]) -> Result<()> {
        if !paths::is_repo(&self.config, repo) {
            return Err(RepoError::NoSuchRepo(repo.to_string()));
        }
        self.ensure_catalog_loaded(repo)?;

        let mut removals = Vec::new();
        for raw in names {
            let (name, release) = match raw.split_once("==") {
                Some((n, r)) => {
                    let release: u32 = r
                        .parse()
                        .map_err(|_| RepoError::Other(anyhow!("{} is not a valid release number", r)))?;
                    (n, Some(release))
                }
                None => (raw.as_str(), None),
            };

            let catalog = self.catalogs.get(repo).expect("just loaded");
            if !catalog.contains(name) {
                return Err(RepoError::Other(anyhow!(
                    "{} does not exist in {} repo",
                    name,
                    repo
                )));
            }
            let records = catalog.get(name);
            let matched: Vec<RepoPackage> = match release {
                Some(r) => records.iter().filter(|p| p.release == r).cloned().collect(),
                None => records.to_vec(),
            };
            if matched.is_empty() {
                return Err(RepoError::Other(anyhow!("no matches found for {}", raw)));
            }
            removals.extend(matched);
        }

        self.altered.insert(repo.to_string());
        for record in &removals {
            self.remove_package(repo, record, true)?;
        }
        self.run_epilogue()
    }

    pub fn clone_repo(&mut self, src: &str, dst: &str, all_versions: bool) -> Result<()> {
        if !paths::is_repo(&self.config, src) {
            return Err(RepoError::NoSuchRepo(src.to_string()));
        }
        let config = self.config.clone();
        let dst_dir = paths::repo_root(&config, dst);
        if dst_dir.exists() || paths::is_repo(&config, dst) {
            return Err(RepoError::RepoExists(dst.to_string()));
        }

        self.ensure_catalog_loaded(src)?;
        if self.catalogs.get(src).expect("just loaded").is_empty() {
            return Err(RepoError::Other(anyhow!("{} is empty, cannot clone", src)));
        }

        let dst_assets = paths::assets_dir(&config, dst);
        if dst_assets.exists() {
            return Err(RepoError::Other(anyhow!(
                "assets dir exists, cannot continue cloning: {}",
                dst_assets.display()
            )));
        }
        let src_assets = paths::assets_dir(&config, src);
        if src_assets.exists() {
            fs_extra::dir::copy(
                &src_assets,
                &dst_assets,
                &fs_extra::dir::CopyOptions {
                    content_only: true,
                    copy_inside: true,
                    ..fs_extra::dir::CopyOptions::default()
                },
            )
            .map_err(|e| RepoError::Other(anyhow!("copying assets dir {}: {}", src_assets.display(), e)))?;
        } else {
            fs::create_dir_all(&dst_assets).map_err(|e| RepoError::Other(e.into()))?;
        }

        self.create_repo_marker(dst)?;

        let sources: Vec<String> = self
            .catalogs
            .get(src)
            .expect("just loaded")
            .source_names()
            .cloned()
            .collect();
        for source_name in sources {
            let copies = {
                let catalog = self.catalogs.get(src).expect("just loaded");
                select_copies(catalog.get(&source_name), all_versions)
            };
            for copy in copies {
                let target = paths::package_target(&config, dst, &copy.source_name, &copy.filename);
                if target.exists() {
                    info!("skipping inclusion of already included {}", copy.filename);
                    continue;
                }
                info!("add: {}", copy.binary_name);
                self.add_package(dst, PackageSource::Existing(copy))?;
            }
        }

        self.altered.insert(dst.to_string());
        self.run_epilogue()
    }

    pub fn copy_source(&mut self, src: &str, dst: &str, names: &[String], all_versions: bool) -> Result<()> {
        if !paths::is_repo(&self.config, src) {
            return Err(RepoError::NoSuchRepo(src.to_string()));
        }
        if !paths::is_repo(&self.config, dst) {
            return Err(RepoError::NoSuchRepo(dst.to_string()));
        }
        self.ensure_catalog_loaded(src)?;

        for name in names {
            let catalog = self.catalogs.get(src).expect("just loaded");
            if !catalog.contains(name) {
                return Err(RepoError::Other(anyhow!(
                    "{} does not exist in {} repo",
                    name,
                    src
                )));
            }
        }

        let config = self.config.clone();
        for name in names {
            let copies = {
                let catalog = self.catalogs.get(src).expect("just loaded");
                select_copies(catalog.get(name), all_versions)
            };
            for copy in copies {
                let target = paths::package_target(&config, dst, &copy.source_name, &copy.filename);
                if target.exists() {
                    info!("skipping inclusion of already included {}", copy.filename);
                    continue;
                }
                self.add_package(dst, PackageSource::Existing(copy))?;
            }
        }

        self.altered.insert(dst.to_string());
        self.run_epilogue()
    }

    pub fn pull(&mut self, clone: &str, origin: &str) -> Result<()> {
        if !paths::is_repo(&self.config, origin) {
            return Err(RepoError::NoSuchRepo(origin.to_string()));
        }
        if !paths::is_repo(&self.config, clone) {
            return Err(RepoError::NoSuchRepo(clone.to_string()));
        }
        self.ensure_catalog_loaded(origin)?;
        self.ensure_catalog_loaded(clone)?;
        let config = self.config.clone();

        let origin_sources: Vec<String> = self
            .catalogs
            .get(origin)
            .expect("just loaded")
            .source_names()
            .cloned()
            .collect();
        let mut updates = 0u32;

        for source_name in &origin_sources {
            let mut origin_records: Vec<RepoPackage> =
                self.catalogs.get(origin).expect("just loaded").get(source_name).to_vec();
            origin_records.sort_by(|a, b| b.release.cmp(&a.release));
            let newest_origin_release = origin_records[0].release;

            let clone_catalog = self.catalogs.get(clone).expect("just loaded");
            let should_pull = if !clone_catalog.contains(source_name) {
                info!("pulling new package source: {source_name}");
                true
            } else {
                let mut clone_records: Vec<RepoPackage> = clone_catalog.get(source_name).to_vec();
                clone_records.sort_by(|a, b| b.release.cmp(&a.release));
                let newer = newest_origin_release > clone_records[0].release;
                if newer {
                    info!(
                        "updating {source_name} from release {} to {}",
                        clone_records[0].release, newest_origin_release
                    );
                }
                newer
            };

            if should_pull {
                let copies: Vec<RepoPackage> = origin_records
                    .into_iter()
                    .filter(|p| p.release == newest_origin_release)
                    .collect();
                for copy in copies {
                    let target = paths::package_target(&config, clone, &copy.source_name, &copy.filename);
                    if target.exists() {
                        continue;
                    }
                    self.add_package(clone, PackageSource::Existing(copy))?;
                }
                updates += 1;
            }
        }

        let origin_assets = paths::assets_dir(&config, origin);
        if origin_assets.exists() {
            let clone_assets = paths::assets_dir(&config, clone);
            for name in paths::known_asset_files() {
                let src_path = origin_assets.join(name);
                if !src_path.exists() {
                    continue;
                }
                let dst_path = clone_assets.join(name);
                if let Err(e) = fs::copy(&src_path, &dst_path) {
                    warn!("{}", RepoError::AssetCopyFailed(name.to_string(), e.to_string()));
                }
            }
        }

        if updates > 0 {
            self.altered.insert(clone.to_string());
            self.run_epilogue()?;
        } else {
            info!("everything up to date");
        }

        Ok(())
    }

    pub fn delta_op(&mut self, repo: &str) -> Result<()> {
        if !paths::is_repo(&self.config, repo) {
            return Err(RepoError::NoSuchRepo(repo.to_string()));
        }
        self.ensure_catalog_loaded(repo)?;
        let config = self.config.clone();

        let source_names: Vec<String> = self
            .catalogs
            .get(repo)
            .expect("just loaded")
            .source_names()
            .cloned()
            .collect();
        {
            let catalog = self.catalogs.get(repo).expect("just loaded");
            for name in &source_names {
                delta::create_for(&config, repo, catalog, name)?;
            }
        }

        self.altered.insert(repo.to_string());
        self.run_epilogue()
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn select_copies(records: &[RepoPackage], all_versions: bool) -> Vec<RepoPackage> {
    if all_versions {
        return records.to_vec();
    }
    let top = records.iter().map(|p| p.release).max().unwrap_or(0);
    records.iter().filter(|p| p.release == top).cloned().collect()
}
