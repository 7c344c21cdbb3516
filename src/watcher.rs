//! Serializes a stream of filesystem events on one repository's incoming
//! directory into atomic `RepoEngine::add_package` calls (spec §4.7).
//!
//! `notify` has no portable "close on write" event, so `CloseWrite` is
//! modeled as: wait until a candidate file's size is stable across two
//! polls, then treat it as closed. This is the Open Question resolution
//! recorded in SPEC_FULL.md §4.7 and DESIGN.md.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use log::{error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};

use crate::engine::{PackageSource, RepoEngine};
use crate::error::Result;
use crate::paths;
use crate::toolkit;

/// How long a candidate file's size must stay unchanged before it is
/// considered closed and ready to ingest.
const STABILITY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// FIFO of basenames discovered in the incoming directory, awaiting
/// ingestion, plus the `busy` flag that prevents re-entrant drains (spec
/// §5: the notifier delivers events on one thread, so a plain flag
/// checked and set on that same thread is sufficient; no lock needed).
pub struct IncomingWatcher<'a> {
    engine: &'a mut RepoEngine,
    repo: String,
    incoming_dir: PathBuf,
    pending: VecDeque<String>,
    busy: bool,
}

impl<'a> IncomingWatcher<'a> {
    pub fn new(engine: &'a mut RepoEngine, repo: &str) -> Result<Self> {
        if !paths::is_repo(engine.config(), repo) {
            return Err(crate::error::RepoError::NoSuchRepo(repo.to_string()));
        }
        let incoming_dir = paths::incoming_dir(engine.config(), repo);
        if !incoming_dir.exists() {
            return Err(crate::error::RepoError::Other(anyhow::anyhow!(
                "incoming directory does not exist: {}",
                incoming_dir.display()
            )));
        }

        Ok(IncomingWatcher {
            engine,
            repo: repo.to_string(),
            incoming_dir,
            pending: VecDeque::new(),
            busy: false,
        })
    }

    /// Subscribe to the incoming directory and block, draining ingestions
    /// as files stabilize. Returns only on a fatal engine error or when the
    /// underlying watcher channel is closed.
    pub fn run(&mut self) -> Result<()> {
        let (tx, rx) = channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(tx)
            .map_err(|e| crate::error::RepoError::Other(anyhow::anyhow!(e)))?;
        watcher
            .watch(&self.incoming_dir, RecursiveMode::NonRecursive)
            .map_err(|e| crate::error::RepoError::Other(anyhow::anyhow!(e)))?;

        info!(
            "watching {} for incoming packages destined for {}",
            self.incoming_dir.display(),
            self.repo
        );

        loop {
            match rx.recv_timeout(STABILITY_POLL_INTERVAL) {
                Ok(Ok(event)) => self.handle_event(event)?,
                Ok(Err(e)) => warn!("watcher error: {e}"),
                Err(RecvTimeoutError::Timeout) => {
                    // no new fs events; still worth re-checking pending
                    // entries in case an earlier one has since stabilized.
                    if !self.pending.is_empty() && !self.busy {
                        self.drain()?;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_)
        ) {
            return Ok(());
        }
        for path in event.paths {
            self.consider_close_write(&path)?;
        }
        Ok(())
    }

    fn consider_close_write(&mut self, path: &Path) -> Result<()> {
        let Some(basename) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        if !basename.ends_with(".pkg") {
            return Ok(());
        }
        if basename.ends_with(".delta.pkg") {
            return Ok(());
        }
        if !is_stable(path) {
            return Ok(());
        }

        // a cheap inspect is enough to know where this package would land;
        // an unreadable candidate just falls through to the normal
        // `add_package` failure path instead of being filtered out here.
        if let Ok(meta) = toolkit::inspect(path) {
            let target = paths::package_target(
                self.engine.config(),
                &self.repo,
                &meta.source_name,
                basename,
            );
            if target.exists() {
                return Ok(());
            }
        }

        if !self.pending.contains(&basename.to_string()) {
            self.pending.push_back(basename.to_string());
        }
        if !self.busy {
            self.drain()?;
        }
        Ok(())
    }

    /// Drain every entry queued at the moment drain starts; entries that
    /// arrive mid-drain stay queued for the next call (spec §4.7).
    fn drain(&mut self) -> Result<()> {
        self.busy = true;
        let snapshot: Vec<String> = self.pending.iter().cloned().collect();

        for name in snapshot {
            let source_path = self.incoming_dir.join(&name);
            if !source_path.exists() {
                self.pending.retain(|n| n != &name);
                continue;
            }
            match self
                .engine
                .add_package(&self.repo, PackageSource::External(source_path.clone()))
            {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&source_path) {
                        warn!("could not remove ingested incoming file {name}: {e}");
                    }
                    self.pending.retain(|n| n != &name);
                }
                Err(e) => {
                    error!("fatal failure draining incoming for {}: {e}", self.repo);
                    self.busy = false;
                    return Err(e);
                }
            }
        }

        self.engine.run_epilogue()?;
        self.busy = false;
        Ok(())
    }
}

/// Wait for `path`'s size to be stable across two polls, up to a small
/// number of attempts, as the portable stand-in for `CloseWrite`.
fn is_stable(path: &Path) -> bool {
    let Ok(first) = fs::metadata(path).map(|m| m.len()) else {
        return false;
    };
    std::thread::sleep(STABILITY_POLL_INTERVAL);
    let Ok(second) = fs::metadata(path).map(|m| m.len()) else {
        return false;
    };
    first == second
}

/// One-shot equivalent of the watcher: ingest everything currently sitting
/// in the incoming directory, then stop (spec §4.8).
pub fn process_incoming(engine: &mut RepoEngine, repo: &str) -> Result<()> {
    if !paths::is_repo(engine.config(), repo) {
        return Err(crate::error::RepoError::NoSuchRepo(repo.to_string()));
    }
    let incoming_dir = paths::incoming_dir(engine.config(), repo);
    if !incoming_dir.exists() {
        return Err(crate::error::RepoError::Other(anyhow::anyhow!(
            "incoming directory does not exist: {}",
            incoming_dir.display()
        )));
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&incoming_dir).map_err(|e| crate::error::RepoError::Other(e.into()))? {
        let entry = entry.map_err(|e| crate::error::RepoError::Other(e.into()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".pkg") {
            return Err(crate::error::RepoError::IncomingInvalid(name));
        }
        names.push(name);
    }

    engine.set_process_mode(true);
    for name in names {
        if name.ends_with(".delta.pkg") {
            continue;
        }
        let source_path = incoming_dir.join(&name);
        engine.add_package(repo, PackageSource::External(source_path.clone()))?;
        fs::remove_file(&source_path).map_err(|e| crate::error::RepoError::Other(e.into()))?;
    }
    engine.set_process_mode(false);

    engine.run_epilogue()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::toolkit::test_fixtures::build_pkg;

    fn test_config(base: &Path) -> Config {
        Config {
            basedir: base.join("repo").to_string_lossy().to_string(),
            incomingbase: base.join("incoming").to_string_lossy().to_string(),
            max_versions: 3,
        }
    }

    #[test]
    fn process_incoming_ingests_and_clears_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut engine = RepoEngine::new(config);
        engine.create_repo("stable").unwrap();

        let incoming = paths::incoming_dir(engine.config(), "stable");
        fs::create_dir_all(&incoming).unwrap();
        fs::write(
            incoming.join("foo-1.0-1-1-x86_64.pkg"),
            build_pkg("foo", "foo", "1.0", 1, "1.0:1"),
        )
        .unwrap();

        process_incoming(&mut engine, "stable").unwrap();

        assert!(fs::read_dir(&incoming).unwrap().next().is_none());
        let target = paths::package_target(engine.config(), "stable", "foo", "foo-1.0-1-1-x86_64.pkg");
        assert!(target.exists());
    }

    #[test]
    fn process_incoming_rejects_non_pkg_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut engine = RepoEngine::new(config);
        engine.create_repo("stable").unwrap();

        let incoming = paths::incoming_dir(engine.config(), "stable");
        fs::create_dir_all(&incoming).unwrap();
        fs::write(incoming.join("README.txt"), b"hi").unwrap();

        assert!(process_incoming(&mut engine, "stable").is_err());
    }

    #[test]
    fn process_incoming_skips_delta_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut engine = RepoEngine::new(config);
        engine.create_repo("stable").unwrap();

        let incoming = paths::incoming_dir(engine.config(), "stable");
        fs::create_dir_all(&incoming).unwrap();
        fs::write(incoming.join("foo-1-2-1-x86_64.delta.pkg"), b"delta").unwrap();

        process_incoming(&mut engine, "stable").unwrap();
        // delta files are left untouched, not ingested or deleted
        assert!(incoming.join("foo-1-2-1-x86_64.delta.pkg").exists());
    }
}
