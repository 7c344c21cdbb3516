use std::process::ExitCode;

use anyhow::Result;
use log::error;

mod catalog;
mod cli;
mod config;
mod delta;
mod engine;
mod error;
mod indexer;
mod meta;
mod parser;
mod paths;
mod pool;
mod toolkit;
mod watcher;

use cli::RepomanCommand;
use engine::RepoEngine;

fn main() -> ExitCode {
    env_logger::init();
    let args: cli::Repoman = argh::from_env();

    #[cfg(unix)]
    {
        use nix::sys::stat::{umask, Mode};
        // group/world-readable generated files, matching the distilled
        // source's process-wide umask (spec §6).
        umask(Mode::from_bits_truncate(0o022));
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: cli::Repoman) -> Result<()> {
    let config = config::parse_config(&args.config)?;
    let mut engine = RepoEngine::new(config);

    match args.command {
        RepomanCommand::Add(cmd) => engine.add_packages(&cmd.repo, &cmd.packages)?,
        RepomanCommand::Clone(cmd) => engine.clone_repo(&cmd.src, &cmd.dst, cmd.all_versions)?,
        RepomanCommand::CopySource(cmd) => {
            engine.copy_source(&cmd.src, &cmd.dst, &cmd.names, cmd.all_versions)?
        }
        RepomanCommand::CreateRepo(cmd) => engine.create_repo(&cmd.name)?,
        RepomanCommand::Delta(cmd) => engine.delta_op(&cmd.repo)?,
        RepomanCommand::ListRepos(_) => {
            for repo in engine.list_repos()? {
                println!("{repo}");
            }
        }
        RepomanCommand::MonitorIncoming(cmd) => {
            let mut incoming_watcher = watcher::IncomingWatcher::new(&mut engine, &cmd.repo)?;
            incoming_watcher.run()?;
        }
        RepomanCommand::ProcessIncoming(cmd) => watcher::process_incoming(&mut engine, &cmd.repo)?,
        RepomanCommand::Pull(cmd) => engine.pull(&cmd.clone, &cmd.origin)?,
        RepomanCommand::RemoveRepo(cmd) => engine.remove_repo(&cmd.name)?,
        RepomanCommand::RemoveSource(cmd) => engine.remove_source(&cmd.repo, &cmd.names)?,
        RepomanCommand::Trim(cmd) => engine.trim(&cmd.repo)?,
    }

    Ok(())
}
