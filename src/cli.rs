use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// import one or more package archives into a repository
#[argh(subcommand, name = "add")]
pub(crate) struct Add {
    #[argh(positional)]
    pub repo: String,
    #[argh(positional)]
    pub packages: Vec<PathBuf>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// create a new repository from an existing one, newest releases only unless -a is given
#[argh(subcommand, name = "clone")]
pub(crate) struct CloneRepo {
    #[argh(positional)]
    pub src: String,
    #[argh(positional)]
    pub dst: String,
    /// copy every release instead of only the newest
    #[argh(switch, short = 'a')]
    pub all_versions: bool,
}

#[derive(FromArgs, PartialEq, Debug)]
/// copy one or more named sources from one repository into another
#[argh(subcommand, name = "copy-source")]
pub(crate) struct CopySource {
    #[argh(positional)]
    pub src: String,
    #[argh(positional)]
    pub dst: String,
    /// copy every release instead of only the newest
    #[argh(switch, short = 'a')]
    pub all_versions: bool,
    #[argh(positional)]
    pub names: Vec<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// create a new, empty repository
#[argh(subcommand, name = "create-repo")]
pub(crate) struct CreateRepo {
    #[argh(positional)]
    pub name: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// (re)build delta artifacts for every source in a repository
#[argh(subcommand, name = "delta")]
pub(crate) struct Delta {
    #[argh(positional)]
    pub repo: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// list every known repository
#[argh(subcommand, name = "list-repos")]
pub(crate) struct ListRepos {}

#[derive(FromArgs, PartialEq, Debug)]
/// watch a repository's incoming directory and ingest packages as they arrive
#[argh(subcommand, name = "monitor-incoming")]
pub(crate) struct MonitorIncoming {
    #[argh(positional)]
    pub repo: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// ingest everything currently sitting in a repository's incoming directory
#[argh(subcommand, name = "process-incoming")]
pub(crate) struct ProcessIncoming {
    #[argh(positional)]
    pub repo: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// pull newer releases from an origin repository into a clone of it
#[argh(subcommand, name = "pull")]
pub(crate) struct Pull {
    #[argh(positional)]
    pub clone: String,
    #[argh(positional)]
    pub origin: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// remove a repository and every package it contains
#[argh(subcommand, name = "remove-repo")]
pub(crate) struct RemoveRepo {
    #[argh(positional)]
    pub name: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// remove one or more sources (optionally `name==release`) from a repository
#[argh(subcommand, name = "remove-source")]
pub(crate) struct RemoveSource {
    #[argh(positional)]
    pub repo: String,
    #[argh(positional)]
    pub names: Vec<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// drop everything past the newest `max_versions` releases per binary
#[argh(subcommand, name = "trim")]
pub(crate) struct Trim {
    #[argh(positional)]
    pub repo: String,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub(crate) enum RepomanCommand {
    Add(Add),
    Clone(CloneRepo),
    CopySource(CopySource),
    CreateRepo(CreateRepo),
    Delta(Delta),
    ListRepos(ListRepos),
    MonitorIncoming(MonitorIncoming),
    ProcessIncoming(ProcessIncoming),
    Pull(Pull),
    RemoveRepo(RemoveRepo),
    RemoveSource(RemoveSource),
    Trim(Trim),
}

#[derive(FromArgs, PartialEq, Debug)]
/// repoman: a binary package repository manager
pub(crate) struct Repoman {
    /// specify the location of the config file
    #[argh(option, short = 'c', default = "String::from(\"./repoman.toml\")")]
    pub config: String,
    #[argh(subcommand)]
    pub command: RepomanCommand,
}
