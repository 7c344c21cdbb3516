//! Typed error kinds returned across the engine boundary.
//!
//! Internal helper code is free to use `anyhow::Result` the way the rest of
//! this codebase does; engine operations narrow back down to `RepoError` so
//! the CLI can distinguish a fatal catalog read from a merely-logged
//! best-effort failure (spec §7).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no such repository: {0}")]
    NoSuchRepo(String),

    #[error("repository already exists: {0}")]
    RepoExists(String),

    #[error("catalog for {repo} is corrupt: {source}")]
    CatalogCorrupt {
        repo: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to persist catalog for {repo}: {source}")]
    CatalogWrite {
        repo: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("pool I/O failure on {}: {source}", path.display())]
    PoolIo {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("delta build failed for {binary_name}: {source}")]
    DeltaBuildFailed {
        binary_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid incoming file: {0}")]
    IncomingInvalid(String),

    #[error("duplicate catalog entry: {0}")]
    DuplicateEntry(String),

    #[error("failed to install asset file {0}: {1}")]
    AssetCopyFailed(String, String),

    #[error("target already exists for {}, refusing to add again", .0.display())]
    AddToExisting(PathBuf),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RepoError>;
