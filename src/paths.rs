//! Pure path algebra for the repo/pool/incoming/assets layout. No I/O here —
//! every function is a total function from configuration + names to a path.

use std::path::{Path, PathBuf};

use crate::config::Config;

pub const REPO_MARKER: &str = ".eopkg-repo";
pub const CATALOG_FILE_SUFFIX: &str = ".catalog.json";
pub const INDEX_FILE: &str = "eopkg-index.xml";

const KNOWN_ASSET_FILES: &[&str] = &["components.xml", "distribution.xml", "groups.xml"];

pub fn known_asset_files() -> &'static [&'static str] {
    KNOWN_ASSET_FILES
}

/// Shard directory a source name falls under (spec invariant I4):
/// `lib<first 4 chars>` if the name starts with `lib`, else its first
/// character.
pub fn shard_for_source(source_name: &str) -> String {
    if source_name.starts_with("lib") {
        source_name.chars().take(4).collect()
    } else {
        source_name
            .chars()
            .next()
            .map(|c| c.to_string())
            .unwrap_or_default()
    }
}

pub fn repo_root(config: &Config, repo: &str) -> PathBuf {
    Path::new(&config.basedir).join(repo)
}

pub fn repo_marker(config: &Config, repo: &str) -> PathBuf {
    repo_root(config, repo).join(REPO_MARKER)
}

pub fn repo_catalog_file(config: &Config, repo: &str) -> PathBuf {
    Path::new(&config.basedir).join(format!("{repo}{CATALOG_FILE_SUFFIX}"))
}

pub fn repo_index_file(config: &Config, repo: &str) -> PathBuf {
    repo_root(config, repo).join(INDEX_FILE)
}

pub fn assets_dir(config: &Config, repo: &str) -> PathBuf {
    Path::new(&config.basedir).join(format!("{repo}.assets"))
}

pub fn incoming_dir(config: &Config, repo: &str) -> PathBuf {
    Path::new(&config.incomingbase).join(repo)
}

pub fn pool_dir(config: &Config) -> PathBuf {
    Path::new(&config.basedir).join("pool")
}

pub fn pool_entry(config: &Config, filename: &str) -> PathBuf {
    pool_dir(config).join(filename)
}

/// The directory a binary built from `source_name` lives under within a
/// repository: `<repo>/<shard>/<source_name>/`.
pub fn package_dir(config: &Config, repo: &str, source_name: &str) -> PathBuf {
    repo_root(config, repo)
        .join(shard_for_source(source_name))
        .join(source_name)
}

/// Full on-disk target for a package file, applying the shard rule.
pub fn package_target(config: &Config, repo: &str, source_name: &str, filename: &str) -> PathBuf {
    package_dir(config, repo, source_name).join(filename)
}

pub fn is_repo(config: &Config, repo: &str) -> bool {
    repo_marker(config, repo).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_rule_plain_name() {
        assert_eq!(shard_for_source("foo"), "f");
    }

    #[test]
    fn shard_rule_lib_prefixed() {
        assert_eq!(shard_for_source("libfoobar"), "libf");
    }

    #[test]
    fn shard_rule_short_lib_name() {
        assert_eq!(shard_for_source("lib"), "lib");
    }

    #[test]
    fn package_target_uses_shard() {
        let config = Config {
            basedir: "/base".into(),
            incomingbase: "/incoming".into(),
            max_versions: 3,
        };
        assert_eq!(
            package_target(&config, "stable", "libfoo", "libfoo-1.0-1-1-x86_64.pkg"),
            Path::new("/base/stable/libf/libfoo/libfoo-1.0-1-1-x86_64.pkg")
        );
        assert_eq!(
            package_target(&config, "stable", "zsync", "zsync-0.6-1-1-x86_64.pkg"),
            Path::new("/base/stable/z/zsync/zsync-0.6-1-1-x86_64.pkg")
        );
    }
}
