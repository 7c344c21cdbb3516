use std::{fs::File, io::Read, path::Path};

use anyhow::Result;
use log::warn;
use serde::Deserialize;

const DEFAULT_BASEDIR: &str = "./repo";
const DEFAULT_INCOMINGBASE: &str = "./incoming";
const DEFAULT_MAX_VERSIONS: usize = 3;

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
struct RawConfig {
    basedir: String,
    incomingbase: String,
    max_versions: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            basedir: DEFAULT_BASEDIR.to_string(),
            incomingbase: DEFAULT_INCOMINGBASE.to_string(),
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub basedir: String,
    pub incomingbase: String,
    pub max_versions: usize,
}

impl Default for Config {
    fn default() -> Self {
        let raw = RawConfig::default();
        Config {
            basedir: raw.basedir,
            incomingbase: raw.incomingbase,
            max_versions: raw.max_versions,
        }
    }
}

/// Load configuration from `path`. A missing config file is not an error —
/// the tool works out of the box against `./repo` and `./incoming`, exactly
/// as the distilled source hardcodes them.
pub fn parse_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(
            "Config file {} not found, using defaults ({}, {})",
            path.display(),
            DEFAULT_BASEDIR,
            DEFAULT_INCOMINGBASE
        );
        return Ok(Config::default());
    }

    let mut f = File::open(path)?;
    let mut content = String::new();
    content.reserve(256);
    f.read_to_string(&mut content)?;
    let raw: RawConfig = toml::from_str(&content)?;

    Ok(Config {
        basedir: raw.basedir,
        incomingbase: raw.incomingbase,
        max_versions: raw.max_versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = parse_config("/nonexistent/repoman.toml").unwrap();
        assert_eq!(config.basedir, DEFAULT_BASEDIR);
        assert_eq!(config.incomingbase, DEFAULT_INCOMINGBASE);
        assert_eq!(config.max_versions, DEFAULT_MAX_VERSIONS);
    }

    #[test]
    fn parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repoman.toml");
        std::fs::write(
            &path,
            "basedir = \"/srv/repo\"\nincomingbase = \"/srv/incoming\"\nmax_versions = 5\n",
        )
        .unwrap();
        let config = parse_config(&path).unwrap();
        assert_eq!(config.basedir, "/srv/repo");
        assert_eq!(config.incomingbase, "/srv/incoming");
        assert_eq!(config.max_versions, 5);
    }
}
