//! The two external collaborators spec.md treats as opaque (`PkgToolkit` and
//! `DeltaBuilder`), implemented here as a narrow, swappable module rather
//! than a separate process.
//!
//! `inspect` recognizes a pkg archive as an `ar` archive carrying a single
//! `control.tar.{xz,gz}` member, itself a tar archive with a `control` file
//! of colon-separated fields — the same archive shape the pack's own
//! package scanner already parses (see `parser.rs`), just without the
//! ELF/so-dependency analysis that belongs to a different system.

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use ar::Archive as ArArchive;
use flate2::read::GzDecoder;
use log::info;
use sailfish::TemplateSimple;
use tar::Archive as TarArchive;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::meta::{HistoryEntry, PkgMeta};
use crate::parser;

enum ControlFormat {
    Xz,
    Gzip,
}

fn determine_format(member_name: &[u8]) -> Result<ControlFormat> {
    if member_name.ends_with(b".xz") {
        Ok(ControlFormat::Xz)
    } else if member_name.ends_with(b".gz") {
        Ok(ControlFormat::Gzip)
    } else {
        Err(anyhow!("unknown control archive format: {:?}", member_name))
    }
}

fn read_control_member<R: Read>(reader: R, format: ControlFormat) -> Result<Vec<u8>> {
    let mut tar = match format {
        ControlFormat::Xz => TarArchive::new(Box::new(XzDecoder::new(reader)) as Box<dyn Read>),
        ControlFormat::Gzip => TarArchive::new(Box::new(GzDecoder::new(reader)) as Box<dyn Read>),
    };
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path_bytes().as_ref() == b"control" || entry.path_bytes().as_ref() == b"./control"
        {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }

    Err(anyhow!("control file not found in control archive"))
}

macro_rules! must_have {
    ($map:ident, $name:expr) => {{
        let value = $map
            .remove($name.as_bytes())
            .ok_or_else(|| anyhow!("missing `{}` field in control file", $name))?;
        std::str::from_utf8(value)?.to_string()
    }};
}

/// Parse `History: version:release,version:release,...` (newest first).
fn parse_history(raw: &str) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (version, release) = item
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed history entry: {}", item))?;
        entries.push(HistoryEntry {
            version: version.to_string(),
            release: release.parse()?,
        });
    }
    if entries.is_empty() {
        return Err(anyhow!("history field parsed to zero entries"));
    }

    Ok(entries)
}

/// Inspect a pkg archive and return its metadata. Corresponds to
/// `PkgToolkit.Inspect` in spec.md §3.
pub fn inspect<P: AsRef<Path>>(path: P) -> Result<PkgMeta> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = ArArchive::new(f);
    let mut control = None;
    while let Some(entry) = archive.next_entry() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.header().identifier().to_vec();
        if name.starts_with(b"control.tar") {
            let format = determine_format(&name)?;
            control = Some(read_control_member(entry, format)?);
            break;
        }
    }
    let control = control.ok_or_else(|| anyhow!("{}: no control.tar member found", path.display()))?;

    let (_, mut fields): (_, HashMap<&[u8], &[u8]>) =
        parser::single_package_map(&control).map_err(|e| anyhow!("{:?}", e))?;

    let binary_name = must_have!(fields, "Package");
    let source_name = fields
        .remove("Source".as_bytes())
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| binary_name.clone());
    let version = must_have!(fields, "Version");
    let release: u32 = must_have!(fields, "Release").parse()?;
    let distribution_release = must_have!(fields, "Distribution-Release");
    let architecture = must_have!(fields, "Architecture");
    let history = match fields.remove("History".as_bytes()) {
        Some(raw) => parse_history(std::str::from_utf8(raw)?)?,
        None => vec![HistoryEntry {
            version: version.clone(),
            release,
        }],
    };

    if history.first().map(|h| h.release) != Some(release) {
        return Err(anyhow!(
            "{}: history[0] does not match current release",
            path.display()
        ));
    }

    Ok(PkgMeta {
        binary_name,
        source_name,
        version,
        release,
        distribution_release,
        architecture,
        history,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Xz,
}

#[derive(Clone, Debug)]
pub struct WriteIndexOptions {
    pub skip_sources: bool,
    pub skip_signing: bool,
    pub compression: Compression,
}

impl Default for WriteIndexOptions {
    fn default() -> Self {
        WriteIndexOptions {
            skip_sources: true,
            skip_signing: true,
            compression: Compression::Xz,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub binary_name: String,
    pub source_name: String,
    pub version: String,
    pub release: u32,
    pub distribution_release: String,
    pub architecture: String,
    pub uri: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(TemplateSimple)]
#[template(path = "index.stpl")]
struct IndexTemplate<'a> {
    packages: &'a [IndexEntry],
}

/// Render `eopkg-index.xml` (plus its xz-compressed sibling) for `dir`.
/// Corresponds to `PkgToolkit.WriteIndex` in spec.md §4.5.
pub fn write_index(dir: &Path, entries: &[IndexEntry], opts: &WriteIndexOptions) -> Result<()> {
    if opts.skip_signing {
        info!("Signing skipped (no-goal: no signing support)");
    }
    if opts.skip_sources {
        info!("Source package listing skipped");
    }

    let rendered = IndexTemplate { packages: entries }
        .render_once()
        .map_err(|e| anyhow!("rendering index template: {e}"))?;

    let xml_path = dir.join(crate::paths::INDEX_FILE);
    std::fs::write(&xml_path, rendered.as_bytes())
        .with_context(|| format!("writing {}", xml_path.display()))?;

    if opts.compression == Compression::Xz {
        let xz_path = dir.join(format!("{}.xz", crate::paths::INDEX_FILE));
        let f = File::create(&xz_path).with_context(|| format!("creating {}", xz_path.display()))?;
        let mut encoder = XzEncoder::new(f, 6);
        encoder.write_all(rendered.as_bytes())?;
        encoder.finish()?;
    }

    Ok(())
}

/// Stubbed binary-diff builder (spec.md §4.4, §9): the distilled source
/// disables real delta creation, and this crate follows suit. Returning an
/// empty artifact list drives the "no delta possible" branch in
/// `delta::create_for`.
pub struct DeltaBuilder;

impl DeltaBuilder {
    pub fn create(_old_path: &Path, _new_path: &Path, _dest_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::build_pkg;
    use super::*;

    #[test]
    fn inspects_a_well_formed_pkg_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo-1.0-1-1-x86_64.pkg");
        std::fs::write(&path, build_pkg("foo", "foo", "1.0", 1, "1.0:1")).unwrap();

        let meta = inspect(&path).unwrap();
        assert_eq!(meta.binary_name, "foo");
        assert_eq!(meta.source_name, "foo");
        assert_eq!(meta.release, 1);
        assert_eq!(meta.history[0].release, 1);
    }

    #[test]
    fn rejects_mismatched_history_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo-1.0-2-1-x86_64.pkg");
        std::fs::write(&path, build_pkg("foo", "foo", "1.0", 2, "1.0:1")).unwrap();

        assert!(inspect(&path).is_err());
    }

    #[test]
    fn write_index_produces_xml_and_xz_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![IndexEntry {
            binary_name: "foo".into(),
            source_name: "foo".into(),
            version: "1.0".into(),
            release: 1,
            distribution_release: "1".into(),
            architecture: "x86_64".into(),
            uri: "f/foo/foo-1.0-1-1-x86_64.pkg".into(),
            size: 1234,
            sha256: "deadbeef".into(),
        }];
        write_index(dir.path(), &entries, &WriteIndexOptions::default()).unwrap();

        assert!(dir.path().join("eopkg-index.xml").exists());
        assert!(dir.path().join("eopkg-index.xml.xz").exists());
        let content = std::fs::read_to_string(dir.path().join("eopkg-index.xml")).unwrap();
        assert!(content.contains("foo"));
    }
}
