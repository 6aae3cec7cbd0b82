//! Source tree snapshots.
//!
//! The archiver walks a source root, prunes everything matched by the
//! exclusion set, and writes the remaining entries into a single `tar.zst`
//! with paths relative to the root. The archive path depends only on the
//! package name and version, so each run replaces the previous archive.

pub mod tar_zst;

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::{IoResultExt, PipelineError, Result};
use tar_zst::{MemberAttrs, TarZstWriter};

/// Directory holding source archives under the output root.
pub const SOURCES_DIR: &str = "SOURCES";

/// Build output, packaging output, and version-control metadata.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["target", "pkgbuild", ".git"];

/// Compiled exclusion patterns.
///
/// A relative path is excluded when a pattern globs it or one of its
/// ancestors, or when the pattern is a literal path prefix of it.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    raw: Vec<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = Vec::new();
        let mut compiled = Vec::new();
        for pattern in patterns {
            let trimmed = pattern
                .as_ref()
                .trim()
                .trim_start_matches("./")
                .trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let p = Pattern::new(trimmed).map_err(|e| {
                PipelineError::Descriptor(format!("invalid exclusion pattern '{trimmed}': {e}"))
            })?;
            raw.push(trimmed.to_string());
            compiled.push(p);
        }
        Ok(Self {
            raw,
            patterns: compiled,
        })
    }

    pub fn defaults() -> Result<Self> {
        Self::new(DEFAULT_EXCLUSIONS)
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }

    /// Add another pattern, ignoring duplicates.
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let extra = Self::new([pattern])?;
        for (raw, compiled) in extra.raw.into_iter().zip(extra.patterns) {
            if !self.raw.contains(&raw) {
                self.raw.push(raw);
                self.patterns.push(compiled);
            }
        }
        Ok(())
    }

    pub fn is_excluded(&self, rel: &Path) -> bool {
        rel.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|candidate| {
                self.patterns.iter().zip(&self.raw).any(|(pattern, raw)| {
                    pattern.matches_path(candidate) || candidate == Path::new(raw)
                })
            })
    }
}

/// Immutable record of one archived source tree.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub root: PathBuf,
    pub exclusions: Vec<String>,
    pub archive_path: PathBuf,
    /// Archived relative paths, sorted.
    pub entries: Vec<String>,
}

/// `<output>/SOURCES/<name>-<version>.tar.zst`
pub fn archive_path(output_dir: &Path, name: &str, version: &str) -> PathBuf {
    output_dir
        .join(SOURCES_DIR)
        .join(format!("{name}-{version}.tar.zst"))
}

/// Snapshot `root` into `archive_path`.
///
/// The destination directory must already exist. Any archive left at
/// `archive_path` by a previous run is removed before writing.
pub fn snapshot(
    root: &Path,
    exclusions: &ExclusionSet,
    archive_path: &Path,
) -> Result<SourceSnapshot> {
    let root_md = fs::metadata(root).at_path(root)?;
    if !root_md.is_dir() {
        return Err(PipelineError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source root is not a directory"),
        ));
    }
    fs::read_dir(root).at_path(root)?;

    let dest_dir = archive_path.parent().unwrap_or_else(|| Path::new("."));
    if !dest_dir.is_dir() {
        return Err(PipelineError::ArchiveWrite {
            path: archive_path.to_path_buf(),
            reason: format!("destination directory '{}' does not exist", dest_dir.display()),
        });
    }

    let entries = collect_entries(root, exclusions)?;

    if archive_path.exists() {
        fs::remove_file(archive_path).map_err(|e| PipelineError::ArchiveWrite {
            path: archive_path.to_path_buf(),
            reason: format!("removing previous archive: {e}"),
        })?;
    }

    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let tmp = dest_dir.join(format!(".{file_name}.partial"));

    let write_err = |e: std::io::Error| PipelineError::ArchiveWrite {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut writer = TarZstWriter::create(&tmp).map_err(write_err)?;
    let attrs = MemberAttrs::default();
    for rel in &entries {
        let abs = root.join(rel);
        // Read failures here are source-side, not destination-side.
        if let Err(e) = writer.append_path(rel, &abs, &attrs) {
            let _ = fs::remove_file(&tmp);
            return Err(PipelineError::io(&abs, e));
        }
    }
    writer.finish().map_err(write_err)?;
    fs::rename(&tmp, archive_path).map_err(write_err)?;

    info!(
        "archived {} entries from {} into {}",
        entries.len(),
        root.display(),
        archive_path.display()
    );

    Ok(SourceSnapshot {
        root: root.to_path_buf(),
        exclusions: exclusions.patterns().to_vec(),
        archive_path: archive_path.to_path_buf(),
        entries,
    })
}

/// Walk `root` and return the sorted, non-excluded relative paths.
pub fn collect_entries(root: &Path, exclusions: &ExclusionSet) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            let excluded = exclusions.is_excluded(rel);
            if excluded {
                debug!("excluding {}", rel.display());
            }
            !excluded
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("filesystem loop while walking source tree")
            });
            PipelineError::io(path, source)
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        entries.push(rel);
    }

    entries.sort();
    Ok(entries)
}
