//! VALIDATE: cross-check the staging root against the file manifest.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

use crate::descriptor::{ManifestEntry, PackageDescriptor};
use crate::error::{PipelineError, Result};

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Staged files no manifest entry claims. They are not shipped.
    pub unpackaged: Vec<String>,
}

/// Every manifest path must exist under `staging_root` with the declared
/// type: a directory for `directory` entries, a regular file otherwise.
pub fn run(staging_root: &Path, descriptor: &PackageDescriptor) -> Result<ValidationReport> {
    for entry in &descriptor.files {
        check_entry(staging_root, entry)?;
    }

    let unpackaged = unpackaged_files(staging_root, descriptor);
    for path in &unpackaged {
        warn!("installed but unpackaged: /{path}");
    }
    Ok(ValidationReport { unpackaged })
}

fn check_entry(staging_root: &Path, entry: &ManifestEntry) -> Result<()> {
    let staged = staging_root.join(entry.relative_path());
    let mismatch = |reason: String| PipelineError::ManifestMismatch {
        path: entry.path.clone(),
        reason,
    };

    if let Some(link) = symlinked_parent(staging_root, &entry.relative_path()) {
        return Err(mismatch(format!(
            "staged beneath symlinked directory '{}'",
            link.display()
        )));
    }

    let md = fs::symlink_metadata(&staged)
        .map_err(|_| mismatch(format!("declared {} but not produced by install", entry.class)))?;

    if md.file_type().is_symlink() {
        return Err(mismatch(format!(
            "declared {} but staged as a symlink",
            entry.class
        )));
    }

    if entry.class.is_directory() {
        if md.is_dir() {
            return Ok(());
        }
        return Err(mismatch("declared directory but staged as a file".to_string()));
    }

    if md.is_file() {
        Ok(())
    } else if md.is_dir() {
        Err(mismatch(format!(
            "declared {} but staged as a directory",
            entry.class
        )))
    } else {
        Err(mismatch(format!(
            "declared {} but staged as a special file",
            entry.class
        )))
    }
}

/// First directory above `rel`'s final component that is a symlink, as a
/// path relative to `staging_root`.
pub(crate) fn symlinked_parent(staging_root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut current = staging_root.to_path_buf();
    for component in rel.parent()?.components() {
        current.push(component);
        let is_link = fs::symlink_metadata(&current)
            .map(|md| md.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            return current.strip_prefix(staging_root).ok().map(Path::to_path_buf);
        }
    }
    None
}

/// Staged regular files and symlinks not covered by any manifest entry.
fn unpackaged_files(staging_root: &Path, descriptor: &PackageDescriptor) -> Vec<String> {
    let claimed: BTreeSet<String> = descriptor
        .files
        .iter()
        .map(|e| e.relative_path().to_string_lossy().into_owned())
        .collect();

    WalkDir::new(staging_root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| {
            let rel = e
                .path()
                .strip_prefix(staging_root)
                .ok()?
                .to_string_lossy()
                .into_owned();
            (!claimed.contains(&rel)).then_some(rel)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FileClass;
    use tempfile::TempDir;

    fn descriptor(files: Vec<ManifestEntry>) -> PackageDescriptor {
        let mut d = PackageDescriptor::from_toml("name = 'tool'\nversion = '1'\n").unwrap();
        d.files = files;
        d
    }

    fn staging() -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("stage");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/tool"), "x\n").unwrap();
        fs::create_dir_all(root.join("var/lib/tool")).unwrap();
        (tmp, root)
    }

    #[test]
    fn test_validate_passes_when_all_paths_match() {
        let (_tmp, root) = staging();
        let d = descriptor(vec![
            ManifestEntry::new("/bin/tool", FileClass::Plain),
            ManifestEntry::new("/var/lib/tool", FileClass::Directory),
        ]);
        let report = run(&root, &d).unwrap();
        assert!(report.unpackaged.is_empty());
    }

    #[test]
    fn test_validate_fails_on_missing_path() {
        let (_tmp, root) = staging();
        let d = descriptor(vec![
            ManifestEntry::new("/bin/tool", FileClass::Plain),
            ManifestEntry::new("/etc/missing.conf", FileClass::ConfigNoReplace),
        ]);
        match run(&root, &d).unwrap_err() {
            PipelineError::ManifestMismatch { path, reason } => {
                assert_eq!(path, "/etc/missing.conf");
                assert!(reason.contains("not produced"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_fails_on_type_mismatch() {
        let (_tmp, root) = staging();
        let file_as_dir = descriptor(vec![ManifestEntry::new("/bin/tool", FileClass::Directory)]);
        assert!(matches!(
            run(&root, &file_as_dir),
            Err(PipelineError::ManifestMismatch { .. })
        ));

        let dir_as_file = descriptor(vec![ManifestEntry::new("/var/lib/tool", FileClass::Doc)]);
        assert!(matches!(
            run(&root, &dir_as_file),
            Err(PipelineError::ManifestMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_symlinked_entry() {
        let (_tmp, root) = staging();
        std::os::unix::fs::symlink("tool", root.join("bin/alias")).unwrap();
        let d = descriptor(vec![ManifestEntry::new("/bin/alias", FileClass::Plain)]);
        assert!(run(&root, &d).is_err());
    }

    #[test]
    fn test_validate_rejects_symlinked_parent_directory() {
        let (tmp, root) = staging();
        let host = tmp.path().join("host");
        fs::create_dir_all(&host).unwrap();
        fs::write(host.join("secret"), "HOST FILE\n").unwrap();
        std::os::unix::fs::symlink(&host, root.join("etc")).unwrap();

        let d = descriptor(vec![ManifestEntry::new("/etc/secret", FileClass::Plain)]);
        match run(&root, &d).unwrap_err() {
            PipelineError::ManifestMismatch { path, reason } => {
                assert_eq!(path, "/etc/secret");
                assert!(reason.contains("symlinked directory 'etc'"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_symlinked_parent_ignores_plain_directories() {
        let (_tmp, root) = staging();
        assert_eq!(symlinked_parent(&root, Path::new("bin/tool")), None);
        assert_eq!(symlinked_parent(&root, Path::new("tool")), None);
    }

    #[test]
    fn test_validate_reports_unpackaged_files() {
        let (_tmp, root) = staging();
        fs::write(root.join("bin/extra"), "y").unwrap();
        let d = descriptor(vec![ManifestEntry::new("/bin/tool", FileClass::Plain)]);
        let report = run(&root, &d).unwrap();
        assert_eq!(report.unpackaged, vec!["bin/extra"]);
    }
}
