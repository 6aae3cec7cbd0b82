//! CLEAN: remove every output of a previous run for this name+version.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{IoResultExt, Result};
use crate::pipeline::layout::BuildLayout;

/// Remove the previous build tree, toolchain cache, staging root and artifact,
/// then recreate the top-level output directories. Idempotent.
pub fn run(layout: &BuildLayout) -> Result<()> {
    remove_dir_if_exists(&layout.build_dir)?;
    remove_dir_if_exists(&layout.toolchain_cache)?;
    remove_dir_if_exists(&layout.staging_root)?;
    remove_file_if_exists(&layout.artifact_path)?;
    remove_file_if_exists(&partial_path(&layout.artifact_path))?;

    for root in layout.roots() {
        fs::create_dir_all(&root).at_path(&root)?;
    }
    Ok(())
}

/// Temporary path an artifact is written to before being renamed into place.
pub(crate) fn partial_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() || path.is_symlink() {
        debug!("removing {}", path.display());
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(path).at_path(path)?;
        } else {
            fs::remove_file(path).at_path(path)?;
        }
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    if path.exists() || path.is_symlink() {
        debug!("removing {}", path.display());
        fs::remove_file(path).at_path(path)?;
    }
    Ok(())
}
