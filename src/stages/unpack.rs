//! UNPACK: extract the source archive into a fresh build directory.

use std::fs;
use std::path::Path;

use crate::archive::tar_zst;
use crate::error::{PipelineError, Result};

pub fn run(archive: &Path, build_dir: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(PipelineError::Unpack {
            path: archive.to_path_buf(),
            reason: "archive not found".to_string(),
        });
    }

    let unpack_err = |reason: String| PipelineError::Unpack {
        path: archive.to_path_buf(),
        reason,
    };

    if build_dir.exists() {
        fs::remove_dir_all(build_dir)
            .map_err(|e| unpack_err(format!("removing '{}': {e}", build_dir.display())))?;
    }
    fs::create_dir_all(build_dir)
        .map_err(|e| unpack_err(format!("creating '{}': {e}", build_dir.display())))?;

    tar_zst::unpack(archive, build_dir).map_err(|e| unpack_err(e.to_string()))
}
