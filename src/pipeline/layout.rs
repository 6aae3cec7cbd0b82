//! Output directory layout for one packaging run.
//!
//! ```text
//! <output>/
//!   .locks/<name>-<version>.lock
//!   SOURCES/<name>-<version>.tar.zst
//!   BUILD/<name>-<version>/            unpacked source, command cwd
//!   BUILD/<name>-<version>.cache/      private CARGO_HOME and HOME
//!   BUILDROOT/<name>-<version>-<release>/   staging root
//!   ARTIFACTS/<name>-<version>-<release>.<arch>.pkg.tar.zst
//! ```

use std::path::{Path, PathBuf};

use crate::archive::{self, SOURCES_DIR};
use crate::descriptor::PackageDescriptor;

pub const BUILD_DIR: &str = "BUILD";
pub const BUILDROOT_DIR: &str = "BUILDROOT";
pub const ARTIFACTS_DIR: &str = "ARTIFACTS";

/// Artifact file extension.
pub const ARTIFACT_EXT: &str = "pkg.tar.zst";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub output_dir: PathBuf,
    pub archive_path: PathBuf,
    pub build_dir: PathBuf,
    pub toolchain_cache: PathBuf,
    pub staging_root: PathBuf,
    pub artifact_path: PathBuf,
}

impl BuildLayout {
    pub fn new(output_dir: &Path, descriptor: &PackageDescriptor, arch: &str) -> Self {
        let nv = descriptor.name_version();
        let nvr = descriptor.nvr();
        Self {
            output_dir: output_dir.to_path_buf(),
            archive_path: archive::archive_path(output_dir, &descriptor.name, &descriptor.version),
            build_dir: output_dir.join(BUILD_DIR).join(&nv),
            toolchain_cache: output_dir.join(BUILD_DIR).join(format!("{nv}.cache")),
            staging_root: output_dir.join(BUILDROOT_DIR).join(&nvr),
            artifact_path: output_dir
                .join(ARTIFACTS_DIR)
                .join(format!("{nvr}.{arch}.{ARTIFACT_EXT}")),
        }
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.output_dir.join(SOURCES_DIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.output_dir.join(ARTIFACTS_DIR)
    }

    /// Top-level directories the run may write into.
    pub fn roots(&self) -> [PathBuf; 4] {
        [
            self.sources_dir(),
            self.output_dir.join(BUILD_DIR),
            self.output_dir.join(BUILDROOT_DIR),
            self.artifacts_dir(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let d = PackageDescriptor::builtin().unwrap();
        let layout = BuildLayout::new(Path::new("/out"), &d, "x86_64");
        assert_eq!(
            layout.archive_path,
            PathBuf::from("/out/SOURCES/rust-dnf-0.1.0.tar.zst")
        );
        assert_eq!(layout.build_dir, PathBuf::from("/out/BUILD/rust-dnf-0.1.0"));
        assert_eq!(
            layout.staging_root,
            PathBuf::from("/out/BUILDROOT/rust-dnf-0.1.0-1")
        );
        assert_eq!(
            layout.artifact_path,
            PathBuf::from("/out/ARTIFACTS/rust-dnf-0.1.0-1.x86_64.pkg.tar.zst")
        );
        assert!(layout.toolchain_cache.starts_with("/out/BUILD"));
    }
}
