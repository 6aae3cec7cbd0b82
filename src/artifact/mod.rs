//! Packaged artifacts and their embedded metadata.
//!
//! An artifact is a `tar.zst` whose first member is [`METADATA_MEMBER`], a JSON
//! document describing the package, followed by the manifested payload under
//! paths relative to `/`.

pub mod digest;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::tar_zst;
use crate::descriptor::{ChangelogEntry, FileClass};
use crate::error::{IoResultExt, PipelineError, Result};

/// Archive member holding [`ArtifactMetadata`].
pub const METADATA_MEMBER: &str = ".PKGINFO.json";

/// Metadata schema version.
pub const METADATA_FORMAT: u32 = 1;

/// One payload entry as recorded in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute install path.
    pub path: String,
    pub class: FileClass,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub size: u64,
    /// Absent for directories.
    pub sha256: Option<String>,
    /// Install, but never overwrite on upgrade.
    pub config_no_replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format: u32,
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub summary: String,
    pub url: String,
    pub license: Vec<String>,
    pub requires: Vec<String>,
    pub build_requires: Vec<String>,
    /// Seconds since the Unix epoch.
    pub build_time: i64,
    pub files: Vec<FileRecord>,
    pub license_files: Vec<String>,
    pub doc_files: Vec<String>,
    pub gpg_keys: Vec<String>,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
}

impl ArtifactMetadata {
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// An assembled, immutable package file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    /// Read an artifact's metadata back from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = tar_zst::read_member(path, METADATA_MEMBER)
            .at_path(path)?
            .ok_or_else(|| PipelineError::Unpack {
                path: path.to_path_buf(),
                reason: format!("no {METADATA_MEMBER} member"),
            })?;
        let metadata: ArtifactMetadata =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::Unpack {
                path: path.to_path_buf(),
                reason: format!("parsing {METADATA_MEMBER}: {e}"),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
        })
    }

    pub fn nvr(&self) -> String {
        self.metadata.nvr()
    }

    /// Payload member paths (relative to `/`), metadata excluded.
    pub fn payload_paths(&self) -> Result<Vec<String>> {
        let entries = tar_zst::list_entries(&self.path).at_path(&self.path)?;
        Ok(entries
            .into_iter()
            .filter(|e| e != METADATA_MEMBER)
            .collect())
    }

    /// Entries an installer must not overwrite on upgrade.
    pub fn config_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.metadata.files.iter().filter(|f| f.config_no_replace)
    }
}
