//! Declarative package descriptors.
//!
//! A descriptor names the package, lists its build and install command
//! sequences, and declares the file manifest the staged install must match.
//!
//! ```toml
//! name = "rust-dnf"
//! version = "0.1.0"
//! release = "1"
//! license = ["MIT"]
//! build_requires = ["cargo"]
//! build = ["cargo build --release --locked"]
//! install = ["install -D -m 0755 target/release/rust-dnf $STAGE/usr/bin/rust-dnf"]
//!
//! [[files]]
//! path = "/usr/bin/rust-dnf"
//! mode = 0o755
//! class = "plain"
//! ```

pub mod command;

pub use command::CommandSpec;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, PipelineError, Result};
use command::CommandToml;

/// Descriptor for the rust-dnf package, compiled into the binary.
pub const BUILTIN_DESCRIPTOR: &str = include_str!("../../packaging/rust-dnf.toml");

/// Classification of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileClass {
    Plain,
    Directory,
    /// Installed, but never overwritten on upgrade.
    ConfigNoReplace,
    Doc,
    License,
    GpgKey,
}

impl FileClass {
    pub fn is_directory(self) -> bool {
        self == FileClass::Directory
    }

    pub fn default_mode(self) -> u32 {
        match self {
            FileClass::Directory => 0o755,
            _ => 0o644,
        }
    }
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileClass::Plain => write!(f, "plain"),
            FileClass::Directory => write!(f, "directory"),
            FileClass::ConfigNoReplace => write!(f, "config-no-replace"),
            FileClass::Doc => write!(f, "doc"),
            FileClass::License => write!(f, "license"),
            FileClass::GpgKey => write!(f, "gpg-key"),
        }
    }
}

/// One installed path and how it is owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Absolute install path, e.g. `/usr/bin/rust-dnf`.
    pub path: String,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub class: FileClass,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, class: FileClass) -> Self {
        Self {
            path: path.into(),
            mode: class.default_mode(),
            owner: "root".to_string(),
            group: "root".to_string(),
            class,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Install path relative to the staging root (`usr/bin/rust-dnf`).
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.path.trim_start_matches('/'))
    }
}

/// A changelog entry embedded in artifact metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub date: String,
    pub author: String,
    pub text: String,
}

/// Declarative description of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    pub release: String,
    pub summary: String,
    pub license: Vec<String>,
    pub url: String,
    pub build_requires: Vec<String>,
    pub requires: Vec<String>,
    pub build: Vec<CommandSpec>,
    pub install: Vec<CommandSpec>,
    pub files: Vec<ManifestEntry>,
    pub changelog: Vec<ChangelogEntry>,
}

impl PackageDescriptor {
    /// `<name>-<version>`, the archive and build directory stem.
    pub fn name_version(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// `<name>-<version>-<release>`, the artifact identity.
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// Parse and validate descriptor text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: DescriptorToml =
            toml::from_str(text).map_err(|e| PipelineError::Descriptor(e.to_string()))?;
        raw.into_descriptor()
    }

    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at_path(path)?;
        Self::from_toml(&text).map_err(|e| match e {
            PipelineError::Descriptor(msg) => {
                PipelineError::Descriptor(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// The descriptor for rust-dnf shipped with this crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_DESCRIPTOR)
    }

    /// Manifest entries of the given class.
    pub fn files_of(&self, class: FileClass) -> impl Iterator<Item = &ManifestEntry> {
        self.files.iter().filter(move |f| f.class == class)
    }

    /// Check the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<()> {
        validate_segment("name", &self.name)?;
        validate_segment("version", &self.version)?;
        validate_segment("release", &self.release)?;

        let mut seen = BTreeSet::new();
        for entry in &self.files {
            validate_install_path(&entry.path)?;
            if !seen.insert(entry.path.trim_end_matches('/')) {
                return Err(PipelineError::Descriptor(format!(
                    "manifest lists '{}' more than once",
                    entry.path
                )));
            }
            if entry.mode > 0o7777 {
                return Err(PipelineError::Descriptor(format!(
                    "mode {:o} for '{}' is out of range",
                    entry.mode, entry.path
                )));
            }
        }

        for cmd in self.build.iter().chain(&self.install) {
            if let Some(dir) = &cmd.dir {
                if dir.is_absolute()
                    || dir.components().any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(PipelineError::Descriptor(format!(
                        "command `{}` has working directory '{}' outside the source tree",
                        cmd,
                        dir.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PipelineError::Descriptor(format!("{field} must not be empty")));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(PipelineError::Descriptor(format!(
            "{field} must be a safe filename segment, got '{value}'"
        )));
    }
    Ok(())
}

fn validate_install_path(raw: &str) -> Result<()> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(PipelineError::Descriptor(format!(
            "manifest path '{raw}' must be absolute"
        )));
    }
    if path.components().count() < 2 {
        return Err(PipelineError::Descriptor(
            "manifest must not list the filesystem root".to_string(),
        ));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir | Component::CurDir) {
            return Err(PipelineError::Descriptor(format!(
                "manifest path '{raw}' contains '.' or '..'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorToml {
    name: String,
    version: String,
    #[serde(default = "default_release")]
    release: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    license: Vec<String>,
    #[serde(default)]
    url: String,
    #[serde(default, alias = "buildRequires")]
    build_requires: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    build: Vec<CommandToml>,
    #[serde(default)]
    install: Vec<CommandToml>,
    #[serde(default)]
    files: Vec<ManifestEntryToml>,
    #[serde(default)]
    changelog: Vec<ChangelogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEntryToml {
    path: String,
    class: FileClass,
    mode: Option<u32>,
    owner: Option<String>,
    group: Option<String>,
}

fn default_release() -> String {
    "1".to_string()
}

impl DescriptorToml {
    fn into_descriptor(self) -> Result<PackageDescriptor> {
        let commands = |list: Vec<CommandToml>, field: &str| -> Result<Vec<CommandSpec>> {
            list.into_iter()
                .enumerate()
                .map(|(i, raw)| {
                    raw.into_spec().ok_or_else(|| {
                        PipelineError::Descriptor(format!("{field}[{i}] is an empty command"))
                    })
                })
                .collect()
        };

        let descriptor = PackageDescriptor {
            build: commands(self.build, "build")?,
            install: commands(self.install, "install")?,
            name: self.name.trim().to_string(),
            version: self.version.trim().to_string(),
            release: self.release.trim().to_string(),
            summary: self.summary,
            license: self.license,
            url: self.url,
            build_requires: self.build_requires,
            requires: self.requires,
            files: self
                .files
                .into_iter()
                .map(|f| ManifestEntry {
                    mode: f.mode.unwrap_or_else(|| f.class.default_mode()),
                    owner: f.owner.unwrap_or_else(|| "root".to_string()),
                    group: f.group.unwrap_or_else(|| "root".to_string()),
                    path: f.path,
                    class: f.class,
                })
                .collect(),
            changelog: self.changelog,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "tool"
version = "1.2.3"
summary = "A tool"
license = ["MIT", "Apache-2.0"]
buildRequires = ["true"]
build = ["true"]
install = [
    "mkdir -p $STAGE/bin",
    { program = "sh", args = ["-c", "echo x > $STAGE/bin/tool"] },
]

[[files]]
path = "/bin/tool"
class = "plain"
mode = 0o755

[[files]]
path = "/etc/tool.conf"
class = "config-no-replace"

[[files]]
path = "/var/lib/tool"
class = "directory"

[[changelog]]
date = "2024-01-01"
author = "Packager <packager@example.com>"
text = "Initial package"
"#;

    #[test]
    fn test_parse_sample_descriptor() {
        let d = PackageDescriptor::from_toml(SAMPLE).unwrap();
        assert_eq!(d.nvr(), "tool-1.2.3-1");
        assert_eq!(d.build_requires, vec!["true"]);
        assert_eq!(d.install.len(), 2);
        assert_eq!(d.install[1].program, "sh");
        assert_eq!(d.install[1].args[1], "echo x > $STAGE/bin/tool");
        assert_eq!(d.files[0].mode, 0o755);
        assert_eq!(d.files[1].mode, 0o644);
        assert_eq!(d.files[1].class, FileClass::ConfigNoReplace);
        assert_eq!(d.files[2].mode, 0o755);
        assert_eq!(d.files[2].owner, "root");
        assert_eq!(d.changelog.len(), 1);
    }

    #[test]
    fn test_rejects_relative_manifest_path() {
        let text = r#"
name = "tool"
version = "1"
[[files]]
path = "bin/tool"
class = "plain"
"#;
        let err = PackageDescriptor::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("must be absolute"), "{err}");
    }

    #[test]
    fn test_rejects_parent_traversal_and_duplicates() {
        let traversal = r#"
name = "tool"
version = "1"
[[files]]
path = "/usr/../etc/passwd"
class = "plain"
"#;
        assert!(PackageDescriptor::from_toml(traversal).is_err());

        let dup = r#"
name = "tool"
version = "1"
[[files]]
path = "/bin/tool"
class = "plain"
[[files]]
path = "/bin/tool"
class = "doc"
"#;
        let err = PackageDescriptor::from_toml(dup).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_unknown_class_and_fields() {
        let text = r#"
name = "tool"
version = "1"
[[files]]
path = "/bin/tool"
class = "executable"
"#;
        assert!(PackageDescriptor::from_toml(text).is_err());
        assert!(PackageDescriptor::from_toml("name='a'\nversion='1'\nbogus=1\n").is_err());
    }

    #[test]
    fn test_rejects_unsafe_name() {
        assert!(PackageDescriptor::from_toml("name='../x'\nversion='1'\n").is_err());
        assert!(PackageDescriptor::from_toml("name=''\nversion='1'\n").is_err());
    }

    #[test]
    fn test_builtin_descriptor_declares_layout() {
        let d = PackageDescriptor::builtin().unwrap();
        assert_eq!(d.name, "rust-dnf");

        let class_of = |path: &str| {
            d.files
                .iter()
                .find(|f| f.path == path)
                .map(|f| f.class)
                .unwrap_or_else(|| panic!("{path} missing from manifest"))
        };
        assert_eq!(class_of("/usr/bin/rust-dnf"), FileClass::Plain);
        assert_eq!(
            class_of("/etc/rust-dnf/config.toml"),
            FileClass::ConfigNoReplace
        );
        assert_eq!(class_of("/var/cache/rust-dnf"), FileClass::Directory);
        assert_eq!(class_of("/var/lib/rust-dnf"), FileClass::Directory);
        assert_eq!(
            class_of("/etc/pki/rpm-gpg/RPM-GPG-KEY-rust-dnf"),
            FileClass::GpgKey
        );
        assert_eq!(
            class_of("/usr/share/licenses/rust-dnf/LICENSE"),
            FileClass::License
        );
        assert_eq!(class_of("/usr/share/doc/rust-dnf/README.md"), FileClass::Doc);
        assert!(d.build_requires.iter().any(|t| t == "cargo"));
    }

    #[test]
    fn test_relative_path_strips_root() {
        let entry = ManifestEntry::new("/usr/bin/rust-dnf", FileClass::Plain);
        assert_eq!(entry.relative_path(), PathBuf::from("usr/bin/rust-dnf"));
    }
}
