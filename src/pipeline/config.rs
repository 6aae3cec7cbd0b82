//! Packager configuration.
//!
//! ```toml
//! # package-builder.toml
//! source_root = "."
//! output_dir = "pkgbuild"
//! descriptor = "packaging/rust-dnf.toml"   # optional; built-in otherwise
//! exclude = ["target", "pkgbuild", ".git"]
//! arch = "x86_64"
//! keep_staging = true
//! lock = "fail"                            # or "wait"
//!
//! [limits]
//! cpu_seconds = 3600
//! file_size_bytes = 4294967296
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;

use crate::archive::{ExclusionSet, DEFAULT_EXCLUSIONS};
use crate::descriptor::PackageDescriptor;
use crate::environment::ResourceLimits;
use crate::error::PipelineError;
use crate::lock::LockMode;
use crate::pipeline::paths::{relative_inside, resolve_path};

/// Config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "package-builder.toml";

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PACKAGE_BUILDER_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerConfig {
    pub source_root: PathBuf,
    pub output_dir: PathBuf,
    /// Descriptor file; `None` selects the built-in rust-dnf descriptor.
    pub descriptor: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub arch: String,
    pub keep_staging: bool,
    pub lock: LockMode,
    pub limits: ResourceLimits,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self::rooted_at(Path::new("."))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackagerToml {
    source_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    descriptor: Option<PathBuf>,
    exclude: Option<Vec<String>>,
    arch: Option<String>,
    keep_staging: Option<bool>,
    lock: Option<LockMode>,
    limits: Option<ResourceLimits>,
}

impl PackagerConfig {
    /// Defaults for a source tree at `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            source_root: root.to_path_buf(),
            output_dir: root.join("pkgbuild"),
            descriptor: None,
            exclude: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
            arch: env::consts::ARCH.to_string(),
            keep_staging: true,
            lock: LockMode::Fail,
            limits: ResourceLimits::default(),
        }
    }

    /// Load configuration using the lookup order:
    /// `explicit`, `$PACKAGE_BUILDER_CONFIG`, `./package-builder.toml`,
    /// `<config dir>/package-builder/config.toml`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path))
                .with_context(|| format!("loading config named by ${CONFIG_ENV}"));
        }

        let local = PathBuf::from(CONFIG_FILENAME);
        if local.is_file() {
            return Self::from_file(&local);
        }

        if let Some(user) = dirs::config_dir().map(|d| d.join("package-builder/config.toml")) {
            if user.is_file() {
                return Self::from_file(&user);
            }
        }

        debug!("no config file found; using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_toml(&text, base).with_context(|| format!("parsing config '{}'", path.display()))
    }

    /// Parse config text; relative paths resolve against `base`.
    pub fn from_toml(text: &str, base: &Path) -> Result<Self> {
        let raw: PackagerToml = toml::from_str(text)?;

        let source_root = resolve_path(base, raw.source_root.as_deref().unwrap_or(Path::new(".")));
        let mut config = Self::rooted_at(&source_root);

        if let Some(out) = raw.output_dir {
            config.output_dir = resolve_path(base, &out);
        }
        config.descriptor = raw.descriptor.map(|d| resolve_path(base, &d));
        if let Some(exclude) = raw.exclude {
            config.exclude = exclude;
        }
        if let Some(arch) = raw.arch {
            let arch = arch.trim().to_string();
            if arch.is_empty() || arch.contains('/') {
                bail!("arch must be a non-empty filename segment, got '{}'", arch);
            }
            config.arch = arch;
        }
        if let Some(keep) = raw.keep_staging {
            config.keep_staging = keep;
        }
        if let Some(lock) = raw.lock {
            config.lock = lock;
        }
        if let Some(limits) = raw.limits {
            config.limits = limits;
        }
        Ok(config)
    }

    /// Configured exclusions, plus the output directory when it lives inside
    /// the source root.
    pub fn exclusion_set(&self) -> Result<ExclusionSet, PipelineError> {
        let mut set = ExclusionSet::new(&self.exclude)?;
        if let Some(rel) = relative_inside(&self.source_root, &self.output_dir) {
            set.push(&rel.to_string_lossy())?;
        }
        Ok(set)
    }

    pub fn load_descriptor(&self) -> Result<PackageDescriptor> {
        let descriptor = match &self.descriptor {
            Some(path) => PackageDescriptor::load(path)?,
            None => PackageDescriptor::builtin()?,
        };
        Ok(descriptor)
    }
}

/// Build timestamp: `$SOURCE_DATE_EPOCH` when set, otherwise now.
pub fn build_time() -> i64 {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or_else(|| time::OffsetDateTime::now_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PackagerConfig::rooted_at(Path::new("/repo"));
        assert_eq!(config.output_dir, PathBuf::from("/repo/pkgbuild"));
        assert_eq!(config.exclude, vec!["target", "pkgbuild", ".git"]);
        assert!(config.keep_staging);
        assert_eq!(config.lock, LockMode::Fail);
        assert!(config.descriptor.is_none());
    }

    #[test]
    fn test_from_toml_resolves_relative_paths() {
        let text = r#"
source_root = "src-tree"
output_dir = "/var/tmp/out"
descriptor = "packaging/tool.toml"
exclude = ["target", "*.log"]
arch = "aarch64"
keep_staging = false
lock = "wait"

[limits]
cpu_seconds = 60
"#;
        let config = PackagerConfig::from_toml(text, Path::new("/etc/pb")).unwrap();
        assert_eq!(config.source_root, PathBuf::from("/etc/pb/src-tree"));
        assert_eq!(config.output_dir, PathBuf::from("/var/tmp/out"));
        assert_eq!(
            config.descriptor,
            Some(PathBuf::from("/etc/pb/packaging/tool.toml"))
        );
        assert_eq!(config.arch, "aarch64");
        assert!(!config.keep_staging);
        assert_eq!(config.lock, LockMode::Wait);
        assert_eq!(config.limits.cpu_seconds, Some(60));
        assert_eq!(config.limits.file_size_bytes, None);
    }

    #[test]
    fn test_output_dir_defaults_under_source_root() {
        let config = PackagerConfig::from_toml("source_root = 'tree'\n", Path::new("/w")).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/w/tree/pkgbuild"));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_arch() {
        assert!(PackagerConfig::from_toml("bogus = 1\n", Path::new("/")).is_err());
        assert!(PackagerConfig::from_toml("arch = 'x/y'\n", Path::new("/")).is_err());
        assert!(PackagerConfig::from_toml("lock = 'sometimes'\n", Path::new("/")).is_err());
    }

    #[test]
    fn test_exclusion_set_covers_nested_output_dir() {
        let mut config = PackagerConfig::rooted_at(Path::new("/repo"));
        config.output_dir = PathBuf::from("/repo/build/packages");
        let set = config.exclusion_set().unwrap();
        assert!(set.is_excluded(Path::new("build/packages/SOURCES/x.tar.zst")));
        assert!(!set.is_excluded(Path::new("build/other")));
    }

    #[test]
    fn test_exclusion_set_covers_absolute_output_under_relative_root() {
        let mut config = PackagerConfig::rooted_at(Path::new("."));
        config.output_dir = env::current_dir().unwrap().join("out");
        let set = config.exclusion_set().unwrap();
        assert!(set.patterns().contains(&"out".to_string()));
        assert!(set.is_excluded(Path::new("out/SOURCES/tool-1.0.tar.zst")));
        assert!(set.is_excluded(Path::new("out/.locks/tool-1.0.lock")));
    }

    #[test]
    fn test_from_file_and_descriptor_loading() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("tool.toml"),
            "name = 'tool'\nversion = '2'\n",
        )
        .unwrap();
        let cfg_path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&cfg_path, "descriptor = 'tool.toml'\n").unwrap();

        let config = PackagerConfig::load(Some(&cfg_path)).unwrap();
        assert_eq!(config.source_root, tmp.path().join("."));
        let d = config.load_descriptor().unwrap();
        assert_eq!(d.name_version(), "tool-2");

        assert_eq!(
            PackagerConfig::default().load_descriptor().unwrap().name,
            "rust-dnf"
        );
    }
}
