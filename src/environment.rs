//! Isolated execution context for build and install commands.
//!
//! Commands see a whitelisted environment, never the invoking user's full
//! one. The toolchain cache (`CARGO_HOME`) and `HOME` point into the run's own
//! build tree, so builds neither read nor pollute the user's global cache.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Variable that relocates the toolchain's cache.
pub const TOOLCHAIN_CACHE_VAR: &str = "CARGO_HOME";

/// Host variables passed through to commands unchanged.
const PASSTHROUGH_VARS: &[&str] = &["PATH", "LANG", "LC_ALL", "TERM", "RUSTUP_TOOLCHAIN"];

/// Per-command resource limits, applied with `setrlimit` in the child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// RLIMIT_CPU, in seconds.
    pub cpu_seconds: Option<u64>,
    /// RLIMIT_FSIZE, in bytes.
    pub file_size_bytes: Option<u64>,
}

impl ResourceLimits {
    pub fn is_unlimited(&self) -> bool {
        self.cpu_seconds.is_none() && self.file_size_bytes.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    work_dir: PathBuf,
    toolchain_cache: PathBuf,
    vars: BTreeMap<String, String>,
    limits: ResourceLimits,
}

impl BuildEnvironment {
    /// Environment rooted at `work_dir` with a private toolchain cache.
    pub fn new(work_dir: &Path, toolchain_cache: &Path) -> Self {
        let mut vars = BTreeMap::new();
        for key in PASSTHROUGH_VARS {
            if let Ok(value) = env::var(key) {
                vars.insert((*key).to_string(), value);
            }
        }
        if !vars.contains_key("PATH") {
            vars.insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string());
        }

        // rustup proxies locate toolchains through RUSTUP_HOME (or HOME, which
        // is redirected below).
        let rustup_home = env::var_os("RUSTUP_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".rustup")))
            .filter(|p| p.is_dir());
        if let Some(rustup_home) = rustup_home {
            vars.insert(
                "RUSTUP_HOME".to_string(),
                rustup_home.to_string_lossy().into_owned(),
            );
        }

        vars.insert(
            TOOLCHAIN_CACHE_VAR.to_string(),
            toolchain_cache.join("cargo").to_string_lossy().into_owned(),
        );
        vars.insert(
            "HOME".to_string(),
            toolchain_cache.join("home").to_string_lossy().into_owned(),
        );
        vars.insert(
            "BUILD_DIR".to_string(),
            work_dir.to_string_lossy().into_owned(),
        );

        Self {
            work_dir: work_dir.to_path_buf(),
            toolchain_cache: toolchain_cache.to_path_buf(),
            vars,
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn toolchain_cache(&self) -> &Path {
        &self.toolchain_cache
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Directories the environment points at that must exist before use.
    pub fn private_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.toolchain_cache.join("cargo"),
            self.toolchain_cache.join("home"),
        ]
    }
}
