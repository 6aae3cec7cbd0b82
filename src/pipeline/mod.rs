//! The packaging pipeline.
//!
//! ```text
//! PREFLIGHT -> CLEAN -> UNPACK -> BUILD -> INSTALL -> VALIDATE -> ASSEMBLE -> DONE
//! ```
//!
//! [`Packager`] drives one descriptor from a source archive to an artifact.
//! [`run`] is the full invocation: lock, preflight, archive, then package.
//! Any stage error ends the run; its message names the stage. Nothing is
//! cleaned up on failure; the next CLEAN is the recovery.

pub mod config;
pub mod layout;
pub(crate) mod paths;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::archive;
use crate::artifact::Artifact;
use crate::descriptor::PackageDescriptor;
use crate::environment::{BuildEnvironment, ResourceLimits};
use crate::error::{IoResultExt, PipelineError, Result, Stage};
use crate::lock::{LockMode, OutputLock};
use crate::preflight;
use crate::process::{run_sequence, CommandRunner, SystemRunner};
use crate::stages;

pub use config::PackagerConfig;
pub use layout::BuildLayout;

/// Where a packaging run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stage(Stage),
    Done,
    Failed(Stage),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Stage(stage) => write!(f, "{stage}"),
            PipelineState::Done => write!(f, "DONE"),
            PipelineState::Failed(stage) => write!(f, "FAILED ({stage})"),
        }
    }
}

/// Builds artifacts into one output directory.
pub struct Packager<R: CommandRunner = SystemRunner> {
    output_dir: PathBuf,
    arch: String,
    limits: ResourceLimits,
    lock_mode: LockMode,
    keep_staging: bool,
    build_time: i64,
    runner: R,
    observer: Option<Box<dyn Fn(PipelineState)>>,
}

impl Packager<SystemRunner> {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            arch: std::env::consts::ARCH.to_string(),
            limits: ResourceLimits::default(),
            lock_mode: LockMode::Fail,
            keep_staging: true,
            build_time: config::build_time(),
            runner: SystemRunner,
            observer: None,
        }
    }

    pub fn from_config(config: &PackagerConfig) -> Self {
        Self::new(&config.output_dir)
            .arch(&config.arch)
            .limits(config.limits)
            .lock_mode(config.lock)
            .keep_staging(config.keep_staging)
    }
}

impl<R: CommandRunner> Packager<R> {
    /// Replace the command runner.
    pub fn with_runner<S: CommandRunner>(self, runner: S) -> Packager<S> {
        Packager {
            output_dir: self.output_dir,
            arch: self.arch,
            limits: self.limits,
            lock_mode: self.lock_mode,
            keep_staging: self.keep_staging,
            build_time: self.build_time,
            runner,
            observer: self.observer,
        }
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Leave the staging root in place after ASSEMBLE.
    pub fn keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    /// Recorded build time, seconds since the epoch.
    pub fn build_time(mut self, secs: i64) -> Self {
        self.build_time = secs;
        self
    }

    /// Called on every state transition.
    pub fn on_state(mut self, observer: impl Fn(PipelineState) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn layout(&self, descriptor: &PackageDescriptor) -> BuildLayout {
        BuildLayout::new(&self.output_dir, descriptor, &self.arch)
    }

    /// Take the output lock for this name+version.
    pub fn lock(&self, descriptor: &PackageDescriptor) -> Result<OutputLock> {
        fs::create_dir_all(&self.output_dir).at_path(&self.output_dir)?;
        OutputLock::acquire(&self.output_dir, &descriptor.name_version(), self.lock_mode)
    }

    /// Lock, then package `archive`.
    pub fn build(&self, archive: &Path, descriptor: &PackageDescriptor) -> Result<Artifact> {
        self.enter(Stage::Preflight);
        let _lock = self.lock(descriptor).map_err(|e| self.fail(e, Stage::Preflight))?;
        self.preflight(descriptor)?;
        self.run_stages(archive, descriptor)
    }

    /// Package `archive` while the caller holds the output lock.
    ///
    /// `lock` must be this output directory's lock for the descriptor's
    /// name+version.
    pub fn build_locked(
        &self,
        lock: &OutputLock,
        archive: &Path,
        descriptor: &PackageDescriptor,
    ) -> Result<Artifact> {
        self.enter(Stage::Preflight);
        let nv = descriptor.name_version();
        if lock.path() != OutputLock::path_for(&self.output_dir, &nv) {
            let err = PipelineError::LockMismatch {
                held: lock.path().to_path_buf(),
                expected: nv,
            };
            return Err(self.fail(err, Stage::Preflight));
        }
        self.preflight(descriptor)?;
        self.run_stages(archive, descriptor)
    }

    fn preflight(&self, descriptor: &PackageDescriptor) -> Result<()> {
        preflight::check_required_tools(&descriptor.build_requires)
            .map_err(|e| self.fail(e, Stage::Preflight))
    }

    fn run_stages(&self, archive: &Path, descriptor: &PackageDescriptor) -> Result<Artifact> {
        let layout = self.layout(descriptor);

        self.enter(Stage::Clean);
        stages::clean::run(&layout).map_err(|e| self.fail(e, Stage::Clean))?;

        self.enter(Stage::Unpack);
        stages::unpack::run(archive, &layout.build_dir)
            .map_err(|e| self.fail(e, Stage::Unpack))?;

        let env = self.environment(&layout, descriptor);

        self.enter(Stage::Build);
        self.build_stage(descriptor, &env)
            .map_err(|e| self.fail(e, Stage::Build))?;

        self.enter(Stage::Install);
        self.install_stage(&layout, descriptor, &env)
            .map_err(|e| self.fail(e, Stage::Install))?;

        self.enter(Stage::Validate);
        stages::validate::run(&layout.staging_root, descriptor)
            .map_err(|e| self.fail(e, Stage::Validate))?;

        self.enter(Stage::Assemble);
        let artifact = stages::assemble::run(&layout, descriptor, &self.arch, self.build_time)
            .map_err(|e| self.fail(e, Stage::Assemble))?;

        if !self.keep_staging {
            fs::remove_dir_all(&layout.staging_root)
                .at_path(&layout.staging_root)
                .map_err(|e| self.fail(e, Stage::Assemble))?;
        }

        self.notify(PipelineState::Done);
        info!("built {}", artifact.path.display());
        Ok(artifact)
    }

    fn environment(
        &self,
        layout: &BuildLayout,
        descriptor: &PackageDescriptor,
    ) -> BuildEnvironment {
        let mut env = BuildEnvironment::new(&layout.build_dir, &layout.toolchain_cache)
            .with_limits(self.limits);
        let stage = layout.staging_root.to_string_lossy().into_owned();
        env.set("STAGE", stage.clone());
        env.set("DESTDIR", stage);
        env.set("PKG_NAME", descriptor.name.clone());
        env.set("PKG_VERSION", descriptor.version.clone());
        env.set("PKG_RELEASE", descriptor.release.clone());
        env.set("SOURCE_DATE_EPOCH", self.build_time.to_string());
        env
    }

    fn build_stage(&self, descriptor: &PackageDescriptor, env: &BuildEnvironment) -> Result<()> {
        for dir in env.private_dirs() {
            fs::create_dir_all(&dir).at_path(&dir)?;
        }
        run_sequence(&self.runner, "build", &descriptor.build, env)
    }

    fn install_stage(
        &self,
        layout: &BuildLayout,
        descriptor: &PackageDescriptor,
        env: &BuildEnvironment,
    ) -> Result<()> {
        fs::create_dir_all(&layout.staging_root).at_path(&layout.staging_root)?;
        run_sequence(&self.runner, "install", &descriptor.install, env)
    }

    fn enter(&self, stage: Stage) {
        info!("{stage}");
        self.notify(PipelineState::Stage(stage));
    }

    fn fail(&self, err: PipelineError, stage: Stage) -> PipelineError {
        let err = err.in_stage(stage);
        self.notify(PipelineState::Failed(err.stage().unwrap_or(stage)));
        err
    }

    fn notify(&self, state: PipelineState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }
}

/// Archive the configured source tree and package it.
///
/// The output lock is held from before PREFLIGHT until the artifact is in
/// place, so a concurrent run for the same name+version is refused (or waits)
/// before it can touch the shared paths.
pub fn run(config: &PackagerConfig, descriptor: &PackageDescriptor) -> Result<Artifact> {
    run_with(&Packager::from_config(config), config, descriptor)
}

/// [`run`] with a caller-supplied packager.
pub fn run_with<R: CommandRunner>(
    packager: &Packager<R>,
    config: &PackagerConfig,
    descriptor: &PackageDescriptor,
) -> Result<Artifact> {
    packager.enter(Stage::Preflight);
    let lock = packager
        .lock(descriptor)
        .map_err(|e| packager.fail(e, Stage::Preflight))?;
    packager.preflight(descriptor)?;

    packager.enter(Stage::Archive);
    let layout = packager.layout(descriptor);
    let snapshot = archive_sources(config, &layout).map_err(|e| packager.fail(e, Stage::Archive))?;

    let artifact = packager.run_stages(&snapshot.archive_path, descriptor)?;
    drop(lock);
    Ok(artifact)
}

fn archive_sources(
    config: &PackagerConfig,
    layout: &BuildLayout,
) -> Result<archive::SourceSnapshot> {
    let sources = layout.sources_dir();
    fs::create_dir_all(&sources).at_path(&sources)?;
    let exclusions = config.exclusion_set()?;
    archive::snapshot(&config.source_root, &exclusions, &layout.archive_path)
}
