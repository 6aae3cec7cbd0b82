//! Source archiving and isolated build-root packaging.
//!
//! Two stages turn a working source tree into an installable artifact:
//!
//! - **Archiver** ([`archive`]) snapshots the tree into a deterministic
//!   `SOURCES/<name>-<version>.tar.zst`, skipping build output, packaging
//!   output and version-control metadata.
//! - **Packager** ([`pipeline::Packager`]) unpacks that archive into a fresh
//!   build root, runs the descriptor's build and install commands, checks the
//!   staged tree against the file manifest, and assembles
//!   `ARTIFACTS/<name>-<version>-<release>.<arch>.pkg.tar.zst`.
//!
//! # Architecture
//!
//! ```text
//! package-builder (bin)
//!     │
//!     ├── PackagerConfig::load      config file lookup
//!     ├── PackageDescriptor         TOML descriptor, built-in rust-dnf
//!     └── pipeline::run
//!           ├── OutputLock          .locks/<name>-<version>.lock
//!           ├── preflight           build_requires on PATH
//!           ├── archive::snapshot   SOURCES/
//!           └── Packager            CLEAN → UNPACK → BUILD → INSTALL
//!                                   → VALIDATE → ASSEMBLE
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use package_builder::{pipeline, PackageDescriptor, PackagerConfig};
//!
//! let config = PackagerConfig::load(None)?;
//! let descriptor = PackageDescriptor::builtin()?;
//! let artifact = pipeline::run(&config, &descriptor)?;
//! println!("{}", artifact.path.display());
//! ```

pub mod archive;
pub mod artifact;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod stages;

pub use artifact::{Artifact, ArtifactMetadata};
pub use descriptor::{CommandSpec, FileClass, ManifestEntry, PackageDescriptor};
pub use environment::{BuildEnvironment, ResourceLimits};
pub use error::{PipelineError, Result, Stage};
pub use lock::{LockMode, OutputLock};
pub use pipeline::{Packager, PackagerConfig, PipelineState};
pub use process::{CommandRunner, SystemRunner};
