//! Error taxonomy for the packaging pipeline.
//!
//! Every stage failure is fatal. The driver wraps the underlying error in
//! [`PipelineError::Stage`] so the report names the stage that failed.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Stages of a packaging run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Host tool and lock checks before anything is touched.
    Preflight,
    /// Source tree snapshot.
    Archive,
    Clean,
    Unpack,
    Build,
    Install,
    Validate,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preflight => write!(f, "PREFLIGHT"),
            Stage::Archive => write!(f, "ARCHIVE"),
            Stage::Clean => write!(f, "CLEAN"),
            Stage::Unpack => write!(f, "UNPACK"),
            Stage::Build => write!(f, "BUILD"),
            Stage::Install => write!(f, "INSTALL"),
            Stage::Validate => write!(f, "VALIDATE"),
            Stage::Assemble => write!(f, "ASSEMBLE"),
        }
    }
}

/// Errors raised by the archiver and the packager.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source archive could not be written.
    #[error("cannot write archive {}: {reason}", path.display())]
    ArchiveWrite { path: PathBuf, reason: String },

    /// The source archive is missing or corrupt.
    #[error("cannot unpack archive {}: {reason}", path.display())]
    Unpack { path: PathBuf, reason: String },

    /// A build or install command exited non-zero (or could not be spawned).
    #[error("command `{command}` failed with {}{}", describe_code(*code), describe_stderr(stderr))]
    CommandExecution {
        command: String,
        /// `None` when the process was killed by a signal or never started.
        code: Option<i32>,
        stderr: String,
    },

    /// Staged contents do not match the declared file manifest.
    #[error("manifest mismatch at {path}: {reason}")]
    ManifestMismatch { path: String, reason: String },

    /// The package descriptor is malformed.
    #[error("invalid package descriptor: {0}")]
    Descriptor(String),

    /// Required build tools are not on PATH.
    #[error("missing required build tools: {}", tools.join(", "))]
    MissingTool { tools: Vec<String> },

    /// Another invocation holds the output lock for this name+version.
    #[error("{} is locked by another packaging run", path.display())]
    Locked { path: PathBuf },

    /// A caller-held lock does not cover the package being built.
    #[error("lock {} does not cover {expected}", held.display())]
    LockMismatch { held: PathBuf, expected: String },

    /// A stage failed; `source` carries the cause.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage in which the error was raised, if it has been attributed.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, with stage wrappers removed.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Attach a path to a raw `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| PipelineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapper_names_stage() {
        let err = PipelineError::ManifestMismatch {
            path: "/etc/missing.conf".into(),
            reason: "not produced by install".into(),
        }
        .in_stage(Stage::Validate);

        let msg = err.to_string();
        assert!(msg.starts_with("VALIDATE stage failed"), "{msg}");
        assert!(msg.contains("/etc/missing.conf"));
        assert_eq!(err.stage(), Some(Stage::Validate));
    }

    #[test]
    fn test_in_stage_does_not_double_wrap() {
        let err = PipelineError::Descriptor("bad".into())
            .in_stage(Stage::Build)
            .in_stage(Stage::Install);
        assert_eq!(err.stage(), Some(Stage::Build));
        assert!(matches!(err.root_cause(), PipelineError::Descriptor(_)));
    }

    #[test]
    fn test_command_error_message() {
        let err = PipelineError::CommandExecution {
            command: "false".into(),
            code: Some(1),
            stderr: "  boom \n".into(),
        };
        assert_eq!(err.to_string(), "command `false` failed with exit code 1:\nboom");
    }
}
