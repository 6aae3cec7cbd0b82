//! Preflight checks run before CLEAN.
//!
//! A descriptor's `build_requires` names the host tools its build and install
//! sequences need. A missing tool is a fatal precondition, reported before any
//! output state is touched.
//!
//! # Example
//!
//! ```rust
//! use package_builder::preflight::{check_required_tools, find_command};
//!
//! if find_command("cargo").is_none() {
//!     println!("cargo not installed");
//! }
//!
//! if let Err(e) = check_required_tools(["sh", "install"]) {
//!     eprintln!("{}", e);
//! }
//! ```

use std::path::PathBuf;

use log::debug;

use crate::error::{PipelineError, Result};

/// Locate `cmd` on PATH.
pub fn find_command(cmd: &str) -> Option<PathBuf> {
    which::which(cmd).ok()
}

/// Check that every named tool is on PATH.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err(PipelineError::MissingTool)` listing every missing tool
pub fn check_required_tools<I, S>(tools: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut missing = Vec::new();

    for tool in tools {
        let tool = tool.as_ref();
        match find_command(tool) {
            Some(path) => debug!("found {} at {}", tool, path.display()),
            None => missing.push(tool.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::MissingTool { tools: missing });
    }

    Ok(())
}
