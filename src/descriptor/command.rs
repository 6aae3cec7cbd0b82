//! Command specifications for build and install sequences.
//!
//! Commands are executed directly, never through an implicit shell. A
//! descriptor that needs shell features names the shell as the program:
//!
//! ```toml
//! install = [
//!     "mkdir -p $STAGE/usr/bin",
//!     { program = "sh", args = ["-c", "echo x > $STAGE/usr/bin/tool"] },
//! ]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// One command of a build or install sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory relative to the unpacked source tree.
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Split a whitespace-separated command line. Returns `None` when empty.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).args(words))
    }

    /// Substitute `$VAR` / `${VAR}` references from `vars`.
    pub fn expand(&self, vars: &BTreeMap<String, String>) -> CommandSpec {
        CommandSpec {
            program: expand_vars(&self.program, vars),
            args: self.args.iter().map(|a| expand_vars(a, vars)).collect(),
            dir: self
                .dir
                .as_ref()
                .map(|d| PathBuf::from(expand_vars(&d.to_string_lossy(), vars))),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Textual forms accepted in a descriptor.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CommandToml {
    Line(String),
    Table {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        dir: Option<PathBuf>,
    },
}

impl CommandToml {
    pub(crate) fn into_spec(self) -> Option<CommandSpec> {
        match self {
            CommandToml::Line(line) => CommandSpec::parse_line(&line),
            CommandToml::Table { program, args, dir } => {
                if program.trim().is_empty() {
                    return None;
                }
                Some(CommandSpec { program, args, dir })
            }
        }
    }
}

/// Expand `$NAME` and `${NAME}`. Unknown variables are left untouched.
pub fn expand_vars(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match vars.get(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("STAGE".to_string(), "/tmp/stage".to_string());
        vars.insert("PKG_NAME".to_string(), "rust-dnf".to_string());
        vars
    }

    #[test]
    fn test_parse_line_splits_whitespace() {
        let cmd = CommandSpec::parse_line("  mkdir   -p $STAGE/bin ").unwrap();
        assert_eq!(cmd.program, "mkdir");
        assert_eq!(cmd.args, vec!["-p", "$STAGE/bin"]);
        assert!(CommandSpec::parse_line("   ").is_none());
    }

    #[test]
    fn test_expand_plain_and_braced() {
        let vars = vars();
        assert_eq!(expand_vars("$STAGE/bin", &vars), "/tmp/stage/bin");
        assert_eq!(
            expand_vars("${STAGE}/usr/share/doc/${PKG_NAME}", &vars),
            "/tmp/stage/usr/share/doc/rust-dnf"
        );
    }

    #[test]
    fn test_expand_leaves_unknown_and_lone_dollar() {
        let vars = vars();
        assert_eq!(expand_vars("$HOME/x", &vars), "$HOME/x");
        assert_eq!(expand_vars("cost: 5$", &vars), "cost: 5$");
        assert_eq!(expand_vars("${unterminated", &vars), "${unterminated");
    }

    #[test]
    fn test_expand_command_spec() {
        let cmd = CommandSpec::new("install")
            .args(["-D", "README.md", "$STAGE/usr/share/doc/$PKG_NAME/README.md"])
            .dir("sub");
        let expanded = cmd.expand(&vars());
        assert_eq!(
            expanded.args[2],
            "/tmp/stage/usr/share/doc/rust-dnf/README.md"
        );
        assert_eq!(expanded.dir, Some(PathBuf::from("sub")));
    }

    #[test]
    fn test_display_quotes_whitespace_args() {
        let cmd = CommandSpec::new("sh").args(["-c", "echo x > out"]);
        assert_eq!(cmd.to_string(), "sh -c 'echo x > out'");
    }
}
