use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `base` unless it is already absolute.
pub(crate) fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Lexically normalize `path`: drop `.` and fold `..` where possible.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` made absolute against the working directory.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// `path` relative to `root`, if it lies strictly inside it.
///
/// Relative inputs resolve against the working directory first, so a
/// relative root still contains an absolute path beneath it.
pub(crate) fn relative_inside(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = normalize(&absolute(root));
    let path = normalize(&absolute(path));
    match path.strip_prefix(&root) {
        Ok(rel) if !rel.as_os_str().is_empty() => Some(rel.to_path_buf()),
        _ => None,
    }
}
