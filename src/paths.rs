//! Path containment checks for everything placed under the home root.
//!
//! Directory names come from configuration and repository names come from
//! webhook payloads, so both are validated before being joined onto `home`.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors from path validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A single path component was empty, `.`/`..`, or contained a separator.
    #[error("invalid path component: {0:?}")]
    InvalidComponent(String),

    /// A path does not resolve to a subdirectory of the home root.
    #[error("{path} is not a subdirectory of {home}")]
    OutsideHome { path: PathBuf, home: PathBuf },
}

/// Validates that `name` is safe to use as one path component.
///
/// A component is unsafe if it:
/// - Is empty
/// - Is `.` or `..`
/// - Contains `/`, `\` or a NUL byte
pub fn validate_path_component(name: &str) -> Result<(), PathError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(PathError::InvalidComponent(name.to_string()));
    }
    Ok(())
}

/// Lexically normalizes `path`, resolving `.` and `..` without touching the
/// filesystem. Returns `None` if `..` would climb above the path's root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Returns `path` relative to `home`, requiring a strict subdirectory.
///
/// `home` itself is rejected: publishing or building directly into the home
/// root would clobber every other target.
pub fn relative_to_home(home: &Path, path: &Path) -> Result<PathBuf, PathError> {
    let outside = || PathError::OutsideHome {
        path: path.to_path_buf(),
        home: home.to_path_buf(),
    };

    let home_norm = normalize(home).ok_or_else(outside)?;
    let path_norm = normalize(path).ok_or_else(outside)?;

    match path_norm.strip_prefix(&home_norm) {
        Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
        _ => Err(outside()),
    }
}

/// Joins `name` onto `base` after validating it as a single component.
pub fn join_component(base: &Path, name: &str) -> Result<PathBuf, PathError> {
    validate_path_component(name)?;
    Ok(base.join(name))
}

/// Formats a relative path with `/` separators, as used for storage keys.
pub fn to_key(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
