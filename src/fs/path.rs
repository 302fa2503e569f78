use alloc::string::String;

use crate::config::PATH_MAX;
use crate::error::StorageError;

/// Accepts absolute paths of at most [`PATH_MAX`] bytes.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(StorageError::InvalidArg);
    }
    if path.len() > PATH_MAX {
        return Err(StorageError::InvalidSize);
    }
    Ok(())
}

/// Maps a path under the active mount point onto the volume. Paths outside
/// it are already volume paths.
pub fn to_volume_path<'a>(mount_point: &str, path: &'a str) -> &'a str {
    let mount_point = mount_point.trim_end_matches('/');
    if mount_point.is_empty() {
        return path;
    }
    match path.strip_prefix(mount_point) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => trimmed[..idx].trim_end_matches('/'),
        None => ".",
    }
}

/// Text after the last dot of the basename. Dotfiles have no extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    let base = base.trim_end_matches('/');
    let mut out = String::with_capacity(base.len() + name.len() + 1);
    out.push_str(base);
    if !name.is_empty() || out.is_empty() {
        out.push('/');
    }
    out.push_str(name);
    out
}

/// True when `path` is `dir` itself or lies below it.
pub fn is_within(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    if dir.is_empty() {
        return true;
    }
    match path.strip_prefix(dir) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
