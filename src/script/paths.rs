//! Lexical slash-separated path helpers behind the `path::` module.
//!
//! Only `abs` and `exists` touch the filesystem.

use std::path::Path;

/// Shortest equivalent path: repeated slashes, `.` and resolvable `..`
/// removed. Empty input cleans to `.`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join the non-empty parts with `/` and clean the result.
pub fn join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let kept: Vec<&str> = parts.into_iter().filter(|part| !part.is_empty()).collect();
    if kept.is_empty() {
        return String::new();
    }
    clean(&kept.join("/"))
}

/// Last element, ignoring trailing slashes.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(i) => trimmed[i + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything up to the last element, cleaned.
pub fn dir(path: &str) -> String {
    let head = path.rfind('/').map_or("", |i| &path[..=i]);
    clean(head)
}

/// Extension of the last element including the dot, or empty.
pub fn ext(path: &str) -> String {
    let name = path.rfind('/').map_or(path, |i| &path[i + 1..]);
    name.rfind('.')
        .map_or_else(String::new, |i| name[i..].to_string())
}

/// Relative paths are resolved against the working directory.
pub fn abs(path: &str) -> std::io::Result<String> {
    if path.starts_with('/') {
        return Ok(clean(path));
    }
    let cwd = std::env::current_dir()?;
    let cwd = cwd.to_string_lossy();
    Ok(join([cwd.as_ref(), path]))
}

pub fn exists(path: &str) -> bool {
    Path::new(path).exists()
}
