//! Absolute item paths
//!
//! Paths are `/`-separated sequences of qualified names. Stored paths are
//! always normalized: absolute, no trailing slash, no `.` or `..` segments.

use crate::error::{RepositoryError, RepositoryResult};

pub const ROOT: &str = "/";

/// Normalize an absolute path, resolving `.` and `..`
pub fn normalize(path: &str) -> RepositoryResult<String> {
    if !path.starts_with('/') {
        return Err(RepositoryError::value_format(format!(
            "not an absolute path: {}",
            path
        )));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(RepositoryError::value_format(format!(
                        "path escapes the root: {}",
                        path
                    )));
                }
            }
            s => segments.push(s),
        }
    }
    Ok(join_segments(&segments))
}

/// Resolve `relative` against `base`; an absolute `relative` ignores `base`
pub fn resolve(base: &str, relative: &str) -> RepositoryResult<String> {
    if relative.starts_with('/') {
        return normalize(relative);
    }
    if relative.is_empty() {
        return normalize(base);
    }
    normalize(&format!("{}/{}", base.trim_end_matches('/'), relative))
}

fn join_segments(segments: &[&str]) -> String {
    if segments.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::new();
    for s in segments {
        out.push('/');
        out.push_str(s);
    }
    out
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Parent path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last segment, empty for the root
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Append a single segment
pub fn child(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Number of segments, zero for the root
pub fn depth(path: &str) -> usize {
    if is_root(path) {
        0
    } else {
        path.matches('/').count()
    }
}

/// Whether `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if is_root(ancestor) {
        return !is_root(path);
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// `path` relative to `ancestor`, without a leading slash
pub fn relativize<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
    if path == ancestor {
        return Some("");
    }
    if !is_descendant(path, ancestor) {
        return None;
    }
    let skip = if is_root(ancestor) { 1 } else { ancestor.len() + 1 };
    Some(&path[skip..])
}

/// The path itself followed by each ancestor up to the root
pub fn ancestors_and_self(path: &str) -> Vec<String> {
    let mut out = vec![path.to_string()];
    let mut current = path;
    while let Some(p) = parent(current) {
        out.push(p.to_string());
        current = p;
    }
    out
}

/// Half-open bounds `[low, high)` covering every path strictly below `path`
///
/// Paths compare bytewise, and `0` is the byte after `/`, so the range is
/// exactly the strings that start with `path/`.
pub fn descendant_range(path: &str) -> (String, String) {
    let base = if is_root(path) { "" } else { path };
    (format!("{}/", base), format!("{}0", base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/a//b/").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert!(normalize("a/b").is_err());
        assert!(normalize("/..").is_err());
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve("/a/b", "c/d").unwrap(), "/a/b/c/d");
        assert_eq!(resolve("/a/b", "..").unwrap(), "/a");
        assert_eq!(resolve("/", "x").unwrap(), "/x");
        assert_eq!(resolve("/a", "/z").unwrap(), "/z");
    }

    #[test]
    fn test_parent_name_depth() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(name("/a/jcr:content"), "jcr:content");
        assert_eq!(name("/"), "");
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/b"), 2);
        assert_eq!(child("/", "a"), "/a");
        assert_eq!(child("/a", "b"), "/a/b");
    }

    #[test]
    fn test_descendant_checks() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert_eq!(relativize("/a", "/a/b/c"), Some("b/c"));
        assert_eq!(relativize("/", "/a"), Some("a"));
        assert_eq!(relativize("/a", "/b"), None);
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors_and_self("/a/b"), vec!["/a/b", "/a", "/"]);
    }

    #[test]
    fn test_descendant_range() {
        let (low, high) = descendant_range("/a");
        for inside in ["/a/b", "/a/b/c", "/a/%"] {
            assert!(inside > low.as_str() && inside < high.as_str(), "{}", inside);
        }
        for outside in ["/a", "/ab", "/a.b", "/b"] {
            assert!(!(outside > low.as_str() && outside < high.as_str()), "{}", outside);
        }
        assert_eq!(descendant_range("/"), ("/".to_string(), "0".to_string()));
    }
}
