//! POSIX-style path helpers for server paths
//!
//! Server paths are always `/`-separated and relative to the server root.
//! A normalized path has no leading or trailing slash, no empty segments,
//! and no `.` segments; the root itself is the empty string.

/// Join path fragments and normalize the result
#[must_use]
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = parts
        .into_iter()
        .filter(|part| !part.as_ref().is_empty())
        .map(|part| part.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

/// Normalize a path
///
/// `..` segments pop the previous segment; leading `..` segments that
/// would climb above the root are kept for relative paths and dropped for
/// absolute ones.
#[must_use]
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Strip leading slashes
#[inline]
#[must_use]
pub fn remove_slash(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Last path segment
#[must_use]
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Everything before the last path segment, normalized
#[must_use]
pub fn dirname(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(idx) => normalized[..idx].to_string(),
        None => String::new(),
    }
}

/// Last dotted suffix of the basename, including the dot
///
/// Dotfiles without a further extension (`.bashrc`) have no extension.
#[must_use]
pub fn extname(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx..],
    }
}

/// Resolve `path` against `root`
#[must_use]
pub fn resolve(root: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        join([root, path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_collapses_and_strips() {
        assert_eq!(normalize("/a//b/./c/"), "a/b/c");
        assert_eq!(normalize("a/b/../c"), "a/c");
        assert_eq!(normalize("../a"), "../a");
        assert_eq!(normalize("/../a"), "a");
        assert_eq!(normalize("."), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn join_skips_empty_parts() {
        assert_eq!(join(["", "foo", "bar.txt"]), "foo/bar.txt");
        assert_eq!(join(["foo/", "/bar"]), "foo/bar");
        assert_eq!(join(Vec::<String>::new()), "");
    }

    #[test]
    fn basename_dirname_extname() {
        assert_eq!(basename("a/b/c.ipynb"), "c.ipynb");
        assert_eq!(basename("c.ipynb"), "c.ipynb");
        assert_eq!(dirname("a/b/c.ipynb"), "a/b");
        assert_eq!(dirname("c.ipynb"), "");
        assert_eq!(extname("a/b/c.tar.gz"), ".gz");
        assert_eq!(extname(".bashrc"), "");
        assert_eq!(extname("Makefile"), "");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(resolve("work", "notes.md"), "work/notes.md");
        assert_eq!(resolve("work", "/notes.md"), "notes.md");
        assert_eq!(resolve("work/sub", "../notes.md"), "work/notes.md");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-z./]{0,24}") {
            let once = normalize(&path);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert!(!once.starts_with('/'));
            prop_assert!(!once.ends_with('/'));
        }
    }
}
