//! Path normalization
//!
//! Registered paths and request paths are compared in normalized form only.

/// Normalize a URL path
///
/// Ensures a single leading slash, collapses repeated slashes and strips
/// trailing slashes. The empty path and `/` both normalize to `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_forms() {
        assert_eq!(normalize_path("/foo"), "/foo");
        assert_eq!(normalize_path("foo"), "/foo");
        assert_eq!(normalize_path("/foo/"), "/foo");
        assert_eq!(normalize_path("//foo//bar///"), "/foo/bar");
    }

    #[test]
    fn test_root() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn test_idempotent() {
        for path in ["", "/", "a", "/a/b/", "//x//y", "/feeds/udp-1"] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once);
        }
    }

    #[test]
    fn test_case_and_dots_preserved() {
        assert_eq!(normalize_path("/Feed/./x"), "/Feed/./x");
    }
}
