//! Prefix expansion for dot-separated type paths.
//!
//! `expand("a.b.c") == ["a", "a.b", "a.b.c"]`. The bulk loader runs this
//! client-side for every record; the single-row path sends the same
//! expansion to the store routine, which rejects any list that does not end
//! in the full path or has the wrong length.

use crate::constants::SEPARATOR;

/// Number of segments in `path`. The empty string has none.
pub fn segment_count(path: &str) -> usize {
    if path.is_empty() {
        return 0;
    }
    path.bytes().filter(|&b| b == SEPARATOR as u8).count() + 1
}

/// True when `path` is non-empty and has no empty segment.
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split(SEPARATOR).all(|segment| !segment.is_empty())
}

/// Every ancestor prefix of `path`, shortest first, ending with `path` itself.
pub fn expand(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut prefixes = Vec::with_capacity(segment_count(path));
    for (i, c) in path.char_indices() {
        if c == SEPARATOR {
            prefixes.push(path[..i].to_string());
        }
    }
    prefixes.push(path.to_string());
    prefixes
}

/// The first `depth` segments of `path`, or `None` when the path is shallower.
pub fn leading(path: &str, depth: usize) -> Option<&str> {
    if depth == 0 || depth > segment_count(path) {
        return None;
    }
    let end = path
        .match_indices(SEPARATOR)
        .nth(depth - 1)
        .map(|(i, _)| i)
        .unwrap_or(path.len());
    Some(&path[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn expands_three_segments() {
        assert_eq!(expand("a.b.c"), vec!["a", "a.b", "a.b.c"]);
    }

    #[test]
    fn single_segment_expands_to_itself() {
        assert_eq!(expand("labs"), vec!["labs"]);
        assert_eq!(segment_count("labs"), 1);
    }

    #[test]
    fn empty_path_has_no_prefixes() {
        assert!(expand("").is_empty());
        assert_eq!(segment_count(""), 0);
        assert!(!is_valid_path(""));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(!is_valid_path("labs..quest"));
        assert!(!is_valid_path(".labs"));
        assert!(!is_valid_path("labs."));
        assert!(is_valid_path("labs.result_webhooks.quest"));
    }

    #[test]
    fn leading_segments() {
        let path = "labs.result_webhooks.quest.node_7";
        assert_eq!(leading(path, 1), Some("labs"));
        assert_eq!(leading(path, 2), Some("labs.result_webhooks"));
        assert_eq!(leading(path, 4), Some(path));
        assert_eq!(leading(path, 5), None);
        assert_eq!(leading(path, 0), None);
    }

    fn valid_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z0-9_]{1,8}", 1..8).prop_map(|segments| segments.join("."))
    }

    proptest! {
        #[test]
        fn expansion_length_equals_segment_count(path in valid_path()) {
            prop_assert_eq!(expand(&path).len(), segment_count(&path));
        }

        #[test]
        fn expansion_ends_with_full_path(path in valid_path()) {
            let prefixes = expand(&path);
            prop_assert_eq!(prefixes.last().map(String::as_str), Some(path.as_str()));
        }

        #[test]
        fn expansion_is_prefix_closed(path in valid_path()) {
            let prefixes = expand(&path);
            for (i, prefix) in prefixes.iter().enumerate() {
                let inner = expand(prefix);
                prop_assert_eq!(inner.last(), Some(prefix));
                prop_assert_eq!(&inner[..], &prefixes[..=i]);
            }
        }

        #[test]
        fn prefixes_grow_strictly(path in valid_path()) {
            let prefixes = expand(&path);
            for pair in prefixes.windows(2) {
                prop_assert!(pair[1].starts_with(&pair[0]));
                prop_assert!(pair[1].len() > pair[0].len());
            }
        }

        #[test]
        fn leading_agrees_with_expand(path in valid_path()) {
            let prefixes = expand(&path);
            for (i, prefix) in prefixes.iter().enumerate() {
                prop_assert_eq!(leading(&path, i + 1), Some(prefix.as_str()));
            }
        }
    }
}
