//! Property tests for path normalization.

use proptest::prelude::*;

use dirmon::path::{join, normalize_dir, normalize_slashes, strip_root, with_trailing_slash};

fn segment() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z0-9._ -]{1,12}").unwrap()
}

fn mixed_separator_path() -> impl Strategy<Value = String> {
    let sep = prop_oneof![Just("/"), Just("\\"), Just("//"), Just("\\\\")];
    proptest::collection::vec((segment(), sep), 1..=6).prop_map(|parts| {
        parts
            .into_iter()
            .map(|(seg, sep)| format!("{seg}{sep}"))
            .collect::<String>()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: Slash normalization is idempotent and leaves no backslash behind.
    #[test]
    fn property_normalize_slashes_idempotent(s in "(?s).{0,128}") {
        let once = normalize_slashes(&s);
        prop_assert!(!once.contains('\\'));
        prop_assert_eq!(normalize_slashes(&once), once.clone());
        prop_assert_eq!(once.len(), s.len());
    }

    /// PROPERTY: A stored directory always ends in exactly one `/`.
    #[test]
    fn property_normalize_dir_single_trailing_slash(s in mixed_separator_path()) {
        let dir = normalize_dir(&s);
        prop_assert!(dir.ends_with('/'));
        prop_assert!(!dir.ends_with("//"));
        prop_assert!(!dir.contains('\\'));
        prop_assert_eq!(normalize_dir(&dir), dir.clone());
    }

    /// PROPERTY: Runs of separators inside a path are not collapsed.
    #[test]
    fn property_interior_separators_preserved(a in segment(), b in segment()) {
        let input = format!("{a}\\\\{b}");
        prop_assert_eq!(normalize_slashes(&input), format!("{a}//{b}"));
    }

    /// PROPERTY: Joining under a root and stripping it again gives the relative path back.
    #[test]
    fn property_join_then_strip(root in mixed_separator_path(), rel in mixed_separator_path()) {
        let root = normalize_dir(&root);
        let rel = normalize_slashes(&rel);
        let full = join(&root, &rel);
        prop_assert_eq!(strip_root(&full, &root), Some(rel.as_str()));
    }

    /// PROPERTY: The empty path stays empty; anything else gains a trailing slash.
    #[test]
    fn property_trailing_slash_empty_rule(s in "[a-z/]{0,16}") {
        let out = with_trailing_slash(&s);
        if s.is_empty() {
            prop_assert!(out.is_empty());
        } else {
            prop_assert!(out.ends_with('/'));
        }
    }
}
