//! Comparison-only canonicalization of free text.
//!
//! The two systems render the same body differently: one re-serializes
//! markdown with its own emphasis and heading markers, image links carry
//! signed URLs that change on every fetch, and whitespace is not preserved.
//! [`normalize`] folds those differences away so equal bodies compare equal.
//! The output is only ever compared, never written back.

use once_cell::sync::Lazy;
use regex::Regex;

use tandem_core::System;

static MARKDOWN_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[.*?\]\(.*?\)").expect("valid image regex"));

const IMAGE_PLACEHOLDER: &str = "![](link)";
const EMPHASIS_CHARS: [char; 5] = ['*', '_', '-', '/', '\\'];

/// Canonicalize `text` for equality tests.
///
/// Steps run in a fixed order:
/// 1. image references become `![](link)`
/// 2. whitespace and `#` are removed
/// 3. lower-case
/// 4. `* _ - / \` are removed
/// 5. the literal `[image]` becomes `[]`
/// 6. trim
///
/// The second argument names the system the text came from. Both systems
/// share one rule set, so it does not affect the result.
pub fn normalize(text: &str, _source: System) -> String {
    let masked = MARKDOWN_IMAGE_RE.replace_all(text, IMAGE_PLACEHOLDER);
    let compact: String = masked
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '#')
        .collect();
    let lowered = compact.to_lowercase();
    let plain: String = lowered
        .chars()
        .filter(|c| !EMPHASIS_CHARS.contains(c))
        .collect();
    plain.replace("[image]", "[]").trim().to_string()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn markup_and_case_do_not_create_diffs() {
        assert_eq!(
            normalize("Fixed the **bug** in [image]", System::Documents),
            normalize("fixed the bug in []", System::Tracker),
        );
    }

    #[test]
    fn both_systems_share_one_rule_set() {
        let text = "## Steps\n*Click* the ![btn](https://x/y.png) button";
        assert_eq!(
            normalize(text, System::Documents),
            normalize(text, System::Tracker)
        );
    }

    #[rstest]
    #[case("![screenshot](https://cdn.example/a.png?sig=1)", "![](link)")]
    #[case("![](https://cdn.example/b.png?sig=2)", "![](link)")]
    #[case("# Heading\n\nBody", "headingbody")]
    #[case("a_b-c/d\\e*f", "abcdef")]
    #[case("  \t\n", "")]
    #[case("See [image] and [Image]", "see[]and[]")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input, System::Documents), expected);
    }

    #[test]
    fn volatile_image_urls_compare_equal() {
        let a = "Repro:\n![shot](https://files.example/x.png?expires=1)";
        let b = "repro: ![other alt](https://files.example/x.png?expires=2)";
        assert_eq!(normalize(a, System::Documents), normalize(b, System::Tracker));
    }

    #[test]
    fn image_masking_runs_before_whitespace_stripping() {
        // The alt text spans a space; masking must see it before step 2.
        assert_eq!(normalize("![my shot](u v)", System::Tracker), "![](link)");
    }

    #[test]
    fn deterministic() {
        let input = "Some *mixed* `text` with ![img](x) and [image]";
        assert_eq!(
            normalize(input, System::Documents),
            normalize(input, System::Documents)
        );
    }

    #[test]
    fn different_words_still_differ() {
        assert_ne!(
            normalize("fixed the bug", System::Documents),
            normalize("fixed the bugs", System::Tracker)
        );
    }
}
