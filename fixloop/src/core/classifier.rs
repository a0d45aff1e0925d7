//! Deterministic classification of build status text.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::BuildStatus;

static SUCCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| keyword_regex(&["success", "successful", "passed", "pass", "ok"]));
static FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| keyword_regex(&["fail", "failure", "failed", "error", "broken"]));
static PENDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(&[
        "pending",
        "running",
        "in-progress",
        "in progress",
        "building",
        "queued",
    ])
});

fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|keyword| regex::escape(keyword))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).expect("keyword regex must compile")
}

/// Classify raw status-check output.
///
/// Keyword sets are tested in priority order: success, failure, pending. The
/// first set with a whole-word match anywhere in the (trimmed, lowercased) text
/// wins. Anything unrecognized, including empty output, is `Pending`.
///
/// Matching is not negation-aware: "not a success" still classifies as success.
pub fn classify(text: &str) -> BuildStatus {
    match_keywords(text).unwrap_or(BuildStatus::Pending)
}

/// Return the status whose keyword set matches, or `None` if no keyword is present.
pub fn match_keywords(text: &str) -> Option<BuildStatus> {
    let normalized = text.trim().to_lowercase();
    if SUCCESS_RE.is_match(&normalized) {
        Some(BuildStatus::Success)
    } else if FAILURE_RE.is_match(&normalized) {
        Some(BuildStatus::Failure)
    } else if PENDING_RE.is_match(&normalized) {
        Some(BuildStatus::Pending)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_keyword_wins() {
        assert_eq!(classify("Build passed with 0 warnings"), BuildStatus::Success);
        assert_eq!(classify("  SUCCESS\n"), BuildStatus::Success);
        assert_eq!(classify("ok"), BuildStatus::Success);
    }

    #[test]
    fn success_checked_before_failure() {
        assert_eq!(
            classify("error: retried, then passed"),
            BuildStatus::Success
        );
    }

    #[test]
    fn failure_keywords_only_is_failure() {
        assert_eq!(classify("Status: FAILED (2 tests)"), BuildStatus::Failure);
        assert_eq!(classify("build is broken"), BuildStatus::Failure);
        assert_eq!(classify("error"), BuildStatus::Failure);
    }

    #[test]
    fn pending_keywords() {
        assert_eq!(classify("queued"), BuildStatus::Pending);
        assert_eq!(classify("in-progress"), BuildStatus::Pending);
        assert_eq!(classify("job in progress"), BuildStatus::Pending);
    }

    #[test]
    fn unrecognized_or_empty_is_pending() {
        assert_eq!(classify(""), BuildStatus::Pending);
        assert_eq!(classify("   "), BuildStatus::Pending);
        assert_eq!(classify("cancelled"), BuildStatus::Pending);
        assert_eq!(match_keywords("cancelled"), None);
        assert_eq!(match_keywords("running"), Some(BuildStatus::Pending));
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "okay" and "passenger" contain success keywords as substrings only.
        assert_eq!(classify("okay passenger"), BuildStatus::Pending);
        assert_eq!(classify("errors: 3"), BuildStatus::Pending);
        assert_eq!(classify("failing"), BuildStatus::Pending);
    }

    #[test]
    fn negated_success_still_matches() {
        assert_eq!(classify("this is not a success"), BuildStatus::Success);
    }
}
