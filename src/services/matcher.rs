//! Fuzzy plate matching against the configured watch-list
//!
//! Similarity is the Ratcliff/Obershelp ratio (2*M / total length, where M
//! sums the longest matching blocks), computed case-insensitively. A match
//! requires the best score to be strictly greater than the threshold.

use crate::infra::config::{Config, WatchedPlate};
use tracing::debug;

/// How matching behaves for the whole run, resolved once from config
///
/// A zero/absent threshold and an empty watch-list are distinct states, not
/// two spellings of the same numeric zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchPolicy {
    /// No threshold configured; matching is off
    Disabled,
    /// Threshold configured but nothing to match against
    NoWatchList,
    /// Match against the watch-list with this threshold
    Active(f64),
}

/// Result of checking one detected plate
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Disabled,
    NoWatchList,
    NoPlate,
    NoMatch { best_score: f64 },
    Matched { entry: WatchedPlate, score: f64 },
}

pub struct PlateMatcher {
    policy: MatchPolicy,
    watch_list: Vec<WatchedPlate>,
}

impl PlateMatcher {
    pub fn new(watch_list: Vec<WatchedPlate>, fuzzy_match: f64) -> Self {
        let policy = if fuzzy_match <= 0.0 {
            MatchPolicy::Disabled
        } else if watch_list.is_empty() {
            MatchPolicy::NoWatchList
        } else {
            MatchPolicy::Active(fuzzy_match)
        };
        Self { policy, watch_list }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.watched_plates().to_vec(), config.fuzzy_match())
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Compare a detected plate against the watch-list
    ///
    /// The watch-list is scanned in configuration order and ties keep the
    /// first entry at the maximum score.
    pub fn check(&self, detected: Option<&str>) -> MatchOutcome {
        let threshold = match self.policy {
            MatchPolicy::Disabled => return MatchOutcome::Disabled,
            MatchPolicy::NoWatchList => return MatchOutcome::NoWatchList,
            MatchPolicy::Active(threshold) => threshold,
        };
        let Some(detected) = detected else {
            return MatchOutcome::NoPlate;
        };

        let mut best: Option<(&WatchedPlate, f64)> = None;
        for entry in &self.watch_list {
            let score = similarity(detected, &entry.number);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((entry, score));
            }
        }

        match best {
            Some((entry, score)) if score > threshold => {
                debug!(plate = %detected, matched = %entry.number, score = %score, "watch_match");
                MatchOutcome::Matched { entry: entry.clone(), score }
            }
            Some((entry, score)) => {
                debug!(plate = %detected, best = %entry.number, score = %score, "below_threshold");
                MatchOutcome::NoMatch { best_score: score }
            }
            // Active policy implies a non-empty watch-list
            None => MatchOutcome::NoMatch { best_score: 0.0 },
        }
    }
}

/// Case-insensitive Ratcliff/Obershelp similarity in [0,1]
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_len(&a, &b) as f64 / total as f64
}

/// Total length of the longest matching blocks: take the longest common
/// substring, then recurse on the pieces to its left and right.
fn matching_len(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_len(&a[..i], &b[..j]) + matching_len(&a[i + len..], &b[j + len..])
}

/// Longest common substring of `a` and `b` as (start_a, start_b, len),
/// earliest occurrence winning ties
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut run_lengths = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        let mut next_run_lengths = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let len = run_lengths[j] + 1;
                next_run_lengths[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        run_lengths = next_run_lengths;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate(number: &str) -> WatchedPlate {
        WatchedPlate { number: number.to_string(), owner: None, brand: None }
    }

    #[test]
    fn test_similarity_identical() {
        assert_eq!(similarity("XYZ999", "XYZ999"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_similarity_case_insensitive() {
        assert_eq!(similarity("xyz999", "XYZ999"), 1.0);
    }

    #[test]
    fn test_similarity_disjoint() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_similarity_known_ratios() {
        // longest block "bcd" (3 chars) over 8 total
        assert_eq!(similarity("abcd", "bcde"), 0.75);
        assert_eq!(similarity("abcd", "bcda"), 0.75);
        // one char differs: block "ab" + block "d" = 3 of 8
        assert_eq!(similarity("abcd", "abxd"), 0.75);
    }

    #[test]
    fn test_similarity_empty_vs_nonempty() {
        assert_eq!(similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_policy_resolution() {
        assert_eq!(PlateMatcher::new(vec![plate("A")], 0.0).policy(), MatchPolicy::Disabled);
        assert_eq!(PlateMatcher::new(Vec::new(), 0.8).policy(), MatchPolicy::NoWatchList);
        assert_eq!(PlateMatcher::new(vec![plate("A")], 0.8).policy(), MatchPolicy::Active(0.8));
    }

    #[test]
    fn test_disabled_returns_disabled_even_with_plate() {
        let matcher = PlateMatcher::new(vec![plate("XYZ999")], 0.0);
        assert_eq!(matcher.check(Some("XYZ999")), MatchOutcome::Disabled);
    }

    #[test]
    fn test_no_plate() {
        let matcher = PlateMatcher::new(vec![plate("XYZ999")], 0.5);
        assert_eq!(matcher.check(None), MatchOutcome::NoPlate);
    }

    #[test]
    fn test_exact_match() {
        let matcher = PlateMatcher::new(
            vec![WatchedPlate {
                number: "XYZ999".to_string(),
                owner: Some("Alice".to_string()),
                brand: None,
            }],
            0.5,
        );
        let MatchOutcome::Matched { entry, score } = matcher.check(Some("xyz999")) else {
            panic!("expected match");
        };
        assert_eq!(entry.owner.as_deref(), Some("Alice"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // similarity("abcd", "abxd") == 0.75 exactly
        let matcher = PlateMatcher::new(vec![plate("abxd")], 0.75);
        assert!(matches!(matcher.check(Some("abcd")), MatchOutcome::NoMatch { .. }));

        let matcher = PlateMatcher::new(vec![plate("abxd")], 0.74);
        assert!(matches!(matcher.check(Some("abcd")), MatchOutcome::Matched { .. }));
    }

    #[test]
    fn test_best_entry_wins() {
        let matcher = PlateMatcher::new(vec![plate("zzz999"), plate("xyz998")], 0.5);
        let MatchOutcome::Matched { entry, .. } = matcher.check(Some("xyz999")) else {
            panic!("expected match");
        };
        assert_eq!(entry.number, "xyz998");
    }

    #[test]
    fn test_tie_keeps_first_entry() {
        // both entries score identically against the detected plate
        let matcher = PlateMatcher::new(vec![plate("abcx"), plate("abcy")], 0.5);
        let MatchOutcome::Matched { entry, score } = matcher.check(Some("abcz")) else {
            panic!("expected match");
        };
        assert_eq!(entry.number, "abcx");
        assert_eq!(score, 0.75);
    }

    #[test]
    fn test_no_match_reports_best_score() {
        let matcher = PlateMatcher::new(vec![plate("zzzzzz")], 0.9);
        let MatchOutcome::NoMatch { best_score } = matcher.check(Some("xyz999")) else {
            panic!("expected no match");
        };
        assert!(best_score < 0.9);
    }
}
