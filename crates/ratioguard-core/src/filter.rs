//! `FilterEngine`: evaluates a `TorrentCandidate` against a subscription's
//! bound filter rules, on top of the product's free-only-by-default gate.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{DiscountLevel, TorrentCandidate};

/// Predicate evaluated by a single [`FilterRule`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterPredicate {
    /// Optional regular expression the candidate's title must match.
    pub title_regex: Option<String>,
    /// Inclusive lower bound on torrent size, in bytes.
    pub min_size_bytes: Option<u64>,
    /// Inclusive upper bound on torrent size, in bytes.
    pub max_size_bytes: Option<u64>,
    /// Discount levels this rule additionally permits, widening the
    /// free-only-by-default gate.
    #[serde(default)]
    pub discounts: Vec<DiscountLevel>,
    /// Whether hit-and-run-protected candidates are permitted.
    #[serde(default = "default_true")]
    pub hr_allowed: bool,
    /// Category whitelist; empty means unrestricted.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Tag whitelist; empty means unrestricted.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_true() -> bool {
    true
}

/// A named, independently enabled filter rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    /// Stable identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Whether this rule currently participates in evaluation.
    pub enabled: bool,
    /// Predicate evaluated against candidates.
    pub predicate: FilterPredicate,
}

/// Outcome of evaluating a candidate against a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The candidate is eligible to proceed to feasibility/download.
    Accept,
    /// The candidate is rejected, with a human-readable reason.
    Reject {
        /// Reason the candidate was rejected, suitable for `last_error`.
        reason: String,
    },
}

impl Decision {
    /// Whether this decision accepts the candidate.
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Pure evaluator for the filter DSL described in the component design.
pub struct FilterEngine;

impl FilterEngine {
    /// Evaluate `candidate` (with its resolved `category`/`tags`) against the
    /// subscription-bound `rules`.
    ///
    /// Caller contract: `rules` must already be the correct rule set for the
    /// subscription (only subscription-bound rules if any are bound; global
    /// rules are never mixed in here — that selection happens upstream).
    #[must_use]
    pub fn evaluate(
        candidate: &TorrentCandidate,
        category: Option<&str>,
        tags: &[String],
        rules: &[FilterRule],
    ) -> Decision {
        let enabled_rules: Vec<&FilterRule> = rules.iter().filter(|rule| rule.enabled).collect();

        let widened_discounts: HashSet<DiscountLevel> = enabled_rules
            .iter()
            .flat_map(|rule| rule.predicate.discounts.iter().copied())
            .collect();

        if !candidate.free_level.is_fully_free() && !widened_discounts.contains(&candidate.free_level)
        {
            return Decision::Reject {
                reason: format!(
                    "discount level {:?} is not eligible (free-only by default)",
                    candidate.free_level
                ),
            };
        }

        if enabled_rules.is_empty() {
            return Decision::Accept;
        }

        let any_match = enabled_rules
            .iter()
            .any(|rule| rule_matches(rule, candidate, category, tags));

        if any_match {
            Decision::Accept
        } else {
            Decision::Reject {
                reason: "no bound filter rule matched".to_string(),
            }
        }
    }
}

fn rule_matches(
    rule: &FilterRule,
    candidate: &TorrentCandidate,
    category: Option<&str>,
    tags: &[String],
) -> bool {
    let predicate = &rule.predicate;

    if !predicate.hr_allowed && candidate.hr {
        return false;
    }

    if let Some(min) = predicate.min_size_bytes {
        if candidate.size_bytes < min {
            return false;
        }
    }
    if let Some(max) = predicate.max_size_bytes {
        if candidate.size_bytes > max {
            return false;
        }
    }

    if let Some(pattern) = &predicate.title_regex {
        match Regex::new(pattern) {
            Ok(regex) => {
                if !regex.is_match(&candidate.title) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    if !predicate.categories.is_empty() {
        let Some(category) = category else {
            return false;
        };
        if !predicate.categories.iter().any(|c| c == category) {
            return false;
        }
    }

    if !predicate.tags.is_empty() && !tags.iter().any(|tag| predicate.tags.contains(tag)) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(free_level: DiscountLevel, hr: bool, size_bytes: u64, title: &str) -> TorrentCandidate {
        TorrentCandidate {
            title: title.to_string(),
            torrent_id: "1".to_string(),
            size_bytes,
            free_level,
            free_end_time: Some(Utc::now()),
            hr,
            sub_title: None,
            download_url: "https://example.test/dl/1".to_string(),
        }
    }

    #[test]
    fn free_with_no_rules_is_accepted() {
        let c = candidate(DiscountLevel::Free, false, 1_000, "demo");
        assert_eq!(FilterEngine::evaluate(&c, None, &[], &[]), Decision::Accept);
    }

    #[test]
    fn non_free_with_no_rules_is_rejected() {
        let c = candidate(DiscountLevel::None, false, 1_000, "demo");
        assert!(!FilterEngine::evaluate(&c, None, &[], &[]).is_accept());
    }

    #[test]
    fn rule_can_widen_discount_set() {
        let c = candidate(DiscountLevel::Percent50, false, 1_000, "demo");
        let rule = FilterRule {
            id: 1,
            name: "widen".into(),
            enabled: true,
            predicate: FilterPredicate {
                discounts: vec![DiscountLevel::Percent50],
                ..Default::default()
            },
        };
        assert!(FilterEngine::evaluate(&c, None, &[], std::slice::from_ref(&rule)).is_accept());
    }

    #[test]
    fn disabled_rule_does_not_widen_discount_set() {
        let c = candidate(DiscountLevel::Percent50, false, 1_000, "demo");
        let rule = FilterRule {
            id: 1,
            name: "widen".into(),
            enabled: false,
            predicate: FilterPredicate {
                discounts: vec![DiscountLevel::Percent50],
                ..Default::default()
            },
        };
        assert!(!FilterEngine::evaluate(&c, None, &[], std::slice::from_ref(&rule)).is_accept());
    }

    #[test]
    fn hr_rejected_when_rule_disallows() {
        let c = candidate(DiscountLevel::Free, true, 1_000, "demo");
        let rule = FilterRule {
            id: 1,
            name: "no-hr".into(),
            enabled: true,
            predicate: FilterPredicate {
                hr_allowed: false,
                ..Default::default()
            },
        };
        assert!(!FilterEngine::evaluate(&c, None, &[], std::slice::from_ref(&rule)).is_accept());
    }

    #[test]
    fn title_regex_filters_out_non_matching_titles() {
        let c = candidate(DiscountLevel::Free, false, 1_000, "Some.Show.S01E01");
        let rule = FilterRule {
            id: 1,
            name: "regex".into(),
            enabled: true,
            predicate: FilterPredicate {
                title_regex: Some(r"^Other\.Show".to_string()),
                ..Default::default()
            },
        };
        assert!(!FilterEngine::evaluate(&c, None, &[], std::slice::from_ref(&rule)).is_accept());
    }

    #[test]
    fn category_whitelist_enforced() {
        let c = candidate(DiscountLevel::Free, false, 1_000, "demo");
        let rule = FilterRule {
            id: 1,
            name: "cat".into(),
            enabled: true,
            predicate: FilterPredicate {
                categories: vec!["movies".to_string()],
                ..Default::default()
            },
        };
        assert!(!FilterEngine::evaluate(&c, Some("tv"), &[], std::slice::from_ref(&rule)).is_accept());
        assert!(FilterEngine::evaluate(&c, Some("movies"), &[], std::slice::from_ref(&rule)).is_accept());
    }
}
