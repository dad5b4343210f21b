//! Behavioral comparison of two recorded runs over the same synthetic input.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::invariants::BoundCall;
use crate::core::types::{BehaviorChange, ChangeCategory, Violation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffSettings {
    /// Primitive that enqueues items for human review.
    pub review_primitive: String,
    /// Review calls growing past `old * factor` are reported as a spike.
    pub review_spike_factor: f64,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            review_primitive: "queue_add_review".to_string(),
            review_spike_factor: 2.0,
        }
    }
}

/// What the differ needs from one dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub call_counts: BTreeMap<String, usize>,
    /// Status values among ledger-writing calls.
    pub status_counts: BTreeMap<String, usize>,
    /// `(rule, message)` pairs.
    pub violations: BTreeSet<(String, String)>,
}

impl RunSummary {
    pub fn from_run(
        calls: &[BoundCall],
        violations: &[Violation],
        writer_primitives: &[String],
        status_param: &str,
    ) -> Self {
        let mut summary = RunSummary::default();
        for call in calls {
            *summary.call_counts.entry(call.primitive.clone()).or_default() += 1;
            if writer_primitives.contains(&call.primitive) {
                let status = call
                    .param(status_param)
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                *summary.status_counts.entry(status.to_string()).or_default() += 1;
            }
        }
        summary.violations = violations
            .iter()
            .map(|v| (v.rule.clone(), v.message.clone()))
            .collect();
        summary
    }

    fn calls_to(&self, primitive: &str) -> usize {
        self.call_counts.get(primitive).copied().unwrap_or(0)
    }
}

fn keys<'a>(
    old: &'a BTreeMap<String, usize>,
    new: &'a BTreeMap<String, usize>,
) -> BTreeSet<&'a String> {
    old.keys().chain(new.keys()).collect()
}

/// Non-zero deltas between two runs, in a stable order.
pub fn compare(old: &RunSummary, new: &RunSummary, settings: &DiffSettings) -> Vec<BehaviorChange> {
    let mut changes = Vec::new();

    for primitive in keys(&old.call_counts, &new.call_counts) {
        let before = old.calls_to(primitive);
        let after = new.calls_to(primitive);
        match (before, after) {
            (0, n) if n > 0 => changes.push(BehaviorChange::new(
                ChangeCategory::Added,
                format!("New primitive call: {primitive} (called {n}x)"),
            )),
            (n, 0) if n > 0 => changes.push(BehaviorChange::new(
                ChangeCategory::Removed,
                format!("Removed primitive call: {primitive} (was {n}x)"),
            )),
            (b, a) if b != a => changes.push(BehaviorChange::new(
                ChangeCategory::Changed,
                format!("{primitive}: {b}x -> {a}x"),
            )),
            _ => {}
        }
    }

    for status in keys(&old.status_counts, &new.status_counts) {
        let before = old.status_counts.get(status).copied().unwrap_or(0);
        let after = new.status_counts.get(status).copied().unwrap_or(0);
        if before == after {
            continue;
        }
        let change = if before == 0 {
            BehaviorChange::new(
                ChangeCategory::Added,
                format!("New status '{status}': {after} entries"),
            )
        } else if after == 0 {
            BehaviorChange::new(
                ChangeCategory::Removed,
                format!("No more '{status}' entries (was {before})"),
            )
        } else {
            let pct = (after as f64 - before as f64) / before as f64 * 100.0;
            let direction = if pct > 0.0 { "more" } else { "fewer" };
            BehaviorChange::new(
                ChangeCategory::Changed,
                format!(
                    "'{status}' entries: {before} -> {after} ({:.0}% {direction})",
                    pct.abs()
                ),
            )
        };
        changes.push(change);
    }

    for (rule, message) in new.violations.difference(&old.violations) {
        changes.push(BehaviorChange::new(
            ChangeCategory::Added,
            format!("NEW INVARIANT VIOLATION: {rule}: {message}"),
        ));
    }

    let before = old.calls_to(&settings.review_primitive);
    let after = new.calls_to(&settings.review_primitive);
    if before > 0 && after as f64 > before as f64 * settings.review_spike_factor {
        changes.push(BehaviorChange::new(
            ChangeCategory::Changed,
            format!(
                "REVIEW QUEUE SPIKE: {before} -> {after} items ({:.1}x increase)",
                after as f64 / before as f64
            ),
        ));
    }

    changes
}

/// Human-readable `[+]/[-]/[~]` listing.
pub fn format_changes(changes: &[BehaviorChange]) -> String {
    if changes.is_empty() {
        return "No behavioral changes detected.".to_string();
    }
    let mut lines = vec!["Behavioral changes detected:".to_string(), String::new()];
    for change in changes {
        lines.push(format!(
            "  [{}] {}",
            change.category.symbol(),
            change.description
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(calls: &[(&str, usize)], statuses: &[(&str, usize)]) -> RunSummary {
        RunSummary {
            call_counts: calls.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            status_counts: statuses.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            violations: BTreeSet::new(),
        }
    }

    #[test]
    fn identical_runs_have_no_changes() {
        let run = summary(&[("journal_add_double", 3), ("queue_add_review", 1)], &[("auto-confirmed", 2)]);
        assert!(compare(&run, &run.clone(), &DiffSettings::default()).is_empty());
    }

    #[test]
    fn reports_added_removed_and_changed_calls() {
        let old = summary(&[("git_commit", 1), ("ctx_log", 2)], &[]);
        let new = summary(&[("ctx_log", 3), ("rules_add", 1)], &[]);
        let descriptions: Vec<_> = compare(&old, &new, &DiffSettings::default())
            .into_iter()
            .map(|c| (c.category, c.description))
            .collect();
        assert_eq!(
            descriptions,
            vec![
                (ChangeCategory::Changed, "ctx_log: 2x -> 3x".to_string()),
                (ChangeCategory::Removed, "Removed primitive call: git_commit (was 1x)".to_string()),
                (ChangeCategory::Added, "New primitive call: rules_add (called 1x)".to_string()),
            ]
        );
    }

    #[test]
    fn status_shift_reports_percentages() {
        let old = summary(&[], &[("auto-confirmed", 2), ("pending-review", 1)]);
        let new = summary(&[], &[("auto-confirmed", 3)]);
        let changes = compare(&old, &new, &DiffSettings::default());
        assert_eq!(
            changes,
            vec![
                BehaviorChange::new(
                    ChangeCategory::Changed,
                    "'auto-confirmed' entries: 2 -> 3 (50% more)"
                ),
                BehaviorChange::new(
                    ChangeCategory::Removed,
                    "No more 'pending-review' entries (was 1)"
                ),
            ]
        );
    }

    #[test]
    fn only_new_violations_are_reported() {
        let mut old = RunSummary::default();
        old.violations
            .insert(("valid_status".to_string(), "Invalid status: x".to_string()));
        let mut new = old.clone();
        new.violations
            .insert(("valid_account".to_string(), "Unknown account_id: 9999".to_string()));
        let changes = compare(&old, &new, &DiffSettings::default());
        assert_eq!(
            changes,
            vec![BehaviorChange::new(
                ChangeCategory::Added,
                "NEW INVARIANT VIOLATION: valid_account: Unknown account_id: 9999"
            )]
        );
    }

    #[test]
    fn review_spike_needs_more_than_double() {
        let old = summary(&[("queue_add_review", 2)], &[]);
        let doubled = summary(&[("queue_add_review", 4)], &[]);
        let tripled = summary(&[("queue_add_review", 6)], &[]);
        let settings = DiffSettings::default();
        assert!(
            !compare(&old, &doubled, &settings)
                .iter()
                .any(|c| c.description.starts_with("REVIEW QUEUE SPIKE"))
        );
        assert!(
            compare(&old, &tripled, &settings)
                .iter()
                .any(|c| c.description == "REVIEW QUEUE SPIKE: 2 -> 6 items (3.0x increase)")
        );
    }

    #[test]
    fn format_lists_changes_with_symbols() {
        assert_eq!(format_changes(&[]), "No behavioral changes detected.");
        let text = format_changes(&[BehaviorChange::new(ChangeCategory::Removed, "gone")]);
        assert_eq!(text, "Behavioral changes detected:\n\n  [-] gone");
    }
}
