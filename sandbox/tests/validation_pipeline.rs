use std::collections::BTreeSet;

use sandbox::core::types::{BehaviorChange, ChangeCategory, Severity};
use sandbox::test_support::{
    BALANCED_LEGS, GATED_INGEST, UNGATED_INGEST, VIOLATING_ENTRIES, ledger_validator,
};

fn rules(verdict: &sandbox::pipeline::Verdict) -> BTreeSet<String> {
    verdict
        .dry_run
        .as_ref()
        .map(|report| report.violations.iter().map(|v| v.rule.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn gated_ingest_passes_every_stage() {
    let verdict = ledger_validator().validate(GATED_INGEST, None);
    assert!(verdict.passed, "{verdict:?}");
    assert!(verdict.static_issues.is_empty(), "{:?}", verdict.static_issues);
    assert_eq!(verdict.error, None);
    assert_eq!(verdict.diff_changes, None);

    let report = verdict.dry_run.expect("dry run ran");
    let writes = report
        .actions
        .iter()
        .filter(|action| action.primitive == "journal_add_double")
        .count();
    assert_eq!(writes, 3);
}

#[test]
fn three_broken_rules_are_all_reported() {
    let verdict = ledger_validator().validate(VIOLATING_ENTRIES, None);
    assert!(!verdict.passed);
    assert_eq!(verdict.error, None);
    assert_eq!(
        rules(&verdict),
        BTreeSet::from([
            "debit_xor_credit".to_string(),
            "positive_amount".to_string(),
            "valid_account".to_string(),
        ])
    );
    let report = verdict.dry_run.expect("dry run ran");
    assert_eq!(report.actions.len(), 3, "violations never stop the run");
    assert!(
        report
            .violations
            .iter()
            .any(|v| v.message == "Unknown debit_account: 9999")
    );
}

#[test]
fn removing_the_confidence_gate_shows_up_in_the_diff() {
    let changes = ledger_validator()
        .diff(GATED_INGEST, UNGATED_INGEST)
        .expect("diff");
    for expected in [
        BehaviorChange::new(
            ChangeCategory::Removed,
            "Removed primitive call: queue_add_review (was 1x)",
        ),
        BehaviorChange::new(
            ChangeCategory::Removed,
            "No more 'pending-review' entries (was 1)",
        ),
        BehaviorChange::new(
            ChangeCategory::Changed,
            "'auto-confirmed' entries: 2 -> 3 (50% more)",
        ),
    ] {
        assert!(changes.contains(&expected), "missing {expected:?} in {changes:?}");
    }
}

#[test]
fn diff_is_advisory_in_the_pipeline() {
    let verdict = ledger_validator().validate(UNGATED_INGEST, Some(GATED_INGEST));
    assert!(verdict.passed, "{verdict:?}");
    let changes = verdict.diff_changes.expect("diff ran");
    assert!(!changes.is_empty());
}

#[test]
fn a_script_diffed_with_itself_has_no_changes() {
    let validator = ledger_validator();
    for script in [GATED_INGEST, UNGATED_INGEST, VIOLATING_ENTRIES] {
        assert_eq!(validator.diff(script, script).expect("diff"), Vec::new());
    }
}

#[test]
fn dry_runs_are_deterministic() {
    let validator = ledger_validator();
    let first = validator.dry_run(GATED_INGEST).expect("first");
    let second = validator.dry_run(GATED_INGEST).expect("second");
    assert_eq!(first, second);
}

#[test]
fn single_legs_must_balance_across_the_run() {
    let validator = ledger_validator();
    assert!(validator.validate(BALANCED_LEGS, None).passed);

    let unbalanced = BALANCED_LEGS.replace("credit=42.5", "credit=40.0");
    let verdict = validator.validate(&unbalanced, None);
    assert!(!verdict.passed);
    assert_eq!(rules(&verdict), BTreeSet::from(["balanced_entries".to_string()]));
}

#[test]
fn syntax_errors_stop_before_the_dry_run() {
    let verdict = ledger_validator().validate("x = (1,\n", None);
    assert!(!verdict.passed);
    assert_eq!(verdict.static_issues.len(), 1);
    assert!(verdict.static_issues[0].message.starts_with("Syntax error: "));
    assert_eq!(verdict.dry_run, None);
}

#[test]
fn forbidden_constructs_and_type_errors_block() {
    let verdict = ledger_validator().validate("git_commit(42)\neval('1')\n", None);
    assert!(!verdict.passed);
    assert_eq!(verdict.dry_run, None);
    let messages: Vec<_> = verdict
        .static_issues
        .iter()
        .filter(|issue| issue.severity == Severity::Error)
        .map(|issue| issue.message.as_str())
        .collect();
    assert!(messages.iter().any(|m| m.starts_with("Type error: git_commit()")), "{messages:?}");
    assert!(messages.contains(&"Forbidden construct: eval("), "{messages:?}");
}

#[test]
fn unknown_functions_warn_and_then_fail_the_dry_run() {
    let verdict = ledger_validator().validate("helper()\n", None);
    assert!(!verdict.passed);
    assert_eq!(verdict.static_issues.len(), 1);
    assert_eq!(verdict.static_issues[0].severity, Severity::Warning);
    assert_eq!(verdict.static_issues[0].message, "unknown function: helper()");
    assert!(
        verdict
            .error
            .as_deref()
            .is_some_and(|error| error.starts_with("dry run failed: ")),
        "{verdict:?}"
    );
}
