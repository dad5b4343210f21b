//! Human-readable renderings of validation results.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value as Json;

use crate::core::diff::format_changes;
use crate::core::types::{RecordedAction, ValidationIssue, Violation};
use crate::dry_run::DryRunReport;
use crate::pipeline::Verdict;

const ISSUES_TEMPLATE: &str = include_str!("templates/issues.txt");
const DRY_RUN_TEMPLATE: &str = include_str!("templates/dry_run.txt");
const VERDICT_TEMPLATE: &str = include_str!("templates/verdict.txt");

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("issues", ISSUES_TEMPLATE)
        .expect("issues template should be valid");
    env.add_template("dry_run", DRY_RUN_TEMPLATE)
        .expect("dry_run template should be valid");
    env.add_template("verdict", VERDICT_TEMPLATE)
        .expect("verdict template should be valid");
    env
});

#[derive(Debug, Serialize)]
struct DryRunContext<'a> {
    actions: Vec<String>,
    violations: &'a [Violation],
    output: String,
}

impl<'a> DryRunContext<'a> {
    fn new(report: &'a DryRunReport) -> Self {
        Self {
            actions: report.actions.iter().map(describe_action).collect(),
            violations: &report.violations,
            output: report.output.to_string(),
        }
    }
}

/// `name(arg, key=value) -> result`
pub fn describe_action(action: &RecordedAction) -> String {
    let mut parts: Vec<String> = action.args.iter().map(Json::to_string).collect();
    parts.extend(
        action
            .kwargs
            .iter()
            .map(|(key, value)| format!("{key}={value}")),
    );
    format!("{}({}) -> {}", action.primitive, parts.join(", "), action.result)
}

pub fn render_issues(issues: &[ValidationIssue]) -> Result<String> {
    let template = TEMPLATES.get_template("issues")?;
    Ok(template.render(context! { issues => issues })?)
}

pub fn render_dry_run(report: &DryRunReport) -> Result<String> {
    let template = TEMPLATES.get_template("dry_run")?;
    Ok(template.render(context! { dry_run => DryRunContext::new(report) })?)
}

pub fn render_verdict(verdict: &Verdict) -> Result<String> {
    let template = TEMPLATES.get_template("verdict")?;
    let rendered = template.render(context! {
        passed => verdict.passed,
        issues => &verdict.static_issues,
        dry_run => verdict.dry_run.as_ref().map(DryRunContext::new),
        error => verdict.error.as_deref(),
        diff => verdict.diff_changes.as_deref().map(format_changes),
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::core::types::{BehaviorChange, ChangeCategory};
    use crate::script::{HostCall, Value};

    fn action() -> RecordedAction {
        RecordedAction {
            primitive: "journal_void".to_string(),
            args: vec![json!("2025-01-001")],
            kwargs: Map::from_iter([("reason".to_string(), json!("dup"))]),
            result: json!({"success": true}),
        }
    }

    #[test]
    fn actions_read_like_calls() {
        assert_eq!(
            describe_action(&action()),
            r#"journal_void("2025-01-001", reason="dup") -> {"success":true}"#
        );
    }

    #[test]
    fn keyword_arguments_keep_call_order() {
        let call = HostCall::new("journal_add")
            .kwarg("date", Value::str("2025-01-03"))
            .kwarg("account_id", Value::Int(5020))
            .kwarg("debit", Value::Float(1.5));
        let action = RecordedAction::new(&call, json!(true));
        assert_eq!(
            describe_action(&action),
            r#"journal_add(date="2025-01-03", account_id=5020, debit=1.5) -> true"#
        );
        let line = serde_json::to_string(&action).expect("serialize");
        assert!(
            line.contains(r#""kwargs":{"date":"2025-01-03","account_id":5020,"debit":1.5}"#),
            "{line}"
        );
    }

    #[test]
    fn issues_list_location_and_severity() {
        let text = render_issues(&[
            ValidationIssue::error("Forbidden construct: eval(").at_line(Some(3)),
        ])
        .expect("render");
        assert_eq!(
            text,
            "Static check: 1 issue(s)\n  error (line 3): Forbidden construct: eval("
        );
        assert_eq!(render_issues(&[]).expect("render"), "Static check: clean");
    }

    #[test]
    fn verdict_shows_violations_and_diff() {
        let verdict = Verdict {
            passed: false,
            static_issues: vec![],
            dry_run: Some(DryRunReport {
                success: false,
                actions: vec![action()],
                violations: vec![Violation::new("valid_status", "Invalid status: x", Json::Null)],
                output: Json::Null,
            }),
            diff_changes: Some(vec![BehaviorChange::new(ChangeCategory::Removed, "gone")]),
            error: None,
        };
        let text = render_verdict(&verdict).expect("render");
        assert!(text.starts_with("REJECTED\nStatic check: clean\nDry run: 1 call(s), 1 violation(s)"), "{text}");
        assert!(text.contains("  1. journal_void("), "{text}");
        assert!(text.contains("  ! valid_status: Invalid status: x"), "{text}");
        assert!(text.contains("Output: null"), "{text}");
        assert!(text.ends_with("Behavioral changes detected:\n\n  [-] gone"), "{text}");
    }

    #[test]
    fn verdict_reports_pipeline_errors() {
        let verdict = Verdict {
            passed: false,
            static_issues: vec![],
            dry_run: None,
            diff_changes: None,
            error: Some("dry run failed: KeyError: 'x'".to_string()),
        };
        let text = render_verdict(&verdict).expect("render");
        assert_eq!(
            text,
            "REJECTED\nStatic check: clean\nError: dry run failed: KeyError: 'x'"
        );
    }
}
