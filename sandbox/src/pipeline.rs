//! The full validation pass: static check, dry run, then an optional diff.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::diff::DiffSettings;
use crate::core::invariants::LedgerRules;
use crate::core::signature::SignatureTable;
use crate::core::types::{BehaviorChange, ChangeCategory, ValidationIssue};
use crate::coordinator::RunFailure;
use crate::dry_run::{DryRunReport, Simulator};
use crate::script::{Engine, Interpreter};
use crate::static_check;
use crate::synthetic::SyntheticTable;

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub static_issues: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunReport>,
    /// Advisory; never affects `passed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_changes: Option<Vec<BehaviorChange>>,
    /// Execution failure during the dry run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Validator {
    simulator: Simulator,
    diff: DiffSettings,
}

impl Validator {
    pub fn new(simulator: Simulator, diff: DiffSettings) -> Self {
        Self { simulator, diff }
    }

    /// Reference interpreter, the given tables and rules.
    pub fn ledger(
        table: SignatureTable,
        responses: SyntheticTable,
        rules: &LedgerRules,
        diff: DiffSettings,
    ) -> Self {
        let engine: Arc<dyn Engine> = Arc::new(Interpreter::new());
        Self::new(Simulator::new(engine, table, responses, rules), diff)
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn check(&self, source: &str) -> Vec<ValidationIssue> {
        static_check::check(self.simulator.engine(), self.simulator.table(), source)
    }

    pub fn dry_run(&self, source: &str) -> Result<DryRunReport, RunFailure> {
        self.simulator.run(source)
    }

    pub fn diff(&self, old: &str, new: &str) -> Result<Vec<BehaviorChange>, RunFailure> {
        self.simulator.diff(old, new, &self.diff)
    }

    #[instrument(skip_all, fields(with_previous = previous.is_some()))]
    pub fn validate(&self, source: &str, previous: Option<&str>) -> Verdict {
        let static_issues = self.check(source);
        let mut verdict = Verdict {
            passed: false,
            static_issues,
            dry_run: None,
            diff_changes: None,
            error: None,
        };
        if static_check::has_errors(&verdict.static_issues) {
            info!("static check rejected the script");
            return verdict;
        }

        let report = match self.dry_run(source) {
            Ok(report) => report,
            Err(failure) => {
                warn!(%failure, "dry run failed");
                verdict.error = Some(format!("dry run failed: {failure}"));
                return verdict;
            }
        };
        if let Some(previous) = previous {
            let changes = self
                .simulator
                .diff_against(previous, &report, &self.diff)
                .unwrap_or_else(|failure| {
                    warn!(%failure, "behavioral diff failed");
                    vec![BehaviorChange::new(
                        ChangeCategory::Added,
                        format!("diff failed: {failure}"),
                    )]
                });
            verdict.diff_changes = Some(changes);
        }
        verdict.passed = report.success;
        verdict.dry_run = Some(report);
        info!(passed = verdict.passed, "validation finished");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::script::{Program, ScriptError};
    use crate::test_support::{GATED_INGEST, UNGATED_INGEST, ledger_validator};

    /// Records every source it is asked to compile.
    #[derive(Default)]
    struct CountingEngine {
        inner: Interpreter,
        compiled: Mutex<Vec<String>>,
    }

    impl CountingEngine {
        fn times_compiled(&self, source: &str) -> usize {
            let compiled = self.compiled.lock().expect("lock");
            compiled.iter().filter(|seen| *seen == source).count()
        }
    }

    impl Engine for CountingEngine {
        fn compile(
            &self,
            source: &str,
            externals: &[String],
        ) -> Result<Arc<dyn Program>, ScriptError> {
            self.compiled.lock().expect("lock").push(source.to_string());
            self.inner.compile(source, externals)
        }
    }

    fn counting_validator(engine: &Arc<CountingEngine>) -> Validator {
        let rules = LedgerRules::default();
        let simulator = Simulator::new(
            Arc::clone(engine) as Arc<dyn Engine>,
            SignatureTable::ledger_default(),
            SyntheticTable::ledger_default(&rules),
            &rules,
        );
        Validator::new(simulator, DiffSettings::default())
    }

    #[test]
    fn diff_reuses_the_dry_run_of_the_new_script() {
        let engine = Arc::new(CountingEngine::default());
        let validator = counting_validator(&engine);

        validator.validate(UNGATED_INGEST, None);
        let without_previous = engine.times_compiled(UNGATED_INGEST);
        let verdict = validator.validate(UNGATED_INGEST, Some(GATED_INGEST));
        assert_eq!(
            engine.times_compiled(UNGATED_INGEST),
            2 * without_previous,
            "the diff must not execute the new script again"
        );
        assert_eq!(engine.times_compiled(GATED_INGEST), 1);

        let expected = validator
            .diff(GATED_INGEST, UNGATED_INGEST)
            .expect("diff");
        assert_eq!(verdict.diff_changes, Some(expected));
    }

    #[test]
    fn static_errors_skip_the_dry_run() {
        let verdict = ledger_validator().validate("open('ledger.csv')\n", None);
        assert!(!verdict.passed);
        assert!(verdict.dry_run.is_none());
        assert_eq!(verdict.error, None);
    }

    #[test]
    fn diff_failure_is_one_advisory_change() {
        let verdict = ledger_validator().validate(GATED_INGEST, Some("importer_scan()[5]\n"));
        assert!(verdict.passed);
        let changes = verdict.diff_changes.expect("diff attempted");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::Added);
        assert!(changes[0].description.starts_with("diff failed: "));
    }

    #[test]
    fn verdict_serializes_without_empty_stages() {
        let verdict = ledger_validator().validate("x = (\n", None);
        let json = serde_json::to_value(&verdict).expect("serialize");
        assert!(json.get("dry_run").is_none());
        assert!(json.get("diff_changes").is_none());
        assert_eq!(json["passed"], serde_json::json!(false));
    }
}
