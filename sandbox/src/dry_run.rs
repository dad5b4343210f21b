//! Stage two: run a script against synthetic responses and check invariants.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, instrument};

use crate::coordinator::{RunFailure, drive};
use crate::core::diff::{DiffSettings, RunSummary, compare};
use crate::core::invariants::{BoundCall, InvariantSet, LedgerRules, bind_actions};
use crate::core::signature::SignatureTable;
use crate::core::types::{BehaviorChange, RecordedAction, Violation};
use crate::script::{Engine, HostCall, Value};
use crate::synthetic::{ResponseState, SyntheticTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunReport {
    /// No invariant was violated.
    pub success: bool,
    pub actions: Vec<RecordedAction>,
    pub violations: Vec<Violation>,
    pub output: Json,
}

pub struct Simulator {
    engine: Arc<dyn Engine>,
    table: SignatureTable,
    responses: SyntheticTable,
    invariants: InvariantSet,
    writer_primitives: Vec<String>,
    status_param: String,
}

impl Simulator {
    pub fn new(
        engine: Arc<dyn Engine>,
        table: SignatureTable,
        responses: SyntheticTable,
        rules: &LedgerRules,
    ) -> Self {
        Self {
            engine,
            table,
            responses,
            invariants: InvariantSet::ledger(rules),
            writer_primitives: rules.writer_primitives(),
            status_param: rules.status_param.clone(),
        }
    }

    /// Replace the invariant set.
    pub fn with_invariants(mut self, invariants: InvariantSet) -> Self {
        self.invariants = invariants;
        self
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn table(&self) -> &SignatureTable {
        &self.table
    }

    /// Run `source` to completion, recording every call.
    ///
    /// Violations never stop the run. A script failure does, and is returned
    /// as the error.
    #[instrument(skip_all)]
    pub fn run(&self, source: &str) -> Result<DryRunReport, RunFailure> {
        let program = self.engine.compile(source, &self.table.names())?;
        let mut state = ResponseState::default();
        let mut actions: Vec<RecordedAction> = Vec::new();
        let mut calls: Vec<BoundCall> = Vec::new();
        let mut violations = Vec::new();

        let output = drive(program.as_ref(), |call: &HostCall| {
            let result = self.responses.respond(call, &mut state);
            let action = RecordedAction::new(call, result.clone());
            let bound = BoundCall::bind(actions.len(), &action, &self.table);
            violations.extend(self.invariants.check_call(&bound));
            actions.push(action);
            calls.push(bound);
            Ok::<_, RunFailure>(Value::from(result))
        })?;
        violations.extend(self.invariants.check_log(&calls));

        debug!(
            calls = actions.len(),
            violations = violations.len(),
            "dry run finished"
        );
        Ok(DryRunReport {
            success: violations.is_empty(),
            actions,
            violations,
            output: output.to_json(),
        })
    }

    /// Differ input derived from a report's own action log.
    pub fn summarize(&self, report: &DryRunReport) -> RunSummary {
        let calls = bind_actions(&report.actions, &self.table);
        RunSummary::from_run(
            &calls,
            &report.violations,
            &self.writer_primitives,
            &self.status_param,
        )
    }

    /// Behavior changes going from `old` to `new` over identical synthetic data.
    pub fn diff(
        &self,
        old: &str,
        new: &str,
        settings: &DiffSettings,
    ) -> Result<Vec<BehaviorChange>, RunFailure> {
        let new_report = self.run(new)?;
        self.diff_against(old, &new_report, settings)
    }

    /// Like [`Simulator::diff`] for a new script that has already been run.
    /// Only `old` is executed.
    pub fn diff_against(
        &self,
        old: &str,
        new_report: &DryRunReport,
        settings: &DiffSettings,
    ) -> Result<Vec<BehaviorChange>, RunFailure> {
        let old_report = self.run(old)?;
        Ok(compare(
            &self.summarize(&old_report),
            &self.summarize(new_report),
            settings,
        ))
    }
}
