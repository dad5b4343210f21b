//! Ledger invariants checked against recorded primitive calls.
//!
//! Checks never stop a run. Every call is checked as it is recorded and the
//! whole log is checked once more after completion, so a single dry run
//! reports the full set of violations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

use crate::core::signature::SignatureTable;
use crate::core::types::{RecordedAction, Violation};

/// Business rules the reference invariant set enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerRules {
    pub valid_accounts: BTreeSet<i64>,
    pub valid_statuses: BTreeSet<String>,
    /// Allowed drift between total debits and credits.
    pub balance_tolerance: f64,
    /// Primitive writing one ledger leg (`debit` xor `credit`).
    pub single_leg_primitive: String,
    /// Primitive writing a balanced debit/credit pair from one `amount`.
    pub balanced_pair_primitive: String,
    /// Parameter names holding account identifiers, on any primitive.
    pub account_params: Vec<String>,
    pub status_param: String,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            valid_accounts: [1010, 1020, 2010, 3010, 4010, 4020, 5010, 5020, 5030, 5040, 5050]
                .into_iter()
                .collect(),
            valid_statuses: [
                "auto-confirmed",
                "pending-review",
                "user-confirmed",
                "user-corrected",
                "voided",
                "bootstrap-confirmed",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            balance_tolerance: 0.001,
            single_leg_primitive: "journal_add".to_string(),
            balanced_pair_primitive: "journal_add_double".to_string(),
            account_params: vec![
                "account_id".to_string(),
                "debit_account".to_string(),
                "credit_account".to_string(),
            ],
            status_param: "status".to_string(),
        }
    }
}

impl LedgerRules {
    /// Primitives that write ledger entries.
    pub fn writer_primitives(&self) -> Vec<String> {
        vec![
            self.single_leg_primitive.clone(),
            self.balanced_pair_primitive.clone(),
        ]
    }
}

/// A recorded call with arguments bound to parameter names.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCall {
    /// Position in the recorded log.
    pub index: usize,
    pub primitive: String,
    pub params: Map<String, Json>,
}

impl BoundCall {
    pub fn bind(index: usize, action: &RecordedAction, table: &SignatureTable) -> Self {
        Self {
            index,
            primitive: action.primitive.clone(),
            params: table.bind(&action.primitive, &action.args, &action.kwargs),
        }
    }

    pub fn param(&self, name: &str) -> Option<&Json> {
        self.params.get(name)
    }
}

pub fn bind_actions(actions: &[RecordedAction], table: &SignatureTable) -> Vec<BoundCall> {
    actions
        .iter()
        .enumerate()
        .map(|(index, action)| BoundCall::bind(index, action, table))
        .collect()
}

/// A pluggable domain rule.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs right after each call is recorded.
    fn check_call(&self, _call: &BoundCall, _out: &mut Vec<Violation>) {}

    /// Runs once over the complete log.
    fn check_log(&self, _calls: &[BoundCall], _out: &mut Vec<Violation>) {}
}

#[derive(Default)]
pub struct InvariantSet {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference bookkeeping rules.
    pub fn ledger(rules: &LedgerRules) -> Self {
        Self::new()
            .with(ExclusiveLegFields {
                primitive: rules.single_leg_primitive.clone(),
            })
            .with(KnownAccounts {
                params: rules.account_params.clone(),
                valid: rules.valid_accounts.clone(),
            })
            .with(KnownStatuses {
                param: rules.status_param.clone(),
                valid: rules.valid_statuses.clone(),
            })
            .with(PositiveAmount {
                primitive: rules.balanced_pair_primitive.clone(),
            })
            .with(BalancedLegs {
                primitive: rules.single_leg_primitive.clone(),
                tolerance: rules.balance_tolerance,
            })
    }

    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|inv| inv.name()).collect()
    }

    pub fn check_call(&self, call: &BoundCall) -> Vec<Violation> {
        let mut out = Vec::new();
        for invariant in &self.invariants {
            invariant.check_call(call, &mut out);
        }
        out
    }

    pub fn check_log(&self, calls: &[BoundCall]) -> Vec<Violation> {
        let mut out = Vec::new();
        for invariant in &self.invariants {
            invariant.check_log(calls, &mut out);
        }
        out
    }
}

/// Python-style truthiness of a JSON argument.
fn is_set(value: Option<&Json>) -> bool {
    match value {
        None | Some(Json::Null) => false,
        Some(Json::Bool(b)) => *b,
        Some(Json::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Json::String(s)) => !s.is_empty(),
        Some(Json::Array(items)) => !items.is_empty(),
        Some(Json::Object(map)) => !map.is_empty(),
    }
}

fn number(value: Option<&Json>) -> f64 {
    value.and_then(Json::as_f64).unwrap_or(0.0)
}

/// A single leg sets exactly one of `debit` and `credit`.
pub struct ExclusiveLegFields {
    pub primitive: String,
}

impl Invariant for ExclusiveLegFields {
    fn name(&self) -> &'static str {
        "debit_xor_credit"
    }

    fn check_call(&self, call: &BoundCall, out: &mut Vec<Violation>) {
        if call.primitive != self.primitive {
            return;
        }
        let debit = call.param("debit");
        let credit = call.param("credit");
        match (is_set(debit), is_set(credit)) {
            (true, true) => out.push(Violation::new(
                self.name(),
                "Both debit and credit set on same leg",
                json!({"debit": debit, "credit": credit}),
            )),
            (false, false) => out.push(Violation::new(
                self.name(),
                "Neither debit nor credit set",
                json!({"call": call.index, "params": call.params}),
            )),
            _ => {}
        }
    }
}

/// Account arguments reference known accounts. `0` and absent mean unset.
pub struct KnownAccounts {
    pub params: Vec<String>,
    pub valid: BTreeSet<i64>,
}

impl KnownAccounts {
    fn is_known(&self, value: &Json) -> bool {
        let id = value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|x| x.fract() == 0.0 && x.abs() < 9.0e15)
                .map(|x| x as i64)
        });
        id.is_some_and(|id| self.valid.contains(&id))
    }
}

impl Invariant for KnownAccounts {
    fn name(&self) -> &'static str {
        "valid_account"
    }

    fn check_call(&self, call: &BoundCall, out: &mut Vec<Violation>) {
        for param in &self.params {
            let Some(value) = call.param(param) else {
                continue;
            };
            if !is_set(Some(value)) || self.is_known(value) {
                continue;
            }
            out.push(Violation::new(
                self.name(),
                format!("Unknown {param}: {value}"),
                json!({ param.as_str(): value }),
            ));
        }
    }
}

/// Status arguments belong to the known status set. Empty means unset.
pub struct KnownStatuses {
    pub param: String,
    pub valid: BTreeSet<String>,
}

impl Invariant for KnownStatuses {
    fn name(&self) -> &'static str {
        "valid_status"
    }

    fn check_call(&self, call: &BoundCall, out: &mut Vec<Violation>) {
        let Some(value) = call.param(&self.param) else {
            return;
        };
        if !is_set(Some(value)) {
            return;
        }
        let known = value.as_str().is_some_and(|status| self.valid.contains(status));
        if !known {
            let shown = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            out.push(Violation::new(
                self.name(),
                format!("Invalid status: {shown}"),
                json!({ "status": value }),
            ));
        }
    }
}

/// A balanced pair carries a strictly positive amount.
pub struct PositiveAmount {
    pub primitive: String,
}

impl Invariant for PositiveAmount {
    fn name(&self) -> &'static str {
        "positive_amount"
    }

    fn check_call(&self, call: &BoundCall, out: &mut Vec<Violation>) {
        if call.primitive != self.primitive {
            return;
        }
        let amount = call.param("amount").cloned().unwrap_or(Json::Null);
        if amount.as_f64().is_some_and(|x| x > 0.0) {
            return;
        }
        out.push(Violation::new(
            self.name(),
            format!("{} amount must be positive: {amount}", self.primitive),
            json!({ "amount": amount }),
        ));
    }
}

/// Across all single legs of a run, debits equal credits within tolerance.
pub struct BalancedLegs {
    pub primitive: String,
    pub tolerance: f64,
}

impl Invariant for BalancedLegs {
    fn name(&self) -> &'static str {
        "balanced_entries"
    }

    fn check_log(&self, calls: &[BoundCall], out: &mut Vec<Violation>) {
        let legs: Vec<&BoundCall> = calls
            .iter()
            .filter(|call| call.primitive == self.primitive)
            .collect();
        if legs.is_empty() {
            return;
        }
        let total_debit: f64 = legs.iter().map(|leg| number(leg.param("debit"))).sum();
        let total_credit: f64 = legs.iter().map(|leg| number(leg.param("credit"))).sum();
        if (total_debit - total_credit).abs() > self.tolerance {
            out.push(Violation::new(
                self.name(),
                format!("Unbalanced entries: debits={total_debit}, credits={total_credit}"),
                json!({"total_debit": total_debit, "total_credit": total_credit}),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(primitive: &str, params: Json) -> BoundCall {
        BoundCall {
            index: 0,
            primitive: primitive.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn rules_hit(set: &InvariantSet, call: &BoundCall) -> Vec<String> {
        set.check_call(call).into_iter().map(|v| v.rule).collect()
    }

    #[test]
    fn single_leg_needs_exactly_one_money_field() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        assert_eq!(
            rules_hit(&set, &call("journal_add", json!({"debit": 0, "credit": 0}))),
            vec!["debit_xor_credit"]
        );
        assert_eq!(
            rules_hit(&set, &call("journal_add", json!({"debit": 5.0, "credit": 5.0}))),
            vec!["debit_xor_credit"]
        );
        assert!(rules_hit(&set, &call("journal_add", json!({"debit": 5.0, "credit": 0}))).is_empty());
    }

    #[test]
    fn unknown_accounts_are_flagged_and_zero_is_unset() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        let violations = set.check_call(&call(
            "journal_add_double",
            json!({"debit_account": 9999, "credit_account": 0, "amount": 1.0}),
        ));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "valid_account");
        assert_eq!(violations[0].message, "Unknown debit_account: 9999");

        assert!(
            set.check_call(&call("accounts_get", json!({"account_id": 5020.0})))
                .is_empty()
        );
        assert_eq!(
            rules_hit(&set, &call("accounts_get", json!({"account_id": "5020"}))),
            vec!["valid_account"]
        );
    }

    #[test]
    fn statuses_must_be_known_unless_empty() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        assert_eq!(
            rules_hit(&set, &call("journal_update_status", json!({"status": "approved"}))),
            vec!["valid_status"]
        );
        assert!(rules_hit(&set, &call("journal_query", json!({"status": ""}))).is_empty());
    }

    #[test]
    fn balanced_pair_amount_must_be_positive() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        for amount in [json!(-4.0), json!(0), json!("12"), Json::Null] {
            assert_eq!(
                rules_hit(&set, &call("journal_add_double", json!({"amount": amount}))),
                vec!["positive_amount"],
                "amount {amount}"
            );
        }
    }

    #[test]
    fn legs_must_balance_over_the_whole_log() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        let balanced = vec![
            call("journal_add", json!({"debit": 10.0, "credit": 0})),
            call("journal_add", json!({"debit": 0, "credit": 9.9995})),
        ];
        assert!(set.check_log(&balanced).is_empty());

        let unbalanced = vec![
            call("journal_add", json!({"debit": 10.0, "credit": 0})),
            call("journal_add", json!({"debit": 0, "credit": 9.0})),
        ];
        let violations = set.check_log(&unbalanced);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "balanced_entries");
    }

    #[test]
    fn balanced_pairs_alone_never_unbalance() {
        let set = InvariantSet::ledger(&LedgerRules::default());
        let calls = vec![
            call("journal_add_double", json!({"amount": 4.0})),
            call("journal_add_double", json!({"amount": 127.5})),
        ];
        assert!(set.check_log(&calls).is_empty());
    }

    #[test]
    fn bound_calls_see_signature_defaults() {
        let table = SignatureTable::ledger_default();
        let action = RecordedAction {
            primitive: "journal_add".to_string(),
            args: vec![],
            kwargs: json!({"date": "2025-01-03", "account_id": 5020, "description": "x", "debit": 4.0})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            result: Json::Null,
        };
        let bound = bind_actions(&[action], &table);
        assert_eq!(bound[0].param("credit"), Some(&json!(0)));
        assert_eq!(bound[0].param("status"), Some(&json!("pending-review")));
    }
}
