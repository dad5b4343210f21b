//! Canned primitive responses for dry runs and rehearsals.
//!
//! Every responder is a pure function of the call and a small counter, so two
//! runs of the same script always see the same data.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value as Json, json};
use tracing::{debug, info};

use crate::core::invariants::LedgerRules;
use crate::host::Primitives;
use crate::script::{HostCall, Value};

/// Description substrings that make `rules_match` report no match.
pub const RULE_MISS_MARKERS: &[&str] = &["CLIENT", "UNKNOWN"];

#[derive(Debug, Clone, PartialEq)]
pub enum Responder {
    Fixed(Json),
    /// `config_get(key)`: unknown keys answer `null`, a missing key `fallback`.
    ConfigLookup { values: Map<String, Json>, fallback: Json },
    /// `matched`, unless the description contains a miss marker.
    RuleMatch { matched: Json, miss_markers: Vec<String> },
    /// `{"entry_id": "<prefix>NNN", "success": true}`, numbered across all writers.
    EntryIds { prefix: String },
    /// Surfaces the message through tracing and answers `null`.
    LogMessage,
}

/// Mutable numbering shared by one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResponseState {
    pub entries_written: usize,
}

fn argument<'a>(call: &'a HostCall, name: &str, position: usize) -> Option<&'a Value> {
    call.keyword(name).or_else(|| call.args.get(position))
}

impl Responder {
    pub fn respond(&self, call: &HostCall, state: &mut ResponseState) -> Json {
        match self {
            Responder::Fixed(value) => value.clone(),
            Responder::ConfigLookup { values, fallback } => match argument(call, "key", 0) {
                Some(Value::Str(key)) => values.get(key).cloned().unwrap_or(Json::Null),
                Some(_) => Json::Null,
                None => fallback.clone(),
            },
            Responder::RuleMatch {
                matched,
                miss_markers,
            } => {
                let description = argument(call, "description", 0)
                    .map(|value| value.to_string().to_uppercase())
                    .unwrap_or_default();
                if miss_markers
                    .iter()
                    .any(|marker| description.contains(&marker.to_uppercase()))
                {
                    Json::Null
                } else {
                    matched.clone()
                }
            }
            Responder::EntryIds { prefix } => {
                state.entries_written += 1;
                json!({
                    "entry_id": format!("{prefix}{:03}", state.entries_written),
                    "success": true,
                })
            }
            Responder::LogMessage => {
                let message = argument(call, "message", 0)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                debug!(target: "agent", %message, "ctx_log");
                Json::Null
            }
        }
    }
}

/// Primitive name to responder. Unlisted primitives answer `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticTable {
    responders: BTreeMap<String, Responder>,
}

fn transactions() -> Json {
    json!([
        {"date": "2025-01-03", "description": "GITHUB *PRO", "amount": -4.00,
         "reference": "ref001", "bank_account": "chase_checking"},
        {"date": "2025-01-05", "description": "AWS *SERVICES", "amount": -127.50,
         "reference": "ref002", "bank_account": "chase_checking"},
        {"date": "2025-01-15", "description": "CLIENT PAYMENT", "amount": 3500.00,
         "reference": "ref003", "bank_account": "chase_checking"},
    ])
}

impl SyntheticTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference bookkeeping data: one import file, three transactions, a
    /// matching rule for everything but client payments.
    pub fn ledger_default(rules: &LedgerRules) -> Self {
        let accounts: Vec<Json> = rules
            .valid_accounts
            .iter()
            .map(|id| {
                json!({"account_id": id, "account_name": format!("Account {id}"), "account_type": "expense"})
            })
            .collect();
        let config: Map<String, Json> = [
            ("business.name", json!("Test Corp")),
            ("thresholds.auto_confirm", json!(0.95)),
            ("thresholds.review", json!(0.70)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        let mut table = Self::new();
        table
            .insert(
                "importer_scan",
                Responder::Fixed(json!([{"name": "test.csv", "path": "import/test.csv", "size": 100}])),
            )
            .insert("importer_parse", Responder::Fixed(transactions()))
            .insert("importer_deduplicate", Responder::Fixed(transactions()))
            .insert("importer_mark_processed", Responder::Fixed(json!({"success": true})))
            .insert("journal_query", Responder::Fixed(json!([])))
            .insert(
                "journal_void",
                Responder::Fixed(json!({"reversal_id": "2025-01-099", "success": true})),
            )
            .insert("journal_update_status", Responder::Fixed(json!({"success": true})))
            .insert("journal_balance", Responder::Fixed(json!({"1010": 5000.0})))
            .insert("accounts_list", Responder::Fixed(Json::Array(accounts)))
            .insert(
                "accounts_get",
                Responder::Fixed(json!({"account_id": 5020, "account_name": "Software", "account_type": "expense"})),
            )
            .insert("accounts_exists", Responder::Fixed(json!(true)))
            .insert("accounts_by_type", Responder::Fixed(json!([])))
            .insert(
                "rules_match",
                Responder::RuleMatch {
                    matched: json!({"pattern": "GITHUB*", "vendor_name": "GitHub", "account_id": 5020, "confidence": 0.98}),
                    miss_markers: RULE_MISS_MARKERS.iter().map(|m| m.to_string()).collect(),
                },
            )
            .insert("rules_add", Responder::Fixed(json!({"rule_id": "r_new", "success": true})))
            .insert("rules_update", Responder::Fixed(json!({"success": true})))
            .insert("rules_list", Responder::Fixed(json!([])))
            .insert(
                "git_commit",
                Responder::Fixed(json!({"commit_hash": "abc123", "success": true})),
            )
            .insert("git_log", Responder::Fixed(json!([])))
            .insert(
                "queue_add_review",
                Responder::Fixed(json!({"item_id": "q001", "success": true})),
            )
            .insert("queue_pending", Responder::Fixed(json!([])))
            .insert(
                "config_get",
                Responder::ConfigLookup {
                    values: config,
                    fallback: json!(0.95),
                },
            )
            .insert("ctx_log", Responder::LogMessage)
            .insert("ctx_emit", Responder::Fixed(Json::Null))
            .insert("ctx_dry_run", Responder::Fixed(json!(true)));
        for writer in rules.writer_primitives() {
            table.insert(
                writer,
                Responder::EntryIds {
                    prefix: "2025-01-".to_string(),
                },
            );
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, responder: Responder) -> &mut Self {
        self.responders.insert(name.into(), responder);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Responder> {
        self.responders.get(name)
    }

    /// Replace entries with fixed responses.
    pub fn apply_overrides(&mut self, overrides: Map<String, Json>) {
        for (name, value) in overrides {
            debug!(%name, "synthetic override");
            self.responders.insert(name, Responder::Fixed(value));
        }
    }

    pub fn respond(&self, call: &HostCall, state: &mut ResponseState) -> Json {
        match self.responders.get(&call.function_name) {
            Some(responder) => responder.respond(call, state),
            None => Json::Null,
        }
    }

    /// Serve this table as live primitives under `names`.
    ///
    /// Numbering is shared by every call made through the registered handlers.
    pub fn register(self: &Arc<Self>, primitives: &mut Primitives, names: &[String]) {
        let state = Arc::new(Mutex::new(ResponseState::default()));
        for name in names {
            let table = Arc::clone(self);
            let state = Arc::clone(&state);
            let is_log = matches!(table.get(name), Some(Responder::LogMessage));
            primitives.register(name.clone(), move |call: &HostCall| {
                if is_log {
                    let message = argument(call, "message", 0)
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    info!(target: "agent", "{message}");
                }
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(table.respond(call, &mut state))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SyntheticTable {
        SyntheticTable::ledger_default(&LedgerRules::default())
    }

    #[test]
    fn rule_match_misses_client_and_unknown_descriptions() {
        let table = table();
        let mut state = ResponseState::default();
        let hit = HostCall::new("rules_match").kwarg("description", Value::str("GITHUB *PRO"));
        assert_eq!(table.respond(&hit, &mut state)["vendor_name"], json!("GitHub"));
        for description in ["CLIENT PAYMENT", "unknown vendor"] {
            let miss = HostCall::new("rules_match").kwarg("description", Value::str(description));
            assert_eq!(table.respond(&miss, &mut state), Json::Null, "{description}");
        }
    }

    #[test]
    fn config_lookup_by_key() {
        let table = table();
        let mut state = ResponseState::default();
        let known = HostCall::new("config_get").arg(Value::str("thresholds.auto_confirm"));
        assert_eq!(table.respond(&known, &mut state), json!(0.95));
        let unknown = HostCall::new("config_get").arg(Value::str("nope"));
        assert_eq!(table.respond(&unknown, &mut state), Json::Null);
        assert_eq!(table.respond(&HostCall::new("config_get"), &mut state), json!(0.95));
    }

    #[test]
    fn entry_ids_count_across_writers() {
        let table = table();
        let mut state = ResponseState::default();
        let first = table.respond(&HostCall::new("journal_add_double"), &mut state);
        let second = table.respond(&HostCall::new("journal_add"), &mut state);
        assert_eq!(first["entry_id"], json!("2025-01-001"));
        assert_eq!(second["entry_id"], json!("2025-01-002"));
    }

    #[test]
    fn accounts_list_follows_configured_accounts() {
        let table = table();
        let listed = table.respond(&HostCall::new("accounts_list"), &mut ResponseState::default());
        assert_eq!(listed.as_array().map(Vec::len), Some(11));
    }

    #[test]
    fn unlisted_primitives_answer_null_and_overrides_win() {
        let mut table = table();
        let mut state = ResponseState::default();
        assert_eq!(table.respond(&HostCall::new("made_up"), &mut state), Json::Null);
        table.apply_overrides(Map::from_iter([("importer_scan".to_string(), json!([]))]));
        assert_eq!(table.respond(&HostCall::new("importer_scan"), &mut state), json!([]));
    }

    #[test]
    fn registered_handlers_share_numbering() {
        let table = Arc::new(table());
        let mut primitives = Primitives::new();
        let names = vec!["journal_add_double".to_string(), "ctx_log".to_string()];
        table.register(&mut primitives, &names);
        assert_eq!(primitives.names(), vec!["ctx_log", "journal_add_double"]);
        let first = primitives
            .handle("journal_add_double", &json!({"kwargs": {"amount": 1.0}}))
            .expect("handled");
        let second = primitives
            .handle("journal_add_double", &json!({"kwargs": {"amount": 2.0}}))
            .expect("handled");
        assert_eq!(first["entry_id"], json!("2025-01-001"));
        assert_eq!(second["entry_id"], json!("2025-01-002"));
        assert_eq!(
            primitives.handle("ctx_log", &json!({"args": ["hello"]})),
            Ok(Json::Null)
        );
    }
}
