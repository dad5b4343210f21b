//! Test-only helpers: scripted computations, fixture scripts and in-process bridges.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, duplex};
use tokio::task::JoinHandle;

use crate::bridge::{Bridge, ServeStats};
use crate::core::diff::DiffSettings;
use crate::core::invariants::LedgerRules;
use crate::core::signature::SignatureTable;
use crate::host::{HostClient, Primitives};
use crate::pipeline::Validator;
use crate::rpc::message::Message;
use crate::script::{CallSite, HostCall, Program, Progress, ScriptError, Snapshot, Value};
use crate::synthetic::SyntheticTable;

/// Ingest that only auto-confirms confident rule matches and queues the rest.
pub const GATED_INGEST: &str = "\
threshold = config_get('thresholds.auto_confirm')
files = importer_scan()
for f in files:
    parsed = importer_parse(f['name'])
    txns = importer_deduplicate(parsed)
    for t in txns:
        rule = rules_match(description=t['description'], amount=t['amount'])
        amount = abs(t['amount'])
        if rule and rule['confidence'] >= threshold:
            journal_add_double(date=t['date'], description=t['description'], debit_account=rule['account_id'], credit_account=1010, amount=amount, confidence=rule['confidence'], status='auto-confirmed')
        else:
            entry = journal_add_double(date=t['date'], description=t['description'], debit_account=5050, credit_account=1010, amount=amount, status='pending-review')
            queue_add_review(entry_id=entry['entry_id'], description=t['description'])
    importer_mark_processed(f['name'])
git_commit('ingest bank transactions')
";

/// Same ingest with the confidence gate removed: everything is auto-confirmed.
pub const UNGATED_INGEST: &str = "\
files = importer_scan()
for f in files:
    parsed = importer_parse(f['name'])
    txns = importer_deduplicate(parsed)
    for t in txns:
        rule = rules_match(description=t['description'], amount=t['amount'])
        amount = abs(t['amount'])
        journal_add_double(date=t['date'], description=t['description'], debit_account=5020, credit_account=1010, amount=amount, status='auto-confirmed')
    importer_mark_processed(f['name'])
git_commit('ingest bank transactions')
";

/// Runs cleanly but breaks three ledger rules.
pub const VIOLATING_ENTRIES: &str = "\
journal_add(date='2025-01-03', account_id=5020, description='empty leg', debit=0.0, credit=0.0)
journal_add_double(date='2025-01-04', description='refund', debit_account=5020, credit_account=1010, amount=-5.0)
journal_add_double(date='2025-01-05', description='mystery', debit_account=9999, credit_account=1010, amount=5.0)
";

/// Two single legs that net to zero.
pub const BALANCED_LEGS: &str = "\
journal_add(date='2025-01-03', account_id=5020, description='hosting', debit=42.5, status='auto-confirmed')
journal_add(date='2025-01-03', account_id=1010, description='hosting', credit=42.5, status='auto-confirmed')
";

/// Validator over the reference bookkeeping catalog, data and rules.
pub fn ledger_validator() -> Validator {
    let rules = LedgerRules::default();
    Validator::ledger(
        SignatureTable::ledger_default(),
        SyntheticTable::ledger_default(&rules),
        &rules,
        DiffSettings::default(),
    )
}

/// A computation that pauses on a fixed list of calls and completes with
/// the list of values it was resumed with.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProgram {
    calls: Vec<HostCall>,
}

impl ScriptedProgram {
    pub fn new(calls: Vec<HostCall>) -> Self {
        Self { calls }
    }
}

impl Program for ScriptedProgram {
    fn start(&self) -> Result<Progress, ScriptError> {
        ScriptedSnapshot {
            calls: self.calls.clone(),
            received: Vec::new(),
        }
        .progress()
    }

    fn call_sites(&self) -> Vec<CallSite> {
        Vec::new()
    }
}

struct ScriptedSnapshot {
    calls: Vec<HostCall>,
    received: Vec<Value>,
}

impl ScriptedSnapshot {
    fn progress(self) -> Result<Progress, ScriptError> {
        if self.received.len() == self.calls.len() {
            return Ok(Progress::Complete(Value::List(self.received)));
        }
        Ok(Progress::Paused(Box::new(self)))
    }
}

impl Snapshot for ScriptedSnapshot {
    fn call(&self) -> &HostCall {
        &self.calls[self.received.len()]
    }

    fn resume(mut self: Box<Self>, value: Value) -> Result<Progress, ScriptError> {
        self.received.push(value);
        self.progress()
    }
}

/// A bridge served in-process over duplex pipes, driven line by line.
pub struct BridgeHarness {
    writer: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
    serve: JoinHandle<Result<ServeStats>>,
}

impl BridgeHarness {
    pub fn start(bridge: Bridge) -> Self {
        let (writer, bridge_read) = duplex(64 * 1024);
        let (bridge_write, reader) = duplex(64 * 1024);
        let serve = tokio::spawn(async move { bridge.serve(bridge_read, bridge_write).await });
        Self {
            writer,
            lines: BufReader::new(reader).lines(),
            serve,
        }
    }

    /// Bridge over the reference bookkeeping catalog.
    pub fn ledger() -> Self {
        Self::start(Bridge::with_table(&SignatureTable::ledger_default()))
    }

    pub async fn send(&mut self, message: impl Into<Message>) {
        self.send_raw(&message.into().to_line()).await;
    }

    /// Write `line` verbatim, newline appended.
    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write to bridge");
    }

    pub async fn next_message(&mut self) -> Message {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read bridge output")
            .expect("bridge output ended");
        Message::parse(&line).expect("bridge wrote a well-formed message")
    }

    /// Close the input and wait for the loop to end.
    pub async fn finish(self) -> ServeStats {
        drop(self.writer);
        self.serve
            .await
            .expect("serve task")
            .expect("serve result")
    }
}

/// A host client wired to an in-process bridge over the reference catalog.
pub fn connect_host(primitives: Primitives) -> (HostClient, JoinHandle<Result<ServeStats>>) {
    let (host_write, bridge_read) = duplex(64 * 1024);
    let (bridge_write, host_read) = duplex(64 * 1024);
    let bridge = Bridge::with_table(&SignatureTable::ledger_default());
    let serve = tokio::spawn(async move { bridge.serve(bridge_read, bridge_write).await });
    (HostClient::connect(host_read, host_write, primitives), serve)
}
