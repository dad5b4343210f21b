use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sandbox::core::invariants::LedgerRules;
use sandbox::core::signature::SignatureTable;
use sandbox::core::types::RecordedAction;
use sandbox::host::{HostError, Primitives};
use sandbox::io::call_log::{CallLog, read_log};
use sandbox::io::config::HostConfig;
use sandbox::io::process::{BridgeProcess, bridge_command};
use sandbox::synthetic::SyntheticTable;
use sandbox::test_support::{GATED_INGEST, connect_host};
use serde_json::json;

fn synthetic_primitives() -> Primitives {
    let rules = LedgerRules::default();
    let mut primitives = Primitives::new();
    Arc::new(SyntheticTable::ledger_default(&rules))
        .register(&mut primitives, &SignatureTable::ledger_default().names());
    primitives
}

#[tokio::test(flavor = "multi_thread")]
async fn host_serves_primitives_for_a_full_ingest() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut primitives = synthetic_primitives();
    {
        let seen = Arc::clone(&seen);
        primitives.observe(move |call, _| {
            seen.lock().expect("lock").push(call.function_name.clone());
        });
    }
    let (client, serve) = connect_host(primitives);

    let output = client.run_script(GATED_INGEST, None).await.expect("run");
    assert_eq!(output, json!({"commit_hash": "abc123", "success": true}));

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen.first().map(String::as_str), Some("config_get"));
    assert_eq!(seen.last().map(String::as_str), Some("git_commit"));
    assert_eq!(seen.iter().filter(|name| *name == "journal_add_double").count(), 3);
    assert_eq!(seen.iter().filter(|name| *name == "queue_add_review").count(), 1);

    client.shutdown().expect("shutdown");
    let stats = serve.await.expect("join").expect("serve");
    assert!(stats.shutdown_requested);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_scripts_share_one_connection() {
    let (client, _serve) = connect_host(synthetic_primitives());
    let first = client.run_script("accounts_exists(5020)\n", None);
    let second = client.run_script("len(importer_parse('test.csv'))\n", None);
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.expect("first"), json!(true));
    assert_eq!(second.expect("second"), json!(3));
    assert_eq!(client.pending_runs(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_surface_with_their_type() {
    let mut primitives = synthetic_primitives();
    primitives.register("journal_add", |_| Err(anyhow::anyhow!("ledger is read-only")));
    let (client, _serve) = connect_host(primitives);

    let script_error = client
        .run_script("undefined_helper()\n", None)
        .await
        .expect_err("name error");
    assert_eq!(script_error.failure_type(), Some("NameError"));

    let primitive_error = client
        .run_script(
            "journal_add(date='2025-01-03', account_id=5020, description='x', debit=1.0)\n",
            None,
        )
        .await
        .expect_err("primitive error");
    assert_eq!(primitive_error.failure_type(), Some("PrimitiveError"));
    assert!(matches!(primitive_error, HostError::Script(_)));
    assert!(primitive_error.to_string().contains("ledger is read-only"));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_runs_time_out() {
    let mut primitives = Primitives::new();
    primitives.register("importer_scan", |_| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(json!([]))
    });
    let (client, serve) = connect_host(primitives);
    let client = client.with_run_timeout(Some(Duration::from_millis(50)));

    let error = client
        .run_script("importer_scan()\n", Some(vec!["importer_scan".to_string()]))
        .await
        .expect_err("timeout");
    assert_eq!(error, HostError::Timeout(Duration::from_millis(50)));
    assert_eq!(client.pending_runs(), 0);

    // The bridge still waits on the primitive; shutdown releases that run.
    client.shutdown().expect("shutdown");
    let stats = serve.await.expect("join").expect("serve");
    assert_eq!(stats.runs_started, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_child_process_round_trip_with_call_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_path = temp.path().join("logs").join("calls.jsonl");
    let call_log = CallLog::open(&log_path).expect("open log");

    let mut primitives = synthetic_primitives();
    primitives.observe(move |call, result| {
        call_log
            .append(&RecordedAction::new(call, result.clone()))
            .expect("append");
    });

    let cmd = bridge_command(Path::new(env!("CARGO_BIN_EXE_sandbox")), None);
    let process = BridgeProcess::spawn(cmd, primitives, &HostConfig::default()).expect("spawn");
    let output = process
        .client()
        .run_script("files = importer_scan()\nimporter_mark_processed(files[0]['name'])\n", None)
        .await
        .expect("run");
    assert_eq!(output, json!({"success": true}));

    let status = process.shutdown().await.expect("shutdown");
    assert!(status.success(), "bridge exit: {status:?}");

    let entries = read_log(&log_path).expect("read log");
    let names: Vec<_> = entries.iter().map(|entry| entry.primitive.as_str()).collect();
    assert_eq!(names, vec!["importer_scan", "importer_mark_processed"]);
    assert_eq!(entries[1].args, vec![json!("test.csv")]);
}
