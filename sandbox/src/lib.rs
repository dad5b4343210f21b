//! Suspend/resume execution of agent scripts and their validation pipeline.
//!
//! Agent scripts perform side effects only by calling named host primitives.
//! Every call suspends the script, crosses a JSON-RPC boundary and resumes
//! with the host's result, so a run is fully described by its ordered calls.
//!
//! - **[`core`]**: Pure, deterministic logic (signatures, forbidden constructs,
//!   invariants, behavioral comparison). No I/O, fully testable in isolation.
//! - **[`script`]**: The resumable computation interface and the reference engine.
//! - **[`rpc`]**: Wire messages, call multiplexing and the serialized writer.
//! - **[`io`]**: Side-effecting operations (config, catalogs, call logs, child processes).
//!
//! Orchestration modules ([`coordinator`], [`bridge`], [`host`], [`static_check`],
//! [`dry_run`], [`pipeline`]) combine these to implement CLI commands.

pub mod bridge;
pub mod coordinator;
pub mod core;
pub mod dry_run;
pub mod exit_codes;
pub mod host;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod rpc;
pub mod script;
pub mod static_check;
pub mod synthetic;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
