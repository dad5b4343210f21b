//! Drives one resumable computation to completion.
//!
//! Dry runs resolve each pause synchronously from a synthetic table through
//! [`drive`]. Live runs resolve it over the wire through [`run_live`], which
//! awaits the response so a paused run holds no thread. Both record exactly
//! the calls the script makes.

use std::sync::Arc;

use serde_json::{Value as Json, json};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::rpc::message::{Request, RpcError, SERVER_ERROR};
use crate::rpc::multiplexer::{CallError, Multiplexer};
use crate::rpc::outbound::Outbound;
use crate::script::{HostCall, Program, Progress, ScriptError, Value};

/// Why a run produced no output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("{function}: {source}")]
    Call {
        function: String,
        #[source]
        source: CallError,
    },
    /// The worker computing a step panicked or was cancelled.
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl RunFailure {
    /// Failure kind reported as `data.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            RunFailure::Script(err) => err.kind.label(),
            RunFailure::Call {
                source: CallError::Remote(_),
                ..
            } => "PrimitiveError",
            RunFailure::Call { .. } => "ConnectionError",
            RunFailure::Aborted(_) => "InternalError",
        }
    }

    pub fn traceback(&self) -> String {
        match self {
            RunFailure::Script(err) => err.trace(),
            RunFailure::Call { function, source } => {
                format!("primitive call {function}\n{}: {source}", self.kind())
            }
            RunFailure::Aborted(reason) => format!("{}: {reason}", self.kind()),
        }
    }

    /// Error object answering the `run` request.
    pub fn to_rpc_error(&self) -> RpcError {
        let message = match self {
            RunFailure::Script(err) => err.to_string(),
            RunFailure::Call {
                source: CallError::Remote(remote),
                ..
            } => remote.message.clone(),
            RunFailure::Call { .. } | RunFailure::Aborted(_) => self.to_string(),
        };
        RpcError::new(SERVER_ERROR, message).with_data(json!({
            "type": self.kind(),
            "traceback": self.traceback(),
        }))
    }
}

/// Start `program` and resume it with whatever `resolve` returns for each call.
///
/// An error from `resolve` or from the script ends the run; nothing is resumed
/// after it.
pub fn drive<F, E>(program: &dyn Program, mut resolve: F) -> Result<Value, E>
where
    F: FnMut(&HostCall) -> Result<Value, E>,
    E: From<ScriptError>,
{
    let mut progress = program.start()?;
    let mut calls = 0usize;
    loop {
        match progress {
            Progress::Complete(output) => {
                debug!(calls, "computation complete");
                return Ok(output);
            }
            Progress::Paused(snapshot) => {
                calls += 1;
                trace!(function = %snapshot.call().function_name, calls, "paused");
                let value = resolve(snapshot.call())?;
                progress = snapshot.resume(value)?;
            }
        }
    }
}

/// Run `program`, sending each call through `outbound` and awaiting its response.
///
/// Script steps run on the blocking pool; between steps the run is only a
/// pending future, so any number of runs can wait on the host at once.
#[instrument(skip_all)]
pub async fn run_live(
    program: Arc<dyn Program>,
    mux: &Multiplexer,
    outbound: &Outbound,
) -> Result<Json, RunFailure> {
    let mut progress = step(move || program.start()).await?;
    let mut calls = 0usize;
    loop {
        let snapshot = match progress {
            Progress::Complete(output) => {
                debug!(calls, "run complete");
                return Ok(output.to_json());
            }
            Progress::Paused(snapshot) => snapshot,
        };
        calls += 1;
        let call = snapshot.call();
        let function = call.function_name.clone();
        trace!(%function, calls, "paused");

        let pending = mux.register();
        let id = pending.id();
        let request = Request::call(id, function.clone(), call.params_json());
        if let Err(source) = outbound.send(request) {
            mux.cancel(id);
            return Err(RunFailure::Call { function, source });
        }
        let result = pending
            .wait()
            .await
            .map_err(|source| RunFailure::Call { function, source })?;
        progress = step(move || snapshot.resume(Value::from(result))).await?;
    }
}

async fn step<F>(compute: F) -> Result<Progress, RunFailure>
where
    F: FnOnce() -> Result<Progress, ScriptError> + Send + 'static,
{
    match tokio::task::spawn_blocking(compute).await {
        Ok(progress) => Ok(progress?),
        Err(join) => Err(RunFailure::Aborted(join.to_string())),
    }
}
