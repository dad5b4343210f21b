//! Host side of the bridge protocol.
//!
//! The host answers primitive calls from the bridge and issues `run`
//! requests of its own. Both directions share one connection, so this side
//! keeps its own multiplexer for the `run` ids it hands out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::bridge::{METHOD_SHUTDOWN, run_request};
use crate::rpc::message::{METHOD_NOT_FOUND, Message, Request, Response, RpcError, SERVER_ERROR};
use crate::rpc::multiplexer::{CallError, Multiplexer};
use crate::rpc::outbound::Outbound;
use crate::script::HostCall;

pub type PrimitiveHandler = Arc<dyn Fn(&HostCall) -> anyhow::Result<Json> + Send + Sync>;

/// Sees every successfully handled call with its result.
pub type CallObserver = Arc<dyn Fn(&HostCall, &Json) + Send + Sync>;

/// Named primitive handlers served to the bridge.
#[derive(Clone, Default)]
pub struct Primitives {
    handlers: BTreeMap<String, PrimitiveHandler>,
    observers: Vec<CallObserver>,
}

impl Primitives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&HostCall) -> anyhow::Result<Json> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn observe<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&HostCall, &Json) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Sorted names, suitable as `external_functions`.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Answer one primitive call.
    pub fn handle(&self, method: &str, params: &Json) -> Result<Json, RpcError> {
        let Some(handler) = self.handlers.get(method) else {
            return Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("unknown primitive: {method}"),
            ));
        };
        let call = HostCall::from_params(method, params);
        let result = handler(&call).map_err(|err| RpcError::new(SERVER_ERROR, format!("{err:#}")))?;
        for observer in &self.observers {
            observer(&call, &result);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The bridge answered the `run` with an error.
    #[error("script failed: {}", .0.message)]
    Script(RpcError),
    #[error("script execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("bridge connection: {0}")]
    Connection(CallError),
}

impl HostError {
    /// `data.type` of a script failure, e.g. `NameError`.
    pub fn failure_type(&self) -> Option<&str> {
        match self {
            HostError::Script(error) => error.data.as_ref()?.get("type")?.as_str(),
            _ => None,
        }
    }
}

impl From<CallError> for HostError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Remote(error) => HostError::Script(error),
            other => HostError::Connection(other),
        }
    }
}

pub struct HostClient {
    mux: Arc<Multiplexer>,
    outbound: Outbound,
    run_timeout: Option<Duration>,
    reader: JoinHandle<()>,
}

impl HostClient {
    /// Start serving `primitives` over the connection. Needs a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W, primitives: Primitives) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mux = Arc::new(Multiplexer::new());
        let (outbound, _writer) = Outbound::spawn(writer);
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&mux),
            outbound.clone(),
            Arc::new(primitives),
        ));
        Self {
            mux,
            outbound,
            run_timeout: None,
            reader,
        }
    }

    /// Bound every `run_script` wait. `None` waits indefinitely.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Execute `script` on the bridge and return its output.
    ///
    /// With `externals` unset the bridge uses its own primitive list.
    #[instrument(skip_all)]
    pub async fn run_script(
        &self,
        script: &str,
        externals: Option<Vec<String>>,
    ) -> Result<Json, HostError> {
        let pending = self.mux.register();
        let id = pending.id();
        if let Err(err) = self.outbound.send(run_request(id, script, externals)) {
            self.mux.cancel(id);
            return Err(err.into());
        }
        debug!(id, "run sent");
        let outcome = match self.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.mux.cancel(id);
                    warn!(id, ?limit, "run timed out");
                    return Err(HostError::Timeout(limit));
                }
            },
            None => pending.wait().await,
        };
        outcome.map_err(HostError::from)
    }

    /// Send the `shutdown` notification. In-flight runs are not drained.
    pub fn shutdown(&self) -> Result<(), HostError> {
        info!("sending shutdown");
        self.outbound.send(Request::notification(METHOD_SHUTDOWN))?;
        Ok(())
    }

    pub fn pending_runs(&self) -> usize {
        self.mux.pending_count()
    }

    /// Whether the bridge's output has ended.
    pub fn is_disconnected(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for HostClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    reader: R,
    mux: Arc<Multiplexer>,
    outbound: Outbound,
    primitives: Arc<Primitives>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "bridge output unreadable");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Message::parse(&line) {
            Err(rejection) => warn!(?rejection.outcome, "skipping malformed bridge output"),
            Ok(Message::Response(response)) => match response.id.as_u64() {
                Some(id) => {
                    mux.deliver(id, response.outcome);
                }
                None => warn!(id = %response.id, "bridge response without a usable id"),
            },
            Ok(Message::Request(request)) => {
                let Some(id) = request.id.clone() else {
                    debug!(method = %request.method, "ignoring notification from bridge");
                    continue;
                };
                let primitives = Arc::clone(&primitives);
                let outbound = outbound.clone();
                tokio::task::spawn_blocking(move || {
                    let params = request.params_or_empty();
                    let response = match primitives.handle(&request.method, &params) {
                        Ok(result) => Response::success(id, result),
                        Err(error) => {
                            debug!(method = %request.method, %error, "primitive failed");
                            Response::failure(id, error)
                        }
                    };
                    if outbound.send(response).is_err() {
                        debug!("outbound closed; primitive result dropped");
                    }
                });
            }
        }
    }
    let abandoned = mux.abandon_all();
    debug!(abandoned, "bridge output closed");
}
