//! Transport loop for the side that owns the script engine.
//!
//! One reader classifies every inbound line. Responses go to the multiplexer.
//! Each `run` request becomes its own task, so a paused script never stalls
//! intake and costs no thread while it waits. `shutdown` ends the loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{RunFailure, run_live};
use crate::core::signature::SignatureTable;
use crate::rpc::message::{Message, Request, Response, RpcError};
use crate::rpc::multiplexer::Multiplexer;
use crate::rpc::outbound::Outbound;
use crate::script::{Engine, Interpreter};

pub const METHOD_RUN: &str = "run";
pub const METHOD_SHUTDOWN: &str = "shutdown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_functions: Option<Vec<String>>,
}

/// What one `serve` call saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServeStats {
    pub runs_started: usize,
    pub responses_routed: usize,
    pub responses_dropped: usize,
    pub protocol_errors: usize,
    /// Calls still waiting when the loop ended.
    pub abandoned: usize,
    pub shutdown_requested: bool,
}

pub struct Bridge {
    engine: Arc<dyn Engine>,
    default_externals: Vec<String>,
    mux: Arc<Multiplexer>,
}

impl Bridge {
    /// `default_externals` applies to `run` requests without `external_functions`.
    pub fn new(engine: Arc<dyn Engine>, default_externals: Vec<String>) -> Self {
        Self {
            engine,
            default_externals,
            mux: Arc::new(Multiplexer::new()),
        }
    }

    /// Reference interpreter with the primitives of `table` as externals.
    pub fn with_table(table: &SignatureTable) -> Self {
        Self::new(Arc::new(Interpreter::new()), table.names())
    }

    #[instrument(skip_all)]
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<ServeStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, _writer) = Outbound::spawn(writer);
        let mut lines = BufReader::new(reader).lines();
        let mut stats = ServeStats::default();

        while let Some(line) = lines.next_line().await.context("read bridge input")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Message::parse(line) {
                Err(rejection) => {
                    stats.protocol_errors += 1;
                    warn!(?rejection.outcome, "rejected inbound message");
                    send(&outbound, rejection);
                }
                Ok(Message::Response(response)) => self.route(response, &mut stats),
                Ok(Message::Request(request)) => match request.method.as_str() {
                    METHOD_SHUTDOWN => {
                        info!("shutdown requested");
                        stats.shutdown_requested = true;
                        break;
                    }
                    METHOD_RUN => self.start_run(request, &outbound, &mut stats),
                    other => {
                        stats.protocol_errors += 1;
                        match request.id {
                            Some(id) => {
                                send(&outbound, Response::failure(id, RpcError::method_not_found(other)));
                            }
                            None => debug!(method = other, "ignoring unknown notification"),
                        }
                    }
                },
            }
        }

        stats.abandoned = self.mux.abandon_all();
        info!(?stats, "bridge loop finished");
        Ok(stats)
    }

    fn route(&self, response: Response, stats: &mut ServeStats) {
        let delivered = match response.id.as_u64() {
            Some(id) => self.mux.deliver(id, response.outcome),
            None => {
                warn!(id = %response.id, "dropping response with a non-numeric id");
                false
            }
        };
        if delivered {
            stats.responses_routed += 1;
        } else {
            stats.responses_dropped += 1;
        }
    }

    fn start_run(&self, request: Request, outbound: &Outbound, stats: &mut ServeStats) {
        let Some(id) = request.id.clone() else {
            warn!("ignoring run notification without an id");
            return;
        };
        let params: RunParams = match serde_json::from_value(request.params_or_empty()) {
            Ok(params) => params,
            Err(err) => {
                stats.protocol_errors += 1;
                let error = RpcError::invalid_params(format!("invalid run params: {err}"));
                send(outbound, Response::failure(id, error));
                return;
            }
        };
        let externals = params
            .external_functions
            .unwrap_or_else(|| self.default_externals.clone());

        stats.runs_started += 1;
        debug!(%id, externals = externals.len(), "starting run");
        let engine = Arc::clone(&self.engine);
        let mux = Arc::clone(&self.mux);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let outcome = match engine.compile(&params.script, &externals) {
                Ok(program) => run_live(program, &mux, &outbound).await,
                Err(err) => Err(RunFailure::from(err)),
            };
            let response = match outcome {
                Ok(output) => Response::success(id, output),
                Err(failure) => {
                    debug!(kind = failure.kind(), %failure, "run failed");
                    Response::failure(id, failure.to_rpc_error())
                }
            };
            send(&outbound, response);
        });
    }
}

fn send(outbound: &Outbound, message: impl Into<Message>) {
    if outbound.send(message).is_err() {
        debug!("outbound closed; message dropped");
    }
}

/// Build a `run` request.
pub fn run_request(id: u64, script: &str, externals: Option<Vec<String>>) -> Request {
    let params = RunParams {
        script: script.to_string(),
        external_functions: externals,
    };
    Request::call(
        id,
        METHOD_RUN,
        serde_json::to_value(params).unwrap_or(Json::Null),
    )
}
