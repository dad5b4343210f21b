//! Resumable computation interface and the reference script engine.
//!
//! The coordinator and the validators only see the traits in this module:
//!
//! - [`Engine`] compiles source into a [`Program`].
//! - [`Program::start`] runs until the script either completes or calls an
//!   external function, returning [`Progress`].
//! - A paused computation is a [`Snapshot`]. It exposes the pending
//!   [`HostCall`] and is consumed by [`Snapshot::resume`], so a snapshot can
//!   never be resumed twice.
//!
//! [`interp::Interpreter`] is the engine shipped with the crate. Any other
//! interpreter that can pause at a call boundary can be substituted.

pub mod ast;
mod infer;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json, json};
use thiserror::Error;

pub use interp::Interpreter;
pub use value::{Dict, Value, ValueKind};

/// A call from a paused script to a host primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct HostCall {
    pub function_name: String,
    pub args: Vec<Value>,
    /// Keyword arguments in call-site order.
    pub kwargs: Vec<(String, Value)>,
}

impl HostCall {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.push((name.into(), value));
        self
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Wire form: `{"args": [...], "kwargs": {...}}`, `kwargs` omitted when empty.
    pub fn params_json(&self) -> Json {
        let args: Vec<Json> = self.args.iter().map(Value::to_json).collect();
        if self.kwargs.is_empty() {
            return json!({ "args": args });
        }
        let kwargs: Map<String, Json> = self
            .kwargs
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect();
        json!({ "args": args, "kwargs": kwargs })
    }

    /// Rebuild a call from wire params. Missing fields are treated as empty.
    pub fn from_params(function_name: impl Into<String>, params: &Json) -> Self {
        let args = params
            .get("args")
            .and_then(Json::as_array)
            .map(|items| items.iter().map(Value::from).collect())
            .unwrap_or_default();
        let kwargs = params
            .get("kwargs")
            .and_then(Json::as_object)
            .map(|map| {
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            function_name: function_name.into(),
            args,
            kwargs,
        }
    }
}

/// State of a computation after `start` or `resume`.
pub enum Progress {
    Paused(Box<dyn Snapshot>),
    Complete(Value),
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Paused(snapshot) => f.debug_tuple("Paused").field(snapshot.call()).finish(),
            Progress::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
        }
    }
}

/// A computation suspended at an external call.
pub trait Snapshot: Send {
    fn call(&self) -> &HostCall;

    /// Continue execution with `value` as the result of [`Snapshot::call`].
    fn resume(self: Box<Self>, value: Value) -> Result<Progress, ScriptError>;
}

/// Where a statically visible call goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A declared external function (host primitive).
    External,
    Builtin,
    /// A name the script binds itself.
    Variable,
    Unknown,
}

/// A call expression found in the source, with inferred argument kinds.
///
/// `None` kinds are unknown statically and never produce type errors.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub function: String,
    pub target: CallTarget,
    pub line: usize,
    pub positional: Vec<Option<ValueKind>>,
    pub keywords: Vec<(String, Option<ValueKind>)>,
}

/// A compiled script. Each `start` is an independent execution.
pub trait Program: Send + Sync {
    fn start(&self) -> Result<Progress, ScriptError>;

    fn call_sites(&self) -> Vec<CallSite>;
}

/// Compiles scripts. `externals` names the functions that suspend execution.
pub trait Engine: Send + Sync {
    fn compile(&self, source: &str, externals: &[String]) -> Result<Arc<dyn Program>, ScriptError>;
}

/// Failure category of a script error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Attribute,
    Key,
    Index,
    Value,
    ZeroDivision,
    Budget,
    Replay,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Value => "ValueError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Budget => "BudgetExceeded",
            ErrorKind::Replay => "ReplayDiverged",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse or runtime failure raised by a script.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// Attach a line if none is recorded yet.
    pub fn or_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }

    /// Diagnostic trace in the form reported to hosts.
    pub fn trace(&self) -> String {
        match self.line {
            Some(line) => format!("script, line {line}\n{self}"),
            None => format!("script\n{self}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_json_omits_empty_kwargs() {
        let call = HostCall::new("importer_parse").arg(Value::str("test.csv"));
        assert_eq!(call.params_json(), json!({"args": ["test.csv"]}));
    }

    #[test]
    fn params_json_keeps_keyword_order() {
        let call = HostCall::new("rules_add")
            .kwarg("pattern", Value::str("GITHUB"))
            .kwarg("account_id", Value::Int(5020));
        assert_eq!(
            call.params_json().to_string(),
            r#"{"args":[],"kwargs":{"pattern":"GITHUB","account_id":5020}}"#
        );
    }

    #[test]
    fn from_params_reads_args_and_kwargs() {
        let call = HostCall::from_params(
            "rules_match",
            &json!({"args": [1], "kwargs": {"description": "GITHUB"}}),
        );
        assert_eq!(call.args, vec![Value::Int(1)]);
        assert_eq!(call.keyword("description"), Some(&Value::str("GITHUB")));
    }

    #[test]
    fn trace_names_the_line() {
        let err = ScriptError::at(ErrorKind::Key, 4, "'amount'");
        assert_eq!(err.trace(), "script, line 4\nKeyError: 'amount'");
    }
}
