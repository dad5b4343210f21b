//! Shared deterministic types for validation results.
//!
//! These types are the stable contract between the validation stages and
//! whatever renders their output. They serialize to the JSON verdict format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::script::HostCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks the pipeline from continuing.
    Error,
    Warning,
}

/// A finding from static validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.location = line.map(|line| format!("line {line}"));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// One primitive call observed during a run, in call order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub primitive: String,
    #[serde(default)]
    pub args: Vec<Json>,
    #[serde(default)]
    pub kwargs: Map<String, Json>,
    #[serde(default)]
    pub result: Json,
}

impl RecordedAction {
    pub fn new(call: &HostCall, result: Json) -> Self {
        Self {
            primitive: call.function_name.clone(),
            args: call.args.iter().map(|value| value.to_json()).collect(),
            kwargs: call
                .kwargs
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
            result,
        }
    }
}

/// A domain-rule breach found in a recorded run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub message: String,
    #[serde(default)]
    pub details: Json,
}

impl Violation {
    pub fn new(rule: &str, message: impl Into<String>, details: Json) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Added,
    Removed,
    Changed,
}

impl ChangeCategory {
    pub fn symbol(self) -> char {
        match self {
            ChangeCategory::Added => '+',
            ChangeCategory::Removed => '-',
            ChangeCategory::Changed => '~',
        }
    }
}

/// One difference between two recorded runs over the same synthetic input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorChange {
    pub category: ChangeCategory,
    pub description: String,
}

impl BehaviorChange {
    pub fn new(category: ChangeCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
        }
    }
}
