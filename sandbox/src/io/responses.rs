//! Synthetic response overrides read from a JSON file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use crate::synthetic::SyntheticTable;

/// Read a `{primitive: response}` object.
pub fn load_overrides(path: &Path) -> Result<Map<String, Value>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read responses {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse responses {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!(
            "responses {} must be a JSON object, found {}",
            path.display(),
            kind_name(&other)
        ),
    }
}

/// Apply overrides from `path`, if given.
pub fn apply_file(table: &mut SyntheticTable, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        table.apply_overrides(load_overrides(path)?);
    }
    Ok(())
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
