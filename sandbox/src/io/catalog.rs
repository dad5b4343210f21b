//! Loading primitive signature catalogs from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::signature::SignatureTable;

const CATALOG_SCHEMA: &str = include_str!("../../schemas/primitives.schema.json");

/// The catalog at `path`, or the built-in ledger catalog when `None`.
pub fn load_signatures(path: Option<&Path>) -> Result<SignatureTable> {
    let Some(path) = path else {
        return Ok(SignatureTable::ledger_default());
    };
    let contents =
        fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
    let table = parse_catalog(&contents).with_context(|| format!("load catalog {}", path.display()))?;
    debug!(path = %path.display(), primitives = table.len(), "loaded signature catalog");
    Ok(table)
}

/// Parse and schema-check a catalog document.
pub fn parse_catalog(contents: &str) -> Result<SignatureTable> {
    let value: Value = serde_json::from_str(contents).context("parse catalog json")?;
    validate_schema(&value)?;
    SignatureTable::from_json(value).context("deserialize catalog")
}

fn validate_schema(catalog: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(CATALOG_SCHEMA).context("parse embedded catalog schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(catalog) {
        let messages = compiled
            .iter_errors(catalog)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "catalog schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_catalog_passes_its_schema() {
        let table = parse_catalog(include_str!("../../schemas/primitives.json")).expect("parse");
        assert_eq!(table, SignatureTable::ledger_default());
    }

    #[test]
    fn missing_path_means_builtin_catalog() {
        assert_eq!(load_signatures(None).expect("load").len(), 26);
    }

    #[test]
    fn custom_catalog_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("primitives.json");
        fs::write(
            &path,
            r#"{"primitives": [{"name": "notify", "params": [{"name": "text", "kind": "str"}]}]}"#,
        )
        .expect("write");
        let table = load_signatures(Some(&path)).expect("load");
        assert_eq!(table.names(), vec!["notify"]);
    }

    #[test]
    fn schema_violations_are_reported() {
        let err = parse_catalog(r#"{"primitives": [{"name": "x", "params": [{"name": "a", "kind": "decimal"}]}]}"#)
            .expect_err("bad kind");
        assert!(err.to_string().contains("catalog schema validation failed"), "{err:#}");
    }
}
