//! Primitive signature table shared by type checking and execution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::script::{CallSite, ValueKind};

const LEDGER_PRIMITIVES: &str = include_str!("../../schemas/primitives.json");

static LEDGER_TABLE: LazyLock<SignatureTable> = LazyLock::new(|| {
    SignatureTable::from_json_str(LEDGER_PRIMITIVES).expect("embedded primitives.json is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    None,
    Any,
}

impl ParamKind {
    /// Whether a value of `kind` may be passed where `self` is expected.
    pub fn accepts(self, kind: ValueKind) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::Float => matches!(kind, ValueKind::Float | ValueKind::Int | ValueKind::Bool),
            ParamKind::Int => matches!(kind, ValueKind::Int | ValueKind::Bool),
            ParamKind::Str => kind == ValueKind::Str,
            ParamKind::Bool => kind == ValueKind::Bool,
            ParamKind::List => kind == ValueKind::List,
            ParamKind::Dict => kind == ValueKind::Dict,
            ParamKind::None => kind == ValueKind::None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Str => "str",
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::List => "list",
            ParamKind::Dict => "dict",
            ParamKind::None => "none",
            ParamKind::Any => "any",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Value bound when an optional parameter is omitted.
    #[serde(default)]
    pub default: Json,
    #[serde(default)]
    pub keyword_only: bool,
}

impl Param {
    fn accepts(&self, kind: ValueKind) -> bool {
        self.kind.accepts(kind) || (kind == ValueKind::None && !self.required && self.default.is_null())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    #[serde(default = "default_returns")]
    pub returns: ParamKind,
    /// Accepts keywords beyond the declared params.
    #[serde(default)]
    pub extra_keywords: bool,
}

fn default_returns() -> ParamKind {
    ParamKind::Any
}

impl Signature {
    fn positional(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|param| !param.keyword_only)
    }

    fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|param| param.name == name)
    }

    /// Mismatches between a call site and this signature, one message each.
    ///
    /// Arguments whose kind is unknown are never reported as wrong kinds.
    pub fn check(&self, site: &CallSite) -> Vec<String> {
        let mut errors = Vec::new();
        let name = &self.name;
        let positional: Vec<&Param> = self.positional().collect();
        let mut bound: Vec<&str> = Vec::new();

        if site.positional.len() > positional.len() {
            errors.push(format!(
                "{name}() takes {} positional argument(s) but {} were given",
                positional.len(),
                site.positional.len()
            ));
        }
        for (param, kind) in positional.iter().zip(&site.positional) {
            bound.push(&param.name);
            match kind {
                Some(kind) if !param.accepts(*kind) => errors.push(format!(
                    "{name}() argument '{}' expects {}, got {kind}",
                    param.name, param.kind
                )),
                _ => {}
            }
        }

        for (keyword, kind) in &site.keywords {
            let Some(param) = self.param(keyword) else {
                if !self.extra_keywords {
                    errors.push(format!(
                        "{name}() got an unexpected keyword argument '{keyword}'"
                    ));
                }
                continue;
            };
            if bound.contains(&param.name.as_str()) {
                errors.push(format!(
                    "{name}() got multiple values for argument '{keyword}'"
                ));
                continue;
            }
            bound.push(&param.name);
            match kind {
                Some(kind) if !param.accepts(*kind) => errors.push(format!(
                    "{name}() argument '{keyword}' expects {}, got {kind}",
                    param.kind
                )),
                _ => {}
            }
        }

        for param in &self.params {
            if param.required && !bound.contains(&param.name.as_str()) {
                errors.push(format!(
                    "{name}() missing required argument '{}'",
                    param.name
                ));
            }
        }
        errors
    }

    /// Name-to-value view of a call, with defaults filled in.
    ///
    /// Extra positional arguments are dropped; unknown keywords are kept.
    pub fn bind(&self, args: &[Json], kwargs: &Map<String, Json>) -> Map<String, Json> {
        let mut bound = Map::new();
        for (param, value) in self.positional().zip(args) {
            bound.insert(param.name.clone(), value.clone());
        }
        for (key, value) in kwargs {
            bound
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for param in &self.params {
            if !param.required && !bound.contains_key(&param.name) {
                bound.insert(param.name.clone(), param.default.clone());
            }
        }
        bound
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Catalog {
    primitives: Vec<Signature>,
}

/// Primitive name to signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureTable {
    signatures: BTreeMap<String, Signature>,
}

impl SignatureTable {
    pub fn from_signatures(signatures: impl IntoIterator<Item = Signature>) -> Self {
        Self {
            signatures: signatures
                .into_iter()
                .map(|signature| (signature.name.clone(), signature))
                .collect(),
        }
    }

    /// Parse the `{"primitives": [...]}` catalog format.
    pub fn from_json_str(contents: &str) -> serde_json::Result<Self> {
        let catalog: Catalog = serde_json::from_str(contents)?;
        Ok(Self::from_signatures(catalog.primitives))
    }

    pub fn from_json(value: Json) -> serde_json::Result<Self> {
        let catalog: Catalog = serde_json::from_value(value)?;
        Ok(Self::from_signatures(catalog.primitives))
    }

    /// The bookkeeping primitive set shipped with the crate.
    pub fn ledger_default() -> Self {
        LEDGER_TABLE.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signatures.contains_key(name)
    }

    /// Sorted primitive names.
    pub fn names(&self) -> Vec<String> {
        self.signatures.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Bind a call through its signature; unknown primitives bind keywords only.
    pub fn bind(&self, primitive: &str, args: &[Json], kwargs: &Map<String, Json>) -> Map<String, Json> {
        match self.get(primitive) {
            Some(signature) => signature.bind(args, kwargs),
            None => kwargs.clone(),
        }
    }

    pub fn to_json(&self) -> Json {
        let catalog = Catalog {
            primitives: self.signatures.values().cloned().collect(),
        };
        serde_json::to_value(catalog).unwrap_or(Json::Null)
    }
}
