//! Named filter operations and the arguments they are called with.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rusqlite::types::Value;
use serde::Serialize;

use crate::clause::Clause;
use crate::error::Result;
use crate::input::Input;
use crate::step::StepContext;
use crate::value::json_to_value;

/// Name of the operation run when no other alters the result.
pub const FALLBACK_FILTER: &str = "fallbackFilter";
/// Tag every search plans, holding all operations.
pub const ALL_TAG: &str = "all";
/// Alias standing for every registered operation in a tag list.
pub const ALL_FILTERS_ALIAS: &str = "allFilters";
/// Suffix marking a step that may only add fields.
pub const UPDATE_ONLY_SUFFIX: &str = "/update-only";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A single input value, `null` when absent.
    Value,
    /// A list of input values, empty when absent.
    List,
    /// The resolved table name of a lookup, always present.
    Lookup,
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn value(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ParamKind::Value }
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ParamKind::List }
    }

    /// Bound to the lookup registered under `name`.
    pub fn lookup(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ParamKind::Lookup }
    }
}

/// What a derived field is filled from.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A field of the source or reference relation.
    Field(String),
    /// A clause rendered as a select expression, e.g. a relevance score.
    Clause(Clause),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }
}

impl From<Clause> for Expr {
    fn from(clause: Clause) -> Self {
        Expr::Clause(clause)
    }
}

/// Fields an operation can fill: field name to its expression. `None`
/// declares the field without being able to provide it.
pub type TrackFields = IndexMap<String, Option<Expr>>;

/// Join pairs: field of the source relation to field of the reference table.
pub type Links = IndexMap<String, String>;

/// `Links` joining on identically named fields.
pub fn links<S: AsRef<str>>(fields: &[S]) -> Links {
    fields.iter().map(|f| (f.as_ref().to_string(), f.as_ref().to_string())).collect()
}

/// What an operation reports when asked whether it would run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    pub alters: bool,
    pub tracks: TrackFields,
    pub links: Links,
}

impl ActionReport {
    /// Fields the operation can actually fill.
    pub fn trackable(&self) -> impl Iterator<Item = &String> {
        self.tracks.iter().filter(|(_, expr)| expr.is_some()).map(|(field, _)| field)
    }
}

/// Arguments an operation is invoked with.
#[derive(Debug, Clone)]
pub struct FilterArgs {
    values: IndexMap<String, serde_json::Value>,
    /// When false the operation may add fields but must not remove rows.
    pub allow_alter: bool,
    /// When true the operation only reports, see [`ActionReport`].
    pub action_check: bool,
}

impl FilterArgs {
    /// Builds arguments from input. With `allow_alter` off every value and
    /// list parameter is passed empty.
    pub fn build(
        params: &[Param],
        input: &Input,
        lookup_tables: &IndexMap<String, String>,
        allow_alter: bool,
        action_check: bool,
    ) -> Self {
        let values = params
            .iter()
            .map(|param| {
                let value = match param.kind {
                    ParamKind::Value if allow_alter => input.get(&param.name).cloned().unwrap_or_default(),
                    ParamKind::Value => serde_json::Value::Null,
                    ParamKind::List if allow_alter => match input.get(&param.name) {
                        Some(serde_json::Value::Array(items)) => serde_json::Value::Array(items.clone()),
                        Some(serde_json::Value::Null) | None => serde_json::Value::Array(Vec::new()),
                        Some(other) => serde_json::Value::Array(vec![other.clone()]),
                    },
                    ParamKind::List => serde_json::Value::Array(Vec::new()),
                    ParamKind::Lookup => lookup_tables
                        .get(&param.name)
                        .map_or(serde_json::Value::Null, |table| serde_json::Value::String(table.clone())),
                };
                (param.name.clone(), value)
            })
            .collect();
        Self { values, allow_alter, action_check }
    }

    pub fn raw(&self, name: &str) -> &serde_json::Value {
        self.values.get(name).unwrap_or(&serde_json::Value::Null)
    }

    /// A single value, `None` for null or absent.
    pub fn value(&self, name: &str) -> Option<Value> {
        match self.raw(name) {
            serde_json::Value::Null => None,
            other => Some(json_to_value(other)),
        }
    }

    pub fn list(&self, name: &str) -> Vec<Value> {
        match self.raw(name) {
            serde_json::Value::Array(items) => items.iter().map(json_to_value).collect(),
            serde_json::Value::Null => Vec::new(),
            other => vec![json_to_value(other)],
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.raw(name).as_str()
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        let raw = self.raw(name);
        raw.as_i64().or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        let raw = self.raw(name);
        raw.as_f64().or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
    }

    /// Truthiness: non-empty strings and lists, non-zero numbers, `true`.
    pub fn flag(&self, name: &str) -> bool {
        match self.raw(name) {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            serde_json::Value::String(s) => !s.is_empty() && s != "0",
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
        }
    }
}

pub type FilterFn = dyn Fn(&mut StepContext<'_, '_>, &FilterArgs) -> Result<Option<ActionReport>> + Send + Sync;

/// A registered operation. `None` from `run` means the operation does not
/// apply to the current input.
#[derive(Clone)]
pub struct FilterOperation {
    name: String,
    params: Vec<Param>,
    run: Arc<FilterFn>,
}

impl FilterOperation {
    pub fn new<F>(name: impl Into<String>, params: Vec<Param>, run: F) -> Self
    where
        F: Fn(&mut StepContext<'_, '_>, &FilterArgs) -> Result<Option<ActionReport>> + Send + Sync + 'static,
    {
        Self { name: name.into(), params, run: Arc::new(run) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_fallback(&self) -> bool {
        self.name == FALLBACK_FILTER
    }

    pub fn call(&self, ctx: &mut StepContext<'_, '_>, args: &FilterArgs) -> Result<Option<ActionReport>> {
        (self.run)(ctx, args)
    }
}

impl fmt::Debug for FilterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterOperation").field("name", &self.name).field("params", &self.params).finish()
    }
}
