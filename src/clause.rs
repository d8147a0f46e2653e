//! Predicates rendered against a set of aliased tables.
//!
//! A clause names fields, not tables. At render time each field is resolved to
//! the alias that owns it (see [`Tables::pick_alias`]); a clause whose fields
//! resolve nowhere renders to `None` and is simply left out of the statement.
use rusqlite::types::Value;

use crate::error::{Result, StepwiseError};
use crate::relation::Tables;

/// Clauses joined with `AND` within one statement.
pub type ClauseSet = Vec<Clause>;

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Regular(RegularClause),
    FullText(FullTextClause),
    Like(LikeClause),
    Raw(RawClause),
    /// A predicate given as plain text.
    RawString(String),
}

impl Clause {
    /// Renders leniently: unresolvable fields give `None`.
    pub fn render(&self, tables: &Tables, values: &mut Vec<Value>) -> Option<String> {
        self.render_with(tables, values, false).ok().flatten()
    }

    /// Renders, failing with `FieldNotFound` when a referenced field has no owner.
    pub fn render_strict(&self, tables: &Tables, values: &mut Vec<Value>) -> Result<Option<String>> {
        self.render_with(tables, values, true)
    }

    fn render_with(&self, tables: &Tables, values: &mut Vec<Value>, strict: bool) -> Result<Option<String>> {
        match self {
            Clause::Regular(clause) => clause.render(tables, values, strict),
            Clause::FullText(clause) => clause.render(tables, values, strict),
            Clause::Like(clause) => clause.render(tables, values, strict),
            Clause::Raw(clause) => Ok(Some(clause.render())),
            Clause::RawString(text) if text.trim().is_empty() => Err(StepwiseError::UnknownClause(text.clone())),
            Clause::RawString(text) => Ok(Some(text.clone())),
        }
    }

    /// Whether the clause restricts rows. A regular clause without values does not.
    pub fn restricts(&self) -> bool {
        match self {
            Clause::Regular(clause) => !clause.values.is_empty(),
            _ => true,
        }
    }

    /// Shorthand for an `=` clause on one value.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Clause {
        Clause::Regular(RegularClause::equals(field, vec![value.into()]))
    }
}

impl From<RegularClause> for Clause {
    fn from(clause: RegularClause) -> Self {
        Clause::Regular(clause)
    }
}

impl From<FullTextClause> for Clause {
    fn from(clause: FullTextClause) -> Self {
        Clause::FullText(clause)
    }
}

impl From<LikeClause> for Clause {
    fn from(clause: LikeClause) -> Self {
        Clause::Like(clause)
    }
}

impl From<RawClause> for Clause {
    fn from(clause: RawClause) -> Self {
        Clause::Raw(clause)
    }
}

impl From<&str> for Clause {
    fn from(text: &str) -> Self {
        Clause::RawString(text.to_string())
    }
}

// ------------- Regular -------------

#[derive(Debug, Clone, PartialEq)]
pub struct RegularClause {
    field: String,
    operator: String,
    values: Vec<Value>,
}

impl RegularClause {
    /// Several values are only allowed with `=` (rendered as `IN`) and
    /// `BETWEEN`, which takes exactly two.
    pub fn new(field: impl Into<String>, operator: &str, values: Vec<Value>) -> Result<Self> {
        let mut operator = operator.trim().to_uppercase();
        if values.len() > 1 && operator != "=" && operator != "BETWEEN" {
            return Err(StepwiseError::InvalidOperator { operator });
        }
        if operator == "BETWEEN" && values.len() != 2 {
            return Err(StepwiseError::BetweenNeedsTwoValues { count: values.len() });
        }
        let mut unique: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        if operator == "BETWEEN" && unique.len() == 1 {
            operator = "=".to_string();
        }
        Ok(Self { field: field.into(), operator, values: unique })
    }

    /// `=` over any number of values, which cannot fail.
    pub fn equals(field: impl Into<String>, values: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self { field: field.into(), operator: "=".to_string(), values: unique }
    }

    /// `BETWEEN`, or `=` when both ends are the same value.
    pub fn between(field: impl Into<String>, low: Value, high: Value) -> Self {
        if low == high {
            return Self::equals(field, vec![low]);
        }
        Self { field: field.into(), operator: "BETWEEN".to_string(), values: vec![low, high] }
    }

    /// A single-value comparison such as `>=`.
    pub fn compare(field: impl Into<String>, operator: &str, value: Value) -> Self {
        Self { field: field.into(), operator: operator.trim().to_uppercase(), values: vec![value] }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// One single-clause set per value, so each value is inserted by its own
    /// statement.
    pub fn build_clause_sets(field: &str, values: &[Value]) -> Vec<ClauseSet> {
        values.iter().map(|value| vec![Clause::eq(field, value.clone())]).collect()
    }

    fn render(&self, tables: &Tables, out: &mut Vec<Value>, strict: bool) -> Result<Option<String>> {
        let Some(column) = tables.qualified(&self.field, strict)? else {
            return Ok(None);
        };
        let mut values: Vec<&Value> = self.values.iter().collect();
        let mut has_null = false;
        if self.operator != "BETWEEN" {
            if let Some(index) = values.iter().position(|v| matches!(v, Value::Null)) {
                values.remove(index);
                has_null = true;
            }
        }
        let mut parts = Vec::new();
        match values.len() {
            0 => {}
            1 => parts.push(format!("{column} {} ?", self.operator)),
            n if self.operator == "BETWEEN" => {
                debug_assert_eq!(n, 2);
                parts.push(format!("{column} BETWEEN ? AND ?"));
            }
            n => parts.push(format!("{column} IN ({})", vec!["?"; n].join(", "))),
        }
        out.extend(values.into_iter().cloned());
        if has_null {
            parts.push(format!("{column} {}", if self.operator == "=" { "IS NULL" } else { "IS NOT NULL" }));
        }
        if parts.is_empty() {
            return Ok(None);
        }
        let glue = if self.operator == "=" { " OR " } else { " AND " };
        Ok(Some(format!("({})", parts.join(glue))))
    }
}

// ------------- FullText -------------

#[derive(Debug, Clone, PartialEq)]
pub struct FullTextClause {
    fields: Vec<String>,
    against: String,
    boolean_mode: bool,
}

impl FullTextClause {
    pub fn new<S: Into<String>>(fields: Vec<S>, against: impl Into<String>, boolean_mode: bool) -> Self {
        Self { fields: fields.into_iter().map(Into::into).collect(), against: against.into(), boolean_mode }
    }

    fn render(&self, tables: &Tables, out: &mut Vec<Value>, strict: bool) -> Result<Option<String>> {
        let mut columns = Vec::new();
        for field in &self.fields {
            if let Some(column) = tables.qualified(field, strict)? {
                columns.push(column);
            }
        }
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(tables.dialect().full_text(&columns, &self.against, self.boolean_mode, out)))
    }
}

// ------------- Like -------------

#[derive(Debug, Clone, PartialEq)]
pub struct LikeClause {
    field: String,
    pattern: Option<String>,
}

impl LikeClause {
    pub fn new(field: impl Into<String>, pattern: Option<String>) -> Self {
        Self { field: field.into(), pattern }
    }

    /// Escapes the characters `LIKE` treats specially.
    pub fn esc(value: &str) -> String {
        value.replace('\\', "\\\\").replace('_', "\\_").replace('%', "\\%")
    }

    fn render(&self, tables: &Tables, out: &mut Vec<Value>, strict: bool) -> Result<Option<String>> {
        let Some(column) = tables.qualified(&self.field, strict)? else {
            return Ok(None);
        };
        out.push(self.pattern.clone().map_or(Value::Null, Value::Text));
        Ok(Some(tables.dialect().like(&column)))
    }
}

// ------------- Raw -------------

/// Literal SQL, `None` being the literal `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClause(pub Option<String>);

impl RawClause {
    pub fn new(raw: impl Into<String>) -> Self {
        RawClause(Some(raw.into()))
    }

    pub fn null() -> Self {
        RawClause(None)
    }

    fn render(&self) -> String {
        self.0.clone().unwrap_or_else(|| "NULL".to_string())
    }
}
