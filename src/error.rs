use thiserror::Error;

/// Coarse grouping of failures, matching when they can happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad declarations, raised while building definitions.
    Configuration,
    /// Raised by `search()` before any statement is issued.
    Planning,
    /// Raised while statements are generated or executed.
    Execution,
    /// Calling a method in the wrong engine state.
    Lifecycle,
    /// The underlying store rejected a statement.
    Persistence,
}

#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Conflicting definitions for field `{field}`: `{first}` vs `{second}`")]
    ConflictingFieldDefinition { field: String, first: String, second: String },
    #[error("Lookup `{lookup}` has no primary key")]
    NoPrimaryKey { lookup: String },
    #[error("{index_type} index field `{field}` not found in lookup `{lookup}`")]
    IndexFieldNotFound { index_type: String, field: String, lookup: String },
    #[error("Field `{field}` has no definition in `{lookup}`")]
    FieldNotDefined { field: String, lookup: String },
    #[error("Lookup `{name}` is not registered")]
    LookupNotFound { name: String },
    #[error("Unresolved stubs in table name `{table}`")]
    UnresolvedStubs { table: String },
    #[error("Cannot create table `{table}`: {reason}")]
    TableCreateFailed { table: String, reason: String },

    #[error("Invalid operator `{operator}` for a list of values")]
    InvalidOperator { operator: String },
    #[error("BETWEEN needs exactly two values, got {count}")]
    BetweenNeedsTwoValues { count: usize },
    #[error("Invalid filter alias `{alias}`, must start with + or -")]
    InvalidFilterAlias { alias: String },
    #[error("Filter `{name}` not found")]
    FilterNotFound { name: String },
    #[error("Tag `{tag}` has no filters left after planning")]
    EmptyTagAfterPlanning { tag: String },
    #[error("Invalid order by `{name}`")]
    InvalidOrderBy { name: String },
    #[error("Filter tag `{tag}` not found")]
    FilterTagNotFound { tag: String },

    #[error("Field `{field}` not found in tables [{}]", aliases.join(", "))]
    FieldNotFound { field: String, aliases: Vec<String> },
    #[error("Unknown clause: {0}")]
    UnknownClause(String),
    #[error("Field `{field}` cannot be tracked, it has no definition")]
    UntrackableField { field: String },
    #[error("No filter reference available for `{operation}`")]
    NoFilterReference { operation: String },
    #[error("Statement parameters do not match in lookup `{lookup}`: {detail}")]
    StatementParameterMismatch { lookup: String, detail: String },
    #[error("Row for `{lookup}` is missing fields [{}], expected [{}]", missing.join(", "), expected.join(", "))]
    MissingFields { lookup: String, missing: Vec<String>, expected: Vec<String> },
    #[error("Row for `{lookup}` has unexpected fields [{}], expected [{}]", unexpected.join(", "), expected.join(", "))]
    UnexpectedFields { lookup: String, unexpected: Vec<String>, expected: Vec<String> },
    #[error("Field `{field}` is not part of the primary key of `{lookup}`")]
    FieldNotPrimary { field: String, lookup: String },
    #[error("Row in `{lookup}` changed: existing {existing}, proposed {proposed}")]
    UnexpectedChange { lookup: String, existing: String, proposed: String },

    #[error("`{method}` cannot be called after the search has run")]
    SearchAlreadyRun { method: String },
    #[error("`{method}` cannot be called before the search has run")]
    SearchPending { method: String },
    #[error("`{method}` is only available in test mode")]
    NotInTestMode { method: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StepwiseError {
    pub fn category(&self) -> ErrorCategory {
        use StepwiseError::*;
        match self {
            Config(_)
            | ConflictingFieldDefinition { .. }
            | NoPrimaryKey { .. }
            | IndexFieldNotFound { .. }
            | FieldNotDefined { .. }
            | LookupNotFound { .. }
            | UnresolvedStubs { .. }
            | TableCreateFailed { .. } => ErrorCategory::Configuration,
            InvalidOperator { .. }
            | BetweenNeedsTwoValues { .. }
            | InvalidFilterAlias { .. }
            | FilterNotFound { .. }
            | EmptyTagAfterPlanning { .. }
            | InvalidOrderBy { .. }
            | FilterTagNotFound { .. } => ErrorCategory::Planning,
            FieldNotFound { .. }
            | UnknownClause(_)
            | UntrackableField { .. }
            | NoFilterReference { .. }
            | StatementParameterMismatch { .. }
            | MissingFields { .. }
            | UnexpectedFields { .. }
            | FieldNotPrimary { .. }
            | UnexpectedChange { .. } => ErrorCategory::Execution,
            SearchAlreadyRun { .. } | SearchPending { .. } | NotInTestMode { .. } => {
                ErrorCategory::Lifecycle
            }
            Persistence(_) => ErrorCategory::Persistence,
        }
    }
}

pub type Result<T> = std::result::Result<T, StepwiseError>;

// Helper conversions
impl From<rusqlite::Error> for StepwiseError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

impl From<config::ConfigError> for StepwiseError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
