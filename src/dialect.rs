//! Statement text that differs between the supported SQL dialects.
//!
//! `MySql` produces the canonical text (temporary MEMORY tables, `INSERT IGNORE`,
//! `MATCH ... AGAINST`). `Sqlite` produces statements that run on the bundled
//! SQLite used for execution and tests.
use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::Value;
use serde::Deserialize;

lazy_static! {
    static ref UNSIGNED: Regex = Regex::new(r"(?i)\s+UNSIGNED\b").unwrap();
}

/// Wraps an identifier in backticks.
pub fn quote(identifier: &str) -> String {
    format!("`{identifier}`")
}

/// `` `a`, `b`, `c` ``
pub fn quote_list<S: AsRef<str>>(identifiers: &[S]) -> String {
    identifiers.iter().map(|i| quote(i.as_ref())).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Unique,
    Plain,
    FullText,
}

#[derive(Debug, Clone)]
pub struct IndexDdl {
    pub kind: IndexKind,
    pub name: String,
    pub fields: Vec<String>,
}

/// Storage clause appended to a `CREATE TABLE`.
#[derive(Debug, Clone, Copy)]
pub enum Storage<'a> {
    /// `ENGINE = <engine>`, used for derived relations.
    Engine(&'a str),
    /// `ENGINE=<engine> DEFAULT CHARSET=<charset> COLLATE=<collation>`
    Table { engine: &'a str, charset: &'a str, collation: &'a str },
}

#[derive(Debug, Clone)]
pub struct TableDdl<'a> {
    pub name: &'a str,
    pub temporary: bool,
    pub if_not_exists: bool,
    /// `(field, column definition)` pairs in column order.
    pub columns: Vec<(String, String)>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDdl>,
    pub storage: Storage<'a>,
}

impl Dialect {
    pub fn insert_ignore(&self) -> &'static str {
        match self {
            Dialect::MySql => "INSERT IGNORE",
            Dialect::Sqlite => "INSERT OR IGNORE",
        }
    }

    /// Column definitions are written in MySQL terms, SQLite drops what it cannot parse.
    pub fn column_definition<'d>(&self, definition: &'d str) -> Cow<'d, str> {
        match self {
            Dialect::MySql => Cow::Borrowed(definition),
            Dialect::Sqlite => UNSIGNED.replace_all(definition, ""),
        }
    }

    /// Builds the statements creating a table, secondary indexes included.
    pub fn create_table(&self, ddl: &TableDdl) -> Vec<String> {
        let mut parts: Vec<String> = ddl
            .columns
            .iter()
            .map(|(field, definition)| format!("{} {}", quote(field), self.column_definition(definition)))
            .collect();
        let head = match (self, ddl.temporary) {
            (Dialect::MySql, true) => "CREATE TEMPORARY TABLE",
            (Dialect::Sqlite, true) => "CREATE TEMP TABLE",
            (_, false) => "CREATE TABLE",
        };
        let exists = if ddl.if_not_exists { "IF NOT EXISTS " } else { "" };
        match self {
            Dialect::MySql => {
                parts.push(format!("PRIMARY KEY `primary` ({})", quote_list(&ddl.primary_key)));
                for index in &ddl.indexes {
                    let kind = match index.kind {
                        IndexKind::Unique => "UNIQUE KEY",
                        IndexKind::Plain => "KEY",
                        IndexKind::FullText => "FULLTEXT KEY",
                    };
                    parts.push(format!("{kind} {} ({})", quote(&index.name), quote_list(&index.fields)));
                }
                let storage = match ddl.storage {
                    Storage::Engine(engine) => format!("ENGINE = {engine}"),
                    Storage::Table { engine, charset, collation } => {
                        format!("ENGINE={engine} DEFAULT CHARSET={charset} COLLATE={collation}")
                    }
                };
                vec![format!(
                    "{head} {exists}{} (\n{}\n) {storage}",
                    quote(ddl.name),
                    parts.join(",\n")
                )]
            }
            Dialect::Sqlite => {
                parts.push(format!("PRIMARY KEY ({})", quote_list(&ddl.primary_key)));
                let mut statements = vec![format!(
                    "{head} {exists}{} (\n{}\n)",
                    quote(ddl.name),
                    parts.join(",\n")
                )];
                for index in &ddl.indexes {
                    let unique = match index.kind {
                        IndexKind::Unique => "UNIQUE ",
                        IndexKind::Plain => "",
                        IndexKind::FullText => continue,
                    };
                    statements.push(format!(
                        "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
                        quote(&format!("{}_{}", ddl.name, index.name)),
                        quote(ddl.name),
                        quote_list(&index.fields)
                    ));
                }
                statements
            }
        }
    }

    pub fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(name))
    }

    /// MySQL drops every table in one statement.
    pub fn drop_temporary_tables<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        if names.is_empty() {
            return Vec::new();
        }
        match self {
            Dialect::MySql => vec![format!("DROP TEMPORARY TABLE IF EXISTS {}", quote_list(names))],
            Dialect::Sqlite => names.iter().map(|n| self.drop_table(n.as_ref())).collect(),
        }
    }

    /// Deletes every row of `table` whose key is present in `other`.
    pub fn delete_matching(&self, table: &str, other: &str, primary_key: &[String]) -> String {
        match self {
            Dialect::MySql => {
                let on: Vec<String> = primary_key.iter().map(|f| format!("`a`.`{f}` = `b`.`{f}`")).collect();
                format!(
                    "DELETE `a` FROM {} AS `a`\nJOIN {} AS `b`\nON {}",
                    quote(table),
                    quote(other),
                    on.join(" AND ")
                )
            }
            Dialect::Sqlite => {
                let on: Vec<String> = primary_key
                    .iter()
                    .map(|f| format!("{}.`{f}` = `b`.`{f}`", quote(table)))
                    .collect();
                format!(
                    "DELETE FROM {}\nWHERE EXISTS (SELECT 1 FROM {} AS `b` WHERE {})",
                    quote(table),
                    quote(other),
                    on.join(" AND ")
                )
            }
        }
    }

    /// `expr LIKE ?`, with an explicit escape character where the default has none.
    pub fn like(&self, expression: &str) -> String {
        match self {
            Dialect::MySql => format!("{expression} LIKE ?"),
            Dialect::Sqlite => format!("{expression} LIKE ? ESCAPE '\\'"),
        }
    }

    /// Full-text predicate over already resolved column expressions.
    /// SQLite has no MATCH over plain tables so a substring search stands in.
    pub fn full_text(&self, columns: &[String], term: &str, boolean_mode: bool, values: &mut Vec<Value>) -> String {
        match self {
            Dialect::MySql => {
                values.push(Value::Text(term.to_string()));
                format!(
                    "MATCH({}) AGAINST(?{})",
                    columns.join(", "),
                    if boolean_mode { " IN BOOLEAN MODE" } else { "" }
                )
            }
            Dialect::Sqlite => {
                let pattern = format!("%{}%", crate::clause::LikeClause::esc(term));
                let parts: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        values.push(Value::Text(pattern.clone()));
                        self.like(c)
                    })
                    .collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }
}
