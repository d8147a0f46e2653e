//! The one place statements reach the connection.
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::settings::Settings;
use crate::tracker::QueryTracker;
use crate::value::Row;

/// Statement execution for the engine and the lookup synchronisation.
///
/// Every statement goes through here so it can be traced, and so that with
/// `run_queries` switched off nothing reaches the connection.
#[derive(Clone)]
pub struct Store<'db> {
    connection: &'db Connection,
    settings: Settings,
    tracker: Option<QueryTracker>,
}

impl<'db> Store<'db> {
    pub fn new(connection: &'db Connection) -> Store<'db> {
        Self::with_settings(connection, Settings::default())
    }

    pub fn with_settings(connection: &'db Connection, settings: Settings) -> Store<'db> {
        Store { connection, settings, tracker: None }
    }

    pub fn with_tracker(mut self, tracker: QueryTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn set_tracker(&mut self, tracker: Option<QueryTracker>) {
        self.tracker = tracker;
    }

    pub fn set_run_queries(&mut self, run_queries: bool) {
        self.settings.run_queries = run_queries;
    }

    pub fn connection(&self) -> &'db Connection {
        self.connection
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dialect(&self) -> Dialect {
        self.settings.dialect
    }

    pub fn tracker(&self) -> Option<&QueryTracker> {
        self.tracker.as_ref()
    }

    pub fn runs_queries(&self) -> bool {
        self.settings.run_queries
    }

    fn track(&self, sql: &str, values: &[Value], executed: bool) {
        debug!(executed, values = values.len(), sql, "statement");
        if let Some(tracker) = &self.tracker {
            tracker.track(sql, values, executed);
        }
    }

    /// Runs a statement that returns no rows, giving the number of rows changed.
    /// Failed statements are traced too, as not executed.
    pub fn execute(&self, sql: &str, values: &[Value]) -> Result<usize> {
        if !self.settings.run_queries {
            self.track(sql, values, false);
            return Ok(0);
        }
        let result = self.connection.execute(sql, params_from_iter(values.iter()));
        self.track(sql, values, result.is_ok());
        Ok(result?)
    }

    pub fn execute_all(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.execute(sql, &[])?;
        }
        Ok(())
    }

    /// Runs a select, each row keyed by column name.
    pub fn select(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>> {
        if !self.settings.run_queries {
            self.track(sql, values, false);
            return Ok(Vec::new());
        }
        let result = self.fetch(sql, values);
        self.track(sql, values, result.is_ok());
        result
    }

    fn fetch(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>> {
        let mut statement = self.connection.prepare(sql)?;
        let columns: Vec<String> = statement.column_names().into_iter().map(String::from).collect();
        let mut result = statement.query(params_from_iter(values.iter()))?;
        let mut rows = Vec::new();
        while let Some(result_row) = result.next()? {
            let mut row = Row::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                row.insert(column.clone(), result_row.get::<_, Value>(index)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
