//! Runtime settings, read with the `config` crate.
//!
//! Sources are layered: built-in defaults, then an optional settings file
//! (format picked from its extension), then `STEPWISE_*` environment variables.
//! ```
//! let settings = stepwise::Settings::default();
//! assert_eq!(settings.batch_size, 25);
//! ```
use std::path::Path;

use config::{Config, Environment, File};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::dialect::Dialect;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dialect: Dialect,
    /// Proposed lookup rows held in memory before a diff is flushed.
    pub batch_size: usize,
    /// When false every statement is only recorded, never executed.
    pub run_queries: bool,
    pub primary_table_engine: String,
    pub comparison_table_engine: String,
    pub temp_table_engine: String,
    pub charset: String,
    pub collation: String,
    /// Replacements for `%name%` placeholders in lookup table names.
    pub stubs: IndexMap<String, String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            batch_size: 25,
            run_queries: true,
            primary_table_engine: "InnoDB".into(),
            comparison_table_engine: "MEMORY".into(),
            temp_table_engine: "MEMORY".into(),
            charset: "utf8mb4".into(),
            collation: "utf8mb4_unicode_ci".into(),
            stubs: IndexMap::new(),
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    /// Loads settings, reading `path` when it is given and exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(Environment::with_prefix("STEPWISE").try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Settings for statement tracing against MySQL text, nothing is executed.
    pub fn mysql_trace() -> Self {
        Self { dialect: Dialect::MySql, run_queries: false, ..Self::default() }
    }
}

/// Installs a `tracing` subscriber filtered by `settings.log_filter`.
/// An already installed subscriber is left in place.
pub fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
