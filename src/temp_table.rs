//! Derived relations: temporary tables holding the result of one refinement step.
use indexmap::IndexMap;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;

use crate::dialect::{Storage, TableDdl};
use crate::error::{Result, StepwiseError};
use crate::relation::Relation;
use crate::store::Store;

lazy_static! {
    static ref NOT_NULL: Regex = Regex::new(r"(?i)\bNOT NULL\b").unwrap();
    static ref NULL_DEFAULT_NULL: Regex = Regex::new(r"(?i)\bNULL DEFAULT NULL\b").unwrap();
}

/// Index of a relation inside its [`RelationFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationId(usize);

#[derive(Debug, Clone)]
pub struct TempTable {
    name: String,
    primary_key: Vec<String>,
    field_definitions: IndexMap<String, String>,
    exists_in_db: bool,
}

impl TempTable {
    pub fn new(name: impl Into<String>, primary_key: Vec<String>, field_definitions: IndexMap<String, String>) -> Self {
        Self { name: name.into(), primary_key, field_definitions, exists_in_db: false }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn field_definitions(&self) -> &IndexMap<String, String> {
        &self.field_definitions
    }

    pub fn exists_in_db(&self) -> bool {
        self.exists_in_db
    }

    /// Adds a column, or replaces the definition of one already present.
    pub fn track_field(&mut self, field: &str, definition: &str) {
        self.field_definitions.insert(field.to_string(), definition.to_string());
    }

    /// Column definitions as created: only primary-key columns stay `NOT NULL`,
    /// every other column accepts `NULL` so left joins can leave it empty.
    pub fn column_definitions(&self) -> Vec<(String, String)> {
        self.field_definitions
            .iter()
            .map(|(field, definition)| {
                let definition = if self.primary_key.contains(field) {
                    NULL_DEFAULT_NULL.replace_all(definition, "NOT NULL").into_owned()
                } else {
                    NOT_NULL.replace_all(definition, "NULL").into_owned()
                };
                (field.clone(), definition)
            })
            .collect()
    }

    pub fn create(&mut self, store: &Store) -> Result<()> {
        let columns = self.column_definitions();
        if columns.is_empty() {
            return Err(StepwiseError::TableCreateFailed { table: self.name.clone(), reason: "no fields".into() });
        }
        let primary_key: Vec<String> = self
            .primary_key
            .iter()
            .filter(|field| self.field_definitions.contains_key(*field))
            .cloned()
            .collect();
        if primary_key.is_empty() {
            return Err(StepwiseError::TableCreateFailed {
                table: self.name.clone(),
                reason: "no primary key fields".into(),
            });
        }
        let settings = store.settings();
        let ddl = TableDdl {
            name: &self.name,
            temporary: true,
            if_not_exists: false,
            columns,
            primary_key,
            indexes: Vec::new(),
            storage: Storage::Engine(&settings.temp_table_engine),
        };
        store.execute_all(&store.dialect().create_table(&ddl))?;
        self.exists_in_db = true;
        Ok(())
    }
}

impl Relation for TempTable {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn has_field(&self, field: &str) -> bool {
        self.field_definitions.contains_key(field)
    }

    fn field_names(&self) -> Vec<String> {
        self.field_definitions.keys().cloned().collect()
    }
}

/// Hands out increasing table numbers, starting at 1.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: u64,
}

impl SequenceAllocator {
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Owns every derived relation of one engine and names them
/// `<prefix><sequence>`.
#[derive(Debug)]
pub struct RelationFactory {
    prefix: String,
    sequence: SequenceAllocator,
    tables: Vec<TempTable>,
}

impl RelationFactory {
    /// Test mode uses the fixed `temp_table_` prefix, otherwise a random one so
    /// concurrent engines on one connection do not collide.
    pub fn new(test_mode: bool) -> Self {
        let prefix = if test_mode {
            "temp_table_".to_string()
        } else {
            format!("temp_precache_lookup_{}_", rand::thread_rng().gen_range(0..1_000_000_000u32))
        };
        Self { prefix, sequence: SequenceAllocator::default(), tables: Vec::new() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn create(&mut self, primary_key: Vec<String>, field_definitions: IndexMap<String, String>) -> RelationId {
        let name = format!("{}{}", self.prefix, self.sequence.next());
        self.tables.push(TempTable::new(name, primary_key, field_definitions));
        RelationId(self.tables.len() - 1)
    }

    pub fn get(&self, id: RelationId) -> &TempTable {
        &self.tables[id.0]
    }

    pub fn get_mut(&mut self, id: RelationId) -> &mut TempTable {
        &mut self.tables[id.0]
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drops every relation created in the store, in creation order, giving
    /// the number dropped.
    pub fn drop_all(&mut self, store: &Store) -> Result<usize> {
        let mut names = Vec::new();
        for table in self.tables.iter_mut().filter(|t| t.exists_in_db) {
            names.push(table.name.clone());
            table.exists_in_db = false;
        }
        store.execute_all(&store.dialect().drop_temporary_tables(&names))?;
        Ok(names.len())
    }
}
