//! Synchronising a lookup table against proposed rows.
//!
//! A session starts by creating a comparison table holding only primary-key
//! columns. `will_update` copies into it the keys of cached rows the caller is
//! about to re-propose. Proposed rows are then diffed batch by batch against
//! the cache: new rows are inserted, changed rows updated, and every key that
//! was accounted for is removed from the comparison table. Whatever keys are
//! left when the session finishes belong to rows nobody proposed again, and
//! those rows are deleted from the cache.
use std::time::Instant;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::Value;
use tracing::info;

use crate::dialect::{Storage, TableDdl, quote, quote_list};
use crate::error::{Result, StepwiseError};
use crate::fingerprint::SeaMap;
use crate::lookup::LookupTable;
use crate::relation::Relation;
use crate::store::Store;
use crate::value::{ProposedRow, Row, RowValue, value_key, values_match};

lazy_static! {
    static ref NAMED_PARAM: Regex = Regex::new(r":([A-Za-z0-9_]+)").unwrap();
}

/// Row counts of one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Cached rows deleted because nobody proposed them again. Always 0 when
    /// statements are only traced.
    pub deleted_candidates: usize,
}

type KeyRow = IndexMap<String, Value>;

pub struct PopulateSession<'s, 'l, 'db> {
    table: &'s LookupTable<'l>,
    store: Store<'db>,
    comparison: String,
    batch_size: usize,
    pending: Vec<ProposedRow>,
    summary: SyncSummary,
    started: Instant,
}

impl<'s, 'l, 'db> PopulateSession<'s, 'l, 'db> {
    pub(crate) fn start(table: &'s LookupTable<'l>, store: Store<'db>) -> Result<Self> {
        let comparison = if table.is_test_mode() {
            "_lookup_comparison_1".to_string()
        } else {
            format!("_lookup_comparison_{:032x}", rand::random::<u128>())
        };
        let batch_size = table.lookup().batch_size().unwrap_or(store.settings().batch_size).max(1);
        let session = Self {
            table,
            store,
            comparison,
            batch_size,
            pending: Vec::new(),
            summary: SyncSummary::default(),
            started: Instant::now(),
        };
        session.create_comparison_table()?;
        Ok(session)
    }

    pub fn comparison_table(&self) -> &str {
        &self.comparison
    }

    fn name(&self) -> String {
        self.table.lookup().name().to_string()
    }

    fn create_comparison_table(&self) -> Result<()> {
        let primary_key = self.table.primary_key();
        let settings = self.store.settings();
        let key_fields = self.table.fields().iter().filter(|f| primary_key.contains(*f));
        let ddl = TableDdl {
            name: &self.comparison,
            temporary: true,
            if_not_exists: true,
            columns: self.table.columns(key_fields)?,
            primary_key: primary_key.to_vec(),
            indexes: Vec::new(),
            storage: Storage::Table {
                engine: &settings.comparison_table_engine,
                charset: &settings.charset,
                collation: &settings.collation,
            },
        };
        self.store.execute_all(&self.store.dialect().create_table(&ddl))
    }

    /// Marks every cached row as expected to be proposed again.
    pub fn will_update_everything(&mut self) -> Result<()> {
        self.will_update(Vec::<(String, Vec<Value>)>::new())
    }

    /// Marks the cached rows matching `selector` (field to accepted values,
    /// fields AND-combined) as expected to be proposed again. A field with
    /// no accepted values matches nothing.
    pub fn will_update<I, K, V>(&mut self, selector: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = Value>,
    {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for (field, accepted) in selector {
            let accepted: Vec<Value> = accepted.into_iter().collect();
            let field = quote(field.as_ref());
            match accepted.len() {
                0 => return Ok(()),
                1 => clauses.push(format!("{field} = ?")),
                n => clauses.push(format!("{field} IN ({})", vec!["?"; n].join(", "))),
            }
            values.extend(accepted);
        }
        let key = quote_list(self.table.primary_key());
        let mut sql = format!(
            "{} INTO {} ({key})\nSELECT {key}\nFROM {}\n",
            self.store.dialect().insert_ignore(),
            quote(&self.comparison),
            quote(self.table.table_name()),
        );
        if !clauses.is_empty() {
            sql.push_str(&format!("WHERE {}", clauses.join("\nAND ")));
        }
        self.store.execute(sql.trim_end(), &values)?;
        Ok(())
    }

    pub fn add_row(&mut self, row: ProposedRow) -> Result<()> {
        self.add_rows([row])
    }

    /// Queues rows, diffing a batch whenever enough have built up. Every row
    /// must carry exactly the lookup's fields.
    pub fn add_rows(&mut self, rows: impl IntoIterator<Item = ProposedRow>) -> Result<()> {
        let expected = self.table.fields();
        for row in rows {
            let missing: Vec<String> = expected.iter().filter(|f| !row.contains_key(*f)).cloned().collect();
            if !missing.is_empty() {
                return Err(StepwiseError::MissingFields { lookup: self.name(), missing, expected: expected.to_vec() });
            }
            let unexpected: Vec<String> = row.keys().filter(|f| !expected.contains(*f)).cloned().collect();
            if !unexpected.is_empty() {
                return Err(StepwiseError::UnexpectedFields {
                    lookup: self.name(),
                    unexpected,
                    expected: expected.to_vec(),
                });
            }
            self.pending.push(row);
        }
        self.process_pending(false)
    }

    /// Treats the rows with these key values as accounted for, so they are
    /// kept as they are.
    pub fn ignore_rows<I, K>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let keys: KeyRow = keys.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if keys.is_empty() {
            return Err(StepwiseError::NoPrimaryKey { lookup: self.name() });
        }
        if let Some(field) = keys.keys().find(|f| !self.table.primary_key().contains(*f)) {
            return Err(StepwiseError::FieldNotPrimary { field: field.clone(), lookup: self.name() });
        }
        let fields: Vec<String> = keys.keys().cloned().collect();
        let (parts, values) = build_query_parts(&fields, &[keys]);
        let sql = format!("DELETE FROM {} \nWHERE {parts}", quote(&self.comparison));
        self.store.execute(&sql, &values)?;
        Ok(())
    }

    /// Flushes the remaining rows, deletes the cached rows nobody proposed
    /// and drops the comparison table.
    pub fn finish(mut self) -> Result<SyncSummary> {
        self.process_pending(true)?;
        let dialect = self.store.dialect();
        let delete = dialect.delete_matching(self.table.table_name(), &self.comparison, self.table.primary_key());
        self.summary.deleted_candidates = self.store.execute(&delete, &[])?;
        self.store.execute_all(&dialect.drop_temporary_tables(&[&self.comparison]))?;
        info!(
            lookup = self.table.lookup().name(),
            table = self.table.table_name(),
            ms = self.started.elapsed().as_millis() as u64,
            added = self.summary.added,
            updated = self.summary.updated,
            unchanged = self.summary.unchanged,
            deleted = self.summary.deleted_candidates,
            "lookup populated"
        );
        Ok(self.summary)
    }

    fn process_pending(&mut self, finish: bool) -> Result<()> {
        while (finish && !self.pending.is_empty()) || self.pending.len() >= self.batch_size {
            let take = self.batch_size.min(self.pending.len());
            let batch: Vec<ProposedRow> = self.pending.drain(..take).collect();
            self.process_batch(batch)?;
        }
        Ok(())
    }

    fn key_row(&self, row: &ProposedRow) -> Result<KeyRow> {
        self.table
            .primary_key()
            .iter()
            .map(|field| match row.get(field) {
                Some(RowValue::Value(value)) => Ok((field.clone(), value.clone())),
                _ => Err(StepwiseError::StatementParameterMismatch {
                    lookup: self.name(),
                    detail: format!("primary-key field `{field}` must hold a plain value"),
                }),
            })
            .collect()
    }

    fn process_batch(&mut self, batch: Vec<ProposedRow>) -> Result<()> {
        let keys: Vec<KeyRow> = batch.iter().map(|row| self.key_row(row)).collect::<Result<_>>()?;
        let (parts, values) = build_query_parts(self.table.primary_key(), &keys);
        let select = format!(
            "SELECT {}\nFROM {}\nWHERE {parts}",
            quote_list(self.table.fields()),
            quote(self.table.table_name())
        );
        let existing = self.store.select(&select, &values)?;

        let diff = self.compare(batch, keys, existing)?;
        let mut accounted: Vec<KeyRow> = diff.unchanged.iter().map(|(key, _)| key.clone()).collect();

        if !diff.add.is_empty() {
            self.insert_rows(&diff.add)?;
            accounted.extend(diff.add.iter().map(|(key, _)| key.clone()));
        }
        for (_, row) in &diff.update {
            self.update_row(row)?;
        }
        accounted.extend(diff.update.iter().map(|(key, _)| key.clone()));

        self.summary.unchanged += diff.unchanged.len();
        self.summary.added += diff.add.len();
        self.summary.updated += diff.update.len();

        if !accounted.is_empty() {
            let (parts, values) = build_query_parts(self.table.primary_key(), &accounted);
            let sql = format!("DELETE FROM {}\nWHERE {parts}", quote(&self.comparison));
            self.store.execute(&sql, &values)?;
        }
        Ok(())
    }

    fn compare(&self, batch: Vec<ProposedRow>, keys: Vec<KeyRow>, existing: Vec<Row>) -> Result<Diff> {
        let primary_key = self.table.primary_key();
        let mut cached: SeaMap<Vec<String>, Row> = SeaMap::default();
        for row in existing {
            let path = primary_key.iter().map(|f| row.get(f).map_or_else(String::new, value_key)).collect();
            cached.insert(path, row);
        }

        let mut tree = DiffNode::default();
        for (index, key) in keys.iter().enumerate() {
            let path: Vec<String> = key.values().map(value_key).collect();
            tree.insert(&path, index);
        }
        let mut order = Vec::new();
        tree.leaves(&mut order);

        let mut batch: Vec<Option<ProposedRow>> = batch.into_iter().map(Some).collect();
        let mut diff = Diff::default();
        for index in order {
            let Some(row) = batch[index].take() else {
                continue;
            };
            let key = keys[index].clone();
            let path: Vec<String> = key.values().map(value_key).collect();
            match cached.get(&path) {
                None => diff.add.push((key, row)),
                Some(existing) if self.row_matches(&row, existing) => diff.unchanged.push((key, row)),
                Some(existing) => {
                    if self.table.is_thrash_test() {
                        return Err(StepwiseError::UnexpectedChange {
                            lookup: self.name(),
                            existing: format!("{existing:?}"),
                            proposed: format!("{row:?}"),
                        });
                    }
                    diff.update.push((key, row));
                }
            }
        }
        Ok(diff)
    }

    fn row_matches(&self, proposed: &ProposedRow, existing: &Row) -> bool {
        let skip = self.table.lookup().skip_compare();
        proposed.iter().filter(|(field, _)| !skip.contains(*field)).all(|(field, value)| match value {
            RowValue::Value(value) => existing.get(field).is_some_and(|stored| values_match(value, stored)),
            RowValue::Expression { .. } => false,
        })
    }

    fn insert_rows(&self, rows: &[(KeyRow, ProposedRow)]) -> Result<()> {
        let mut values = Vec::new();
        let mut tuples = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            let mut placeholders = Vec::with_capacity(row.len());
            for field in self.table.fields() {
                placeholders.push(self.render_row_value(&row[field], &mut values)?);
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        let sql = format!(
            "{} INTO {} ({}) \nVALUES {}",
            self.store.dialect().insert_ignore(),
            quote(self.table.table_name()),
            quote_list(self.table.fields()),
            tuples.join(", ")
        );
        self.store.execute(&sql, &values)?;
        Ok(())
    }

    fn update_row(&self, row: &ProposedRow) -> Result<()> {
        let primary_key = self.table.primary_key();
        let (mut sets, mut set_values) = (Vec::new(), Vec::new());
        let (mut wheres, mut where_values) = (Vec::new(), Vec::new());
        for field in self.table.fields() {
            if primary_key.contains(field) {
                let value = self.render_row_value(&row[field], &mut where_values)?;
                wheres.push(format!("{} = {value}", quote(field)));
            } else {
                let value = self.render_row_value(&row[field], &mut set_values)?;
                sets.push(format!("{} = {value}", quote(field)));
            }
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE {} \nSET {} \nWHERE {}",
            quote(self.table.table_name()),
            sets.join(", "),
            wheres.join(" AND ")
        );
        set_values.extend(where_values);
        self.store.execute(&sql, &set_values)?;
        Ok(())
    }

    /// Placeholder text for one value. Expressions without parameters are
    /// inlined, `:name` parameters become positional.
    fn render_row_value(&self, value: &RowValue, out: &mut Vec<Value>) -> Result<String> {
        match value {
            RowValue::Value(value) => {
                out.push(value.clone());
                Ok("?".to_string())
            }
            RowValue::Expression { sql, params } if params.is_empty() => Ok(sql.clone()),
            RowValue::Expression { sql, params } => {
                let mut rendered = String::with_capacity(sql.len());
                let mut last = 0;
                let mut used = 0;
                for capture in NAMED_PARAM.captures_iter(sql) {
                    let (Some(whole), Some(name)) = (capture.get(0), capture.get(1)) else {
                        continue;
                    };
                    let Some(value) = params.get(name.as_str()) else {
                        return Err(StepwiseError::StatementParameterMismatch {
                            lookup: self.name(),
                            detail: format!("no value for `:{}` in `{sql}`", name.as_str()),
                        });
                    };
                    rendered.push_str(&sql[last..whole.start()]);
                    rendered.push('?');
                    out.push(value.clone());
                    last = whole.end();
                    used += 1;
                }
                rendered.push_str(&sql[last..]);
                if used != params.len() {
                    return Err(StepwiseError::StatementParameterMismatch {
                        lookup: self.name(),
                        detail: format!("`{sql}` uses {used} parameters, {} given", params.len()),
                    });
                }
                Ok(rendered)
            }
        }
    }
}

#[derive(Default)]
struct Diff {
    unchanged: Vec<(KeyRow, ProposedRow)>,
    add: Vec<(KeyRow, ProposedRow)>,
    update: Vec<(KeyRow, ProposedRow)>,
}

/// Proposed rows nested by primary-key values, so rows sharing leading key
/// values are handled together. A later row with the same key replaces the
/// earlier one.
#[derive(Default)]
struct DiffNode {
    children: IndexMap<String, DiffNode>,
    row: Option<usize>,
}

impl DiffNode {
    fn insert(&mut self, path: &[String], index: usize) {
        match path.split_first() {
            None => self.row = Some(index),
            Some((head, rest)) => self.children.entry(head.clone()).or_default().insert(rest, index),
        }
    }

    fn leaves(&self, out: &mut Vec<usize>) {
        if let Some(index) = self.row {
            out.push(index);
        }
        for child in self.children.values() {
            child.leaves(out);
        }
    }
}

/// WHERE text matching the given key rows. The field with the fewest
/// distinct values leads, each of its values nesting the rest:
/// `` (`a` = ? AND ((`b` IN (?,?)))) OR (`a` = ? AND ((`b` = ?))) ``.
pub(crate) fn build_query_parts(fields: &[String], rows: &[KeyRow]) -> (String, Vec<Value>) {
    let mut unique: Vec<&String> = Vec::with_capacity(fields.len());
    for field in fields {
        if !unique.contains(&field) {
            unique.push(field);
        }
    }
    let fields = unique;
    let groups: Vec<IndexMap<String, Vec<usize>>> = fields
        .iter()
        .map(|field| {
            let mut group: IndexMap<String, Vec<usize>> = IndexMap::new();
            for (index, row) in rows.iter().enumerate() {
                let key = row.get(*field).map_or_else(String::new, value_key);
                group.entry(key).or_default().push(index);
            }
            group
        })
        .collect();
    let Some(lead) = (0..fields.len()).min_by_key(|&i| groups[i].len()) else {
        return ("()".to_string(), Vec::new());
    };
    let lead_field = fields[lead];
    let others: Vec<String> = fields.iter().enumerate().filter(|(i, _)| *i != lead).map(|(_, f)| (*f).clone()).collect();

    let value_of = |index: usize| rows[index].get(lead_field).cloned().unwrap_or(Value::Null);
    let mut parts = Vec::new();
    let mut values = Vec::new();
    if others.is_empty() {
        let distinct: Vec<Value> = groups[lead].values().map(|indexes| value_of(indexes[0])).collect();
        let part = if distinct.len() == 1 {
            format!("{} = ?", quote(lead_field))
        } else {
            format!("{} IN ({})", quote(lead_field), vec!["?"; distinct.len()].join(","))
        };
        parts.push(part);
        values.extend(distinct);
    } else {
        for indexes in groups[lead].values() {
            let subset: Vec<KeyRow> = indexes.iter().map(|&i| rows[i].clone()).collect();
            let (rest, rest_values) = build_query_parts(&others, &subset);
            parts.push(format!("{} = ? AND ({rest})", quote(lead_field)));
            values.push(value_of(indexes[0]));
            values.extend(rest_values);
        }
    }
    (format!("({})", parts.join(") OR (")), values)
}
