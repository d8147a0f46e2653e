//! Reading the rows of a tag, with extra clauses, ordering and paging.
use indexmap::IndexMap;
use rusqlite::types::Value;

use crate::clause::Clause;
use crate::definition::Direction;
use crate::dialect::quote;
use crate::error::{Result, StepwiseError};
use crate::operation::ALL_TAG;
use crate::relation::{Relation, TableRef, Tables};
use crate::search::Stepwise;
use crate::temp_table::TempTable;
use crate::value::Row;

/// A field to select: a column of the relation, or any other expression.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selected {
    alias: String,
    expression: String,
}

pub struct Results<'s, 'a> {
    search: &'s Stepwise<'a>,
    relation: Option<&'s TempTable>,
    table_alias: Option<String>,
    fields: Vec<Selected>,
    order_by: IndexMap<String, Direction>,
    reset_order_by: bool,
    clauses: Vec<Clause>,
    page: Option<(i64, i64)>,
    count: Option<i64>,
}

impl<'s, 'a> Results<'s, 'a> {
    pub(crate) fn new(search: &'s Stepwise<'a>) -> Result<Self> {
        let mut results = Results {
            search,
            relation: None,
            table_alias: Some("results".to_string()),
            fields: Vec::new(),
            order_by: search.caller_order_by().clone(),
            reset_order_by: true,
            clauses: Vec::new(),
            page: None,
            count: None,
        };
        results.use_tag(ALL_TAG)?;
        Ok(results)
    }

    /// Reads from another tag. A search the input stopped has no tags and
    /// reads as empty.
    pub fn use_tag(&mut self, tag: &str) -> Result<&mut Self> {
        self.relation = if self.search.proceeded() {
            let reference = self.search.tagged_reference(tag)?;
            reference.current_derived_relation().map(|id| self.search.relation(id))
        } else {
            None
        };
        self.count = None;
        Ok(self)
    }

    /// `None` selects from the relation without an alias.
    pub fn table_alias(&mut self, alias: Option<&str>) -> &mut Self {
        self.table_alias = alias.map(str::to_string);
        self
    }

    pub fn fields<S: AsRef<str>>(&mut self, fields: impl IntoIterator<Item = S>) -> &mut Self {
        self.fields = fields
            .into_iter()
            .map(|f| Selected { alias: f.as_ref().to_string(), expression: f.as_ref().to_string() })
            .collect();
        self
    }

    /// Selects `expression` as `alias`. A column name is qualified with the table alias.
    pub fn field_as(&mut self, alias: impl Into<String>, expression: impl Into<String>) -> &mut Self {
        self.fields.push(Selected { alias: alias.into(), expression: expression.into() });
        self
    }

    pub fn all_fields(&mut self) -> &mut Self {
        self.fields.clear();
        self
    }

    /// The first call replaces the search's own ordering, later calls add to it.
    pub fn order_by(&mut self, name: impl Into<String>, direction: Direction) -> &mut Self {
        if self.reset_order_by {
            self.order_by.clear();
            self.reset_order_by = false;
        }
        self.order_by.insert(name.into(), direction);
        self
    }

    pub fn reset_order_by(&mut self) -> &mut Self {
        self.order_by.clear();
        self.reset_order_by = false;
        self
    }

    pub fn clause(&mut self, clause: impl Into<Clause>) -> &mut Self {
        self.clauses.push(clause.into());
        self.count = None;
        self
    }

    pub fn remove_clauses(&mut self) -> &mut Self {
        self.clauses.clear();
        self.count = None;
        self
    }

    /// Pages count from 1.
    pub fn page(&mut self, page: i64, page_size: i64) -> &mut Self {
        self.page = Some((page, page_size));
        self
    }

    pub fn table_name(&self) -> Option<&str> {
        self.relation.map(TempTable::name)
    }

    pub fn table_fields(&self) -> Vec<String> {
        self.relation.map(TempTable::field_names).unwrap_or_default()
    }

    fn effective_alias(&self) -> Option<&str> {
        match &self.table_alias {
            Some(alias) => Some(alias.as_str()),
            None => self.table_name(),
        }
    }

    fn render_fields(&self, relation: &TempTable, alias: &str) -> Vec<String> {
        let selected: Vec<Selected> = if self.fields.is_empty() {
            relation.field_names().into_iter().map(|f| Selected { alias: f.clone(), expression: f }).collect()
        } else {
            self.fields.clone()
        };
        selected
            .into_iter()
            .map(|field| {
                let expression = if relation.has_field(&field.expression) {
                    format!("`{alias}`.{}", quote(&field.expression))
                } else {
                    field.expression.clone()
                };
                if field.alias == field.expression { expression } else { format!("{expression} as {}", quote(&field.alias)) }
            })
            .collect()
    }

    fn render_order_by(&self, relation: &TempTable, alias: &str) -> Result<Vec<String>> {
        let definition = self.search.definition();
        let mut parts = Vec::new();
        for (name, direction) in &self.order_by {
            if relation.has_field(name) {
                parts.push(format!("`{alias}`.{} {}", quote(name), direction.as_sql()));
                continue;
            }
            if definition.resolved_definitions().contains_key(name) {
                continue;
            }
            let Some(clauses) = definition.order_by_alias(name) else {
                return Err(StepwiseError::InvalidOrderBy { name: name.clone() });
            };
            for clause in clauses.iter().filter(|c| c.fields.iter().all(|f| relation.has_field(f))) {
                let clause_direction = match direction {
                    Direction::Asc => clause.direction,
                    Direction::Desc => clause.direction.flip(),
                };
                parts.push(format!("{} {}", clause.clause.replace("%table%", alias), clause_direction.as_sql()));
            }
        }
        Ok(parts)
    }

    fn build_query(&self, relation: &TempTable, count: bool) -> Result<(String, Vec<Value>)> {
        let alias = self.effective_alias().unwrap_or(relation.name()).to_string();
        let mut values = Vec::new();
        let fields = if count { vec!["COUNT(*) as `total`".to_string()] } else { self.render_fields(relation, &alias) };

        let tables = Tables::new(self.search.store().dialect()).with(alias.clone(), TableRef::Relation(relation));
        let wheres: Vec<String> = self.clauses.iter().filter_map(|c| c.render(&tables, &mut values)).collect();

        let mut sql = format!("SELECT {} FROM {}", fields.join(", "), quote(relation.name()));
        if self.table_alias.is_some() {
            sql.push_str(&format!(" AS {}", quote(&alias)));
        }
        if !wheres.is_empty() {
            sql.push_str(&format!(" WHERE {}", wheres.join(" AND ")));
        }
        if !count {
            let order_by = self.render_order_by(relation, &alias)?;
            if !order_by.is_empty() {
                sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
            }
            if let Some((page, size)) = self.page {
                sql.push_str(" LIMIT ?, ?");
                values.push(Value::Integer((page.max(1) - 1) * size));
                values.push(Value::Integer(size));
            }
        }
        Ok((sql, values))
    }

    pub fn get(&self) -> Result<Vec<Row>> {
        let Some(relation) = self.relation else {
            return Ok(Vec::new());
        };
        let (sql, values) = self.build_query(relation, false)?;
        self.search.store().select(&sql, &values)
    }

    /// Number of rows, remembered until the tag or the clauses change.
    pub fn count(&mut self) -> Result<i64> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let count = match self.relation {
            None => 0,
            Some(relation) => {
                let (sql, values) = self.build_query(relation, true)?;
                let rows = self.search.store().select(&sql, &values)?;
                match rows.first().and_then(|row| row.get("total")) {
                    Some(Value::Integer(total)) => *total,
                    _ => 0,
                }
            }
        };
        self.count = Some(count);
        Ok(count)
    }

    /// `None` until a page size is set.
    pub fn page_count(&mut self) -> Result<Option<i64>> {
        let Some((_, size)) = self.page else {
            return Ok(None);
        };
        if size <= 0 {
            return Ok(None);
        }
        let count = self.count()?;
        Ok(Some((count + size - 1) / size))
    }
}
