//! Declaring a search: its fields, lookups, filter operations and orderings.
use indexmap::IndexMap;

use crate::error::{Result, StepwiseError};
use crate::lookup::Lookup;
use crate::operation::{ActionReport, FALLBACK_FILTER, FilterArgs, FilterOperation, Param};
use crate::step::StepContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    /// `DESC` in any case is descending, anything else ascending.
    pub fn parse(direction: &str) -> Direction {
        if direction.trim().eq_ignore_ascii_case("desc") { Direction::Desc } else { Direction::Asc }
    }

    pub fn flip(self) -> Direction {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One clause of an order-by alias. `clause` refers to the results table as
/// `%table%` and is only used when all of `fields` are available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByClause {
    pub fields: Vec<String>,
    pub clause: String,
    pub direction: Direction,
}

impl OrderByClause {
    pub fn new<S: Into<String>>(
        fields: impl IntoIterator<Item = S>,
        clause: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self { fields: fields.into_iter().map(Into::into).collect(), clause: clause.into(), direction }
    }
}

/// The immutable description of a search, shared by every run of it.
#[derive(Debug)]
pub struct StepwiseDefinition {
    name: String,
    primary_key: Vec<String>,
    field_definitions: IndexMap<String, String>,
    resolved_definitions: IndexMap<String, String>,
    lookups: IndexMap<String, Lookup>,
    operations: IndexMap<String, FilterOperation>,
    operation_names: Vec<String>,
    filter_groups: IndexMap<String, Vec<String>>,
    order_by_aliases: IndexMap<String, Vec<OrderByClause>>,
}

impl StepwiseDefinition {
    pub fn builder(name: impl Into<String>) -> StepwiseDefinitionBuilder {
        StepwiseDefinitionBuilder {
            name: name.into(),
            primary_key: Vec::new(),
            field_definitions: IndexMap::new(),
            lookups: IndexMap::new(),
            operations: IndexMap::new(),
            filter_groups: IndexMap::new(),
            order_by_aliases: IndexMap::new(),
        }
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

    /// Field definitions of the search merged with those of every lookup.
    pub fn resolved_definitions(&self) -> &IndexMap<String, String> {
        &self.resolved_definitions
    }

    pub fn lookup(&self, name: &str) -> Option<&Lookup> {
        self.lookups.get(name)
    }

    pub fn lookups(&self) -> &IndexMap<String, Lookup> {
        &self.lookups
    }

    pub fn operation(&self, name: &str) -> Option<&FilterOperation> {
        self.operations.get(name)
    }

    /// Operations in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &FilterOperation> {
        self.operations.values()
    }

    pub fn operation_names(&self) -> &[String] {
        &self.operation_names
    }

    pub fn filter_groups(&self) -> &IndexMap<String, Vec<String>> {
        &self.filter_groups
    }

    pub fn order_by_alias(&self, name: &str) -> Option<&[OrderByClause]> {
        self.order_by_aliases.get(name).map(Vec::as_slice)
    }

    /// Fields a requested ordering needs tracked: the name itself when it is a
    /// field, otherwise the fields of the order-by alias of that name.
    pub fn order_by_fields(&self, name: &str) -> Result<Vec<String>> {
        if self.resolved_definitions.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        let Some(clauses) = self.order_by_aliases.get(name) else {
            return Err(StepwiseError::InvalidOrderBy { name: name.to_string() });
        };
        let mut fields = Vec::new();
        for field in clauses.iter().flat_map(|clause| &clause.fields) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        Ok(fields)
    }
}

pub struct StepwiseDefinitionBuilder {
    name: String,
    primary_key: Vec<String>,
    field_definitions: IndexMap<String, String>,
    lookups: IndexMap<String, Lookup>,
    operations: IndexMap<String, FilterOperation>,
    filter_groups: IndexMap<String, Vec<String>>,
    order_by_aliases: IndexMap<String, Vec<OrderByClause>>,
}

impl StepwiseDefinitionBuilder {
    pub fn primary_key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn field(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.field_definitions.insert(name.into(), definition.into());
        self
    }

    /// Registers a lookup under its own name.
    pub fn lookup(mut self, lookup: Lookup) -> Self {
        self.lookups.insert(lookup.name().to_string(), lookup);
        self
    }

    /// Registers a filter operation. Operations are planned in registration order.
    pub fn filter<F>(mut self, name: impl Into<String>, params: Vec<Param>, run: F) -> Self
    where
        F: Fn(&mut StepContext<'_, '_>, &FilterArgs) -> Result<Option<ActionReport>> + Send + Sync + 'static,
    {
        let operation = FilterOperation::new(name, params, run);
        self.operations.insert(operation.name().to_string(), operation);
        self
    }

    /// Registers the operation run when nothing else alters the rows.
    pub fn fallback<F>(self, run: F) -> Self
    where
        F: Fn(&mut StepContext<'_, '_>, &FilterArgs) -> Result<Option<ActionReport>> + Send + Sync + 'static,
    {
        self.filter(FALLBACK_FILTER, Vec::new(), run)
    }

    /// A name tags can use to include or exclude several operations at once.
    pub fn filter_group<S: Into<String>>(mut self, name: impl Into<String>, filters: impl IntoIterator<Item = S>) -> Self {
        self.filter_groups.insert(name.into(), filters.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by_alias(mut self, name: impl Into<String>, clauses: Vec<OrderByClause>) -> Self {
        self.order_by_aliases.insert(name.into(), clauses);
        self
    }

    /// Checks the lookups against the search's own field definitions. A field
    /// defined in both must be defined identically.
    pub fn build(self) -> Result<StepwiseDefinition> {
        let mut resolved = self.field_definitions.clone();
        for lookup in self.lookups.values() {
            for (field, definition) in lookup.field_definitions() {
                match resolved.get(field) {
                    Some(existing) if existing != definition => {
                        return Err(StepwiseError::ConflictingFieldDefinition {
                            field: field.clone(),
                            first: existing.clone(),
                            second: definition.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        resolved.insert(field.clone(), definition.clone());
                    }
                }
            }
        }
        let mut lookups = self.lookups;
        for lookup in lookups.values_mut() {
            lookup.inherit_definitions(&self.field_definitions);
        }
        let operation_names = self.operations.keys().cloned().collect();
        Ok(StepwiseDefinition {
            name: self.name,
            primary_key: self.primary_key,
            field_definitions: self.field_definitions,
            resolved_definitions: resolved,
            lookups,
            operations: self.operations,
            operation_names,
            filter_groups: self.filter_groups,
            order_by_aliases: self.order_by_aliases,
        })
    }
}
