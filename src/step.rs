//! Running one refinement step: deriving a relation and filling it with
//! `INSERT ... SELECT` statements.
use indexmap::IndexMap;
use rusqlite::types::Value;

use crate::clause::{Clause, ClauseSet};
use crate::definition::StepwiseDefinition;
use crate::dialect::quote;
use crate::error::{Result, StepwiseError};
use crate::filter_reference::FilterReference;
use crate::lookup::LookupTable;
use crate::operation::{ActionReport, Expr, FilterArgs, Links, TrackFields};
use crate::relation::{Relation, TableRef, Tables};
use crate::store::Store;
use crate::temp_table::{RelationFactory, RelationId, TempTable};

/// Table a step reads its reference data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTable<'q> {
    /// A registered lookup, by name.
    Lookup(&'q str),
    /// A relation derived earlier in this search.
    Relation(RelationId),
    /// Any other table. Its fields are unknown, so it is taken to own
    /// whichever field nothing else does.
    Table(&'q str),
}

/// One `INSERT ... SELECT` into a derived relation.
#[derive(Debug, Clone, Copy)]
pub struct FilterQuery<'q> {
    /// `None` on the first step: the reference table is selected from directly.
    pub source: Option<RelationId>,
    pub reference: RefTable<'q>,
    pub destination: RelationId,
    pub links: &'q Links,
    pub extra: &'q TrackFields,
    pub clauses: &'q [Clause],
    /// Keeps source rows without a match, used when a step may not remove rows.
    pub left_join: bool,
}

/// The usual shape of a filter: join a reference table on some fields,
/// restrict by clause sets, and carry the reference table's fields along.
#[derive(Debug, Clone)]
pub struct RegularFilter<'q> {
    reference: RefTable<'q>,
    links: Links,
    extra: TrackFields,
    clause_sets: Vec<ClauseSet>,
    force_alter: bool,
    chained: bool,
}

impl<'q> RegularFilter<'q> {
    pub fn new(reference: RefTable<'q>) -> Self {
        Self {
            reference,
            links: Links::new(),
            extra: TrackFields::new(),
            clause_sets: Vec::new(),
            force_alter: false,
            chained: false,
        }
    }

    /// Joins on a field of the same name in both tables.
    pub fn link(self, field: &str) -> Self {
        self.link_as(field, field)
    }

    pub fn link_as(mut self, local: &str, reference: &str) -> Self {
        self.links.insert(local.to_string(), reference.to_string());
        self
    }

    pub fn track(mut self, field: &str, expr: Option<Expr>) -> Self {
        self.extra.insert(field.to_string(), expr);
        self
    }

    /// Clauses AND-combined in one statement.
    pub fn clause_set(mut self, clauses: impl IntoIterator<Item = Clause>) -> Self {
        self.clause_sets.push(clauses.into_iter().collect());
        self
    }

    /// Sets run as separate statements, so a row matching any of them is kept.
    pub fn clause_sets(mut self, sets: impl IntoIterator<Item = ClauseSet>) -> Self {
        self.clause_sets.extend(sets);
        self
    }

    /// Counts as altering the rows even without clauses.
    pub fn force_alter(mut self) -> Self {
        self.force_alter = true;
        self
    }

    /// Applies clause sets one after another, each to the previous one's
    /// result, so a row must match all of them.
    pub fn chained(mut self) -> Self {
        self.chained = true;
        self
    }
}

/// What a filter operation sees while it plans or runs.
pub struct StepContext<'e, 'a> {
    operation: &'e str,
    store: &'e Store<'a>,
    definition: &'a StepwiseDefinition,
    lookups: &'e IndexMap<String, LookupTable<'a>>,
    values: &'e IndexMap<String, Value>,
    tracked: &'e [String],
    relations: &'e mut RelationFactory,
    reference: Option<&'e mut FilterReference>,
}

impl<'e, 'a> StepContext<'e, 'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        operation: &'e str,
        store: &'e Store<'a>,
        definition: &'a StepwiseDefinition,
        lookups: &'e IndexMap<String, LookupTable<'a>>,
        values: &'e IndexMap<String, Value>,
        tracked: &'e [String],
        relations: &'e mut RelationFactory,
        reference: Option<&'e mut FilterReference>,
    ) -> Self {
        Self { operation, store, definition, lookups, values, tracked, relations, reference }
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    pub fn definition(&self) -> &'a StepwiseDefinition {
        self.definition
    }

    /// A value set on the engine with `set_value`, `None` when absent or null.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|value| !matches!(value, Value::Null))
    }

    pub fn lookup(&self, name: &str) -> Result<&LookupTable<'a>> {
        self.lookups.get(name).ok_or_else(|| StepwiseError::LookupNotFound { name: name.to_string() })
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.tracked.iter().any(|f| f == field)
    }

    pub fn relation(&self, id: RelationId) -> &TempTable {
        self.relations.get(id)
    }

    /// The relation the current step builds on, `None` on the first step.
    pub fn current_relation(&self) -> Option<RelationId> {
        self.reference.as_deref().and_then(FilterReference::current_derived_relation)
    }

    pub fn use_relation(&mut self, id: RelationId) -> Result<()> {
        let reference = self.filter_reference()?;
        reference.use_relation(id);
        Ok(())
    }

    fn filter_reference(&mut self) -> Result<&mut FilterReference> {
        match self.reference.as_deref_mut() {
            Some(reference) => Ok(reference),
            None => Err(StepwiseError::NoFilterReference { operation: self.operation.to_string() }),
        }
    }

    fn table_ref<'s>(&'s self, reference: RefTable<'s>) -> Result<TableRef<'s>> {
        Ok(match reference {
            RefTable::Lookup(name) => TableRef::Relation(self.lookup(name)?),
            RefTable::Relation(id) => TableRef::Relation(self.relations.get(id)),
            RefTable::Table(name) => TableRef::Raw(name),
        })
    }

    /// Creates the destination relation of a step, carrying the fields
    /// tracked so far plus those of `extra`, `links` and the reference table
    /// that the search tracks.
    pub fn new_temp_table(
        &mut self,
        extra: &TrackFields,
        links: &Links,
        reference: Option<RefTable<'_>>,
    ) -> Result<RelationId> {
        let reference = match reference {
            Some(reference) => Some(self.table_ref(reference)?),
            None => None,
        };
        let fields: Vec<String> =
            can_track(extra, links, reference).into_keys().filter(|field| self.is_tracked(field)).collect();

        let definitions = self.definition.resolved_definitions();
        let operation = self.operation;
        let filter_reference = match self.reference.as_deref_mut() {
            Some(reference) => reference,
            None => return Err(StepwiseError::NoFilterReference { operation: operation.to_string() }),
        };
        let id = filter_reference.new_derived_relation(self.relations);
        for field in &fields {
            let Some(definition) = definitions.get(field) else {
                return Err(StepwiseError::UntrackableField { field: field.clone() });
            };
            self.relations.get_mut(id).track_field(field, definition);
            filter_reference.track_field(field, definition);
        }
        self.relations.get_mut(id).create(self.store)?;
        Ok(id)
    }

    /// Fills `query.destination` from the source relation joined to the
    /// reference table.
    pub fn run_filter_query(&mut self, query: FilterQuery<'_>) -> Result<()> {
        let dialect = self.store.dialect();
        let destination = self.relations.get(query.destination);
        let reference = self.table_ref(query.reference)?;
        let (source, reference) = match query.source {
            None => (reference, None),
            Some(id) => (TableRef::Relation(self.relations.get(id) as &dyn Relation), Some(reference)),
        };
        let mut tables = Tables::new(dialect).with("src", source);
        if let Some(reference) = reference {
            tables.push("ref", reference);
        }

        let mut fields: IndexMap<String, Expr> = IndexMap::new();
        for field in destination.field_names() {
            if self.is_tracked(&field) {
                fields.insert(field.clone(), Expr::Field(field));
            }
        }
        for (field, expr) in can_track(query.extra, query.links, reference) {
            if self.is_tracked(&field) {
                fields.insert(field, expr);
            }
        }

        let mut values = Vec::new();
        let mut selects = Vec::new();
        for (field, expr) in &fields {
            if let Some(part) = select_part(&tables, source, reference, field, expr, &mut values)? {
                selects.push(format!("{part} as {}", quote(field)));
            }
        }

        let mut joins = Vec::new();
        if let Some(reference) = reference {
            let source_only = Tables::new(dialect).with("src", source);
            let reference_only = Tables::new(dialect).with("ref", reference);
            for (local, remote) in query.links {
                source_only.pick_alias(local, true)?;
                reference_only.pick_alias(remote, true)?;
                joins.push(format!("`src`.{} = `ref`.{}", quote(local), quote(remote)));
            }
        }

        let wheres: Vec<String> = query.clauses.iter().filter_map(|clause| clause.render(&tables, &mut values)).collect();

        let mut sql = format!(
            "{} INTO {}\nSELECT {}\nFROM {} src\n",
            dialect.insert_ignore(),
            quote(destination.name()),
            selects.join(", "),
            quote(source.table_name())
        );
        if let Some(reference) = reference {
            let join = if query.left_join { "LEFT JOIN" } else { "JOIN" };
            sql.push_str(&format!("{join} {} ref\n", quote(reference.table_name())));
            if !joins.is_empty() {
                sql.push_str(&format!("ON {}\n", joins.join(" AND ")));
            }
        }
        if !wheres.is_empty() {
            sql.push_str(&format!("WHERE {}", wheres.join(" AND ")));
        }
        self.store.execute(sql.trim_end(), &values)?;
        Ok(())
    }

    /// Runs, or when `args.action_check` is set only reports, a
    /// [`RegularFilter`]. `None` means the filter has nothing to do: it
    /// neither restricts rows nor provides any field.
    pub fn regular_filter(&mut self, filter: RegularFilter<'_>, args: &FilterArgs) -> Result<Option<ActionReport>> {
        let reference = self.table_ref(filter.reference)?;
        let trackable = can_track(&filter.extra, &filter.links, Some(reference));

        let (alters, clause_sets) = if args.allow_alter {
            let sets: Vec<ClauseSet> = filter
                .clause_sets
                .into_iter()
                .map(|set| set.into_iter().filter(Clause::restricts).collect::<ClauseSet>())
                .filter(|set| !set.is_empty())
                .collect();
            (!sets.is_empty() || filter.force_alter, sets)
        } else {
            (false, Vec::new())
        };
        if !alters && trackable.is_empty() {
            return Ok(None);
        }

        let extra: TrackFields = trackable.into_iter().map(|(field, expr)| (field, Some(expr))).collect();
        let report = ActionReport { alters, tracks: extra.clone(), links: filter.links.clone() };
        if args.action_check {
            return Ok(Some(report));
        }

        let sets = if clause_sets.is_empty() { vec![ClauseSet::new()] } else { clause_sets };
        let left_join = !args.allow_alter;
        if filter.chained {
            for set in &sets {
                let source = self.current_relation();
                let destination = self.new_temp_table(&extra, &filter.links, Some(filter.reference))?;
                self.run_filter_query(FilterQuery {
                    source,
                    reference: filter.reference,
                    destination,
                    links: &filter.links,
                    extra: &extra,
                    clauses: set,
                    left_join,
                })?;
                self.use_relation(destination)?;
            }
        } else {
            let source = self.current_relation();
            let destination = self.new_temp_table(&extra, &filter.links, Some(filter.reference))?;
            for set in &sets {
                self.run_filter_query(FilterQuery {
                    source,
                    reference: filter.reference,
                    destination,
                    links: &filter.links,
                    extra: &extra,
                    clauses: set,
                    left_join,
                })?;
            }
            self.use_relation(destination)?;
        }
        Ok(Some(report))
    }
}

/// What fills `field` in a filter query: the source column, the reference
/// column, or else the tracked expression.
fn select_part(
    tables: &Tables<'_>,
    source: TableRef<'_>,
    reference: Option<TableRef<'_>>,
    field: &str,
    expr: &Expr,
    values: &mut Vec<Value>,
) -> Result<Option<String>> {
    let from_reference =
        reference.is_some_and(|r| r.has_field(field) || matches!(r, TableRef::Raw(name) if !name.is_empty()));
    if source.has_field(field) {
        return Ok(Some(format!("`src`.{}", quote(field))));
    }
    if from_reference {
        return Ok(Some(format!("`ref`.{}", quote(field))));
    }
    Ok(match expr {
        Expr::Clause(clause) => clause.render(tables, values),
        Expr::Field(column) => tables.pick_alias(column, false)?.map(|alias| format!("`{alias}`.{}", quote(column))),
    })
}

/// Fields a step can fill and what from: join fields first, then `extra`,
/// then every field of the reference relation not already provided.
fn can_track(extra: &TrackFields, links: &Links, reference: Option<TableRef<'_>>) -> IndexMap<String, Expr> {
    let mut fields: TrackFields = links.iter().map(|(local, remote)| (local.clone(), Some(Expr::field(remote)))).collect();
    for (field, expr) in extra {
        fields.insert(field.clone(), expr.clone());
    }
    if let Some(TableRef::Relation(relation)) = reference {
        for field in relation.field_names() {
            if !matches!(fields.get(&field), Some(Some(_))) {
                fields.insert(field.clone(), Some(Expr::Field(field)));
            }
        }
    }
    fields.into_iter().filter_map(|(field, expr)| expr.map(|expr| (field, expr))).collect()
}
