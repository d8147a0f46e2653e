//! The search engine: plans each tag, runs its steps and memoizes every
//! step by fingerprint so tags sharing a prefix share its relations.
use std::time::Instant;

use indexmap::IndexMap;
use rusqlite::types::Value;
use tracing::{info, warn};

use crate::definition::{Direction, StepwiseDefinition};
use crate::error::{Result, StepwiseError};
use crate::filter_reference::FilterReference;
use crate::fingerprint::{Fingerprint, FingerprintCache};
use crate::input::Input;
use crate::lookup::LookupTable;
use crate::operation::FilterArgs;
use crate::plan::{Plan, PlanBuilder, RunnableFilters};
use crate::relation::Relation;
use crate::results::Results;
use crate::step::StepContext;
use crate::store::Store;
use crate::temp_table::{RelationFactory, RelationId, TempTable};
use crate::tracker::QueryTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    Pending,
    Executed,
}

/// One search over a [`StepwiseDefinition`].
///
/// Configure it, call [`Stepwise::search`] once, then read each tag through
/// [`Stepwise::results`]. Derived relations live until
/// [`Stepwise::drop_temp_tables`] or until the engine is dropped.
pub struct Stepwise<'a> {
    definition: &'a StepwiseDefinition,
    store: Store<'a>,
    state: SearchState,
    test_mode: bool,
    input: Input,
    values: IndexMap<String, Value>,
    stubs: IndexMap<String, String>,
    primary_key: Option<Vec<String>>,
    fields: Vec<String>,
    order_by: IndexMap<String, Direction>,
    tags: IndexMap<String, Vec<String>>,
    relations: RelationFactory,
    cache: FingerprintCache,
    lookups: IndexMap<String, LookupTable<'a>>,
    tracked: Vec<String>,
    plan: Plan,
    proceeded: bool,
}

impl<'a> Stepwise<'a> {
    pub fn new(definition: &'a StepwiseDefinition, store: Store<'a>) -> Self {
        Self {
            definition,
            store,
            state: SearchState::Pending,
            test_mode: false,
            input: Input::new(),
            values: IndexMap::new(),
            stubs: IndexMap::new(),
            primary_key: None,
            fields: Vec::new(),
            order_by: IndexMap::new(),
            tags: IndexMap::new(),
            relations: RelationFactory::new(false),
            cache: FingerprintCache::default(),
            lookups: IndexMap::new(),
            tracked: Vec::new(),
            plan: Plan::new(),
            proceeded: false,
        }
    }

    fn ensure_pending(&self, method: &str) -> Result<()> {
        match self.state {
            SearchState::Pending => Ok(()),
            SearchState::Executed => Err(StepwiseError::SearchAlreadyRun { method: method.to_string() }),
        }
    }

    fn ensure_executed(&self, method: &str) -> Result<()> {
        match self.state {
            SearchState::Executed => Ok(()),
            SearchState::Pending => Err(StepwiseError::SearchPending { method: method.to_string() }),
        }
    }

    fn ensure_test_mode(&self, method: &str) -> Result<()> {
        if self.test_mode { Ok(()) } else { Err(StepwiseError::NotInTestMode { method: method.to_string() }) }
    }

    // ------------- Settables -------------

    /// Test mode gives derived relations and comparison tables predictable names.
    pub fn test_mode(&mut self, test_mode: bool) -> Result<&mut Self> {
        self.ensure_pending("test_mode")?;
        self.test_mode = test_mode;
        self.relations = RelationFactory::new(test_mode);
        Ok(self)
    }

    pub fn run_queries(&mut self, run_queries: bool) -> Result<&mut Self> {
        self.ensure_pending("run_queries")?;
        self.store.set_run_queries(run_queries);
        Ok(self)
    }

    pub fn query_tracker(&mut self, tracker: Option<QueryTracker>) -> Result<&mut Self> {
        self.ensure_pending("query_tracker")?;
        self.store.set_tracker(tracker);
        Ok(self)
    }

    /// A value operations can read with [`StepContext::value`].
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        self.ensure_pending("set_value")?;
        self.values.insert(name.into(), value.into());
        Ok(self)
    }

    pub fn set_values<K, V>(&mut self, values: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.ensure_pending("set_values")?;
        self.values.extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        Ok(self)
    }

    pub fn reset_values(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_values")?;
        self.values.clear();
        Ok(self)
    }

    /// Replacement for `%name%` in lookup table names, over any configured one.
    pub fn stub_replacement(&mut self, name: impl Into<String>, replacement: impl Into<String>) -> Result<&mut Self> {
        self.ensure_pending("stub_replacement")?;
        self.stubs.insert(name.into(), replacement.into());
        Ok(self)
    }

    pub fn stub_replacements<K, V>(&mut self, replacements: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.ensure_pending("stub_replacements")?;
        self.stubs.extend(replacements.into_iter().map(|(k, v)| (k.into(), v.into())));
        Ok(self)
    }

    pub fn reset_stub_replacements(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_stub_replacements")?;
        self.stubs.clear();
        Ok(self)
    }

    pub fn input(&mut self, input: Input) -> Result<&mut Self> {
        self.ensure_pending("input")?;
        self.input = input;
        Ok(self)
    }

    pub fn reset_input(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_input")?;
        self.input = Input::new();
        Ok(self)
    }

    /// Overrides the definition's primary key.
    pub fn primary_key<S: Into<String>>(&mut self, fields: impl IntoIterator<Item = S>) -> Result<&mut Self> {
        self.ensure_pending("primary_key")?;
        self.primary_key = Some(fields.into_iter().map(Into::into).collect());
        Ok(self)
    }

    pub fn track_field(&mut self, field: impl Into<String>) -> Result<&mut Self> {
        self.ensure_pending("track_field")?;
        let field = field.into();
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        Ok(self)
    }

    pub fn track_fields<S: Into<String>>(&mut self, fields: impl IntoIterator<Item = S>) -> Result<&mut Self> {
        self.ensure_pending("track_fields")?;
        for field in fields {
            self.track_field(field)?;
        }
        Ok(self)
    }

    pub fn reset_track_fields(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_track_fields")?;
        self.fields.clear();
        Ok(self)
    }

    /// A field or order-by alias. Repeating a name replaces its direction.
    pub fn order_by(&mut self, name: impl Into<String>, direction: Direction) -> Result<&mut Self> {
        self.ensure_pending("order_by")?;
        self.order_by.insert(name.into(), direction);
        Ok(self)
    }

    pub fn reset_order_by(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_order_by")?;
        self.order_by.clear();
        Ok(self)
    }

    /// A tag over `+name` / `-name` filter aliases.
    pub fn tag<S: Into<String>>(&mut self, tag: impl Into<String>, filters: impl IntoIterator<Item = S>) -> Result<&mut Self> {
        self.ensure_pending("tag")?;
        self.tags.insert(tag.into(), filters.into_iter().map(Into::into).collect());
        Ok(self)
    }

    pub fn tags(&mut self, tags: IndexMap<String, Vec<String>>) -> Result<&mut Self> {
        self.ensure_pending("tags")?;
        self.tags.extend(tags);
        Ok(self)
    }

    pub fn reset_tags(&mut self) -> Result<&mut Self> {
        self.ensure_pending("reset_tags")?;
        self.tags.clear();
        Ok(self)
    }

    // ------------- Search -------------

    /// Plans and runs every tag. Can only be called once.
    pub fn search(&mut self) -> Result<()> {
        self.ensure_pending("search")?;
        self.state = SearchState::Executed;
        let started = Instant::now();

        if !self.input.can_proceed() {
            info!(search = self.definition.name(), "search cannot proceed");
            return Ok(());
        }
        self.proceeded = true;

        let primary_key = self.primary_key.clone().unwrap_or_else(|| self.definition.primary_key().to_vec());
        let mut tracked = primary_key.clone();
        for name in self.order_by.keys() {
            for field in self.definition.order_by_fields(name)? {
                if !tracked.contains(&field) {
                    tracked.push(field);
                }
            }
        }
        for field in &self.fields {
            if !tracked.contains(field) {
                tracked.push(field.clone());
            }
        }

        let mut stubs = self.store.settings().stubs.clone();
        stubs.extend(self.stubs.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut lookups = IndexMap::new();
        for (name, lookup) in self.definition.lookups() {
            lookups.insert(name.clone(), lookup.resolve(&stubs)?.test_mode(self.test_mode));
        }
        let lookup_tables: IndexMap<String, String> =
            lookups.iter().map(|(name, table)| (name.clone(), table.table_name().to_string())).collect();
        self.lookups = lookups;

        let mut runnable = RunnableFilters::default();
        for operation in self.definition.operations() {
            let args = FilterArgs::build(operation.params(), &self.input, &lookup_tables, true, true);
            let mut ctx = StepContext::new(
                operation.name(),
                &self.store,
                self.definition,
                &self.lookups,
                &self.values,
                &tracked,
                &mut self.relations,
                None,
            );
            let report = operation.call(&mut ctx, &args)?;
            runnable.record(operation.name(), report);
        }

        let planner = PlanBuilder::new(self.definition.operation_names(), self.definition.filter_groups());
        let tag_list = planner.build_tag_list(&self.tags)?;
        let plan = planner.organise(tag_list, &runnable, &tracked)?;
        PlanBuilder::add_link_fields(&plan, &mut tracked, &runnable.links);
        self.tracked = tracked;

        for (tag, steps) in &plan {
            let mut prior: Option<Fingerprint> = None;
            for step in steps {
                let Some(operation) = self.definition.operation(&step.operation) else {
                    return Err(StepwiseError::FilterNotFound { name: step.operation.clone() });
                };
                let previous = prior.as_ref().and_then(|fingerprint| self.cache.get(fingerprint));
                let fields = previous.map(|r| r.field_definitions().clone()).unwrap_or_default();
                let initial = previous.and_then(FilterReference::current_derived_relation);
                let fingerprint = Fingerprint::compute(
                    prior.as_ref(),
                    operation.name(),
                    &primary_key,
                    &fields,
                    operation.params(),
                    step.update_only,
                )?;

                if !self.cache.contains(&fingerprint) {
                    let mut reference = FilterReference::new(fingerprint.clone(), primary_key.clone(), fields, initial);
                    let args =
                        FilterArgs::build(operation.params(), &self.input, &lookup_tables, !step.update_only, false);
                    let mut ctx = StepContext::new(
                        operation.name(),
                        &self.store,
                        self.definition,
                        &self.lookups,
                        &self.values,
                        &self.tracked,
                        &mut self.relations,
                        Some(&mut reference),
                    );
                    operation.call(&mut ctx, &args)?;
                    self.cache.insert(reference);
                }
                prior = Some(fingerprint);
            }
            if let Some(fingerprint) = prior {
                self.cache.tag(tag.clone(), fingerprint);
            }
        }
        self.plan = plan;

        info!(
            ms = started.elapsed().as_secs_f64() * 1000.0,
            search = self.definition.name(),
            tags = self.plan.len(),
            relations = self.relations.len(),
            "search complete"
        );
        Ok(())
    }

    // ------------- After the search -------------

    pub fn definition(&self) -> &'a StepwiseDefinition {
        self.definition
    }

    pub fn store(&self) -> &Store<'a> {
        &self.store
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// False when the input stopped the search before anything ran.
    pub fn proceeded(&self) -> bool {
        self.proceeded
    }

    /// Every field the search tracked, link fields included.
    pub fn tracked_fields(&self) -> &[String] {
        &self.tracked
    }

    /// Caller ordering, applied by [`Results`] until it is given its own.
    pub fn caller_order_by(&self) -> &IndexMap<String, Direction> {
        &self.order_by
    }

    pub fn plan(&self) -> Result<&Plan> {
        self.ensure_executed("plan")?;
        Ok(&self.plan)
    }

    pub fn relation(&self, id: RelationId) -> &TempTable {
        self.relations.get(id)
    }

    /// The reference a tag ends on.
    pub fn tagged_reference(&self, tag: &str) -> Result<&FilterReference> {
        self.ensure_executed("tagged_reference")?;
        self.cache.tagged(tag).ok_or_else(|| StepwiseError::FilterTagNotFound { tag: tag.to_string() })
    }

    /// Tag to fingerprint, for tests comparing which tags share a step.
    pub fn filter_ref_tags(&self) -> Result<IndexMap<String, Fingerprint>> {
        self.ensure_test_mode("filter_ref_tags")?;
        self.ensure_executed("filter_ref_tags")?;
        Ok(self.cache.tags().map(|(tag, fingerprint)| (tag.clone(), fingerprint.clone())).collect())
    }

    /// Name of the relation holding a tag's rows.
    pub fn tag_table_name(&self, tag: &str) -> Result<Option<String>> {
        self.ensure_test_mode("tag_table_name")?;
        let reference = self.tagged_reference(tag)?;
        Ok(reference.current_derived_relation().map(|id| self.relations.get(id).table_name().to_string()))
    }

    /// A reader over the `all` tag.
    pub fn results(&self) -> Result<Results<'_, 'a>> {
        self.ensure_executed("results")?;
        Results::new(self)
    }

    /// Drops every derived relation still in the store.
    pub fn drop_temp_tables(&mut self) -> Result<()> {
        self.relations.drop_all(&self.store)?;
        Ok(())
    }
}

impl Drop for Stepwise<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.drop_temp_tables() {
            warn!(error=%e, search = self.definition.name(), "dropping temporary tables failed");
        }
    }
}
