//! Planning: which operations run for each tag, in which order and mode.
use std::fmt;

use indexmap::IndexMap;

use crate::error::{Result, StepwiseError};
use crate::operation::{ALL_FILTERS_ALIAS, ALL_TAG, ActionReport, FALLBACK_FILTER, Links, UPDATE_ONLY_SUFFIX};

/// One operation of a tag's plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub operation: String,
    /// Only add fields, never remove rows.
    pub update_only: bool,
}

impl PlanStep {
    pub fn alter(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), update_only: false }
    }

    pub fn update_only(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), update_only: true }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.update_only {
            write!(f, "{}{UPDATE_ONLY_SUFFIX}", self.operation)
        } else {
            f.write_str(&self.operation)
        }
    }
}

/// Ordered operations per tag, the `all` tag first.
pub type Plan = IndexMap<String, Vec<PlanStep>>;

/// What the action check of every operation reported.
#[derive(Debug, Clone, Default)]
pub struct RunnableFilters {
    /// Operations that would remove rows, in registration order.
    pub alterers: Vec<String>,
    /// Field to the operations able to fill it, in registration order.
    pub candidates: IndexMap<String, Vec<String>>,
    /// Operation to the fields it joins on.
    pub links: IndexMap<String, Links>,
}

impl RunnableFilters {
    /// Records one operation's report. `None` means the operation does not
    /// apply and is left out entirely.
    pub fn record(&mut self, operation: &str, report: Option<ActionReport>) {
        let Some(report) = report else {
            return;
        };
        if report.alters {
            self.alterers.push(operation.to_string());
        }
        for field in report.trackable() {
            self.candidates.entry(field.clone()).or_default().push(operation.to_string());
        }
        if !report.links.is_empty() {
            self.links.insert(operation.to_string(), report.links);
        }
    }
}

/// Builds tag plans from the registered operations and filter groups.
pub struct PlanBuilder<'a> {
    operations: &'a [String],
    groups: &'a IndexMap<String, Vec<String>>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(operations: &'a [String], groups: &'a IndexMap<String, Vec<String>>) -> Self {
        Self { operations, groups }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.operations.iter().any(|op| op == name)
    }

    /// Resolves each tag's `+name` / `-name` list into operation names. The
    /// `all` tag is always first and a caller tag of that name is ignored.
    pub fn build_tag_list(&self, tags: &IndexMap<String, Vec<String>>) -> Result<IndexMap<String, Vec<String>>> {
        let include_all = format!("+{ALL_FILTERS_ALIAS}");
        let exclude_all = format!("-{ALL_FILTERS_ALIAS}");

        let mut requested: IndexMap<String, Vec<String>> = IndexMap::new();
        requested.insert(ALL_TAG.to_string(), vec![include_all.clone()]);
        for (tag, list) in tags {
            if tag != ALL_TAG {
                requested.insert(tag.clone(), list.clone());
            }
        }

        let mut tag_list = IndexMap::new();
        for (tag, mut list) in requested {
            if !list.contains(&include_all) && !list.contains(&exclude_all) {
                list.insert(0, include_all.clone());
            }
            let mut filters: Vec<String> = Vec::new();
            for alias in &list {
                let (keep, name) = match alias.chars().next() {
                    Some('+') => (true, &alias[1..]),
                    Some('-') => (false, &alias[1..]),
                    _ => return Err(StepwiseError::InvalidFilterAlias { alias: alias.clone() }),
                };
                let resolved: Vec<String> = if self.is_registered(name) {
                    vec![name.to_string()]
                } else if name == ALL_FILTERS_ALIAS {
                    self.operations.to_vec()
                } else if let Some(group) = self.groups.get(name) {
                    group.clone()
                } else {
                    vec![name.to_string()]
                };
                if let Some(missing) = resolved.iter().find(|n| !self.is_registered(n)) {
                    return Err(StepwiseError::FilterNotFound { name: missing.clone() });
                }
                if keep {
                    for name in resolved {
                        if !filters.contains(&name) {
                            filters.push(name);
                        }
                    }
                } else {
                    filters.retain(|f| !resolved.contains(f));
                }
            }
            if self.is_registered(FALLBACK_FILTER) && !filters.iter().any(|f| f == FALLBACK_FILTER) {
                filters.push(FALLBACK_FILTER.to_string());
            }
            tag_list.insert(tag, filters);
        }
        Ok(tag_list)
    }

    /// Keeps the altering operations of each tag, orders them so operations
    /// shared by many tags run first, then appends update-only steps for
    /// tracked fields no step in the tag fills.
    pub fn organise(
        &self,
        tag_list: IndexMap<String, Vec<String>>,
        runnable: &RunnableFilters,
        tracked: &[String],
    ) -> Result<Plan> {
        let mut altering: IndexMap<String, Vec<String>> = IndexMap::new();
        for (tag, filters) in tag_list {
            let mut used: Vec<String> = runnable.alterers.iter().filter(|a| filters.contains(a)).cloned().collect();
            if used.len() > 1 && used.iter().any(|f| f == FALLBACK_FILTER) {
                used.retain(|f| f != FALLBACK_FILTER);
            }
            altering.insert(tag, used);
        }

        // ties keep the order operations were first seen in
        let mut frequencies: IndexMap<&str, usize> = IndexMap::new();
        for filters in altering.values() {
            for filter in filters {
                *frequencies.entry(filter.as_str()).or_default() += 1;
            }
        }
        let mut by_frequency: Vec<(usize, &str, usize)> =
            frequencies.iter().enumerate().map(|(seen, (name, count))| (*count, *name, seen)).collect();
        by_frequency.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)));

        let mut plan = Plan::new();
        for (tag, filters) in &altering {
            let steps: Vec<PlanStep> = by_frequency
                .iter()
                .filter(|(_, name, _)| filters.iter().any(|f| f == name))
                .map(|(_, name, _)| PlanStep::alter(*name))
                .collect();
            if steps.is_empty() {
                return Err(StepwiseError::EmptyTagAfterPlanning { tag: tag.clone() });
            }
            plan.insert(tag.clone(), steps);
        }

        for (field, candidates) in &runnable.candidates {
            if !tracked.contains(field) {
                continue;
            }
            for steps in plan.values_mut() {
                let found = candidates.iter().any(|c| steps.iter().any(|s| &s.operation == c));
                if !found {
                    if let Some(first) = candidates.first() {
                        steps.push(PlanStep::update_only(first.clone()));
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Adds the join fields of every planned operation to `tracked`.
    pub fn add_link_fields(plan: &Plan, tracked: &mut Vec<String>, links: &IndexMap<String, Links>) {
        for step in plan.values().flatten() {
            let Some(pairs) = links.get(&step.operation) else {
                continue;
            };
            for field in pairs.keys().chain(pairs.values()) {
                if !tracked.contains(field) {
                    tracked.push(field.clone());
                }
            }
        }
    }
}
