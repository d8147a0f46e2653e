//! Memoized refinement steps.
use indexmap::IndexMap;

use crate::fingerprint::Fingerprint;
use crate::temp_table::{RelationFactory, RelationId};

/// The memoized outcome of one refinement step: the relations it derived and
/// the fields those relations carry.
#[derive(Debug, Clone)]
pub struct FilterReference {
    fingerprint: Fingerprint,
    primary_key: Vec<String>,
    field_definitions: IndexMap<String, String>,
    relations: Vec<RelationId>,
    current: Option<RelationId>,
    /// Where the step started from: the previous step's current relation.
    initial: Option<RelationId>,
}

impl FilterReference {
    pub fn new(
        fingerprint: Fingerprint,
        primary_key: Vec<String>,
        field_definitions: IndexMap<String, String>,
        initial: Option<RelationId>,
    ) -> Self {
        Self { fingerprint, primary_key, field_definitions, relations: Vec::new(), current: None, initial }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn field_definitions(&self) -> &IndexMap<String, String> {
        &self.field_definitions
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.field_definitions.contains_key(field)
    }

    pub fn track_field(&mut self, field: &str, definition: &str) {
        self.field_definitions.insert(field.to_string(), definition.to_string());
    }

    /// Creates a relation carrying the fields tracked so far. It is not
    /// created in the store until it has its own fields added.
    pub fn new_derived_relation(&mut self, factory: &mut RelationFactory) -> RelationId {
        let id = factory.create(self.primary_key.clone(), self.field_definitions.clone());
        self.relations.push(id);
        id
    }

    pub fn use_relation(&mut self, id: RelationId) {
        self.current = Some(id);
    }

    /// The relation holding this step's result, or the one it started from
    /// when the step derived nothing.
    pub fn current_derived_relation(&self) -> Option<RelationId> {
        self.current.or(self.initial)
    }

    pub fn relations(&self) -> &[RelationId] {
        &self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_the_initial_relation() {
        let mut factory = RelationFactory::new(true);
        let start = factory.create(vec!["id".into()], IndexMap::new());
        let fingerprint = Fingerprint::from_hex("abc");
        let mut reference = FilterReference::new(fingerprint, vec!["id".into()], IndexMap::new(), Some(start));
        assert_eq!(reference.current_derived_relation(), Some(start));

        reference.track_field("id", "INT NOT NULL");
        let derived = reference.new_derived_relation(&mut factory);
        assert_eq!(factory.get(derived).name(), "temp_table_2");
        assert!(factory.get(derived).field_definitions().contains_key("id"));
        reference.use_relation(derived);
        assert_eq!(reference.current_derived_relation(), Some(derived));
        assert_eq!(reference.relations(), &[derived]);
    }
}
