//! Content fingerprints identifying refinement steps, and the cache of the
//! steps already run.
use std::fmt;
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use seahash::SeaHasher;
use serde::Serialize;

use crate::error::{Result, StepwiseError};
use crate::filter_reference::FilterReference;
use crate::operation::Param;

pub type SeaMap<K, V> = IndexMap<K, V, BuildHasherDefault<SeaHasher>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of running `operation` on top of the step `prior`.
    /// `fields` are the fields the prior step carries, so the same operation
    /// on a differently shaped relation is a different step.
    pub fn compute(
        prior: Option<&Fingerprint>,
        operation: &str,
        primary_key: &[String],
        fields: &IndexMap<String, String>,
        params: &[Param],
        update_only: bool,
    ) -> Result<Fingerprint> {
        #[derive(Serialize)]
        struct Step<'a> {
            prior: Option<&'a str>,
            operation: &'a str,
            primary_key: &'a [String],
            fields: &'a IndexMap<String, String>,
            params: &'a [Param],
            update_only: bool,
        }
        let step = Step { prior: prior.map(|p| p.0.as_str()), operation, primary_key, fields, params, update_only };
        let bytes = serde_json::to_vec(&step).map_err(|e| StepwiseError::Config(e.to_string()))?;
        Ok(Fingerprint(blake3::hash(&bytes).to_hex().to_string()))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filter references by fingerprint, plus which reference ends each tag.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    references: SeaMap<Fingerprint, FilterReference>,
    tags: SeaMap<String, Fingerprint>,
}

impl FingerprintCache {
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&FilterReference> {
        self.references.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.references.contains_key(fingerprint)
    }

    pub fn insert(&mut self, reference: FilterReference) {
        self.references.insert(reference.fingerprint().clone(), reference);
    }

    pub fn tag(&mut self, tag: impl Into<String>, fingerprint: Fingerprint) {
        self.tags.insert(tag.into(), fingerprint);
    }

    pub fn tag_fingerprint(&self, tag: &str) -> Option<&Fingerprint> {
        self.tags.get(tag)
    }

    pub fn tagged(&self, tag: &str) -> Option<&FilterReference> {
        self.tags.get(tag).and_then(|fingerprint| self.references.get(fingerprint))
    }

    /// Tags to the fingerprint of the reference ending them, in tag order.
    pub fn tags(&self) -> impl Iterator<Item = (&String, &Fingerprint)> {
        self.tags.iter()
    }

    /// References in the order they were first built.
    pub fn references(&self) -> impl Iterator<Item = &FilterReference> {
        self.references.values()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}
