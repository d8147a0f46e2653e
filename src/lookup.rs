//! Lookup tables: denormalized caches used as reference data by filters.
use indexmap::IndexMap;

use crate::dialect::{IndexDdl, IndexKind, Storage, TableDdl};
use crate::error::{Result, StepwiseError};
use crate::populate::PopulateSession;
use crate::relation::Relation;
use crate::store::Store;

/// A named or unnamed group of indexed fields. Unnamed groups are named
/// after their fields joined with `_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGroup {
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl IndexGroup {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self { name: None, fields: fields.into_iter().map(Into::into).collect() }
    }

    pub fn named<S: Into<String>>(name: impl Into<String>, fields: impl IntoIterator<Item = S>) -> Self {
        Self { name: Some(name.into()), fields: fields.into_iter().map(Into::into).collect() }
    }

    pub fn index_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.fields.join("_"))
    }
}

/// Declaration of a lookup table.
#[derive(Debug, Clone)]
pub struct Lookup {
    name: String,
    table_template: String,
    fields: Vec<String>,
    primary_key: Vec<String>,
    unique: Vec<IndexGroup>,
    indexes: Vec<IndexGroup>,
    fulltext: Vec<IndexGroup>,
    field_definitions: IndexMap<String, String>,
    skip_compare: Vec<String>,
    batch_size: Option<usize>,
}

impl Lookup {
    /// `table_template` may hold `%stub%` placeholders, see [`Lookup::resolve`].
    pub fn builder(name: impl Into<String>, table_template: impl Into<String>) -> LookupBuilder {
        LookupBuilder {
            lookup: Lookup {
                name: name.into(),
                table_template: table_template.into(),
                fields: Vec::new(),
                primary_key: Vec::new(),
                unique: Vec::new(),
                indexes: Vec::new(),
                fulltext: Vec::new(),
                field_definitions: IndexMap::new(),
                skip_compare: Vec::new(),
                batch_size: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_template(&self) -> &str {
        &self.table_template
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn field_definitions(&self) -> &IndexMap<String, String> {
        &self.field_definitions
    }

    pub fn skip_compare(&self) -> &[String] {
        &self.skip_compare
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Fills in definitions from `shared` for fields this lookup does not define itself.
    pub(crate) fn inherit_definitions(&mut self, shared: &IndexMap<String, String>) {
        let mut merged = shared.clone();
        for (field, definition) in &self.field_definitions {
            merged.insert(field.clone(), definition.clone());
        }
        self.field_definitions = merged;
    }

    pub fn check_fields(&self) -> Result<()> {
        if self.primary_key.is_empty() {
            return Err(StepwiseError::NoPrimaryKey { lookup: self.name.clone() });
        }
        let groups: [(&str, Vec<&[String]>); 4] = [
            ("Primary-key", vec![self.primary_key.as_slice()]),
            ("Unique index", self.unique.iter().map(|g| g.fields.as_slice()).collect()),
            ("Regular index", self.indexes.iter().map(|g| g.fields.as_slice()).collect()),
            ("Fulltext index", self.fulltext.iter().map(|g| g.fields.as_slice()).collect()),
        ];
        for (index_type, indexes) in groups {
            for field in indexes.into_iter().flatten() {
                if !self.has_field(field) {
                    return Err(StepwiseError::IndexFieldNotFound {
                        index_type: index_type.to_string(),
                        field: field.clone(),
                        lookup: self.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Substitutes `%stub%` placeholders in the table name.
    pub fn resolve(&self, stubs: &IndexMap<String, String>) -> Result<LookupTable<'_>> {
        let mut table_name = self.table_template.clone();
        for (stub, replacement) in stubs {
            table_name = table_name.replace(&format!("%{stub}%"), replacement);
        }
        if table_name.contains('%') {
            return Err(StepwiseError::UnresolvedStubs { table: table_name });
        }
        Ok(LookupTable { lookup: self, table_name, test_mode: false, thrash_test: false })
    }
}

pub struct LookupBuilder {
    lookup: Lookup,
}

impl LookupBuilder {
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.lookup.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary_key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.lookup.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn unique(mut self, group: IndexGroup) -> Self {
        self.lookup.unique.push(group);
        self
    }

    pub fn index(mut self, group: IndexGroup) -> Self {
        self.lookup.indexes.push(group);
        self
    }

    pub fn fulltext(mut self, group: IndexGroup) -> Self {
        self.lookup.fulltext.push(group);
        self
    }

    /// DDL for one field. Takes precedence over definitions shared by a
    /// search definition.
    pub fn field_definition(mut self, field: impl Into<String>, definition: impl Into<String>) -> Self {
        self.lookup.field_definitions.insert(field.into(), definition.into());
        self
    }

    /// Field left out when deciding whether a cached row changed.
    pub fn skip_compare(mut self, field: impl Into<String>) -> Self {
        self.lookup.skip_compare.push(field.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.lookup.batch_size = Some(batch_size.max(1));
        self
    }

    pub fn build(self) -> Result<Lookup> {
        self.lookup.check_fields()?;
        Ok(self.lookup)
    }
}

/// A lookup with its table name resolved.
#[derive(Debug, Clone)]
pub struct LookupTable<'l> {
    lookup: &'l Lookup,
    table_name: String,
    test_mode: bool,
    thrash_test: bool,
}

impl<'l> LookupTable<'l> {
    pub fn lookup(&self) -> &'l Lookup {
        self.lookup
    }

    /// Test mode gives the comparison table a fixed name.
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// Makes any detected change to an existing row an error, for checking
    /// that a re-sync of unchanged data really changes nothing.
    pub fn thrash_test(mut self, thrash_test: bool) -> Self {
        self.thrash_test = thrash_test;
        self
    }

    pub fn is_thrash_test(&self) -> bool {
        self.thrash_test
    }

    pub fn primary_key(&self) -> &'l [String] {
        &self.lookup.primary_key
    }

    pub fn fields(&self) -> &'l [String] {
        &self.lookup.fields
    }

    /// Column definitions of `fields`, failing on the first undefined one.
    pub(crate) fn columns<'f>(&self, fields: impl IntoIterator<Item = &'f String>) -> Result<Vec<(String, String)>> {
        fields
            .into_iter()
            .map(|field| match self.lookup.field_definitions.get(field) {
                Some(definition) => Ok((field.clone(), definition.clone())),
                None => Err(StepwiseError::FieldNotDefined { field: field.clone(), lookup: self.lookup.name.clone() }),
            })
            .collect()
    }

    /// Drops and recreates the cache table with all of its indexes.
    pub fn create_primary_table(&self, store: &Store) -> Result<()> {
        let settings = store.settings();
        let mut indexes = Vec::new();
        for (kind, groups) in [
            (IndexKind::Unique, &self.lookup.unique),
            (IndexKind::Plain, &self.lookup.indexes),
            (IndexKind::FullText, &self.lookup.fulltext),
        ] {
            indexes.extend(groups.iter().map(|g| IndexDdl { kind, name: g.index_name(), fields: g.fields.clone() }));
        }
        let ddl = TableDdl {
            name: &self.table_name,
            temporary: false,
            if_not_exists: true,
            columns: self.columns(&self.lookup.fields)?,
            primary_key: self.lookup.primary_key.clone(),
            indexes,
            storage: Storage::Table {
                engine: &settings.primary_table_engine,
                charset: &settings.charset,
                collation: &settings.collation,
            },
        };
        store.execute(&store.dialect().drop_table(&self.table_name), &[])?;
        store.execute_all(&store.dialect().create_table(&ddl))
    }

    /// Starts a synchronisation of this table against proposed rows.
    pub fn start_populate<'s, 'db>(&'s self, store: &Store<'db>) -> Result<PopulateSession<'s, 'l, 'db>> {
        PopulateSession::start(self, store.clone())
    }
}

impl Relation for LookupTable<'_> {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn has_field(&self, field: &str) -> bool {
        self.lookup.has_field(field)
    }

    fn field_names(&self) -> Vec<String> {
        self.lookup.fields.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maker() -> LookupBuilder {
        Lookup::builder("maker", "%prefix%maker")
            .fields(["product_id", "maker_id"])
            .primary_key(["product_id"])
            .field_definition("product_id", "INT NOT NULL")
    }

    #[test]
    fn index_fields_must_exist() {
        let err = maker().index(IndexGroup::new(["brand_id"])).build().unwrap_err();
        match err {
            StepwiseError::IndexFieldNotFound { index_type, field, .. } => {
                assert_eq!(index_type, "Regular index");
                assert_eq!(field, "brand_id");
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = Lookup::builder("x", "x").fields(["a"]).build().unwrap_err();
        assert!(matches!(err, StepwiseError::NoPrimaryKey { .. }));
    }

    #[test]
    fn stubs_must_all_resolve() {
        let lookup = maker().build().expect("lookup");
        let stubs: IndexMap<String, String> = [("prefix".to_string(), "_c1_".to_string())].into_iter().collect();
        assert_eq!(lookup.resolve(&stubs).expect("resolved").table_name(), "_c1_maker");
        let err = lookup.resolve(&IndexMap::new()).unwrap_err();
        assert!(matches!(err, StepwiseError::UnresolvedStubs { table } if table == "%prefix%maker"));
    }

    #[test]
    fn own_definitions_take_precedence() {
        let mut lookup = maker().build().expect("lookup");
        let shared: IndexMap<String, String> = [
            ("product_id".to_string(), "BIGINT NOT NULL".to_string()),
            ("maker_id".to_string(), "BIGINT NOT NULL".to_string()),
        ]
        .into_iter()
        .collect();
        lookup.inherit_definitions(&shared);
        assert_eq!(lookup.field_definitions()["product_id"], "INT NOT NULL");
        assert_eq!(lookup.field_definitions()["maker_id"], "BIGINT NOT NULL");
    }

    #[test]
    fn undefined_columns_fail() {
        let lookup = maker().build().expect("lookup");
        let table = lookup.resolve(&[("prefix".to_string(), String::new())].into_iter().collect()).expect("table");
        let err = table.columns(lookup.fields()).unwrap_err();
        assert!(matches!(err, StepwiseError::FieldNotDefined { field, .. } if field == "maker_id"));
    }
}
