//! Tables a statement can select from, and the aliases they go by.
use crate::dialect::Dialect;
use crate::error::{Result, StepwiseError};

/// Anything a statement can select from by field name: lookup tables and
/// derived relations.
pub trait Relation {
    fn table_name(&self) -> &str;
    fn has_field(&self, field: &str) -> bool;
    fn field_names(&self) -> Vec<String>;
}

/// A table taking part in a statement.
#[derive(Clone, Copy)]
pub enum TableRef<'a> {
    Relation(&'a dyn Relation),
    /// A plain table name. Its fields are unknown, so it is assumed to own
    /// whichever field no relation owns.
    Raw(&'a str),
}

impl<'a> TableRef<'a> {
    pub fn table_name(&self) -> &'a str {
        match *self {
            TableRef::Relation(relation) => relation.table_name(),
            TableRef::Raw(name) => name,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        match self {
            TableRef::Relation(relation) => relation.has_field(field),
            TableRef::Raw(_) => false,
        }
    }
}

impl std::fmt::Debug for TableRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableRef::Relation(relation) => write!(f, "Relation({})", relation.table_name()),
            TableRef::Raw(name) => write!(f, "Raw({name})"),
        }
    }
}

/// Aliased tables a clause renders against, in priority order.
#[derive(Debug, Clone)]
pub struct Tables<'a> {
    entries: Vec<(String, TableRef<'a>)>,
    dialect: Dialect,
}

impl<'a> Tables<'a> {
    pub fn new(dialect: Dialect) -> Self {
        Self { entries: Vec::new(), dialect }
    }

    pub fn with(mut self, alias: impl Into<String>, table: TableRef<'a>) -> Self {
        self.push(alias, table);
        self
    }

    pub fn push(&mut self, alias: impl Into<String>, table: TableRef<'a>) {
        self.entries.push((alias.into(), table));
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn aliases(&self) -> Vec<String> {
        self.entries.iter().map(|(alias, _)| alias.clone()).collect()
    }

    pub fn get(&self, alias: &str) -> Option<TableRef<'a>> {
        self.entries.iter().find(|(a, _)| a == alias).map(|(_, table)| *table)
    }

    /// The alias owning `field`: the first relation declaring it, otherwise the
    /// last raw table. Strict resolution turns a miss into `FieldNotFound`.
    pub fn pick_alias(&self, field: &str, strict: bool) -> Result<Option<&str>> {
        if let Some((alias, _)) = self.entries.iter().find(|(_, table)| table.has_field(field)) {
            return Ok(Some(alias.as_str()));
        }
        if let Some((alias, _)) = self.entries.iter().rev().find(|(_, table)| matches!(table, TableRef::Raw(_))) {
            return Ok(Some(alias.as_str()));
        }
        if strict {
            return Err(StepwiseError::FieldNotFound { field: field.to_string(), aliases: self.aliases() });
        }
        Ok(None)
    }

    /// `` `alias`.`field` `` when the field resolves.
    pub fn qualified(&self, field: &str, strict: bool) -> Result<Option<String>> {
        Ok(self.pick_alias(field, strict)?.map(|alias| format!("`{alias}`.`{field}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static [&'static str]);

    impl Relation for Fixed {
        fn table_name(&self) -> &str {
            self.0
        }
        fn has_field(&self, field: &str) -> bool {
            self.1.contains(&field)
        }
        fn field_names(&self) -> Vec<String> {
            self.1.iter().map(|f| f.to_string()).collect()
        }
    }

    #[test]
    fn first_relation_then_last_raw() {
        let a = Fixed("a", &["id", "x"]);
        let b = Fixed("b", &["id", "y"]);
        let tables = Tables::new(Dialect::MySql)
            .with("raw1", TableRef::Raw("t1"))
            .with("src", TableRef::Relation(&a))
            .with("ref", TableRef::Relation(&b))
            .with("raw2", TableRef::Raw("t2"));
        assert_eq!(tables.pick_alias("id", true).expect("resolves"), Some("src"));
        assert_eq!(tables.pick_alias("y", true).expect("resolves"), Some("ref"));
        assert_eq!(tables.pick_alias("z", true).expect("resolves"), Some("raw2"));
    }

    #[test]
    fn strict_miss_names_the_aliases() {
        let a = Fixed("a", &["id"]);
        let tables = Tables::new(Dialect::MySql).with("src", TableRef::Relation(&a));
        assert_eq!(tables.pick_alias("zz", false).expect("lenient"), None);
        match tables.pick_alias("zz", true) {
            Err(StepwiseError::FieldNotFound { field, aliases }) => {
                assert_eq!(field, "zz");
                assert_eq!(aliases, vec!["src".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
