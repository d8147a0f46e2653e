//! Values flowing between callers, statements and the store.
use indexmap::IndexMap;
use rusqlite::types::Value;

/// A row read from the store, keyed by column name in select order.
pub type Row = IndexMap<String, Value>;

/// One field of a row proposed for a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Value(Value),
    /// A store-side expression such as `POINT(:lng, :lat)`, with its named parameters.
    Expression { sql: String, params: IndexMap<String, Value> },
}

impl RowValue {
    pub fn expression(sql: impl Into<String>) -> Self {
        RowValue::Expression { sql: sql.into(), params: IndexMap::new() }
    }

    pub fn expression_with<I, K>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        RowValue::Expression { sql: sql.into(), params: params.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RowValue::Value(value) => Some(value),
            RowValue::Expression { .. } => None,
        }
    }
}

macro_rules! row_value_from {
    ( $( $t:ty ),* ) => {
        $( impl From<$t> for RowValue {
            fn from(value: $t) -> Self { RowValue::Value(value.into()) }
        } )*
    };
}
row_value_from!(Value, i64, i32, u32, u16, u8, i16, i8, f64, f32, bool, String, Vec<u8>);

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Value(Value::Text(value.to_string()))
    }
}

impl<T> From<Option<T>> for RowValue
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        RowValue::Value(value.map_or(Value::Null, Into::into))
    }
}

/// A row proposed for a lookup table.
pub type ProposedRow = IndexMap<String, RowValue>;

/// Builds a [`ProposedRow`].
///
/// ```
/// use stepwise::row;
/// let r = row! { "product_id" => 1, "maker_id" => 100 };
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::value::ProposedRow::new() };
    ( $( $field:expr => $value:expr ),+ $(,)? ) => {{
        let mut row = $crate::value::ProposedRow::new();
        $( row.insert(::std::string::String::from($field), $crate::value::RowValue::from($value)); )+
        row
    }};
}

/// Canonical text of a value used to key rows by their primary key. Integral
/// reals and numeric text key the same as the integer they hold.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) if r.is_finite() && r.fract() == 0.0 && r.abs() < i64::MAX as f64 => (*r as i64).to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(r) => Some(*r),
        Value::Text(t) => t.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compares a proposed value with a stored one. Numbers compare by value
/// whichever of integer, real or numeric text each side holds, since stores
/// hand decimals back in whatever form they keep them.
pub fn values_match(proposed: &Value, existing: &Value) -> bool {
    match (proposed, existing) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Blob(a), Value::Blob(b)) => a == b,
        (Value::Integer(a), Value::Integer(b)) => a == b,
        _ => match (as_number(proposed), as_number(existing)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Converts caller input into a bindable value.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Integer(i64::from(*b)),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Integer(i),
            (None, Some(f)) => Value::Real(f),
            (None, None) => Value::Text(n.to_string()),
        },
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_collapse_numeric_forms() {
        assert_eq!(value_key(&Value::Integer(5)), "5");
        assert_eq!(value_key(&Value::Real(5.0)), "5");
        assert_eq!(value_key(&Value::Text("5".into())), "5");
        assert_eq!(value_key(&Value::Real(5.5)), "5.5");
    }

    #[test]
    fn numeric_coercion_is_symmetric() {
        let decimal = Value::Text("12.500".into());
        assert!(values_match(&Value::Real(12.5), &decimal));
        assert!(values_match(&decimal, &Value::Real(12.5)));
        assert!(values_match(&Value::Integer(3), &Value::Real(3.0)));
        assert!(!values_match(&Value::Integer(3), &Value::Text("three".into())));
        assert!(!values_match(&Value::Null, &Value::Integer(0)));
    }

    #[test]
    fn json_input_converts() {
        assert_eq!(json_to_value(&serde_json::json!(true)), Value::Integer(1));
        assert_eq!(json_to_value(&serde_json::json!(2.5)), Value::Real(2.5));
        assert_eq!(json_to_value(&serde_json::json!("x")), Value::Text("x".into()));
    }

    #[test]
    fn row_macro_builds_expressions_too() {
        let r = crate::row! { "id" => 1, "at" => RowValue::expression("NOW()") };
        assert_eq!(r["id"], RowValue::Value(Value::Integer(1)));
        assert!(r["at"].as_value().is_none());
    }
}
