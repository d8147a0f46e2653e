//! Building a range clause out of optional bounds.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value;

use crate::clause::RegularClause;

/// A value that can bound a range. Bounds are compared in their own type, the
/// value itself is what gets bound into the statement.
pub trait RangeValue: Clone + PartialOrd {
    fn to_value(&self) -> Value;
}

impl RangeValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl RangeValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

impl RangeValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Text(self.format("%Y-%m-%d").to_string())
    }
}

impl RangeValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl RangeValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

fn larger<T: RangeValue>(a: T, b: T) -> T {
    if b > a { b } else { a }
}

fn smaller<T: RangeValue>(a: T, b: T) -> T {
    if b < a { b } else { a }
}

fn clamp<T: RangeValue>(value: T, lowest: &Option<T>, highest: &Option<T>) -> T {
    let value = match lowest {
        Some(lowest) => larger(lowest.clone(), value),
        None => value,
    };
    match highest {
        Some(highest) => smaller(highest.clone(), value),
        None => value,
    }
}

impl RegularClause {
    /// Clamps `min` and `max` into `[lowest, highest]`, swapping them when
    /// reversed. Equal bounds give `=`, two bounds `BETWEEN`, one bound `>=`
    /// or `<=` and no bounds no clause.
    pub fn build_range<T: RangeValue>(
        field: &str,
        min: Option<T>,
        max: Option<T>,
        lowest: Option<T>,
        highest: Option<T>,
    ) -> Option<RegularClause> {
        let mut min = min.map(|v| clamp(v, &lowest, &highest));
        let mut max = max.map(|v| clamp(v, &lowest, &highest));
        if let (Some(low), Some(high)) = (&min, &max) {
            if high < low {
                std::mem::swap(&mut min, &mut max);
            }
        }
        let clause = match (min, max) {
            (Some(low), Some(high)) if low == high => {
                RegularClause::equals(field, vec![low.to_value()])
            }
            (Some(low), Some(high)) => RegularClause::between(field, low.to_value(), high.to_value()),
            (Some(low), None) => RegularClause::compare(field, ">=", low.to_value()),
            (None, Some(high)) => RegularClause::compare(field, "<=", high.to_value()),
            (None, None) => return None,
        };
        Some(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::Clause;
    use crate::dialect::Dialect;
    use crate::relation::{TableRef, Tables};

    fn render(clause: Option<RegularClause>) -> Option<(String, Vec<Value>)> {
        let tables = Tables::new(Dialect::MySql).with("src", TableRef::Raw("t"));
        let mut values = Vec::new();
        let sql = Clause::from(clause?).render(&tables, &mut values)?;
        Some((sql, values))
    }

    #[test]
    fn bounds_are_clamped() {
        let (sql, values) = render(RegularClause::build_range("price", Some(-5i64), Some(500), Some(0), Some(100)))
            .expect("clause");
        assert_eq!(sql, "(`src`.`price` BETWEEN ? AND ?)");
        assert_eq!(values, vec![Value::Integer(0), Value::Integer(100)]);
    }

    #[test]
    fn clamping_can_collapse_to_equals() {
        let (sql, values) =
            render(RegularClause::build_range("price", Some(150i64), Some(200), None, Some(100))).expect("clause");
        assert_eq!(sql, "(`src`.`price` = ?)");
        assert_eq!(values, vec![Value::Integer(100)]);
    }

    #[test]
    fn dates_range() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        let to = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let (sql, values) = render(RegularClause::build_range("day", Some(from), Some(to), None, None)).expect("clause");
        assert_eq!(sql, "(`src`.`day` BETWEEN ? AND ?)");
        assert_eq!(values, vec![Value::Text("2024-01-01".into()), Value::Text("2024-03-01".into())]);
    }

    #[test]
    fn wide_integers_keep_both_bounds() {
        let low = 1i64 << 53;
        let expected = ("(`src`.`id` BETWEEN ? AND ?)".to_string(), vec![Value::Integer(low), Value::Integer(low + 1)]);
        let forward = render(RegularClause::build_range("id", Some(low), Some(low + 1), None, None));
        let reversed = render(RegularClause::build_range("id", Some(low + 1), Some(low), None, None));
        assert_eq!(forward, Some(expected.clone()));
        assert_eq!(reversed, Some(expected));
    }

    #[test]
    fn no_bounds_no_clause() {
        assert!(RegularClause::build_range::<f64>("x", None, None, Some(1.0), None).is_none());
    }
}
