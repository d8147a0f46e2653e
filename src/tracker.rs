//! Statement trace.
//!
//! Every statement the engine generates is recorded with its bound values and
//! whether it was actually executed. Rendering substitutes the values back into
//! the text so generated SQL can be asserted without a live database.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedQuery {
    pub query: String,
    pub values: Vec<Value>,
    pub executed: bool,
}

/// Shared handle, clones record into the same trace.
#[derive(Debug, Clone, Default)]
pub struct QueryTracker {
    queries: Arc<Mutex<Vec<TrackedQuery>>>,
}

impl QueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackedQuery>> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self, query: &str, values: &[Value], executed: bool) {
        self.lock().push(TrackedQuery { query: query.to_string(), values: values.to_vec(), executed });
    }

    pub fn queries(&self) -> Vec<TrackedQuery> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Statement texts with their values in place of the `?` markers.
    pub fn rendered_queries(&self) -> Vec<String> {
        self.lock().iter().map(|q| place_values(&q.query, &q.values)).collect()
    }

    /// The rendered statements as one block of quoted, concatenated literals,
    /// handy for pasting into an expectation.
    pub fn copyable_queries(&self) -> String {
        let quoted: Vec<String> = self
            .rendered_queries()
            .into_iter()
            .map(|q| format!("\"{}\"", q.replace('"', "\\\"").replace('\n', "\\n\"\n.\"")))
            .collect();
        format!("{}\n", quoted.join(",\n\n"))
    }
}

/// Fills `?` markers with rendered values. When there are more markers than
/// values the trailing markers are filled.
pub fn place_values(query: &str, values: &[Value]) -> String {
    let markers = query.matches('?').count();
    let mut skip = markers.saturating_sub(values.len());
    let mut values = values.iter();
    let mut rendered = String::with_capacity(query.len());
    for c in query.chars() {
        if c == '?' {
            if skip > 0 {
                skip -= 1;
            } else if let Some(value) = values.next() {
                rendered.push_str(&render_value(value));
                continue;
            }
        }
        rendered.push(c);
    }
    rendered
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => format!("\"{}\"", add_slashes(t)),
        Value::Blob(b) => format!("X'{}'", b.iter().map(|byte| format!("{byte:02X}")).collect::<String>()),
    }
}

fn add_slashes(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '\'' | '"' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\0' => escaped.push_str("\\0"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_values_in_order() {
        let sql = place_values(
            "SELECT * FROM t WHERE a = ? AND b IN (?, ?) AND c = ?",
            &[Value::Integer(5), Value::Text("it's".into()), Value::Null, Value::Real(2.5)],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = 5 AND b IN (\"it\\'s\", NULL) AND c = 2.5");
    }

    #[test]
    fn question_marks_inside_values_are_left_alone() {
        let sql = place_values("a = ? AND b = ?", &[Value::Text("?".into()), Value::Integer(1)]);
        assert_eq!(sql, "a = \"?\" AND b = 1");
    }

    #[test]
    fn clones_share_the_trace() {
        let tracker = QueryTracker::new();
        let other = tracker.clone();
        other.track("SELECT 1", &[], false);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.queries()[0].executed);
        tracker.clear();
        assert!(other.is_empty());
    }
}
