mod common;

use rusqlite::Connection;
use rusqlite::types::Value;
use serde_json::json;
use stepwise::{Clause, Direction, QueryTracker, Row, StepwiseDefinition, StepwiseError};

fn seeded() -> (Connection, StepwiseDefinition) {
    let conn = Connection::open_in_memory().expect("connection");
    let definition = common::product_search();
    common::seed(&conn, &definition);
    (conn, definition)
}

/// Product ids in the order they came back.
fn ordered_ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get("product_id") {
            Some(Value::Integer(id)) => *id,
            other => panic!("unexpected product id {other:?}"),
        })
        .collect()
}

#[test]
fn ordering_by_fields_and_aliases() {
    let (conn, definition) = seeded();
    let mut search = common::executing(&conn, &definition);
    search.order_by("fallback", Direction::Desc).expect("order");
    search.search().expect("search");

    let mut results = search.results().expect("results");
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![5, 4, 3, 2, 1]);

    // an explicit ordering replaces the search's own
    results.order_by("product_id", Direction::Asc);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![1, 2, 3, 4, 5]);

    // relevance is not tracked, so only its product id clause applies, flipped
    results.reset_order_by().order_by("relevance", Direction::Asc);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![5, 4, 3, 2, 1]);

    // maker_id is a known field this relation does not carry
    results.reset_order_by().order_by("maker_id", Direction::Desc).order_by("product_id", Direction::Asc);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![1, 2, 3, 4, 5]);

    results.order_by("colour", Direction::Asc);
    assert!(matches!(results.get().unwrap_err(), StepwiseError::InvalidOrderBy { ref name } if name == "colour"));
}

#[test]
fn paging_and_counting() {
    let (conn, definition) = seeded();
    let tracker = QueryTracker::new();
    let mut search = common::executing(&conn, &definition);
    search.query_tracker(Some(tracker.clone())).expect("tracker");
    search.search().expect("search");

    let mut results = search.results().expect("results");
    assert_eq!(results.page_count().expect("page count"), None);
    results.order_by("product_id", Direction::Asc).page(2, 2);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![3, 4]);
    assert_eq!(
        tracker.rendered_queries().last().map(String::as_str),
        Some("SELECT `results`.`product_id` FROM `temp_table_1` AS `results` ORDER BY `results`.`product_id` ASC LIMIT 2, 2")
    );
    assert_eq!(results.count().expect("count"), 5);
    assert_eq!(results.page_count().expect("page count"), Some(3));

    results.page(0, 2);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![1, 2]);

    // counts are remembered until the clauses change
    tracker.clear();
    assert_eq!(results.count().expect("count"), 5);
    assert!(tracker.is_empty());
    results.clause(Clause::eq("product_id", 3));
    assert_eq!(results.count().expect("count"), 1);
    assert_eq!(
        tracker.rendered_queries(),
        vec!["SELECT COUNT(*) as `total` FROM `temp_table_1` AS `results` WHERE (`results`.`product_id` = 3)"]
    );
}

#[test]
fn selecting_fields_and_clauses() {
    let (conn, definition) = seeded();
    let mut search = common::executing(&conn, &definition);
    search.track_field("maker_id").expect("track");
    search.search().expect("search");

    let mut results = search.results().expect("results");
    assert_eq!(results.table_fields(), vec!["product_id", "maker_id"]);
    results
        .fields(["product_id"])
        .field_as("maker", "maker_id")
        .field_as("doubled", "`results`.`product_id` * 2")
        .clause(Clause::eq("maker_id", 10))
        .order_by("product_id", Direction::Asc);
    let rows = results.get().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["product_id", "maker", "doubled"]);
    assert_eq!(rows[0]["maker"], Value::Integer(10));
    assert_eq!(rows[1]["doubled"], Value::Integer(8));

    // clauses on fields the relation lacks are left out
    results.remove_clauses().clause(Clause::eq("product_price", 60)).all_fields();
    assert_eq!(results.get().expect("rows").len(), 5);
}

#[test]
fn reading_without_an_alias() {
    let (conn, definition) = seeded();
    let tracker = QueryTracker::new();
    let mut search = common::executing(&conn, &definition);
    search
        .query_tracker(Some(tracker.clone()))
        .and_then(|s| s.input(common::input(json!({ "makerIds": [7] }))))
        .expect("configure");
    search.search().expect("search");

    let mut results = search.results().expect("results");
    results.table_alias(None);
    let rows = results.get().expect("rows");
    assert_eq!(ordered_ids(&rows), vec![5]);
    assert_eq!(
        tracker.rendered_queries().last().map(String::as_str),
        Some("SELECT `temp_table_1`.`product_id` FROM `temp_table_1`")
    );
    assert_eq!(results.table_name(), Some("temp_table_1"));
}

#[test]
fn relevance_orders_search_term_matches() {
    let (conn, definition) = seeded();
    let mut search = common::executing(&conn, &definition);
    search
        .input(common::input(json!({ "searchTerm": "chocolate" })))
        .and_then(|s| s.order_by("relevance", Direction::Asc))
        .expect("configure");
    search.search().expect("search");

    // the alias already sorts most relevant first
    let results = search.results().expect("results");
    assert_eq!(results.table_fields(), vec!["product_id", common::RELEVANCE]);
    assert_eq!(ordered_ids(&results.get().expect("rows")), vec![5, 4]);
}
