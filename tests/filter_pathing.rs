mod common;

use rusqlite::Connection;
use serde_json::json;
use stepwise::{
    Direction, ErrorCategory, Lookup, QueryTracker, RefTable, RegularClause, RegularFilter, Settings, Stepwise,
    StepwiseDefinition, StepwiseError, Store,
};

fn seeded() -> (Connection, StepwiseDefinition) {
    let conn = Connection::open_in_memory().expect("connection");
    let definition = common::product_search();
    common::seed(&conn, &definition);
    (conn, definition)
}

fn found(conn: &Connection, definition: &StepwiseDefinition, input: serde_json::Value) -> Vec<i64> {
    let mut search = common::executing(conn, definition);
    search.input(common::input(input)).expect("input");
    search.search().expect("search");
    let rows = search.results().expect("results").get().expect("rows");
    common::ids(&rows)
}

#[test]
fn refinements_narrow_the_products() {
    let (conn, definition) = seeded();
    assert_eq!(found(&conn, &definition, json!({})), vec![1, 2, 3, 4, 5]);
    assert_eq!(found(&conn, &definition, json!({ "makerIds": [5] })), vec![1, 2]);
    assert_eq!(found(&conn, &definition, json!({ "makerIds": [5, 7] })), vec![1, 2, 5]);
    assert_eq!(found(&conn, &definition, json!({ "allergenIds": [1, 2] })), vec![2, 5]);
    assert_eq!(found(&conn, &definition, json!({ "minPrice": 50 })), vec![2, 3, 4]);
    assert_eq!(found(&conn, &definition, json!({ "minPrice": 40, "maxPrice": 80 })), vec![2, 3, 5]);
    assert_eq!(found(&conn, &definition, json!({ "searchTerm": "peanut" })), vec![2, 3, 5]);
    assert_eq!(found(&conn, &definition, json!({ "favourites": 1 })), vec![2, 4]);
    assert_eq!(found(&conn, &definition, json!({ "makerIds": [5, 10], "allergenIds": [2] })), vec![2, 3]);
}

#[test]
fn empty_lists_do_not_filter() {
    let (conn, definition) = seeded();
    assert_eq!(found(&conn, &definition, json!({ "makerIds": [], "allergenIds": null })), vec![1, 2, 3, 4, 5]);
}

#[test]
fn tags_read_their_own_rows() {
    let (conn, definition) = seeded();
    let tracker = QueryTracker::new();
    let mut search = common::executing(&conn, &definition);
    search
        .query_tracker(Some(tracker.clone()))
        .and_then(|s| s.input(common::input(json!({ "allergenIds": [2], "makerIds": [5] }))))
        .and_then(|s| s.tag("beforeMakers", ["-makerFilter"]))
        .and_then(|s| s.tag("makersOnly", ["-allFilters", "+makerFilter"]))
        .expect("configure");
    search.search().expect("search");

    let mut results = search.results().expect("results");
    assert_eq!(common::ids(&results.get().expect("all")), vec![2]);
    results.use_tag("beforeMakers").expect("tag");
    assert_eq!(common::ids(&results.get().expect("before makers")), vec![2, 3, 5]);
    results.use_tag("makersOnly").expect("tag");
    assert_eq!(common::ids(&results.get().expect("makers only")), vec![1, 2]);

    // the maker step is shared by `all` and `makersOnly`
    let creates = tracker.queries().iter().filter(|q| q.query.starts_with("CREATE TEMP TABLE")).count();
    assert_eq!(creates, 3);
    assert!(tracker.queries().iter().all(|q| q.executed));
}

#[test]
fn search_runs_once() {
    let (conn, definition) = seeded();
    let mut search = common::executing(&conn, &definition);
    search.search().expect("search");
    let err = search.search().unwrap_err();
    assert!(matches!(err, StepwiseError::SearchAlreadyRun { .. }));
    assert_eq!(err.category(), ErrorCategory::Lifecycle);
    assert!(matches!(search.track_field("maker_id").err(), Some(StepwiseError::SearchAlreadyRun { .. })));
    assert!(matches!(search.tag("x", ["+makerFilter"]).err(), Some(StepwiseError::SearchAlreadyRun { .. })));
}

#[test]
fn results_wait_for_the_search() {
    let (conn, definition) = seeded();
    let search = common::executing(&conn, &definition);
    assert!(matches!(search.results().err(), Some(StepwiseError::SearchPending { .. })));
    assert!(matches!(search.plan().unwrap_err(), StepwiseError::SearchPending { .. }));
}

#[test]
fn test_helpers_need_test_mode() {
    let (conn, definition) = seeded();
    let mut search = Stepwise::new(&definition, Store::new(&conn));
    search.stub_replacements(common::stubs()).expect("stubs");
    search.search().expect("search");
    assert!(matches!(search.filter_ref_tags().unwrap_err(), StepwiseError::NotInTestMode { .. }));
    assert!(matches!(search.tag_table_name("all").unwrap_err(), StepwiseError::NotInTestMode { .. }));
    let name = search.results().expect("results").table_name().map(str::to_string).expect("relation");
    assert!(name.starts_with("temp_precache_lookup_"));
}

#[test]
fn unknown_tags_and_aliases() {
    let (conn, definition) = seeded();

    let mut search = common::executing(&conn, &definition);
    search.tag("broken", ["makerFilter"]).expect("tag");
    let err = search.search().unwrap_err();
    assert!(matches!(err, StepwiseError::InvalidFilterAlias { ref alias } if alias == "makerFilter"));
    assert_eq!(err.category(), ErrorCategory::Planning);

    let mut search = common::executing(&conn, &definition);
    search.tag("broken", ["+colourFilter"]).expect("tag");
    assert!(matches!(search.search().unwrap_err(), StepwiseError::FilterNotFound { ref name } if name == "colourFilter"));

    let mut search = common::executing(&conn, &definition);
    search.search().expect("search");
    assert!(matches!(search.tagged_reference("missing").err(), Some(StepwiseError::FilterTagNotFound { .. })));
    assert!(matches!(search.results().expect("results").use_tag("missing").err(), Some(StepwiseError::FilterTagNotFound { .. })));
}

#[test]
fn unknown_order_by_is_rejected() {
    let (conn, definition) = seeded();
    let mut search = common::executing(&conn, &definition);
    search.order_by("colour", Direction::Asc).expect("order");
    assert!(matches!(search.search().unwrap_err(), StepwiseError::InvalidOrderBy { ref name } if name == "colour"));
}

#[test]
fn stopped_input_reads_as_empty() {
    let (conn, definition) = seeded();
    let tracker = QueryTracker::new();
    let mut search = common::executing(&conn, &definition);
    search
        .query_tracker(Some(tracker.clone()))
        .and_then(|s| s.input(common::input(json!({})).with_can_proceed(|input| input.has("searchTerm"))))
        .expect("configure");
    search.search().expect("search");
    assert!(!search.proceeded());
    assert!(tracker.is_empty());
    let mut results = search.results().expect("results");
    assert!(results.get().expect("rows").is_empty());
    assert_eq!(results.count().expect("count"), 0);
    assert_eq!(results.table_name(), None);
}

fn maker_only(with_colour: bool) -> StepwiseDefinition {
    let mut maker = Lookup::builder("maker", "maker_lookup").primary_key(["product_id"]);
    maker = if with_colour { maker.fields(["product_id", "maker_id", "colour"]) } else { maker.fields(["product_id", "maker_id"]) };
    StepwiseDefinition::builder("makers")
        .primary_key(["product_id"])
        .field("product_id", "INTEGER NOT NULL")
        .field("maker_id", "INTEGER NOT NULL")
        .lookup(maker.build().expect("lookup"))
        .filter("makerFilter", vec![stepwise::Param::list("makerIds")], |ctx, args| {
            let clause = RegularClause::equals("maker_id", args.list("makerIds"));
            ctx.regular_filter(RegularFilter::new(RefTable::Lookup("maker")).link("product_id").clause_set([clause.into()]), args)
        })
        .build()
        .expect("definition")
}

#[test]
fn a_tag_needs_an_altering_step() {
    let conn = Connection::open_in_memory().expect("connection");
    let definition = maker_only(false);
    let mut search = Stepwise::new(&definition, Store::new(&conn));
    let err = search.search().unwrap_err();
    assert!(matches!(err, StepwiseError::EmptyTagAfterPlanning { ref tag } if tag == "all"));
}

#[test]
fn tracked_fields_need_a_definition() {
    let conn = Connection::open_in_memory().expect("connection");
    let definition = maker_only(true);
    let store = Store::with_settings(&conn, Settings::mysql_trace());
    let mut search = Stepwise::new(&definition, store);
    search
        .input(common::input(json!({ "makerIds": [1] })))
        .and_then(|s| s.track_field("colour"))
        .expect("configure");
    let err = search.search().unwrap_err();
    assert!(matches!(err, StepwiseError::UntrackableField { ref field } if field == "colour"));
    assert_eq!(err.category(), ErrorCategory::Execution);
}

#[test]
fn dropping_the_engine_drops_its_relations() {
    let (conn, definition) = seeded();
    {
        let mut search = common::executing(&conn, &definition);
        search.input(common::input(json!({ "allergenIds": [1, 2] }))).expect("input");
        search.search().expect("search");
        let temp_tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_temp_master WHERE type = 'table' AND name LIKE 'temp_table_%'", [], |r| r.get(0))
            .expect("count");
        assert_eq!(temp_tables, 2);
    }
    let temp_tables: i64 = conn
        .query_row("SELECT COUNT(*) FROM sqlite_temp_master WHERE type = 'table' AND name LIKE 'temp_table_%'", [], |r| r.get(0))
        .expect("count");
    assert_eq!(temp_tables, 0);
}
