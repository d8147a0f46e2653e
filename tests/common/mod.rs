#![allow(dead_code)]

use indexmap::IndexMap;
use rusqlite::Connection;
use serde_json::Value as Json;
use stepwise::operation::{self, TrackFields};
use stepwise::{
    ActionReport, Clause, Direction, Expr, FilterQuery, FullTextClause, IndexGroup, Input, LikeClause, Lookup,
    OrderByClause, Param, ProposedRow, QueryTracker, RawClause, RefTable, RegularClause, RegularFilter, Settings,
    Stepwise, StepwiseDefinition, Store, row,
};

pub const ID: &str = "BIGINT(20) UNSIGNED NOT NULL";
pub const RELEVANCE: &str = "product_search_term_relevance";

pub fn stubs() -> IndexMap<String, String> {
    [("prefix", "_cache1_"), ("websiteId", "1")].into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn lookups() -> Vec<Lookup> {
    let allergen = Lookup::builder("allergen", "%prefix%product_search_%websiteId%_product_allergens")
        .fields(["product_id", "product_allergen_id", "maker_id"])
        .primary_key(["product_id", "product_allergen_id"])
        .index(IndexGroup::new(["maker_id"]))
        .build()
        .expect("allergen lookup");
    let maker = Lookup::builder("maker", "%prefix%product_search_%websiteId%_product_maker")
        .fields(["product_id", "maker_id"])
        .primary_key(["product_id"])
        .index(IndexGroup::new(["maker_id"]))
        .build()
        .expect("maker lookup");
    let price = Lookup::builder("price", "%prefix%product_search_%websiteId%_product_prices")
        .fields(["product_id", "product_price", "maker_id"])
        .primary_key(["product_id"])
        .index(IndexGroup::new(["product_price", "maker_id"]))
        .build()
        .expect("price lookup");
    let text = Lookup::builder("text", "%prefix%product_search_%websiteId%_product_text")
        .fields(["product_id", "product_text", "maker_id"])
        .primary_key(["product_id"])
        .index(IndexGroup::new(["maker_id"]))
        .fulltext(IndexGroup::new(["product_text"]))
        .field_definition("product_id", ID)
        .field_definition("maker_id", ID)
        .field_definition("product_text", "VARCHAR(255) NULL DEFAULT NULL")
        .field_definition(RELEVANCE, "DECIMAL(20, 15) NOT NULL")
        .build()
        .expect("text lookup");
    vec![allergen, maker, price, text]
}

/// Products refined by maker, allergens, price, a search term and the
/// user's favourites.
pub fn product_search() -> StepwiseDefinition {
    let mut builder = StepwiseDefinition::builder("products")
        .primary_key(["product_id"])
        .field("product_id", ID)
        .field("maker_id", ID)
        .field("product_allergen_id", "SMALLINT(6) UNSIGNED NOT NULL")
        .field("product_price", "DECIMAL(18, 3) UNSIGNED NOT NULL")
        .field("product_random_score", "DECIMAL(17, 16) NOT NULL");
    for lookup in lookups() {
        builder = builder.lookup(lookup);
    }
    builder
        .filter("makerFilter", vec![Param::list("makerIds")], |ctx, args| {
            let clause = RegularClause::equals("maker_id", args.list("makerIds"));
            let filter = RegularFilter::new(RefTable::Lookup("maker")).link("product_id").clause_set([clause.into()]);
            ctx.regular_filter(filter, args)
        })
        .filter("allergenFilter", vec![Param::list("allergenIds")], |ctx, args| {
            let sets = RegularClause::build_clause_sets("product_allergen_id", &args.list("allergenIds"));
            let filter =
                RegularFilter::new(RefTable::Lookup("allergen")).link("product_id").clause_sets(sets).chained();
            ctx.regular_filter(filter, args)
        })
        .filter("priceFilter", vec![Param::value("minPrice"), Param::value("maxPrice")], |ctx, args| {
            let clause =
                RegularClause::build_range("product_price", args.f64("minPrice"), args.f64("maxPrice"), Some(0.0), None);
            let filter =
                RegularFilter::new(RefTable::Lookup("price")).link("product_id").clause_set(clause.map(Clause::from));
            ctx.regular_filter(filter, args)
        })
        .filter("textFilter", vec![Param::value("searchTerm")], |ctx, args| {
            let term = args.str("searchTerm").filter(|t| !t.is_empty()).map(str::to_string);
            let full_text = term
                .as_ref()
                .filter(|_| args.allow_alter)
                .map(|t| Clause::from(FullTextClause::new(vec!["product_text"], t.clone(), true)));
            let mut tracks = TrackFields::new();
            for field in ["product_id", "product_text", "maker_id"] {
                tracks.insert(field.to_string(), Some(Expr::field(field)));
            }
            tracks.insert(RELEVANCE.to_string(), full_text.clone().map(Expr::Clause));
            let links = operation::links(&["product_id"]);
            if args.action_check {
                return Ok(Some(ActionReport { alters: full_text.is_some(), tracks, links }));
            }

            let source = ctx.current_relation();
            let destination = ctx.new_temp_table(&tracks, &links, None)?;
            let clauses: Vec<Clause> = full_text.into_iter().collect();
            ctx.run_filter_query(FilterQuery {
                source,
                reference: RefTable::Lookup("text"),
                destination,
                links: &links,
                extra: &tracks,
                clauses: &clauses,
                left_join: false,
            })?;
            if let Some(term) = term.filter(|_| args.allow_alter) {
                tracks.insert(RELEVANCE.to_string(), Some(Expr::Clause(RawClause::null().into())));
                let like = [Clause::from(LikeClause::new("product_text", Some(format!("%{}%", LikeClause::esc(&term)))))];
                ctx.run_filter_query(FilterQuery {
                    source,
                    reference: RefTable::Lookup("text"),
                    destination,
                    links: &links,
                    extra: &tracks,
                    clauses: &like,
                    left_join: false,
                })?;
            }
            ctx.use_relation(destination)?;
            Ok(None)
        })
        .filter("favouritesFilter", vec![Param::value("favourites")], |ctx, args| {
            let Some(user_id) = ctx.value("userId").cloned() else {
                return Ok(None);
            };
            if !args.flag("favourites") {
                return Ok(None);
            }
            let filter = RegularFilter::new(RefTable::Table("user_favourites"))
                .link("product_id")
                .clause_set([Clause::eq("user_id", user_id)]);
            ctx.regular_filter(filter, args)
        })
        .filter("randomScoreFilter", Vec::new(), |ctx, args| {
            let filter = RegularFilter::new(RefTable::Lookup("maker"))
                .link("product_id")
                .track("product_random_score", Some(Expr::Clause(RawClause::new("RAND()").into())));
            ctx.regular_filter(filter, args)
        })
        .fallback(|ctx, args| {
            ctx.regular_filter(RegularFilter::new(RefTable::Lookup("maker")).link("product_id").force_alter(), args)
        })
        .order_by_alias(
            "relevance",
            vec![
                OrderByClause::new([RELEVANCE], "`%table%`.`product_search_term_relevance`", Direction::Desc),
                OrderByClause::new(["product_id"], "`%table%`.`product_id`", Direction::Desc),
            ],
        )
        .order_by_alias(
            "fallback",
            vec![OrderByClause::new(["product_id"], "`%table%`.`product_id`", Direction::Asc)],
        )
        .build()
        .expect("product search definition")
}

pub fn input(json: Json) -> Input {
    Input::from_json(json)
}

/// An engine rendering MySQL statements into `tracker` without running them.
pub fn traced<'a>(conn: &'a Connection, definition: &'a StepwiseDefinition, tracker: &QueryTracker) -> Stepwise<'a> {
    let store = Store::with_settings(conn, Settings::mysql_trace());
    let mut search = Stepwise::new(definition, store);
    search
        .test_mode(true)
        .and_then(|s| s.query_tracker(Some(tracker.clone())))
        .and_then(|s| s.set_value("userId", 99))
        .and_then(|s| s.stub_replacements(stubs()))
        .expect("configure traced search");
    search
}

/// An engine executing against `conn`.
pub fn executing<'a>(conn: &'a Connection, definition: &'a StepwiseDefinition) -> Stepwise<'a> {
    let mut search = Stepwise::new(definition, Store::new(conn));
    search
        .test_mode(true)
        .and_then(|s| s.set_value("userId", 99))
        .and_then(|s| s.stub_replacements(stubs()))
        .expect("configure search");
    search
}

pub struct Product {
    pub id: i64,
    pub maker: i64,
    pub price: f64,
    pub text: &'static str,
    pub allergens: &'static [i64],
}

pub const PRODUCTS: &[Product] = &[
    Product { id: 1, maker: 5, price: 20.0, text: "oat biscuits", allergens: &[1] },
    Product { id: 2, maker: 5, price: 60.0, text: "peanut butter biscuits", allergens: &[1, 2] },
    Product { id: 3, maker: 10, price: 80.0, text: "salted peanuts", allergens: &[2] },
    Product { id: 4, maker: 10, price: 120.0, text: "dark chocolate", allergens: &[] },
    Product { id: 5, maker: 7, price: 45.5, text: "milk chocolate with peanuts", allergens: &[1, 2, 3] },
];

fn sync(store: &Store, definition: &StepwiseDefinition, name: &str, rows: Vec<ProposedRow>) {
    let table = definition.lookup(name).expect("lookup").resolve(&stubs()).expect("resolve");
    table.create_primary_table(store).expect("create lookup table");
    let mut session = table.start_populate(store).expect("start populate");
    session.will_update_everything().expect("will update");
    session.add_rows(rows).expect("add rows");
    session.finish().expect("finish populate");
}

/// Creates and fills every lookup table of [`product_search`] from [`PRODUCTS`].
pub fn seed(conn: &Connection, definition: &StepwiseDefinition) {
    let store = Store::new(conn);
    sync(
        &store,
        definition,
        "maker",
        PRODUCTS.iter().map(|p| row! { "product_id" => p.id, "maker_id" => p.maker }).collect(),
    );
    sync(
        &store,
        definition,
        "price",
        PRODUCTS
            .iter()
            .map(|p| row! { "product_id" => p.id, "product_price" => p.price, "maker_id" => p.maker })
            .collect(),
    );
    sync(
        &store,
        definition,
        "text",
        PRODUCTS.iter().map(|p| row! { "product_id" => p.id, "product_text" => p.text, "maker_id" => p.maker }).collect(),
    );
    sync(
        &store,
        definition,
        "allergen",
        PRODUCTS
            .iter()
            .flat_map(|p| {
                p.allergens.iter().map(move |a| {
                    row! { "product_id" => p.id, "product_allergen_id" => *a, "maker_id" => p.maker }
                })
            })
            .collect(),
    );
    conn.execute_batch(
        "CREATE TABLE user_favourites (user_id INTEGER NOT NULL, product_id INTEGER NOT NULL, PRIMARY KEY (user_id, product_id));
         INSERT INTO user_favourites VALUES (99, 2), (99, 4), (12, 1);",
    )
    .expect("favourites table");
}

/// Product ids of a result set, sorted.
pub fn ids(rows: &[stepwise::Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .filter_map(|row| match row.get("product_id") {
            Some(rusqlite::types::Value::Integer(id)) => Some(*id),
            _ => None,
        })
        .collect();
    ids.sort_unstable();
    ids
}
