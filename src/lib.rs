//! Stepwise – progressive, cache-aware search refinement over relational data.
//!
//! A search is declared once as a [`StepwiseDefinition`]: its fields, the
//! lookup tables filters read from, and a set of named filter operations. A
//! [`Stepwise`] engine runs one search over it:
//!
//! * every operation is first asked what it *would* do with the input (an
//!   [`ActionReport`]), without touching the store;
//! * each *tag* (a `+name` / `-name` selection of operations, `all` always
//!   present) gets a plan, ordered so that operations used by many tags run
//!   first;
//! * each plan step is fingerprinted from everything that makes it unique.
//!   Steps with the same fingerprint run once and are shared between tags, each
//!   one materialised as a temporary table derived from the previous one.
//!
//! The [`Results`] reader then selects a tag's rows with extra clauses,
//! ordering and paging.
//!
//! Lookup tables are flattened caches the filters join against. A
//! [`PopulateSession`] keeps one in sync with proposed rows by diffing them
//! batch by batch, using a comparison table of primary keys to find the rows
//! nobody proposed any more.
//!
//! ## Modules
//! * [`clause`] and [`range`] – predicates rendered against aliased tables.
//! * [`temp_table`], [`filter_reference`], [`fingerprint`] – derived relations
//!   and the memoized steps owning them.
//! * [`plan`], [`step`], [`search`] – planning and running a search.
//! * [`lookup`], [`populate`] – lookup tables and their synchronisation.
//! * [`store`], [`dialect`], [`tracker`] – statement generation, execution and tracing.
//! * [`settings`] – configuration and logging setup.
//!
//! ## Statement tracing
//! Every statement passes through a [`Store`]. With a [`QueryTracker`]
//! attached each one is recorded with its values and whether it ran, so the
//! generated SQL can be asserted with `run_queries` switched off.
//!
//! ## Quick Start
//! ```
//! use rusqlite::Connection;
//! use stepwise::{Lookup, RefTable, RegularFilter, Settings, Stepwise, StepwiseDefinition, Store, row};
//!
//! let maker = Lookup::builder("maker", "maker_lookup")
//!     .fields(["product_id", "maker_id"])
//!     .primary_key(["product_id"])
//!     .build()
//!     .unwrap();
//! let definition = StepwiseDefinition::builder("products")
//!     .primary_key(["product_id"])
//!     .field("product_id", "INTEGER NOT NULL")
//!     .field("maker_id", "INTEGER NOT NULL")
//!     .lookup(maker)
//!     .fallback(|ctx, args| {
//!         ctx.regular_filter(RegularFilter::new(RefTable::Lookup("maker")).link("product_id").force_alter(), args)
//!     })
//!     .build()
//!     .unwrap();
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let store = Store::with_settings(&conn, Settings::default());
//! let table = definition.lookup("maker").unwrap().resolve(&Default::default()).unwrap();
//! table.create_primary_table(&store).unwrap();
//! let mut session = table.start_populate(&store).unwrap();
//! session.will_update_everything().unwrap();
//! session.add_rows(vec![row! { "product_id" => 1, "maker_id" => 7 }]).unwrap();
//! session.finish().unwrap();
//!
//! let mut search = Stepwise::new(&definition, store);
//! search.search().unwrap();
//! assert_eq!(search.results().unwrap().get().unwrap().len(), 1);
//! ```

pub mod clause;
pub mod definition;
pub mod dialect;
pub mod error;
pub mod filter_reference;
pub mod fingerprint;
pub mod input;
pub mod lookup;
pub mod operation;
pub mod plan;
pub mod populate;
pub mod range;
pub mod relation;
pub mod results;
pub mod search;
pub mod settings;
pub mod step;
pub mod store;
pub mod temp_table;
pub mod tracker;
pub mod value;

pub use clause::{Clause, ClauseSet, FullTextClause, LikeClause, RawClause, RegularClause};
pub use definition::{Direction, OrderByClause, StepwiseDefinition, StepwiseDefinitionBuilder};
pub use dialect::Dialect;
pub use error::{ErrorCategory, Result, StepwiseError};
pub use input::Input;
pub use lookup::{IndexGroup, Lookup, LookupTable};
pub use operation::{ActionReport, Expr, FilterArgs, Links, Param, TrackFields};
pub use populate::{PopulateSession, SyncSummary};
pub use results::Results;
pub use search::Stepwise;
pub use settings::{Settings, init_logging};
pub use step::{FilterQuery, RefTable, RegularFilter, StepContext};
pub use store::Store;
pub use tracker::QueryTracker;
pub use value::{ProposedRow, Row, RowValue};
