//! Metarepo – a schema-less metadata repository on a fixed relational schema.
//!
//! Callers define named, typed attributes once and attach vectors of values
//! of those attributes to *units*. New attributes never change the schema:
//! every value lives in one of seven per-type vector tables, addressed
//! through a value vector id that maps it to a unit and an attribute.
//!
//! * A [`unit::Unit`] is identified by `(tenant, id)` and carries a
//!   correlation id, an optional name, a lifecycle [`unit::Status`], its
//!   attributes, locks and associations.
//! * An [`attribute::Attribute`] binds a catalog attribute
//!   ([`catalog::AttributeInfo`]) to one [`datatype::Value`].
//! * A [`datatype::Value`] is a tagged union of typed
//!   [`datatype::Vector`]s that know whether they are new or modified
//!   since loaded, so that storing a unit writes only what changed.
//!
//! ## Modules
//! * [`datatype`] – attribute types, value vectors and their persistence.
//! * [`catalog`] – the known attributes.
//! * [`attribute`], [`unit`] – the entity model.
//! * [`lock`], [`association`] – locks and links between units.
//! * [`search`], [`compiler`], [`adapter`] – search constraints and their
//!   compilation into SQL for a particular engine.
//! * [`cache`] – the in-process unit cache and its sweeper.
//! * [`persist`] – the SQLite schema, statements and transaction handling.
//! * [`repository`] – the entry point tying it all together.
//!
//! ## Searching
//! A [`search::SearchExpression`] is a tree of [`search::SearchItem`]s
//! combined with AND, OR and NOT. It compiles into a single statement that
//! selects unit identities. String comparisons ignore case and turn into
//! LIKE when the operand holds `*`, `%` or `_`. An adjustable time equality such
//! as `2024-01-23` matches the whole day.
//!
//! ## Quick Start
//! ```
//! use metarepo::datatype::Type;
//! use metarepo::repository::Repository;
//! use metarepo::search::{Operator, SearchData, SearchExpression, SearchItem};
//!
//! let repo = Repository::in_memory().unwrap();
//! let title = repo.define_attribute("dc:title", Type::String, false).unwrap();
//!
//! let mut unit = repo.create_unit(1, Some("first"));
//! unit.attribute_or_create(&repo, "dc:title").unwrap()
//!     .vector_mut::<String>().unwrap()
//!     .push("Hello".to_string());
//! unit.store(&repo).unwrap();
//!
//! let item = SearchItem::attribute_from_str(&title, Operator::Eq, "hel*").unwrap();
//! let data = SearchData::new(SearchExpression::from(SearchItem::tenant(1)).and(item));
//! assert_eq!(repo.search(&data).unwrap().units.len(), 1);
//! ```
//!
//! ## Configuration
//! See [`config::Configuration`]. Logging goes through `tracing`; install a
//! subscriber to see it.

use seahash::SeaHasher;
use std::hash::BuildHasherDefault;

pub mod adapter;
pub mod association;
pub mod attribute;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod datatype;
pub mod error;
pub mod lock;
pub mod persist;
pub mod repository;
pub mod search;
pub mod unit;

// we will use a fast hashing algo for hashmaps keyed by names
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub use error::{RepoError, Result};
pub use repository::{Repository, SearchResult};
pub use unit::{Status, Unit, UnitRef};
