//! Statically declared query definitions.
//!
//! Queries to check are registered at compile time with `inventory`:
//!
//! ```ignore
//! fn find_by_name<'a>(conn: &'a TappedConn<'a>, params: &'a Parameters) -> QueryFuture<'a> {
//!     Box::pin(async move {
//!         let name = SqlParam(&params["name"]);
//!         conn.query(
//!             "/* SELECT p FROM Person p WHERE p.name = :name */ SELECT * FROM person WHERE name = $1",
//!             &[&name],
//!         )
//!         .await?;
//!         Ok(())
//!     })
//! }
//!
//! planscan::inventory::submit!(QueryDef::new(
//!     "person.find_by_name",
//!     "SELECT p FROM Person p WHERE p.name = :name",
//!     || vec![("name", "Kate".into())],
//!     find_by_name,
//! ));
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::{Parameters, QueryDefinition, TappedConn, Value};

/// Future returned by a query executor.
pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), tokio_postgres::Error>> + Send + 'a>>;

/// Runs one query through a tapped connection with the recorded parameters.
///
/// Executors issue exactly one statement, prefixed with the template as a
/// `/* ... */` comment so the capture can pair them.
pub type QueryFn = for<'a> fn(&'a TappedConn<'a>, &'a Parameters) -> QueryFuture<'a>;

/// Supplies argument values for one execution.
pub type ArgumentsFn = fn() -> Vec<(&'static str, Value)>;

/// A query registered for plan checking.
pub struct QueryDef {
    /// Unique, human-readable name (e.g. `person.find_by_name`).
    pub name: &'static str,

    /// The named-parameter template the statement was generated from.
    pub template: &'static str,

    pub arguments: ArgumentsFn,

    pub executor: QueryFn,
}

impl QueryDef {
    pub const fn new(
        name: &'static str,
        template: &'static str,
        arguments: ArgumentsFn,
        executor: QueryFn,
    ) -> Self {
        Self {
            name,
            template,
            arguments,
            executor,
        }
    }

    pub fn definition(&self) -> QueryDefinition {
        QueryDefinition::parse(self.template)
    }

    /// Supply arguments and keep the ones the template declares.
    pub fn bind(&self) -> Parameters {
        self.definition().bind((self.arguments)())
    }

    /// Every definition submitted with `inventory::submit!`, sorted by name.
    pub fn registered() -> Vec<&'static QueryDef> {
        let mut defs: Vec<_> = inventory::iter::<QueryDef>.into_iter().collect();
        defs.sort_by_key(|d| d.name);
        defs
    }
}

impl fmt::Debug for QueryDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDef")
            .field("name", &self.name)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

inventory::collect!(QueryDef);

/// An explicit, ordered set of query definitions.
#[derive(Debug, Default)]
pub struct QueryRegistry<'a> {
    defs: Vec<&'a QueryDef>,
}

impl<'a> QueryRegistry<'a> {
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Start from everything registered through `inventory`.
    pub fn collect() -> QueryRegistry<'static> {
        QueryRegistry {
            defs: QueryDef::registered(),
        }
    }

    pub fn with(mut self, def: &'a QueryDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a QueryDef> {
        self.defs.iter().copied().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a QueryDef> + '_ {
        self.defs.iter().copied()
    }
}
