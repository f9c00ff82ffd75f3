//! Declarative protobuf-backed tables over SQLite.
//!
//! A proto table is a view over a raw table with two columns: an integer
//! primary key `id` and a `proto` blob of protobuf bytes. From a
//! [`ProtoTableSpec`] this crate derives the view (one column per
//! extracted protopath), INSTEAD OF triggers routing mutations to the raw
//! table, and functional indexes over the extraction expressions so
//! selecting by extracted value stays reasonably efficient.
//!
//! Index names embed a keyed fingerprint of their expression, which makes
//! schema evolution mechanical: changing a column's path re-creates its
//! index under a new name, and [`setup_proto_table`] drops whatever
//! `proto_index__`/`proto_autoindex__` names it no longer generates.
//!
//! The `protobuf_extract` SQL function must be registered on the
//! connection (see the `sqlite_protobuf` crate) before installing a spec
//! or querying the view.
//!
//! ```no_run
//! use proto_table::{setup_proto_table, ProtoColumn, ProtoTableSpec, SetupScript};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = rusqlite::Connection::open("people.db")?;
//! sqlite_protobuf::register_functions(&conn)?;
//!
//! let spec = ProtoTableSpec {
//!     name: "people".to_owned(),
//!     message_name: "people.Person".to_owned(),
//!     columns: vec![
//!         ProtoColumn::new("name", "TEXT", "$.name"),
//!         ProtoColumn::new("note", "TEXT", "$.note").weak(),
//!     ],
//!     ..Default::default()
//! };
//!
//! let mut cache: Option<SetupScript> = None;
//! setup_proto_table(&mut cache, &conn, &spec)?;
//!
//! conn.execute("INSERT INTO people(proto) VALUES (?1)", [&b"..."[..]])?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod error;
mod install;
mod rows;
mod schema;

pub use crate::batch::{ProtoDb, DEFAULT_BATCH_SIZE};
pub use crate::error::TableError;
pub use crate::install::setup_proto_table;
pub use crate::rows::{paginate, populate, write_row, write_rows, ResultList, ResultRow};
pub use crate::schema::SetupScript;

/// Describes a view built on top of a raw table (`<name>_raw`) holding
/// protobuf-encoded rows.
#[derive(Debug, Clone, Default)]
pub struct ProtoTableSpec {
    /// The view's name; the raw table and all indexes are prefixed with it.
    pub name: String,

    /// Fully qualified protobuf message type of all rows.
    pub message_name: String,

    /// Extracted view columns, in view order.
    pub columns: Vec<ProtoColumn>,

    /// Additional indexes on the raw table, beyond the automatic
    /// per-column ones.
    pub indexes: Vec<ProtoIndexSpec>,

    /// Log the generated schema SQL whenever it is built from scratch.
    pub log_sql: bool,
}

/// One view column obtained by extracting a protopath from the row's blob.
#[derive(Debug, Clone)]
pub struct ProtoColumn {
    pub name: String,

    /// The SQL type of the column (e.g. `TEXT` or `INTEGER`).
    /// `protobuf_extract` is opaque to the query planner, so the view
    /// wraps it in a `CAST` to provide explicit type information.
    pub sql_type: String,

    /// The protopath passed to `protobuf_extract`.
    pub path: String,

    pub selector: Selector,
}

impl ProtoColumn {
    pub fn new(name: &str, sql_type: &str, path: &str) -> ProtoColumn {
        ProtoColumn {
            name: name.to_owned(),
            sql_type: sql_type.to_owned(),
            path: path.to_owned(),
            selector: Selector::Strong,
        }
    }

    /// Marks the column as a weak selector.
    pub fn weak(mut self) -> ProtoColumn {
        self.selector = Selector::Weak;
        self
    }
}

/// Whether rows will be selected by this column on its own.
///
/// A strong selector (the default) gets an automatic index on its
/// expression. A weak selector is not indexed automatically but may still
/// appear in explicit indexes. It is easier to remove an index than to
/// add one, and the only cost of a needlessly strong column is a constant
/// factor on writes, so default to strong until there is a reason not to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selector {
    #[default]
    Strong,
    Weak,
}

/// An additional index on the raw table. Components naming a view column
/// are expanded to that column's extraction expression; any other
/// component is passed through verbatim as an index expression.
#[derive(Debug, Clone)]
pub struct ProtoIndexSpec {
    /// Distinguishes this index in the generated name.
    pub name_suffix: String,

    pub components: Vec<String>,
}

impl ProtoIndexSpec {
    pub fn new(name_suffix: &str, components: &[&str]) -> ProtoIndexSpec {
        ProtoIndexSpec {
            name_suffix: name_suffix.to_owned(),
            components: components.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
}
