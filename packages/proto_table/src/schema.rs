use std::fmt;
use std::hash::Hasher;

use siphasher::sip128::{Hasher128, SipHasher13};

use crate::{ProtoIndexSpec, ProtoTableSpec, Selector};

/// Key for the index-expression fingerprint. Changing it would rename
/// every index, orphaning (and re-building) all of them on next install.
const INDEX_FP_KEY: &[u8; 32] = b"proto table umash index fp key\0\0";

const fn key_word(offset: usize) -> u64 {
    let mut word = 0u64;
    let mut i = 0;
    while i < 8 {
        word |= (INDEX_FP_KEY[offset + i] as u64) << (8 * i);
        i += 1;
    }
    word
}

const FP_K0: u64 = key_word(0);
const FP_K1: u64 = key_word(8);

/// The SQL derived from a [`ProtoTableSpec`]: an idempotent DDL bundle
/// and the catalog query listing indexes the bundle no longer generates.
///
/// Callers hand a `&mut Option<SetupScript>` slot to
/// [`setup_proto_table`](crate::setup_proto_table) so repeated installs
/// of the same spec skip regeneration.
#[derive(Debug, Clone)]
pub struct SetupScript {
    /// `BEGIN EXCLUSIVE … COMMIT`: raw table, view, triggers, indexes.
    pub schema_sql: String,

    /// Lists `proto_index__` / `proto_autoindex__` indexes on the raw
    /// table that the bundle above did not (re)create.
    pub stale_index_query: String,
}

impl fmt::Display for SetupScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.schema_sql, self.stale_index_query)
    }
}

struct ViewColumn<'a> {
    name: &'a str,
    expression: String,
    auto_index: bool,
}

fn fingerprint(expression: &str) -> (u64, u64) {
    let mut hasher = SipHasher13::new_with_keys(FP_K0, FP_K1);
    hasher.write(expression.as_bytes());
    let hash = hasher.finish128();
    (hash.h1, hash.h2)
}

/// Joins index components, expanding those that name a view column into
/// the column's `CAST(protobuf_extract(…))` form. The literal expression
/// string is what gets fingerprinted: semantically equal expressions name
/// the same index, any textual change names a new one.
fn index_expression(columns: &[ViewColumn<'_>], components: &[String]) -> String {
    let mut expression = String::new();
    for (i, component) in components.iter().enumerate() {
        expression.push_str(if i == 0 { "\n  " } else { ",\n  " });
        match columns.iter().find(|column| column.name == component.as_str()) {
            Some(column) => expression.push_str(&column.expression),
            None => expression.push_str(component),
        }
    }
    expression
}

fn create_index(
    statements: &mut String,
    names: &mut Vec<String>,
    table: &str,
    columns: &[ViewColumn<'_>],
    index: &ProtoIndexSpec,
    auto: bool,
) {
    let expression = index_expression(columns, &index.components);
    let (hi, lo) = fingerprint(&expression);
    let name = format!(
        "proto_{}index__{}__{}__{:016x}{:016x}",
        if auto { "auto" } else { "" },
        table,
        index.name_suffix,
        hi,
        lo
    );

    // `IF NOT EXISTS` re-uses the index when nothing changed; a renamed
    // index is built fresh and its predecessor shows up as stale.
    statements.push_str(&format!(
        "CREATE INDEX IF NOT EXISTS {name}\nON {table}_raw({expression}\n);\n"
    ));
    names.push(name);
}

pub(crate) fn generate(spec: &ProtoTableSpec) -> SetupScript {
    let table = &spec.name;

    let view_columns: Vec<ViewColumn<'_>> = spec
        .columns
        .iter()
        .map(|column| ViewColumn {
            name: &column.name,
            expression: format!(
                "CAST(protobuf_extract(proto, '{}', '{}', NULL) AS {})",
                spec.message_name, column.path, column.sql_type
            ),
            auto_index: column.selector == Selector::Strong,
        })
        .collect();

    // The raw table is created only if missing: it holds the data.
    let create_raw = format!(
        "CREATE TABLE IF NOT EXISTS {table}_raw (\n\
         \x20 id INTEGER PRIMARY KEY ASC NOT NULL,\n\
         \x20 proto BLOB NOT NULL\n\
         );"
    );

    let mut column_names = String::new();
    let mut column_expressions = String::new();
    for view in &view_columns {
        column_names.push_str(&format!(",\n  {}", view.name));
        column_expressions.push_str(&format!(",\n  {}", view.expression));
    }

    // The view holds no data, so dropping and re-creating it is safe.
    let create_view = format!(
        "DROP VIEW IF EXISTS {table};\n\
         CREATE VIEW {table} (\n\
         \x20 id,\n\
         \x20 proto{column_names}\n\
         ) AS SELECT\n\
         \x20 id,\n\
         \x20 proto{column_expressions}\n\
         FROM {table}_raw;"
    );

    // Same for the triggers that map view mutations onto the raw table.
    let create_triggers = format!(
        "DROP TRIGGER IF EXISTS {table}_insert;\n\
         CREATE TRIGGER {table}_insert INSTEAD OF INSERT ON {table}\n\
         BEGIN\n\
         \x20 INSERT INTO {table}_raw(proto) VALUES(NEW.proto);\n\
         END;\n\
         DROP TRIGGER IF EXISTS {table}_update;\n\
         CREATE TRIGGER {table}_update INSTEAD OF UPDATE OF proto ON {table}\n\
         BEGIN\n\
         \x20 UPDATE {table}_raw SET proto = NEW.proto WHERE id = OLD.id;\n\
         END;\n\
         DROP TRIGGER IF EXISTS {table}_delete;\n\
         CREATE TRIGGER {table}_delete INSTEAD OF DELETE ON {table}\n\
         BEGIN\n\
         \x20 DELETE FROM {table}_raw WHERE id = OLD.id;\n\
         END;"
    );

    let mut create_indexes = String::new();
    let mut index_names = Vec::new();

    for view in &view_columns {
        if !view.auto_index {
            continue;
        }
        let index = ProtoIndexSpec::new(view.name, &[view.name]);
        create_index(
            &mut create_indexes,
            &mut index_names,
            table,
            &view_columns,
            &index,
            true,
        );
    }

    for index in &spec.indexes {
        create_index(
            &mut create_indexes,
            &mut index_names,
            table,
            &view_columns,
            index,
            false,
        );
    }

    let known_names = if index_names.is_empty() {
        "''".to_owned()
    } else {
        index_names
            .iter()
            .map(|name| format!("'{name}'"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    // Any proto index on the raw table that we did not just generate is
    // left over from an earlier schema and may refer to now-unknown
    // fields; the installer drops whatever this query returns.
    let stale_index_query = format!(
        "SELECT name FROM sqlite_master WHERE\n\
         \x20 type = 'index' AND tbl_name = '{table}_raw' AND\n\
         \x20 (name LIKE 'proto_index__%' OR name LIKE 'proto_autoindex__%') AND\n\
         \x20 name NOT IN ({known_names});"
    );

    let schema_sql = format!(
        "BEGIN EXCLUSIVE TRANSACTION;\n\
         {create_raw}\n\
         {create_view}\n\
         \n\
         {create_triggers}\n\
         {create_indexes}\
         COMMIT TRANSACTION;\n"
    );

    SetupScript {
        schema_sql,
        stale_index_query,
    }
}
