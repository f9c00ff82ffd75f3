use log::{debug, error, warn};
use rusqlite::Connection;

use crate::error::TableError;
use crate::schema::{self, SetupScript};
use crate::ProtoTableSpec;

/// Ensures the `spec`ced table in `conn` is in the expected state.
///
/// When the `command_cache` slot is empty it is populated with the SQL
/// generated for `spec`; a non-empty slot must come from a prior call for
/// the same spec, and skips regeneration.
///
/// The `protobuf_extract` function must be registered on the connection,
/// and the message descriptors must be present in the global registry
/// before the view is queried.
pub fn setup_proto_table(
    command_cache: &mut Option<SetupScript>,
    conn: &Connection,
    spec: &ProtoTableSpec,
) -> Result<(), TableError> {
    let script = command_cache.get_or_insert_with(|| {
        let script = schema::generate(spec);
        if spec.log_sql {
            debug!("proto table SQL for {}:\n{script}", spec.name);
        }
        script
    });

    let result = (|| {
        conn.execute_batch(&script.schema_sql)?;

        let stale: Vec<String> = conn
            .prepare(&script.stale_index_query)?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for name in stale {
            warn!("dropping stale proto index: {name}");
            conn.execute_batch(&format!("DROP INDEX IF EXISTS \"{name}\";"))?;
        }

        Ok(())
    })();

    result.map_err(|source: rusqlite::Error| {
        // A failure inside the DDL bundle can leave the exclusive
        // transaction open; close it before surfacing the error.
        if !conn.is_autocommit() {
            let _ = conn.execute_batch("ROLLBACK TRANSACTION;");
        }
        error!("schema install failed for table {}: {source}", spec.name);
        TableError::Install {
            table: spec.name.clone(),
            source,
        }
    })
}
