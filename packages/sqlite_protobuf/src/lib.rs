//! SQLite scalar functions for querying protobuf-encoded blobs.
//!
//! Messages are resolved by fully qualified name against the process-wide
//! descriptor registry (`prost_reflect::DescriptorPool::global()`), so the
//! host application registers its descriptors once and every connection
//! sees them. `register_functions` installs the SQL surface:
//!
//! | function | result |
//! |---|---|
//! | `protobuf_extract(blob, name, path[, default])` | typed leaf value |
//! | `protobuf_to_json(blob, name)` / `protobuf_of_json(text, name)` | JSON bridge |
//! | `protobuf_to_text(blob, name)` / `protobuf_of_text(text, name)` | text-format bridge |
//! | `protobuf_enum_name_of_number(type, n)` / `protobuf_enum_number_of_name(type, name)` | enum labels |

mod args;
mod cache;
mod enums;
mod error;
mod extract;
mod json;
mod path;
mod text;

use rusqlite::Connection;

pub use crate::cache::{invalidate_all_caches, load_file_descriptor_set};
pub use crate::error::Error;
pub use crate::path::{Path, Step};

// 3.13.0 added SQLITE_DBCONFIG_ENABLE_LOAD_EXTENSION.
const MINIMUM_SQLITE_VERSION: i32 = 3_013_000;

/// Registers every `protobuf_*` scalar function on the connection,
/// aborting on the first registration failure.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    if rusqlite::version_number() < MINIMUM_SQLITE_VERSION {
        return Err(rusqlite::Error::UserFunctionError(
            format!(
                "sqlite_protobuf requires SQLite 3.13.0 or later, found {}",
                rusqlite::version()
            )
            .into(),
        ));
    }

    enums::register(conn)?;
    extract::register(conn)?;
    json::register(conn)?;
    text::register(conn)
}
