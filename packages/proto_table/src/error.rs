use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("failed to install proto table {table}")]
    Install {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A row's proto blob did not parse as the expected message type.
    #[error("could not parse protobuf payload for row {id}")]
    MalformedRow { id: i64 },

    #[error("result list capacity overflow")]
    CapacityOverflow,

    #[error("failed to grow result list")]
    OutOfMemory(#[from] std::collections::TryReserveError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
