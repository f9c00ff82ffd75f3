use log::error;
use rusqlite::Connection;

/// Try to autocommit after this many write operations by default.
///
/// High enough to amortise the commit overhead (fsync), low enough that
/// the write journal stays within the page cache.
pub const DEFAULT_BATCH_SIZE: u32 = 20_000;

/// A SQLite handle with reentrant transaction counters.
///
/// Protobuf-heavy workloads tend to issue many small writes, which makes
/// transactions essential for throughput. This wrapper lets callers open
/// overlapping (not necessarily nested) logical transactions: the real
/// SQLite transaction only changes state on the 0↔1 depth transitions.
///
/// Frames opened with [`batch_begin`](ProtoDb::batch_begin) exist purely
/// for write batching; while every open frame is such an autocommit
/// frame, [`count_writes`](ProtoDb::count_writes) may cycle the
/// underlying transaction (`COMMIT` + `BEGIN`) to flush accumulated
/// writes. A frame opened with
/// [`transaction_begin`](ProtoDb::transaction_begin) pins the
/// transaction open so read-your-writes callers are never broken by a
/// mid-batch commit. It also means ROLLBACKs have a much wider blast
/// radius than one might expect; rolling back is rarely a good idea here.
#[derive(Debug)]
pub struct ProtoDb {
    conn: Connection,

    /// Write operations since the last commit.
    write_count: u32,

    /// Autoflush threshold; 0 means [`DEFAULT_BATCH_SIZE`].
    batch_size: u32,

    /// SQLite doesn't nest transactions, so the depth lives here.
    transaction_depth: usize,

    /// How many of the open frames are autocommit frames.
    autocommit_depth: usize,
}

impl ProtoDb {
    pub fn new(conn: Connection) -> ProtoDb {
        ProtoDb::with_batch_size(conn, 0)
    }

    /// `batch_size == 0` selects [`DEFAULT_BATCH_SIZE`].
    pub fn with_batch_size(conn: Connection, batch_size: u32) -> ProtoDb {
        ProtoDb {
            conn,
            write_count: 0,
            batch_size,
            transaction_depth: 0,
            autocommit_depth: 0,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }

    /// Opens a logical transaction; only the 0→1 transition issues a
    /// `BEGIN IMMEDIATE` against the engine.
    pub fn transaction_begin(&mut self) -> rusqlite::Result<()> {
        self.transaction_depth += 1;
        if self.transaction_depth > 1 {
            return Ok(());
        }

        if let Err(err) = self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;") {
            self.transaction_depth -= 1;
            error!("failed to open sqlite transaction: {err}");
            return Err(err);
        }

        Ok(())
    }

    /// Closes one logical transaction, committing on the 1→0 transition.
    ///
    /// Aborts the process if the commit fails: the writes are already
    /// promised to callers and there is no sane way to recover.
    pub fn transaction_end(&mut self) {
        assert!(self.transaction_depth > 0, "transaction_end without begin");
        self.transaction_depth -= 1;
        if self.transaction_depth > 0 {
            // Closing this frame may have made a pending cycle possible.
            self.count_writes(0);
            return;
        }

        self.write_count = 0;
        if let Err(err) = self.conn.execute_batch("COMMIT TRANSACTION;") {
            error!("failed to commit sqlite transaction: {err}");
            std::process::abort();
        }
    }

    /// Opens an autocommit frame: a transaction held only for write
    /// throughput, which `count_writes` is free to cycle through.
    pub fn batch_begin(&mut self) -> rusqlite::Result<()> {
        self.autocommit_depth += 1;
        self.transaction_begin()
    }

    pub fn batch_end(&mut self) {
        self.transaction_end();
        assert!(self.autocommit_depth > 0, "batch_end without batch_begin");
        self.autocommit_depth -= 1;
    }

    /// Accounts for `n` new write operations (rows added or modified),
    /// cycling the transaction once the batch threshold is crossed and
    /// every open frame is an autocommit frame.
    ///
    /// Aborts the process if the cycle fails.
    pub fn count_writes(&mut self, n: u32) {
        if self.transaction_depth == 0 {
            return;
        }

        let batch_size = if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        };

        if self.write_count < batch_size && n < batch_size - self.write_count {
            self.write_count += n;
            return;
        }

        // Saturate: when we can't flush yet, remember that we must.
        self.write_count = batch_size;
        if self.autocommit_depth < self.transaction_depth {
            return;
        }

        self.write_count = 0;
        let cycle = "COMMIT TRANSACTION; BEGIN IMMEDIATE TRANSACTION;";
        if let Err(err) = self.conn.execute_batch(cycle) {
            error!("failed to cycle sqlite transaction: {err}");
            std::process::abort();
        }
    }
}
