use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use rusqlite::types::ValueRef;
use rusqlite::{named_params, Connection, Rows};

use crate::error::TableError;

/// One result row for a proto table query. `bytes` is the wire encoding,
/// `message` the parsed form; either may be absent.
#[derive(Debug, Default)]
pub struct ResultRow {
    /// Row id; 0 means "not yet inserted".
    pub id: i64,
    pub message: Option<DynamicMessage>,
    pub bytes: Option<Vec<u8>>,
}

impl ResultRow {
    pub fn new(id: i64, message: Option<DynamicMessage>, bytes: Option<Vec<u8>>) -> ResultRow {
        ResultRow { id, message, bytes }
    }

    pub fn n_bytes(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    /// The wire encoding, serializing the parsed message on first use.
    pub fn wire_bytes(&mut self) -> Option<&[u8]> {
        if self.bytes.is_none() {
            self.bytes = self.message.as_ref().map(Message::encode_to_vec);
        }
        self.bytes.as_deref()
    }

    pub fn reset(&mut self) {
        *self = ResultRow::default();
    }
}

/// An owning, growable list of result rows. Pushing moves the row in and
/// leaves the source reset, so ownership of parsed messages and payload
/// buffers is never shared.
#[derive(Debug, Default)]
pub struct ResultList {
    rows: Vec<ResultRow>,
}

impl ResultList {
    pub fn new() -> ResultList {
        ResultList::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [ResultRow] {
        &mut self.rows
    }

    /// Releases the rows and their storage.
    pub fn reset(&mut self) {
        self.rows = Vec::new();
    }

    /// Ensures capacity for `increase` more rows, doubling from a floor
    /// of 8 like the row storage always has.
    fn grow(&mut self, increase: usize) -> Result<(), TableError> {
        let want = self
            .rows
            .len()
            .checked_add(increase)
            .ok_or(TableError::CapacityOverflow)?;

        let mut goal = self.rows.capacity();
        while goal < want {
            goal = goal.checked_mul(2).ok_or(TableError::CapacityOverflow)?.max(8);
        }

        self.rows.try_reserve_exact(goal - self.rows.len())?;
        Ok(())
    }

    /// Moves `row` into the list, leaving it reset.
    pub fn push_row(&mut self, row: &mut ResultRow) -> Result<(), TableError> {
        if self.rows.len() == self.rows.capacity() {
            self.grow(1)?;
        }
        self.rows.push(std::mem::take(row));
        Ok(())
    }

    pub fn push(
        &mut self,
        id: i64,
        message: Option<DynamicMessage>,
        bytes: Option<Vec<u8>>,
    ) -> Result<(), TableError> {
        self.push_row(&mut ResultRow::new(id, message, bytes))
    }
}

/// Appends the statement's rows to the list. The first result column must
/// be the integer row id and the second the proto blob; when `descriptor`
/// is given the blob is also parsed, and a row that fails to parse stops
/// the scan with [`TableError::MalformedRow`].
pub fn populate(
    list: &mut ResultList,
    descriptor: Option<&MessageDescriptor>,
    rows: &mut Rows<'_>,
) -> Result<(), TableError> {
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;

        let blob = match row.get_ref(1)? {
            ValueRef::Null => None,
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Some(bytes),
            other => {
                return Err(rusqlite::Error::InvalidColumnType(
                    1,
                    "proto".to_owned(),
                    other.data_type(),
                )
                .into())
            }
        };

        let (message, bytes) = match blob {
            None => (None, None),
            Some(blob) => {
                let message = descriptor
                    .map(|descriptor| {
                        DynamicMessage::decode(descriptor.clone(), blob)
                            .map_err(|_| TableError::MalformedRow { id })
                    })
                    .transpose()?;
                (message, Some(blob.to_vec()))
            }
        };

        list.push(id, message, bytes)?;
    }

    Ok(())
}

fn insert_row(conn: &Connection, table: &str, row: &mut ResultRow) -> rusqlite::Result<()> {
    // Insert into the raw table: RETURNING does not work through the
    // view's INSTEAD OF triggers.
    let mut stmt = conn.prepare_cached(&format!(
        " INSERT INTO {table}_raw(proto) VALUES (:proto) RETURNING id"
    ))?;

    let id = stmt.query_row(named_params! { ":proto": row.wire_bytes() }, |row| {
        row.get::<_, i64>(0)
    })?;
    row.id = id;

    Ok(())
}

fn update_row(conn: &Connection, table: &str, row: &mut ResultRow) -> rusqlite::Result<()> {
    let id = row.id;
    let mut stmt =
        conn.prepare_cached(&format!(" UPDATE {table} SET proto = :proto WHERE id = :id"))?;
    stmt.execute(named_params! { ":proto": row.wire_bytes(), ":id": id })?;

    Ok(())
}

fn upsert_row(conn: &Connection, table: &str, row: &mut ResultRow) -> rusqlite::Result<()> {
    if row.id == 0 {
        insert_row(conn, table, row)
    } else {
        update_row(conn, table, row)
    }
}

/// Inserts (`id == 0`) or updates each input row in order, moving the
/// successful ones to `output`. On the first failure the remaining rows,
/// failed one included, stay in `input`.
///
/// Messages without a wire encoding are serialized lazily on demand.
pub fn write_rows(
    conn: &Connection,
    output: &mut ResultList,
    input: &mut ResultList,
    table: &str,
) -> Result<(), TableError> {
    // Preallocate so moving rows to the output cannot fail mid-transfer.
    output.grow(input.len())?;

    let mut result = Ok(());
    let mut num_done = 0;

    while num_done < input.rows.len() {
        if let Err(source) = upsert_row(conn, table, &mut input.rows[num_done]) {
            result = Err(TableError::Sqlite(source));
            break;
        }
        num_done += 1;
    }

    output.rows.extend(input.rows.drain(..num_done));
    result
}

/// Single-row variant of [`write_rows`]; the row stays in place, with its
/// id assigned when the write inserted it.
pub fn write_row(conn: &Connection, row: &mut ResultRow, table: &str) -> Result<(), TableError> {
    upsert_row(conn, table, row)?;
    Ok(())
}

/// Finds the end id for a page of up to `wanted` rows in `table` with
/// `id > begin`. Returns `begin` when the page is empty.
pub fn paginate(
    conn: &Connection,
    table: &str,
    begin: i64,
    wanted: usize,
) -> Result<i64, TableError> {
    let mut stmt = conn.prepare_cached(&format!(
        " SELECT COALESCE(MAX(id), :begin)\
         \x20 FROM (\
         \x20   SELECT id FROM `{table}`\
         \x20   WHERE id > :begin\
         \x20   ORDER BY id ASC\
         \x20   LIMIT :wanted\
         \x20 )"
    ))?;

    let end = stmt.query_row(
        named_params! { ":begin": begin, ":wanted": wanted as i64 },
        |row| row.get(0),
    )?;
    Ok(end)
}
