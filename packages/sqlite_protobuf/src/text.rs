use prost::Message;
use prost_reflect::DynamicMessage;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::args;
use crate::cache;
use crate::error::Error;

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("protobuf_to_text", 2, flags, protobuf_to_text)?;
    conn.create_scalar_function("protobuf_of_text", 2, flags, protobuf_of_text)
}

/// Converts a binary blob of protobuf bytes to text format:
///
///     SELECT protobuf_to_text(data, 'Person');
fn protobuf_to_text(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let payload = args::bytes(ctx, 0)?;
    let message_name = args::text(ctx, 1)?;

    let descriptor = cache::get_prototype(message_name)?;
    let message =
        DynamicMessage::decode(descriptor, payload).map_err(|_| Error::ParseFailed)?;

    Ok(SqlValue::Text(message.to_text_format()))
}

/// Converts a text-format message to a binary blob of protobuf bytes:
///
///     SELECT protobuf_of_text(text_proto, 'Person');
fn protobuf_of_text(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let text = args::text(ctx, 0)?;
    let message_name = args::text(ctx, 1)?;

    let descriptor = cache::get_prototype(message_name)?;
    let message = DynamicMessage::parse_text_format(descriptor, text)
        .map_err(|_| Error::FromTextFailed)?;

    Ok(SqlValue::Blob(message.encode_to_vec()))
}
