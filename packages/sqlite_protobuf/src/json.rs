use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, SerializeOptions};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::args;
use crate::cache;
use crate::error::Error;

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("protobuf_to_json", 2, flags, protobuf_to_json)?;
    conn.create_scalar_function("protobuf_of_json", 2, flags, protobuf_of_json)
}

/// Converts a binary blob of protobuf bytes to the message's JSON form:
///
///     SELECT protobuf_to_json(data, 'Person');
fn protobuf_to_json(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let payload = args::bytes(ctx, 0)?;
    let message_name = args::text(ctx, 1)?;

    let descriptor = cache::get_prototype(message_name)?;
    let message =
        DynamicMessage::decode(descriptor, payload).map_err(|_| Error::ParseFailed)?;

    // The JSON mapping is tied to proto3 semantics, where an unpopulated
    // primitive field and one set to its default are indistinguishable.
    // Consumers in languages with loose null handling are better served
    // by every known primitive field being present in the output.
    let options = SerializeOptions::new().skip_default_fields(false);
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut buffer);
    message
        .serialize_with_options(&mut serializer, &options)
        .map_err(|_| Error::ToJsonFailed)?;
    let json = String::from_utf8(buffer).map_err(|_| Error::ToJsonFailed)?;

    Ok(SqlValue::Text(json))
}

/// Converts a JSON document to a binary blob of protobuf bytes:
///
///     SELECT protobuf_of_json(json, 'Person');
fn protobuf_of_json(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let json = args::text(ctx, 0)?;
    let message_name = args::text(ctx, 1)?;

    let descriptor = cache::get_prototype(message_name)?;

    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let mut deserializer = serde_json::Deserializer::from_str(json);
    let message =
        DynamicMessage::deserialize_with_options(descriptor, &mut deserializer, &options)
            .map_err(|_| Error::FromJsonFailed)?;
    deserializer.end().map_err(|_| Error::FromJsonFailed)?;

    Ok(SqlValue::Blob(message.encode_to_vec()))
}
