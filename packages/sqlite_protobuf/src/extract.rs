use log::warn;
use prost::Message;
use prost_reflect::{Cardinality, DynamicMessage, FieldDescriptor, Kind, ReflectMessage, Value as ProtoValue};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::args;
use crate::cache;
use crate::error::Error;
use crate::path::{Path, Step};

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "protobuf_extract",
        -1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        protobuf_extract,
    )
}

/// Returns the element addressed by a protopath:
///
///     SELECT protobuf_extract(data, 'Person', '$.phones[0].number', default?);
///
/// Scalar leaves map to the corresponding SQL type; a path ending on a
/// (sub)message re-serializes it to a protobuf blob. When `default` is
/// provided it is returned verbatim in place of an unset field's declared
/// default value.
fn protobuf_extract(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    if ctx.len() < 3 || ctx.len() > 4 {
        return Err(Error::WrongArgumentCount.into());
    }

    let payload = args::bytes(ctx, 0)?;
    let message_name = args::text(ctx, 1)?;
    let path = Path::parse(args::text(ctx, 2)?)?;
    let default_value = if ctx.len() == 4 {
        Some(SqlValue::from(ctx.get_raw(3)))
    } else {
        None
    };

    let steps = &path.steps()[1..];

    let result = cache::with_message(message_name, payload, |message| {
        if steps.is_empty() {
            // The root path selects the whole stored payload.
            return Ok(SqlValue::Blob(payload.to_vec()));
        }

        walk(message, steps, default_value.as_ref())
    })?;

    Ok(result?)
}

/// Descends one step into `message` and recurses on the remainder.
fn walk(
    message: &DynamicMessage,
    steps: &[Step],
    default_value: Option<&SqlValue>,
) -> Result<SqlValue, Error> {
    let Some((step, rest)) = steps.split_first() else {
        // The path ended on a message: hand back its wire encoding.
        return Ok(SqlValue::Blob(message.encode_to_vec()));
    };

    let (field_name, index) = match step {
        Step::Field(name) => (name.as_str(), None),
        Step::IndexedField(name, index) => (name.as_str(), Some(*index)),
        Step::Root => return Err(Error::InvalidPath),
    };

    let field = message
        .descriptor()
        .get_field_by_name(field_name)
        .ok_or(Error::InvalidFieldName)?;

    // An unset optional field produces a default instead of traversing.
    // The path may only continue past it for kinds that still have
    // suffix semantics (an enum's `.name`/`.number`); an unset message
    // has no sub-fields to offer and maps to SQL NULL.
    if field.cardinality() == Cardinality::Optional && !message.has_field(&field) {
        if !rest.is_empty() && !matches!(field.kind(), Kind::Message(_) | Kind::Enum(_)) {
            return Err(Error::InvalidPath);
        }

        if let Some(default_value) = default_value {
            return Ok(default_value.clone());
        }

        if matches!(field.kind(), Kind::Message(_)) {
            return Ok(SqlValue::Null);
        }

        return scalar_value(&field, &message.get_field(&field), rest);
    }

    let value = message.get_field(&field);

    if field.is_list() {
        let Some(index) = index else {
            return Err(Error::ExpectedIndex);
        };
        let items = value.as_list().ok_or(Error::InvalidPath)?;

        let len = items.len() as i64;
        let index = if index < 0 { len + index } else { index };
        if index < 0 || index >= len {
            // Out of range selects nothing rather than failing the query.
            return Ok(SqlValue::Null);
        }
        let item = &items[index as usize];

        if matches!(field.kind(), Kind::Message(_)) {
            let sub = item.as_message().ok_or(Error::InvalidPath)?;
            return walk(sub, rest, default_value);
        }

        return scalar_value(&field, item, rest);
    }

    if matches!(field.kind(), Kind::Message(_)) {
        let sub = value.as_message().ok_or(Error::InvalidPath)?;
        return walk(sub, rest, default_value);
    }

    scalar_value(&field, &value, rest)
}

/// Maps a scalar leaf to its SQL value. Only an enum's `.name`/`.number`
/// suffix may extend the path past a scalar.
fn scalar_value(
    field: &FieldDescriptor,
    value: &ProtoValue,
    rest: &[Step],
) -> Result<SqlValue, Error> {
    if !rest.is_empty() && !matches!(field.kind(), Kind::Enum(_)) {
        return Err(Error::NonMessagePath);
    }

    Ok(match value {
        ProtoValue::I32(v) => SqlValue::Integer(i64::from(*v)),
        ProtoValue::I64(v) => SqlValue::Integer(*v),
        ProtoValue::U32(v) => SqlValue::Integer(i64::from(*v)),
        ProtoValue::U64(v) => {
            warn!(
                "Protobuf field \"{}\" is unsigned, but SQLite does not support unsigned types",
                field.full_name()
            );
            SqlValue::Integer(*v as i64)
        }
        ProtoValue::F64(v) => SqlValue::Real(*v),
        ProtoValue::F32(v) => SqlValue::Real(f64::from(*v)),
        ProtoValue::Bool(v) => SqlValue::Integer(if *v { 0 } else { 1 }),
        ProtoValue::EnumNumber(number) => return enum_value(field, *number, rest),
        ProtoValue::String(v) => {
            match field.kind() {
                Kind::String => {}
                Kind::Bytes => return Ok(SqlValue::Blob(v.clone().into_bytes())),
                _ => warn!(
                    "Protobuf field \"{}\" is an unexpected string type",
                    field.full_name()
                ),
            }
            SqlValue::Text(v.clone())
        }
        ProtoValue::Bytes(v) => SqlValue::Blob(v.to_vec()),
        ProtoValue::Message(v) => SqlValue::Blob(v.encode_to_vec()),
        ProtoValue::List(_) | ProtoValue::Map(_) => return Err(Error::NonMessagePath),
    })
}

/// Enum leaves emit their number, unless a `.name` suffix asks for the
/// symbolic label instead.
fn enum_value(field: &FieldDescriptor, number: i32, rest: &[Step]) -> Result<SqlValue, Error> {
    match rest {
        [] => Ok(SqlValue::Integer(i64::from(number))),
        [Step::Field(suffix)] if suffix == "number" => Ok(SqlValue::Integer(i64::from(number))),
        [Step::Field(suffix)] if suffix == "name" => {
            let Kind::Enum(descriptor) = field.kind() else {
                return Err(Error::NonMessagePath);
            };
            descriptor
                .get_value(number)
                .map(|value| SqlValue::Text(value.name().to_owned()))
                .ok_or(Error::EnumValueNotFound)
        }
        _ => Err(Error::NonMessagePath),
    }
}
