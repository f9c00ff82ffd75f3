use prost_reflect::{DescriptorPool, EnumDescriptor};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::args;
use crate::error::Error;

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("protobuf_enum_name_of_number", 2, flags, name_of_number)?;
    conn.create_scalar_function("protobuf_enum_number_of_name", 2, flags, number_of_name)
}

/// Resolves an enum value's symbolic label:
///
///     SELECT protobuf_enum_name_of_number('Person.PhoneType', 1);
fn name_of_number(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let descriptor = enum_descriptor(args::text(ctx, 0)?)?;
    let number = ctx.get::<i64>(1)?;

    let value = i32::try_from(number)
        .ok()
        .and_then(|number| descriptor.get_value(number))
        .ok_or(Error::EnumValueNotFound)?;

    Ok(SqlValue::Text(value.name().to_owned()))
}

/// Resolves an enum label back to its number:
///
///     SELECT protobuf_enum_number_of_name('Person.PhoneType', 'HOME');
fn number_of_name(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let descriptor = enum_descriptor(args::text(ctx, 0)?)?;
    let name = args::text(ctx, 1)?;

    let value = descriptor
        .get_value_by_name(name)
        .ok_or(Error::EnumValueNotFound)?;

    Ok(SqlValue::Integer(i64::from(value.number())))
}

fn enum_descriptor(enum_name: &str) -> Result<EnumDescriptor, Error> {
    DescriptorPool::global()
        .get_enum_by_name(enum_name)
        .ok_or(Error::EnumDescriptorNotFound)
}
