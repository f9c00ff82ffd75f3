use rusqlite::functions::Context;
use rusqlite::types::ValueRef;

/// Reads argument `idx` as UTF-8 text.
pub(crate) fn text<'c>(ctx: &'c Context<'_>, idx: usize) -> rusqlite::Result<&'c str> {
    let value = ctx.get_raw(idx);
    value
        .as_str()
        .map_err(|_| rusqlite::Error::InvalidFunctionParameterType(idx, value.data_type()))
}

/// Reads argument `idx` as raw bytes; TEXT values pass through unchanged
/// since protobuf payloads routinely arrive through text-typed columns.
pub(crate) fn bytes<'c>(ctx: &'c Context<'_>, idx: usize) -> rusqlite::Result<&'c [u8]> {
    match ctx.get_raw(idx) {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes),
        other => Err(rusqlite::Error::InvalidFunctionParameterType(
            idx,
            other.data_type(),
        )),
    }
}
