use thiserror::Error;

/// Everything that can go wrong inside one of the extension's scalar
/// functions. The display strings are part of the SQL-visible contract:
/// they are what callers see through the result channel.
#[derive(Error, Debug)]
pub enum Error {
    #[error("wrong number of arguments to function protobuf_extract (expected 3 or 4)")]
    WrongArgumentCount,

    #[error("Invalid path")]
    InvalidPath,

    #[error("Could not find message descriptor")]
    MessageDescriptorNotFound,

    #[error("Could not find enum descriptor")]
    EnumDescriptorNotFound,

    #[error("Failed to parse message")]
    ParseFailed,

    #[error("Invalid field name")]
    InvalidFieldName,

    #[error("Expected index into repeated field")]
    ExpectedIndex,

    #[error("Path traverses non-message elements")]
    NonMessagePath,

    #[error("Enum value not found")]
    EnumValueNotFound,

    #[error("Could not serialize message")]
    SerializeFailed,

    #[error("Could not convert message to JSON")]
    ToJsonFailed,

    #[error("Could not parse JSON message")]
    FromJsonFailed,

    #[error("Could not convert message to textproto")]
    ToTextFailed,

    #[error("Could not parse text proto")]
    FromTextFailed,
}

impl From<Error> for rusqlite::Error {
    fn from(error: Error) -> rusqlite::Error {
        rusqlite::Error::UserFunctionError(Box::new(error))
    }
}
