use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a list or build operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot access {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed payload: {0}")]
    Decode(#[from] DecodeError),
    #[error("code object index {index} is out of range ({count} code objects)")]
    Index { index: i64, count: usize },
    #[error("invalid replacement bytes: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("cannot encode code object tree: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("file is {0} bytes long, shorter than the pyc header")]
    HeaderTooShort(usize),
    #[error("unexpected end of data at offset {offset} ({needed} more bytes needed)")]
    Truncated { offset: usize, needed: usize },
    #[error("length {length} at offset {offset} exceeds the {remaining} remaining bytes")]
    LengthOverflow {
        offset: usize,
        length: usize,
        remaining: usize,
    },
    #[error("unknown type code {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("negative length {length} at offset {offset}")]
    NegativeLength { offset: usize, length: i32 },
    #[error("unnormalized long integer at offset {0}")]
    InvalidLong(usize),
    #[error("reference {0} does not point to a stored object")]
    BadReference(u32),
    #[error("objects are nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("expected {expected} for {field}")]
    UnexpectedObject {
        field: &'static str,
        expected: &'static str,
    },
    #[error("payload root is not a code object")]
    RootNotCode,
    #[error("magic number {0} does not belong to a supported Python version")]
    UnsupportedMagic(u16),
    #[error("python_marshal: {0}")]
    Marshal(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{field} is {length} bytes long, more than the format can hold")]
    TooLong { field: &'static str, length: usize },
    #[error("code object was decoded by the {found} backend and cannot be encoded by the {expected} backend")]
    ForeignNode {
        expected: &'static str,
        found: &'static str,
    },
    #[error("magic number {0} does not belong to a supported Python version")]
    UnsupportedMagic(u16),
    #[error("python_marshal: {0}")]
    Marshal(String),
}

impl From<python_marshal::error::Error> for DecodeError {
    fn from(err: python_marshal::error::Error) -> Self {
        DecodeError::Marshal(format!("{err:?}"))
    }
}

impl From<python_marshal::error::Error> for EncodeError {
    fn from(err: python_marshal::error::Error) -> Self {
        EncodeError::Marshal(format!("{err:?}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
