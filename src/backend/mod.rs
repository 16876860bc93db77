pub mod generic;
pub mod native;

use std::fmt;

use crate::code::CodeObject;
use crate::error::{DecodeError, EncodeError};

pub use generic::GenericBackend;
pub use native::NativeBackend;

/// Turns a marshalled payload into a [`CodeObject`] tree and back.
///
/// A tree can only be encoded by the kind of backend that decoded it, since the
/// fields it does not expose are kept in that backend's representation.
pub trait Backend {
    fn kind(&self) -> BackendKind;

    fn decode(&self, payload: &[u8], magic: u16) -> Result<CodeObject, DecodeError>;

    fn encode(&self, code: &CodeObject, magic: u16) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Understands every Python version `python_marshal` supports, picked by magic number.
    Generic,
    /// Only understands the host format, whatever the magic number says.
    Native,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Generic => "generic",
            BackendKind::Native => "native",
        }
    }

    pub fn create(self) -> Box<dyn Backend> {
        match self {
            BackendKind::Generic => Box::new(GenericBackend),
            BackendKind::Native => Box::new(NativeBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn foreign(expected: BackendKind, code: &CodeObject) -> EncodeError {
    EncodeError::ForeignNode {
        expected: expected.name(),
        found: code.backend().name(),
    }
}
