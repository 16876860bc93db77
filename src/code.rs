use std::fmt;

use crate::backend::native::NativeFields;
use crate::backend::BackendKind;
use crate::literal;

/// One node of a decoded payload: a function, class or module body.
///
/// Only the name, bytecode and constants are exposed. Every other field the format
/// defines is carried along untouched so the node encodes back to the same data.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    name: String,
    bytecode: Vec<u8>,
    constants: Vec<Constant>,
    extra: Extra,
}

/// Format-defined fields, owned by the backend that decoded the node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Extra {
    Native(NativeFields),
    Generic(python_marshal::Code),
}

impl Extra {
    pub(crate) fn backend(&self) -> BackendKind {
        match self {
            Extra::Native(_) => BackendKind::Native,
            Extra::Generic(_) => BackendKind::Generic,
        }
    }
}

impl CodeObject {
    pub(crate) fn new(name: String, bytecode: Vec<u8>, constants: Vec<Constant>, extra: Extra) -> Self {
        CodeObject {
            name,
            bytecode,
            constants,
            extra,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// The backend this node was decoded by, and the only one able to encode it.
    pub fn backend(&self) -> BackendKind {
        self.extra.backend()
    }

    /// Code objects directly nested in this one, in constant order.
    pub fn children(&self) -> impl Iterator<Item = (usize, &CodeObject)> {
        self.constants
            .iter()
            .enumerate()
            .filter_map(|(index, constant)| match constant {
                Constant::Code(code) => Some((index, code)),
                Constant::Scalar(_) | Constant::String(_) => None,
            })
    }

    pub(crate) fn extra(&self) -> &Extra {
        &self.extra
    }

    pub(crate) fn set_bytecode(&mut self, bytecode: Vec<u8>) {
        self.bytecode = bytecode;
    }

    pub(crate) fn child_mut(&mut self, index: usize) -> Option<&mut CodeObject> {
        match self.constants.get_mut(index)? {
            Constant::Code(code) => Some(code),
            Constant::Scalar(_) | Constant::String(_) => None,
        }
    }
}

/// An entry of `co_consts`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Scalar(Value),
    String(StringValue),
    Code(CodeObject),
}

/// A constant kept in the representation of the backend that decoded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub(crate) repr: Repr,
    literal: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Repr {
    Native(crate::marshal::Object),
    Generic(python_marshal::Object),
}

impl Value {
    pub(crate) fn native(object: crate::marshal::Object, literal: String) -> Self {
        Value {
            repr: Repr::Native(object),
            literal,
        }
    }

    pub(crate) fn generic(object: python_marshal::Object, literal: String) -> Self {
        Value {
            repr: Repr::Generic(object),
            literal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

/// A string constant. `text` is decoded lossily for display; the original
/// encoding (kind, interning, back-references) is kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct StringValue {
    text: String,
    pub(crate) raw: Value,
}

impl StringValue {
    pub(crate) fn new(text: String, raw: Value) -> Self {
        StringValue { text, raw }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for StringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&literal::string(&self.text))
    }
}

/// Prints the constant the way Python source would spell it. Nested code
/// objects print as `<code object name>`.
impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Scalar(value) => write!(f, "{value}"),
            Constant::String(string) => write!(f, "{string}"),
            Constant::Code(code) => f.write_str(&literal::code(code.name())),
        }
    }
}
