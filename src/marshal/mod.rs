//! CPython's `marshal` format, read and written without losing any encoding detail.
//!
//! Every object keeps the exact type code it was stored with (short vs. long tuples,
//! string kinds, text vs. binary floats) and objects stored with `FLAG_REF` stay
//! wrapped in [`Object::Flagged`]. Writing a decoded tree back therefore reproduces
//! the input, including the back-reference numbering.

pub mod reader;
pub mod writer;

use std::borrow::Cow;

use num_bigint::BigInt;
use num_complex::Complex;
use ordered_float::OrderedFloat;

use crate::magic::PythonVersion;

pub use reader::Reader;
pub use writer::Writer;

pub const FLAG_REF: u8 = 0x80;

/// Maximum nesting accepted when loading. The reader recurses once per level,
/// so this has to fit the 2 MiB stack of a spawned thread in an unoptimized build.
/// Compiled code nests far less than this.
pub const MAX_DEPTH: usize = 200;

pub mod tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const STOPITER: u8 = b'S';
    pub const ELLIPSIS: u8 = b'.';
    pub const INT: u8 = b'i';
    pub const INT64: u8 = b'I';
    pub const FLOAT: u8 = b'f';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const COMPLEX: u8 = b'x';
    pub const BINARY_COMPLEX: u8 = b'y';
    pub const LONG: u8 = b'l';
    pub const STRING: u8 = b's';
    pub const INTERNED: u8 = b't';
    pub const REF: u8 = b'r';
    pub const TUPLE: u8 = b'(';
    pub const SMALL_TUPLE: u8 = b')';
    pub const LIST: u8 = b'[';
    pub const DICT: u8 = b'{';
    pub const CODE: u8 = b'c';
    pub const UNICODE: u8 = b'u';
    pub const SET: u8 = b'<';
    pub const FROZENSET: u8 = b'>';
    pub const ASCII: u8 = b'a';
    pub const ASCII_INTERNED: u8 = b'A';
    pub const SHORT_ASCII: u8 = b'z';
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Unicode,
    Interned,
    Ascii,
    AsciiInterned,
    ShortAscii,
    ShortAsciiInterned,
}

impl StringKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            tag::UNICODE => Some(StringKind::Unicode),
            tag::INTERNED => Some(StringKind::Interned),
            tag::ASCII => Some(StringKind::Ascii),
            tag::ASCII_INTERNED => Some(StringKind::AsciiInterned),
            tag::SHORT_ASCII => Some(StringKind::ShortAscii),
            tag::SHORT_ASCII_INTERNED => Some(StringKind::ShortAsciiInterned),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            StringKind::Unicode => tag::UNICODE,
            StringKind::Interned => tag::INTERNED,
            StringKind::Ascii => tag::ASCII,
            StringKind::AsciiInterned => tag::ASCII_INTERNED,
            StringKind::ShortAscii => tag::SHORT_ASCII,
            StringKind::ShortAsciiInterned => tag::SHORT_ASCII_INTERNED,
        }
    }

    /// Short kinds store their length in a single byte.
    pub fn is_short(self) -> bool {
        matches!(
            self,
            StringKind::ShortAscii | StringKind::ShortAsciiInterned
        )
    }
}

/// A `str` object. The data is kept as raw bytes because marshal writes lone
/// surrogates with `surrogatepass`, which is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyString {
    pub data: Vec<u8>,
    pub kind: StringKind,
}

impl PyString {
    pub fn new(value: &str, kind: StringKind) -> Self {
        PyString {
            data: value.as_bytes().to_vec(),
            kind,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    None,
    False,
    True,
    StopIteration,
    Ellipsis,
    Int(i32),
    Int64(i64),
    Long(BigInt),
    /// Pre-3.x text float, kept as the digits it was written with.
    FloatText(Vec<u8>),
    Float(OrderedFloat<f64>),
    ComplexText(Vec<u8>, Vec<u8>),
    Complex(Complex<OrderedFloat<f64>>),
    Bytes(Vec<u8>),
    String(PyString),
    Tuple { items: Vec<Object>, small: bool },
    List(Vec<Object>),
    /// Key/value pairs in stored order.
    Dict(Vec<(Object, Object)>),
    Set(Vec<Object>),
    FrozenSet(Vec<Object>),
    Code(Box<RawCode>),
    /// Back-reference to the n-th object stored with `FLAG_REF`.
    Ref(u32),
    /// An object stored with `FLAG_REF`.
    Flagged(Box<Object>),
}

impl Object {
    /// The object without its `FLAG_REF` wrapper.
    pub fn unflagged(&self) -> &Object {
        match self {
            Object::Flagged(inner) => inner,
            other => other,
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, Object::Flagged(_))
    }

    /// Wraps `self` in [`Object::Flagged`] when `flagged` is set.
    pub fn flagged_if(self, flagged: bool) -> Object {
        if flagged {
            Object::Flagged(Box::new(self))
        } else {
            self
        }
    }
}

/// The object behind `object`: the flag is dropped and a back-reference is
/// looked up in `refs`, the table filled by [`Reader`].
pub fn resolve<'a>(object: &'a Object, refs: &'a [Object]) -> Option<&'a Object> {
    match object.unflagged() {
        Object::Ref(index) => refs.get(*index as usize).map(Object::unflagged),
        other => Some(other),
    }
}

/// Resolves a string field that may be stored inline or as a back-reference.
pub fn text_of<'a>(object: &'a Object, refs: &'a [Object]) -> Option<&'a [u8]> {
    match resolve(object, refs)? {
        Object::String(string) => Some(&string.data),
        _ => None,
    }
}

/// Resolves a bytes field that may be stored inline or as a back-reference.
pub fn bytes_of<'a>(object: &'a Object, refs: &'a [Object]) -> Option<&'a [u8]> {
    match resolve(object, refs)? {
        Object::Bytes(bytes) => Some(bytes),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A 32-bit little-endian integer.
    Word(&'static str),
    Object(&'static str),
}

/// Field order of a marshalled code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 3.0 - 3.7
    Py30,
    /// 3.8 - 3.10, adds `posonlyargcount`
    Py38,
    /// 3.11+, locals merged into `localsplusnames`/`localspluskinds`
    Py311,
}

const PY30_SLOTS: &[Slot] = &[
    Slot::Word("argcount"),
    Slot::Word("kwonlyargcount"),
    Slot::Word("nlocals"),
    Slot::Word("stacksize"),
    Slot::Word("flags"),
    Slot::Object("code"),
    Slot::Object("consts"),
    Slot::Object("names"),
    Slot::Object("varnames"),
    Slot::Object("freevars"),
    Slot::Object("cellvars"),
    Slot::Object("filename"),
    Slot::Object("name"),
    Slot::Word("firstlineno"),
    Slot::Object("lnotab"),
];

const PY38_SLOTS: &[Slot] = &[
    Slot::Word("argcount"),
    Slot::Word("posonlyargcount"),
    Slot::Word("kwonlyargcount"),
    Slot::Word("nlocals"),
    Slot::Word("stacksize"),
    Slot::Word("flags"),
    Slot::Object("code"),
    Slot::Object("consts"),
    Slot::Object("names"),
    Slot::Object("varnames"),
    Slot::Object("freevars"),
    Slot::Object("cellvars"),
    Slot::Object("filename"),
    Slot::Object("name"),
    Slot::Word("firstlineno"),
    Slot::Object("linetable"),
];

const PY311_SLOTS: &[Slot] = &[
    Slot::Word("argcount"),
    Slot::Word("posonlyargcount"),
    Slot::Word("kwonlyargcount"),
    Slot::Word("stacksize"),
    Slot::Word("flags"),
    Slot::Object("code"),
    Slot::Object("consts"),
    Slot::Object("names"),
    Slot::Object("localsplusnames"),
    Slot::Object("localspluskinds"),
    Slot::Object("filename"),
    Slot::Object("name"),
    Slot::Object("qualname"),
    Slot::Word("firstlineno"),
    Slot::Object("linetable"),
    Slot::Object("exceptiontable"),
];

impl Layout {
    pub fn for_version(version: PythonVersion) -> Option<Layout> {
        match (version.major, version.minor) {
            (3, 0..=7) => Some(Layout::Py30),
            (3, 8..=10) => Some(Layout::Py38),
            (3, 11..=13) => Some(Layout::Py311),
            _ => None,
        }
    }

    pub fn slots(self) -> &'static [Slot] {
        match self {
            Layout::Py30 => PY30_SLOTS,
            Layout::Py38 => PY38_SLOTS,
            Layout::Py311 => PY311_SLOTS,
        }
    }

    /// Position of the named field in [`Layout::slots`].
    pub fn position(self, field: &str) -> Option<usize> {
        self.slots().iter().position(|slot| match slot {
            Slot::Word(name) | Slot::Object(name) => *name == field,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Word(u32),
    Object(Object),
}

/// A code object as stored: its fields in [`Layout`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCode {
    pub layout: Layout,
    pub fields: Vec<Field>,
}

impl RawCode {
    pub fn object(&self, field: &str) -> Option<&Object> {
        match self.fields.get(self.layout.position(field)?)? {
            Field::Object(object) => Some(object),
            Field::Word(_) => None,
        }
    }

    pub fn object_mut(&mut self, field: &str) -> Option<&mut Object> {
        let position = self.layout.position(field)?;
        match self.fields.get_mut(position)? {
            Field::Object(object) => Some(object),
            Field::Word(_) => None,
        }
    }
}
