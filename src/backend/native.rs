use log::{debug, warn};

use super::{foreign, Backend, BackendKind};
use crate::code::{CodeObject, Constant, Extra, Repr, StringValue, Value};
use crate::error::{DecodeError, EncodeError};
use crate::magic::{self, PythonVersion};
use crate::literal;
use crate::marshal::{bytes_of, resolve, text_of, Layout, Object, RawCode, Reader, Writer};

/// The format the native backend reads when no other host is asked for.
pub const HOST_VERSION: PythonVersion = PythonVersion::new(3, 12);

/// Reads and writes payloads with the crate's own marshal implementation,
/// using the code object layout of a single host version.
///
/// The magic number is not consulted: a payload from another version is read
/// with the host layout and either fails or comes out wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBackend {
    host: PythonVersion,
    layout: Layout,
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend {
    pub fn new() -> Self {
        NativeBackend {
            host: HOST_VERSION,
            layout: Layout::Py311,
        }
    }

    /// None when no layout is known for `host`.
    pub fn for_host(host: PythonVersion) -> Option<Self> {
        Layout::for_version(host).map(|layout| NativeBackend { host, layout })
    }

    pub fn host(&self) -> PythonVersion {
        self.host
    }
}

/// The fields of a natively decoded code object that [`CodeObject`] does not expose.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NativeFields {
    /// Every field as stored, except that a `co_consts` tuple has had its items moved out.
    raw: RawCode,
    flagged: bool,
    /// The bytecode as decoded, to detect whether it was replaced.
    stored_bytecode: Vec<u8>,
}

impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn decode(&self, payload: &[u8], magic: u16) -> Result<CodeObject, DecodeError> {
        match magic::python_version(magic) {
            Some(version) if Layout::for_version(version) == Some(self.layout) => {}
            Some(version) => warn!(
                "magic {magic} is Python {version} but the native backend reads Python {}; the result may be wrong",
                self.host
            ),
            None => warn!("magic {magic} is not a known Python 3 version, reading it as Python {}", self.host),
        }

        let mut reader = Reader::new(payload, self.layout);
        let root = reader.read_object()?;
        if reader.position() != payload.len() {
            debug!("ignoring {} bytes after the payload", payload.len() - reader.position());
        }
        let refs = reader.into_refs();

        let (root, flagged) = match root {
            Object::Flagged(inner) => (*inner, true),
            other => (other, false),
        };

        match root {
            Object::Code(raw) => code_from_raw(*raw, flagged, &refs),
            _ => Err(DecodeError::RootNotCode),
        }
    }

    fn encode(&self, code: &CodeObject, _magic: u16) -> Result<Vec<u8>, EncodeError> {
        let object = code_to_object(code)?;

        let mut writer = Writer::new();
        writer.write_object(&object)?;
        Ok(writer.into_bytes())
    }
}

fn tuple_items_mut(object: &mut Object) -> Option<&mut Vec<Object>> {
    match object {
        Object::Tuple { items, .. } => Some(items),
        Object::Flagged(inner) => tuple_items_mut(inner),
        _ => None,
    }
}

fn code_from_raw(mut raw: RawCode, flagged: bool, refs: &[Object]) -> Result<CodeObject, DecodeError> {
    let name = raw
        .object("name")
        .and_then(|name| text_of(name, refs))
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .ok_or(DecodeError::UnexpectedObject {
            field: "co_name",
            expected: "a string",
        })?;

    let bytecode = raw
        .object("code")
        .and_then(|code| bytes_of(code, refs))
        .map(<[u8]>::to_vec)
        .ok_or(DecodeError::UnexpectedObject {
            field: "co_code",
            expected: "bytes",
        })?;

    let consts = raw.object_mut("consts").ok_or(DecodeError::UnexpectedObject {
        field: "co_consts",
        expected: "a tuple",
    })?;
    let not_a_tuple = DecodeError::UnexpectedObject {
        field: "co_consts",
        expected: "a tuple",
    };
    // A tuple merged with one of an earlier code object. The reference is
    // written back as is, so its items are only read, never descended into.
    let constants = if matches!(consts, Object::Ref(_)) {
        match resolve(consts, refs) {
            Some(Object::Tuple { items, .. }) => items
                .iter()
                .map(|item| plain_constant(item.clone(), refs))
                .collect::<Vec<_>>(),
            _ => return Err(not_a_tuple),
        }
    } else {
        tuple_items_mut(consts)
            .map(std::mem::take)
            .ok_or(not_a_tuple)?
            .into_iter()
            .map(|item| constant_from_object(item, refs))
            .collect::<Result<Vec<_>, _>>()?
    };

    let fields = NativeFields {
        raw,
        flagged,
        stored_bytecode: bytecode.clone(),
    };

    Ok(CodeObject::new(name, bytecode, constants, Extra::Native(fields)))
}

fn constant_from_object(object: Object, refs: &[Object]) -> Result<Constant, DecodeError> {
    match object {
        Object::Code(raw) => Ok(Constant::Code(code_from_raw(*raw, false, refs)?)),
        Object::Flagged(inner) => match *inner {
            Object::Code(raw) => Ok(Constant::Code(code_from_raw(*raw, true, refs)?)),
            inner => Ok(plain_constant(Object::Flagged(Box::new(inner)), refs)),
        },
        other => Ok(plain_constant(other, refs)),
    }
}

fn plain_constant(object: Object, refs: &[Object]) -> Constant {
    let text = text_of(&object, refs).map(|text| String::from_utf8_lossy(text).into_owned());
    let literal = literal_of(&object, refs);

    match text {
        Some(text) => Constant::String(StringValue::new(text, Value::native(object, literal))),
        None => Constant::Scalar(Value::native(object, literal)),
    }
}

fn literal_of(object: &Object, refs: &[Object]) -> String {
    let all = |items: &[Object]| items.iter().map(|item| literal_of(item, refs)).collect::<Vec<_>>();
    let lossy = |data: &[u8]| String::from_utf8_lossy(data).into_owned();

    let Some(object) = resolve(object, refs) else {
        return "<bad reference>".into();
    };

    match object {
        Object::Null => "NULL".into(),
        Object::None => "None".into(),
        Object::False => literal::boolean(false),
        Object::True => literal::boolean(true),
        Object::StopIteration => "StopIteration".into(),
        Object::Ellipsis => "Ellipsis".into(),
        Object::Int(value) => value.to_string(),
        Object::Int64(value) => value.to_string(),
        Object::Long(value) => value.to_string(),
        Object::FloatText(text) => lossy(text),
        Object::Float(value) => literal::float(value.0),
        Object::ComplexText(re, im) => format!("({}+{}j)", lossy(re), lossy(im)),
        Object::Complex(value) => literal::complex(value.re.0, value.im.0),
        Object::Bytes(bytes) => literal::bytes(bytes),
        Object::String(string) => literal::string(&string.text()),
        Object::Tuple { items, .. } => literal::tuple(all(items)),
        Object::List(items) => literal::list(all(items)),
        Object::Set(items) => literal::set(all(items)),
        Object::FrozenSet(items) => literal::frozenset(all(items)),
        Object::Dict(entries) => literal::dict(
            entries
                .iter()
                .map(|(key, value)| (literal_of(key, refs), literal_of(value, refs))),
        ),
        Object::Code(raw) => {
            let name = raw
                .object("name")
                .and_then(|name| text_of(name, refs))
                .map(lossy)
                .unwrap_or_default();
            literal::code(&name)
        }
        Object::Ref(_) | Object::Flagged(_) => "<bad reference>".into(),
    }
}

fn code_to_object(code: &CodeObject) -> Result<Object, EncodeError> {
    let Extra::Native(fields) = code.extra() else {
        return Err(foreign(BackendKind::Native, code));
    };

    let mut raw = fields.raw.clone();

    if code.bytecode() != fields.stored_bytecode.as_slice() {
        if let Some(slot) = raw.object_mut("code") {
            // Keep the flag so every later reference index stays valid. A slot that
            // was itself a reference becomes plain bytes.
            let flagged = slot.is_flagged();
            *slot = Object::Bytes(code.bytecode().to_vec()).flagged_if(flagged);
        }
    }

    let constants = code
        .constants()
        .iter()
        .map(constant_to_object)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(items) = raw.object_mut("consts").and_then(tuple_items_mut) {
        *items = constants;
    }

    Ok(Object::Code(Box::new(raw)).flagged_if(fields.flagged))
}

fn constant_to_object(constant: &Constant) -> Result<Object, EncodeError> {
    let value = match constant {
        Constant::Code(code) => return code_to_object(code),
        Constant::Scalar(value) => value,
        Constant::String(string) => &string.raw,
    };

    match &value.repr {
        Repr::Native(object) => Ok(object.clone()),
        Repr::Generic(_) => Err(EncodeError::ForeignNode {
            expected: BackendKind::Native.name(),
            found: BackendKind::Generic.name(),
        }),
    }
}
