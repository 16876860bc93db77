use python_marshal::magic::PyVersion;
use python_marshal::{resolver::resolve_all_refs, Object};

use super::{foreign, Backend, BackendKind};
use crate::code::{CodeObject, Constant, Extra, Repr, StringValue, Value};
use crate::error::{DecodeError, EncodeError};
use crate::{literal, magic};

/// Marshal format version written by every Python 3 release `python_marshal` supports.
const MARSHAL_VERSION: u8 = 4;

/// Decodes any version `python_marshal` knows, chosen from the magic number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenericBackend;

/// Runs `$body` with `$c` bound to the version specific code object.
/// Every version stores `code`, `consts` and `name` the same way.
macro_rules! with_code_fields {
    ($code:expr, $c:ident => $body:expr) => {
        match $code {
            python_marshal::Code::V310($c) => $body,
            python_marshal::Code::V311($c) => $body,
            python_marshal::Code::V312($c) => $body,
            python_marshal::Code::V313($c) => $body,
        }
    };
}

fn py_version(magic: u16) -> Option<PyVersion> {
    let version = magic::python_version(magic)?;

    match (version.major, version.minor) {
        (3, 10) => Some((3, 10).into()),
        (3, 11) => Some((3, 11).into()),
        (3, 12) => Some((3, 12).into()),
        (3, 13) => Some((3, 13).into()),
        _ => None,
    }
}

impl Backend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn decode(&self, payload: &[u8], magic: u16) -> Result<CodeObject, DecodeError> {
        let version = py_version(magic).ok_or(DecodeError::UnsupportedMagic(magic))?;

        let (object, refs) = python_marshal::load_bytes(payload, version)?;
        let (object, refs) = resolve_all_refs(&object, &refs);

        if !refs.is_empty() {
            return Err(DecodeError::Marshal(
                "the payload contains references that cannot be resolved".into(),
            ));
        }

        match object {
            Object::Code(code) => code_from_marshal(code),
            _ => Err(DecodeError::RootNotCode),
        }
    }

    fn encode(&self, code: &CodeObject, magic: u16) -> Result<Vec<u8>, EncodeError> {
        let version = py_version(magic).ok_or(EncodeError::UnsupportedMagic(magic))?;

        // Decode resolved every reference, so the tree is written without any.
        let object = Object::Code(code_to_marshal(code)?);

        Ok(python_marshal::dump_bytes(
            object,
            None,
            version,
            MARSHAL_VERSION,
        )?)
    }
}

fn code_from_marshal(mut code: python_marshal::Code) -> Result<CodeObject, DecodeError> {
    let (name, bytecode, consts) = with_code_fields!(&mut code, c => {
        let name = match &*c.name {
            Object::String(name) => name.value.to_string(),
            _ => {
                return Err(DecodeError::UnexpectedObject {
                    field: "co_name",
                    expected: "a string",
                })
            }
        };
        let bytecode = match std::mem::replace(&mut *c.code, Object::None) {
            Object::Bytes(bytes) => bytes,
            _ => {
                return Err(DecodeError::UnexpectedObject {
                    field: "co_code",
                    expected: "bytes",
                })
            }
        };
        let consts = match std::mem::replace(&mut *c.consts, Object::None) {
            Object::Tuple(items) => items,
            _ => {
                return Err(DecodeError::UnexpectedObject {
                    field: "co_consts",
                    expected: "a tuple",
                })
            }
        };
        (name, bytecode, consts)
    });

    let constants = consts
        .into_iter()
        .map(constant_from_marshal)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CodeObject::new(name, bytecode, constants, Extra::Generic(code)))
}

fn constant_from_marshal(object: Object) -> Result<Constant, DecodeError> {
    Ok(match object {
        Object::Code(code) => Constant::Code(code_from_marshal(code)?),
        Object::String(string) => {
            let text = string.value.to_string();
            let literal = literal::string(&text);
            Constant::String(StringValue::new(
                text,
                Value::generic(Object::String(string), literal),
            ))
        }
        other => {
            let literal = literal_of(&other);
            Constant::Scalar(Value::generic(other, literal))
        }
    })
}

fn literal_of(object: &Object) -> String {
    let all = |items: &[Object]| items.iter().map(literal_of).collect::<Vec<_>>();

    match object {
        Object::None => "None".into(),
        Object::StopIteration => "StopIteration".into(),
        Object::Ellipsis => "Ellipsis".into(),
        Object::Bool(value) => literal::boolean(*value),
        Object::Long(value) => value.to_string(),
        Object::Float(value) => literal::float(value.0),
        Object::Complex(value) => literal::complex(value.re.0, value.im.0),
        Object::Bytes(bytes) => literal::bytes(bytes),
        Object::String(string) => literal::string(&string.value.to_string()),
        Object::Tuple(items) => literal::tuple(all(items)),
        Object::List(items) => literal::list(all(items)),
        Object::FrozenSet(items) => literal::frozenset(
            items
                .iter()
                .map(|item| literal_of(&Object::from(item.clone()))),
        ),
        Object::Code(code) => with_code_fields!(code, c => match &*c.name {
            Object::String(name) => literal::code(&name.value.to_string()),
            _ => literal::code(""),
        }),
        other => format!("{other:?}"),
    }
}

fn code_to_marshal(code: &CodeObject) -> Result<python_marshal::Code, EncodeError> {
    let Extra::Generic(template) = code.extra() else {
        return Err(foreign(BackendKind::Generic, code));
    };

    let consts = code
        .constants()
        .iter()
        .map(constant_to_marshal)
        .collect::<Result<Vec<_>, _>>()?;

    let mut marshalled = template.clone();
    with_code_fields!(&mut marshalled, c => {
        *c.code = Object::Bytes(code.bytecode().to_vec());
        *c.consts = Object::Tuple(consts);
    });

    Ok(marshalled)
}

fn constant_to_marshal(constant: &Constant) -> Result<Object, EncodeError> {
    let value = match constant {
        Constant::Code(code) => return Ok(Object::Code(code_to_marshal(code)?)),
        Constant::Scalar(value) => value,
        Constant::String(string) => &string.raw,
    };

    match &value.repr {
        Repr::Generic(object) => Ok(object.clone()),
        Repr::Native(_) => Err(EncodeError::ForeignNode {
            expected: BackendKind::Generic.name(),
            found: BackendKind::Native.name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::marshal::{self, fixtures};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_py_version_from_magic() {
        assert!(py_version(3439).is_some());
        assert!(py_version(3500).is_some());
        assert!(py_version(3571).is_some());
        assert!(py_version(3394).is_none());
        assert!(py_version(62211).is_none());
    }

    #[test]
    fn test_unsupported_magic() {
        let payload = fixtures::to_bytes(&fixtures::code("top", &[1, 2], vec![]));

        assert!(matches!(
            GenericBackend.decode(&payload, 3394),
            Err(DecodeError::UnsupportedMagic(3394))
        ));
    }

    #[test]
    fn test_decode_matches_native() {
        let payload = fixtures::to_bytes(
            &fixtures::code(
                "top",
                &[1, 2],
                vec![
                    marshal::Object::None,
                    fixtures::code("inner", &[0; 4], vec![]),
                ],
            )
            .flagged_if(true),
        );

        let generic = GenericBackend.decode(&payload, 3531).unwrap();
        let native = NativeBackend::new().decode(&payload, 3531).unwrap();

        assert_eq!(generic.name(), native.name());
        assert_eq!(generic.bytecode(), native.bytecode());
        assert_eq!(generic.constants().len(), native.constants().len());
        assert_eq!(generic.backend(), BackendKind::Generic);

        let Constant::Code(inner) = &generic.constants()[1] else {
            panic!("expected a nested code object");
        };
        assert_eq!(inner.name(), "inner");
        assert_eq!(inner.bytecode(), &[0; 4]);
    }

    /// `<module>` holding `f` and `g`, where `g` shares `f`'s constants tuple and
    /// the module refers back to an interned string, as CPython writes them.
    fn shared_payload() -> Vec<u8> {
        let with_consts = |name: &str, consts: marshal::Object| {
            let mut code = fixtures::code(name, &[0x97, 0x00, 0x79, 0x00], vec![]);
            if let marshal::Object::Code(raw) = &mut code {
                *raw.object_mut("consts").unwrap() = consts;
            }
            code
        };
        let none_tuple = marshal::Object::Tuple {
            items: vec![marshal::Object::None],
            small: true,
        };

        // Reference 0 is the module, 1 the tuple, 2 the string.
        let root = fixtures::code(
            "<module>",
            &[0x97, 0x00, 0x64, 0x00],
            vec![
                with_consts("f", none_tuple.flagged_if(true)),
                with_consts("g", marshal::Object::Ref(1)),
                fixtures::short_ascii("f").flagged_if(true),
                marshal::Object::Ref(2),
                marshal::Object::Int(7),
            ],
        )
        .flagged_if(true);
        fixtures::to_bytes(&root)
    }

    /// Decodes with the crate's own reader, independent of `python_marshal`.
    fn summary(payload: &[u8]) -> Vec<(String, Vec<u8>, Vec<String>)> {
        let tree = NativeBackend::new().decode(payload, 3531).unwrap();
        crate::flatten::flatten(&tree)
            .iter()
            .map(|node| {
                (
                    node.name().to_string(),
                    node.bytecode().to_vec(),
                    node.constants().iter().map(ToString::to_string).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_reencode_is_readable() {
        let payload = shared_payload();

        let decoded = GenericBackend.decode(&payload, 3531).unwrap();
        let encoded = GenericBackend.encode(&decoded, 3531).unwrap();

        assert_eq!(summary(&encoded), summary(&payload));
        assert_eq!(
            summary(&payload)[0].2,
            vec!["<code object f>", "<code object g>", "'f'", "'f'", "7"]
        );
    }

    #[test]
    fn test_patched_reencode_is_local() {
        let payload = shared_payload();
        let decoded = GenericBackend.decode(&payload, 3531).unwrap();

        let patched = crate::patch::apply(&decoded, 2, vec![0x09, 0x00]).unwrap();
        let encoded = GenericBackend.encode(&patched, 3531).unwrap();

        let mut expected = summary(&payload);
        expected[2].1 = vec![0x09, 0x00];
        assert_eq!(summary(&encoded), expected);
        assert_eq!(expected[1].2, vec!["None"]);
        assert_eq!(expected[2].2, vec!["None"]);
    }

    #[test]
    fn test_refuses_native_tree() {
        let payload = fixtures::to_bytes(&fixtures::code("top", &[1, 2], vec![]));
        let native = NativeBackend::new().decode(&payload, 3531).unwrap();

        assert!(matches!(
            GenericBackend.encode(&native, 3531),
            Err(EncodeError::ForeignNode {
                expected: "generic",
                found: "native"
            })
        ));
    }
}
