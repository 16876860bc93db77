use num_bigint::{BigInt, BigUint, Sign};
use num_complex::Complex;
use num_traits::Zero;
use ordered_float::OrderedFloat;

use super::{tag, Field, Layout, Object, PyString, RawCode, Slot, StringKind, FLAG_REF, MAX_DEPTH};
use crate::error::DecodeError;

/// Bits per digit of a marshalled long.
const LONG_SHIFT: usize = 15;
const LONG_BASE: u16 = 1 << LONG_SHIFT;

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    layout: Layout,
    depth: usize,
    refs: Vec<Object>,
}

impl<'a> Reader<'a> {
    /// `layout` decides how code objects are read; everything else is version independent.
    pub fn new(data: &'a [u8], layout: Layout) -> Self {
        Reader {
            data,
            pos: 0,
            layout,
            depth: 0,
            refs: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Copies of the objects stored with `FLAG_REF` so far, indexed like [`Object::Ref`].
    pub fn into_refs(self) -> Vec<Object> {
        self.refs
    }

    pub fn read_object(&mut self) -> Result<Object, DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }

        self.depth += 1;
        let object = self.read_tagged();
        self.depth -= 1;
        object
    }

    fn read_tagged(&mut self) -> Result<Object, DecodeError> {
        let offset = self.pos;
        let code = self.u8()?;
        let flagged = code & FLAG_REF != 0;
        let tag = code & !FLAG_REF;

        // CPython never registers singletons or back-references, even when flagged.
        let registers = flagged
            && !matches!(
                tag,
                tag::NULL
                    | tag::NONE
                    | tag::FALSE
                    | tag::TRUE
                    | tag::STOPITER
                    | tag::ELLIPSIS
                    | tag::REF
            );

        // Containers reserve their slot before their items are read.
        let slot = registers.then(|| {
            self.refs.push(Object::Null);
            self.refs.len() - 1
        });

        let object = self.read_body(tag, offset)?;

        if let Some(slot) = slot {
            self.refs[slot] = object.clone();
        }

        Ok(object.flagged_if(flagged))
    }

    fn read_body(&mut self, tag: u8, offset: usize) -> Result<Object, DecodeError> {
        let object = match tag {
            tag::NULL => Object::Null,
            tag::NONE => Object::None,
            tag::FALSE => Object::False,
            tag::TRUE => Object::True,
            tag::STOPITER => Object::StopIteration,
            tag::ELLIPSIS => Object::Ellipsis,
            tag::INT => Object::Int(self.i32()?),
            tag::INT64 => {
                let bytes = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Object::Int64(i64::from_le_bytes(buf))
            }
            tag::LONG => Object::Long(self.long()?),
            tag::FLOAT => Object::FloatText(self.short_text()?),
            tag::BINARY_FLOAT => Object::Float(self.f64()?),
            tag::COMPLEX => {
                let re = self.short_text()?;
                let im = self.short_text()?;
                Object::ComplexText(re, im)
            }
            tag::BINARY_COMPLEX => {
                let re = self.f64()?;
                let im = self.f64()?;
                Object::Complex(Complex { re, im })
            }
            tag::STRING => {
                let length = self.length()?;
                Object::Bytes(self.take(length)?.to_vec())
            }
            tag::UNICODE
            | tag::INTERNED
            | tag::ASCII
            | tag::ASCII_INTERNED
            | tag::SHORT_ASCII
            | tag::SHORT_ASCII_INTERNED => {
                let kind = StringKind::from_tag(tag).ok_or(DecodeError::UnknownTag { tag, offset })?;
                let length = if kind.is_short() {
                    self.u8()? as usize
                } else {
                    self.length()?
                };
                Object::String(PyString {
                    data: self.take(length)?.to_vec(),
                    kind,
                })
            }
            tag::SMALL_TUPLE => {
                let count = self.u8()? as usize;
                Object::Tuple {
                    items: self.objects(count)?,
                    small: true,
                }
            }
            tag::TUPLE => {
                let count = self.count()?;
                Object::Tuple {
                    items: self.objects(count)?,
                    small: false,
                }
            }
            tag::LIST => {
                let count = self.count()?;
                Object::List(self.objects(count)?)
            }
            tag::SET => {
                let count = self.count()?;
                Object::Set(self.objects(count)?)
            }
            tag::FROZENSET => {
                let count = self.count()?;
                Object::FrozenSet(self.objects(count)?)
            }
            tag::DICT => {
                let mut entries = Vec::new();
                loop {
                    let key = self.read_object()?;
                    if key == Object::Null {
                        break;
                    }
                    let value = self.read_object()?;
                    entries.push((key, value));
                }
                Object::Dict(entries)
            }
            tag::REF => {
                let index = self.u32()?;
                if index as usize >= self.refs.len() {
                    return Err(DecodeError::BadReference(index));
                }
                Object::Ref(index)
            }
            tag::CODE => Object::Code(Box::new(self.code()?)),
            _ => return Err(DecodeError::UnknownTag { tag, offset }),
        };

        Ok(object)
    }

    fn code(&mut self) -> Result<RawCode, DecodeError> {
        let layout = self.layout;
        let fields = layout
            .slots()
            .iter()
            .map(|slot| match slot {
                Slot::Word(_) => self.u32().map(Field::Word),
                Slot::Object(_) => self.read_object().map(Field::Object),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawCode { layout, fields })
    }

    fn objects(&mut self, count: usize) -> Result<Vec<Object>, DecodeError> {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn long(&mut self) -> Result<BigInt, DecodeError> {
        let offset = self.pos;
        let n = self.i32()?;
        let size = n.unsigned_abs() as usize;
        self.check_length(offset, size.saturating_mul(2))?;

        let mut digits = Vec::with_capacity(size);
        for _ in 0..size {
            let digit = self.u16()?;
            if digit >= LONG_BASE {
                return Err(DecodeError::InvalidLong(offset));
            }
            digits.push(digit);
        }

        if digits.last() == Some(&0) {
            return Err(DecodeError::InvalidLong(offset));
        }

        let magnitude = digits.iter().rev().fold(BigUint::zero(), |acc, &digit| {
            (acc << LONG_SHIFT) | BigUint::from(digit)
        });
        let sign = match n {
            0 => Sign::NoSign,
            n if n < 0 => Sign::Minus,
            _ => Sign::Plus,
        };

        Ok(BigInt::from_biguint(sign, magnitude))
    }

    /// A one-byte length followed by that many bytes, as used by text floats.
    fn short_text(&mut self) -> Result<Vec<u8>, DecodeError> {
        let length = self.u8()? as usize;
        Ok(self.take(length)?.to_vec())
    }

    /// A 32-bit byte length that must fit in the remaining data.
    fn length(&mut self) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let length = self.i32()?;
        let length = usize::try_from(length).map_err(|_| DecodeError::NegativeLength { offset, length })?;
        self.check_length(offset, length)?;
        Ok(length)
    }

    /// A 32-bit item count. Every item takes at least one byte.
    fn count(&mut self) -> Result<usize, DecodeError> {
        self.length()
    }

    fn check_length(&self, offset: usize, length: usize) -> Result<(), DecodeError> {
        let remaining = self.data.len() - self.pos;
        if length > remaining {
            return Err(DecodeError::LengthOverflow {
                offset,
                length,
                remaining,
            });
        }
        Ok(())
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.data.len() - self.pos;
        if length > remaining {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: length - remaining,
            });
        }

        let bytes = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.u32()? as i32)
    }

    fn f64(&mut self) -> Result<OrderedFloat<f64>, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(OrderedFloat(f64::from_le_bytes(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::fixtures;
    use pretty_assertions::assert_eq;

    fn read(data: &[u8]) -> Result<Object, DecodeError> {
        Reader::new(data, Layout::Py311).read_object()
    }

    #[test]
    fn test_read_scalars() {
        assert_eq!(read(b"N").unwrap(), Object::None);
        assert_eq!(read(&[b'i', 0xff, 0xff, 0xff, 0xff]).unwrap(), Object::Int(-1));
        assert_eq!(
            read(&[b'z', 3, b'a', b'b', b'c']).unwrap(),
            fixtures::short_ascii("abc")
        );
        assert_eq!(
            read(&[b's', 2, 0, 0, 0, 0x97, 0x00]).unwrap(),
            Object::Bytes(vec![0x97, 0x00])
        );
    }

    #[test]
    fn test_read_long() {
        // 2**15 + 1 == digits [1, 1]
        let data = [b'l', 2, 0, 0, 0, 1, 0, 1, 0];
        assert_eq!(read(&data).unwrap(), Object::Long(BigInt::from(32769)));

        let negative = [b'l', 0xfe, 0xff, 0xff, 0xff, 1, 0, 1, 0];
        assert_eq!(read(&negative).unwrap(), Object::Long(BigInt::from(-32769)));
    }

    #[test]
    fn test_read_unnormalized_long() {
        let data = [b'l', 2, 0, 0, 0, 1, 0, 0, 0];
        assert!(matches!(read(&data), Err(DecodeError::InvalidLong(1))));
    }

    #[test]
    fn test_flagged_objects_are_numbered_in_order() {
        // (flagged 'a', flagged 'b', ref 0)
        let data = [
            b')', 3, b'z' | FLAG_REF, 1, b'a', b'z' | FLAG_REF, 1, b'b', b'r', 0, 0, 0, 0,
        ];
        let mut reader = Reader::new(&data, Layout::Py311);
        let object = reader.read_object().unwrap();

        assert_eq!(
            object,
            Object::Tuple {
                items: vec![
                    fixtures::short_ascii("a").flagged_if(true),
                    fixtures::short_ascii("b").flagged_if(true),
                    Object::Ref(0),
                ],
                small: true,
            }
        );
        assert_eq!(
            reader.into_refs(),
            vec![fixtures::short_ascii("a"), fixtures::short_ascii("b")]
        );
    }

    #[test]
    fn test_container_reserves_slot_before_items() {
        let data = [b')' | FLAG_REF, 1, b'z' | FLAG_REF, 1, b'x'];
        let mut reader = Reader::new(&data, Layout::Py311);
        reader.read_object().unwrap();

        let tuple = Object::Tuple {
            items: vec![fixtures::short_ascii("x").flagged_if(true)],
            small: true,
        };
        assert_eq!(
            reader.into_refs(),
            vec![tuple, fixtures::short_ascii("x")]
        );
    }

    #[test]
    fn test_flagged_singleton_is_not_registered() {
        let data = [b'N' | FLAG_REF];
        let mut reader = Reader::new(&data, Layout::Py311);

        assert_eq!(reader.read_object().unwrap(), Object::None.flagged_if(true));
        assert!(reader.into_refs().is_empty());
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(read(b""), Err(DecodeError::Truncated { offset: 0, needed: 1 })));
        assert!(matches!(
            read(&[b'z', 5, b'a']),
            Err(DecodeError::Truncated { offset: 2, needed: 4 })
        ));
    }

    #[test]
    fn test_length_prefix_overflow() {
        assert!(matches!(
            read(&[b's', 0x10, 0, 0, 0, 1, 2]),
            Err(DecodeError::LengthOverflow {
                offset: 1,
                length: 16,
                remaining: 2
            })
        ));
        assert!(matches!(
            read(&[b'(', 0xff, 0xff, 0xff, 0x7f]),
            Err(DecodeError::LengthOverflow { .. })
        ));
        assert!(matches!(
            read(&[b's', 0xff, 0xff, 0xff, 0xff]),
            Err(DecodeError::NegativeLength { length: -1, .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            read(&[b')', 1, b'?']),
            Err(DecodeError::UnknownTag { tag: b'?', offset: 2 })
        ));
    }

    #[test]
    fn test_dangling_reference() {
        assert!(matches!(
            read(&[b'r', 3, 0, 0, 0]),
            Err(DecodeError::BadReference(3))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |levels: usize| {
            let mut data = [b')', 1].repeat(levels);
            data.push(b'N');
            data
        };

        assert!(read(&nested(MAX_DEPTH - 1)).is_ok());
        assert!(matches!(
            read(&nested(MAX_DEPTH)),
            Err(DecodeError::TooDeep(MAX_DEPTH))
        ));
        assert!(matches!(
            read(&nested(5 * MAX_DEPTH)),
            Err(DecodeError::TooDeep(MAX_DEPTH))
        ));
    }

    #[test]
    fn test_read_code() {
        let code = fixtures::code("top", &[1, 2], vec![Object::None]);
        let data = fixtures::to_bytes(&code);

        let mut reader = Reader::new(&data, Layout::Py311);
        assert_eq!(reader.read_object().unwrap(), code);
        assert_eq!(reader.position(), data.len());
    }
}
