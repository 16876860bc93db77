use num_bigint::{BigUint, Sign};
use num_traits::{ToPrimitive, Zero};

use super::{tag, Field, Object, FLAG_REF};
use crate::error::EncodeError;

pub struct Writer {
    out: Vec<u8>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Writer { out: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn write_object(&mut self, object: &Object) -> Result<(), EncodeError> {
        match object {
            Object::Flagged(inner) => self.write_body(inner, FLAG_REF),
            other => self.write_body(other, 0),
        }
    }

    fn write_body(&mut self, object: &Object, flag: u8) -> Result<(), EncodeError> {
        let tagged = |out: &mut Vec<u8>, tag: u8| out.push(tag | flag);

        match object {
            Object::Null => tagged(&mut self.out, tag::NULL),
            Object::None => tagged(&mut self.out, tag::NONE),
            Object::False => tagged(&mut self.out, tag::FALSE),
            Object::True => tagged(&mut self.out, tag::TRUE),
            Object::StopIteration => tagged(&mut self.out, tag::STOPITER),
            Object::Ellipsis => tagged(&mut self.out, tag::ELLIPSIS),
            Object::Int(value) => {
                tagged(&mut self.out, tag::INT);
                self.out.extend_from_slice(&value.to_le_bytes());
            }
            Object::Int64(value) => {
                tagged(&mut self.out, tag::INT64);
                self.out.extend_from_slice(&value.to_le_bytes());
            }
            Object::Long(value) => {
                tagged(&mut self.out, tag::LONG);
                self.long(value.sign(), value.magnitude())?;
            }
            Object::FloatText(text) => {
                tagged(&mut self.out, tag::FLOAT);
                self.short_text("float", text)?;
            }
            Object::Float(value) => {
                tagged(&mut self.out, tag::BINARY_FLOAT);
                self.out.extend_from_slice(&value.0.to_le_bytes());
            }
            Object::ComplexText(re, im) => {
                tagged(&mut self.out, tag::COMPLEX);
                self.short_text("complex", re)?;
                self.short_text("complex", im)?;
            }
            Object::Complex(value) => {
                tagged(&mut self.out, tag::BINARY_COMPLEX);
                self.out.extend_from_slice(&value.re.0.to_le_bytes());
                self.out.extend_from_slice(&value.im.0.to_le_bytes());
            }
            Object::Bytes(bytes) => {
                tagged(&mut self.out, tag::STRING);
                self.length("bytes", bytes.len())?;
                self.out.extend_from_slice(bytes);
            }
            Object::String(string) => {
                tagged(&mut self.out, string.kind.tag());
                if string.kind.is_short() {
                    self.short_text("string", &string.data)?;
                } else {
                    self.length("string", string.data.len())?;
                    self.out.extend_from_slice(&string.data);
                }
            }
            Object::Tuple { items, small } => {
                if *small {
                    tagged(&mut self.out, tag::SMALL_TUPLE);
                    let count = u8::try_from(items.len()).map_err(|_| EncodeError::TooLong {
                        field: "small tuple",
                        length: items.len(),
                    })?;
                    self.out.push(count);
                } else {
                    tagged(&mut self.out, tag::TUPLE);
                    self.length("tuple", items.len())?;
                }
                self.objects(items)?;
            }
            Object::List(items) => {
                tagged(&mut self.out, tag::LIST);
                self.length("list", items.len())?;
                self.objects(items)?;
            }
            Object::Set(items) => {
                tagged(&mut self.out, tag::SET);
                self.length("set", items.len())?;
                self.objects(items)?;
            }
            Object::FrozenSet(items) => {
                tagged(&mut self.out, tag::FROZENSET);
                self.length("frozenset", items.len())?;
                self.objects(items)?;
            }
            Object::Dict(entries) => {
                tagged(&mut self.out, tag::DICT);
                for (key, value) in entries {
                    self.write_object(key)?;
                    self.write_object(value)?;
                }
                self.out.push(tag::NULL);
            }
            Object::Code(code) => {
                tagged(&mut self.out, tag::CODE);
                for field in &code.fields {
                    match field {
                        Field::Word(word) => self.out.extend_from_slice(&word.to_le_bytes()),
                        Field::Object(object) => self.write_object(object)?,
                    }
                }
            }
            Object::Ref(index) => {
                tagged(&mut self.out, tag::REF);
                self.out.extend_from_slice(&index.to_le_bytes());
            }
            Object::Flagged(inner) => self.write_body(inner, flag)?,
        }

        Ok(())
    }

    fn objects(&mut self, items: &[Object]) -> Result<(), EncodeError> {
        items.iter().try_for_each(|item| self.write_object(item))
    }

    fn length(&mut self, field: &'static str, length: usize) -> Result<(), EncodeError> {
        let length = i32::try_from(length).map_err(|_| EncodeError::TooLong { field, length })?;
        self.out.extend_from_slice(&length.to_le_bytes());
        Ok(())
    }

    fn short_text(&mut self, field: &'static str, text: &[u8]) -> Result<(), EncodeError> {
        let length = u8::try_from(text.len()).map_err(|_| EncodeError::TooLong {
            field,
            length: text.len(),
        })?;
        self.out.push(length);
        self.out.extend_from_slice(text);
        Ok(())
    }

    fn long(&mut self, sign: Sign, magnitude: &BigUint) -> Result<(), EncodeError> {
        let mask = BigUint::from(0x7fffu32);
        let mut rest = magnitude.clone();
        let mut digits = Vec::new();
        while !rest.is_zero() {
            digits.push((&rest & &mask).to_u16().unwrap_or_default());
            rest >>= 15;
        }

        let count = i32::try_from(digits.len()).map_err(|_| EncodeError::TooLong {
            field: "long",
            length: digits.len(),
        })?;
        let count = if sign == Sign::Minus { -count } else { count };

        self.out.extend_from_slice(&count.to_le_bytes());
        for digit in digits {
            self.out.extend_from_slice(&digit.to_le_bytes());
        }
        Ok(())
    }
}
