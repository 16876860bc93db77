use bitflags::bitflags;
use log::warn;

use crate::error::DecodeError;

/// The payload always starts this many bytes into the file.
pub const HEADER_SIZE: usize = 16;

/// Follows the magic number in every pyc header.
pub const MARKER: [u8; 2] = *b"\r\n";

bitflags! {
    /// PEP 552 header flags (Python 3.7+).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PycFlags: u32 {
        const HASH_BASED = 0b01;
        const CHECK_SOURCE = 0b10;
    }
}

/// Source validation data stored after the flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Timestamp { mtime: u32, source_size: u32 },
    Hash(u64),
}

/// The fixed-size preamble in front of the marshalled payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PycHeader {
    pub magic: u16,
    pub marker: [u8; 2],
    pub flags: PycFlags,
    pub validation: Validation,
}

impl PycHeader {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let header: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(DecodeError::HeaderTooShort(data.len()))?;

        let word = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);

        let magic = u16::from_le_bytes([header[0], header[1]]);
        let marker = [header[2], header[3]];
        if marker != MARKER {
            warn!("pyc header of magic {magic} is not followed by \\r\\n");
        }

        let flags = PycFlags::from_bits_retain(word(4));
        let validation = if flags.contains(PycFlags::HASH_BASED) {
            let mut hash = [0u8; 8];
            hash.copy_from_slice(&header[8..16]);
            Validation::Hash(u64::from_le_bytes(hash))
        } else {
            Validation::Timestamp {
                mtime: word(8),
                source_size: word(12),
            }
        };

        Ok(PycHeader {
            magic,
            marker,
            flags,
            validation,
        })
    }
}

/// Returns the magic number and the offset of the payload.
pub fn decode(data: &[u8]) -> Result<(u16, usize), DecodeError> {
    if data.len() < HEADER_SIZE {
        return Err(DecodeError::HeaderTooShort(data.len()));
    }

    Ok((u16::from_le_bytes([data[0], data[1]]), HEADER_SIZE))
}

/// Writes a header carrying only the magic number in front of `payload`.
///
/// The flags, timestamp and size fields are zeroed, not recomputed. A runtime that
/// checks them against the source file may reject the result.
pub fn encode(magic: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&MARKER);
    out.extend_from_slice(&[0; HEADER_SIZE - 4]);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let out = encode(3500, &[0xe3, 0x01]);

        assert_eq!(out.len(), HEADER_SIZE + 2);
        assert_eq!(&out[..2], &3500u16.to_le_bytes());
        assert_eq!(&out[2..4], b"\r\n");
        assert!(out[4..16].iter().all(|&b| b == 0));
        assert_eq!(&out[16..], &[0xe3, 0x01]);
    }

    #[test]
    fn test_decode_skips_preamble() {
        let mut data = vec![0xcb, 0x0d, b'\r', b'\n'];
        data.extend_from_slice(&[0xaa; 12]);
        data.push(0xe3);

        assert_eq!(decode(&data).unwrap(), (0x0dcb, HEADER_SIZE));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode(&[0xcb, 0x0d, b'\r', b'\n']),
            Err(DecodeError::HeaderTooShort(4))
        ));
    }

    #[test]
    fn test_parse_timestamp_header() {
        let mut data = vec![0xa7, 0x0d, b'\r', b'\n', 0, 0, 0, 0];
        data.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        data.extend_from_slice(&42u32.to_le_bytes());

        let header = PycHeader::parse(&data).unwrap();
        assert_eq!(header.magic, 3495);
        assert_eq!(header.flags, PycFlags::empty());
        assert_eq!(
            header.validation,
            Validation::Timestamp {
                mtime: 1_700_000_000,
                source_size: 42
            }
        );
    }

    #[test]
    fn test_parse_hash_header() {
        let mut data = vec![0xcb, 0x0d, b'\r', b'\n', 3, 0, 0, 0];
        data.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());

        let header = PycHeader::parse(&data).unwrap();
        assert!(header.flags.contains(PycFlags::HASH_BASED | PycFlags::CHECK_SOURCE));
        assert_eq!(header.validation, Validation::Hash(0x0102_0304_0506_0708));
    }
}
