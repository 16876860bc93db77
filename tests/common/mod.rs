//! Byte-level builders for synthetic pyc files, written independently of the crate's own encoder.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const FLAG_REF: u8 = 0x80;

pub fn short_ascii(value: &str) -> Vec<u8> {
    let mut out = vec![b'z', value.len() as u8];
    out.extend_from_slice(value.as_bytes());
    out
}

pub fn bytes(value: &[u8]) -> Vec<u8> {
    let mut out = vec![b's'];
    out.extend_from_slice(&(value.len() as i32).to_le_bytes());
    out.extend_from_slice(value);
    out
}

pub fn int(value: i32) -> Vec<u8> {
    let mut out = vec![b'i'];
    out.extend_from_slice(&value.to_le_bytes());
    out
}

pub fn none() -> Vec<u8> {
    vec![b'N']
}

pub fn small_tuple(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![b')', items.len() as u8];
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// A code object in the layout used by Python 3.11 to 3.13.
pub fn code(name: &str, bytecode: &[u8], consts: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![b'c' | FLAG_REF];
    for word in [0u32, 0, 0, 1, 0] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend(bytes(bytecode));
    out.extend(small_tuple(consts));
    out.extend(small_tuple(&[]));
    out.extend(small_tuple(&[]));
    out.extend(bytes(&[]));
    out.extend(short_ascii("test.py"));
    out.extend(short_ascii(name));
    out.extend(short_ascii(name));
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend(bytes(&[]));
    out.extend(bytes(&[]));
    out
}

/// A timestamp based pyc file around `payload`.
pub fn pyc(magic: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = magic.to_le_bytes().to_vec();
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&1_717_171_717u32.to_le_bytes());
    out.extend_from_slice(&123u32.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("Failed to write test file");
    path
}

/// Scenario file: a single code object `top` with bytecode 01 02.
pub fn single_node() -> Vec<u8> {
    pyc(3500, &code("top", &[0x01, 0x02], &[none()]))
}

/// Scenario file: `top` holding one nested code object `inner`.
pub fn nested() -> Vec<u8> {
    pyc(
        3500,
        &code(
            "top",
            &[0x97, 0x00, 0x64, 0x00, 0x53, 0x00],
            &[
                short_ascii("doc"),
                code("inner", &[0x97, 0x00, 0x79, 0x00], &[none()]),
                int(5),
            ],
        ),
    )
}

/// Magic number of `data/module.pyc`.
pub const MODULE_MAGIC: u16 = 3531;

/// `data/module.py` as compiled by CPython 3.12.
pub fn compiled_module() -> Vec<u8> {
    include_bytes!("../data/module.pyc").to_vec()
}
