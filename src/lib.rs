//! List the code objects inside a Python `.pyc` file and replace the bytecode of one of them.
//!
//! A payload is decoded by a [`Backend`] into a [`CodeObject`] tree. Nodes are addressed
//! by their position in the pre-order walk done by [`flatten::flatten`]; that same order
//! is used to print the listing and to pick the node to patch.

pub mod backend;
pub mod code;
pub mod error;
pub mod flatten;
pub mod header;
pub mod hexbytes;
mod literal;
pub mod magic;
pub mod marshal;
pub mod patch;

use std::fs;
use std::path::Path;

use log::info;

pub use backend::{Backend, BackendKind, GenericBackend, NativeBackend};
pub use code::{CodeObject, Constant, StringValue, Value};
pub use error::{DecodeError, EncodeError, Error};
pub use flatten::Entry;

use header::PycHeader;
use magic::PythonVersion;

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|source| Error::FileIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Decodes the code object tree of a complete pyc file.
pub fn load_pyc(data: &[u8], magic: u16, backend: &dyn Backend) -> Result<CodeObject, Error> {
    let (_, offset) = header::decode(data)?;
    Ok(backend.decode(&data[offset..], magic)?)
}

/// Encodes a tree into a complete pyc file with a zeroed header.
pub fn dump_pyc(code: &CodeObject, magic: u16, backend: &dyn Backend) -> Result<Vec<u8>, Error> {
    let payload = backend.encode(code, magic)?;
    Ok(header::encode(magic, &payload))
}

pub fn list_bytes(data: &[u8], magic: u16, backend: &dyn Backend) -> Result<Vec<Entry>, Error> {
    let tree = load_pyc(data, magic, backend)?;
    Ok(flatten::entries(&tree))
}

/// Replaces the bytecode of the code object at `index` and returns the new pyc file.
pub fn build_bytes(
    data: &[u8],
    magic: u16,
    backend: &dyn Backend,
    index: i64,
    bytecode: Vec<u8>,
) -> Result<Vec<u8>, Error> {
    let tree = load_pyc(data, magic, backend)?;

    let index = usize::try_from(index).map_err(|_| Error::Index {
        index,
        count: flatten::flatten(&tree).len(),
    })?;
    let patched = patch::apply(&tree, index, bytecode)?;

    dump_pyc(&patched, magic, backend)
}

/// The `name:size` listing of every code object in the file at `path`.
pub fn list_code_objects(
    path: impl AsRef<Path>,
    magic: u16,
    backend: &dyn Backend,
) -> Result<Vec<Entry>, Error> {
    let path = path.as_ref();
    let data = read_file(path)?;

    let entries = list_bytes(&data, magic, backend)?;
    info!(
        "{} holds {} code objects ({} backend)",
        path.display(),
        entries.len(),
        backend.kind()
    );
    Ok(entries)
}

/// Writes a copy of `path` to `out` in which the code object at `index` has the
/// bytecode given by `hex_bytes`.
///
/// `out` is only written once the whole file has been encoded.
pub fn build_pyc(
    path: impl AsRef<Path>,
    out: impl AsRef<Path>,
    magic: u16,
    backend: &dyn Backend,
    index: i64,
    hex_bytes: &str,
) -> Result<(), Error> {
    let (path, out) = (path.as_ref(), out.as_ref());

    let bytecode = hexbytes::decode(hex_bytes)?;
    let data = read_file(path)?;
    let output = build_bytes(&data, magic, backend, index, bytecode)?;

    fs::write(out, &output).map_err(|source| Error::FileIo {
        path: out.to_path_buf(),
        source,
    })?;
    info!("wrote {} bytes to {}", output.len(), out.display());
    Ok(())
}

/// What the header of a pyc file says about how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub header: PycHeader,
    pub version: Option<PythonVersion>,
    pub recommended: BackendKind,
}

pub fn inspect_bytes(data: &[u8]) -> Result<Inspection, Error> {
    let header = PycHeader::parse(data)?;
    let version = magic::python_version(header.magic);

    // The native backend is only trusted with its own host version.
    let recommended = if version == Some(NativeBackend::new().host()) {
        BackendKind::Native
    } else {
        BackendKind::Generic
    };

    Ok(Inspection {
        header,
        version,
        recommended,
    })
}

pub fn inspect_pyc(path: impl AsRef<Path>) -> Result<Inspection, Error> {
    inspect_bytes(&read_file(path.as_ref())?)
}
