use log::debug;

use crate::code::CodeObject;
use crate::error::Error;
use crate::flatten;

/// Returns a copy of `tree` in which the code object at `index` (see
/// [`flatten::flatten`]) has `bytecode` as its bytecode. `tree` itself is not modified.
pub fn apply(tree: &CodeObject, index: usize, bytecode: Vec<u8>) -> Result<CodeObject, Error> {
    let paths = flatten::walk(tree)
        .into_iter()
        .map(|(path, _)| path)
        .collect::<Vec<_>>();

    let out_of_range = || Error::Index {
        index: i64::try_from(index).unwrap_or(i64::MAX),
        count: paths.len(),
    };
    let path = paths.get(index).ok_or_else(out_of_range)?;

    let mut patched = tree.clone();
    let mut node = &mut patched;
    for &step in path {
        node = node.child_mut(step).ok_or_else(out_of_range)?;
    }

    debug!(
        "replacing {} bytes of bytecode in {} (index {index}) with {} bytes",
        node.bytecode().len(),
        node.name(),
        bytecode.len()
    );
    node.set_bytecode(bytecode);

    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, NativeBackend};
    use crate::flatten::flatten;
    use crate::marshal::{fixtures, Object};
    use pretty_assertions::assert_eq;

    fn tree() -> CodeObject {
        let inner = fixtures::code("inner", &[9, 9, 9, 9], vec![]);
        let other = fixtures::code("other", &[7, 7], vec![]);
        let root = fixtures::code("top", &[1, 2], vec![Object::None, inner, other]);

        NativeBackend::new()
            .decode(&fixtures::to_bytes(&root), 3500)
            .unwrap()
    }

    #[test]
    fn test_patch_root() {
        let tree = tree();
        let patched = apply(&tree, 0, vec![3, 4]).unwrap();

        assert_eq!(patched.bytecode(), &[3, 4]);
        assert_eq!(patched.constants()[1..], tree.constants()[1..]);
    }

    #[test]
    fn test_patch_is_local() {
        let tree = tree();
        let patched = apply(&tree, 1, vec![0xaa; 6]).unwrap();

        let before = flatten(&tree);
        let after = flatten(&patched);
        assert_eq!(before.len(), after.len());
        assert_eq!(after[1].bytecode(), &[0xaa; 6]);
        assert_eq!(after[1].name(), "inner");
        assert_eq!(after[1].constants(), before[1].constants());

        for j in [0, 2] {
            assert_eq!(after[j].name(), before[j].name());
            assert_eq!(after[j].bytecode(), before[j].bytecode());
        }
        assert_eq!(after[2], before[2]);
    }

    #[test]
    fn test_source_tree_untouched() {
        let tree = tree();
        let copy = tree.clone();

        apply(&tree, 2, vec![]).unwrap();

        assert_eq!(tree, copy);
    }

    #[test]
    fn test_out_of_range() {
        let tree = tree();
        let copy = tree.clone();

        let result = apply(&tree, 3, vec![0]);
        assert!(matches!(result, Err(Error::Index { index: 3, count: 3 })));
        assert_eq!(tree, copy);
    }
}
