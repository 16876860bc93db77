use std::fmt;

use crate::code::CodeObject;

/// Constant indices leading from the root to a node.
pub type NodePath = Vec<usize>;

/// Every code object in the tree, root first, in pre-order.
///
/// Nested code objects are visited in the order they appear in `co_consts`. The
/// position of a node in this list is the index used to patch it.
pub fn flatten(root: &CodeObject) -> Vec<&CodeObject> {
    walk(root).into_iter().map(|(_, node)| node).collect()
}

/// Same order as [`flatten`], with the path to each node.
pub fn walk(root: &CodeObject) -> Vec<(NodePath, &CodeObject)> {
    let mut nodes = Vec::new();
    let mut stack = vec![(NodePath::new(), root)];

    while let Some((path, node)) = stack.pop() {
        let children = node.children().collect::<Vec<_>>();
        for (index, child) in children.into_iter().rev() {
            let mut child_path = path.clone();
            child_path.push(index);
            stack.push((child_path, child));
        }
        nodes.push((path, node));
    }

    nodes
}

/// One line of the listing: a code object's name and bytecode length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: usize,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.size)
    }
}

impl From<&CodeObject> for Entry {
    fn from(code: &CodeObject) -> Self {
        Entry {
            name: code.name().to_string(),
            size: code.bytecode().len(),
        }
    }
}

pub fn entries(root: &CodeObject) -> Vec<Entry> {
    flatten(root).into_iter().map(Entry::from).collect()
}
