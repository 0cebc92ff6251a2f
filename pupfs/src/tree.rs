//! The directory tree a decoded container projects its segments onto.
//!
//! Nodes live in an arena (`Vec`); a node's identity is its index, handed
//! out in construction order, so identifiers are unique and monotonically
//! increasing without any shared counter. The parent→children edge owns;
//! the child→parent index is a back-reference used only for traversal.

use std::fmt;

#[cfg(feature = "serialize")]
use serde::Serialize;

/// The kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum NodeKind {
    Directory,
    Regular,
    Symlink,
}

#[derive(Debug)]
struct Node {
    name: String,
    kind: NodeKind,
    size: u64,
    /// Offset of the node's bytes in the backing stream, for regular files
    /// projected from a segment.
    offset: Option<u64>,
    parent: Option<u32>,
    children: Vec<u32>,
}

/// An immutable tree of [`NodeRef`]s rooted at a sentinel directory.
pub struct FsTree {
    nodes: Vec<Node>,
}

impl fmt::Debug for FsTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsTree")
            .field("len", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl Default for FsTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FsTree {
    /// Create a tree holding only the root sentinel directory.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "rootfs".into(),
                kind: NodeKind::Directory,
                size: 0,
                offset: None,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The root sentinel directory, always node 0.
    #[must_use]
    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { tree: self, ino: 0 }
    }

    /// The number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by identifier.
    #[must_use]
    pub fn get(&self, ino: u32) -> Option<NodeRef<'_>> {
        ((ino as usize) < self.nodes.len()).then_some(NodeRef { tree: self, ino })
    }

    /// Append a child under `parent` and return the new node's identifier.
    pub(crate) fn push_child(
        &mut self,
        parent: u32,
        name: String,
        kind: NodeKind,
        size: u64,
        offset: Option<u64>,
    ) -> u32 {
        let ino = self.nodes.len() as u32;
        self.nodes.push(Node {
            name,
            kind,
            size,
            offset,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent as usize].children.push(ino);
        ino
    }

    /// Resolve a slash-delimited path from the root.
    ///
    /// Empty components (leading, trailing or doubled slashes) are skipped.
    /// Returns `None` when any component is absent, never an error, so
    /// callers can tell a missing path from a decode failure.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<NodeRef<'_>> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(self.root(), |node, name| node.child(name))
    }

    /// Render the tree as an indented listing, one node per line.
    #[must_use]
    pub fn render(&self) -> String {
        fn walk(out: &mut String, node: NodeRef<'_>, depth: usize) {
            for _ in 0..depth {
                out.push_str("    ");
            }
            out.push_str(node.name());
            out.push('\n');
            for child in node.children() {
                walk(out, child, depth + 1);
            }
        }
        let mut out = String::new();
        walk(&mut out, self.root(), 0);
        out
    }
}

/// A node handle; cheap to copy, borrows the tree.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a FsTree,
    ino: u32,
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("ino", &self.ino)
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a Node {
        &self.tree.nodes[self.ino as usize]
    }

    /// The node identifier, unique within its tree.
    #[must_use]
    pub fn ino(&self) -> u32 {
        self.ino
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.node().kind
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.node().size
    }

    /// Offset of the node's bytes in the backing stream, if it has any.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.node().offset
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeRef<'a>> {
        let parent = self.node().parent?;
        Some(NodeRef {
            tree: self.tree,
            ino: parent,
        })
    }

    /// Iterate children in insertion order.
    pub fn children(&self) -> impl ExactSizeIterator<Item = NodeRef<'a>> + '_ {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&ino| NodeRef { tree, ino })
    }

    /// Find a direct child by name. Duplicate names resolve to the first.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<NodeRef<'a>> {
        self.children().find(|c| c.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FsTree {
        let mut tree = FsTree::new();
        let root = tree.root().ino();
        tree.push_child(root, "a.txt".into(), NodeKind::Regular, 3, Some(100));
        let dir = tree.push_child(root, "sub".into(), NodeKind::Directory, 0, None);
        tree.push_child(dir, "b.bin".into(), NodeKind::Regular, 7, Some(200));
        tree
    }

    #[test]
    fn identifiers_are_monotone() {
        let tree = sample();
        assert_eq!(tree.root().ino(), 0);
        let inos: Vec<u32> = tree.root().children().map(|c| c.ino()).collect();
        assert_eq!(inos, [1, 2]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn lookup_resolves_components() {
        let tree = sample();
        assert_eq!(tree.lookup("/a.txt").unwrap().size(), 3);
        assert_eq!(tree.lookup("sub/b.bin").unwrap().offset(), Some(200));
        // Doubled and trailing slashes are tolerated.
        assert_eq!(tree.lookup("//sub//b.bin/").unwrap().ino(), 3);
        assert_eq!(tree.lookup("/").unwrap().ino(), 0);
    }

    #[test]
    fn lookup_miss_is_none() {
        let tree = sample();
        assert!(tree.lookup("/nope").is_none());
        assert!(tree.lookup("/a.txt/inside").is_none());
        assert!(tree.lookup("/sub/nope").is_none());
    }

    #[test]
    fn parent_back_reference() {
        let tree = sample();
        let b = tree.lookup("/sub/b.bin").unwrap();
        assert_eq!(b.parent().unwrap().name(), "sub");
        assert_eq!(b.parent().unwrap().parent().unwrap().ino(), 0);
        assert!(tree.root().parent().is_none());
    }

    #[test]
    fn render_lists_all_nodes() {
        let got = sample().render();
        assert_eq!(got, "rootfs\n    a.txt\n    sub\n        b.bin\n");
    }

    #[test]
    fn duplicate_names_resolve_to_first() {
        let mut tree = FsTree::new();
        tree.push_child(0, "dup".into(), NodeKind::Regular, 1, Some(10));
        tree.push_child(0, "dup".into(), NodeKind::Regular, 2, Some(20));
        assert_eq!(tree.lookup("/dup").unwrap().ino(), 1);
        assert_eq!(tree.root().children().len(), 2);
    }
}
