//! Defines the core abstraction for a navigable, read-only data source tree.
use std::hash::Hash;

/// A qualified name, consisting of an optional prefix and a local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

impl<'a> QName<'a> {
    /// Splits a lexical `prefix:local` name.
    pub fn parse(name: &'a str) -> Self {
        match name.split_once(':') {
            Some((prefix, local_part)) => QName {
                prefix: Some(prefix),
                local_part,
            },
            None => QName {
                prefix: None,
                local_part: name,
            },
        }
    }
}

/// The type of a node in the data source tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The contract the XPath engine is written against.
///
/// Implementations must order nodes (`Ord`) in document order: the engine relies on it to
/// return node-sets sorted and free of duplicates.
///
/// `'a` is the lifetime of the underlying tree.
pub trait DataSourceNode<'a>:
    std::fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord
{
    /// The type of the node (Element, Text, Attribute, etc.).
    fn node_type(&self) -> NodeType;

    /// The qualified name of the node (e.g., `orx:meta`). Returns `None` for node
    /// types that do not have names, such as text or root nodes. For a processing-
    /// instruction, this is its target.
    fn name(&self) -> Option<QName<'a>>;

    /// The string value of the node, as defined by the XPath 1.0 `string()` function.
    /// - For a text node, this is its content.
    /// - For an element or the root, this is the concatenation of the string values of all
    ///   its descendant text nodes.
    /// - For an attribute, this is its value.
    /// - For a comment or processing instruction, this is its content.
    fn string_value(&self) -> String;

    /// An iterator over the attribute nodes of this node.
    /// The iterator will be empty for non-element nodes.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// An iterator over the child nodes of this node.
    /// The iterator will be empty for leaf nodes (like text or attributes).
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// The parent node. `None` for the root node. An attribute's parent is its element.
    fn parent(&self) -> Option<Self>;
}

// Test utilities - publicly available for integration testing in downstream crates
pub mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::hash::Hasher;

    #[derive(Debug, Clone)]
    struct MockNodeData {
        node_type: NodeType,
        name: Option<&'static str>,
        value: String,
        parent: Option<usize>,
        children: Vec<usize>,
        attributes: Vec<usize>,
    }

    /// An in-memory tree whose node ids are allocated in document order.
    #[derive(Debug, Default)]
    pub struct MockTree {
        nodes: Vec<MockNodeData>,
    }

    /// A node handle that borrows its tree so it can navigate.
    #[derive(Debug, Clone, Copy)]
    pub struct MockNode<'a> {
        pub id: usize,
        pub tree: &'a MockTree,
    }

    impl MockTree {
        /// Appends a node under `parent`. Callers must add nodes in document order
        /// (an element, then its attributes, then its children).
        pub fn push(
            &mut self,
            parent: Option<usize>,
            node_type: NodeType,
            name: Option<&'static str>,
            value: &str,
        ) -> usize {
            let id = self.nodes.len();
            self.nodes.push(MockNodeData {
                node_type,
                name,
                value: value.to_string(),
                parent,
                children: vec![],
                attributes: vec![],
            });
            if let Some(p) = parent {
                if node_type == NodeType::Attribute {
                    self.nodes[p].attributes.push(id);
                } else {
                    self.nodes[p].children.push(id);
                }
            }
            id
        }

        pub fn node(&self, id: usize) -> MockNode<'_> {
            MockNode { id, tree: self }
        }
    }

    impl<'a> PartialEq for MockNode<'a> {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }
    impl<'a> Eq for MockNode<'a> {}

    impl<'a> PartialOrd for MockNode<'a> {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl<'a> Ord for MockNode<'a> {
        fn cmp(&self, other: &Self) -> Ordering {
            self.id.cmp(&other.id)
        }
    }

    impl<'a> Hash for MockNode<'a> {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl<'a> DataSourceNode<'a> for MockNode<'a> {
        fn node_type(&self) -> NodeType {
            self.tree.nodes[self.id].node_type
        }

        fn name(&self) -> Option<QName<'a>> {
            self.tree.nodes[self.id].name.map(QName::parse)
        }

        fn string_value(&self) -> String {
            let data = &self.tree.nodes[self.id];
            match data.node_type {
                NodeType::Root | NodeType::Element => self
                    .children()
                    .filter(|c| matches!(c.node_type(), NodeType::Element | NodeType::Text))
                    .map(|c| c.string_value())
                    .collect(),
                _ => data.value.clone(),
            }
        }

        fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .attributes
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .children
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn parent(&self) -> Option<Self> {
            self.tree.nodes[self.id].parent.map(|id| MockNode {
                id,
                tree: self.tree,
            })
        }
    }

    /// Creates a small form-instance-like tree for testing:
    /// ```text
    /// /                                             0
    ///   <city ordinal="1" xml:lang="en">ams</city>  1, attrs 2 & 3, text 4
    ///   <!-- note -->                               5
    ///   <empty/>                                    6
    ///   <?pi-target pi-value?>                      7
    ///   <city>rot</city>                            8, text 9
    /// ```
    pub fn create_test_tree() -> MockTree {
        let mut tree = MockTree::default();
        let root = tree.push(None, NodeType::Root, None, "");
        let city = tree.push(Some(root), NodeType::Element, Some("city"), "");
        tree.push(Some(city), NodeType::Attribute, Some("ordinal"), "1");
        tree.push(Some(city), NodeType::Attribute, Some("xml:lang"), "en");
        tree.push(Some(city), NodeType::Text, None, "ams");
        tree.push(Some(root), NodeType::Comment, None, " note ");
        tree.push(Some(root), NodeType::Element, Some("empty"), "");
        tree.push(
            Some(root),
            NodeType::ProcessingInstruction,
            Some("pi-target"),
            "pi-value",
        );
        let city2 = tree.push(Some(root), NodeType::Element, Some("city"), "");
        tree.push(Some(city2), NodeType::Text, None, "rot");
        tree
    }

    #[test]
    fn test_mock_string_values() {
        let tree = create_test_tree();
        assert_eq!(tree.node(0).string_value(), "amsrot");
        assert_eq!(tree.node(1).string_value(), "ams");
        assert_eq!(tree.node(3).string_value(), "en");
        assert_eq!(
            tree.node(3).name(),
            Some(QName {
                prefix: Some("xml"),
                local_part: "lang"
            })
        );
        assert_eq!(tree.node(2).parent(), Some(tree.node(1)));
    }
}
