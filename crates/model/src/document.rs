//! Arena-backed XML tree for form instances.
//!
//! Nodes live in a flat `Vec` and refer to each other through [`NodeId`]s. Attributes are
//! arena nodes too, so the XPath engine can address them like any other node. Detached nodes
//! stay in the arena; they are unreachable from the root and sort after every attached node.
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use xform_xpath1::{DataSourceNode, NodeType, QName};

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    /// Element names are kept lexically, `prefix:local` or `local`.
    Element { name: String },
    Attribute { name: String, value: String },
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    /// Position of every node in document order, rebuilt lazily after a mutation.
    order: OnceCell<Vec<usize>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Document {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
            order: OnceCell::new(),
        }
    }

    /// Parses XML text. Whitespace-only text nodes are dropped and namespace declarations
    /// become `xmlns`/`xmlns:*` attributes of the element that introduces them.
    pub fn parse(text: &str) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let source = roxmltree::Document::parse_with_options(text, options)?;
        let mut doc = Document::new();
        let root = doc.root();
        for child in source.root().children() {
            doc.build(root, child);
        }
        Ok(doc)
    }

    fn build(&mut self, parent: NodeId, node: roxmltree::Node<'_, '_>) {
        let kind = match node.node_type() {
            roxmltree::NodeType::Element => {
                let id = self.push(NodeKind::Element {
                    name: element_name(node),
                });
                for (name, value) in namespace_declarations(node) {
                    self.set_attribute(id, &name, &value);
                }
                for attr in node.attributes() {
                    let name = attribute_name(node, attr.namespace(), attr.name());
                    self.set_attribute(id, &name, attr.value());
                }
                self.append_child(parent, id);
                for child in node.children() {
                    self.build(id, child);
                }
                return;
            }
            roxmltree::NodeType::Text => {
                let text = node.text().unwrap_or_default();
                if text.trim().is_empty() {
                    return;
                }
                NodeKind::Text(text.to_string())
            }
            roxmltree::NodeType::Comment => {
                NodeKind::Comment(node.text().unwrap_or_default().to_string())
            }
            roxmltree::NodeType::PI => match node.pi() {
                Some(pi) => NodeKind::ProcessingInstruction {
                    target: pi.target.to_string(),
                    data: pi.value.unwrap_or_default().to_string(),
                },
                None => return,
            },
            roxmltree::NodeType::Root => return,
        };
        let id = self.push(kind);
        self.append_child(parent, id);
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.order.take();
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.order.take();
        &mut self.nodes[id.0]
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The first element child of the root.
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root()).next()
    }

    pub fn node(&self, id: NodeId) -> XmlNode<'_> {
        XmlNode { doc: self, id }
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.data(id).kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element { .. })
    }

    /// Lexical name of an element or attribute, or the target of a processing instruction.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element { name } | NodeKind::Attribute { name, .. } => Some(name),
            NodeKind::ProcessingInstruction { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id).map(|name| QName::parse(name).local_part)
    }

    /// The parent of a node. For an attribute this is its owner element.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).parent
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|&parent| self.is_element(parent))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.data(id).children
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        &self.data(id).attributes
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| self.is_element(child))
    }

    pub fn has_element_children(&self, id: NodeId) -> bool {
        self.element_children(id).next().is_some()
    }

    fn sibling(&self, id: NodeId, offset: isize) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == id)?;
        let target = index.checked_add_signed(offset)?;
        siblings.get(target).copied()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling(id, -1)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling(id, 1)
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.previous_sibling(id);
        while let Some(node) = current {
            if self.is_element(node) {
                return Some(node);
            }
            current = self.previous_sibling(node);
        }
        None
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.next_sibling(id);
        while let Some(node) = current {
            if self.is_element(node) {
                return Some(node);
            }
            current = self.next_sibling(node);
        }
        None
    }

    pub fn attribute_node(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.attributes(id)
            .iter()
            .copied()
            .find(|&attr| self.name(attr) == Some(name))
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        let attr = self.attribute_node(id, name)?;
        match self.kind(attr) {
            NodeKind::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Finds an attribute by local name, whatever its prefix.
    pub fn attribute_by_local_name(&self, id: NodeId, local: &str) -> Option<&str> {
        self.attributes(id).iter().find_map(|&attr| match self.kind(attr) {
            NodeKind::Attribute { name, value } if QName::parse(name).local_part == local => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(attr) = self.attribute_node(id, name) {
            if let NodeKind::Attribute { value: current, .. } = &mut self.nodes[attr.0].kind {
                *current = value.to_string();
            }
            return;
        }
        let attr = self.push(NodeKind::Attribute {
            name: name.to_string(),
            value: value.to_string(),
        });
        self.nodes[attr.0].parent = Some(id);
        self.data_mut(id).attributes.push(attr);
    }

    /// Drops every attribute whose lexical name fails `keep`.
    pub fn retain_attributes(&mut self, id: NodeId, mut keep: impl FnMut(&str) -> bool) {
        let removed: Vec<NodeId> = self
            .attributes(id)
            .iter()
            .copied()
            .filter(|&attr| !self.name(attr).is_some_and(&mut keep))
            .collect();
        if removed.is_empty() {
            return;
        }
        self.data_mut(id)
            .attributes
            .retain(|attr| !removed.contains(attr));
        for attr in removed {
            self.nodes[attr.0].parent = None;
        }
    }

    /// The XPath string value of a node.
    pub fn text(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Text(text) | NodeKind::Comment(text) => text.clone(),
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::ProcessingInstruction { data, .. } => data.clone(),
            NodeKind::Root | NodeKind::Element { .. } => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match self.kind(child) {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { .. } => self.collect_text(child, out),
                _ => {}
            }
        }
    }

    /// Replaces the text children of a node with a single text node holding `value`.
    /// An empty value leaves no text node behind.
    pub fn set_text(&mut self, id: NodeId, value: &str) {
        let texts: Vec<NodeId> = self
            .children(id)
            .iter()
            .copied()
            .filter(|&child| matches!(self.kind(child), NodeKind::Text(_)))
            .collect();
        for text in texts {
            self.detach(text);
        }
        if !value.is_empty() {
            let text = self.push(NodeKind::Text(value.to_string()));
            self.append_child(id, text);
        }
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Element {
            name: name.to_string(),
        })
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.data_mut(parent).children.push(child);
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.data_mut(parent).children.insert(0, child);
    }

    /// Inserts `child` as the next sibling of `reference`. Does nothing if `reference` has no
    /// parent.
    pub fn insert_after(&mut self, reference: NodeId, child: NodeId) {
        let Some(parent) = self.parent(reference) else {
            return;
        };
        self.detach(child);
        let index = self
            .children(parent)
            .iter()
            .position(|&sibling| sibling == reference)
            .map_or(0, |index| index + 1);
        self.nodes[child.0].parent = Some(parent);
        self.data_mut(parent).children.insert(index, child);
    }

    /// Unlinks a node from its parent. The node and its subtree stay in the arena.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return;
        };
        let data = self.data_mut(parent);
        data.children.retain(|&child| child != id);
        data.attributes.retain(|&attr| attr != id);
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == self.root()
    }

    /// True if `ancestor` is `node` or one of its ancestors.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Elements below `id` in document order, excluding `id` itself.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.element_children(id).collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node);
            let start = stack.len();
            stack.extend(self.element_children(node));
            stack[start..].reverse();
        }
        out
    }

    /// Copies the subtree at `node` of `source` into this arena, detached. Returns the copy and
    /// a map from source ids to the new ids.
    pub fn import(
        &mut self,
        source: &Document,
        node: NodeId,
    ) -> (NodeId, HashMap<NodeId, NodeId>) {
        let mut mapping = HashMap::new();
        let copy = self.import_node(source, node, &mut mapping);
        (copy, mapping)
    }

    fn import_node(
        &mut self,
        source: &Document,
        node: NodeId,
        mapping: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let copy = self.push(source.kind(node).clone());
        mapping.insert(node, copy);
        for &attr in source.attributes(node) {
            let attr_copy = self.push(source.kind(attr).clone());
            mapping.insert(attr, attr_copy);
            self.nodes[attr_copy.0].parent = Some(copy);
            self.nodes[copy.0].attributes.push(attr_copy);
        }
        for &child in source.children(node) {
            let child_copy = self.import_node(source, child, mapping);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    /// Clones the subtree at `node` into a standalone document whose root holds the copy.
    pub fn fragment(&self, node: NodeId) -> (Document, NodeId, HashMap<NodeId, NodeId>) {
        let mut fragment = Document::new();
        let (copy, mapping) = fragment.import(self, node);
        let root = fragment.root();
        fragment.append_child(root, copy);
        (fragment, copy, mapping)
    }

    /// Resolves a namespace prefix (`None` for the default namespace) against the `xmlns`
    /// attributes in scope at `id`.
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        let attribute = match prefix {
            Some("xml") => return Some(XML_NAMESPACE),
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(uri) = self.attribute(node, &attribute) {
                return Some(uri);
            }
            current = self.parent(node);
        }
        None
    }

    fn document_order(&self) -> &[usize] {
        self.order.get_or_init(|| {
            let mut order = vec![usize::MAX; self.nodes.len()];
            let mut next = 0;
            let mut stack = vec![self.root()];
            while let Some(id) = stack.pop() {
                order[id.0] = next;
                next += 1;
                let data = self.data(id);
                for attr in &data.attributes {
                    order[attr.0] = next;
                    next += 1;
                }
                stack.extend(data.children.iter().rev().copied());
            }
            order
        })
    }

    pub fn compare_order(&self, a: NodeId, b: NodeId) -> Ordering {
        let order = self.document_order();
        (order[a.0], a.0).cmp(&(order[b.0], b.0))
    }
}

fn qualify(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn element_name(node: roxmltree::Node<'_, '_>) -> String {
    let tag = node.tag_name();
    let prefix = tag.namespace().and_then(|uri| node.lookup_prefix(uri));
    qualify(prefix, tag.name())
}

fn attribute_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    let prefix = namespace.and_then(|uri| {
        if uri == XML_NAMESPACE {
            return Some("xml");
        }
        // Unprefixed attributes never take the default namespace.
        node.namespaces()
            .find(|ns| ns.uri() == uri && ns.name().is_some())
            .and_then(|ns| ns.name())
    });
    qualify(prefix, local)
}

/// The namespace bindings `node` adds to those of its parent, as sorted `xmlns` attributes.
fn namespace_declarations(node: roxmltree::Node<'_, '_>) -> Vec<(String, String)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    let mut declared: Vec<(String, String)> = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| {
            let name = match ns.name() {
                Some(prefix) => format!("xmlns:{}", prefix),
                None => "xmlns".to_string(),
            };
            (name, ns.uri().to_string())
        })
        .collect();
    declared.sort();
    declared
}

fn is_namespace_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

/// A node handle the XPath engine navigates. Ordered by document position.
#[derive(Clone, Copy)]
pub struct XmlNode<'d> {
    doc: &'d Document,
    id: NodeId,
}

impl<'d> XmlNode<'d> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &'d Document {
        self.doc
    }
}

impl std::fmt::Debug for XmlNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlNode")
            .field("id", &self.id)
            .field("name", &self.doc.name(self.id))
            .finish()
    }
}

impl PartialEq for XmlNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }
}

impl Eq for XmlNode<'_> {}

impl Hash for XmlNode<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for XmlNode<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.doc.compare_order(self.id, other.id)
    }
}

impl<'d> DataSourceNode<'d> for XmlNode<'d> {
    fn node_type(&self) -> NodeType {
        match self.doc.kind(self.id) {
            NodeKind::Root => NodeType::Root,
            NodeKind::Element { .. } => NodeType::Element,
            NodeKind::Attribute { .. } => NodeType::Attribute,
            NodeKind::Text(_) => NodeType::Text,
            NodeKind::Comment(_) => NodeType::Comment,
            NodeKind::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
        }
    }

    fn name(&self) -> Option<QName<'d>> {
        self.doc.name(self.id).map(QName::parse)
    }

    fn string_value(&self) -> String {
        self.doc.text(self.id)
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'd> {
        let doc = self.doc;
        Box::new(
            doc.attributes(self.id)
                .iter()
                .filter(move |&&attr| !doc.name(attr).is_some_and(is_namespace_declaration))
                .map(move |&id| XmlNode { doc, id }),
        )
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'd> {
        let doc = self.doc;
        Box::new(doc.children(self.id).iter().map(move |&id| XmlNode { doc, id }))
    }

    fn parent(&self) -> Option<Self> {
        self.doc.parent(self.id).map(|id| XmlNode { doc: self.doc, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<model xmlns="http://www.w3.org/2002/xforms" xmlns:jr="http://openrosa.org/javarosa">
        <instance>
            <data id="f" jr:version="3">
                <a>1</a>
                <!-- note -->
                <b><c>x</c><c>y</c></b>
            </data>
        </instance>
    </model>"#;

    fn element(doc: &Document, path: &[&str]) -> NodeId {
        let mut current = doc.root();
        for name in path {
            current = doc
                .element_children(current)
                .find(|&child| doc.name(child) == Some(name))
                .unwrap();
        }
        current
    }

    #[test]
    fn test_parse_structure() {
        let doc = Document::parse(SAMPLE).unwrap();
        let model = doc.document_element().unwrap();
        assert_eq!(doc.name(model), Some("model"));
        assert_eq!(
            doc.attribute(model, "xmlns"),
            Some("http://www.w3.org/2002/xforms")
        );
        assert_eq!(
            doc.attribute(model, "xmlns:jr"),
            Some("http://openrosa.org/javarosa")
        );
        let data = element(&doc, &["model", "instance", "data"]);
        assert_eq!(doc.attribute(data, "jr:version"), Some("3"));
        assert_eq!(doc.attribute_by_local_name(data, "version"), Some("3"));
        // whitespace text is dropped, the comment is kept
        assert_eq!(doc.children(data).len(), 3);
        assert_eq!(doc.text(data), "1xy");
    }

    #[test]
    fn test_inherited_namespaces_not_redeclared() {
        let doc = Document::parse(SAMPLE).unwrap();
        let data = element(&doc, &["model", "instance", "data"]);
        assert_eq!(doc.attribute(data, "xmlns"), None);
        assert_eq!(
            doc.lookup_namespace(data, Some("jr")),
            Some("http://openrosa.org/javarosa")
        );
        assert_eq!(doc.lookup_namespace(data, Some("xml")), Some(XML_NAMESPACE));
    }

    #[test]
    fn test_set_text_replaces_text_nodes() {
        let mut doc = Document::parse("<a>5</a>").unwrap();
        let a = doc.document_element().unwrap();
        doc.set_text(a, "");
        assert_eq!(doc.text(a), "");
        assert!(doc.children(a).is_empty());
        doc.set_text(a, "7");
        assert_eq!(doc.text(a), "7");
        assert_eq!(doc.children(a).len(), 1);
    }

    #[test]
    fn test_insert_and_detach_update_order() {
        let mut doc = Document::parse("<r><a/><c/></r>").unwrap();
        let r = doc.document_element().unwrap();
        let a = element(&doc, &["r", "a"]);
        let c = element(&doc, &["r", "c"]);
        assert_eq!(doc.compare_order(a, c), Ordering::Less);

        let b = doc.create_element("b");
        assert_eq!(doc.compare_order(c, b), Ordering::Less);
        doc.insert_after(a, b);
        assert_eq!(doc.next_element_sibling(a), Some(b));
        assert_eq!(doc.compare_order(b, c), Ordering::Less);

        doc.detach(a);
        assert!(!doc.is_attached(a));
        assert_eq!(doc.element_children(r).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(doc.compare_order(c, a), Ordering::Less);

        doc.prepend_child(r, a);
        assert_eq!(doc.element_children(r).collect::<Vec<_>>(), vec![a, b, c]);
    }

    #[test]
    fn test_import_copies_subtree() {
        let source = Document::parse(r#"<r><x k="v"><y>1</y></x></r>"#).unwrap();
        let x = element(&source, &["r", "x"]);
        let (fragment, copy, mapping) = source.fragment(x);
        assert_eq!(fragment.document_element(), Some(copy));
        assert_eq!(fragment.attribute(copy, "k"), Some("v"));
        assert_eq!(fragment.text(copy), "1");
        assert_eq!(mapping.get(&x), Some(&copy));
        assert_eq!(mapping.len(), 4);
    }

    #[test]
    fn test_descendant_elements_in_document_order() {
        let doc = Document::parse("<r><a><b/><c/></a><d/></r>").unwrap();
        let r = doc.document_element().unwrap();
        let names: Vec<_> = doc
            .descendant_elements(r)
            .into_iter()
            .filter_map(|id| doc.name(id))
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_xpath_view_hides_namespace_declarations() {
        let doc = Document::parse(SAMPLE).unwrap();
        let model = doc.node(doc.document_element().unwrap());
        assert_eq!(model.attributes().count(), 0);
        let data = doc.node(element(&doc, &["model", "instance", "data"]));
        let names: Vec<_> = data
            .attributes()
            .filter_map(|attr| attr.name())
            .map(|name| name.local_part)
            .collect();
        assert_eq!(names, vec!["id", "version"]);
        assert!(data < data.children().next().unwrap());
    }

    #[test]
    fn test_retain_attributes() {
        let mut doc = Document::parse(r#"<r jr:template="" a="1" xmlns:jr="urn:jr"/>"#).unwrap();
        let r = doc.document_element().unwrap();
        doc.retain_attributes(r, |name| QName::parse(name).local_part != "template");
        assert_eq!(doc.attribute(r, "jr:template"), None);
        assert_eq!(doc.attribute(r, "a"), Some("1"));
    }
}
