//! XML output for instance subtrees.
use crate::document::{Document, NodeId, NodeKind};
use crate::error::ModelError;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeMap;
use xform_xpath1::QName;

/// Serializes the subtree at `node`.
///
/// Every prefixed namespace used inside the subtree is declared once on its root, resolved
/// from the declarations in scope or, failing that, from `namespaces`. Descendant
/// declarations that repeat a binding already in scope are dropped. The default namespace
/// inherited from outside the subtree is not emitted. Processing instructions are skipped.
pub fn to_xml(
    doc: &Document,
    node: NodeId,
    namespaces: &BTreeMap<String, String>,
) -> Result<String, ModelError> {
    let mut declarations = BTreeMap::new();
    for &attr in doc.attributes(node) {
        if let NodeKind::Attribute { name, value } = doc.kind(attr)
            && is_declaration(name)
        {
            declarations.insert(name.clone(), value.clone());
        }
    }
    for prefix in used_prefixes(doc, node) {
        let name = format!("xmlns:{}", prefix);
        if declarations.contains_key(&name) {
            continue;
        }
        match doc
            .lookup_namespace(node, Some(&prefix))
            .or_else(|| namespaces.get(&prefix).map(String::as_str))
        {
            Some(uri) => {
                declarations.insert(name, uri.to_string());
            }
            None => log::warn!("No namespace declaration found for prefix '{}'", prefix),
        }
    }

    let mut scope = declarations.clone();
    if !scope.contains_key("xmlns")
        && let Some(uri) = doc.lookup_namespace(node, None)
    {
        scope.insert("xmlns".to_string(), uri.to_string());
    }

    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, doc, node, &declarations, &scope)?;
    String::from_utf8(writer.into_inner()).map_err(|e| ModelError::Serialize(e.to_string()))
}

fn is_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

fn used_prefixes(doc: &Document, node: NodeId) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut add = |name: &str| {
        if let Some(prefix) = QName::parse(name).prefix
            && prefix != "xml"
            && prefix != "xmlns"
            && !prefixes.iter().any(|known| known == prefix)
        {
            prefixes.push(prefix.to_string());
        }
    };
    for element in std::iter::once(node).chain(doc.descendant_elements(node)) {
        if let Some(name) = doc.name(element) {
            add(name);
        }
        for &attr in doc.attributes(element) {
            if let Some(name) = doc.name(attr) {
                add(name);
            }
        }
    }
    prefixes
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ModelError> {
    writer
        .write_event(event)
        .map_err(|e| ModelError::Serialize(e.to_string()))
}

/// `declarations` are the namespace attributes to write on this element; `scope` holds every
/// binding visible to its children.
fn write_element(
    writer: &mut Writer<Vec<u8>>,
    doc: &Document,
    node: NodeId,
    declarations: &BTreeMap<String, String>,
    scope: &BTreeMap<String, String>,
) -> Result<(), ModelError> {
    let name = doc.name(node).unwrap_or_default();
    let mut start = BytesStart::new(name);
    for (key, value) in declarations {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    for &attr in doc.attributes(node) {
        if let NodeKind::Attribute { name, value } = doc.kind(attr)
            && !is_declaration(name)
        {
            start.push_attribute((name.as_str(), value.as_str()));
        }
    }

    let children: Vec<NodeId> = doc
        .children(node)
        .iter()
        .copied()
        .filter(|&child| !matches!(doc.kind(child), NodeKind::ProcessingInstruction { .. }))
        .collect();
    if children.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;

    for child in children {
        match doc.kind(child) {
            NodeKind::Element { .. } => {
                let (own, child_scope) = redeclarations(doc, child, scope);
                write_element(writer, doc, child, &own, &child_scope)?;
            }
            NodeKind::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            NodeKind::Comment(text) => {
                emit(writer, Event::Comment(BytesText::from_escaped(text.as_str())))?
            }
            _ => {}
        }
    }
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// The declarations of `node` that change a binding in `scope`, and the resulting scope.
fn redeclarations(
    doc: &Document,
    node: NodeId,
    scope: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut own = BTreeMap::new();
    for &attr in doc.attributes(node) {
        if let NodeKind::Attribute { name, value } = doc.kind(attr)
            && is_declaration(name)
            && scope.get(name) != Some(value)
        {
            own.insert(name.clone(), value.clone());
        }
    }
    if own.is_empty() {
        return (own, scope.clone());
    }
    let mut child_scope = scope.clone();
    child_scope.extend(own.clone());
    (own, child_scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(xml: &str, path: &[&str]) -> String {
        let doc = Document::parse(xml).unwrap();
        let mut node = doc.root();
        for name in path {
            node = doc
                .element_children(node)
                .find(|&child| doc.name(child) == Some(name))
                .unwrap();
        }
        to_xml(&doc, node, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_declares_used_prefixes_on_root() {
        let out = serialize(
            r#"<model xmlns="http://www.w3.org/2002/xforms" xmlns:orx="http://openrosa.org/xforms" xmlns:unused="urn:u"><instance><data id="x"><orx:meta><orx:instanceID>uuid:1</orx:instanceID></orx:meta></data></instance></model>"#,
            &["model", "instance", "data"],
        );
        assert_eq!(
            out,
            r#"<data xmlns:orx="http://openrosa.org/xforms" id="x"><orx:meta><orx:instanceID>uuid:1</orx:instanceID></orx:meta></data>"#
        );
    }

    #[test]
    fn test_drops_redundant_redeclarations() {
        let out = serialize(
            r#"<data xmlns:jr="urn:jr"><a xmlns:jr="urn:jr" jr:x="1"/><b xmlns:jr="urn:other"/></data>"#,
            &["data"],
        );
        assert_eq!(
            out,
            r#"<data xmlns:jr="urn:jr"><a jr:x="1"/><b xmlns:jr="urn:other"/></data>"#
        );
    }

    #[test]
    fn test_escapes_and_skips_processing_instructions() {
        let out = serialize(r#"<d><?pi x?><a>1 &lt; 2</a><!-- c --></d>"#, &["d"]);
        assert_eq!(out, r#"<d><a>1 &lt; 2</a><!-- c --></d>"#);
    }

    #[test]
    fn test_reparse_is_stable() {
        let first = serialize(
            r#"<m xmlns:enk="http://enketo.org/xforms"><instance><d><r enk:ordinal="1"/></d></instance></m>"#,
            &["m", "instance", "d"],
        );
        let second = serialize(&first, &["d"]);
        assert_eq!(first, second);
    }
}
