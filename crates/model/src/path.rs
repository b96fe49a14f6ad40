//! Stateless helpers over paths and expression text.
use crate::document::{Document, NodeId};
use crate::model::OPENROSA_NAMESPACE;

/// Absolute path of an element, built from element names up to (not including) the closest
/// ancestor named `root_name`, or up to the document root. With `include_position`, steps
/// that are not the first of their same-name siblings get a `[n]` predicate.
///
/// Returns `None` for non-element nodes.
pub fn get_xpath(
    doc: &Document,
    node: NodeId,
    root_name: &str,
    include_position: bool,
) -> Option<String> {
    if !doc.is_element(node) {
        return None;
    }
    let mut steps = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        if !doc.is_element(id) {
            break;
        }
        if id != node && doc.local_name(id) == Some(root_name) {
            break;
        }
        let mut step = doc.name(id).unwrap_or_default().to_string();
        if include_position {
            let index = repeat_index(doc, id);
            if index > 0 {
                step.push_str(&format!("[{}]", index + 1));
            }
        }
        steps.push(step);
        current = doc.parent(id);
    }
    steps.reverse();
    Some(format!("/{}", steps.join("/")))
}

/// 0-based position of an element among its same-name element siblings.
pub fn repeat_index(doc: &Document, node: NodeId) -> usize {
    let name = doc.name(node);
    let mut index = 0;
    let mut current = doc.previous_element_sibling(node);
    while let Some(sibling) = current {
        if doc.name(sibling) == name {
            index += 1;
        }
        current = doc.previous_element_sibling(sibling);
    }
    index
}

/// Every element child of `node`'s parent that shares its name, `node` included.
pub fn same_name_siblings(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let Some(parent) = doc.parent(node) else {
        return vec![node];
    };
    let name = doc.name(node);
    doc.element_children(parent)
        .filter(|&sibling| doc.name(sibling) == name)
        .collect()
}

/// True if the document element is an XForms `model` wrapping `instance` elements.
pub fn has_model_root(doc: &Document) -> bool {
    doc.document_element()
        .is_some_and(|element| doc.local_name(element) == Some("model"))
}

/// The root element of the primary instance: the first element of the first `instance`
/// under `model`, or the document element of a bare instance document.
pub fn primary_instance_root(doc: &Document) -> Option<NodeId> {
    let element = doc.document_element()?;
    if !has_model_root(doc) {
        return Some(element);
    }
    let instance = doc
        .element_children(element)
        .find(|&child| doc.local_name(child) == Some("instance"))?;
    doc.element_children(instance).next()
}

/// The `instance` element with the given id, if the model has one.
pub fn secondary_instance(doc: &Document, id: &str) -> Option<NodeId> {
    let model = doc.document_element().filter(|_| has_model_root(doc))?;
    doc.element_children(model).find(|&child| {
        doc.local_name(child) == Some("instance") && doc.attribute(child, "id") == Some(id)
    })
}

/// Namespace URI bound to the element's prefix. Unprefixed names have none, whatever the
/// default namespace in scope.
fn prefix_namespace(doc: &Document, node: NodeId) -> Option<&str> {
    let (prefix, _) = doc.name(node)?.split_once(':')?;
    doc.lookup_namespace(node, Some(prefix))
}

/// `meta` and its children, which records carry either in the OpenRosa namespace or in none.
fn is_meta(doc: &Document, node: NodeId) -> bool {
    doc.local_name(node) == Some("meta")
        || doc
            .parent_element(node)
            .is_some_and(|parent| doc.local_name(parent) == Some("meta"))
}

/// True when an element of one document stands for an element of another: same local name
/// and the same namespace behind the prefix. Meta elements also match across the OpenRosa
/// namespace and none.
pub fn same_element(doc: &Document, node: NodeId, other_doc: &Document, other: NodeId) -> bool {
    if doc.local_name(node).is_none() || doc.local_name(node) != other_doc.local_name(other) {
        return false;
    }
    let namespace = prefix_namespace(doc, node);
    let other_namespace = prefix_namespace(other_doc, other);
    if namespace == other_namespace {
        return true;
    }
    let openrosa_or_none = |uri: Option<&str>| uri.is_none_or(|uri| uri == OPENROSA_NAMESPACE);
    is_meta(doc, node)
        && is_meta(other_doc, other)
        && openrosa_or_none(namespace)
        && openrosa_or_none(other_namespace)
}

/// The element of `target` reached from `target_root` by the same element and same-name
/// position steps that lead from `source_root` to `node` in `source`.
pub fn counterpart(
    source: &Document,
    source_root: NodeId,
    node: NodeId,
    target: &Document,
    target_root: NodeId,
) -> Option<NodeId> {
    let mut steps = Vec::new();
    let mut current = node;
    while current != source_root {
        steps.push((current, repeat_index(source, current)));
        current = source.parent(current)?;
    }
    let mut found = target_root;
    for (step, index) in steps.into_iter().rev() {
        found = target
            .element_children(found)
            .filter(|&child| same_element(source, step, target, child))
            .nth(index)?;
    }
    Some(found)
}

/// A function call found in expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// The complete call, `name(` through the matching `)`.
    pub call: String,
    /// Top-level arguments, trimmed.
    pub args: Vec<String>,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':')
}

/// Finds the outermost calls of `name` in `expr`, ignoring text inside string literals.
/// Arguments are split on top-level commas.
pub fn parse_function_calls(expr: &str, name: &str) -> Vec<FunctionCall> {
    let bytes = expr.as_bytes();
    let mut calls = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'"' || b == b'\'' {
            quote = Some(b);
            i += 1;
            continue;
        }
        if bytes[i..].starts_with(name.as_bytes()) && (i == 0 || !is_name_byte(bytes[i - 1])) {
            let mut open = i + name.len();
            while open < bytes.len() && bytes[open].is_ascii_whitespace() {
                open += 1;
            }
            if bytes.get(open) == Some(&b'(') {
                let (end, args) = split_arguments(expr, open);
                calls.push(FunctionCall {
                    call: expr[i..end].to_string(),
                    args,
                });
                i = end;
                continue;
            }
        }
        i += 1;
    }
    calls
}

/// Splits the argument list opening at byte `open`. Returns the byte after the closing
/// parenthesis (or the end of input for an unterminated call) and the arguments.
fn split_arguments(expr: &str, open: usize) -> (usize, Vec<String>) {
    let bytes = expr.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut arg_start = open + 1;
    let mut closed = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        closed = Some(i);
                        break;
                    }
                }
                b',' if depth == 1 => {
                    args.push(expr[arg_start..i].trim().to_string());
                    arg_start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    let last_end = closed.unwrap_or(bytes.len());
    let last = expr[arg_start.min(last_end)..last_end].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    let end = closed.map_or(bytes.len(), |close| close + 1);
    (end, args)
}

/// Removes one pair of matching surrounding quotes, after trimming.
pub fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = "<model><instance><data><rep><x/></rep><rep><x/></rep><rep><x/></rep><y/></data></instance></model>";

    fn reps(doc: &Document) -> Vec<NodeId> {
        let data = doc.descendant_elements(doc.root())[2];
        doc.element_children(data)
            .filter(|&id| doc.name(id) == Some("rep"))
            .collect()
    }

    #[test]
    fn test_get_xpath() {
        let doc = Document::parse(DATA).unwrap();
        let third = reps(&doc)[2];
        let x = doc.element_children(third).next().unwrap();
        assert_eq!(
            get_xpath(&doc, x, "instance", false).as_deref(),
            Some("/data/rep/x")
        );
        assert_eq!(
            get_xpath(&doc, x, "instance", true).as_deref(),
            Some("/data/rep[3]/x")
        );
        assert_eq!(
            get_xpath(&doc, x, "#document", false).as_deref(),
            Some("/model/instance/data/rep/x")
        );
        assert_eq!(get_xpath(&doc, doc.root(), "instance", false), None);
    }

    #[test]
    fn test_repeat_index_and_siblings() {
        let doc = Document::parse(DATA).unwrap();
        let reps = reps(&doc);
        assert_eq!(repeat_index(&doc, reps[0]), 0);
        assert_eq!(repeat_index(&doc, reps[2]), 2);
        assert_eq!(same_name_siblings(&doc, reps[1]), reps);
    }

    #[test]
    fn test_instance_lookup() {
        let doc = Document::parse(
            r#"<model><instance><data/></instance><instance id="cities"><root/></instance></model>"#,
        )
        .unwrap();
        assert!(has_model_root(&doc));
        let data = primary_instance_root(&doc).unwrap();
        assert_eq!(doc.name(data), Some("data"));
        let cities = secondary_instance(&doc, "cities").unwrap();
        assert_eq!(doc.attribute(cities, "id"), Some("cities"));
        assert_eq!(secondary_instance(&doc, "towns"), None);

        let bare = Document::parse("<data><a/></data>").unwrap();
        assert!(!has_model_root(&bare));
        assert_eq!(primary_instance_root(&bare), bare.document_element());
    }

    #[test]
    fn test_counterpart() {
        let model = Document::parse(DATA).unwrap();
        let record =
            Document::parse("<data><rep/><rep><x>1</x></rep></data>").unwrap();
        let record_root = record.document_element().unwrap();
        let record_x = record.descendant_elements(record_root)[2];
        let model_root = primary_instance_root(&model).unwrap();
        let found = counterpart(&record, record_root, record_x, &model, model_root).unwrap();
        assert_eq!(get_xpath(&model, found, "instance", true).as_deref(), Some("/data/rep[2]/x"));

        let missing = Document::parse("<data><rep/><rep/><rep/><rep><x/></rep></data>").unwrap();
        let missing_root = missing.document_element().unwrap();
        let deep_x = missing.descendant_elements(missing_root)[4];
        assert_eq!(counterpart(&missing, missing_root, deep_x, &model, model_root), None);
    }

    #[test]
    fn test_same_element_across_prefixes() {
        let model = Document::parse(
            r#"<a xmlns="http://www.w3.org/2002/xforms" xmlns:orx="http://openrosa.org/xforms" xmlns:x="urn:x"><orx:meta><orx:instanceID/></orx:meta><x:v/><v/></a>"#,
        )
        .unwrap();
        let record =
            Document::parse(r#"<a xmlns:y="urn:x"><meta><instanceID/></meta><y:v/><v/></a>"#).unwrap();
        let model_nodes = model.descendant_elements(model.document_element().unwrap());
        let record_nodes = record.descendant_elements(record.document_element().unwrap());
        // meta, instanceID, prefixed v, plain v
        for i in 0..4 {
            assert!(same_element(&record, record_nodes[i], &model, model_nodes[i]), "node {i}");
        }
        assert!(!same_element(&record, record_nodes[2], &model, model_nodes[3]));
        assert!(!same_element(&record, record_nodes[3], &model, model_nodes[2]));

        let record_id = record_nodes[1];
        let record_root = record.document_element().unwrap();
        let model_root = model.document_element().unwrap();
        assert_eq!(
            counterpart(&record, record_root, record_id, &model, model_root),
            Some(model_nodes[1])
        );
    }

    #[test]
    fn test_parse_function_calls() {
        let calls = parse_function_calls(
            "1 + indexed-repeat(/a/rep/x, /a/rep, position(..) - 1) * 2",
            "indexed-repeat",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].call,
            "indexed-repeat(/a/rep/x, /a/rep, position(..) - 1)"
        );
        assert_eq!(calls[0].args, vec!["/a/rep/x", "/a/rep", "position(..) - 1"]);
    }

    #[test]
    fn test_parse_function_calls_respects_boundaries_and_literals() {
        assert!(parse_function_calls("my-pulldata('a')", "pulldata").is_empty());
        assert!(parse_function_calls("concat('pulldata(x)', 1)", "pulldata").is_empty());
        let calls = parse_function_calls("pulldata('c', 'a,b', 'k', 3)", "pulldata");
        assert_eq!(calls[0].args, vec!["'c'", "'a,b'", "'k'", "3"]);
        let calls = parse_function_calls("now ()", "now");
        assert_eq!(calls[0].args, Vec::<String>::new());
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes(" 'col' "), "col");
        assert_eq!(strip_quotes("\"col\""), "col");
        assert_eq!(strip_quotes("col"), "col");
        assert_eq!(strip_quotes("'"), "'");
    }
}
