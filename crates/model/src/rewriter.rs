//! Text-to-text transforms that turn a form expression into one a plain XPath 1.0 evaluator
//! can run against the model document.
//!
//! The stages run in a fixed order and later stages rely on the output of earlier ones:
//!
//! 1. `indexed-repeat()` becomes positional predicates.
//! 2. `pulldata()` becomes a lookup path into a secondary instance.
//! 3. `instance('id')` becomes `/model/instance[@id="id"]`.
//! 4. `version()` becomes the quoted form version.
//! 5. `current()` becomes the positioned path of the context node.
//! 6. Absolute paths are re-rooted at the primary instance.
//! 7. Legacy repeat positions are injected into absolute paths.
//! 8. `&lt;`, `&gt;` and `&quot;` are decoded.
use crate::document::{Document, NodeId};
use crate::error::ModelError;
use crate::evaluator::{ResultKind, Value};
use crate::path::{
    get_xpath, parse_function_calls, repeat_index, secondary_instance, strip_quotes,
};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use xform_xpath1::{format_number, string_to_number};

static INSTANCE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"instance\(\s*(?:"([A-Za-z0-9_.-]*)"|'([A-Za-z0-9_.-]*)')\s*\)"#)
        .expect("BUG: invalid INSTANCE_CALL regex literal")
});

static VERSION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^\w.:-])version\(\s*\)").expect("BUG: invalid VERSION_CALL regex literal")
});

static CURRENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^\w.:-])current\(\s*\)").expect("BUG: invalid CURRENT_CALL regex literal")
});

/// Where an expression is evaluated: the selector and index it was resolved from, and the
/// node they resolved to.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'s> {
    pub selector: Option<&'s str>,
    pub index: usize,
    pub context: NodeId,
}

/// What the rewriter needs from the model.
pub trait RewriteHost {
    fn document(&self) -> &Document;

    /// The root element of the primary instance.
    fn primary_root(&self) -> Option<NodeId>;

    /// Evaluates a sub-expression through the whole pipeline in the caller's scope.
    fn evaluate_in_scope(
        &self,
        expression: &str,
        kind: ResultKind,
        scope: &Scope<'_>,
    ) -> Result<Value, ModelError>;

    /// True when the document wraps its instances in a `model` element.
    fn shifts_root(&self) -> bool;

    /// True when legacy repeat-position injection applies.
    fn bug_compliance(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub expression: String,
    /// False when a stage evaluated a non-literal argument, so the result may differ between
    /// calls with the same cache key.
    pub cacheable: bool,
}

pub fn rewrite<H: RewriteHost>(
    host: &H,
    expression: &str,
    scope: &Scope<'_>,
) -> Result<Rewritten, ModelError> {
    let doc = host.document();
    let (expr, indexed_eager) = expand_indexed_repeats(host, expression, scope)?;
    let (expr, pulldata_eager) = expand_pulldata(host, &expr, scope)?;
    let expr = resolve_instances(doc, &expr)?;
    let expr = substitute_version(host, &expr);
    let expr = substitute_current(doc, &expr, scope.context);
    let expr = if host.shifts_root() {
        shift_root(&expr)
    } else {
        expr
    };
    let expr = if host.bug_compliance() && scope.selector.is_some() {
        inject_repeat_positions(doc, &expr, scope.context)
    } else {
        expr
    };
    let expr = decode_entities(&expr);
    log::trace!("Rewrote '{}' to '{}'", expression, expr);
    Ok(Rewritten {
        expression: expr,
        cacheable: !(indexed_eager || pulldata_eager),
    })
}

fn is_number_literal(arg: &str) -> bool {
    !string_to_number(arg).is_nan()
}

fn is_string_literal(arg: &str) -> bool {
    let arg = arg.trim();
    arg.len() >= 2
        && ((arg.starts_with('"') && arg.ends_with('"'))
            || (arg.starts_with('\'') && arg.ends_with('\'')))
        && strip_quotes(arg)
            .chars()
            .all(|c| c != arg.chars().next().unwrap_or('"'))
}

fn quote(value: &str) -> String {
    if value.contains('"') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}

/// `indexed-repeat(node, repeat1, pos1[, repeat2, pos2]...)` becomes `node` with each
/// `repeatN` step given a `[position() = posN]` predicate. Non-literal positions are
/// evaluated in the caller's scope first.
fn expand_indexed_repeats<H: RewriteHost>(
    host: &H,
    expression: &str,
    scope: &Scope<'_>,
) -> Result<(String, bool), ModelError> {
    let mut expr = expression.to_string();
    let mut eager = false;
    for call in parse_function_calls(expression, "indexed-repeat") {
        if call.args.len() % 2 == 0 {
            return Err(ModelError::logic(
                expression,
                format!(
                    "indexed repeat with incorrect number of parameters found: {}",
                    call.call
                ),
            ));
        }
        let mut positioned = call.args[0].clone();
        let mut i = call.args.len() - 1;
        while i > 1 {
            let position_arg = call.args[i].as_str();
            let position = if is_number_literal(position_arg) {
                position_arg.to_string()
            } else {
                eager = true;
                let value = host.evaluate_in_scope(position_arg, ResultKind::Number, scope)?;
                format_number(value.as_number())
            };
            let repeat_path = call.args[i - 1].as_str();
            positioned = positioned.replacen(
                repeat_path,
                &format!("{}[position() = {}]", repeat_path, position),
                1,
            );
            i -= 2;
        }
        expr = expr.replacen(&call.call, &positioned, 1);
    }
    Ok((expr, eager))
}

/// `pulldata(instance, column, searchColumn, search)` becomes
/// `instance(instance)/root/item[searchColumn = value]/column`.
fn expand_pulldata<H: RewriteHost>(
    host: &H,
    expression: &str,
    scope: &Scope<'_>,
) -> Result<(String, bool), ModelError> {
    let mut expr = expression.to_string();
    let mut eager = false;
    for call in parse_function_calls(expression, "pulldata") {
        let [instance, column, search_column, search] = call.args.as_slice() else {
            return Err(ModelError::logic(
                expression,
                format!(
                    "pulldata with incorrect number of parameters found: {}",
                    call.call
                ),
            ));
        };
        let instance = if is_string_literal(instance) {
            instance.clone()
        } else {
            quote(instance)
        };
        let value = if is_string_literal(search) {
            strip_quotes(search).to_string()
        } else if is_number_literal(search) {
            search.trim().to_string()
        } else {
            eager = true;
            host.evaluate_in_scope(search, ResultKind::String, scope)?
                .to_string()
        };
        let value = if value.is_empty() || !is_number_literal(&value) {
            quote(&value)
        } else {
            value
        };
        let lookup = format!(
            "instance({})/root/item[{} = {}]/{}",
            instance,
            strip_quotes(search_column),
            value,
            strip_quotes(column)
        );
        expr = expr.replacen(&call.call, &lookup, 1);
    }
    Ok((expr, eager))
}

fn resolve_instances(doc: &Document, expr: &str) -> Result<String, ModelError> {
    let mut out = String::with_capacity(expr.len());
    let mut last = 0;
    for caps in INSTANCE_CALL.captures_iter(expr) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let id = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        if secondary_instance(doc, id).is_none() {
            return Err(ModelError::logic(
                expr,
                format!("instance \"{}\" does not exist in model", id),
            ));
        }
        out.push_str(&expr[last..whole.start()]);
        out.push_str(&format!("/model/instance[@id=\"{}\"]", id));
        last = whole.end();
    }
    out.push_str(&expr[last..]);
    Ok(out)
}

fn replace_call(re: &Regex, expr: &str, replacement: &str) -> String {
    re.replace_all(expr, |caps: &Captures<'_>| {
        format!("{}{}", caps.get(1).map_or("", |m| m.as_str()), replacement)
    })
    .into_owned()
}

fn substitute_version<H: RewriteHost>(host: &H, expr: &str) -> String {
    if !expr.contains("version(") {
        return expr.to_string();
    }
    let doc = host.document();
    let version = host
        .primary_root()
        .and_then(|root| doc.attribute(root, "version"))
        .unwrap_or_default();
    replace_call(&VERSION_CALL, expr, &quote(version))
}

fn substitute_current(doc: &Document, expr: &str, context: NodeId) -> String {
    if !expr.contains("current(") {
        return expr.to_string();
    }
    match get_xpath(doc, context, "instance", true) {
        Some(path) => replace_call(&CURRENT_CALL, expr, &path),
        None => expr.to_string(),
    }
}

fn segment_end(bytes: &[u8], from: usize) -> usize {
    let mut end = from;
    while end < bytes.len()
        && !matches!(bytes[end], b'/' | b',' | b'"' | b'\'')
        && !bytes[end].is_ascii_whitespace()
    {
        end += 1;
    }
    end
}

/// Characters after which a `/` continues a path or expression rather than starting an
/// absolute path.
fn continues_path(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b']' | b')' | b'/' | b'*' | b'_' | b'-')
}

/// The end of the first segment when an absolute path starting at `slash` needs re-rooting.
fn unrooted_segment(bytes: &[u8], slash: usize) -> Option<usize> {
    if slash > 0 && continues_path(bytes[slash - 1]) {
        return None;
    }
    let start = slash + 1;
    match bytes.get(start) {
        None | Some(b'/') => return None,
        Some(_) => {}
    }
    let end = segment_end(bytes, start + 1);
    (bytes.get(end) == Some(&b'/') && &bytes[start..end] != b"model").then_some(end)
}

/// Prefixes absolute paths that are not already anchored at `/model/` with
/// `/model/instance[1]`. A path qualifies only when its first segment is followed by
/// another `/`. Text inside string literals is left alone.
pub fn shift_root(expr: &str) -> String {
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len() + 18);
    let mut quote: Option<u8> = None;
    let mut copied = 0;
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
        match b {
            b'"' | b'\'' => {
                quote = Some(b);
                i += 1;
            }
            b'/' => match unrooted_segment(bytes, i) {
                Some(end) => {
                    out.push_str(&expr[copied..i]);
                    out.push_str("/model/instance[1]");
                    copied = i;
                    i = end + 1;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
    out.push_str(&expr[copied..]);
    out
}

/// Gives every ancestor-or-self of `context` that is a non-first member of its same-name
/// series an explicit position wherever its plain path is followed by `/` in `expr`.
///
/// Ancestors are handled outermost first, so once an outer step has been positioned the
/// plain path of an inner one no longer occurs and is left as is.
pub fn inject_repeat_positions(doc: &Document, expr: &str, context: NodeId) -> String {
    let mut chain = Vec::new();
    let mut current = Some(context);
    while let Some(id) = current {
        if !doc.is_element(id) || doc.local_name(id) == Some("instance") {
            break;
        }
        chain.push(id);
        current = doc.parent(id);
    }

    let mut expr = expr.to_string();
    for &ancestor in chain.iter().rev() {
        let index = repeat_index(doc, ancestor);
        if index == 0 {
            continue;
        }
        let Some(path) = get_xpath(doc, ancestor, "instance", false) else {
            continue;
        };
        let plain = format!("{}/", path);
        if expr.contains(&plain) {
            expr = expr.replace(&plain, &format!("{}[{}]/", path, index + 1));
        }
    }
    expr
}

fn decode_entities(expr: &str) -> String {
    expr.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::DualEvaluator;
    use crate::path::{has_model_root, primary_instance_root};

    const MODEL: &str = r#"<model>
        <instance>
            <data id="f" version="2024-1">
                <n>2</n>
                <rep><x>a</x><sub><y>1</y></sub><sub><y>2</y></sub></rep>
                <rep><x>b</x><sub><y>3</y></sub><sub><y>4</y></sub></rep>
                <rep><x>c</x></rep>
            </data>
        </instance>
        <instance id="cities"><root><item><name>ams</name></item><item><name>rot</name></item></root></instance>
        <instance id="csv"><root><item><col1>5</col1><col2>Q</col2></item></root></instance>
    </model>"#;

    struct TestHost {
        doc: Document,
        evaluator: DualEvaluator,
        bug_compliance: bool,
    }

    impl TestHost {
        fn new() -> Self {
            TestHost {
                doc: Document::parse(MODEL).unwrap(),
                evaluator: DualEvaluator::new(),
                bug_compliance: true,
            }
        }

        fn element(&self, path: &str) -> NodeId {
            let root = self.doc.root();
            self.evaluator
                .evaluate(&self.doc, path, root, ResultKind::Node, true)
                .unwrap()
                .node()
                .unwrap()
        }

        fn scope(&self, selector: &'static str, index: usize) -> Scope<'static> {
            let nodes = self
                .evaluator
                .evaluate(
                    &self.doc,
                    &shift_root(selector),
                    self.doc.root(),
                    ResultKind::Nodes,
                    true,
                )
                .unwrap()
                .into_nodes();
            Scope {
                selector: Some(selector),
                index,
                context: nodes[index],
            }
        }
    }

    impl RewriteHost for TestHost {
        fn document(&self) -> &Document {
            &self.doc
        }

        fn primary_root(&self) -> Option<NodeId> {
            primary_instance_root(&self.doc)
        }

        fn evaluate_in_scope(
            &self,
            expression: &str,
            kind: ResultKind,
            scope: &Scope<'_>,
        ) -> Result<Value, ModelError> {
            let expression = shift_root(expression);
            self.evaluator
                .evaluate(&self.doc, &expression, scope.context, kind, true)
        }

        fn shifts_root(&self) -> bool {
            has_model_root(&self.doc)
        }

        fn bug_compliance(&self) -> bool {
            self.bug_compliance
        }
    }

    fn rewrite_in(host: &TestHost, expr: &str, scope: &Scope<'_>) -> String {
        rewrite(host, expr, scope).unwrap().expression
    }

    #[test]
    fn test_shift_root() {
        assert_eq!(shift_root("/data/a"), "/model/instance[1]/data/a");
        assert_eq!(
            shift_root("count(/data/rep) + /data/n"),
            "count(/model/instance[1]/data/rep) + /model/instance[1]/data/n"
        );
        assert_eq!(shift_root("/data"), "/data");
        assert_eq!(shift_root("../x/y"), "../x/y");
        assert_eq!(shift_root("/model/instance[2]/r"), "/model/instance[2]/r");
        assert_eq!(
            shift_root(r#"/model/instance[@id="c"]/root/item"#),
            r#"/model/instance[@id="c"]/root/item"#
        );
        assert_eq!(
            shift_root("concat('/data/a', /data/b)"),
            "concat('/data/a', /model/instance[1]/data/b)"
        );
        assert_eq!(
            shift_root("/data/a[. = /data/b]"),
            "/model/instance[1]/data/a[. = /model/instance[1]/data/b]"
        );
    }

    #[test]
    fn test_resolve_instances() {
        let host = TestHost::new();
        let root = host.doc.root();
        let scope = Scope {
            selector: None,
            index: 0,
            context: root,
        };
        assert_eq!(
            rewrite_in(&host, "instance('cities')/root/item[1]/name", &scope),
            r#"/model/instance[@id="cities"]/root/item[1]/name"#
        );
        let err = rewrite(&host, "instance(\"towns\")/root/item", &scope).unwrap_err();
        assert!(matches!(err, ModelError::Logic { .. }));
    }

    #[test]
    fn test_indexed_repeat_with_literal_position() {
        let host = TestHost::new();
        let scope = host.scope("/data/n", 0);
        let rewritten = rewrite(&host, "indexed-repeat(/data/rep/x, /data/rep, 2)", &scope).unwrap();
        assert_eq!(
            rewritten.expression,
            "/model/instance[1]/data/rep[position() = 2]/x"
        );
        assert!(rewritten.cacheable);
    }

    #[test]
    fn test_indexed_repeat_with_expression_position() {
        let host = TestHost::new();
        let scope = host.scope("/data/n", 0);
        let rewritten = rewrite(
            &host,
            "indexed-repeat(/data/rep/sub/y, /data/rep, /data/n, /data/rep/sub, 1 + 1)",
            &scope,
        )
        .unwrap();
        assert_eq!(
            rewritten.expression,
            "/model/instance[1]/data/rep[position() = 2]/sub[position() = 2]/y"
        );
        assert!(!rewritten.cacheable);
    }

    #[test]
    fn test_indexed_repeat_arity() {
        let host = TestHost::new();
        let scope = host.scope("/data/n", 0);
        let err = rewrite(&host, "indexed-repeat(/data/rep/x, /data/rep)", &scope).unwrap_err();
        match err {
            ModelError::Logic {
                expression,
                message,
            } => {
                assert_eq!(expression, "indexed-repeat(/data/rep/x, /data/rep)");
                assert!(message.contains("incorrect number of parameters"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pulldata() {
        let host = TestHost::new();
        let scope = host.scope("/data/n", 0);
        let rewritten = rewrite(&host, "pulldata('csv', 'col2', 'col1', '5')", &scope).unwrap();
        assert_eq!(
            rewritten.expression,
            r#"/model/instance[@id="csv"]/root/item[col1 = 5]/col2"#
        );
        assert!(rewritten.cacheable);

        let rewritten =
            rewrite(&host, "pulldata('csv', 'col2', 'col1', /data/x)", &scope).unwrap();
        assert_eq!(
            rewritten.expression,
            r#"/model/instance[@id="csv"]/root/item[col1 = ""]/col2"#
        );
        assert!(!rewritten.cacheable);

        assert!(rewrite(&host, "pulldata('csv', 'col2')", &scope).is_err());
    }

    #[test]
    fn test_version_and_current() {
        let host = TestHost::new();
        let scope = host.scope("/data/rep/x", 1);
        assert_eq!(
            rewrite_in(&host, "concat(version(), version())", &scope),
            r#"concat("2024-1", "2024-1")"#
        );
        assert_eq!(
            rewrite_in(&host, "current()/../sub", &scope),
            "/model/instance[1]/data/rep[2]/x/../sub"
        );
    }

    #[test]
    fn test_bug_compliance_injects_positions() {
        let host = TestHost::new();
        let scope = host.scope("/data/rep/x", 2);
        assert_eq!(
            rewrite_in(&host, "/data/rep/x", &scope),
            "/model/instance[1]/data/rep[3]/x"
        );
        // the first instance needs no position
        let scope = host.scope("/data/rep/x", 0);
        assert_eq!(
            rewrite_in(&host, "/data/rep/x", &scope),
            "/model/instance[1]/data/rep/x"
        );
    }

    #[test]
    fn test_bug_compliance_disabled() {
        let mut host = TestHost::new();
        host.bug_compliance = false;
        let scope = host.scope("/data/rep/x", 2);
        assert_eq!(
            rewrite_in(&host, "/data/rep/x", &scope),
            "/model/instance[1]/data/rep/x"
        );
    }

    #[test]
    fn test_bug_compliance_nested_series() {
        let host = TestHost::new();
        let context = host.element("/model/instance[1]/data/rep[2]/sub[2]/y");
        let scope = Scope {
            selector: Some("/data/rep/sub/y"),
            index: 3,
            context,
        };
        // The outer step is positioned first; the inner plain path then no longer matches.
        assert_eq!(
            rewrite_in(&host, "/data/rep/sub/y", &scope),
            "/model/instance[1]/data/rep[2]/sub/y"
        );
        // Paths that already carry a position are left alone.
        assert_eq!(
            rewrite_in(&host, "/data/rep[2]/sub/y + /data/rep/x", &scope),
            "/model/instance[1]/data/rep[2]/sub/y + /model/instance[1]/data/rep[2]/x"
        );
    }

    #[test]
    fn test_call_patterns_compile() {
        assert!(INSTANCE_CALL.is_match("instance( 'a-b.c' )"));
        assert!(VERSION_CALL.is_match("concat(version(), 'x')"));
        assert!(!VERSION_CALL.is_match("form-version()"));
        assert!(CURRENT_CALL.is_match("current()/x"));
        assert_eq!(replace_call(&CURRENT_CALL, "1 + current()", "/a"), "1 + /a");
    }

    #[test]
    fn test_decode_entities() {
        let host = TestHost::new();
        let scope = host.scope("/data/n", 0);
        assert_eq!(
            rewrite_in(&host, "/data/n &lt; 3 and /data/n &gt; 1 and . != &quot;&quot;", &scope),
            r#"/model/instance[1]/data/n < 3 and /model/instance[1]/data/n > 1 and . != """#
        );
    }

    #[test]
    fn test_rewriting_is_idempotent() {
        let host = TestHost::new();
        let scope = host.scope("/data/rep/sub/y", 3);
        for expr in [
            "instance('cities')/root/item[name = current()/../y]/name",
            "indexed-repeat(/data/rep/x, /data/rep, 2) = /data/rep/x",
            "pulldata('csv', 'col2', 'col1', '5')",
            "count(/data/rep/sub) > 1 and version() != ''",
        ] {
            let once = rewrite_in(&host, expr, &scope);
            let twice = rewrite_in(&host, &once, &scope);
            assert_eq!(once, twice, "not a fixed point: {expr}");
        }
    }
}
