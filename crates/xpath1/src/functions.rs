//! Defines the registry and built-in implementations for XPath 1.0 functions.

use super::engine::{EvaluationContext, XPathValue, string_to_number};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use crate::extensions::{self, EXTENSION_FUNCTIONS};
use std::collections::HashSet;

const CORE_FUNCTIONS: &[&str] = &[
    // Node-set
    "last",
    "position",
    "count",
    "id",
    "local-name",
    "name",
    // String
    "string",
    "concat",
    "starts-with",
    "contains",
    "substring-before",
    "substring-after",
    "substring",
    "string-length",
    "normalize-space",
    "translate",
    // Boolean
    "boolean",
    "not",
    "true",
    "false",
    "lang",
    // Number
    "number",
    "sum",
    "floor",
    "ceiling",
    "round",
];

/// The set of function names an evaluator accepts.
///
/// The core registry is plain XPath 1.0. The extended registry adds the OpenRosa
/// function library and switches operators to the extension dialect, where date
/// strings used as numbers count days since the epoch.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashSet<&'static str>,
    extensions: bool,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashSet::new(),
            extensions: false,
        }
    }

    /// The XPath 1.0 core function library.
    pub fn core() -> Self {
        let mut registry = Self::new();
        CORE_FUNCTIONS
            .iter()
            .for_each(|&name| registry.register(name));
        registry
    }

    /// The core library plus every extension function.
    pub fn with_extensions() -> Self {
        let mut registry = Self::core();
        EXTENSION_FUNCTIONS
            .iter()
            .for_each(|&name| registry.register(name));
        registry.extensions = true;
        registry
    }

    pub fn register(&mut self, name: &'static str) {
        self.functions.insert(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn extensions_enabled(&self) -> bool {
        self.extensions
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::core()
    }
}

/// Dispatches a function call to the correct implementation.
pub fn evaluate_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    // `round` and `position` have wider signatures in the extension library.
    if e_ctx.functions.extensions_enabled() && EXTENSION_FUNCTIONS.contains(&name) {
        return extensions::evaluate(name, args, e_ctx);
    }
    match name {
        // Node-set
        "last" => func_last(args, e_ctx),
        "position" => func_position(args, e_ctx),
        "count" => func_count(args),
        "id" => func_id(args, e_ctx),
        "local-name" => func_local_name(args, e_ctx),
        "name" => func_name(args, e_ctx),

        // String
        "string" => func_string(args, e_ctx),
        "concat" => func_concat(args),
        "starts-with" => func_starts_with(args),
        "contains" => func_contains(args),
        "substring-before" => func_substring_before(args),
        "substring-after" => func_substring_after(args),
        "substring" => func_substring(args),
        "string-length" => func_string_length(args, e_ctx),
        "normalize-space" => func_normalize_space(args, e_ctx),
        "translate" => func_translate(args),

        // Boolean
        "boolean" => func_boolean(args),
        "not" => func_not(args),
        "true" => func_true(args),
        "false" => func_false(args),
        "lang" => func_lang(args, e_ctx),

        // Number
        "number" => func_number(args, e_ctx),
        "sum" => func_sum(args),
        "floor" => func_floor(args),
        "ceiling" => func_ceiling(args),
        "round" => func_round(args),

        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

pub(crate) fn check_arity<N>(
    function: &str,
    args: &[XPathValue<N>],
    min: usize,
    max: usize,
) -> Result<(), XPathError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = match (min, max) {
        (0, 0) => "0 arguments".to_string(),
        (a, b) if a == b => format!("{} argument{}", a, if a == 1 { "" } else { "s" }),
        (a, usize::MAX) => format!("at least {} arguments", a),
        (a, b) => format!("{} to {} arguments", a, b),
    };
    Err(XPathError::arity(function, &expected))
}

/// Takes the single node-set argument of functions like `count()`.
pub(crate) fn node_set_arg<N>(function: &str, value: XPathValue<N>) -> Result<Vec<N>, XPathError>
where
    N: std::fmt::Debug,
{
    match value {
        XPathValue::NodeSet(nodes) => Ok(nodes),
        v => Err(XPathError::TypeError(format!(
            "{}() argument must be a node-set, got {:?}",
            function, v
        ))),
    }
}

/// The string argument, or the context node's string value when it is omitted.
fn string_or_context<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> String {
    if args.is_empty() {
        e_ctx.context_node.string_value()
    } else {
        args.remove(0).to_string()
    }
}

fn two_strings<'a, N: DataSourceNode<'a>>(
    function: &str,
    mut args: Vec<XPathValue<N>>,
) -> Result<(String, String), XPathError> {
    check_arity(function, &args, 2, 2)?;
    let s2 = args.remove(1).to_string();
    let s1 = args.remove(0).to_string();
    Ok((s1, s2))
}

// --- Node-Set Functions ---

fn func_last<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("last", &args, 0, 0)?;
    Ok(XPathValue::Number(e_ctx.context_size as f64))
}

fn func_position<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("position", &args, 0, 0)?;
    Ok(XPathValue::Number(e_ctx.context_position as f64))
}

fn func_count<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("count", &args, 1, 1)?;
    let nodes = node_set_arg("count", args.remove(0))?;
    Ok(XPathValue::Number(nodes.len() as f64))
}

fn func_id<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("id", &args, 1, 1)?;
    let id_string = match args.remove(0) {
        XPathValue::NodeSet(nodes) => nodes
            .iter()
            .map(|n| n.string_value())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    let ids_to_find: HashSet<&str> = id_string.split_whitespace().collect();
    if ids_to_find.is_empty() {
        return Ok(XPathValue::NodeSet(vec![]));
    }

    let results = crate::axes::descendants(e_ctx.root_node)
        .into_iter()
        .filter(|node| {
            node.node_type() == NodeType::Element
                && node.attributes().any(|attr| {
                    attr.name().is_some_and(|q| {
                        q.local_part == "id" && matches!(q.prefix, None | Some("xml"))
                    }) && ids_to_find.contains(attr.string_value().as_str())
                })
        })
        .collect();
    Ok(XPathValue::NodeSet(results))
}

/// The first node of the optional node-set argument, or the context node.
fn name_target<'a, 'd, N: DataSourceNode<'a>>(
    function: &str,
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<Option<N>, XPathError> {
    check_arity(function, &args, 0, 1)?;
    if args.is_empty() {
        return Ok(Some(e_ctx.context_node));
    }
    Ok(node_set_arg(function, args.remove(0))?.first().copied())
}

fn func_local_name<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let name = name_target("local-name", args, e_ctx)?
        .and_then(|n| n.name().map(|q| q.local_part.to_string()))
        .unwrap_or_default();
    Ok(XPathValue::String(name))
}

fn func_name<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let name = name_target("name", args, e_ctx)?
        .and_then(|n| {
            n.name().map(|q| match q.prefix {
                Some(prefix) => format!("{}:{}", prefix, q.local_part),
                None => q.local_part.to_string(),
            })
        })
        .unwrap_or_default();
    Ok(XPathValue::String(name))
}

// --- String Functions ---

fn func_string<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("string", &args, 0, 1)?;
    Ok(XPathValue::String(string_or_context(args, e_ctx)))
}

fn func_concat<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("concat", &args, 2, usize::MAX)?;
    let result = args.iter().map(|v| v.to_string()).collect::<String>();
    Ok(XPathValue::String(result))
}

fn func_starts_with<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let (s1, s2) = two_strings("starts-with", args)?;
    Ok(XPathValue::Boolean(s1.starts_with(&s2)))
}

fn func_contains<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let (s1, s2) = two_strings("contains", args)?;
    Ok(XPathValue::Boolean(s1.contains(&s2)))
}

fn func_substring_before<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let (s1, s2) = two_strings("substring-before", args)?;
    let result = s1.find(&s2).map(|i| s1[..i].to_string()).unwrap_or_default();
    Ok(XPathValue::String(result))
}

fn func_substring_after<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let (s1, s2) = two_strings("substring-after", args)?;
    let result = s1
        .find(&s2)
        .map(|i| s1[i + s2.len()..].to_string())
        .unwrap_or_default();
    Ok(XPathValue::String(result))
}

fn func_substring<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("substring", &args, 2, 3)?;
    let length_val = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start_val = args.remove(1).to_number();
    let s = args.remove(0).to_string();

    // XPath rounding rules for start/length
    let first = (start_val + 0.5).floor();
    let last = match length_val {
        Some(l) => first + (l + 0.5).floor(),
        None => f64::INFINITY,
    };

    let result = s
        .chars()
        .enumerate()
        .filter_map(|(i, c)| {
            let pos = (i + 1) as f64; // XPath positions are 1-based
            (pos >= first && pos < last).then_some(c)
        })
        .collect::<String>();
    Ok(XPathValue::String(result))
}

fn func_string_length<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("string-length", &args, 0, 1)?;
    let s = string_or_context(args, e_ctx);
    Ok(XPathValue::Number(s.chars().count() as f64))
}

fn func_normalize_space<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("normalize-space", &args, 0, 1)?;
    let s = string_or_context(args, e_ctx);
    Ok(XPathValue::String(
        s.split_whitespace().collect::<Vec<_>>().join(" "),
    ))
}

fn func_translate<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("translate", &args, 3, 3)?;
    let to_str: Vec<char> = args.remove(2).to_string().chars().collect();
    let from_str: Vec<char> = args.remove(1).to_string().chars().collect();
    let source_str = args.remove(0).to_string();
    let result = source_str
        .chars()
        .filter_map(|c| match from_str.iter().position(|&fc| fc == c) {
            Some(pos) => to_str.get(pos).copied(),
            None => Some(c),
        })
        .collect::<String>();
    Ok(XPathValue::String(result))
}

// --- Boolean Functions ---

fn func_boolean<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("boolean", &args, 1, 1)?;
    Ok(XPathValue::Boolean(args.remove(0).to_bool()))
}

fn func_not<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("not", &args, 1, 1)?;
    Ok(XPathValue::Boolean(!args.remove(0).to_bool()))
}

fn func_true<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("true", &args, 0, 0)?;
    Ok(XPathValue::Boolean(true))
}

fn func_false<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("false", &args, 0, 0)?;
    Ok(XPathValue::Boolean(false))
}

fn func_lang<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("lang", &args, 1, 1)?;
    let test_lang = args.remove(0).to_string().to_lowercase();
    let mut current = Some(e_ctx.context_node);

    // If context node is not an element, start with its parent.
    if current.is_some_and(|n| n.node_type() != NodeType::Element) {
        current = current.and_then(|n| n.parent());
    }

    while let Some(node) = current {
        let declared = node.attributes().find(|attr| {
            attr.name()
                .is_some_and(|q| q.prefix == Some("xml") && q.local_part == "lang")
        });
        if let Some(attr) = declared {
            // The nearest xml:lang decides: exact match or a subcode ("en" matches "en-GB").
            let node_lang = attr.string_value().to_lowercase();
            return Ok(XPathValue::Boolean(
                node_lang == test_lang || node_lang.starts_with(&format!("{}-", test_lang)),
            ));
        }
        current = node.parent();
    }
    Ok(XPathValue::Boolean(false))
}

// --- Number Functions ---

fn func_number<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("number", &args, 0, 1)?;
    let n = if args.is_empty() {
        string_to_number(&e_ctx.context_node.string_value())
    } else {
        args.remove(0).to_number()
    };
    Ok(XPathValue::Number(n))
}

fn func_sum<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("sum", &args, 1, 1)?;
    let sum = node_set_arg("sum", args.remove(0))?
        .iter()
        .map(|node| string_to_number(&node.string_value()))
        .sum();
    Ok(XPathValue::Number(sum))
}

fn func_floor<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("floor", &args, 1, 1)?;
    Ok(XPathValue::Number(args.remove(0).to_number().floor()))
}

fn func_ceiling<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("ceiling", &args, 1, 1)?;
    Ok(XPathValue::Number(args.remove(0).to_number().ceil()))
}

fn func_round<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    check_arity("round", &args, 1, 1)?;
    Ok(XPathValue::Number(xpath_round(args.remove(0).to_number())))
}

/// XPath 1.0 `round()`: halves go towards positive infinity.
pub(crate) fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return n;
    }
    (n + 0.5).floor()
}
