//! The evaluation engine for executing a parsed XPath AST against a generic `DataSourceNode`.

use super::ast::{Axis, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::functions::{self, FunctionRegistry};
use super::{axes, operators};
use crate::ast::BinaryOperator;
use crate::datasource::{DataSourceNode, NodeType, QName};
use crate::error::XPathError;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Represents the possible result types of an XPath expression evaluation.
#[derive(Debug, Clone)]
pub enum XPathValue<N> {
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// Coerces the XPath value to a boolean as per XPath 1.0 rules.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
        }
    }

    /// Coerces the XPath value to a number as per XPath 1.0 rules.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::NodeSet(nodes) => {
                string_to_number(&nodes.first().map(|n| n.string_value()).unwrap_or_default())
            }
        }
    }
}

impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    /// Coerces the XPath value to a string as per XPath 1.0 rules.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => write!(
                f,
                "{}",
                nodes.first().map(|n| n.string_value()).unwrap_or_default()
            ),
            XPathValue::String(s) => write!(f, "{}", s),
            XPathValue::Number(n) => write!(f, "{}", format_number(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Formats a number the way XPath's `string()` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Parses a string the way XPath's `number()` does: optional whitespace, an optional
/// minus sign, then `Digits ('.' Digits?)?` or `'.' Digits`. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    let valid = all_digits(int_part)
        && frac_part.is_none_or(all_digits)
        && (!int_part.is_empty() || frac_part.is_some_and(|f| !f.is_empty()));
    if !valid {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// A container for all state needed during expression evaluation.
/// `'a` is the lifetime of the underlying data source.
/// `'d` is the lifetime of the evaluation context itself.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    pub functions: &'d FunctionRegistry,
    pub context_position: usize, // 1-based index
    pub context_size: usize,
    pub variables: &'d HashMap<String, XPathValue<N>>,
    /// If true, references to undeclared variables are errors.
    pub strict: bool,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    pub fn new(
        context_node: N,
        root_node: N,
        functions: &'d FunctionRegistry,
        context_position: usize,
        context_size: usize,
        variables: &'d HashMap<String, XPathValue<N>>,
        strict: bool,
    ) -> Self {
        Self {
            context_node,
            root_node,
            functions,
            context_position,
            context_size,
            variables,
            strict,
            _marker: PhantomData,
        }
    }

    /// A context for evaluating a predicate against one node of a candidate list.
    fn focused(&self, node: N, position: usize, size: usize) -> Self {
        Self::new(
            node,
            self.root_node,
            self.functions,
            position,
            size,
            self.variables,
            self.strict,
        )
    }
}

/// Evaluates a compiled expression and returns a concrete `XPathValue`.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            let nodes = evaluate_location_path(path, e_ctx)?;
            Ok(XPathValue::NodeSet(nodes))
        }
        Expression::Filter {
            primary,
            predicates,
        } => match evaluate(primary, e_ctx)? {
            XPathValue::NodeSet(nodes) => Ok(XPathValue::NodeSet(apply_predicates(
                nodes, predicates, e_ctx,
            )?)),
            other => Err(XPathError::TypeError(format!(
                "Predicates can only filter node-sets, got {:?}",
                other
            ))),
        },
        Expression::Variable(name) => {
            if e_ctx.strict && !e_ctx.variables.contains_key(name) {
                return Err(XPathError::UnknownVariable(name.clone()));
            }
            match e_ctx.variables.get(name) {
                Some(value) => Ok(value.clone()),
                None => {
                    log::debug!("Unbound variable ${} evaluates to an empty string", name);
                    Ok(XPathValue::String(String::new()))
                }
            }
        }
        Expression::FunctionCall { name, args } => {
            if !e_ctx.functions.contains(name) {
                return Err(XPathError::UnknownFunction(name.clone()));
            }
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx)
        }
        Expression::BinaryOp { left, op, right } => {
            let left_val = evaluate(left, e_ctx)?;
            // `or` and `and` must not evaluate their right operand when the left decides.
            match op {
                BinaryOperator::Or if left_val.to_bool() => return Ok(XPathValue::Boolean(true)),
                BinaryOperator::And if !left_val.to_bool() => {
                    return Ok(XPathValue::Boolean(false));
                }
                _ => {}
            }
            let right_val = evaluate(right, e_ctx)?;
            operators::evaluate(
                *op,
                left_val,
                right_val,
                e_ctx.functions.extensions_enabled(),
            )
        }
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-operators::number(
                    &val,
                    e_ctx.functions.extensions_enabled(),
                ))),
            }
        }
    }
}

fn evaluate_location_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let initial_context = if let Some(start_expr) = &path.start_point {
        // The path starts from the result of another expression.
        match evaluate(start_expr, e_ctx)? {
            XPathValue::NodeSet(nodes) => nodes,
            other => {
                return Err(XPathError::TypeError(format!(
                    "A path can only continue from a node-set, got {:?}",
                    other
                )));
            }
        }
    } else if path.is_absolute {
        vec![e_ctx.root_node]
    } else {
        vec![e_ctx.context_node]
    };

    let mut current_nodes = initial_context;
    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Evaluates one step for every context node. Predicates see each context node's
/// candidates in proximity order; the merged result is in document order.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut result = Vec::new();
    for &node in context_nodes {
        let candidates: Vec<N> = axes::collect(step.axis, node)
            .into_iter()
            .filter(|n| matches_node_test(n, &step.node_test, step.axis))
            .collect();
        result.extend(apply_predicates(candidates, &step.predicates, e_ctx)?);
    }
    if context_nodes.len() > 1 || step.axis.is_reverse() {
        result.sort();
        result.dedup();
    }
    Ok(result)
}

/// Tests a node against a `NodeTest`. Name tests and `*` only select nodes of the
/// axis' principal type: attributes on the attribute axis, elements elsewhere.
fn matches_node_test<'a, N>(node: &N, test: &NodeTest, axis: Axis) -> bool
where
    N: DataSourceNode<'a> + 'a,
{
    let principal = if axis == Axis::Attribute {
        NodeType::Attribute
    } else {
        NodeType::Element
    };
    match test {
        NodeTest::Wildcard => node.node_type() == principal,
        NodeTest::Name(name_to_test) => {
            node.node_type() == principal
                && node.name().is_some_and(|q_name| {
                    let wanted = QName::parse(name_to_test);
                    q_name.local_part == wanted.local_part && q_name.prefix == wanted.prefix
                })
        }
        NodeTest::NodeType(ntt) => match ntt {
            NodeTypeTest::Text => node.node_type() == NodeType::Text,
            NodeTypeTest::Comment => node.node_type() == NodeType::Comment,
            NodeTypeTest::ProcessingInstruction => {
                node.node_type() == NodeType::ProcessingInstruction
            }
            NodeTypeTest::Node => true,
        },
    }
}

/// Filters nodes by a series of predicates. Each predicate re-numbers the survivors
/// of the previous one.
fn apply_predicates<'a, N>(
    nodes: Vec<N>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut final_nodes = nodes;
    for predicate in predicates {
        let context_size = final_nodes.len();
        let mut predicate_results = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.iter().enumerate() {
            let predicate_e_ctx = e_ctx.focused(*node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_e_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                predicate_results.push(*node);
            }
        }
        final_nodes = predicate_results;
    }
    Ok(final_nodes)
}
