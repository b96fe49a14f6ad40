//! XPath evaluation against the instance tree, with a standards-only fast path and an
//! extension-capable fallback.
use crate::document::{Document, NodeId, XmlNode};
use crate::error::ModelError;
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use xform_xpath1::{
    EvaluationContext, Expression, FunctionRegistry, XPathError, XPathValue,
    contains_extension_call, evaluate, format_number, parse_expression, string_to_number,
};

/// The shape of result a caller asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultKind {
    /// Whatever the expression produces; node-sets become their string value.
    #[default]
    Any,
    Number,
    String,
    Boolean,
    /// The first node of a node-set.
    Node,
    /// The whole node-set in document order.
    Nodes,
}

impl ResultKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "any" => Some(ResultKind::Any),
            "number" => Some(ResultKind::Number),
            "string" => Some(ResultKind::String),
            "boolean" => Some(ResultKind::Boolean),
            "node" => Some(ResultKind::Node),
            "nodes" => Some(ResultKind::Nodes),
            _ => None,
        }
    }
}

/// A typed evaluation result. Node results are ids into the evaluated document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    Node(Option<NodeId>),
    Nodes(Vec<NodeId>),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Node(node) => node.is_some(),
            Value::Nodes(nodes) => !nodes.is_empty(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Node(_) | Value::Nodes(_) => f64::NAN,
        }
    }

    pub fn into_nodes(self) -> Vec<NodeId> {
        match self {
            Value::Nodes(nodes) => nodes,
            Value::Node(node) => node.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Value::Node(node) => *node,
            Value::Nodes(nodes) => nodes.first().copied(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Node(node) => write!(f, "{:?}", node),
            Value::Nodes(nodes) => write!(f, "{:?}", nodes),
        }
    }
}

/// Why an evaluator gave up on an expression.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct EvalFailure(#[from] pub XPathError);

pub trait XPathEvaluator {
    fn evaluate(
        &self,
        doc: &Document,
        expression: &str,
        context: NodeId,
        kind: ResultKind,
    ) -> Result<Value, EvalFailure>;
}

/// The bundled interpreter, configured with either function library.
pub struct InterpreterEvaluator {
    functions: FunctionRegistry,
    parsed: RefCell<HashMap<String, Rc<Expression>>>,
}

impl InterpreterEvaluator {
    /// XPath 1.0 core functions only.
    pub fn standard() -> Self {
        Self::new(FunctionRegistry::core())
    }

    /// Core functions plus the OpenRosa extensions and date-aware operators.
    pub fn extended() -> Self {
        Self::new(FunctionRegistry::with_extensions())
    }

    fn new(functions: FunctionRegistry) -> Self {
        InterpreterEvaluator {
            functions,
            parsed: RefCell::new(HashMap::new()),
        }
    }

    fn parse(&self, expression: &str) -> Result<Rc<Expression>, XPathError> {
        if let Some(ast) = self.parsed.borrow().get(expression) {
            return Ok(Rc::clone(ast));
        }
        let ast = Rc::new(parse_expression(expression)?);
        self.parsed
            .borrow_mut()
            .insert(expression.to_string(), Rc::clone(&ast));
        Ok(ast)
    }

    pub fn parsed_count(&self) -> usize {
        self.parsed.borrow().len()
    }
}

impl XPathEvaluator for InterpreterEvaluator {
    fn evaluate(
        &self,
        doc: &Document,
        expression: &str,
        context: NodeId,
        kind: ResultKind,
    ) -> Result<Value, EvalFailure> {
        let ast = self.parse(expression)?;
        let variables = HashMap::new();
        let e_ctx = EvaluationContext::new(
            doc.node(context),
            doc.node(doc.root()),
            &self.functions,
            1,
            1,
            &variables,
            true,
        );
        let result = evaluate(&ast, &e_ctx)?;
        coerce(result, kind)
    }
}

fn coerce(result: XPathValue<XmlNode<'_>>, kind: ResultKind) -> Result<Value, EvalFailure> {
    let value = match (kind, result) {
        (ResultKind::Number, result) => Value::Number(result.to_number()),
        (ResultKind::String, result) => Value::String(result.to_string()),
        (ResultKind::Boolean, result) => Value::Boolean(result.to_bool()),
        (ResultKind::Node, XPathValue::NodeSet(nodes)) => {
            Value::Node(nodes.first().map(XmlNode::id))
        }
        (ResultKind::Nodes, XPathValue::NodeSet(nodes)) => {
            Value::Nodes(nodes.iter().map(XmlNode::id).collect())
        }
        (ResultKind::Node | ResultKind::Nodes, other) => {
            log::error!("Expected a node-set, got {}", other);
            return Err(EvalFailure(XPathError::TypeError(format!(
                "expected a node-set, got '{}'",
                other
            ))));
        }
        (ResultKind::Any, XPathValue::Boolean(b)) => Value::Boolean(b),
        (ResultKind::Any, XPathValue::Number(n)) => Value::Number(n),
        (ResultKind::Any, XPathValue::String(s)) => Value::String(s),
        (ResultKind::Any, result @ XPathValue::NodeSet(_)) => Value::String(result.to_string()),
    };
    Ok(value)
}

/// Tries a host evaluator first and falls back to the extension interpreter, which is built
/// on first use.
pub struct DualEvaluator {
    host: Box<dyn XPathEvaluator>,
    fallback: OnceCell<InterpreterEvaluator>,
}

impl Default for DualEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl DualEvaluator {
    pub fn new() -> Self {
        Self::with_host(Box::new(InterpreterEvaluator::standard()))
    }

    pub fn with_host(host: Box<dyn XPathEvaluator>) -> Self {
        DualEvaluator {
            host,
            fallback: OnceCell::new(),
        }
    }

    /// The host is skipped when `try_host` is false or the expression calls an extension
    /// function. A fallback failure is a [`ModelError::Logic`].
    pub fn evaluate(
        &self,
        doc: &Document,
        expression: &str,
        context: NodeId,
        kind: ResultKind,
        try_host: bool,
    ) -> Result<Value, ModelError> {
        if try_host && !contains_extension_call(expression) {
            match self.host.evaluate(doc, expression, context, kind) {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    log::debug!("Host evaluator failed on '{}': {}", expression, failure)
                }
            }
        }
        let fallback = self.fallback.get_or_init(|| {
            log::debug!("Binding extension evaluator to document");
            InterpreterEvaluator::extended()
        });
        fallback
            .evaluate(doc, expression, context, kind)
            .map_err(|failure| ModelError::logic(expression, failure.to_string()))
    }

    pub fn fallback_ready(&self) -> bool {
        self.fallback.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = "<data><a>3</a><b>4</b><c/></data>";

    struct FailingHost;

    impl XPathEvaluator for FailingHost {
        fn evaluate(
            &self,
            _doc: &Document,
            _expression: &str,
            _context: NodeId,
            _kind: ResultKind,
        ) -> Result<Value, EvalFailure> {
            Err(EvalFailure(XPathError::TypeError("unsupported".into())))
        }
    }

    fn setup() -> (Document, NodeId) {
        let doc = Document::parse(DATA).unwrap();
        let data = doc.document_element().unwrap();
        (doc, data)
    }

    #[test]
    fn test_host_handles_standard_expressions() {
        let (doc, data) = setup();
        let evaluator = DualEvaluator::new();
        let value = evaluator
            .evaluate(&doc, "/data/a + /data/b", data, ResultKind::Number, true)
            .unwrap();
        assert_eq!(value, Value::Number(7.0));
        assert!(!evaluator.fallback_ready());
    }

    #[test]
    fn test_extension_calls_skip_host() {
        let (doc, data) = setup();
        let evaluator = DualEvaluator::new();
        let value = evaluator
            .evaluate(&doc, "if(a > 2, 'big', 'small')", data, ResultKind::String, true)
            .unwrap();
        assert_eq!(value, Value::String("big".into()));
        assert!(evaluator.fallback_ready());
    }

    #[test]
    fn test_host_failure_falls_back() {
        let (doc, data) = setup();
        let evaluator = DualEvaluator::with_host(Box::new(FailingHost));
        let value = evaluator
            .evaluate(&doc, "count(*)", data, ResultKind::Number, true)
            .unwrap();
        assert_eq!(value, Value::Number(3.0));
    }

    #[test]
    fn test_fallback_failure_is_logic_error() {
        let (doc, data) = setup();
        let evaluator = DualEvaluator::new();
        let err = evaluator
            .evaluate(&doc, "if(a)", data, ResultKind::String, true)
            .unwrap_err();
        match err {
            ModelError::Logic { expression, .. } => assert_eq!(expression, "if(a)"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_result_coercion() {
        let (doc, data) = setup();
        let evaluator = DualEvaluator::new();
        let any = evaluator
            .evaluate(&doc, "b", data, ResultKind::Any, true)
            .unwrap();
        assert_eq!(any, Value::String("4".into()));
        let nodes = evaluator
            .evaluate(&doc, "*", data, ResultKind::Nodes, true)
            .unwrap();
        assert_eq!(nodes.clone().into_nodes().len(), 3);
        let node = evaluator
            .evaluate(&doc, "c", data, ResultKind::Node, true)
            .unwrap();
        assert_eq!(node.node(), nodes.into_nodes().get(2).copied());
        assert!(
            evaluator
                .evaluate(&doc, "1 + 1", data, ResultKind::Nodes, true)
                .is_err()
        );
    }

    #[test]
    fn test_parsed_expressions_are_memoized() {
        let (doc, data) = setup();
        let evaluator = InterpreterEvaluator::standard();
        for _ in 0..3 {
            evaluator
                .evaluate(&doc, "a * 2", data, ResultKind::Number)
                .unwrap();
        }
        assert_eq!(evaluator.parsed_count(), 1);
    }
}
