//! An XPath 1.0 interpreter over any tree implementing [`DataSourceNode`], with an optional
//! OpenRosa extension function library.

pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, Step};
pub use datasource::{DataSourceNode, NodeType, QName};
pub use engine::{EvaluationContext, XPathValue, evaluate, format_number, string_to_number};
pub use extensions::{
    EXTENSION_FUNCTIONS, contains_extension_call, date_to_days, days_to_date,
};
pub use functions::FunctionRegistry;

// Re-export test utilities for integration testing in downstream crates
pub use datasource::tests;
pub use error::XPathError;
pub use parser::parse_expression;
