//! The XForms data model: an editable instance document, repeat series management, and an
//! expression pipeline that rewrites form expressions before handing them to an XPath
//! evaluator.

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod model;
pub mod nodeset;
pub mod path;
pub mod repeat;
pub mod rewriter;
pub mod serialize;

pub use config::{BugCompliance, ExternalInstance, ModelConfig, ModelSource};
pub use document::{Document, NodeId, NodeKind, XmlNode};
pub use error::{LoadError, ModelError};
pub use evaluator::{
    DualEvaluator, EvalFailure, InterpreterEvaluator, ResultKind, Value, XPathEvaluator,
};
pub use events::{ModelEvent, UpdateDetail};
pub use model::DataModel;
pub use nodeset::{NodeFilter, Nodeset, SetValOutcome};
pub use repeat::{SeriesAnchor, Template};
pub use xform_types::DataType;
