//! Form-entry data model engine. Re-exports the model, datatype and XPath crates and hosts
//! the command-line front end.
pub mod cli;
pub mod error;

pub use error::XformError;
pub use xform_model::{
    BugCompliance, DataModel, DataType, Document, LoadError, ModelConfig, ModelError,
    ModelEvent, ModelSource, NodeFilter, NodeId, Nodeset, ResultKind, SetValOutcome,
    UpdateDetail, Value,
};
pub use xform_types as types;
pub use xform_xpath1 as xpath;
