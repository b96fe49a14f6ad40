use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    /// An expression could not be evaluated as written.
    #[error("Logic error in '{expression}': {message}")]
    Logic { expression: String, message: String },

    #[error("Model is corrupt. It does not contain a childnode of instance")]
    CorruptModel,

    #[error("XML parsing error: {0}")]
    MalformedXml(#[from] roxmltree::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl ModelError {
    pub fn logic(expression: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Logic {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Problems found while loading a model. Loading reports these instead of failing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Malformed model: {0}")]
    MalformedModel(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Missing instanceID node in primary instance")]
    MissingInstanceId,

    #[error("External instance \"{0}\" is empty")]
    EmptyExternalInstance(String),

    #[error("External instance \"{id}\" is malformed: {message}")]
    MalformedExternalInstance { id: String, message: String },

    #[error("Can't find data for external instance \"{0}\"")]
    MissingExternalInstance(String),

    #[error("Error trying to merge record: {0}")]
    Merge(String),
}
