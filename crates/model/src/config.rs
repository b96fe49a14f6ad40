use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Controls the legacy repeat-position injection applied to absolute paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugCompliance {
    /// Active unless the model element declares an `xforms-version`. (Default)
    #[default]
    Auto,
    Always,
    Never,
}

/// Behavior switches for one form-entry session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Give every new repeat instance an `enk:ordinal` attribute.
    pub repeat_ordinals: bool,
    /// The record being loaded was submitted before; rotate its instanceID on load.
    pub submitted: bool,
    pub bug_compliance: BugCompliance,
}

impl ModelConfig {
    pub fn with_repeat_ordinals(mut self, enabled: bool) -> Self {
        self.repeat_ordinals = enabled;
        self
    }

    pub fn with_submitted(mut self, submitted: bool) -> Self {
        self.submitted = submitted;
        self
    }

    pub fn with_bug_compliance(mut self, mode: BugCompliance) -> Self {
        self.bug_compliance = mode;
        self
    }
}

/// A secondary instance whose content is supplied by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInstance {
    pub id: String,
    pub xml: String,
}

/// Everything a model is loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    pub model: String,
    pub record: Option<String>,
    pub external: Vec<ExternalInstance>,
    /// Device and user properties exposed through `instance('__session')`.
    pub session: BTreeMap<String, String>,
}

impl ModelSource {
    pub fn new(model: impl Into<String>) -> Self {
        ModelSource {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_record(mut self, record: impl Into<String>) -> Self {
        self.record = Some(record.into());
        self
    }

    pub fn with_external(mut self, id: impl Into<String>, xml: impl Into<String>) -> Self {
        self.external.push(ExternalInstance {
            id: id.into(),
            xml: xml.into(),
        });
        self
    }

    pub fn with_session(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(key.into(), value.into());
        self
    }
}
