//! Handles for reading and writing the nodes a selector resolves to.
use crate::document::NodeId;
use crate::error::ModelError;
use crate::evaluator::ResultKind;
use crate::events::{ModelEvent, UpdateDetail};
use crate::model::DataModel;
use xform_types::DataType;

/// Selects every element of the primary instance.
pub const DEFAULT_SELECTOR: &str = "/model/instance[1]//*";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Keep elements without element children.
    pub only_leaf: bool,
    /// Keep elements whose trimmed text is not empty.
    pub no_empty: bool,
}

impl NodeFilter {
    pub fn leaves() -> Self {
        NodeFilter {
            only_leaf: true,
            no_empty: false,
        }
    }
}

/// What [`Nodeset::set_val`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValOutcome {
    /// The value changed. Carries the same detail as the emitted event.
    Updated(UpdateDetail),
    /// The node already held the converted value.
    Unchanged,
    /// The selector matched this many nodes instead of exactly one.
    NotUnique(usize),
}

impl SetValOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, SetValOutcome::Updated(_))
    }
}

/// A selector, an optional index into its matches and a filter. Resolved on every call, so a
/// handle never holds on to stale nodes.
pub struct Nodeset<'m> {
    model: &'m mut DataModel,
    selector: Option<String>,
    index: Option<usize>,
    filter: NodeFilter,
}

impl<'m> Nodeset<'m> {
    pub(crate) fn new(
        model: &'m mut DataModel,
        selector: Option<&str>,
        index: Option<usize>,
        filter: NodeFilter,
    ) -> Self {
        Nodeset {
            model,
            selector: selector.map(str::to_string),
            index,
            filter,
        }
    }

    pub fn selector(&self) -> &str {
        self.selector.as_deref().unwrap_or(DEFAULT_SELECTOR)
    }

    pub fn get(&self) -> Result<Vec<NodeId>, ModelError> {
        let doc = self.model.document();
        let mut nodes = self.model.select_nodes(self.selector())?;
        if self.filter.only_leaf {
            nodes.retain(|&node| !doc.has_element_children(node));
        }
        if self.filter.no_empty {
            nodes.retain(|&node| !doc.text(node).trim().is_empty());
        }
        if let Some(index) = self.index {
            nodes = nodes.get(index).copied().into_iter().collect();
        }
        Ok(nodes)
    }

    /// The first matching node.
    pub fn element(&self) -> Result<Option<NodeId>, ModelError> {
        Ok(self.get()?.first().copied())
    }

    /// Text of the first matching node.
    pub fn get_val(&self) -> Result<Option<String>, ModelError> {
        Ok(self.element()?.map(|node| self.model.document().text(node)))
    }

    /// Converts `value` to `datatype` and writes it, provided the selection is exactly one
    /// node and the value differs from the current one.
    pub fn set_val(
        &mut self,
        value: &str,
        datatype: DataType,
    ) -> Result<SetValOutcome, ModelError> {
        let nodes = self.get()?;
        let [target] = nodes.as_slice() else {
            log::error!(
                "Expected one node for '{}', found {}",
                self.selector(),
                nodes.len()
            );
            return Ok(SetValOutcome::NotUnique(nodes.len()));
        };
        let target = *target;
        let value = datatype.convert(value);
        if self.model.document().text(target) == value {
            return Ok(SetValOutcome::Unchanged);
        }

        let doc = self.model.document_mut();
        doc.set_text(target, &value);
        if datatype == DataType::Binary {
            if value.is_empty() {
                doc.retain_attributes(target, |name| name != "type");
            } else {
                doc.set_attribute(target, "type", "file");
            }
        }

        let (repeat_path, repeat_index) = self.model.closest_repeat(target);
        let detail = UpdateDetail {
            nodes: self
                .model
                .document()
                .name(target)
                .into_iter()
                .map(str::to_string)
                .collect(),
            repeat_path,
            repeat_index,
        };
        self.model.push_event(ModelEvent::DataUpdated(detail.clone()));
        Ok(SetValOutcome::Updated(detail))
    }

    /// Writes a multiple-choice answer, values separated by a space.
    pub fn set_vals(
        &mut self,
        values: &[&str],
        datatype: DataType,
    ) -> Result<SetValOutcome, ModelError> {
        self.set_val(&values.join(" "), datatype)
    }

    /// Position of the resolved node among all nodes of the selector, so that expressions
    /// evaluated with the selector as context see the node filters and index picked.
    fn context_index(&self) -> Result<usize, ModelError> {
        let Some(node) = self.element()? else {
            return Ok(self.index.unwrap_or(0));
        };
        Ok(self
            .model
            .select_nodes(self.selector())?
            .iter()
            .position(|&candidate| candidate == node)
            .unwrap_or(0))
    }

    /// Empty values are valid. Otherwise the value must be valid for `datatype` and the
    /// constraint, if any, must hold with the node as context.
    pub fn validate(
        &self,
        constraint: Option<&str>,
        datatype: DataType,
    ) -> Result<bool, ModelError> {
        let value = self.get_val()?.unwrap_or_default();
        if value.is_empty() {
            return Ok(true);
        }
        if !datatype.validate(&value) {
            return Ok(false);
        }
        match constraint.map(str::trim).filter(|expr| !expr.is_empty()) {
            Some(expr) => Ok(self
                .model
                .evaluate(
                    expr,
                    ResultKind::Boolean,
                    Some(self.selector()),
                    self.context_index()?,
                    true,
                )?
                .as_bool()),
            None => Ok(true),
        }
    }

    /// Whether the `required` expression holds for the node.
    pub fn is_required(&self, expr: Option<&str>) -> Result<bool, ModelError> {
        match expr.map(str::trim) {
            None | Some("") | Some("false()") => Ok(false),
            Some("true()") => Ok(true),
            Some(expr) => Ok(self
                .model
                .evaluate(
                    expr,
                    ResultKind::Boolean,
                    Some(self.selector()),
                    self.context_index()?,
                    true,
                )?
                .as_bool()),
        }
    }

    /// Fails only for an empty value on a required node.
    pub fn validate_required(&self, expr: Option<&str>) -> Result<bool, ModelError> {
        let empty = self.get_val()?.is_none_or(|value| value.is_empty());
        Ok(!empty || !self.is_required(expr)?)
    }

    /// Removes the first matching node. Returns false if nothing matched.
    pub fn remove(&mut self) -> Result<bool, ModelError> {
        match self.element()? {
            Some(node) => {
                self.model.remove_element(node);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
