//! Repeat series bookkeeping: insertion anchors, templates, and adding or removing
//! repeat instances.
//!
//! Every series of same-name repeat instances under one parent has an anchor recording where
//! its first member goes. Anchors live in a side table instead of the tree, so they never
//! show up in XPath results or serialized output. Within a group of anchors that share a
//! position, the order of the table is their order in the document.
use crate::document::{Document, NodeId};
use crate::error::ModelError;
use crate::model::DataModel;
use crate::path::{get_xpath, repeat_index};
use crate::serialize::to_xml;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const ENKETO_NAMESPACE: &str = "http://enketo.org/xforms";

/// The insertion point of one repeat series: directly after `after` in `parent`, or at the
/// start of `parent` when `after` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesAnchor {
    pub path: String,
    pub parent: NodeId,
    pub after: Option<NodeId>,
}

impl SeriesAnchor {
    fn remap(&self, mapping: &HashMap<NodeId, NodeId>) -> Option<SeriesAnchor> {
        let parent = *mapping.get(&self.parent)?;
        let after = match self.after {
            Some(after) => Some(*mapping.get(&after)?),
            None => None,
        };
        Some(SeriesAnchor {
            path: self.path.clone(),
            parent,
            after,
        })
    }

    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesAnchors {
    entries: Vec<SeriesAnchor>,
}

impl SeriesAnchors {
    /// Registers an anchor for the series that starts at `first`, unless its parent already
    /// has one for `path`.
    pub fn register_before(&mut self, doc: &Document, path: &str, first: NodeId) -> bool {
        let Some(parent) = doc.parent(first) else {
            return false;
        };
        if self
            .entries
            .iter()
            .any(|anchor| anchor.path == path && anchor.parent == parent)
        {
            return false;
        }
        self.entries.push(SeriesAnchor {
            path: path.to_string(),
            parent,
            after: doc.previous_sibling(first),
        });
        true
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.entries.iter().any(|anchor| anchor.path == path)
    }

    pub fn paths(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .map(|anchor| anchor.path.clone())
            .collect()
    }

    /// Table slots of the attached anchors for `path`, ordered by the document position of
    /// their parents.
    fn slots(&self, doc: &Document, path: &str) -> Vec<usize> {
        let mut slots: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, anchor)| anchor.path == path && doc.is_attached(anchor.parent))
            .map(|(slot, _)| slot)
            .collect();
        slots.sort_by(|&a, &b| {
            doc.compare_order(self.entries[a].parent, self.entries[b].parent)
        });
        slots
    }

    /// The anchors of every series of `path`, in document order.
    pub fn live(&self, doc: &Document, path: &str) -> Vec<&SeriesAnchor> {
        self.slots(doc, path)
            .into_iter()
            .map(|slot| &self.entries[slot])
            .collect()
    }

    /// The series index of the series of `path` under `parent`.
    pub fn series_index(&self, doc: &Document, path: &str, parent: NodeId) -> Option<usize> {
        self.live(doc, path)
            .iter()
            .position(|anchor| anchor.parent == parent)
    }

    /// The element siblings that follow the anchor and share the series name. Comments and
    /// text are skipped; the first differently named element ends the series.
    pub fn members(&self, doc: &Document, anchor: &SeriesAnchor) -> Vec<NodeId> {
        let siblings = doc.children(anchor.parent);
        let start = match anchor.after {
            Some(after) => match siblings.iter().position(|&sibling| sibling == after) {
                Some(index) => index + 1,
                None => return Vec::new(),
            },
            None => 0,
        };
        let name = anchor.name();
        let mut members = Vec::new();
        for &sibling in &siblings[start..] {
            if !doc.is_element(sibling) {
                continue;
            }
            if doc.name(sibling) != Some(name) {
                break;
            }
            members.push(sibling);
        }
        members
    }

    /// `node` was inserted directly after `last`; anchors that followed `last` now follow
    /// `node`.
    fn inserted_after(&mut self, last: NodeId, node: NodeId) {
        for anchor in &mut self.entries {
            if anchor.after == Some(last) {
                anchor.after = Some(node);
            }
        }
    }

    /// `node` was inserted at the position of the anchor in `slot`; anchors sharing that
    /// position but placed after it now follow `node`.
    fn inserted_at(&mut self, slot: usize, node: NodeId) {
        let Some(target) = self.entries.get(slot).cloned() else {
            return;
        };
        for anchor in self.entries.iter_mut().skip(slot + 1) {
            if anchor.parent == target.parent && anchor.after == target.after {
                anchor.after = Some(node);
            }
        }
    }

    /// `node` was detached from `parent`, where it followed `previous`.
    fn removed(&mut self, doc: &Document, parent: NodeId, node: NodeId, previous: Option<NodeId>) {
        let (mut moved, kept): (Vec<SeriesAnchor>, Vec<SeriesAnchor>) =
            std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|anchor| anchor.parent == parent && anchor.after == Some(node));
        for anchor in &mut moved {
            anchor.after = previous;
        }
        self.entries = kept;
        self.entries.extend(moved);
        self.entries.retain(|anchor| doc.is_attached(anchor.parent));
    }

    /// Copies of the anchors inside the subtree at `root`, translated through `mapping`.
    fn capture(
        &self,
        doc: &Document,
        root: NodeId,
        mapping: &HashMap<NodeId, NodeId>,
    ) -> Vec<SeriesAnchor> {
        self.entries
            .iter()
            .filter(|anchor| doc.contains(root, anchor.parent))
            .filter_map(|anchor| anchor.remap(mapping))
            .collect()
    }
}

/// A detached copy of a repeat instance, cloned for every new instance of its series.
#[derive(Debug, Clone)]
pub struct Template {
    fragment: Document,
    root: NodeId,
    anchors: Vec<SeriesAnchor>,
}

impl Template {
    pub fn document(&self) -> &Document {
        &self.fragment
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn to_xml(&self) -> Result<String, ModelError> {
        to_xml(&self.fragment, self.root, &BTreeMap::new())
    }

    /// True if the template's root element has element children.
    pub fn is_group(&self) -> bool {
        self.fragment.has_element_children(self.root)
    }
}

fn is_template_attribute(name: &str) -> bool {
    name.rsplit(':').next() == Some("template")
}

fn blank_leaves(doc: &mut Document, node: NodeId) {
    for element in std::iter::once(node).chain(doc.descendant_elements(node)) {
        if !doc.has_element_children(element) {
            doc.set_text(element, "");
        }
    }
}

impl DataModel {
    /// Detaches a node, keeping the anchor table consistent.
    pub(crate) fn remove_node(&mut self, node: NodeId) {
        let parent = self.doc.parent(node);
        let previous = self.doc.previous_sibling(node);
        self.doc.detach(node);
        if let Some(parent) = parent {
            self.anchors.removed(&self.doc, parent, node, previous);
        }
    }

    /// Anchors every series of `path` at its first member.
    pub(crate) fn register_series(&mut self, path: &str) {
        let nodes = match self.select_nodes(path) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("Could not locate repeat {}: {}", path, e);
                return;
            }
        };
        for node in nodes {
            let name = self.doc.name(node);
            let first_in_series = self
                .doc
                .previous_element_sibling(node)
                .is_none_or(|previous| self.doc.name(previous) != name);
            if first_in_series && self.anchors.register_before(&self.doc, path, node) {
                log::trace!("Anchored repeat series {}", path);
            }
        }
    }

    fn store_template(&mut self, path: &str, element: NodeId, blank: bool) {
        if self.templates.contains_key(path) {
            return;
        }
        let (mut fragment, root, mapping) = self.doc.fragment(element);
        fragment.retain_attributes(root, |name| !is_template_attribute(name));
        if blank {
            blank_leaves(&mut fragment, root);
        }
        let anchors = self.anchors.capture(&self.doc, element, &mapping);
        self.templates.insert(
            path.to_string(),
            Template {
                fragment,
                root,
                anchors,
            },
        );
    }

    /// Moves every element tagged with a `template` attribute out of the primary instance
    /// into the template store. Nested templates are handled first, so an outer template
    /// never contains an inner one.
    pub(crate) fn extract_templates(&mut self) {
        let Some(root) = self.primary_root() else {
            return;
        };
        let tagged: Vec<NodeId> = self
            .doc
            .descendant_elements(root)
            .into_iter()
            .filter(|&element| self.doc.attribute_by_local_name(element, "template").is_some())
            .collect();
        for element in tagged.into_iter().rev() {
            let Some(path) = get_xpath(&self.doc, element, "instance", false) else {
                continue;
            };
            self.register_series(&path);
            self.store_template(&path, element, false);
            self.remove_node(element);
            log::debug!("Extracted repeat template {}", path);
        }
    }

    /// Builds empty-valued templates from the first existing instance of each path that has
    /// no template yet.
    pub fn extract_fake_templates(&mut self, paths: &[&str]) {
        for &path in paths {
            if self.templates.contains_key(path) {
                continue;
            }
            let first = match self.select_nodes(path) {
                Ok(nodes) => nodes.first().copied(),
                Err(e) => {
                    log::warn!("Could not locate repeat {}: {}", path, e);
                    None
                }
            };
            if let Some(first) = first {
                self.register_series(path);
                self.store_template(path, first, true);
                log::debug!("Created template for {} from an existing instance", path);
            }
        }
    }

    pub fn template(&self, path: &str) -> Option<&Template> {
        self.templates.get(path)
    }

    /// True if `path` names a repeat known to the model.
    pub fn is_repeat_path(&self, path: &str) -> bool {
        self.templates.contains_key(path) || self.anchors.has_path(path)
    }

    /// The instances of the `series_index`-th series of `path`, in document order.
    pub fn get_repeat_series(&self, path: &str, series_index: usize) -> Vec<NodeId> {
        self.anchors
            .live(&self.doc, path)
            .get(series_index)
            .map(|anchor| self.anchors.members(&self.doc, anchor))
            .unwrap_or_default()
    }

    /// Appends a new instance of `path` to a series, cloned from its template. A merge
    /// clone has every leaf emptied and no ordinal. Returns the new instance, or `None` when
    /// there is no template or series to add to.
    pub fn add_repeat(&mut self, path: &str, series_index: usize, merge: bool) -> Option<NodeId> {
        if !self.templates.contains_key(path) {
            self.extract_fake_templates(&[path]);
        }
        let series = self.get_repeat_series(path, series_index);
        let slot = self
            .anchors
            .slots(&self.doc, path)
            .get(series_index)
            .copied();
        let (Some(template), Some(slot)) = (self.templates.get(path), slot) else {
            log::warn!(
                "Could not find template and insertion point for {} (series {})",
                path,
                series_index
            );
            return None;
        };

        let (clone, mapping) = self.doc.import(&template.fragment, template.root);
        let nested: Vec<SeriesAnchor> = template
            .anchors
            .iter()
            .filter_map(|anchor| anchor.remap(&mapping))
            .collect();
        match series.last() {
            Some(&last) => {
                self.doc.insert_after(last, clone);
                self.anchors.inserted_after(last, clone);
            }
            None => {
                let anchor = self.anchors.entries[slot].clone();
                match anchor.after {
                    Some(after) => self.doc.insert_after(after, clone),
                    None => self.doc.prepend_child(anchor.parent, clone),
                }
                self.anchors.inserted_at(slot, clone);
            }
        }
        self.anchors.entries.extend(nested);

        self.strip_ordinals(clone);
        if merge {
            blank_leaves(&mut self.doc, clone);
        } else if self.config.repeat_ordinals {
            let first = series.first().copied().unwrap_or(clone);
            self.assign_ordinal(clone, first);
        }
        log::debug!("Added repeat instance to {} (series {})", path, series_index);
        Some(clone)
    }

    /// Removes the instance at `position` of a series. Returns false if there is none.
    pub fn remove_repeat(&mut self, path: &str, series_index: usize, position: usize) -> bool {
        match self.get_repeat_series(path, series_index).get(position) {
            Some(&instance) => {
                self.remove_element(instance);
                true
            }
            None => false,
        }
    }

    /// The prefix bound to the Enketo namespace, registering `enk` if there is none.
    fn enketo_prefix(&mut self) -> String {
        if let Some((prefix, _)) = self
            .namespaces
            .iter()
            .find(|(_, uri)| uri.as_str() == ENKETO_NAMESPACE)
        {
            return prefix.clone();
        }
        self.namespaces
            .insert("enk".to_string(), ENKETO_NAMESPACE.to_string());
        "enk".to_string()
    }

    fn strip_ordinals(&mut self, instance: NodeId) {
        let Some((prefix, _)) = self
            .namespaces
            .iter()
            .find(|(_, uri)| uri.as_str() == ENKETO_NAMESPACE)
        else {
            return;
        };
        let ordinal = format!("{}:ordinal", prefix);
        let last_used = format!("{}:last-used-ordinal", prefix);
        self.doc
            .retain_attributes(instance, |name| name != ordinal && name != last_used);
    }

    fn assign_ordinal(&mut self, instance: NodeId, first: NodeId) {
        let prefix = self.enketo_prefix();
        let ordinal = format!("{}:ordinal", prefix);
        let last_used = format!("{}:last-used-ordinal", prefix);
        if self.doc.attribute(instance, &ordinal).is_some() {
            return;
        }
        let next = self
            .doc
            .attribute(first, &last_used)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let next = next.to_string();
        self.doc.set_attribute(first, &last_used, &next);
        self.doc.set_attribute(instance, &ordinal, &next);
    }

    /// Passes the series' last-used ordinal on when its first instance goes away.
    pub(crate) fn hand_over_ordinal(&mut self, instance: NodeId) {
        let Some((prefix, _)) = self
            .namespaces
            .iter()
            .find(|(_, uri)| uri.as_str() == ENKETO_NAMESPACE)
        else {
            return;
        };
        let last_used_name = format!("{}:last-used-ordinal", prefix);
        let Some(last_used) = self
            .doc
            .attribute(instance, &last_used_name)
            .map(str::to_string)
        else {
            return;
        };
        if let Some(next) = self.doc.next_element_sibling(instance)
            && self.doc.name(next) == self.doc.name(instance)
        {
            self.doc.set_attribute(next, &last_used_name, &last_used);
        }
    }

    /// The closest ancestor-or-self of `node` that is a repeat instance, with its index
    /// among every instance of its path.
    pub(crate) fn closest_repeat(&self, node: NodeId) -> (Option<String>, Option<usize>) {
        let mut current = Some(node);
        while let Some(element) = current {
            if !self.doc.is_element(element) || self.doc.local_name(element) == Some("instance") {
                break;
            }
            let name = self.doc.name(element);
            let in_series = [
                self.doc.previous_element_sibling(element),
                self.doc.next_element_sibling(element),
            ]
            .into_iter()
            .flatten()
            .any(|sibling| self.doc.name(sibling) == name);
            if let Some(path) = get_xpath(&self.doc, element, "instance", false)
                && (in_series || self.is_repeat_path(&path))
            {
                let index = self
                    .select_nodes(&path)
                    .ok()
                    .and_then(|nodes| nodes.iter().position(|&n| n == element));
                return (Some(path), index);
            }
            current = self.doc.parent(element);
        }
        (None, None)
    }

    /// Removes an element and reports it, handing over the series' ordinal bookkeeping.
    pub(crate) fn remove_element(&mut self, element: NodeId) {
        let (repeat_path, repeat_index) = self.closest_repeat(element);
        let detail = crate::events::UpdateDetail {
            nodes: self.doc.name(element).into_iter().map(str::to_string).collect(),
            repeat_path,
            repeat_index,
        };
        if self.config.repeat_ordinals {
            self.hand_over_ordinal(element);
        }
        self.remove_node(element);
        self.events.push(crate::events::ModelEvent::NodeRemoved(detail));
    }

    /// Series index of the series of `path` that lives under `parent`, anchoring the
    /// existing series of `path` first if needed.
    pub(crate) fn series_index_under(&mut self, path: &str, parent: NodeId) -> Option<usize> {
        if let Some(index) = self.anchors.series_index(&self.doc, path, parent) {
            return Some(index);
        }
        self.register_series(path);
        self.anchors.series_index(&self.doc, path, parent)
    }

    /// True for an element of a record that only holds the place of a deleted repeat
    /// instance: it has no content while its template does.
    pub(crate) fn is_placeholder(&self, record: &Document, node: NodeId, path: &str) -> bool {
        record.children(node).is_empty()
            && record.attributes(node).is_empty()
            && self.templates.get(path).is_some_and(Template::is_group)
    }

    /// The same-name index of `node` and its record path, as used to match repeat data.
    pub(crate) fn record_position(record: &Document, node: NodeId) -> Option<(String, usize)> {
        let path = get_xpath(record, node, "instance", false)?;
        Some((path, repeat_index(record, node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelSource};

    const FORM: &str = r#"<model xmlns:jr="http://openrosa.org/javarosa"><instance><data id="f"><rep jr:template=""><x>tx</x><sub jr:template=""><y>ty</y></sub></rep><rep><x>1</x><sub><y>a</y></sub></rep><rep><x>2</x></rep><after/><meta><instanceID>uuid:1</instanceID></meta></data></instance></model>"#;

    fn load(config: ModelConfig) -> DataModel {
        let mut model = DataModel::new(ModelSource::new(FORM), config);
        assert!(model.init().is_empty());
        model
    }

    fn texts(model: &DataModel, nodes: &[NodeId]) -> Vec<String> {
        nodes.iter().map(|&n| model.document().text(n)).collect()
    }

    #[test]
    fn test_templates_are_extracted() {
        let model = load(ModelConfig::default());
        let template = model.template("/data/rep").unwrap();
        assert_eq!(template.to_xml().unwrap(), "<rep><x>tx</x></rep>");
        let nested = model.template("/data/rep/sub").unwrap();
        assert_eq!(nested.to_xml().unwrap(), "<sub><y>ty</y></sub>");
        let series = model.get_repeat_series("/data/rep", 0);
        assert_eq!(texts(&model, &series), vec!["1a", "2"]);
    }

    #[test]
    fn test_add_repeat_appends_after_last_member() {
        let mut model = load(ModelConfig::default());
        let added = model.add_repeat("/data/rep", 0, false).unwrap();
        let series = model.get_repeat_series("/data/rep", 0);
        assert_eq!(series.len(), 3);
        assert_eq!(series[2], added);
        assert_eq!(model.document().text(added), "tx");
        let next = model.document().next_element_sibling(added).unwrap();
        assert_eq!(model.document().name(next), Some("after"));
    }

    #[test]
    fn test_nested_series_in_new_instance() {
        let mut model = load(ModelConfig::default());
        let added = model.add_repeat("/data/rep", 0, false).unwrap();
        // rep[2] never had a sub series, so the new instance holds the second one. It starts
        // empty but still has an insertion point.
        assert!(model.get_repeat_series("/data/rep/sub", 1).is_empty());
        let sub = model.add_repeat("/data/rep/sub", 1, false).unwrap();
        assert_eq!(model.document().parent(sub), Some(added));
        assert_eq!(model.document().text(sub), "ty");
        assert_eq!(model.get_repeat_series("/data/rep/sub", 0).len(), 1);
    }

    #[test]
    fn test_remove_then_add_keeps_position() {
        let mut model = load(ModelConfig::default());
        assert!(model.remove_repeat("/data/rep", 0, 0));
        assert!(model.remove_repeat("/data/rep", 0, 0));
        assert!(!model.remove_repeat("/data/rep", 0, 0));
        assert!(model.get_repeat_series("/data/rep", 0).is_empty());
        let added = model.add_repeat("/data/rep", 0, true).unwrap();
        assert_eq!(model.document().text(added), "");
        let next = model.document().next_element_sibling(added).unwrap();
        assert_eq!(model.document().name(next), Some("after"));
        assert_eq!(model.get_repeat_series("/data/rep", 0), vec![added]);
    }

    #[test]
    fn test_ordinals() {
        let mut model = load(ModelConfig::default().with_repeat_ordinals(true));
        model.remove_repeat("/data/rep", 0, 0);
        model.remove_repeat("/data/rep", 0, 0);
        let first = model.add_repeat("/data/rep", 0, false).unwrap();
        let second = model.add_repeat("/data/rep", 0, false).unwrap();
        let doc = model.document();
        assert_eq!(doc.attribute(first, "enk:ordinal"), Some("1"));
        assert_eq!(doc.attribute(second, "enk:ordinal"), Some("2"));
        assert_eq!(doc.attribute(first, "enk:last-used-ordinal"), Some("2"));
        assert_eq!(doc.attribute(second, "enk:last-used-ordinal"), None);

        assert!(model.remove_repeat("/data/rep", 0, 0));
        let remaining = model.get_repeat_series("/data/rep", 0);
        assert_eq!(
            model.document().attribute(remaining[0], "enk:last-used-ordinal"),
            Some("2")
        );
        let third = model.add_repeat("/data/rep", 0, false).unwrap();
        assert_eq!(model.document().attribute(third, "enk:ordinal"), Some("3"));
    }

    #[test]
    fn test_fake_template_is_blank() {
        let mut model = DataModel::new(
            ModelSource::new(
                "<model><instance><data><g><v>5</v></g><g><v>6</v></g><meta><instanceID/></meta></data></instance></model>",
            ),
            ModelConfig::default(),
        );
        model.init();
        let added = model.add_repeat("/data/g", 0, false).unwrap();
        assert_eq!(model.document().text(added), "");
        assert_eq!(model.template("/data/g").unwrap().to_xml().unwrap(), "<g><v/></g>");
        assert_eq!(model.get_repeat_series("/data/g", 0).len(), 3);
    }

    #[test]
    fn test_unknown_repeat_is_noop() {
        let mut model = load(ModelConfig::default());
        assert_eq!(model.add_repeat("/data/missing", 0, false), None);
        assert_eq!(model.add_repeat("/data/rep", 5, false), None);
    }
}
