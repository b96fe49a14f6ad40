//! The data model of one form-entry session: the instance document plus everything needed to
//! evaluate expressions against it and keep it consistent while it changes.
use crate::cache::{CacheKey, EvaluationCache};
use crate::config::{BugCompliance, ModelConfig, ModelSource};
use crate::document::{Document, NodeId, NodeKind};
use crate::error::{LoadError, ModelError};
use crate::evaluator::{DualEvaluator, ResultKind, Value};
use crate::events::ModelEvent;
use crate::nodeset::{NodeFilter, Nodeset};
use crate::path::{
    counterpart, get_xpath, has_model_root, primary_instance_root, repeat_index,
    same_element, secondary_instance,
};
use crate::repeat::{SeriesAnchors, Template};
use crate::rewriter::{self, RewriteHost, Scope};
use crate::serialize::to_xml;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const OPENROSA_NAMESPACE: &str = "http://openrosa.org/xforms";

const SESSION_INSTANCE: &str = "__session";
const SESSION_PROPERTIES: [&str; 6] = [
    "deviceid",
    "username",
    "email",
    "phonenumber",
    "simserial",
    "subscriberid",
];

pub struct DataModel {
    source: ModelSource,
    pub(crate) config: ModelConfig,
    pub(crate) doc: Document,
    /// Every prefixed namespace seen in the model or a merged record.
    pub(crate) namespaces: BTreeMap<String, String>,
    pub(crate) templates: HashMap<String, Template>,
    pub(crate) anchors: SeriesAnchors,
    pub(crate) events: Vec<ModelEvent>,
    cache: EvaluationCache,
    evaluator: DualEvaluator,
}

fn is_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

fn is_template_attribute(name: &str) -> bool {
    name.rsplit(':').next() == Some("template")
}

fn collect_namespaces(doc: &Document, namespaces: &mut BTreeMap<String, String>) {
    let Some(root) = doc.document_element() else {
        return;
    };
    for element in std::iter::once(root).chain(doc.descendant_elements(root)) {
        for &attr in doc.attributes(element) {
            if let NodeKind::Attribute { name, value } = doc.kind(attr)
                && let Some(prefix) = name.strip_prefix("xmlns:")
            {
                namespaces
                    .entry(prefix.to_string())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

impl DataModel {
    /// Creates an unloaded model. Call [`DataModel::init`] before using it.
    pub fn new(source: ModelSource, config: ModelConfig) -> Self {
        DataModel {
            source,
            config,
            doc: Document::new(),
            namespaces: BTreeMap::new(),
            templates: HashMap::new(),
            anchors: SeriesAnchors::default(),
            events: Vec::new(),
            cache: EvaluationCache::new(),
            evaluator: DualEvaluator::new(),
        }
    }

    /// Replaces the evaluator, e.g. to plug in a different host implementation.
    pub fn with_evaluator(mut self, evaluator: DualEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Parses the model, fills external and session instances, extracts repeat templates,
    /// merges the record and settles the instance id. Problems are collected and returned;
    /// loading carries on past everything except an unparseable model.
    pub fn init(&mut self) -> Vec<LoadError> {
        let mut errors = Vec::new();
        self.doc = match Document::parse(&self.source.model) {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("Failed to parse model: {}", e);
                errors.push(LoadError::MalformedModel(e.to_string()));
                return errors;
            }
        };
        self.namespaces.clear();
        self.templates.clear();
        self.anchors = SeriesAnchors::default();
        self.cache = EvaluationCache::new();
        collect_namespaces(&self.doc, &mut self.namespaces);

        self.load_external_instances(&mut errors);
        self.add_session_instance();
        self.extract_templates();

        if let Some(record) = self.source.record.clone() {
            match self.merge_xml(&record) {
                Ok(()) => {
                    if self.config.submitted {
                        self.rotate_instance_id();
                    }
                }
                Err(e) => {
                    log::error!("Failed to merge record: {}", e);
                    errors.push(match e {
                        ModelError::MalformedXml(e) => LoadError::MalformedRecord(e.to_string()),
                        other => LoadError::Merge(other.to_string()),
                    });
                }
            }
        }

        match self.meta_element("instanceID") {
            Some(instance_id) => {
                if self.doc.text(instance_id).is_empty() {
                    let id = format!("uuid:{}", uuid::Uuid::new_v4());
                    self.doc.set_text(instance_id, &id);
                }
            }
            None => errors.push(LoadError::MissingInstanceId),
        }

        self.events.clear();
        for error in &errors {
            log::warn!("Load error: {}", error);
        }
        errors
    }

    fn load_external_instances(&mut self, errors: &mut Vec<LoadError>) {
        let external = self.source.external.clone();
        for instance in &external {
            let Some(target) = secondary_instance(&self.doc, &instance.id) else {
                log::warn!("External data supplied for unknown instance \"{}\"", instance.id);
                continue;
            };
            if instance.xml.trim().is_empty() {
                errors.push(LoadError::EmptyExternalInstance(instance.id.clone()));
                continue;
            }
            let data = match Document::parse(&instance.xml) {
                Ok(data) => data,
                Err(e) => {
                    errors.push(LoadError::MalformedExternalInstance {
                        id: instance.id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(root) = data.document_element() else {
                errors.push(LoadError::EmptyExternalInstance(instance.id.clone()));
                continue;
            };
            for child in self.doc.children(target).to_vec() {
                self.doc.detach(child);
            }
            let (copy, _) = self.doc.import(&data, root);
            self.doc.append_child(target, copy);
            collect_namespaces(&data, &mut self.namespaces);
            log::debug!("Loaded external instance \"{}\"", instance.id);
        }

        let Some(model) = self.doc.document_element().filter(|_| has_model_root(&self.doc)) else {
            return;
        };
        for instance in self.doc.element_children(model) {
            if self.doc.local_name(instance) != Some("instance")
                || self.doc.attribute(instance, "src").is_none()
                || self.doc.has_element_children(instance)
            {
                continue;
            }
            let id = self.doc.attribute(instance, "id").unwrap_or_default();
            if !external.iter().any(|supplied| supplied.id == id) {
                errors.push(LoadError::MissingExternalInstance(id.to_string()));
            }
        }
    }

    /// Exposes the session properties as `instance('__session')/session/context/*`.
    fn add_session_instance(&mut self) {
        let Some(model) = self.doc.document_element().filter(|_| has_model_root(&self.doc)) else {
            return;
        };
        if secondary_instance(&self.doc, SESSION_INSTANCE).is_some() {
            return;
        }
        let session = &self.source.session;
        let mut properties: Vec<(String, String)> = SESSION_PROPERTIES
            .iter()
            .map(|&key| {
                let value = session.get(key).cloned().unwrap_or_default();
                (key.to_string(), value)
            })
            .collect();
        properties.extend(
            session
                .iter()
                .filter(|(key, _)| !SESSION_PROPERTIES.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        let instance = self.doc.create_element("instance");
        self.doc.set_attribute(instance, "id", SESSION_INSTANCE);
        let root = self.doc.create_element("session");
        let context = self.doc.create_element("context");
        for (key, value) in properties {
            let property = self.doc.create_element(&key);
            self.doc.set_text(property, &value);
            self.doc.append_child(context, property);
        }
        self.doc.append_child(root, context);
        self.doc.append_child(instance, root);
        self.doc.append_child(model, instance);
    }

    fn is_openrosa(&self, element: NodeId) -> bool {
        let prefix = self
            .doc
            .name(element)
            .and_then(|name| name.split_once(':'))
            .map(|(prefix, _)| prefix);
        self.doc.lookup_namespace(element, prefix) == Some(OPENROSA_NAMESPACE)
    }

    /// `orx:meta/orx:<name>` under the primary instance root, or else `meta/<name>`.
    fn meta_element(&self, name: &str) -> Option<NodeId> {
        let root = self.primary_root()?;
        let find = |parent: NodeId, local: &str, openrosa: bool| {
            self.doc.element_children(parent).find(|&child| {
                self.doc.local_name(child) == Some(local)
                    && if openrosa {
                        self.is_openrosa(child)
                    } else {
                        self.doc.name(child) == Some(local)
                    }
            })
        };
        [true, false].into_iter().find_map(|openrosa| {
            let meta = find(root, "meta", openrosa)?;
            find(meta, name, openrosa)
        })
    }

    /// Moves the current instanceID into deprecatedID, creating that node when needed, and
    /// empties instanceID.
    fn rotate_instance_id(&mut self) {
        let Some(instance_id) = self.meta_element("instanceID") else {
            return;
        };
        let previous = self.doc.text(instance_id);
        self.doc.set_text(instance_id, "");
        let deprecated = match self.meta_element("deprecatedID") {
            Some(node) => node,
            None => {
                let name = self
                    .doc
                    .name(instance_id)
                    .and_then(|name| name.strip_suffix("instanceID"))
                    .map_or_else(
                        || "deprecatedID".to_string(),
                        |prefix| format!("{}deprecatedID", prefix),
                    );
                let node = self.doc.create_element(&name);
                if let Some(meta) = self.doc.parent(instance_id) {
                    self.doc.append_child(meta, node);
                }
                node
            }
        };
        self.doc.set_text(deprecated, &previous);
        log::debug!("Deprecated instance id {}", previous);
    }

    /// Merges a saved record into the primary instance. Repeat instances the record needs
    /// are created from their templates first, surplus default instances are dropped, and
    /// then values are copied by element name and same-name position.
    pub fn merge_xml(&mut self, record: &str) -> Result<(), ModelError> {
        let target = self.primary_root().ok_or(ModelError::CorruptModel)?;
        let mut record_doc = Document::parse(record)?;
        let Some(record_root) = record_doc.document_element() else {
            return Ok(());
        };
        let tagged: Vec<NodeId> = record_doc
            .descendant_elements(record_root)
            .into_iter()
            .filter(|&element| record_doc.attribute_by_local_name(element, "template").is_some())
            .collect();
        for element in tagged {
            record_doc.detach(element);
        }
        collect_namespaces(&record_doc, &mut self.namespaces);

        self.create_repeats(&record_doc, record_root, target);
        self.prune_repeats(&record_doc, record_root, target);
        self.merge_element(&record_doc, record_root, target, true);
        Ok(())
    }

    /// Makes sure every repeat instance in the record has a counterpart at the same
    /// position. Missing positions before it are filled with template defaults.
    fn create_repeats(&mut self, record: &Document, record_root: NodeId, target: NodeId) {
        for node in record.descendant_elements(record_root) {
            let Some((path, index)) = Self::record_position(record, node) else {
                continue;
            };
            if !(self.templates.contains_key(&path) || index > 0)
                || self.is_placeholder(record, node, &path)
            {
                continue;
            }
            let Some(parent) = record
                .parent(node)
                .and_then(|parent| counterpart(record, record_root, parent, &self.doc, target))
            else {
                log::warn!("No place in the model for record data at {}", path);
                continue;
            };
            if !self.templates.contains_key(&path) {
                self.extract_fake_templates(&[path.as_str()]);
            }
            let Some(series_index) = self.series_index_under(&path, parent) else {
                log::warn!("No repeat series for {} in the model", path);
                continue;
            };
            let mut count = self.get_repeat_series(&path, series_index).len();
            while count < index {
                if self.add_repeat(&path, series_index, false).is_none() {
                    break;
                }
                count += 1;
            }
            if count == index {
                self.add_repeat(&path, series_index, true);
            }
        }
    }

    /// Removes default repeat instances beyond the number the record holds in the same
    /// container.
    fn prune_repeats(&mut self, record: &Document, record_root: NodeId, target: NodeId) {
        let paths: BTreeSet<String> = self
            .templates
            .keys()
            .cloned()
            .chain(self.anchors.paths())
            .collect();
        for path in paths {
            let name = path.rsplit('/').next().unwrap_or_default().to_string();
            let mut series_index = 0;
            loop {
                let anchors = self.anchors.live(&self.doc, &path);
                let Some(anchor) = anchors.get(series_index) else {
                    break;
                };
                let parent = anchor.parent;
                let series = self.anchors.members(&self.doc, anchor);
                series_index += 1;
                if !self.doc.contains(target, parent) {
                    continue;
                }
                let Some(record_parent) = counterpart(&self.doc, target, parent, record, record_root)
                else {
                    continue;
                };
                let expected = record
                    .element_children(record_parent)
                    .filter(|&child| record.name(child) == Some(name.as_str()))
                    .count();
                for &surplus in series.iter().skip(expected) {
                    log::debug!("Removing default repeat instance of {} absent from record", path);
                    self.remove_node(surplus);
                }
            }
        }
    }

    fn merge_element(&mut self, record: &Document, source: NodeId, target: NodeId, is_root: bool) {
        if !is_root {
            for &attr in record.attributes(source) {
                if let NodeKind::Attribute { name, value } = record.kind(attr)
                    && !is_declaration(name)
                    && !is_template_attribute(name)
                {
                    self.doc.set_attribute(target, name, value);
                }
            }
        }
        if !record.has_element_children(source) {
            if !self.doc.has_element_children(target) {
                self.doc.set_text(target, &record.text(source));
            }
            return;
        }
        let children: Vec<NodeId> = record.element_children(source).collect();
        for child in children {
            let index = repeat_index(record, child);
            let path = get_xpath(record, child, "instance", false).unwrap_or_default();
            if self.is_placeholder(record, child, &path) {
                continue;
            }
            let existing = self
                .doc
                .element_children(target)
                .filter(|&candidate| same_element(record, child, &self.doc, candidate))
                .nth(index);
            match existing {
                Some(existing) => self.merge_element(record, child, existing, false),
                None => {
                    let (copy, _) = self.doc.import(record, child);
                    self.doc.append_child(target, copy);
                    log::debug!("Copied record-only node {}", path);
                }
            }
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub(crate) fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Root element of the primary instance.
    pub fn primary_root(&self) -> Option<NodeId> {
        primary_instance_root(&self.doc)
    }

    /// Evaluates an expression. With a selector, the context is the `index`-th node it
    /// selects; otherwise it is the primary instance root. The host evaluator is tried first
    /// when `allow_host` is set.
    pub fn evaluate(
        &self,
        expression: &str,
        kind: ResultKind,
        selector: Option<&str>,
        index: usize,
        allow_host: bool,
    ) -> Result<Value, ModelError> {
        let (context, repeats) = match selector {
            Some(selector) => {
                let nodes = self.select_nodes(selector)?;
                let context = nodes.get(index).copied().ok_or_else(|| {
                    ModelError::logic(
                        expression,
                        format!("context node not found at index {} of {}", index, selector),
                    )
                })?;
                (context, Some(nodes.len()))
            }
            None => (self.primary_root().unwrap_or(self.doc.root()), None),
        };

        let key = CacheKey {
            expression: expression.to_string(),
            selector: selector.map(str::to_string),
            index,
            repeats,
        };
        let rewritten = match self.cache.get(&key) {
            Some(rewritten) => rewritten,
            None => {
                self.cache.record_rewrite();
                let scope = Scope {
                    selector,
                    index,
                    context,
                };
                let rewritten = rewriter::rewrite(self, expression, &scope)?;
                if rewritten.cacheable {
                    self.cache.insert(key, rewritten.expression.clone());
                }
                rewritten.expression
            }
        };
        self.evaluator
            .evaluate(&self.doc, &rewritten, context, kind, allow_host)
    }

    /// The nodes a selector resolves to, in document order.
    pub fn select_nodes(&self, selector: &str) -> Result<Vec<NodeId>, ModelError> {
        self.evaluate(selector, ResultKind::Nodes, None, 0, true)
            .map(Value::into_nodes)
    }

    /// How many times an expression went through the rewriter instead of the cache.
    pub fn rewrite_count(&self) -> usize {
        self.cache.rewrite_count()
    }

    pub fn node(
        &mut self,
        selector: Option<&str>,
        index: Option<usize>,
        filter: NodeFilter,
    ) -> Nodeset<'_> {
        Nodeset::new(self, selector, index, filter)
    }

    /// A handle on a meta field such as `instanceID`.
    pub fn get_meta_node(&mut self, name: &str) -> Nodeset<'_> {
        let selector = self
            .meta_element(name)
            .and_then(|element| get_xpath(&self.doc, element, "instance", true))
            .unwrap_or_else(|| format!("/*/meta/{}", name));
        Nodeset::new(self, Some(&selector), None, NodeFilter::default())
    }

    pub fn instance_id(&self) -> Option<String> {
        self.meta_element("instanceID")
            .map(|element| self.doc.text(element))
    }

    /// The primary instance as XML, with used namespaces declared on its root.
    pub fn get_str(&self) -> Result<String, ModelError> {
        let root = self.primary_root().ok_or(ModelError::CorruptModel)?;
        to_xml(&self.doc, root, &self.namespaces)
    }

    pub(crate) fn push_event(&mut self, event: ModelEvent) {
        self.events.push(event);
    }

    /// Takes the notifications raised since the last call.
    pub fn drain_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    fn declares_xforms_version(&self) -> bool {
        self.doc.document_element().is_some_and(|element| {
            self.doc
                .attribute_by_local_name(element, "xforms-version")
                .is_some()
        })
    }
}

impl RewriteHost for DataModel {
    fn document(&self) -> &Document {
        &self.doc
    }

    fn primary_root(&self) -> Option<NodeId> {
        primary_instance_root(&self.doc)
    }

    fn evaluate_in_scope(
        &self,
        expression: &str,
        kind: ResultKind,
        scope: &Scope<'_>,
    ) -> Result<Value, ModelError> {
        self.evaluate(expression, kind, scope.selector, scope.index, true)
    }

    fn shifts_root(&self) -> bool {
        has_model_root(&self.doc)
    }

    fn bug_compliance(&self) -> bool {
        match self.config.bug_compliance {
            BugCompliance::Always => true,
            BugCompliance::Never => false,
            BugCompliance::Auto => !self.declares_xforms_version(),
        }
    }
}
