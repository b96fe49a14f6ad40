//! The `xform` command: loads a form model, applies value writes, evaluates expressions and
//! prints the resulting record.
use crate::error::XformError;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use xform_model::{
    BugCompliance, DataModel, DataType, LoadError, ModelConfig, ModelSource, NodeFilter,
    ResultKind, Value,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load an XForms model, evaluate expressions and print the record", long_about = None)]
pub struct Args {
    /// Model XML file
    pub model: PathBuf,

    /// Saved record to merge into the primary instance
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// External secondary instance data, as id=path
    #[arg(long = "external", value_parser = parse_pair)]
    pub external: Vec<(String, String)>,

    /// Session property, as key=value
    #[arg(long = "session", value_parser = parse_pair)]
    pub session: Vec<(String, String)>,

    /// JSON file holding a model configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number new repeat instances
    #[arg(long, default_value_t = false)]
    pub ordinals: bool,

    /// The record was submitted before
    #[arg(long, default_value_t = false)]
    pub submitted: bool,

    /// auto, always or never
    #[arg(long, value_parser = parse_bug_compliance)]
    pub bug_compliance: Option<BugCompliance>,

    /// Value write, as selector=value. Applied in order before evaluating.
    #[arg(long = "set", value_parser = parse_pair)]
    pub set: Vec<(String, String)>,

    /// Expression to evaluate
    #[arg(long = "expr")]
    pub expr: Vec<String>,

    /// Selector of the context node for --expr
    #[arg(long)]
    pub context: Option<String>,

    /// Index into the nodes selected by --context
    #[arg(long, default_value_t = 0)]
    pub index: usize,

    /// Result type: any, string, number, boolean, node or nodes
    #[arg(long, default_value = "string", value_parser = parse_kind)]
    pub kind: ResultKind,
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", value))
}

fn parse_bug_compliance(value: &str) -> Result<BugCompliance, String> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("expected auto, always or never, got '{}'", value))
}

fn parse_kind(value: &str) -> Result<ResultKind, String> {
    ResultKind::from_name(value).ok_or_else(|| format!("unknown result type '{}'", value))
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct Report {
    pub load_errors: Vec<LoadError>,
    /// Each expression with its rendered value or error message.
    pub results: Vec<(String, Result<String, String>)>,
    /// The serialized primary instance, if the model loaded far enough to have one.
    pub record: Option<String>,
}

fn render(model: &DataModel, value: Value) -> String {
    let doc = model.document();
    match value {
        Value::Node(node) => node.map(|node| doc.text(node)).unwrap_or_default(),
        Value::Nodes(nodes) => nodes
            .into_iter()
            .map(|node| doc.text(node))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn load_config(args: &Args) -> Result<ModelConfig, XformError> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ModelConfig::default(),
    };
    if args.ordinals {
        config.repeat_ordinals = true;
    }
    if args.submitted {
        config.submitted = true;
    }
    if let Some(mode) = args.bug_compliance {
        config.bug_compliance = mode;
    }
    Ok(config)
}

pub fn run(args: &Args) -> Result<Report, XformError> {
    let config = load_config(args)?;
    let mut source = ModelSource::new(fs::read_to_string(&args.model)?);
    if let Some(record) = &args.record {
        source = source.with_record(fs::read_to_string(record)?);
    }
    for (id, path) in &args.external {
        source = source.with_external(id, fs::read_to_string(path)?);
    }
    for (key, value) in &args.session {
        source = source.with_session(key, value);
    }

    let mut model = DataModel::new(source, config);
    let load_errors = model.init();
    if load_errors
        .iter()
        .any(|error| matches!(error, LoadError::MalformedModel(_)))
    {
        return Ok(Report {
            load_errors,
            ..Default::default()
        });
    }

    for (selector, value) in &args.set {
        let outcome = model
            .node(Some(selector), None, NodeFilter::default())
            .set_val(value, DataType::String)?;
        log::info!("Set {}: {:?}", selector, outcome);
    }
    if args.set.is_empty() && args.expr.is_empty() {
        log::debug!("Nothing to evaluate");
    }

    let results = args
        .expr
        .iter()
        .map(|expr| {
            let result = model
                .evaluate(expr, args.kind, args.context.as_deref(), args.index, true)
                .map(|value| render(&model, value))
                .map_err(|e| e.to_string());
            (expr.clone(), result)
        })
        .collect();

    let record = match model.get_str() {
        Ok(record) => Some(record),
        Err(e) => {
            log::error!("Could not serialize the record: {}", e);
            None
        }
    };
    Ok(Report {
        load_errors,
        results,
        record,
    })
}
