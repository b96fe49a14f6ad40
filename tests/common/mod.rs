#![allow(dead_code)]

pub mod forms;

use xform::{DataModel, LoadError, ModelConfig, ModelSource, NodeId, ResultKind};

/// Loads a model, failing the test on any load error.
pub fn load(source: ModelSource, config: ModelConfig) -> DataModel {
    let mut model = DataModel::new(source, config);
    let errors = model.init();
    assert!(errors.is_empty(), "unexpected load errors: {errors:?}");
    model
}

pub fn load_with_errors(source: ModelSource, config: ModelConfig) -> (DataModel, Vec<LoadError>) {
    let mut model = DataModel::new(source, config);
    let errors = model.init();
    (model, errors)
}

/// Evaluates to a string without a context selector.
pub fn eval(model: &DataModel, expr: &str) -> String {
    model
        .evaluate(expr, ResultKind::String, None, 0, true)
        .unwrap_or_else(|e| panic!("evaluating {expr}: {e}"))
        .to_string()
}

/// Evaluates to a string with the `index`-th node of `selector` as context.
pub fn eval_at(model: &DataModel, expr: &str, selector: &str, index: usize) -> String {
    model
        .evaluate(expr, ResultKind::String, Some(selector), index, true)
        .unwrap_or_else(|e| panic!("evaluating {expr} at {selector}[{index}]: {e}"))
        .to_string()
}

/// Text values of the given nodes.
pub fn texts(model: &DataModel, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|&node| model.document().text(node)).collect()
}
