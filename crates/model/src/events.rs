/// Mutations observable by the host. Hosts re-run relevance, calculations and validation
/// in response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    DataUpdated(UpdateDetail),
    NodeRemoved(UpdateDetail),
}

/// What changed. `repeat_path` and `repeat_index` are set when the change happened inside
/// a repeat instance; the index counts instances of that path across the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDetail {
    pub nodes: Vec<String>,
    pub repeat_path: Option<String>,
    pub repeat_index: Option<usize>,
}

impl ModelEvent {
    pub fn detail(&self) -> &UpdateDetail {
        match self {
            ModelEvent::DataUpdated(detail) | ModelEvent::NodeRemoved(detail) => detail,
        }
    }
}
