#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStage {
    #[default]
    Planning,
    Running,
    Finished,
}

/// Progress message sent from a processing thread to whoever drives the UI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub stage: RunStage,
    pub fingerprint: Option<u64>,
    pub message: String,
}

impl RunStatus {
    pub fn new(stage: RunStage, fingerprint: Option<u64>, message: &str) -> Self {
        Self {
            stage,
            fingerprint,
            message: message.to_string(),
        }
    }
}
