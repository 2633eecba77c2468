use thiserror::Error;

/// A failure that stops the whole orchestrator.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("transport fault: {0:#}")]
    Transport(anyhow::Error),
    #[error("device fault: {0:#}")]
    Device(anyhow::Error),
    #[error("speech synthesis fault: {0:#}")]
    Synthesis(anyhow::Error),
    #[error("input fault: {0}")]
    Input(#[from] std::io::Error),
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

/// A failure confined to a single tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("missing required argument `{0}`")]
    MissingArgument(String),
    #[error("invalid argument `{name}`: expected {expected}")]
    InvalidArgument {
        name: String,
        expected: &'static str,
    },
    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator stopped with {} fault(s): {}", .0.len(), join_faults(.0))]
    Faults(Vec<Fault>),
}

impl OrchestratorError {
    pub fn faults(&self) -> &[Fault] {
        match self {
            OrchestratorError::Faults(faults) => faults,
        }
    }
}

fn join_faults(faults: &[Fault]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_set_lists_every_fault() {
        let error = OrchestratorError::Faults(vec![
            Fault::Device(anyhow::anyhow!("microphone unplugged")),
            Fault::TaskPanicked("playback".to_string()),
        ]);

        assert_eq!(error.faults().len(), 2);
        assert_eq!(
            error.to_string(),
            "orchestrator stopped with 2 fault(s): device fault: microphone unplugged; task panicked: playback"
        );
    }
}
