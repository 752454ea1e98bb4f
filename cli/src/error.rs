use thiserror::Error;

/// Failures of the submit → poll → present workflow that reach the user.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to start generation: {0}")]
    Submission(String),
    #[error("generation failed on server")]
    TaskFailed(String),
    #[error("could not read generation result: {0}")]
    ResultParse(String),
    #[error("generation did not finish after {attempts} status checks")]
    PollTimeout { attempts: u32 },
}

impl WorkflowError {
    /// Server-side detail for `TaskFailed`, if the service gave one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::TaskFailed(reason) if !reason.is_empty() => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_failure_message_stays_generic() {
        let err = WorkflowError::TaskFailed("CUDA out of memory".into());
        assert_eq!(err.to_string(), "generation failed on server");
        assert_eq!(err.detail(), Some("CUDA out of memory"));
        assert_eq!(WorkflowError::TaskFailed(String::new()).detail(), None);
    }

    #[test]
    fn timeout_names_attempt_count() {
        let err = WorkflowError::PollTimeout { attempts: 3 };
        assert!(err.to_string().contains("3 status checks"));
    }
}
