use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::error::SpannedErr;
use crate::kubernetes_objects::job_handle::JobState;

use super::payload::PayloadError;

#[derive(Error, Debug)]
pub enum TaskRunError {
    #[error("Kubernetes client error: {0}")]
    KubeClient(#[from] SpannedErr<kube::Error>),

    #[error("Invalid task document: {0}")]
    Payload(#[from] PayloadError),

    #[error("Failed to encode the filer document.\n{0}")]
    EncodeFiler(#[from] serde_json::Error),

    #[error("Job '{job_name}' settled in state {state} instead of completing")]
    JobNotCompleted {
        job_name: String,
        state: JobState,
        span_trace: SpanTrace,
    },

    #[error("The task was cancelled")]
    Cancelled,
}

impl ExtractSpanTrace for TaskRunError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            TaskRunError::KubeClient(e) => e.span_trace(),
            TaskRunError::Payload(_) => None,
            TaskRunError::EncodeFiler(_) => None,
            TaskRunError::JobNotCompleted { span_trace, .. } => Some(span_trace),
            TaskRunError::Cancelled => None,
        }
    }
}
