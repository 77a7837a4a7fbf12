//! Task reconstruction from flat cluster listings.
//!
//! The cluster stores no link between a task and its Jobs; this module
//! re-derives it per query from the label and naming conventions the
//! write side produces.

mod assembler;
mod index;
mod observed_job;
mod query;
mod task;

use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::error::SpannedErr;

pub use self::observed_job::ObservedJob;
pub use self::query::{TaskPage, get_task, list_tasks};
pub use self::task::Task;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Task '{0}' does not exist")]
    TaskNotFound(String),

    #[error("Kubernetes client error: {0}")]
    KubeClient(#[from] SpannedErr<kube::Error>),

    #[error("The job listing contained no taskmaster")]
    TaskmasterMissing,
}

impl ExtractSpanTrace for AssemblyError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AssemblyError::TaskNotFound(_) => None,
            AssemblyError::KubeClient(e) => e.span_trace(),
            AssemblyError::TaskmasterMissing => None,
        }
    }
}
