//! Cooperative cancellation through the downward-API labels file.
//!
//! The control plane cancels a task by patching `task-status=Cancelled`
//! onto the taskmaster pod. Kubelet rewrites the mounted labels file and
//! the run loop reads it between polls, so latency is bounded by the poll
//! interval.

use std::path::PathBuf;

use crate::kubernetes_objects::TASK_STATUS_CANCELLED;

#[derive(Debug, Clone)]
pub(crate) struct CancellationSignal {
    labels_file: PathBuf,
}

impl CancellationSignal {
    pub(crate) fn new(labels_file: PathBuf) -> Self {
        Self { labels_file }
    }

    /// True once the labels file names the cancelled status. A missing or
    /// unreadable file reads as not cancelled: the file only appears once
    /// the pod has labels at all.
    pub(crate) fn is_cancelled(&self) -> bool {
        match std::fs::read_to_string(&self.labels_file) {
            Ok(contents) => labels_file_signals_cancel(&contents),
            Err(_) => false,
        }
    }
}

fn labels_file_signals_cancel(contents: &str) -> bool {
    // Downward-API files quote label values: task-status="Cancelled".
    // The value alone signals; the label carrying it is not inspected.
    let cancelled = format!("\"{TASK_STATUS_CANCELLED}\"");
    contents.lines().any(|line| {
        line.split_once('=')
            .is_some_and(|(_, value)| value.trim() == cancelled)
    })
}
