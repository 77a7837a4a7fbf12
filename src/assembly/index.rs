//! Pod-to-job matching and job classification.
//!
//! Kubernetes stores no link from a task to its objects, so the index
//! re-derives it: pods match jobs by selector subset, jobs sort into
//! roles by the `job-type` label.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

use crate::kubernetes_objects::{JOB_TYPE_EXECUTOR, JOB_TYPE_LABEL, JOB_TYPE_TASKMASTER};

use super::observed_job::ObservedJob;

/// Role of a Job in the task graph. Filers carry no type label, so
/// anything unrecognized is a filer by elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Taskmaster,
    Executor,
    Filer,
}

pub(crate) fn classify(job: &Job) -> JobKind {
    let job_type = job
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(JOB_TYPE_LABEL));
    match job_type.map(String::as_str) {
        Some(JOB_TYPE_TASKMASTER) => JobKind::Taskmaster,
        Some(JOB_TYPE_EXECUTOR) => JobKind::Executor,
        _ => JobKind::Filer,
    }
}

/// Handle into a [`JobGraphIndex`]; only minted by `insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobId(usize);

impl JobId {
    /// Position in the insertion order, valid for `into_entries` output.
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

/// All jobs of one query, in insertion order, each accumulating the pods
/// that matched it.
#[derive(Debug, Default)]
pub(crate) struct JobGraphIndex {
    entries: Vec<ObservedJob>,
}

impl JobGraphIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, job: Job) -> JobId {
        self.entries.push(ObservedJob::new(job));
        JobId(self.entries.len() - 1)
    }

    pub(crate) fn get(&self, id: JobId) -> &ObservedJob {
        &self.entries[id.0]
    }

    /// Attaches the pod to the first job whose selector it satisfies.
    /// A pod matching nothing is dropped.
    pub(crate) fn attach_pod(&mut self, pod: Pod) {
        let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
        let owner = self
            .entries
            .iter_mut()
            .find(|entry| selector_matches(entry.selector_labels(), &pod_labels));
        if let Some(entry) = owner {
            entry.add_pod(pod);
        }
    }

    pub(crate) fn into_entries(self) -> Vec<ObservedJob> {
        self.entries
    }
}

/// Subset test: every selector pair must appear in the pod's labels. An
/// absent or empty selector matches nothing, not everything.
fn selector_matches(
    selector: Option<&BTreeMap<String, String>>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector.is_some_and(|selector| {
        !selector.is_empty()
            && selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    })
}
