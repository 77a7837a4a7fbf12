//! Point-in-time snapshot of a Job and the pods matched to it.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// A cluster-observed Job with the Pods that belong to it.
///
/// Read-only: rebuilt fresh on every query, never diffed against an
/// earlier snapshot.
#[derive(Debug, Clone)]
pub struct ObservedJob {
    job: Job,
    pods: Vec<Pod>,
}

impl ObservedJob {
    pub(crate) fn new(job: Job) -> Self {
        Self {
            job,
            pods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.job.metadata.name.as_deref().unwrap_or("")
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn first_pod(&self) -> Option<&Pod> {
        self.pods.first()
    }

    pub fn has_pods(&self) -> bool {
        !self.pods.is_empty()
    }

    pub(crate) fn add_pod(&mut self, pod: Pod) {
        self.pods.push(pod);
    }

    /// The Job's equality selector. A pod whose labels contain every pair
    /// belongs to this job.
    pub(crate) fn selector_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.job
            .spec
            .as_ref()?
            .selector
            .as_ref()?
            .match_labels
            .as_ref()
    }

    pub(crate) fn label(&self, key: &str) -> Option<&str> {
        self.job
            .metadata
            .labels
            .as_ref()?
            .get(key)
            .map(String::as_str)
    }

    /// Whether the cluster reports the job complete. Conditions are
    /// authoritative but lag behind the counters on busy clusters.
    pub fn is_succeeded(&self) -> bool {
        self.has_condition("Complete") || self.status_count(|status| status.succeeded) > 0
    }

    pub fn is_failed(&self) -> bool {
        self.has_condition("Failed") || self.status_count(|status| status.failed) > 0
    }

    fn has_condition(&self, type_: &str) -> bool {
        self.job
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == type_ && c.status == "True")
            })
    }

    fn status_count(&self, pick: impl FnOnce(&JobStatus) -> Option<i32>) -> i32 {
        self.job.status.as_ref().and_then(pick).unwrap_or(0)
    }

    pub fn start_time(&self) -> Option<&Time> {
        self.job.status.as_ref()?.start_time.as_ref()
    }

    pub fn completion_time(&self) -> Option<&Time> {
        self.job.status.as_ref()?.completion_time.as_ref()
    }

    pub(crate) fn first_pod_phase(&self) -> Option<&str> {
        self.first_pod()?.status.as_ref()?.phase.as_deref()
    }

    /// Exit code of the first container of the job's first pod, once it
    /// has terminated.
    pub(crate) fn first_pod_exit_code(&self) -> Option<i32> {
        let statuses = self
            .first_pod()?
            .status
            .as_ref()?
            .container_statuses
            .as_ref()?;
        let state = statuses.first()?.state.as_ref()?;
        Some(state.terminated.as_ref()?.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::JobCondition;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn job_with_status(status: JobStatus) -> ObservedJob {
        ObservedJob::new(Job {
            metadata: ObjectMeta {
                name: Some("task-1".to_string()),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        })
    }

    #[test]
    fn test_success_from_condition_or_counter() {
        let by_condition = job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(by_condition.is_succeeded());
        assert!(!by_condition.is_failed());

        let by_counter = job_with_status(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        assert!(by_counter.is_succeeded());

        let false_condition = job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "False".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(!false_condition.is_succeeded());
    }

    #[test]
    fn test_exit_code_of_the_first_pod() {
        let mut observed = job_with_status(JobStatus::default());
        assert_eq!(observed.first_pod_exit_code(), None);

        observed.add_pod(Pod {
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "executor".to_string(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: 3,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(observed.first_pod_exit_code(), Some(3));
        assert_eq!(observed.first_pod_phase(), Some("Succeeded"));
    }
}
