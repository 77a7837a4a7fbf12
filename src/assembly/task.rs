//! The reassembled task composite.

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::kubernetes_objects::{
    EXECUTOR_NO_LABEL, TASK_STATUS_CANCELLED, TASK_STATUS_LABEL, executor_index_of,
};
use crate::tes::TesState;

use super::observed_job::ObservedJob;

/// One task as observed on the cluster: the taskmaster, its executors in
/// index order, and the outputs filer when one exists.
#[derive(Debug, Clone)]
pub struct Task {
    taskmaster: ObservedJob,
    executors: Vec<ObservedJob>,
    output_filer: Option<ObservedJob>,
}

impl Task {
    /// Executors are unique by name; duplicates from overlapping list
    /// calls collapse to the first occurrence. Order comes from the index
    /// embedded in the executor name, not from arrival order; a name
    /// without a parseable index falls back to the `executor-no` label
    /// and otherwise sorts last rather than failing the render.
    pub(crate) fn new(
        taskmaster: ObservedJob,
        executors: Vec<ObservedJob>,
        output_filer: Option<ObservedJob>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut executors: Vec<ObservedJob> = executors
            .into_iter()
            .filter(|executor| seen.insert(executor.name().to_string()))
            .collect();
        executors.sort_by_key(executor_position);
        Self {
            taskmaster,
            executors,
            output_filer,
        }
    }

    /// The taskmaster's name doubles as the task id.
    pub fn id(&self) -> &str {
        self.taskmaster.name()
    }

    pub fn taskmaster(&self) -> &ObservedJob {
        &self.taskmaster
    }

    pub fn executors(&self) -> &[ObservedJob] {
        &self.executors
    }

    pub fn output_filer(&self) -> Option<&ObservedJob> {
        self.output_filer.as_ref()
    }

    /// TES state of the whole composite.
    ///
    /// Order matters: a cancelled task also has failed jobs, and a failed
    /// executor also fails its taskmaster, so the more specific causes are
    /// checked first.
    pub fn derive_state(&self) -> TesState {
        if self.cancel_requested() {
            return TesState::Canceled;
        }
        if self.executors.iter().any(ObservedJob::is_failed) {
            return TesState::ExecutorError;
        }
        if self
            .output_filer
            .as_ref()
            .is_some_and(ObservedJob::is_failed)
        {
            return TesState::SystemError;
        }
        if self.taskmaster.is_failed() {
            return TesState::SystemError;
        }
        if self.taskmaster.is_succeeded() {
            return TesState::Complete;
        }
        if self.executors.is_empty() {
            // Nothing has run yet; the taskmaster pod tells queued from
            // initializing.
            return match self.taskmaster.first_pod_phase() {
                None | Some("Pending") => TesState::Queued,
                _ => TesState::Initializing,
            };
        }
        TesState::Running
    }

    fn cancel_requested(&self) -> bool {
        marked_cancelled(self.taskmaster.job().metadata.labels.as_ref())
            || self
                .taskmaster
                .pods()
                .iter()
                .any(|pod| marked_cancelled(pod.metadata.labels.as_ref()))
    }
}

fn marked_cancelled(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels.is_some_and(|labels| {
        labels.get(TASK_STATUS_LABEL).map(String::as_str) == Some(TASK_STATUS_CANCELLED)
    })
}

fn executor_position(executor: &ObservedJob) -> u32 {
    let by_name = executor_index_of(executor.name());
    if by_name != u32::MAX {
        return by_name;
    }
    executor
        .label(EXECUTOR_NO_LABEL)
        .and_then(|position| position.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn observed(name: &str) -> ObservedJob {
        ObservedJob::new(Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn observed_with_condition(name: &str, condition: &str) -> ObservedJob {
        ObservedJob::new(Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: condition.to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn running_pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_executors_sort_by_embedded_index() {
        let task = Task::new(
            observed("task-1"),
            vec![
                observed("task-1-ex-01"),
                observed("weird-name"),
                observed("task-1-ex-00"),
                observed("task-1-ex-01"),
            ],
            None,
        );
        let names: Vec<&str> = task.executors().iter().map(ObservedJob::name).collect();
        assert_eq!(names, vec!["task-1-ex-00", "task-1-ex-01", "weird-name"]);
    }

    #[test]
    fn test_executor_no_label_backstops_the_name_index() {
        let relabelled = ObservedJob::new(Job {
            metadata: ObjectMeta {
                name: Some("task-1-step-two".to_string()),
                labels: Some(
                    [(EXECUTOR_NO_LABEL.to_string(), "1".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        });
        let task = Task::new(
            observed("task-1"),
            vec![
                observed("task-1-ex-02"),
                relabelled,
                observed("task-1-ex-00"),
            ],
            None,
        );
        let names: Vec<&str> = task.executors().iter().map(ObservedJob::name).collect();
        assert_eq!(
            names,
            vec!["task-1-ex-00", "task-1-step-two", "task-1-ex-02"]
        );
    }

    #[test]
    fn test_queued_until_the_taskmaster_pod_runs() {
        let task = Task::new(observed("task-1"), vec![], None);
        assert_eq!(task.derive_state(), TesState::Queued);

        let mut pending = observed("task-1");
        pending.add_pod(running_pod("Pending"));
        assert_eq!(
            Task::new(pending, vec![], None).derive_state(),
            TesState::Queued
        );

        let mut started = observed("task-1");
        started.add_pod(running_pod("Running"));
        assert_eq!(
            Task::new(started, vec![], None).derive_state(),
            TesState::Initializing
        );
    }

    #[test]
    fn test_running_once_executors_exist() {
        let task = Task::new(observed("task-1"), vec![observed("task-1-ex-00")], None);
        assert_eq!(task.derive_state(), TesState::Running);
    }

    #[test]
    fn test_complete_from_the_taskmaster() {
        let task = Task::new(
            observed_with_condition("task-1", "Complete"),
            vec![observed_with_condition("task-1-ex-00", "Complete")],
            Some(observed_with_condition("task-1-outputs-filer", "Complete")),
        );
        assert_eq!(task.derive_state(), TesState::Complete);
    }

    #[test]
    fn test_executor_failure_outranks_taskmaster_failure() {
        // The taskmaster exits non-zero whenever an executor fails; the
        // executor is still the root cause.
        let task = Task::new(
            observed_with_condition("task-1", "Failed"),
            vec![observed_with_condition("task-1-ex-00", "Failed")],
            None,
        );
        assert_eq!(task.derive_state(), TesState::ExecutorError);
    }

    #[test]
    fn test_filer_failure_is_a_system_error() {
        let task = Task::new(
            observed_with_condition("task-1", "Failed"),
            vec![observed_with_condition("task-1-ex-00", "Complete")],
            Some(observed_with_condition("task-1-outputs-filer", "Failed")),
        );
        assert_eq!(task.derive_state(), TesState::SystemError);

        let taskmaster_only = Task::new(
            observed_with_condition("task-1", "Failed"),
            vec![observed_with_condition("task-1-ex-00", "Complete")],
            None,
        );
        assert_eq!(taskmaster_only.derive_state(), TesState::SystemError);
    }

    #[test]
    fn test_cancel_label_outranks_everything() {
        let mut taskmaster = ObservedJob::new(Job {
            metadata: ObjectMeta {
                name: Some("task-1".to_string()),
                labels: Some(
                    [(TASK_STATUS_LABEL.to_string(), TASK_STATUS_CANCELLED.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Failed".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        taskmaster.add_pod(running_pod("Running"));

        let task = Task::new(
            taskmaster,
            vec![observed_with_condition("task-1-ex-00", "Failed")],
            None,
        );
        assert_eq!(task.derive_state(), TesState::Canceled);
    }

    #[test]
    fn test_cancel_label_on_the_pod_counts_too() {
        let mut taskmaster = observed("task-1");
        taskmaster.add_pod(Pod {
            metadata: ObjectMeta {
                labels: Some(
                    [(TASK_STATUS_LABEL.to_string(), TASK_STATUS_CANCELLED.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        });
        let task = Task::new(taskmaster, vec![], None);
        assert_eq!(task.derive_state(), TesState::Canceled);
    }
}
