//! The two strategies for folding a job/pod stream into tasks.
//!
//! Both consume the same `{add_job, add_pod}` stream, which must arrive
//! taskmasters first, then executors and filers, then pods: pod matching
//! needs the job selectors indexed, and filer matching needs the
//! taskmaster names registered.

use std::collections::HashMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::kubernetes_objects::{TASK_ID_LABEL, outputs_filer_name, task_name_of_outputs_filer};

use super::AssemblyError;
use super::index::{JobGraphIndex, JobId, JobKind, classify};
use super::observed_job::ObservedJob;
use super::task::Task;

pub(crate) trait Assembler {
    fn add_job(&mut self, job: Job);
    fn add_pod(&mut self, pod: Pod);
}

fn take_entry(entries: &mut [Option<ObservedJob>], id: JobId) -> Option<ObservedJob> {
    entries.get_mut(id.index()).and_then(Option::take)
}

/// Builds exactly one task from inputs the caller already filtered down
/// to it. The first taskmaster seen anchors the task; executors attach
/// unconditionally.
#[derive(Default)]
pub(crate) struct SingleTaskAssembler {
    index: JobGraphIndex,
    taskmaster: Option<JobId>,
    executors: Vec<JobId>,
    output_filer: Option<JobId>,
}

impl SingleTaskAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_task(self) -> Result<Task, AssemblyError> {
        let Some(taskmaster_id) = self.taskmaster else {
            return Err(AssemblyError::TaskmasterMissing);
        };
        let mut entries: Vec<Option<ObservedJob>> =
            self.index.into_entries().into_iter().map(Some).collect();
        let Some(taskmaster) = take_entry(&mut entries, taskmaster_id) else {
            return Err(AssemblyError::TaskmasterMissing);
        };
        let executors = self
            .executors
            .iter()
            .filter_map(|id| take_entry(&mut entries, *id))
            .collect();
        let output_filer = self
            .output_filer
            .and_then(|id| take_entry(&mut entries, id));
        Ok(Task::new(taskmaster, executors, output_filer))
    }
}

impl Assembler for SingleTaskAssembler {
    fn add_job(&mut self, job: Job) {
        let kind = classify(&job);
        let id = self.index.insert(job);
        match kind {
            JobKind::Taskmaster => {
                if self.taskmaster.is_none() {
                    self.taskmaster = Some(id);
                } else {
                    warn!(
                        "Ignoring a second taskmaster job '{}'.",
                        self.index.get(id).name()
                    );
                }
            }
            JobKind::Executor => {
                if self.taskmaster.is_some() {
                    self.executors.push(id);
                } else {
                    warn!(
                        "Dropping executor '{}' fed before its taskmaster.",
                        self.index.get(id).name()
                    );
                }
            }
            JobKind::Filer => {
                let expected = self
                    .taskmaster
                    .map(|tm| outputs_filer_name(self.index.get(tm).name()));
                if expected.as_deref() == Some(self.index.get(id).name())
                    && self.output_filer.is_none()
                {
                    self.output_filer = Some(id);
                }
            }
        }
    }

    fn add_pod(&mut self, pod: Pod) {
        self.index.attach_pod(pod);
    }
}

/// Builds one page of tasks. Ownership is re-derived from labels and name
/// suffixes; executors and filers whose owner is not on the page are
/// silently dropped.
#[derive(Default)]
pub(crate) struct TaskListAssembler {
    index: JobGraphIndex,
    slots: Vec<TaskSlot>,
    by_task_id: HashMap<String, usize>,
    by_taskmaster_name: HashMap<String, usize>,
}

struct TaskSlot {
    taskmaster: JobId,
    executors: Vec<JobId>,
    output_filer: Option<JobId>,
}

impl TaskListAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Tasks in the order their taskmasters arrived, which is the page
    /// order the cluster returned.
    pub(crate) fn into_tasks(self) -> Vec<Task> {
        let mut entries: Vec<Option<ObservedJob>> =
            self.index.into_entries().into_iter().map(Some).collect();
        self.slots
            .into_iter()
            .filter_map(|slot| {
                let taskmaster = take_entry(&mut entries, slot.taskmaster)?;
                let executors = slot
                    .executors
                    .iter()
                    .filter_map(|id| take_entry(&mut entries, *id))
                    .collect();
                let output_filer = slot
                    .output_filer
                    .and_then(|id| take_entry(&mut entries, id));
                Some(Task::new(taskmaster, executors, output_filer))
            })
            .collect()
    }
}

impl Assembler for TaskListAssembler {
    fn add_job(&mut self, job: Job) {
        let kind = classify(&job);
        let id = self.index.insert(job);
        match kind {
            JobKind::Taskmaster => {
                let name = self.index.get(id).name().to_string();
                // Taskmasters normally label themselves with their own id;
                // the name is the documented fallback.
                let task_id = self
                    .index
                    .get(id)
                    .label(TASK_ID_LABEL)
                    .unwrap_or(&name)
                    .to_string();
                let slot = self.slots.len();
                self.slots.push(TaskSlot {
                    taskmaster: id,
                    executors: Vec::new(),
                    output_filer: None,
                });
                self.by_task_id.insert(task_id, slot);
                self.by_taskmaster_name.insert(name, slot);
            }
            JobKind::Executor => {
                let slot = self
                    .index
                    .get(id)
                    .label(TASK_ID_LABEL)
                    .and_then(|task_id| self.by_task_id.get(task_id))
                    .copied();
                match slot {
                    Some(slot) => self.slots[slot].executors.push(id),
                    None => debug!(
                        "Executor '{}' belongs to no task on this page.",
                        self.index.get(id).name()
                    ),
                }
            }
            JobKind::Filer => {
                let slot = task_name_of_outputs_filer(self.index.get(id).name())
                    .and_then(|task| self.by_taskmaster_name.get(task))
                    .copied();
                match slot {
                    Some(slot) if self.slots[slot].output_filer.is_none() => {
                        self.slots[slot].output_filer = Some(id);
                    }
                    _ => debug!(
                        "Filer '{}' belongs to no task on this page.",
                        self.index.get(id).name()
                    ),
                }
            }
        }
    }

    fn add_pod(&mut self, pod: Pod) {
        self.index.attach_pod(pod);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    use super::*;

    fn job(name: &str, labels: &[(&str, &str)]) -> Job {
        let selector: BTreeMap<String, String> =
            [("job-name".to_string(), name.to_string())].into();
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(JobSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_of(job_name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("{job_name}-pod")),
                labels: Some(
                    [("job-name".to_string(), job_name.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn taskmaster(name: &str) -> Job {
        job(
            name,
            &[("job-type", "taskmaster"), ("task-id", name)],
        )
    }

    fn executor(task: &str, name: &str) -> Job {
        job(name, &[("job-type", "executor"), ("task-id", task)])
    }

    fn filer(name: &str) -> Job {
        job(name, &[("task-id", "whatever")])
    }

    #[test]
    fn test_single_task_assembly() {
        let mut assembler = SingleTaskAssembler::new();
        assembler.add_job(taskmaster("task-1"));
        assembler.add_job(executor("task-1", "task-1-ex-01"));
        assembler.add_job(executor("task-1", "task-1-ex-00"));
        assembler.add_job(filer("task-1-outputs-filer"));
        assembler.add_job(filer("task-1-inputs-filer"));
        assembler.add_pod(pod_of("task-1"));
        assembler.add_pod(pod_of("task-1-ex-00"));

        let task = assembler.into_task().unwrap();
        assert_eq!(task.id(), "task-1");
        let names: Vec<&str> = task.executors().iter().map(ObservedJob::name).collect();
        assert_eq!(names, vec!["task-1-ex-00", "task-1-ex-01"]);
        assert_eq!(
            task.output_filer().map(ObservedJob::name),
            Some("task-1-outputs-filer")
        );
        assert!(task.taskmaster().has_pods());
        assert!(task.executors()[0].has_pods());
        assert!(!task.executors()[1].has_pods());
    }

    #[test]
    fn test_single_task_requires_a_taskmaster() {
        let mut assembler = SingleTaskAssembler::new();
        assembler.add_job(executor("task-1", "task-1-ex-00"));
        assert!(matches!(
            assembler.into_task(),
            Err(AssemblyError::TaskmasterMissing)
        ));
    }

    #[test]
    fn test_single_task_keeps_the_first_taskmaster() {
        let mut assembler = SingleTaskAssembler::new();
        assembler.add_job(taskmaster("task-1"));
        assembler.add_job(taskmaster("task-2"));
        let task = assembler.into_task().unwrap();
        assert_eq!(task.id(), "task-1");
    }

    #[test]
    fn test_list_assembly_partitions_by_ownership() {
        let mut assembler = TaskListAssembler::new();
        assembler.add_job(taskmaster("task-1"));
        assembler.add_job(taskmaster("task-2"));
        // Executor order scrambled across tasks on purpose.
        assembler.add_job(executor("task-2", "task-2-ex-00"));
        assembler.add_job(executor("task-1", "task-1-ex-01"));
        assembler.add_job(executor("task-1", "task-1-ex-00"));
        assembler.add_job(filer("task-2-outputs-filer"));
        assembler.add_pod(pod_of("task-2-ex-00"));

        let tasks = assembler.into_tasks();
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].id(), "task-1");
        assert_eq!(tasks[0].executors().len(), 2);
        assert_eq!(tasks[0].executors()[0].name(), "task-1-ex-00");
        assert!(tasks[0].output_filer().is_none());

        assert_eq!(tasks[1].id(), "task-2");
        assert_eq!(tasks[1].executors().len(), 1);
        assert!(tasks[1].executors()[0].has_pods());
        assert_eq!(
            tasks[1].output_filer().map(ObservedJob::name),
            Some("task-2-outputs-filer")
        );
    }

    #[test]
    fn test_list_assembly_drops_strays() {
        let mut assembler = TaskListAssembler::new();
        assembler.add_job(taskmaster("task-1"));
        // Owned by a task outside the page.
        assembler.add_job(executor("task-9", "task-9-ex-00"));
        // Inputs filer never takes the outputs slot.
        assembler.add_job(filer("task-1-inputs-filer"));
        // Suffix matches but no such taskmaster.
        assembler.add_job(filer("task-9-outputs-filer"));

        let tasks = assembler.into_tasks();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].executors().is_empty());
        assert!(tasks[0].output_filer().is_none());
    }
}
