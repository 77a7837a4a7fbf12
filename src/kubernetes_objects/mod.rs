//! Shapes of and naming rules for the Kubernetes objects a task is made of.
//!
//! One task on the cluster is a taskmaster `Job`, up to two filer `Job`s,
//! one executor `Job` per TES executor and a `PersistentVolumeClaim` shared
//! by all of them. Everything here is the wire contract between the side
//! that creates those objects and the side that reconstructs tasks from
//! them, so the constants below must never change silently.

pub(crate) mod filer_job;
pub(crate) mod job_handle;
pub(crate) mod limit_range;
pub(crate) mod volume_claim;

/// Field manager name reported to the API server on writes.
pub(crate) const MANAGER_ROLE_NAME: &str = "teskube";

/// Label distinguishing taskmaster Jobs from executor Jobs.
/// Filer Jobs carry no `job-type` label at all.
pub const JOB_TYPE_LABEL: &str = "job-type";
pub const JOB_TYPE_TASKMASTER: &str = "taskmaster";
pub const JOB_TYPE_EXECUTOR: &str = "executor";

/// Label tying executor and filer Jobs (and all pods) back to the
/// taskmaster Job whose name doubles as the TES task id.
pub const TASK_ID_LABEL: &str = "task-id";

/// Label holding an executor's position within its task.
pub const EXECUTOR_NO_LABEL: &str = "executor-no";

/// Label the API side sets on a taskmaster Job to request cancellation.
pub const TASK_STATUS_LABEL: &str = "task-status";
pub const TASK_STATUS_CANCELLED: &str = "Cancelled";

/// Annotation on the taskmaster Job holding the user-supplied task name.
pub const TASK_NAME_ANNOTATION: &str = "tes-task-name";

/// Annotation on the taskmaster Job holding the original TES task as JSON.
pub const JSON_INPUT_ANNOTATION: &str = "json-input";

/// Name of the shared task volume inside every pod spec.
pub const TASK_VOLUME_NAME: &str = "task-volume";

const EXECUTOR_NAME_INFIX: &str = "-ex-";
const INPUTS_FILER_SUFFIX: &str = "-inputs-filer";
const OUTPUTS_FILER_SUFFIX: &str = "-outputs-filer";
const PVC_SUFFIX: &str = "-pvc";

/// Name of the `i`-th executor Job of the given task.
pub fn executor_name(task_name: &str, i: usize) -> String {
    format!("{task_name}{EXECUTOR_NAME_INFIX}{i:02}")
}

/// Executor position parsed back out of a Job name.
///
/// Names that do not follow the `<task>-ex-<no>` scheme sort after every
/// well-formed executor, hence `u32::MAX`.
pub fn executor_index_of(job_name: &str) -> u32 {
    let Some(pos) = job_name.find(EXECUTOR_NAME_INFIX) else {
        return u32::MAX;
    };
    let digits: String = job_name[pos + EXECUTOR_NAME_INFIX.len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(u32::MAX)
}

/// Name of the Job staging a task's inputs onto the shared volume.
pub fn inputs_filer_name(task_name: &str) -> String {
    format!("{task_name}{INPUTS_FILER_SUFFIX}")
}

/// Name of the Job uploading a task's outputs from the shared volume.
pub fn outputs_filer_name(task_name: &str) -> String {
    format!("{task_name}{OUTPUTS_FILER_SUFFIX}")
}

/// Name of the task whose outputs the given filer Job uploads, if any.
pub fn task_name_of_outputs_filer(job_name: &str) -> Option<&str> {
    job_name.strip_suffix(OUTPUTS_FILER_SUFFIX)
}

/// Name of a task's shared volume claim.
pub fn pvc_name(task_name: &str) -> String {
    format!("{task_name}{PVC_SUFFIX}")
}
