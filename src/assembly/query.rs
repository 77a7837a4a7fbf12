//! Cluster queries behind task reads.
//!
//! Each query lists jobs and pods fresh and folds them through an
//! assembler; nothing is cached between calls.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::instrument;

use crate::error::SpannedExt;
use crate::kubernetes_objects::{
    JOB_TYPE_EXECUTOR, JOB_TYPE_LABEL, JOB_TYPE_TASKMASTER, TASK_ID_LABEL, outputs_filer_name,
};

use super::AssemblyError;
use super::assembler::{Assembler, SingleTaskAssembler, TaskListAssembler};
use super::task::Task;

/// One page of tasks plus the cluster's continuation token, when more
/// pages exist.
#[derive(Debug)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_page_token: Option<String>,
}

/// Reassembles a single task from the cluster.
#[instrument("get_task", skip(client))]
pub async fn get_task(client: Client, namespace: &str, id: &str) -> Result<Task, AssemblyError> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let pods: Api<Pod> = Api::namespaced(client, namespace);

    let Some(taskmaster) = jobs.get_opt(id).await.with_span_trace()? else {
        return Err(AssemblyError::TaskNotFound(id.to_string()));
    };

    let executor_params = ListParams::default().labels(&format!(
        "{JOB_TYPE_LABEL}={JOB_TYPE_EXECUTOR},{TASK_ID_LABEL}={id}"
    ));
    let executors = jobs.list(&executor_params).await.with_span_trace()?.items;

    let output_filer = jobs
        .get_opt(&outputs_filer_name(id))
        .await
        .with_span_trace()?;

    let pod_params = ListParams::default().labels(&format!("{TASK_ID_LABEL}={id}"));
    let task_pods = pods.list(&pod_params).await.with_span_trace()?.items;

    let mut assembler = SingleTaskAssembler::new();
    let mut others = executors;
    others.extend(output_filer);
    drive(&mut assembler, vec![taskmaster], others, task_pods);
    assembler.into_task()
}

/// Reassembles one page of tasks from the cluster. Pagination applies to
/// taskmasters only; executors, filers and pods are listed once and
/// partitioned by the assembler.
#[instrument("list_tasks", skip(client))]
pub async fn list_tasks(
    client: Client,
    namespace: &str,
    page_size: Option<u32>,
    page_token: Option<String>,
) -> Result<TaskPage, AssemblyError> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let pods: Api<Pod> = Api::namespaced(client, namespace);

    let mut taskmaster_params =
        ListParams::default().labels(&format!("{JOB_TYPE_LABEL}={JOB_TYPE_TASKMASTER}"));
    if let Some(size) = page_size {
        taskmaster_params = taskmaster_params.limit(size);
    }
    if let Some(token) = &page_token {
        taskmaster_params = taskmaster_params.continue_token(token);
    }
    let taskmasters = jobs.list(&taskmaster_params).await.with_span_trace()?;
    let next_page_token = next_token(&taskmasters.metadata.continue_);

    let executor_params =
        ListParams::default().labels(&format!("{JOB_TYPE_LABEL}={JOB_TYPE_EXECUTOR}"));
    let executors = jobs.list(&executor_params).await.with_span_trace()?.items;

    // Filers carry no type label; select on the task label they do carry.
    let filer_params =
        ListParams::default().labels(&format!("{TASK_ID_LABEL},!{JOB_TYPE_LABEL}"));
    let filers = jobs.list(&filer_params).await.with_span_trace()?.items;

    let pod_params = ListParams::default().labels(TASK_ID_LABEL);
    let task_pods = pods.list(&pod_params).await.with_span_trace()?.items;

    let mut assembler = TaskListAssembler::new();
    let mut others = executors;
    others.extend(filers);
    drive(&mut assembler, taskmasters.items, others, task_pods);

    Ok(TaskPage {
        tasks: assembler.into_tasks(),
        next_page_token,
    })
}

/// Feeds an assembler in the order it requires: taskmasters, then the
/// other jobs, then pods.
fn drive<A: Assembler>(assembler: &mut A, taskmasters: Vec<Job>, others: Vec<Job>, pods: Vec<Pod>) {
    for job in taskmasters {
        assembler.add_job(job);
    }
    for job in others {
        assembler.add_job(job);
    }
    for pod in pods {
        assembler.add_pod(pod);
    }
}

/// An empty continuation token from the API means the listing is
/// exhausted.
fn next_token(continue_: &Option<String>) -> Option<String> {
    continue_
        .as_deref()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
