//! Projection of a reassembled task into the TES response shapes.

use chrono::SecondsFormat;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::LogParams;
use kube::{Api, Client};
use tracing::{debug, warn};

use crate::assembly::{ObservedJob, Task};
use crate::kubernetes_objects::{JSON_INPUT_ANNOTATION, TASK_NAME_ANNOTATION};
use crate::tes::{TesExecutorLog, TesTask, TesTaskLog};

const MAX_CONCURRENT_LOG_READS: usize = 4;

/// Verbosity of a task render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TaskView {
    /// Identity and state only.
    Minimal,
    /// Adds the task document and executor timings, no log content.
    Basic,
    /// Adds executor stdout and the taskmaster log.
    Full,
}

/// Pod log reads, factored out so projections can be tested without a
/// cluster.
#[allow(async_fn_in_trait)]
pub trait PodLogApi {
    async fn pod_log(&self, pod_name: &str) -> Result<String, kube::Error>;
}

pub struct KubePodLogs {
    pods: Api<Pod>,
}

impl KubePodLogs {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }
}

impl PodLogApi for KubePodLogs {
    async fn pod_log(&self, pod_name: &str) -> Result<String, kube::Error> {
        self.pods.logs(pod_name, &LogParams::default()).await
    }
}

/// Renders the composite at the requested verbosity.
///
/// Only FULL reads logs, and a failed read degrades to an absent field:
/// a task render must never fail because one pod is gone.
pub async fn project<L: PodLogApi>(task: &Task, view: TaskView, logs: &L) -> TesTask {
    let mut rendered = match view {
        TaskView::Minimal => TesTask::default(),
        TaskView::Basic | TaskView::Full => annotated_task(task),
    };
    rendered.id = Some(task.id().to_string());
    rendered.state = Some(task.derive_state());

    if view == TaskView::Minimal {
        return rendered;
    }

    rendered.creation_time = task
        .taskmaster()
        .job()
        .metadata
        .creation_timestamp
        .as_ref()
        .map(rfc3339);

    let mut task_log = TesTaskLog {
        start_time: task.taskmaster().start_time().map(rfc3339),
        end_time: task.taskmaster().completion_time().map(rfc3339),
        logs: task.executors().iter().map(executor_log).collect(),
        ..Default::default()
    };

    if view == TaskView::Full {
        attach_stdout(&mut task_log.logs, task.executors(), logs).await;
        if let Some(pod_name) = task.taskmaster().first_pod().and_then(pod_name) {
            match logs.pod_log(pod_name).await {
                Ok(content) => task_log.system_logs = Some(vec![content]),
                Err(e) => debug!("Failed to read the taskmaster log: {e}"),
            }
        }
    }

    rendered.logs = vec![task_log];
    rendered
}

/// The original task document, parsed back out of the taskmaster's
/// annotation. Inline input content is stripped on the way out: it can be
/// arbitrarily large and the client supplied it in the first place.
///
/// A missing or unparseable document falls back to an empty task carrying
/// at most the name stashed in the separate name annotation.
fn annotated_task(task: &Task) -> TesTask {
    let annotations = task.taskmaster().job().metadata.annotations.as_ref();
    let fallback = || TesTask {
        name: annotations
            .and_then(|annotations| annotations.get(TASK_NAME_ANNOTATION))
            .cloned(),
        ..TesTask::default()
    };
    let Some(json) = annotations.and_then(|annotations| annotations.get(JSON_INPUT_ANNOTATION))
    else {
        return fallback();
    };
    match serde_json::from_str::<TesTask>(json) {
        Ok(mut parsed) => {
            for input in &mut parsed.inputs {
                input.content = None;
            }
            parsed
        }
        Err(e) => {
            warn!(
                "Task '{}' has an unparseable document annotation: {e}",
                task.id()
            );
            fallback()
        }
    }
}

fn executor_log(executor: &ObservedJob) -> TesExecutorLog {
    TesExecutorLog {
        start_time: executor.start_time().map(rfc3339),
        end_time: executor.completion_time().map(rfc3339),
        stdout: None,
        stderr: None,
        exit_code: executor.first_pod_exit_code(),
    }
}

/// One log read per executor that has a pod, a few in flight at a time.
async fn attach_stdout<L: PodLogApi>(
    logs: &mut [TesExecutorLog],
    executors: &[ObservedJob],
    api: &L,
) {
    let mut reads = futures::stream::iter(executors.iter().enumerate().filter_map(
        |(i, executor)| {
            let pod_name = executor.first_pod().and_then(pod_name)?;
            Some(async move { (i, api.pod_log(pod_name).await) })
        },
    ))
    .buffer_unordered(MAX_CONCURRENT_LOG_READS);

    while let Some((i, result)) = reads.next().await {
        match result {
            Ok(content) => logs[i].stdout = Some(content),
            Err(e) => debug!("Failed to read the log of executor {i}: {e}"),
        }
    }
}

fn pod_name(pod: &Pod) -> Option<&str> {
    pod.metadata.name.as_deref()
}

fn rfc3339(time: &Time) -> String {
    time.0.to_rfc3339_opts(SecondsFormat::Secs, true)
}
