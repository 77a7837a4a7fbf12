//! GA4GH Task Execution Schema wire types.
//!
//! These mirror the TES v1 JSON shapes field for field. They travel in two
//! directions: the API side serializes a task into the taskmaster's
//! `json-input` annotation and payload, and the read side parses that
//! annotation back when answering `GetTask`/`ListTasks`.

pub mod command;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a TES task as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesState {
    #[default]
    Unknown,
    Queued,
    Initializing,
    Running,
    Complete,
    ExecutorError,
    SystemError,
    Canceled,
}

/// Whether a transfer refers to a single file or a whole directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TesFileType {
    #[default]
    File,
    Directory,
}

/// A single TES task, the unit the whole engine schedules and reports on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TesState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TesInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TesOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<TesResources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executors: Vec<TesExecutor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TesTaskLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
}

/// One container run of a task. Executors run strictly in array order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesExecutor {
    pub image: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Container path whose content is piped into the command's stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// When set, a non-zero exit of this executor does not fail the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_error: Option<bool>,
}

/// A file or directory staged into the task volume before executors run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub path: String,
    #[serde(rename = "type", default)]
    pub type_: TesFileType,
    /// Literal file content, the inline alternative to `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A file or directory uploaded from the task volume after executors finish.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    pub path: String,
    #[serde(rename = "type", default)]
    pub type_: TesFileType,
}

/// Resources the task asks for. Only `disk_gb` drives this engine directly,
/// the rest is passed through to the rendered executor Jobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    /// Size of the shared task volume in gigabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
}

/// One attempt of a task. This engine runs a task exactly once, so tasks
/// carry at most one of these.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesTaskLog {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TesExecutorLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TesOutputFileLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_logs: Option<Vec<String>>,
}

/// Timing, exit code and captured streams of one executor run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesExecutorLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One uploaded output as recorded in a task log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesOutputFileLog {
    pub url: String,
    pub path: String,
    /// Size in bytes, serialized as a string per the TES int64 convention.
    pub size_bytes: String,
}

/// Response shape of `ListTasks`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TesListTasksResponse {
    pub tasks: Vec<TesTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}
