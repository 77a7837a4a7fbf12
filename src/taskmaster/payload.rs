//! The task document handed to the taskmaster process.
//!
//! The control plane renders the executor Jobs ahead of time and ships them
//! here together with the transfer lists. The document reaches the container
//! through a ConfigMap mount, so it may arrive gzipped or base64-wrapped
//! gzipped next to plain JSON.

use std::io::Read;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::kubernetes_objects::TASK_ID_LABEL;
use crate::tes::{TesInput, TesOutput};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) struct TaskmasterPayload {
    pub(crate) executors: Vec<Job>,
    #[serde(default)]
    pub(crate) inputs: Vec<TesInput>,
    #[serde(default)]
    pub(crate) outputs: Vec<TesOutput>,
    #[serde(default)]
    pub(crate) volumes: Vec<String>,
    #[serde(default)]
    pub(crate) resources: PayloadResources,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) struct PayloadResources {
    #[serde(default)]
    pub(crate) disk_gb: Option<f64>,
}

/// The slice of the document a filer works from, serialized into its argv.
#[derive(Debug, Serialize)]
pub(crate) struct FilerPayload<'a> {
    pub(crate) inputs: &'a [TesInput],
    pub(crate) outputs: &'a [TesOutput],
    pub(crate) volumes: &'a [String],
    pub(crate) resources: &'a PayloadResources,
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Failed to read the task document '{path}'.\n{source}")]
    Io { path: String, source: std::io::Error },

    #[error("Failed to decompress the task document.\n{0}")]
    Gzip(std::io::Error),

    #[error("Failed to parse the task document.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("The task document names no executors")]
    NoExecutors,

    #[error("Executor {0} has no metadata.name")]
    UnnamedExecutor(usize),

    #[error("The first executor carries no 'task-id' label to derive the task name from")]
    TaskIdMissing,
}

impl TaskmasterPayload {
    /// Reads a task document, unwrapping gzip or base64+gzip transparently.
    #[instrument("load_payload")]
    pub(crate) async fn load(path: &Path) -> Result<Self, PayloadError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PayloadError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let json = decode(&bytes)?;
        let payload: TaskmasterPayload = serde_json::from_slice(&json)?;
        info!(
            "Task document loaded: {} executor(s), {} input(s), {} output(s), {} volume(s).",
            payload.executors.len(),
            payload.inputs.len(),
            payload.outputs.len(),
            payload.volumes.len()
        );
        Ok(payload)
    }

    /// The task name every created object derives its own name from, read
    /// off the first executor's ownership label. Doubles as the document's
    /// validation: every executor must arrive named.
    pub(crate) fn task_name(&self) -> Result<&str, PayloadError> {
        if self.executors.is_empty() {
            return Err(PayloadError::NoExecutors);
        }
        for (i, executor) in self.executors.iter().enumerate() {
            if executor.metadata.name.as_deref().is_none_or(str::is_empty) {
                return Err(PayloadError::UnnamedExecutor(i));
            }
        }
        self.executors[0]
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(TASK_ID_LABEL))
            .map(String::as_str)
            .ok_or(PayloadError::TaskIdMissing)
    }

    /// Whether the task moves any data and therefore needs a volume.
    pub(crate) fn has_transfers(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty() || !self.volumes.is_empty()
    }

    pub(crate) fn filer_payload(&self) -> FilerPayload<'_> {
        FilerPayload {
            inputs: &self.inputs,
            outputs: &self.outputs,
            volumes: &self.volumes,
            resources: &self.resources,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<u8>, PayloadError> {
    if bytes.starts_with(GZIP_MAGIC) {
        return gunzip(bytes);
    }
    let compact: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if let Ok(decoded) = BASE64.decode(&compact) {
        if decoded.starts_with(GZIP_MAGIC) {
            return gunzip(&decoded);
        }
    }
    Ok(bytes.to_vec())
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(PayloadError::Gzip)?;
    Ok(out)
}
