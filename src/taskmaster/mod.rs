//! The taskmaster: drives one task's Job graph to completion.
//!
//! Runs as the container process of the control Job the API side submits.
//! The sequence is strictly serial: stage inputs, run each executor in
//! document order, stage outputs. Every step is a hard gate; the first
//! job that settles in anything but `Complete` aborts the rest.

pub(crate) mod cancellation;
pub mod error;
pub(crate) mod payload;
mod phase_run_executors;
mod phase_stage_inputs;
mod phase_stage_outputs;
mod run_context;
mod shutdown;

use derive_debug::Dbg;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Client;
use tokio::select;
use tracing::{debug, info, instrument, warn};
use tracing_error::SpanTrace;

use crate::config::Config;
use crate::error::SpannedExt;
use crate::kubernetes_objects::job_handle::{BatchApi, JobHandle, JobState, KubeBatch};
use crate::kubernetes_objects::limit_range::minimum_ram_floor;
use crate::kubernetes_objects::volume_claim::{KubePvc, PvcApi};

use self::cancellation::CancellationSignal;
use self::error::TaskRunError;
use self::payload::TaskmasterPayload;
use self::run_context::{SharedRunContext, TaskRunContext};
use self::shutdown::Shutdown;

#[derive(Dbg)]
pub(crate) struct TaskmasterContext {
    config: Config,
    #[dbg(skip)]
    payload: TaskmasterPayload,
    task_name: String,
    cancellation: CancellationSignal,
}

impl TaskmasterContext {
    pub(crate) fn new(config: Config, payload: TaskmasterPayload) -> Result<Self, TaskRunError> {
        let task_name = payload.task_name()?.to_string();
        let cancellation = CancellationSignal::new(config.labels_file.clone());
        Ok(Self {
            config,
            payload,
            task_name,
            cancellation,
        })
    }

    /// Drives the task against the live cluster.
    ///
    /// SIGINT/SIGTERM interrupts the sequence, tears down whatever this
    /// run created, and surfaces as cancellation.
    #[instrument("taskmaster", skip_all, fields(task_name = %self.task_name))]
    pub(crate) async fn run(&self, client: Client) -> Result<(), TaskRunError> {
        debug!("{self:?}");
        info!("Running task '{}'...", self.task_name);

        let batch = KubeBatch::new(client.clone(), &self.config.namespace);
        let pvcs = KubePvc::new(client.clone(), &self.config.namespace);

        let ram_floor = minimum_ram_floor(client, &self.config.namespace)
            .await
            .with_span_trace()?;
        if let Some(floor) = &ram_floor {
            info!("Namespace enforces a memory floor of {}.", floor.0);
        }

        let run_context = TaskRunContext::shared();
        let mut shutdown = Shutdown::new();

        select! {
            result = self.sequence(&batch, &pvcs, ram_floor.as_ref(), &run_context) => {
                if result.is_ok() {
                    info!("Task '{}' completed successfully.", self.task_name);
                }
                result
            }
            signal = shutdown.wait() => {
                warn!("Received {signal}. Tearing down the task's objects...");
                run_context.read().await.cleanup(&batch, &pvcs).await;
                Err(TaskRunError::Cancelled)
            }
        }
    }

    async fn sequence<B: BatchApi, P: PvcApi>(
        &self,
        batch: &B,
        pvcs: &P,
        ram_floor: Option<&Quantity>,
        run_context: &SharedRunContext,
    ) -> Result<(), TaskRunError> {
        // Cancelling before anything ran must cost nothing.
        if self.cancellation.is_cancelled() {
            info!("Task '{}' was cancelled before anything ran.", self.task_name);
            return Err(TaskRunError::Cancelled);
        }

        let staged = self.stage_inputs(batch, pvcs, run_context).await?;
        self.run_executors(batch, staged.as_ref(), ram_floor, run_context)
            .await?;
        self.stage_outputs(batch, pvcs, staged, run_context).await?;
        Ok(())
    }
}

/// Gate between steps: anything but `Complete` aborts the sequence.
async fn ensure_completed<B: BatchApi>(
    handle: &JobHandle,
    state: JobState,
    batch: &B,
) -> Result<(), TaskRunError> {
    match state {
        JobState::Complete => Ok(()),
        JobState::Cancelled => Err(TaskRunError::Cancelled),
        state => {
            if state == JobState::Error {
                // The pod can never start; left alone the job would retry
                // its image pull forever.
                handle.delete(batch).await;
            }
            Err(TaskRunError::JobNotCompleted {
                job_name: handle.name().to_string(),
                state,
                span_trace: SpanTrace::capture(),
            })
        }
    }
}
