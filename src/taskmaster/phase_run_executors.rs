use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{info, instrument};

use crate::kubernetes_objects::filer_job::attach_task_volume;
use crate::kubernetes_objects::job_handle::{BatchApi, JobHandle};
use crate::kubernetes_objects::limit_range::apply_ram_floor;

use super::TaskmasterContext;
use super::error::TaskRunError;
use super::phase_stage_inputs::StagedVolume;
use super::run_context::SharedRunContext;

impl TaskmasterContext {
    /// Runs the executor Jobs strictly in document order. Executors must
    /// not overlap: each one may depend on files the previous one wrote.
    #[instrument("run_executors", skip_all)]
    pub(super) async fn run_executors<B: BatchApi>(
        &self,
        batch: &B,
        staged: Option<&StagedVolume>,
        ram_floor: Option<&Quantity>,
        run_context: &SharedRunContext,
    ) -> Result<(), TaskRunError> {
        let total = self.payload.executors.len();
        for (i, manifest) in self.payload.executors.iter().enumerate() {
            let mut job = manifest.clone();
            if let Some(limit) = self.config.executor_backoff_limit {
                if let Some(spec) = job.spec.as_mut() {
                    spec.backoff_limit = Some(limit);
                }
            }
            if let Some(staged) = staged {
                attach_task_volume(&mut job, staged.claim.name(), &staged.mounts);
            }
            if let Some(floor) = ram_floor {
                apply_ram_floor(&mut job, floor);
            }

            // Names were validated when the document was loaded.
            let name = job.metadata.name.clone().unwrap_or_default();
            info!("Executor {} of {}: '{}'.", i + 1, total, name);

            let mut handle = JobHandle::new(name, job, self.config.polling.pod_timeout);
            run_context.write().await.record_job(handle.name());

            let state = handle
                .run_to_completion(batch, self.config.polling.poll_interval, || {
                    self.cancellation.is_cancelled()
                })
                .await?;
            super::ensure_completed(&handle, state, batch).await?;
        }
        Ok(())
    }
}
