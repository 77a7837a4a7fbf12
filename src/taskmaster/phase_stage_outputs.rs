use tracing::{info, instrument};

use crate::kubernetes_objects::filer_job::{TransputKind, filer_job};
use crate::kubernetes_objects::job_handle::{BatchApi, JobHandle};
use crate::kubernetes_objects::outputs_filer_name;
use crate::kubernetes_objects::volume_claim::PvcApi;

use super::TaskmasterContext;
use super::error::TaskRunError;
use super::phase_stage_inputs::StagedVolume;
use super::run_context::SharedRunContext;

impl TaskmasterContext {
    /// Uploads the outputs and releases the task volume.
    ///
    /// The claim is deleted only after the outputs filer completes; on any
    /// other outcome it stays behind for inspection.
    #[instrument("stage_outputs", skip_all)]
    pub(super) async fn stage_outputs<B: BatchApi, P: PvcApi>(
        &self,
        batch: &B,
        pvcs: &P,
        staged: Option<StagedVolume>,
        run_context: &SharedRunContext,
    ) -> Result<(), TaskRunError> {
        let Some(staged) = staged else {
            return Ok(());
        };

        let document = serde_json::to_string(&self.payload.filer_payload())?;
        let job = filer_job(
            &self.task_name,
            TransputKind::Outputs,
            document,
            &self.config.filer,
            staged.claim.name(),
            &staged.mounts,
        );
        let mut handle = JobHandle::new(
            outputs_filer_name(&self.task_name),
            job,
            self.config.polling.pod_timeout,
        );
        run_context.write().await.record_job(handle.name());

        let state = handle
            .run_to_completion(batch, self.config.polling.poll_interval, || {
                self.cancellation.is_cancelled()
            })
            .await?;
        super::ensure_completed(&handle, state, batch).await?;

        staged.claim.delete(pvcs).await?;
        run_context.write().await.forget_pvc();
        info!("Task volume '{}' released.", staged.claim.name());
        Ok(())
    }
}
