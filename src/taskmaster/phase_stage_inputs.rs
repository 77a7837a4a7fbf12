use k8s_openapi::api::core::v1::VolumeMount;
use tracing::{info, instrument};

use crate::kubernetes_objects::filer_job::{TransputKind, filer_job, generate_mounts};
use crate::kubernetes_objects::inputs_filer_name;
use crate::kubernetes_objects::job_handle::{BatchApi, JobHandle};
use crate::kubernetes_objects::volume_claim::{PvcApi, VolumeClaim};

use super::TaskmasterContext;
use super::error::TaskRunError;
use super::run_context::SharedRunContext;

/// The claim and mount layout the filers and executors share.
pub(crate) struct StagedVolume {
    pub(crate) claim: VolumeClaim,
    pub(crate) mounts: Vec<VolumeMount>,
}

impl TaskmasterContext {
    /// Provisions the task volume and stages the inputs onto it.
    ///
    /// Tasks that move no data get no volume: returns None and the filer
    /// never runs.
    #[instrument("stage_inputs", skip_all)]
    pub(super) async fn stage_inputs<B: BatchApi, P: PvcApi>(
        &self,
        batch: &B,
        pvcs: &P,
        run_context: &SharedRunContext,
    ) -> Result<Option<StagedVolume>, TaskRunError> {
        if !self.payload.has_transfers() {
            info!("Task moves no data. Skipping the volume and the inputs filer.");
            return Ok(None);
        }

        let mut claim = VolumeClaim::new(
            &self.task_name,
            self.payload.resources.disk_gb,
            self.config.storage_class.clone(),
        );
        run_context.write().await.record_pvc(claim.name());
        claim.create(pvcs).await?;

        let mounts = generate_mounts(
            &self.payload.inputs,
            &self.payload.outputs,
            &self.payload.volumes,
            &mut claim,
        );
        info!("Task volume '{}' mounts {} directories.", claim.name(), mounts.len());

        let document = serde_json::to_string(&self.payload.filer_payload())?;
        let job = filer_job(
            &self.task_name,
            TransputKind::Inputs,
            document,
            &self.config.filer,
            claim.name(),
            &mounts,
        );
        let mut handle = JobHandle::new(
            inputs_filer_name(&self.task_name),
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

        Ok(Some(StagedVolume { claim, mounts }))
    }
}
