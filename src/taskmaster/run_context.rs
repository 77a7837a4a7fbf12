//! Registry of everything a run has created, for interrupt teardown.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::kubernetes_objects::job_handle::BatchApi;
use crate::kubernetes_objects::volume_claim::PvcApi;

pub(crate) type SharedRunContext = Arc<RwLock<TaskRunContext>>;

/// Names of the Kubernetes objects created so far, in creation order.
///
/// Owned by one taskmaster invocation. Shared with the shutdown arm of the
/// run loop, which is the only other reader.
#[derive(Debug, Default)]
pub(crate) struct TaskRunContext {
    created_jobs: Vec<String>,
    created_pvc: Option<String>,
}

impl TaskRunContext {
    pub(crate) fn shared() -> SharedRunContext {
        Arc::new(RwLock::new(TaskRunContext::default()))
    }

    pub(crate) fn record_job(&mut self, name: &str) {
        self.created_jobs.push(name.to_string());
    }

    pub(crate) fn record_pvc(&mut self, name: &str) {
        self.created_pvc = Some(name.to_string());
    }

    /// The claim was already released in the normal course of the run.
    pub(crate) fn forget_pvc(&mut self) {
        self.created_pvc = None;
    }

    /// Best-effort teardown of everything recorded. Failures are logged,
    /// never raised: this runs on the way out of an interrupted run.
    #[instrument("cleanup", skip_all)]
    pub(crate) async fn cleanup<B: BatchApi, P: PvcApi>(&self, batch: &B, pvcs: &P) {
        info!(
            "Cleaning up {} job(s) and {} volume claim(s)...",
            self.created_jobs.len(),
            usize::from(self.created_pvc.is_some())
        );
        for job_name in &self.created_jobs {
            match batch.delete_job(job_name).await {
                Ok(()) => info!("Job '{job_name}' deleted."),
                Err(e) => warn!("Failed to delete job '{job_name}': {e}"),
            }
        }
        if let Some(pvc_name) = &self.created_pvc {
            match pvcs.delete_pvc(pvc_name).await {
                Ok(()) => info!("Volume claim '{pvc_name}' deleted."),
                Err(e) => warn!("Failed to delete volume claim '{pvc_name}': {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};

    use super::*;

    #[derive(Default)]
    struct FakeCluster {
        deleted_jobs: Mutex<Vec<String>>,
        deleted_pvcs: Mutex<Vec<String>>,
        fail_job_deletes: bool,
    }

    impl BatchApi for FakeCluster {
        async fn create_job(&self, _job: &Job) -> Result<Job, kube::Error> {
            unreachable!("cleanup never creates")
        }

        async fn get_job(&self, _name: &str) -> Result<Job, kube::Error> {
            unreachable!("cleanup never reads")
        }

        async fn delete_job(&self, name: &str) -> Result<(), kube::Error> {
            self.deleted_jobs.lock().unwrap().push(name.to_string());
            if self.fail_job_deletes {
                Err(kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "boom".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                }))
            } else {
                Ok(())
            }
        }

        async fn list_job_pods(&self, _job_name: &str) -> Result<Vec<Pod>, kube::Error> {
            unreachable!("cleanup never lists pods")
        }
    }

    impl PvcApi for FakeCluster {
        async fn create_pvc(
            &self,
            _claim: &PersistentVolumeClaim,
        ) -> Result<PersistentVolumeClaim, kube::Error> {
            unreachable!("cleanup never creates")
        }

        async fn get_pvc(&self, _name: &str) -> Result<PersistentVolumeClaim, kube::Error> {
            unreachable!("cleanup never reads")
        }

        async fn delete_pvc(&self, name: &str) -> Result<(), kube::Error> {
            self.deleted_pvcs.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cleanup_deletes_in_creation_order() {
        let cluster = FakeCluster::default();
        let mut context = TaskRunContext::default();
        context.record_pvc("task-1-pvc");
        context.record_job("task-1-inputs-filer");
        context.record_job("task-1-ex-00");

        context.cleanup(&cluster, &cluster).await;

        assert_eq!(
            *cluster.deleted_jobs.lock().unwrap(),
            vec!["task-1-inputs-filer", "task-1-ex-00"]
        );
        assert_eq!(*cluster.deleted_pvcs.lock().unwrap(), vec!["task-1-pvc"]);
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failures() {
        let cluster = FakeCluster {
            fail_job_deletes: true,
            ..Default::default()
        };
        let mut context = TaskRunContext::default();
        context.record_job("task-1-ex-00");
        context.record_pvc("task-1-pvc");

        context.cleanup(&cluster, &cluster).await;

        assert_eq!(cluster.deleted_jobs.lock().unwrap().len(), 1);
        assert_eq!(*cluster.deleted_pvcs.lock().unwrap(), vec!["task-1-pvc"]);
    }

    #[tokio::test]
    async fn test_forgotten_pvc_is_not_deleted() {
        let cluster = FakeCluster::default();
        let mut context = TaskRunContext::default();
        context.record_pvc("task-1-pvc");
        context.forget_pvc();

        context.cleanup(&cluster, &cluster).await;

        assert!(cluster.deleted_pvcs.lock().unwrap().is_empty());
    }
}
