//! The shared volume backing one task.
//!
//! Filers and executors exchange files through a single `ReadWriteOnce`
//! claim. Every distinct mount directory of the task maps to its own
//! subdirectory (`dir0`, `dir1`, ...) of the claim.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, PostParams};
use tracing::{info, instrument, warn};

use super::{MANAGER_ROLE_NAME, pvc_name};
use crate::error::{SpannedErr, SpannedExt};

/// Claim size applied when a task asks for no disk at all.
const DEFAULT_DISK_GB: f64 = 0.1;

/// Cluster operations on persistent volume claims, factored out for tests.
pub(crate) trait PvcApi {
    async fn create_pvc(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, kube::Error>;
    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim, kube::Error>;
    async fn delete_pvc(&self, name: &str) -> Result<(), kube::Error>;
}

/// The live `PvcApi`, bound to one namespace.
pub(crate) struct KubePvc {
    claims: Api<PersistentVolumeClaim>,
}

impl KubePvc {
    pub(crate) fn new(client: Client, namespace: &str) -> Self {
        Self {
            claims: Api::namespaced(client, namespace),
        }
    }
}

impl PvcApi for KubePvc {
    async fn create_pvc(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, kube::Error> {
        let params = PostParams {
            field_manager: Some(MANAGER_ROLE_NAME.to_string()),
            ..Default::default()
        };
        self.claims.create(&params, pvc).await
    }

    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim, kube::Error> {
        self.claims.get(name).await
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), kube::Error> {
        self.claims
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
    }
}

/// One task's volume claim plus the running subpath counter.
#[derive(Debug)]
pub(crate) struct VolumeClaim {
    name: String,
    size_gb: f64,
    storage_class: Option<String>,
    subpath_counter: u32,
}

impl VolumeClaim {
    pub(crate) fn new(task_name: &str, size_gb: Option<f64>, storage_class: Option<String>) -> Self {
        Self {
            name: pvc_name(task_name),
            size_gb: size_gb.unwrap_or(DEFAULT_DISK_GB),
            storage_class,
            subpath_counter: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Next unused subdirectory of the volume.
    pub(crate) fn next_subpath(&mut self) -> String {
        let subpath = format!("dir{}", self.subpath_counter);
        self.subpath_counter += 1;
        subpath
    }

    fn manifest(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(format!("{}Gi", self.size_gb)),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: self.storage_class.clone(),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Creates the claim, tolerating an earlier or concurrent creation of
    /// the same name. Either way the returned object is the live claim.
    #[instrument("create_pvc", skip(self, api), fields(pvc_name = %self.name))]
    pub(crate) async fn create<P: PvcApi>(
        &self,
        api: &P,
    ) -> Result<PersistentVolumeClaim, SpannedErr<kube::Error>> {
        match api.create_pvc(&self.manifest()).await {
            Ok(created) => {
                info!("Volume claim '{}' created ({} Gi).", self.name, self.size_gb);
                Ok(created)
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                warn!(
                    "Volume claim '{}' already exists. Adopting the live object...",
                    self.name
                );
                api.get_pvc(&self.name).await.with_span_trace()
            }
            Err(e) => Err(e).with_span_trace(),
        }
    }

    /// Unconditional; only called once the outputs are safely uploaded.
    #[instrument("delete_pvc", skip(self, api), fields(pvc_name = %self.name))]
    pub(crate) async fn delete<P: PvcApi>(&self, api: &P) -> Result<(), SpannedErr<kube::Error>> {
        api.delete_pvc(&self.name).await.with_span_trace()?;
        info!("Volume claim '{}' deleted.", self.name);
        Ok(())
    }
}
