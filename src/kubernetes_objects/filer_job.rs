//! Transfer Jobs and the mount layout they share with executors.
//!
//! A filer runs before the executors (downloading inputs) or after them
//! (uploading outputs). It receives the transfer direction and the task
//! document as plain process arguments and works the task volume through
//! the same mounts the executors see.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::warn;

use super::volume_claim::VolumeClaim;
use super::{TASK_ID_LABEL, TASK_VOLUME_NAME, inputs_filer_name, outputs_filer_name};
use crate::config::FilerConfig;
use crate::tes::{TesFileType, TesInput, TesOutput};

/// Transfer direction a filer Job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransputKind {
    Inputs,
    Outputs,
}

impl TransputKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
        }
    }
}

impl std::fmt::Display for TransputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The distinct directories a task reads or writes, one mount each.
///
/// Declared volumes mount as given. A FILE transfer needs its parent
/// directory present, a DIRECTORY transfer the directory itself. Every
/// directory appears once no matter how many transfers share it, and each
/// gets its own subdirectory of the claim.
pub(crate) fn generate_mounts(
    inputs: &[TesInput],
    outputs: &[TesOutput],
    volumes: &[String],
    claim: &mut VolumeClaim,
) -> Vec<VolumeMount> {
    let mut mounts: Vec<VolumeMount> = Vec::new();
    for volume in volumes {
        push_mount(&mut mounts, claim, volume.clone());
    }
    for input in inputs {
        push_mount(&mut mounts, claim, mount_dir(&input.path, input.type_));
    }
    for output in outputs {
        push_mount(&mut mounts, claim, mount_dir(&output.path, output.type_));
    }
    mounts
}

fn push_mount(mounts: &mut Vec<VolumeMount>, claim: &mut VolumeClaim, dir: String) {
    if mounts.iter().any(|mount| mount.mount_path == dir) {
        return;
    }
    mounts.push(VolumeMount {
        name: TASK_VOLUME_NAME.to_string(),
        mount_path: dir,
        sub_path: Some(claim.next_subpath()),
        ..Default::default()
    });
}

fn mount_dir(path: &str, type_: TesFileType) -> String {
    match type_ {
        TesFileType::File => parent_dir(path),
        TesFileType::Directory => path.to_string(),
    }
}

fn parent_dir(path: &str) -> String {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => "/".to_string(),
    }
}

/// Builds the Job carrying one transfer direction of the task.
///
/// `payload_json` is the task document minus its executors; the filer
/// parses it on its own.
pub(crate) fn filer_job(
    task_name: &str,
    kind: TransputKind,
    payload_json: String,
    filer: &FilerConfig,
    claim_name: &str,
    mounts: &[VolumeMount],
) -> Job {
    let name = match kind {
        TransputKind::Inputs => inputs_filer_name(task_name),
        TransputKind::Outputs => outputs_filer_name(task_name),
    };
    let labels = BTreeMap::from([(TASK_ID_LABEL.to_string(), task_name.to_string())]);

    let mut job = Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(filer.backoff_limit.unwrap_or(0)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.clone()),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name,
                        image: Some(filer.image.clone()),
                        image_pull_policy: Some(filer.image_pull_policy.as_str().to_string()),
                        args: Some(vec![kind.as_str().to_string(), payload_json]),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };
    attach_task_volume(&mut job, claim_name, mounts);
    job
}

/// Mounts the task volume into the job's first container and registers the
/// claim in the pod spec. Mounts and volumes already present stay as they
/// are.
pub(crate) fn attach_task_volume(job: &mut Job, claim_name: &str, mounts: &[VolumeMount]) {
    let Some(pod_spec) = job
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    else {
        warn!(
            "Job '{}' has no pod spec to attach the task volume to.",
            job.metadata.name.as_deref().unwrap_or("<unnamed>")
        );
        return;
    };
    if let Some(container) = pod_spec.containers.first_mut() {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(mounts.iter().cloned());
    }
    pod_spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: TASK_VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: Some(false),
        }),
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use crate::config::ImagePullPolicy;

    use super::*;

    fn file_input(path: &str) -> TesInput {
        TesInput {
            url: Some(format!("s3://bucket{path}")),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn filer_config() -> FilerConfig {
        FilerConfig {
            image: "ghcr.io/example/task-filer:1.4".to_string(),
            image_pull_policy: ImagePullPolicy::IfNotPresent,
            backoff_limit: None,
        }
    }

    #[test]
    fn mounts_are_deduplicated_per_directory() {
        let mut claim = VolumeClaim::new("task-1", Some(1.0), None);
        let inputs = vec![
            file_input("/data/in/file1.txt"),
            file_input("/data/in/file2.txt"),
            TesInput {
                url: Some("s3://bucket/dir".to_string()),
                path: "/data/dir".to_string(),
                type_: TesFileType::Directory,
                ..Default::default()
            },
        ];
        let outputs = vec![TesOutput {
            url: "s3://bucket/out/result.txt".to_string(),
            path: "/data/out/result.txt".to_string(),
            ..Default::default()
        }];
        let volumes = vec!["/vol1".to_string()];

        let mounts = generate_mounts(&inputs, &outputs, &volumes, &mut claim);

        let layout: Vec<(&str, &str)> = mounts
            .iter()
            .map(|m| (m.mount_path.as_str(), m.sub_path.as_deref().unwrap()))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("/vol1", "dir0"),
                ("/data/in", "dir1"),
                ("/data/dir", "dir2"),
                ("/data/out", "dir3"),
            ]
        );
        assert!(mounts.iter().all(|m| m.name == TASK_VOLUME_NAME));
    }

    #[test]
    fn file_at_the_root_mounts_the_root() {
        assert_eq!(parent_dir("/result.txt"), "/");
        assert_eq!(parent_dir("/data/in/file.txt"), "/data/in");
    }

    #[test]
    fn filer_job_carries_direction_payload_and_labels() {
        let mut claim = VolumeClaim::new("task-1", Some(1.0), None);
        let inputs = vec![file_input("/data/in/file1.txt")];
        let mounts = generate_mounts(&inputs, &[], &[], &mut claim);

        let job = filer_job(
            "task-1",
            TransputKind::Inputs,
            r#"{"inputs":[]}"#.to_string(),
            &filer_config(),
            claim.name(),
            &mounts,
        );

        assert_eq!(job.metadata.name.as_deref(), Some("task-1-inputs-filer"));
        assert_eq!(
            job.metadata.labels.as_ref().unwrap()[TASK_ID_LABEL],
            "task-1"
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod_meta = spec.template.metadata.unwrap();
        assert_eq!(pod_meta.labels.as_ref().unwrap()[TASK_ID_LABEL], "task-1");

        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        let container = &pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("ghcr.io/example/task-filer:1.4"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec!["inputs".to_string(), r#"{"inputs":[]}"#.to_string()]
        );
        assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 1);

        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, TASK_VOLUME_NAME);
        assert_eq!(
            volume
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "task-1-pvc"
        );
    }

    #[test]
    fn configured_backoff_limit_overrides_the_default() {
        let mut config = filer_config();
        config.backoff_limit = Some(2);
        let job = filer_job(
            "task-1",
            TransputKind::Outputs,
            String::new(),
            &config,
            "task-1-pvc",
            &[],
        );
        assert_eq!(job.spec.unwrap().backoff_limit, Some(2));
        assert_eq!(job.metadata.name.as_deref(), Some("task-1-outputs-filer"));
    }

    #[test]
    fn attaching_the_task_volume_preserves_existing_mounts() {
        let mut job = Job {
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".to_string(),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "scratch".to_string(),
                                mount_path: "/scratch".to_string(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        let mounts = vec![
            VolumeMount {
                name: TASK_VOLUME_NAME.to_string(),
                mount_path: "/data/in".to_string(),
                sub_path: Some("dir0".to_string()),
                ..Default::default()
            },
            VolumeMount {
                name: TASK_VOLUME_NAME.to_string(),
                mount_path: "/data/out".to_string(),
                sub_path: Some("dir1".to_string()),
                ..Default::default()
            },
        ];

        attach_task_volume(&mut job, "task-1-pvc", &mounts);

        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        let mount_paths: Vec<&str> = pod_spec.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(mount_paths, vec!["/scratch", "/data/in", "/data/out"]);
        assert_eq!(pod_spec.volumes.as_ref().unwrap().len(), 1);
    }
}
