//! Run-to-completion handle over a single Kubernetes `Job`.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::{debug, error, info, instrument, trace, warn};

use super::MANAGER_ROLE_NAME;
use crate::error::{SpannedErr, SpannedExt};

/// Lifecycle of a submitted job. Terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    /// Built but not submitted yet.
    Initialized,
    /// Live on the cluster without a terminal condition.
    Running,
    /// Condition `Complete=True` observed.
    Complete,
    /// Condition `Failed=True` observed.
    Failed,
    /// No terminal condition where one was expected. Transient while
    /// polling continues, final when the pod watchdog gave up.
    Error,
    /// Deleted on request before reaching a terminal condition.
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initialized => "Initialized",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        })
    }
}

/// What a single status poll concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Final answer, stop polling.
    Settled,
    /// Nothing terminal yet, poll again after the interval.
    InFlight,
}

/// Cluster operations the handle needs, factored out so the state machine
/// can run against a scripted stand-in.
pub(crate) trait BatchApi {
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error>;
    async fn get_job(&self, name: &str) -> Result<Job, kube::Error>;
    async fn delete_job(&self, name: &str) -> Result<(), kube::Error>;
    async fn list_job_pods(&self, job_name: &str) -> Result<Vec<Pod>, kube::Error>;
}

/// The live `BatchApi`, bound to one namespace.
pub(crate) struct KubeBatch {
    jobs: Api<Job>,
    pods: Api<Pod>,
}

impl KubeBatch {
    pub(crate) fn new(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
        }
    }
}

impl BatchApi for KubeBatch {
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        let params = PostParams {
            field_manager: Some(MANAGER_ROLE_NAME.to_string()),
            ..Default::default()
        };
        self.jobs.create(&params, job).await
    }

    async fn get_job(&self, name: &str) -> Result<Job, kube::Error> {
        self.jobs.get(name).await
    }

    async fn delete_job(&self, name: &str) -> Result<(), kube::Error> {
        self.jobs
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
    }

    async fn list_job_pods(&self, job_name: &str) -> Result<Vec<Pod>, kube::Error> {
        let params = ListParams::default().labels(&format!("job-name={job_name}"));
        Ok(self.pods.list(&params).await?.items)
    }
}

/// One Kubernetes `Job` owned by this process, from submission to its
/// terminal state.
#[derive(Debug)]
pub(crate) struct JobHandle {
    name: String,
    body: Job,
    state: JobState,
    pod_timeout: Duration,
}

impl JobHandle {
    pub(crate) fn new(name: impl Into<String>, body: Job, pod_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            body,
            state: JobState::Initialized,
            pod_timeout,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    /// Creates the job on the cluster. A 409 means an earlier incarnation
    /// of this process already created it, so the live object is adopted
    /// instead; submission stays idempotent either way.
    #[instrument("submit_job", skip(self, api), fields(job_name = %self.name))]
    pub(crate) async fn submit<B: BatchApi>(&mut self, api: &B) -> Result<(), SpannedErr<kube::Error>> {
        match api.create_job(&self.body).await {
            Ok(created) => {
                info!("Job '{}' created.", self.name);
                self.body = created;
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                warn!("Job '{}' already exists. Adopting the live object...", self.name);
                self.body = api.get_job(&self.name).await.with_span_trace()?;
            }
            Err(e) => return Err(e).with_span_trace(),
        }
        self.state = JobState::Running;
        Ok(())
    }

    /// Reads the job status once and advances the state machine.
    ///
    /// Jobs already settled are not read again. A job without conditions is
    /// still running and gets the pod watchdog check; a job with only
    /// non-terminal conditions counts as a transient error and is re-polled.
    #[instrument("poll_job", skip(self, api), fields(job_name = %self.name))]
    pub(crate) async fn poll<B: BatchApi>(&mut self, api: &B) -> Result<PollOutcome, SpannedErr<kube::Error>> {
        if matches!(
            self.state,
            JobState::Complete | JobState::Failed | JobState::Cancelled
        ) {
            return Ok(PollOutcome::Settled);
        }

        let job = api.get_job(&self.name).await.with_span_trace()?;
        let conditions = job
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_deref())
            .unwrap_or_default();

        if conditions.is_empty() {
            self.state = JobState::Running;
            if self.pod_schedule_overdue(&job, api).await? {
                self.state = JobState::Error;
                return Ok(PollOutcome::Settled);
            }
            return Ok(PollOutcome::InFlight);
        }

        if conditions
            .iter()
            .any(|c| c.type_ == "Complete" && c.status == "True")
        {
            info!("Job '{}' completed.", self.name);
            self.state = JobState::Complete;
            return Ok(PollOutcome::Settled);
        }
        if conditions
            .iter()
            .any(|c| c.type_ == "Failed" && c.status == "True")
        {
            warn!("Job '{}' failed.", self.name);
            self.state = JobState::Failed;
            return Ok(PollOutcome::Settled);
        }

        debug!(
            "Job '{}' reported only non-terminal conditions. Polling again...",
            self.name
        );
        self.state = JobState::Error;
        Ok(PollOutcome::InFlight)
    }

    /// True when the job is past its pod timeout with a pod stuck on an
    /// unpullable image. Kubernetes retries the pull forever, so the
    /// polling loop would otherwise spin just as long.
    async fn pod_schedule_overdue<B: BatchApi>(
        &self,
        job: &Job,
        api: &B,
    ) -> Result<bool, SpannedErr<kube::Error>> {
        let Some(created) = job.metadata.creation_timestamp.as_ref() else {
            return Ok(false);
        };
        if elapsed_since(created) <= self.pod_timeout {
            return Ok(false);
        }

        trace!(
            "Job '{}' exceeded the pod timeout. Inspecting its pods...",
            self.name
        );
        let pods = api.list_job_pods(&self.name).await.with_span_trace()?;
        for pod in &pods {
            if !pod_pending_longer_than(pod, self.pod_timeout) {
                continue;
            }
            if let Some(reason) = image_pull_backoff_reason(pod) {
                error!(
                    "Pod '{}' of job '{}' cannot pull its image ({reason}). Giving up on the job.",
                    pod_name(pod),
                    self.name
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Best effort. Deletion runs on cancellation and rollback paths where
    /// a failure to delete must not mask the original outcome.
    #[instrument("delete_job", skip(self, api), fields(job_name = %self.name))]
    pub(crate) async fn delete<B: BatchApi>(&self, api: &B) {
        match api.delete_job(&self.name).await {
            Ok(()) => info!("Job '{}' deleted.", self.name),
            Err(e) => warn!("Failed to delete job '{}': {e}", self.name),
        }
    }

    /// Submits the job and polls until it settles.
    ///
    /// `is_cancelled` is consulted once per loop turn, before sleeping.
    /// Cancellation deletes the job without reading its status again.
    #[instrument("run_job", skip_all, fields(job_name = %self.name))]
    pub(crate) async fn run_to_completion<B, F>(
        &mut self,
        api: &B,
        poll_interval: Duration,
        is_cancelled: F,
    ) -> Result<JobState, SpannedErr<kube::Error>>
    where
        B: BatchApi,
        F: Fn() -> bool,
    {
        self.submit(api).await?;

        info!(
            "Waiting for job '{}' to finish, polling every {} seconds...",
            self.name,
            poll_interval.as_secs()
        );
        let mut wait_duration = 0;
        loop {
            if is_cancelled() {
                info!("Cancellation requested. Deleting job '{}'...", self.name);
                self.delete(api).await;
                self.state = JobState::Cancelled;
                break;
            }
            tokio::time::sleep(poll_interval).await;
            wait_duration += poll_interval.as_secs();
            match self.poll(api).await? {
                PollOutcome::Settled => break,
                PollOutcome::InFlight => {
                    trace!(
                        "Job '{}' still in flight after {} seconds.",
                        self.name, wait_duration
                    );
                }
            }
        }
        info!(
            "Job '{}' settled in state {} after {} seconds.",
            self.name, self.state, wait_duration
        );
        Ok(self.state)
    }
}

fn elapsed_since(t: &Time) -> Duration {
    (Utc::now() - t.0).to_std().unwrap_or_default()
}

fn pod_pending_longer_than(pod: &Pod, timeout: Duration) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Pending") {
        return false;
    }
    let Some(started) = status.start_time.as_ref() else {
        return false;
    };
    elapsed_since(started) > timeout
}

fn image_pull_backoff_reason(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
        .find(|reason| *reason == "ImagePullBackOff")
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unnamed>")
}
