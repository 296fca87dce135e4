//! Export (print) service: submission, status polling and artifact download.

use chrono::Utc;
use eco_core::{ExportError, ExportJob, ExportJobSpec, ExportStatus, ServiceError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::esri;

const OUTPUT_PARAM: &str = "Output_File";

/// What the service said in response to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Rendered synchronously; the artifact URL is already known.
    Completed { job_id: String, result_url: String },
    /// Queued; poll `job_id` for completion.
    Queued { job_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Succeeded,
    Failed,
    /// Any other reported state (`esriJobSubmitted`, `esriJobExecuting`, ...).
    Pending,
}

impl RemoteState {
    pub fn from_esri(status: &str) -> Self {
        match status {
            "esriJobSucceeded" => RemoteState::Succeeded,
            "esriJobFailed" | "esriJobCancelled" => RemoteState::Failed,
            _ => RemoteState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJobStatus {
    pub state: RemoteState,
    pub result_url: Option<String>,
    pub message: Option<String>,
}

/// Remote export service operations. Implemented over HTTP below and by
/// scripted doubles in tests.
pub trait ExportBackend: Send + Sync {
    fn submit(
        &self,
        spec: &ExportJobSpec,
    ) -> impl Future<Output = Result<Submission, ServiceError>> + Send;

    fn job_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<RemoteJobStatus, ServiceError>> + Send;

    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// `execute` endpoint; result returned in the response.
    #[default]
    Sync,
    /// `submitJob` endpoint; result obtained by polling.
    Async,
}

impl std::str::FromStr for ExportMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" | "execute" => Ok(ExportMode::Sync),
            "async" | "submitjob" => Ok(ExportMode::Async),
            other => Err(format!("unknown export mode: {other}")),
        }
    }
}

/// HTTP backend for an ArcGIS "Export Web Map" geoprocessing task.
#[derive(Clone)]
pub struct HttpExportBackend {
    client: Client,
    task_url: String,
    mode: ExportMode,
}

impl HttpExportBackend {
    pub fn new(
        task_url: impl Into<String>,
        mode: ExportMode,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ServiceError::unavailable(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            task_url: task_url.into().trim_end_matches('/').to_string(),
            mode,
        })
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    async fn get_json(&self, url: &str) -> Result<Value, ServiceError> {
        let response = self
            .client
            .get(url)
            .query(&[("f", "json")])
            .send()
            .await
            .map_err(|err| ServiceError::unavailable(format!("export status request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::unavailable(format!(
                "export status request failed: {} {}",
                status, body
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| ServiceError::malformed(format!("export status is not JSON: {err}")))
    }

    /// Follow `results.Output_File.paramUrl` to the output URL.
    async fn resolve_output(&self, job_id: &str, payload: &Value) -> Result<Option<String>, ServiceError> {
        let Some(param_url) = payload
            .get("results")
            .and_then(|r| r.get(OUTPUT_PARAM))
            .and_then(|p| p.get("paramUrl"))
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let url = format!("{}/jobs/{}/{}", self.task_url, job_id, param_url);
        let result = self.get_json(&url).await?;
        Ok(output_url_from_value(&result))
    }
}

fn output_url_from_value(result: &Value) -> Option<String> {
    result
        .get("value")
        .and_then(|v| v.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Interpret a submission response: `{results: [{paramName, value: {url}}]}`
/// or `{jobId}`.
pub fn parse_submission(payload: &Value) -> Result<Submission, ServiceError> {
    if let Some(err) = esri::error_payload(payload) {
        return Err(err);
    }
    if let Some(results) = payload.get("results").and_then(Value::as_array) {
        let url = results
            .iter()
            .find(|r| r.get("paramName").and_then(Value::as_str) == Some(OUTPUT_PARAM))
            .and_then(output_url_from_value)
            .ok_or_else(|| ServiceError::malformed("export results carry no Output_File url"))?;
        return Ok(Submission::Completed {
            job_id: format!("sync-{}", Utc::now().timestamp_millis()),
            result_url: url,
        });
    }
    if let Some(job_id) = payload.get("jobId").and_then(Value::as_str) {
        return Ok(Submission::Queued {
            job_id: job_id.to_string(),
        });
    }
    Err(ServiceError::malformed(
        "export response has neither results nor jobId",
    ))
}

fn job_message(payload: &Value) -> Option<String> {
    payload
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.last())
        .and_then(|m| m.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl ExportBackend for HttpExportBackend {
    async fn submit(&self, spec: &ExportJobSpec) -> Result<Submission, ServiceError> {
        let endpoint = match self.mode {
            ExportMode::Sync => "execute",
            ExportMode::Async => "submitJob",
        };
        let url = format!("{}/{}", self.task_url, endpoint);
        let form = [
            ("Web_Map_as_JSON", spec.web_map_json().to_string()),
            ("Format", spec.format.as_param().to_string()),
            ("Layout_Template", spec.layout_template.clone()),
            ("f", "json".to_string()),
        ];
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|err| ServiceError::unavailable(format!("export submission failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::unavailable(format!(
                "export submission failed: {} {}",
                status, body
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| ServiceError::malformed(format!("export response is not JSON: {err}")))?;
        parse_submission(&payload)
    }

    async fn job_status(&self, job_id: &str) -> Result<RemoteJobStatus, ServiceError> {
        let url = format!("{}/jobs/{}", self.task_url, job_id);
        let payload = self.get_json(&url).await?;
        if let Some(err) = esri::error_payload(&payload) {
            return Err(err);
        }
        let status = payload
            .get("jobStatus")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::malformed("job status response has no jobStatus"))?;
        let state = RemoteState::from_esri(status);
        let result_url = if state == RemoteState::Succeeded {
            self.resolve_output(job_id, &payload).await?
        } else {
            None
        };
        Ok(RemoteJobStatus {
            state,
            result_url,
            message: job_message(&payload),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ServiceError::unavailable(format!("artifact download failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::unavailable(format!(
                "artifact download failed: {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ServiceError::unavailable(format!("artifact download interrupted: {err}")))?;
        Ok(bytes.to_vec())
    }
}

/// Point in time after which polling stops.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Drives an export job through submit, poll and download.
pub struct ExportOrchestrator<B> {
    backend: B,
}

impl<B: ExportBackend> ExportOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Submit a job. A synchronous answer produces an already-succeeded job.
    pub async fn submit(&self, spec: &ExportJobSpec) -> Result<ExportJob, ExportError> {
        let submission = self
            .backend
            .submit(spec)
            .await
            .map_err(ExportError::Submission)?;
        match submission {
            Submission::Completed { job_id, result_url } => {
                let mut job = ExportJob::submitted(job_id);
                job.succeed(result_url)?;
                tracing::info!(job_id = %job.id, "export completed synchronously");
                Ok(job)
            }
            Submission::Queued { job_id } => {
                tracing::info!(job_id = %job_id, "export job queued");
                Ok(ExportJob::submitted(job_id))
            }
        }
    }

    /// Poll until the job reaches a terminal state or `deadline` passes.
    ///
    /// Failed status requests are logged and polling continues; the deadline
    /// is the only bound. Returns `Ok` only when the job succeeded.
    pub async fn poll(
        &self,
        job: &mut ExportJob,
        interval: Duration,
        deadline: &Deadline,
    ) -> Result<(), ExportError> {
        let started = Instant::now();
        if let Some(result) = terminal_outcome(job) {
            return result;
        }
        job.advance(ExportStatus::Running)?;

        loop {
            if deadline.has_passed() {
                job.advance(ExportStatus::TimedOut)?;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(job_id = %job.id, elapsed_ms, "export job timed out");
                return Err(ExportError::TimedOut {
                    job_id: job.id.clone(),
                    elapsed_ms,
                });
            }

            match timeout_at(deadline.instant(), self.backend.job_status(&job.id)).await {
                Ok(Ok(status)) => match status.state {
                    RemoteState::Succeeded => {
                        match status.result_url {
                            Some(url) => job.succeed(url)?,
                            None => job.fail("job succeeded without an Output_File url")?,
                        }
                        if let Some(result) = terminal_outcome(job) {
                            return result;
                        }
                    }
                    RemoteState::Failed => {
                        job.fail(
                            status
                                .message
                                .unwrap_or_else(|| "export job failed".to_string()),
                        )?;
                        if let Some(result) = terminal_outcome(job) {
                            return result;
                        }
                    }
                    RemoteState::Pending => {
                        tracing::debug!(job_id = %job.id, "export job still running");
                    }
                },
                Ok(Err(err)) => {
                    tracing::warn!(job_id = %job.id, error = %err, "export status request failed");
                }
                // Deadline reached mid-request; handled at the top of the loop.
                Err(_) => continue,
            }

            let wake = (Instant::now() + interval).min(deadline.instant());
            sleep_until(wake).await;
        }
    }

    /// Download the artifact of a succeeded job.
    pub async fn download(&self, job: &ExportJob) -> Result<Vec<u8>, ExportError> {
        let url = match (job.status(), job.result_url.as_deref()) {
            (ExportStatus::Succeeded, Some(url)) => url,
            (status, _) => {
                return Err(ExportError::ArtifactUnavailable {
                    job_id: job.id.clone(),
                    status,
                })
            }
        };
        let bytes = self
            .backend
            .fetch(url)
            .await
            .map_err(ExportError::Download)?;
        tracing::info!(job_id = %job.id, bytes = bytes.len(), "export artifact downloaded");
        Ok(bytes)
    }

    /// Submit, poll if needed, and download.
    pub async fn run(
        &self,
        spec: &ExportJobSpec,
        interval: Duration,
        deadline: &Deadline,
    ) -> Result<Vec<u8>, ExportError> {
        let mut job = self.submit(spec).await?;
        self.poll(&mut job, interval, deadline).await?;
        self.download(&job).await
    }
}

fn terminal_outcome(job: &ExportJob) -> Option<Result<(), ExportError>> {
    match job.status() {
        ExportStatus::Succeeded => Some(Ok(())),
        ExportStatus::Failed => Some(Err(ExportError::JobFailed {
            job_id: job.id.clone(),
            message: job.error.clone().unwrap_or_default(),
        })),
        ExportStatus::TimedOut => Some(Err(ExportError::TimedOut {
            job_id: job.id.clone(),
            elapsed_ms: 0,
        })),
        ExportStatus::Submitted | ExportStatus::Running => None,
    }
}
