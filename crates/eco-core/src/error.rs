//! Error types shared across the screening pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::ExportStatus;

/// Input validation failures. These abort before any network call is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid coordinate: longitude {lon}, latitude {lat}")]
    InvalidCoordinate { lon: f64, lat: f64 },
    #[error("invalid radii schedule: {0}")]
    InvalidSchedule(String),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// Network failure, timeout or non-2xx status.
    Unavailable,
    /// The service answered with an `{error: {...}}` payload. An outage for
    /// the layer even though the HTTP status was 200.
    Fault,
    /// Successful response that is missing the expected fields.
    Malformed,
}

/// Failure reported by a remote feature or export service.
///
/// Returned as a value so that one failing layer can be recorded next to
/// the results of its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {detail}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub detail: String,
}

impl ServiceError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Unavailable,
            detail: detail.into(),
        }
    }

    pub fn fault(detail: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Fault,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Malformed,
            detail: detail.into(),
        }
    }

    /// Whether the layer could not answer at all. Only a malformed
    /// response is survivable as an empty step.
    pub fn is_outage(&self) -> bool {
        matches!(self.kind, ServiceErrorKind::Unavailable | ServiceErrorKind::Fault)
    }
}

/// Failures surfaced by the export job orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExportError {
    #[error("export submission failed: {0}")]
    Submission(ServiceError),
    #[error("export job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("export job {job_id} timed out after {elapsed_ms} ms")]
    TimedOut { job_id: String, elapsed_ms: u64 },
    #[error("artifact for job {job_id} unavailable (status {status:?})")]
    ArtifactUnavailable { job_id: String, status: ExportStatus },
    #[error("artifact download failed: {0}")]
    Download(ServiceError),
    #[error("illegal export job transition {from:?} -> {to:?}")]
    InvalidTransition { from: ExportStatus, to: ExportStatus },
}
