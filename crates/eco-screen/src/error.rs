use eco_core::{Domain, ExportError, GeoError, ServiceError};
use thiserror::Error;

/// Failures of a screening pipeline call. Per-domain service failures are
/// not errors here; they are reported inside the screening report.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error(transparent)]
    InvalidInput(#[from] GeoError),
    #[error("domain {0} is not configured")]
    DomainNotConfigured(Domain),
    #[error("map export is not configured")]
    ExportNotConfigured,
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("service setup failed: {0}")]
    Setup(#[from] ServiceError),
}
