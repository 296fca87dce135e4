//! Environmental constraint screening service layer.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use batch::{BatchCoordinator, BatchOptions, BatchOutcome, BatchSummary, ItemStatus, Location};
pub use config::Config;
pub use error::ScreenError;
pub use pipeline::{ArtifactRequest, MapOverrides, Screener, ScreeningReport};
pub use registry::{ExportSettings, ServiceRegistry};
