//! eco-arcgis - ArcGIS REST collaborators
//!
//! Feature layer queries and the export (print) job lifecycle.

pub mod client;
pub mod esri;
pub mod export;

pub use client::{FeatureServiceClient, DEFAULT_QUERY_TIMEOUT};
pub use export::{
    Deadline, ExportBackend, ExportMode, ExportOrchestrator, HttpExportBackend, RemoteJobStatus,
    RemoteState, Submission,
};
