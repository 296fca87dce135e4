//! Feature service abstraction.
//!
//! The search engine only talks to remote layers through this trait, so
//! tests can substitute in-memory sources for the HTTP client.

use std::future::Future;

use crate::error::ServiceError;
use crate::models::{Feature, Geometry};

/// A queryable layer of a remote geospatial feature service.
pub trait FeatureSource: Send + Sync {
    /// Layer name used for logging and for tagging returned features.
    fn name(&self) -> &str;

    /// Return every feature intersecting `geometry`. One request per call.
    fn query_intersecting(
        &self,
        geometry: &Geometry,
        out_fields: &[String],
    ) -> impl Future<Output = Result<Vec<Feature>, ServiceError>> + Send;

    /// Count features intersecting `geometry` without fetching them.
    fn count_intersecting(
        &self,
        geometry: &Geometry,
    ) -> impl Future<Output = Result<u64, ServiceError>> + Send;
}
