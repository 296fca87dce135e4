//! Progressive spatial search.
//!
//! Query the point itself, then expand through an ascending radii schedule
//! until something is found, the schedule is exhausted, or the service
//! becomes unavailable. Retrying is left to callers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{GeoError, ServiceError};
use crate::geodesic::{buffer_polygon, nearest_point};
use crate::models::{Coordinate, Feature, Geometry, NearbyFeature, SearchResult, TerminationReason};
use crate::source::FeatureSource;

const DEFAULT_BUFFER_SEGMENTS: usize = 32;

/// Strictly ascending, positive search radii in miles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct RadiiSchedule(Vec<f64>);

impl RadiiSchedule {
    pub fn new(radii: Vec<f64>) -> Result<Self, GeoError> {
        if radii.is_empty() {
            return Err(GeoError::InvalidSchedule("schedule is empty".to_string()));
        }
        if let Some(bad) = radii.iter().find(|r| !r.is_finite() || **r <= 0.0) {
            return Err(GeoError::InvalidSchedule(format!(
                "radius {bad} is not a positive distance"
            )));
        }
        if radii.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(GeoError::InvalidSchedule(
                "radii must be strictly ascending".to_string(),
            ));
        }
        Ok(Self(radii))
    }

    pub fn radii(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> f64 {
        self.0[0]
    }

    pub fn max(&self) -> f64 {
        self.0[self.0.len() - 1]
    }
}

impl TryFrom<Vec<f64>> for RadiiSchedule {
    type Error = GeoError;

    fn try_from(radii: Vec<f64>) -> Result<Self, Self::Error> {
        RadiiSchedule::new(radii)
    }
}

impl From<RadiiSchedule> for Vec<f64> {
    fn from(schedule: RadiiSchedule) -> Self {
        schedule.0
    }
}

/// How radius-expansion queries are issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    /// Issue radius n+1 only when radius n came back empty.
    #[default]
    Sequential,
    /// Issue every radius at once and keep the smallest non-empty one.
    /// Lower latency, more requests.
    Concurrent,
}

/// Per-layer search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub schedule: RadiiSchedule,
    #[serde(default)]
    pub out_fields: Vec<String>,
    /// Run one buffer query at the first radius even when the point itself
    /// intersects, to list surrounding features.
    #[serde(default)]
    pub context_search: bool,
    #[serde(default = "default_buffer_segments")]
    pub buffer_segments: usize,
    #[serde(default)]
    pub strategy: ExpansionStrategy,
}

fn default_buffer_segments() -> usize {
    DEFAULT_BUFFER_SEGMENTS
}

impl SearchPlan {
    pub fn new(schedule: RadiiSchedule) -> Self {
        Self {
            schedule,
            out_fields: Vec::new(),
            context_search: false,
            buffer_segments: DEFAULT_BUFFER_SEGMENTS,
            strategy: ExpansionStrategy::Sequential,
        }
    }
}

/// Outcome of a single expansion step after error classification.
enum Step {
    Found(Vec<Feature>),
    Empty,
    Unavailable(ServiceError),
}

fn classify(
    outcome: Result<Vec<Feature>, ServiceError>,
    label: &str,
    warnings: &mut Vec<String>,
) -> Step {
    match outcome {
        Ok(features) if !features.is_empty() => Step::Found(features),
        Ok(_) => Step::Empty,
        Err(err) if err.is_outage() => Step::Unavailable(err),
        Err(err) => {
            // Malformed payloads count as zero features at this step.
            warnings.push(format!("{label}: {}", err.detail));
            Step::Empty
        }
    }
}

/// Run a progressive search for `point` against one layer.
pub async fn search<S: FeatureSource>(
    point: Coordinate,
    plan: &SearchPlan,
    source: &S,
) -> SearchResult {
    let mut warnings = Vec::new();
    let mut queries_issued = 1usize;

    let at_point = source
        .query_intersecting(&Geometry::point(point), &plan.out_fields)
        .await;
    match classify(at_point, "point query", &mut warnings) {
        Step::Found(features) => {
            return found_at_point(point, plan, source, features, warnings, queries_issued).await;
        }
        Step::Empty => {}
        Step::Unavailable(err) => {
            return service_error(point, 0.0, warnings, err, queries_issued, source);
        }
    }

    let radii = plan.schedule.radii();
    let buffers: Vec<Geometry> = radii
        .iter()
        .map(|radius| buffer_polygon(point, *radius, plan.buffer_segments))
        .collect();

    let mut last_clear_radius = 0.0;
    match plan.strategy {
        ExpansionStrategy::Sequential => {
            for (radius, buffer) in radii.iter().copied().zip(&buffers) {
                queries_issued += 1;
                let outcome = source.query_intersecting(buffer, &plan.out_fields).await;
                let label = format!("buffer query at {radius} mi");
                match classify(outcome, &label, &mut warnings) {
                    Step::Found(features) => {
                        return found_in_radius(point, radius, features, warnings, queries_issued, source);
                    }
                    Step::Empty => last_clear_radius = radius,
                    Step::Unavailable(err) => {
                        return service_error(
                            point,
                            last_clear_radius,
                            warnings,
                            err,
                            queries_issued,
                            source,
                        );
                    }
                }
            }
        }
        ExpansionStrategy::Concurrent => {
            queries_issued += buffers.len();
            let outcomes = futures::future::join_all(
                buffers
                    .iter()
                    .map(|buffer| source.query_intersecting(buffer, &plan.out_fields)),
            )
            .await;
            for (radius, outcome) in radii.iter().copied().zip(outcomes) {
                let label = format!("buffer query at {radius} mi");
                match classify(outcome, &label, &mut warnings) {
                    Step::Found(features) => {
                        return found_in_radius(point, radius, features, warnings, queries_issued, source);
                    }
                    Step::Empty => last_clear_radius = radius,
                    Step::Unavailable(err) => {
                        return service_error(
                            point,
                            last_clear_radius,
                            warnings,
                            err,
                            queries_issued,
                            source,
                        );
                    }
                }
            }
        }
    }

    tracing::debug!(
        layer = source.name(),
        %point,
        radius = plan.schedule.max(),
        "no features within search schedule"
    );
    SearchResult {
        query_point: point,
        radius_miles_used: plan.schedule.max(),
        features_at_point: Vec::new(),
        nearby_features: Vec::new(),
        terminated_reason: TerminationReason::MaxRadiusReached,
        warnings,
        error: None,
        queries_issued,
    }
}

async fn found_at_point<S: FeatureSource>(
    point: Coordinate,
    plan: &SearchPlan,
    source: &S,
    features: Vec<Feature>,
    mut warnings: Vec<String>,
    mut queries_issued: usize,
) -> SearchResult {
    let mut radius_miles_used = 0.0;
    let mut nearby_features = Vec::new();

    if plan.context_search {
        let radius = plan.schedule.first();
        let buffer = buffer_polygon(point, radius, plan.buffer_segments);
        queries_issued += 1;
        match source.query_intersecting(&buffer, &plan.out_fields).await {
            Ok(context) => {
                nearby_features = rank_by_distance(point, radius, context, &mut warnings);
                radius_miles_used = radius;
            }
            // Supplementary only: the at-point finding stands.
            Err(err) => warnings.push(format!("context query at {radius} mi: {err}")),
        }
    }

    tracing::debug!(
        layer = source.name(),
        %point,
        count = features.len(),
        "features intersect query point"
    );
    SearchResult {
        query_point: point,
        radius_miles_used,
        features_at_point: features,
        nearby_features,
        terminated_reason: TerminationReason::FoundAtPoint,
        warnings,
        error: None,
        queries_issued,
    }
}

fn found_in_radius<S: FeatureSource>(
    point: Coordinate,
    radius: f64,
    features: Vec<Feature>,
    mut warnings: Vec<String>,
    queries_issued: usize,
    source: &S,
) -> SearchResult {
    let nearby_features = rank_by_distance(point, radius, features, &mut warnings);
    tracing::debug!(
        layer = source.name(),
        %point,
        radius,
        count = nearby_features.len(),
        nearest_miles = nearby_features.first().map(|n| n.distance_miles),
        "features found during radius expansion"
    );
    SearchResult {
        query_point: point,
        radius_miles_used: radius,
        features_at_point: Vec::new(),
        nearby_features,
        terminated_reason: TerminationReason::FoundInRadius,
        warnings,
        error: None,
        queries_issued,
    }
}

fn service_error<S: FeatureSource>(
    point: Coordinate,
    radius: f64,
    warnings: Vec<String>,
    err: ServiceError,
    queries_issued: usize,
    source: &S,
) -> SearchResult {
    tracing::warn!(
        layer = source.name(),
        %point,
        error = %err,
        "search stopped on service error"
    );
    SearchResult {
        query_point: point,
        radius_miles_used: radius,
        features_at_point: Vec::new(),
        nearby_features: Vec::new(),
        terminated_reason: TerminationReason::ServiceError,
        warnings,
        error: Some(err),
        queries_issued,
    }
}

/// Attach distance and bearing to each feature and sort nearest first.
/// The sort is stable, so equal distances keep service order.
pub fn rank_by_distance(
    point: Coordinate,
    radius: f64,
    features: Vec<Feature>,
    warnings: &mut Vec<String>,
) -> Vec<NearbyFeature> {
    let mut ranked: Vec<NearbyFeature> = features
        .into_iter()
        .map(|feature| {
            let measured = feature
                .geometry
                .as_ref()
                .and_then(|geometry| nearest_point(point, geometry));
            match measured {
                Some((distance_miles, bearing)) => NearbyFeature {
                    feature,
                    distance_miles,
                    bearing_degrees: Some(bearing),
                },
                None => {
                    warnings.push(format!(
                        "feature {} has no usable geometry; ranked at {radius} mi",
                        feature.id
                    ));
                    NearbyFeature {
                        feature,
                        distance_miles: radius,
                        bearing_degrees: None,
                    }
                }
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_miles
            .partial_cmp(&b.distance_miles)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}
