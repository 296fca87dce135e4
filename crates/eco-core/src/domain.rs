//! Per-domain analysis: run the progressive search across every layer of a
//! regulatory domain, normalize attributes and classify risk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::ServiceError;
use crate::geodesic::{buffer_polygon, compass_point};
use crate::models::{
    Coordinate, Domain, Feature, NearbyFeature, RiskClassification, RiskLevel, SearchResult,
    TerminationReason,
};
use crate::search::{search, SearchPlan};
use crate::source::FeatureSource;

/// One remote layer of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub url: String,
}

/// Risk level assigned when the nearest feature lies within `within_miles`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceBand {
    pub within_miles: f64,
    pub level: RiskLevel,
}

/// Thresholds for features found during radius expansion. A feature at the
/// query point is always `High`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Bands ordered by ascending `within_miles`; the first match wins.
    pub near: Vec<DistanceBand>,
    /// Level for features found beyond every band.
    pub beyond: RiskLevel,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            near: vec![
                DistanceBand {
                    within_miles: 0.25,
                    level: RiskLevel::High,
                },
                DistanceBand {
                    within_miles: 1.0,
                    level: RiskLevel::Moderate,
                },
            ],
            beyond: RiskLevel::Low,
        }
    }
}

impl RiskThresholds {
    pub fn level_for_distance(&self, distance_miles: f64) -> RiskLevel {
        let distance = if distance_miles.is_finite() {
            distance_miles.max(0.0)
        } else {
            f64::INFINITY
        };
        self.near
            .iter()
            .find(|band| distance <= band.within_miles)
            .map(|band| band.level)
            .unwrap_or(self.beyond)
    }
}

/// Full configuration of one regulatory domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain: Domain,
    pub layers: Vec<LayerConfig>,
    pub search: SearchPlan,
    /// Raw service field name -> normalized attribute name.
    #[serde(default)]
    pub attribute_map: BTreeMap<String, String>,
    #[serde(default)]
    pub thresholds: RiskThresholds,
}

impl DomainConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.layers.is_empty() {
            errors.push(format!("{} has no layers configured", self.domain));
        }
        for layer in &self.layers {
            if layer.url.trim().is_empty() {
                errors.push(format!("{} layer '{}' has an empty URL", self.domain, layer.name));
            }
        }
        if self
            .thresholds
            .near
            .windows(2)
            .any(|pair| pair[1].within_miles < pair[0].within_miles)
        {
            errors.push(format!("{} distance bands are not ascending", self.domain));
        }
        if self
            .thresholds
            .near
            .iter()
            .any(|band| band.level == RiskLevel::Unknown)
            || self.thresholds.beyond == RiskLevel::Unknown
        {
            errors.push(format!("{} thresholds cannot assign UNKNOWN", self.domain));
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer: String,
    pub result: SearchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerError {
    pub layer: String,
    pub error: ServiceError,
}

/// Result of analyzing one domain at one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAnalysis {
    pub domain: Domain,
    /// Layer results merged into a single domain-level result.
    pub result: SearchResult,
    pub classification: RiskClassification,
    pub layers: Vec<LayerOutcome>,
    /// Layers that could not be searched.
    pub layer_errors: Vec<LayerError>,
}

/// Drives the progressive search for one domain. Owns its layer clients.
pub struct DomainAnalyzer<S> {
    config: DomainConfig,
    layers: Vec<S>,
}

impl<S: FeatureSource> DomainAnalyzer<S> {
    pub fn new(config: DomainConfig, layers: Vec<S>) -> Self {
        Self { config, layers }
    }

    pub fn domain(&self) -> Domain {
        self.config.domain
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Search every layer, continuing past failed layers, then merge and
    /// classify.
    pub async fn analyze(&self, point: Coordinate) -> DomainAnalysis {
        let domain = self.config.domain;
        let results = futures::future::join_all(
            self.layers
                .iter()
                .map(|layer| search(point, &self.config.search, layer)),
        )
        .await;

        let mut layers = Vec::with_capacity(results.len());
        let mut layer_errors = Vec::new();
        for (source, mut result) in self.layers.iter().zip(results) {
            self.normalize(&mut result);
            if let Some(error) = result.error.clone() {
                tracing::warn!(%domain, layer = source.name(), %error, "layer search failed");
                layer_errors.push(LayerError {
                    layer: source.name().to_string(),
                    error,
                });
            }
            layers.push(LayerOutcome {
                layer: source.name().to_string(),
                result,
            });
        }

        let result = merge_layers(point, &layers);
        let classification = classify(domain, &result, &self.config.thresholds, &layer_errors);
        tracing::info!(
            %domain,
            %point,
            level = ?classification.level,
            reason = ?result.terminated_reason,
            "domain analysis complete"
        );

        DomainAnalysis {
            domain,
            result,
            classification,
            layers,
            layer_errors,
        }
    }

    /// Cheap presence check within `radius_miles` using count-only queries.
    /// A positive count on any layer wins over failures on others.
    pub async fn presence(&self, point: Coordinate, radius_miles: f64) -> Result<bool, ServiceError> {
        let area = buffer_polygon(point, radius_miles, self.config.search.buffer_segments);
        let counts = futures::future::join_all(
            self.layers
                .iter()
                .map(|layer| layer.count_intersecting(&area)),
        )
        .await;

        let mut first_error = None;
        for count in counts {
            match count {
                Ok(n) if n > 0 => return Ok(true),
                Ok(_) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    fn normalize(&self, result: &mut SearchResult) {
        let features = result
            .features_at_point
            .iter_mut()
            .chain(result.nearby_features.iter_mut().map(|n| &mut n.feature));
        for feature in features {
            feature.source_domain = self.config.domain;
            feature.normalized = normalize_attributes(&feature.attributes, &self.config.attribute_map);
        }
    }
}

/// Project raw attributes onto the normalized names in `attribute_map`.
/// Field names are matched exactly first, then case-insensitively.
pub fn normalize_attributes(
    raw: &Map<String, Value>,
    attribute_map: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    let mut normalized = BTreeMap::new();
    for (source, target) in attribute_map {
        let value = raw.get(source).or_else(|| {
            raw.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(source))
                .map(|(_, value)| value)
        });
        if let Some(value) = value {
            if !value.is_null() {
                normalized.insert(target.clone(), value.clone());
            }
        }
    }
    normalized
}

/// Merge per-layer results. Precedence: found at point, found in radius,
/// service error, max radius reached.
pub fn merge_layers(point: Coordinate, layers: &[LayerOutcome]) -> SearchResult {
    let queries_issued = layers.iter().map(|l| l.result.queries_issued).sum();
    let warnings: Vec<String> = layers
        .iter()
        .flat_map(|l| {
            l.result
                .warnings
                .iter()
                .map(move |w| format!("{}: {w}", l.layer))
        })
        .collect();
    let with_reason = |reason: TerminationReason| -> Vec<&SearchResult> {
        layers
            .iter()
            .map(|l| &l.result)
            .filter(|r| r.terminated_reason == reason)
            .collect()
    };

    let at_point = with_reason(TerminationReason::FoundAtPoint);
    if !at_point.is_empty() {
        let features_at_point: Vec<Feature> = at_point
            .iter()
            .flat_map(|r| r.features_at_point.iter().cloned())
            .collect();
        let mut nearby_features: Vec<_> = at_point
            .iter()
            .flat_map(|r| r.nearby_features.iter().cloned())
            .collect();
        sort_nearby(&mut nearby_features);
        let radius = at_point
            .iter()
            .map(|r| r.radius_miles_used)
            .fold(0.0, f64::max);
        return SearchResult {
            query_point: point,
            radius_miles_used: radius,
            features_at_point,
            nearby_features,
            terminated_reason: TerminationReason::FoundAtPoint,
            warnings,
            error: None,
            queries_issued,
        };
    }

    let in_radius = with_reason(TerminationReason::FoundInRadius);
    if !in_radius.is_empty() {
        let mut nearby_features: Vec<_> = in_radius
            .iter()
            .flat_map(|r| r.nearby_features.iter().cloned())
            .collect();
        sort_nearby(&mut nearby_features);
        let radius = in_radius
            .iter()
            .map(|r| r.radius_miles_used)
            .fold(f64::INFINITY, f64::min);
        return SearchResult {
            query_point: point,
            radius_miles_used: radius,
            features_at_point: Vec::new(),
            nearby_features,
            terminated_reason: TerminationReason::FoundInRadius,
            warnings,
            error: None,
            queries_issued,
        };
    }

    let failed = with_reason(TerminationReason::ServiceError);
    if let Some(first) = failed.first() {
        let radius = failed
            .iter()
            .map(|r| r.radius_miles_used)
            .fold(f64::INFINITY, f64::min);
        return SearchResult {
            query_point: point,
            radius_miles_used: radius,
            features_at_point: Vec::new(),
            nearby_features: Vec::new(),
            terminated_reason: TerminationReason::ServiceError,
            warnings,
            error: first.error.clone(),
            queries_issued,
        };
    }

    let radius = layers
        .iter()
        .map(|l| l.result.radius_miles_used)
        .fold(0.0, f64::max);
    SearchResult {
        query_point: point,
        radius_miles_used: radius,
        features_at_point: Vec::new(),
        nearby_features: Vec::new(),
        terminated_reason: TerminationReason::MaxRadiusReached,
        warnings,
        error: None,
        queries_issued,
    }
}

fn sort_nearby(nearby: &mut [NearbyFeature]) {
    nearby.sort_by(|a, b| {
        a.distance_miles
            .partial_cmp(&b.distance_miles)
            .unwrap_or(Ordering::Equal)
    });
}

/// Derive a domain classification from a merged search result.
pub fn classify(
    domain: Domain,
    result: &SearchResult,
    thresholds: &RiskThresholds,
    layer_errors: &[LayerError],
) -> RiskClassification {
    let (level, mut rationale, distance) = match result.terminated_reason {
        TerminationReason::FoundAtPoint => (
            RiskLevel::High,
            format!(
                "location intersects {} {domain} feature(s)",
                result.features_at_point.len()
            ),
            Some(0.0),
        ),
        TerminationReason::FoundInRadius => {
            let nearest = result.nearest_distance_miles().unwrap_or(result.radius_miles_used);
            let direction = result
                .nearest()
                .and_then(|n| n.bearing_degrees)
                .map(|b| format!(" {}", compass_point(b)))
                .unwrap_or_default();
            (
                thresholds.level_for_distance(nearest),
                format!(
                    "nearest {domain} feature {nearest:.2} mi{direction} (searched {} mi)",
                    result.radius_miles_used
                ),
                Some(nearest),
            )
        }
        TerminationReason::MaxRadiusReached => (
            RiskLevel::None,
            format!(
                "no {domain} features within {} mi",
                result.radius_miles_used
            ),
            None,
        ),
        TerminationReason::ServiceError => (
            RiskLevel::Unknown,
            format!(
                "{domain} analysis incomplete: {}",
                result
                    .error
                    .as_ref()
                    .map(|e| e.detail.as_str())
                    .unwrap_or("service unavailable")
            ),
            None,
        ),
    };

    let degraded = level != RiskLevel::Unknown && !layer_errors.is_empty();
    if degraded {
        rationale.push_str(&format!("; {} layer(s) unavailable", layer_errors.len()));
    }

    RiskClassification {
        domain,
        level,
        rationale,
        distance_to_nearest_miles: distance,
        degraded,
    }
}
