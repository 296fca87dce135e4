//! Map/report parameter selection driven by search results.

use serde::{Deserialize, Serialize};

use crate::models::{SearchResult, TerminationReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseMapStyle {
    Imagery,
    ImageryWithLabels,
    Topographic,
    Streets,
}

/// Bounds used when sizing the map buffer, in miles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapParameterConfig {
    pub min_buffer_miles: f64,
    pub max_buffer_miles: f64,
    pub margin_miles: f64,
}

impl Default for MapParameterConfig {
    fn default() -> Self {
        Self {
            min_buffer_miles: 1.0,
            max_buffer_miles: 3.0,
            margin_miles: 1.0,
        }
    }
}

impl MapParameterConfig {
    /// Normalize so that `0 <= min <= max` and the margin is non-negative.
    pub fn new(min_buffer_miles: f64, max_buffer_miles: f64, margin_miles: f64) -> Self {
        let min = finite_or_zero(min_buffer_miles);
        let max = finite_or_zero(max_buffer_miles).max(min);
        Self {
            min_buffer_miles: min,
            max_buffer_miles: max,
            margin_miles: finite_or_zero(margin_miles),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveMapParameters {
    pub buffer_miles: f64,
    /// Operational layer transparency in `[0, 1]`; 0 is fully opaque.
    pub transparency: f64,
    pub base_map_style: BaseMapStyle,
    /// Layers that contributed features, in discovery order.
    pub included_layers: Vec<String>,
}

/// Derive map parameters from a search result. Pure function of its inputs.
pub fn select(result: &SearchResult, config: &MapParameterConfig) -> AdaptiveMapParameters {
    let config = MapParameterConfig::new(
        config.min_buffer_miles,
        config.max_buffer_miles,
        config.margin_miles,
    );
    let included_layers = included_layers(result);

    match result.terminated_reason {
        TerminationReason::FoundAtPoint => AdaptiveMapParameters {
            buffer_miles: config.min_buffer_miles,
            transparency: 0.2,
            base_map_style: BaseMapStyle::Imagery,
            included_layers,
        },
        TerminationReason::FoundInRadius => {
            let nearest = result
                .nearest_distance_miles()
                .unwrap_or(result.radius_miles_used);
            AdaptiveMapParameters {
                buffer_miles: clamp_buffer(nearest, &config),
                transparency: 0.35,
                base_map_style: BaseMapStyle::ImageryWithLabels,
                included_layers,
            }
        }
        // An unreachable service gets the same regional overview as a clean
        // result so the map still renders.
        TerminationReason::MaxRadiusReached | TerminationReason::ServiceError => {
            AdaptiveMapParameters {
                buffer_miles: config.max_buffer_miles,
                transparency: 0.5,
                base_map_style: BaseMapStyle::Topographic,
                included_layers,
            }
        }
    }
}

/// `clamp(distance + margin, min, max)`; negative or non-finite distances
/// count as zero.
pub fn clamp_buffer(nearest_distance_miles: f64, config: &MapParameterConfig) -> f64 {
    let distance = finite_or_zero(nearest_distance_miles);
    (distance + config.margin_miles).clamp(config.min_buffer_miles, config.max_buffer_miles)
}

fn included_layers(result: &SearchResult) -> Vec<String> {
    let mut layers: Vec<String> = Vec::new();
    let features = result
        .features_at_point
        .iter()
        .chain(result.nearby_features.iter().map(|n| &n.feature));
    for feature in features {
        if !feature.layer.is_empty() && !layers.contains(&feature.layer) {
            layers.push(feature.layer.clone());
        }
    }
    layers
}
