pub mod domain;
pub mod error;
pub mod export;
pub mod geodesic;
pub mod map_params;
pub mod models;
pub mod risk;
pub mod search;
pub mod source;

#[cfg(test)]
mod test_support;

pub use domain::{
    classify, merge_layers, normalize_attributes, DistanceBand, DomainAnalysis, DomainAnalyzer,
    DomainConfig, LayerConfig, LayerError, LayerOutcome, RiskThresholds,
};
pub use error::{ExportError, GeoError, ServiceError, ServiceErrorKind};
pub use export::{
    ExportFormat, ExportJob, ExportJobSpec, ExportStatus, OperationalLayer,
    DEFAULT_LAYOUT_TEMPLATE,
};
pub use geodesic::{distance_miles, initial_bearing_degrees, to_geographic, to_projected};
pub use map_params::{select, AdaptiveMapParameters, BaseMapStyle, MapParameterConfig};
pub use models::{
    Coordinate, Domain, Envelope, Feature, Geometry, NearbyFeature, RiskClassification,
    RiskLevel, SearchResult, SpatialReference, TerminationReason,
};
pub use risk::{aggregate, OverallRisk};
pub use search::{rank_by_distance, search, ExpansionStrategy, RadiiSchedule, SearchPlan};
pub use source::FeatureSource;
