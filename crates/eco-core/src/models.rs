//! Core data models for environmental screening.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GeoError, ServiceError};

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    longitude: f64,
    latitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    longitude: f64,
    latitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = GeoError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.longitude, raw.latitude)
    }
}

impl Coordinate {
    /// Validate and build a coordinate. Out-of-range or non-finite values are
    /// rejected, never clamped.
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, GeoError> {
        let valid = longitude.is_finite()
            && latitude.is_finite()
            && (-180.0..=180.0).contains(&longitude)
            && (-90.0..=90.0).contains(&latitude);
        if !valid {
            return Err(GeoError::InvalidCoordinate {
                lon: longitude,
                lat: latitude,
            });
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

/// Spatial reference a geometry is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialReference {
    /// Geographic WGS84 (EPSG:4326).
    Wgs84,
    /// Spherical Mercator (EPSG:3857 / ESRI 102100).
    WebMercator,
}

impl SpatialReference {
    pub fn wkid(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 102100,
        }
    }

    pub fn from_wkid(wkid: u32) -> Option<Self> {
        match wkid {
            4326 => Some(Self::Wgs84),
            102100 | 102113 | 3857 | 900913 => Some(Self::WebMercator),
            _ => None,
        }
    }
}

/// Axis-aligned extent in a single spatial reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub spatial_reference: SpatialReference,
}

/// Geometry variants. Each variant carries exactly one spatial reference, so
/// every vertex in a geometry shares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point {
        x: f64,
        y: f64,
        spatial_reference: SpatialReference,
    },
    /// Rings of `[x, y]` vertices; outer rings and holes are not distinguished.
    Polygon {
        rings: Vec<Vec<[f64; 2]>>,
        spatial_reference: SpatialReference,
    },
    Envelope(Envelope),
}

impl Geometry {
    pub fn point(coordinate: Coordinate) -> Self {
        Geometry::Point {
            x: coordinate.longitude(),
            y: coordinate.latitude(),
            spatial_reference: SpatialReference::Wgs84,
        }
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        match self {
            Geometry::Point {
                spatial_reference, ..
            }
            | Geometry::Polygon {
                spatial_reference, ..
            } => *spatial_reference,
            Geometry::Envelope(envelope) => envelope.spatial_reference,
        }
    }

    /// ArcGIS `geometryType` parameter value.
    pub fn esri_type(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "esriGeometryPoint",
            Geometry::Polygon { .. } => "esriGeometryPolygon",
            Geometry::Envelope(_) => "esriGeometryEnvelope",
        }
    }
}

/// Regulatory domain a feature or classification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Wetlands,
    CriticalHabitat,
    Nonattainment,
    Karst,
    Flood,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Wetlands,
        Domain::CriticalHabitat,
        Domain::Nonattainment,
        Domain::Karst,
        Domain::Flood,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Wetlands => "wetlands",
            Domain::CriticalHabitat => "critical_habitat",
            Domain::Nonattainment => "nonattainment",
            Domain::Karst => "karst",
            Domain::Flood => "flood",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature returned by a query. Lives only as long as the result that
/// holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<Geometry>,
    /// Raw attribute payload as returned by the service.
    pub attributes: Map<String, Value>,
    /// Domain-normalized attribute subset, filled in by the domain analyzer.
    #[serde(default)]
    pub normalized: BTreeMap<String, Value>,
    pub source_domain: Domain,
    /// Name of the layer the feature was read from.
    pub layer: String,
}

/// A feature found during radius expansion, ranked by distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyFeature {
    pub feature: Feature,
    pub distance_miles: f64,
    /// `None` when the feature carried no usable geometry.
    pub bearing_degrees: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    FoundAtPoint,
    FoundInRadius,
    MaxRadiusReached,
    ServiceError,
}

/// Outcome of one progressive search. Built once and not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query_point: Coordinate,
    pub radius_miles_used: f64,
    pub features_at_point: Vec<Feature>,
    pub nearby_features: Vec<NearbyFeature>,
    pub terminated_reason: TerminationReason,
    /// Non-fatal problems (malformed responses, missing geometry).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// The failure that stopped the search, for `ServiceError` terminations.
    #[serde(default)]
    pub error: Option<ServiceError>,
    /// Number of remote queries issued.
    pub queries_issued: usize,
}

impl SearchResult {
    pub fn nearest(&self) -> Option<&NearbyFeature> {
        self.nearby_features.first()
    }

    pub fn nearest_distance_miles(&self) -> Option<f64> {
        self.nearest().map(|nearby| nearby.distance_miles)
    }

    pub fn has_features(&self) -> bool {
        !self.features_at_point.is_empty() || !self.nearby_features.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    High,
    /// The analysis could not be completed; never equivalent to `None`.
    Unknown,
}

impl RiskLevel {
    /// Reporting precedence among verified levels. `Unknown` has none.
    pub fn precedence(self) -> Option<u8> {
        match self {
            RiskLevel::None => Some(0),
            RiskLevel::Low => Some(1),
            RiskLevel::Moderate => Some(2),
            RiskLevel::High => Some(3),
            RiskLevel::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskClassification {
    pub domain: Domain,
    pub level: RiskLevel,
    pub rationale: String,
    pub distance_to_nearest_miles: Option<f64>,
    /// Some of the domain's layers failed; `level` covers only the rest.
    #[serde(default)]
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_rejects_out_of_range() {
        assert!(Coordinate::new(-118.2437, 34.0522).is_ok());
        assert!(Coordinate::new(180.0, 90.0).is_ok());
        assert!(matches!(
            Coordinate::new(180.5, 0.0),
            Err(GeoError::InvalidCoordinate { .. })
        ));
        assert!(Coordinate::new(0.0, -90.01).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn coordinate_deserialize_validates() {
        let ok: Result<Coordinate, _> =
            serde_json::from_str(r#"{"longitude": -80.1, "latitude": 25.7}"#);
        assert!(ok.is_ok());
        let bad: Result<Coordinate, _> =
            serde_json::from_str(r#"{"longitude": -200.0, "latitude": 25.7}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn unknown_has_no_precedence() {
        assert_eq!(RiskLevel::Unknown.precedence(), None);
        assert!(RiskLevel::High.precedence() > RiskLevel::Moderate.precedence());
    }

    #[test]
    fn wkid_lookup_accepts_mercator_aliases() {
        assert_eq!(
            SpatialReference::from_wkid(3857),
            Some(SpatialReference::WebMercator)
        );
        assert_eq!(SpatialReference::from_wkid(4269), None);
    }
}
