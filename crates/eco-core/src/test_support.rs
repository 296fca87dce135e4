//! In-memory feature layers for unit tests.

use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ServiceError;
use crate::geodesic::{rings_contain, to_wgs84};
use crate::models::{Coordinate, Domain, Feature, Geometry, SpatialReference};
use crate::source::FeatureSource;

/// Axis-aligned square polygon of half-width `half_deg` degrees.
pub fn square_feature(id: &str, domain: Domain, center: Coordinate, half_deg: f64) -> Feature {
    let (x, y) = (center.longitude(), center.latitude());
    let ring = vec![
        [x - half_deg, y - half_deg],
        [x + half_deg, y - half_deg],
        [x + half_deg, y + half_deg],
        [x - half_deg, y + half_deg],
        [x - half_deg, y - half_deg],
    ];
    let mut attributes = Map::new();
    attributes.insert("OBJECTID".to_string(), json!(id));
    Feature {
        id: id.to_string(),
        geometry: Some(Geometry::Polygon {
            rings: vec![ring],
            spatial_reference: SpatialReference::Wgs84,
        }),
        attributes,
        normalized: Default::default(),
        source_domain: domain,
        layer: String::new(),
    }
}

pub fn with_attribute(mut feature: Feature, key: &str, value: Value) -> Feature {
    feature.attributes.insert(key.to_string(), value);
    feature
}

/// A layer holding fixed polygon features. Calls are numbered from 1;
/// a configured call number can be made to fail.
pub struct MockLayer {
    name: String,
    features: Vec<Feature>,
    calls: AtomicUsize,
    buffer_calls: AtomicUsize,
    fail_unavailable_on: Option<usize>,
    fail_malformed_on: Option<usize>,
    fail_always: Option<ServiceError>,
}

impl MockLayer {
    pub fn new(name: &str, features: Vec<Feature>) -> Self {
        Self {
            name: name.to_string(),
            features,
            calls: AtomicUsize::new(0),
            buffer_calls: AtomicUsize::new(0),
            fail_unavailable_on: None,
            fail_malformed_on: None,
            fail_always: None,
        }
    }

    pub fn fail_unavailable_on(mut self, call: usize) -> Self {
        self.fail_unavailable_on = Some(call);
        self
    }

    pub fn fail_malformed_on(mut self, call: usize) -> Self {
        self.fail_malformed_on = Some(call);
        self
    }

    /// Answer every call with `error`.
    pub fn fail_always(mut self, error: ServiceError) -> Self {
        self.fail_always = Some(error);
        self
    }

    pub fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn buffer_calls(&self) -> usize {
        self.buffer_calls.load(Ordering::SeqCst)
    }

    fn matching(&self, geometry: &Geometry) -> Result<Vec<Feature>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !matches!(geometry, Geometry::Point { .. }) {
            self.buffer_calls.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(error) = &self.fail_always {
            return Err(error.clone());
        }
        if self.fail_unavailable_on == Some(call) {
            return Err(ServiceError::unavailable("mock timeout"));
        }
        if self.fail_malformed_on == Some(call) {
            return Err(ServiceError::malformed("mock response missing features"));
        }

        let query = to_wgs84(geometry).map_err(|err| ServiceError::malformed(err.to_string()))?;
        Ok(self
            .features
            .iter()
            .filter(|feature| {
                feature
                    .geometry
                    .as_ref()
                    .and_then(|g| to_wgs84(g).ok())
                    .map(|g| intersects(&query, &g))
                    .unwrap_or(false)
            })
            .map(|feature| {
                let mut feature = feature.clone();
                feature.layer = self.name.clone();
                feature
            })
            .collect())
    }
}

fn vertices(geometry: &Geometry) -> Vec<[f64; 2]> {
    match geometry {
        Geometry::Point { x, y, .. } => vec![[*x, *y]],
        Geometry::Polygon { rings, .. } => rings.iter().flatten().copied().collect(),
        Geometry::Envelope(env) => vec![
            [env.xmin, env.ymin],
            [env.xmax, env.ymin],
            [env.xmax, env.ymax],
            [env.xmin, env.ymax],
        ],
    }
}

fn rings(geometry: &Geometry) -> Vec<Vec<[f64; 2]>> {
    match geometry {
        Geometry::Polygon { rings, .. } => rings.clone(),
        Geometry::Envelope(_) => {
            let mut ring = vertices(geometry);
            ring.push(ring[0]);
            vec![ring]
        }
        Geometry::Point { .. } => Vec::new(),
    }
}

/// Vertex-containment intersection; adequate for the convex fixtures used here.
fn intersects(a: &Geometry, b: &Geometry) -> bool {
    let b_rings = rings(b);
    let a_rings = rings(a);
    vertices(a)
        .iter()
        .any(|[x, y]| rings_contain(&b_rings, *x, *y))
        || vertices(b)
            .iter()
            .any(|[x, y]| rings_contain(&a_rings, *x, *y))
}

impl FeatureSource for MockLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_intersecting(
        &self,
        geometry: &Geometry,
        _out_fields: &[String],
    ) -> impl Future<Output = Result<Vec<Feature>, ServiceError>> + Send {
        std::future::ready(self.matching(geometry))
    }

    fn count_intersecting(
        &self,
        geometry: &Geometry,
    ) -> impl Future<Output = Result<u64, ServiceError>> + Send {
        std::future::ready(self.matching(geometry).map(|features| features.len() as u64))
    }
}
