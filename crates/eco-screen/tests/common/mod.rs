//! In-memory feature layers and export backends for pipeline tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eco_arcgis::{ExportBackend, RemoteJobStatus, RemoteState, Submission};
use eco_core::geodesic::{destination, rings_contain};
use eco_core::{
    Coordinate, Domain, DomainAnalyzer, DomainConfig, ExportJobSpec, Feature, FeatureSource,
    Geometry, LayerConfig, MapParameterConfig, ServiceError, SpatialReference,
};
use eco_screen::registry::default_domain_config;
use eco_screen::Screener;
use serde_json::{json, Map};

/// Square polygon with its south-west corner at `corner`.
pub fn square_from_corner(id: &str, corner: Coordinate, side_deg: f64) -> Feature {
    let (x, y) = (corner.longitude(), corner.latitude());
    square(id, vec![[x, y], [x + side_deg, y], [x + side_deg, y + side_deg], [x, y + side_deg], [x, y]])
}

/// Square polygon centred on `center`.
pub fn square_around(id: &str, center: Coordinate, half_deg: f64) -> Feature {
    let (x, y) = (center.longitude(), center.latitude());
    square(
        id,
        vec![
            [x - half_deg, y - half_deg],
            [x + half_deg, y - half_deg],
            [x + half_deg, y + half_deg],
            [x - half_deg, y + half_deg],
            [x - half_deg, y - half_deg],
        ],
    )
}

fn square(id: &str, ring: Vec<[f64; 2]>) -> Feature {
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
        source_domain: Domain::Wetlands,
        layer: String::new(),
    }
}

/// A feature whose closest corner lies `miles` north of `point`.
pub fn feature_north_of(id: &str, point: Coordinate, miles: f64) -> Feature {
    square_from_corner(id, destination(point, miles, 0.0), 0.002)
}

pub fn with_attribute(mut feature: Feature, key: &str, value: serde_json::Value) -> Feature {
    feature.attributes.insert(key.to_string(), value);
    feature
}

#[derive(Clone)]
enum Behavior {
    Serve(Vec<Feature>),
    Unavailable,
}

#[derive(Clone)]
pub struct MockSource {
    name: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn serving(name: &str, features: Vec<Feature>) -> Self {
        Self {
            name: name.to_string(),
            behavior: Behavior::Serve(features),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self::serving(name, Vec::new())
    }

    /// Every request fails as if the service timed out.
    pub fn timing_out(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: Behavior::Unavailable,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn respond(&self, geometry: &Geometry) -> Result<Vec<Feature>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let features = match &self.behavior {
            Behavior::Serve(features) => features,
            Behavior::Unavailable => {
                return Err(ServiceError::unavailable(format!("{} timed out", self.name)))
            }
        };
        Ok(features
            .iter()
            .filter(|feature| feature.geometry.as_ref().is_some_and(|g| intersects(geometry, g)))
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

/// Vertex containment both ways; all fixtures are small convex squares.
fn intersects(a: &Geometry, b: &Geometry) -> bool {
    let (a_rings, b_rings) = (rings(a), rings(b));
    vertices(a).iter().any(|[x, y]| rings_contain(&b_rings, *x, *y))
        || vertices(b).iter().any(|[x, y]| rings_contain(&a_rings, *x, *y))
}

impl FeatureSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_intersecting(
        &self,
        geometry: &Geometry,
        _out_fields: &[String],
    ) -> impl Future<Output = Result<Vec<Feature>, ServiceError>> + Send {
        std::future::ready(self.respond(geometry))
    }

    fn count_intersecting(
        &self,
        geometry: &Geometry,
    ) -> impl Future<Output = Result<u64, ServiceError>> + Send {
        std::future::ready(self.respond(geometry).map(|f| f.len() as u64))
    }
}

/// Default policy for `domain`, pointed at a single mock layer.
pub fn domain_config(domain: Domain, layer_name: &str) -> DomainConfig {
    let mut config = default_domain_config(domain).unwrap();
    config.layers = vec![LayerConfig {
        name: layer_name.to_string(),
        url: format!("mock://{layer_name}"),
    }];
    config
}

/// Analyzer for `domain` backed by `source`.
pub fn analyzer(domain: Domain, source: MockSource) -> DomainAnalyzer<MockSource> {
    DomainAnalyzer::new(domain_config(domain, source.name()), vec![source])
}

pub fn scenario_c_map_config() -> MapParameterConfig {
    MapParameterConfig::new(1.0, 3.0, 1.0)
}

pub fn screener(analyzers: Vec<DomainAnalyzer<MockSource>>) -> Screener<MockSource, ScriptedExport> {
    Screener::new(analyzers, scenario_c_map_config())
}

/// Export backend replaying a scripted sequence of job states.
pub struct ScriptedExport {
    submission: Result<Submission, ServiceError>,
    statuses: Mutex<VecDeque<RemoteState>>,
    pub submitted: Mutex<Vec<ExportJobSpec>>,
}

impl ScriptedExport {
    pub fn synchronous(url: &str) -> Self {
        Self {
            submission: Ok(Submission::Completed {
                job_id: "sync".to_string(),
                result_url: url.to_string(),
            }),
            statuses: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn queued(states: Vec<RemoteState>) -> Self {
        Self {
            submission: Ok(Submission::Queued {
                job_id: "job-1".to_string(),
            }),
            statuses: Mutex::new(states.into()),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

impl ExportBackend for ScriptedExport {
    async fn submit(&self, spec: &ExportJobSpec) -> Result<Submission, ServiceError> {
        self.submitted.lock().unwrap().push(spec.clone());
        self.submission.clone()
    }

    async fn job_status(&self, job_id: &str) -> Result<RemoteJobStatus, ServiceError> {
        let state = {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().copied()
            }
        }
        .unwrap_or(RemoteState::Pending);
        Ok(RemoteJobStatus {
            state,
            result_url: (state == RemoteState::Succeeded)
                .then(|| format!("https://example.test/jobs/{job_id}/out.pdf")),
            message: None,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        Ok(format!("%PDF-1.7 {url}").into_bytes())
    }
}
