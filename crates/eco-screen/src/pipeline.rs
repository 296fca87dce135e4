//! Per-location screening pipeline: concurrent domain analyses, worst-case
//! aggregation, map parameter selection and artifact export.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eco_arcgis::{Deadline, ExportBackend, ExportOrchestrator, FeatureServiceClient, HttpExportBackend};
use eco_core::{
    aggregate, map_params, AdaptiveMapParameters, BaseMapStyle, Coordinate, Domain,
    DomainAnalysis, DomainAnalyzer, ExportFormat, ExportJobSpec, FeatureSource,
    MapParameterConfig, OverallRisk, RiskLevel, SearchResult, TerminationReason,
};
use serde::{Deserialize, Serialize};

use crate::error::ScreenError;
use crate::registry::{ExportSettings, ServiceRegistry};

/// Everything learned about one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub coordinate: Coordinate,
    pub overall: OverallRisk,
    pub domains: Vec<DomainAnalysis>,
    pub generated_at: DateTime<Utc>,
}

impl ScreeningReport {
    pub fn domain(&self, domain: Domain) -> Option<&DomainAnalysis> {
        self.domains.iter().find(|analysis| analysis.domain == domain)
    }

    /// True when no domain produced usable data.
    pub fn all_unknown(&self) -> bool {
        !self.domains.is_empty()
            && self
                .domains
                .iter()
                .all(|analysis| analysis.classification.level == RiskLevel::Unknown)
    }
}

/// Caller-supplied map settings that replace the adaptive choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapOverrides {
    pub buffer_miles: Option<f64>,
    pub transparency: Option<f64>,
    pub base_map_style: Option<BaseMapStyle>,
    pub included_layers: Option<Vec<String>>,
    pub title: Option<String>,
    pub format: Option<ExportFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRequest {
    Adaptive(AdaptiveMapParameters),
    Explicit(MapOverrides),
}

struct ExportRuntime<B> {
    orchestrator: ExportOrchestrator<B>,
    poll_interval: Duration,
    deadline: Duration,
    title: String,
}

pub struct Screener<S, B> {
    analyzers: Vec<DomainAnalyzer<S>>,
    map_config: MapParameterConfig,
    layer_catalog: Vec<(String, String)>,
    export: Option<ExportRuntime<B>>,
}

impl Screener<FeatureServiceClient, HttpExportBackend> {
    /// Build HTTP clients for every configured layer. Each domain gets its
    /// own connection pool.
    pub fn from_registry(
        registry: &ServiceRegistry,
        query_timeout: Duration,
        map_config: MapParameterConfig,
    ) -> Result<Self, ScreenError> {
        let mut analyzers = Vec::with_capacity(registry.domains.len());
        for config in registry.domains.values() {
            let client = reqwest::Client::builder()
                .timeout(query_timeout)
                .build()
                .map_err(|err| {
                    eco_core::ServiceError::unavailable(format!("failed to create HTTP client: {err}"))
                })?;
            let layers = config
                .layers
                .iter()
                .map(|layer| {
                    FeatureServiceClient::with_client(client.clone(), &layer.name, &layer.url, config.domain)
                })
                .collect();
            analyzers.push(DomainAnalyzer::new(config.clone(), layers));
        }

        let screener = Screener::new(analyzers, map_config);
        match &registry.export {
            Some(settings) => {
                let backend = HttpExportBackend::new(&settings.task_url, settings.mode, query_timeout)?;
                Ok(screener.with_export(ExportOrchestrator::new(backend), settings))
            }
            None => Ok(screener),
        }
    }
}

impl<S: FeatureSource, B: ExportBackend> Screener<S, B> {
    pub fn new(analyzers: Vec<DomainAnalyzer<S>>, map_config: MapParameterConfig) -> Self {
        let layer_catalog = analyzers
            .iter()
            .flat_map(|analyzer| analyzer.config().layers.iter())
            .map(|layer| (layer.name.clone(), layer.url.clone()))
            .collect();
        Self {
            analyzers,
            map_config,
            layer_catalog,
            export: None,
        }
    }

    pub fn with_export(mut self, orchestrator: ExportOrchestrator<B>, settings: &ExportSettings) -> Self {
        self.export = Some(ExportRuntime {
            orchestrator,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            deadline: Duration::from_secs(settings.deadline_secs),
            title: settings.title.clone(),
        });
        self
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.analyzers.iter().map(DomainAnalyzer::domain).collect()
    }

    /// Validate raw input, then analyze every domain. An invalid coordinate
    /// fails before any request is issued.
    pub async fn screen(&self, longitude: f64, latitude: f64) -> Result<ScreeningReport, ScreenError> {
        let coordinate = Coordinate::new(longitude, latitude)?;
        Ok(self.analyze_all_domains(coordinate).await)
    }

    pub async fn analyze_domain(
        &self,
        coordinate: Coordinate,
        domain: Domain,
    ) -> Result<DomainAnalysis, ScreenError> {
        let analyzer = self
            .analyzers
            .iter()
            .find(|analyzer| analyzer.domain() == domain)
            .ok_or(ScreenError::DomainNotConfigured(domain))?;
        Ok(analyzer.analyze(coordinate).await)
    }

    /// Run all domain analyses concurrently; failures stay inside each
    /// domain's result.
    pub async fn analyze_all_domains(&self, coordinate: Coordinate) -> ScreeningReport {
        let domains = futures::future::join_all(
            self.analyzers
                .iter()
                .map(|analyzer| analyzer.analyze(coordinate)),
        )
        .await;

        let classifications: Vec<_> = domains
            .iter()
            .map(|analysis| analysis.classification.clone())
            .collect();
        let overall = aggregate(&classifications);
        tracing::info!(
            %coordinate,
            level = ?overall.level,
            degraded = overall.is_degraded(),
            "screening complete"
        );

        ScreeningReport {
            coordinate,
            overall,
            domains,
            generated_at: Utc::now(),
        }
    }

    pub fn select_map_parameters(&self, result: &SearchResult) -> AdaptiveMapParameters {
        map_params::select(result, &self.map_config)
    }

    /// Map parameters for a whole report: sized around the most specific
    /// finding, drawing every layer that contributed features.
    pub fn report_map_parameters(&self, report: &ScreeningReport) -> AdaptiveMapParameters {
        let primary = report
            .domains
            .iter()
            .map(|analysis| &analysis.result)
            .min_by(|a, b| specificity(a).partial_cmp(&specificity(b)).unwrap_or(Ordering::Equal));

        let Some(primary) = primary else {
            return self.fallback_parameters();
        };
        let mut params = self.select_map_parameters(primary);
        for analysis in &report.domains {
            for layer in self.select_map_parameters(&analysis.result).included_layers {
                if !params.included_layers.contains(&layer) {
                    params.included_layers.push(layer);
                }
            }
        }
        params
    }

    fn fallback_parameters(&self) -> AdaptiveMapParameters {
        AdaptiveMapParameters {
            buffer_miles: self.map_config.max_buffer_miles,
            transparency: 0.5,
            base_map_style: BaseMapStyle::Topographic,
            included_layers: Vec::new(),
        }
    }

    /// Render and download a map artifact for `coordinate`.
    pub async fn generate_artifact(
        &self,
        coordinate: Coordinate,
        request: ArtifactRequest,
    ) -> Result<Vec<u8>, ScreenError> {
        let export = self.export.as_ref().ok_or(ScreenError::ExportNotConfigured)?;

        let (params, overrides) = match request {
            ArtifactRequest::Adaptive(params) => (params, MapOverrides::default()),
            ArtifactRequest::Explicit(overrides) => {
                let mut params = self.fallback_parameters();
                if let Some(buffer) = overrides.buffer_miles.filter(|b| b.is_finite() && *b > 0.0) {
                    params.buffer_miles = buffer;
                }
                if let Some(transparency) = overrides.transparency {
                    params.transparency = transparency.clamp(0.0, 1.0);
                }
                if let Some(style) = overrides.base_map_style {
                    params.base_map_style = style;
                }
                if let Some(layers) = overrides.included_layers.clone() {
                    params.included_layers = layers;
                }
                (params, overrides)
            }
        };

        let title = overrides.title.unwrap_or_else(|| format!("{} {}", export.title, coordinate));
        let mut spec = ExportJobSpec::build(coordinate, &params, &self.layer_catalog, title)?;
        if let Some(format) = overrides.format {
            spec.format = format;
        }

        tracing::info!(
            %coordinate,
            buffer_miles = params.buffer_miles,
            layers = spec.operational_layers.len(),
            "submitting map export"
        );
        let deadline = Deadline::after(export.deadline);
        let bytes = export
            .orchestrator
            .run(&spec, export.poll_interval, &deadline)
            .await?;
        Ok(bytes)
    }
}

/// Lower is more specific: a hit at the point, then the nearest hit.
fn specificity(result: &SearchResult) -> (u8, f64) {
    match result.terminated_reason {
        TerminationReason::FoundAtPoint => (0, 0.0),
        TerminationReason::FoundInRadius => (
            1,
            result.nearest_distance_miles().unwrap_or(result.radius_miles_used),
        ),
        TerminationReason::MaxRadiusReached | TerminationReason::ServiceError => (2, 0.0),
    }
}
