//! Service registry: which remote layers each domain queries and how.

use std::collections::BTreeMap;

use eco_arcgis::ExportMode;
use eco_core::{
    DistanceBand, Domain, DomainConfig, GeoError, LayerConfig, RadiiSchedule, RiskLevel,
    RiskThresholds, SearchPlan,
};
use serde::{Deserialize, Serialize};

const NWI_WETLANDS: &str =
    "https://fwspublicservices.wim.usgs.gov/wetlandsmapservice/rest/services/Wetlands/MapServer/0";
const FWS_CRITICAL_HABITAT: &str =
    "https://services.arcgis.com/QVENGdaPbd4LUkLV/arcgis/rest/services/USFWS_Critical_Habitat/FeatureServer";
const EPA_NONATTAINMENT: &str =
    "https://gispub.epa.gov/arcgis/rest/services/OAR_OAQPS/NonattainmentAreas/MapServer";
const USGS_KARST: &str =
    "https://services.arcgis.com/v01gqwM5QqNysAAi/arcgis/rest/services/USGS_Karst_Map/FeatureServer/0";
const FEMA_NFHL_FLOOD_ZONES: &str =
    "https://hazards.fema.gov/arcgis/rest/services/public/NFHL/MapServer/28";

pub const DEFAULT_EXPORT_URL: &str =
    "https://utility.arcgisonline.com/arcgis/rest/services/Utilities/PrintingTools/GPServer/Export%20Web%20Map%20Task";

/// Export service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub task_url: String,
    #[serde(default)]
    pub mode: ExportMode,
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "Environmental Constraint Screening".to_string()
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            task_url: DEFAULT_EXPORT_URL.to_string(),
            mode: ExportMode::Sync,
            poll_interval_ms: 2000,
            deadline_secs: 300,
            title: default_title(),
        }
    }
}

/// Injected replacement for hard-coded service URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistry {
    pub domains: BTreeMap<Domain, DomainConfig>,
    #[serde(default)]
    pub export: Option<ExportSettings>,
}

impl ServiceRegistry {
    /// Empty registry; add domains with [`ServiceRegistry::with_domain`].
    pub fn empty() -> Self {
        Self {
            domains: BTreeMap::new(),
            export: None,
        }
    }

    /// Public federal data sources for all five domains.
    pub fn defaults() -> Result<Self, GeoError> {
        let mut registry = Self::empty();
        for domain in Domain::ALL {
            registry = registry.with_domain(default_domain_config(domain)?);
        }
        registry.export = Some(ExportSettings::default());
        Ok(registry)
    }

    pub fn with_domain(mut self, config: DomainConfig) -> Self {
        self.domains.insert(config.domain, config);
        self
    }

    pub fn with_export(mut self, export: Option<ExportSettings>) -> Self {
        self.export = export;
        self
    }

    pub fn domain(&self, domain: Domain) -> Option<&DomainConfig> {
        self.domains.get(&domain)
    }

    /// Replace a domain's layers with `urls`, keeping its search policy.
    pub fn override_layers(&mut self, domain: Domain, urls: &[String]) {
        if let Some(config) = self.domains.get_mut(&domain) {
            config.layers = urls
                .iter()
                .enumerate()
                .map(|(idx, url)| LayerConfig {
                    name: format!("{domain}_{idx}"),
                    url: url.clone(),
                })
                .collect();
        }
    }

    /// `(layer name, url)` pairs across all domains, for map exports.
    pub fn layer_catalog(&self) -> Vec<(String, String)> {
        self.domains
            .values()
            .flat_map(|config| config.layers.iter())
            .map(|layer| (layer.name.clone(), layer.url.clone()))
            .collect()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors: Vec<String> = self.domains.values().flat_map(DomainConfig::validate).collect();
        if let Some(export) = &self.export {
            if export.task_url.trim().is_empty() {
                errors.push("export task URL is empty".to_string());
            }
        }
        errors
    }
}

fn layer(name: &str, url: impl Into<String>) -> LayerConfig {
    LayerConfig {
        name: name.to_string(),
        url: url.into(),
    }
}

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(raw, normalized)| (raw.to_string(), normalized.to_string()))
        .collect()
}

fn bands(near: &[(f64, RiskLevel)], beyond: RiskLevel) -> RiskThresholds {
    RiskThresholds {
        near: near
            .iter()
            .map(|&(within_miles, level)| DistanceBand {
                within_miles,
                level,
            })
            .collect(),
        beyond,
    }
}

/// Default layers, radii, field mappings and thresholds for `domain`.
pub fn default_domain_config(domain: Domain) -> Result<DomainConfig, GeoError> {
    let config = match domain {
        Domain::Wetlands => {
            let mut search = SearchPlan::new(RadiiSchedule::new(vec![0.5, 1.0])?);
            search.context_search = true;
            DomainConfig {
                domain,
                layers: vec![layer("nwi_wetlands", NWI_WETLANDS)],
                search,
                attribute_map: fields(&[
                    ("WETLAND_TYPE", "wetland_type"),
                    ("ATTRIBUTE", "nwi_code"),
                    ("ACRES", "acres"),
                ]),
                thresholds: bands(
                    &[(0.1, RiskLevel::High), (0.5, RiskLevel::Moderate)],
                    RiskLevel::Low,
                ),
            }
        }
        Domain::CriticalHabitat => DomainConfig {
            domain,
            layers: vec![
                layer("fws_habitat_polygons", format!("{FWS_CRITICAL_HABITAT}/0")),
                layer("fws_habitat_lines", format!("{FWS_CRITICAL_HABITAT}/1")),
            ],
            search: SearchPlan::new(RadiiSchedule::new(vec![0.5, 1.0, 2.0])?),
            attribute_map: fields(&[
                ("comname", "common_name"),
                ("sciname", "scientific_name"),
                ("listing_st", "listing_status"),
            ]),
            thresholds: bands(
                &[(0.25, RiskLevel::High), (1.0, RiskLevel::Moderate)],
                RiskLevel::Low,
            ),
        },
        Domain::Nonattainment => DomainConfig {
            domain,
            layers: vec![
                layer("epa_ozone_2015", format!("{EPA_NONATTAINMENT}/2")),
                layer("epa_pm25_2012", format!("{EPA_NONATTAINMENT}/5")),
            ],
            search: SearchPlan::new(RadiiSchedule::new(vec![5.0, 10.0, 25.0])?),
            attribute_map: fields(&[
                ("POLLUTANT_NAME", "pollutant"),
                ("AREA_NAME", "area_name"),
                ("CLASSIFICATION", "classification"),
            ]),
            thresholds: bands(&[(5.0, RiskLevel::Moderate)], RiskLevel::Low),
        },
        Domain::Karst => DomainConfig {
            domain,
            layers: vec![layer("usgs_karst", USGS_KARST)],
            search: SearchPlan::new(RadiiSchedule::new(vec![1.0, 2.0, 3.0])?),
            attribute_map: fields(&[("ROCKTYPE1", "rock_type"), ("EXP_DESC", "exposure")]),
            thresholds: bands(
                &[(0.5, RiskLevel::High), (2.0, RiskLevel::Moderate)],
                RiskLevel::Low,
            ),
        },
        Domain::Flood => DomainConfig {
            domain,
            layers: vec![layer("fema_flood_zones", FEMA_NFHL_FLOOD_ZONES)],
            search: SearchPlan::new(RadiiSchedule::new(vec![0.25, 0.5, 1.0])?),
            attribute_map: fields(&[
                ("FLD_ZONE", "flood_zone"),
                ("ZONE_SUBTY", "zone_subtype"),
                ("SFHA_TF", "special_flood_hazard_area"),
                ("STATIC_BFE", "base_flood_elevation"),
            ]),
            thresholds: bands(
                &[(0.1, RiskLevel::High), (0.5, RiskLevel::Moderate)],
                RiskLevel::Low,
            ),
        },
    };
    Ok(config)
}
