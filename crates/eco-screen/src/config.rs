//! Screening configuration from environment.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use anyhow::{bail, Result};
use eco_arcgis::{ExportMode, DEFAULT_QUERY_TIMEOUT};
use eco_core::{Domain, MapParameterConfig};
use serde::{Deserialize, Serialize};

use crate::registry::{ExportSettings, ServiceRegistry, DEFAULT_EXPORT_URL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub query_timeout_secs: u64,
    /// Per-domain layer URL overrides.
    #[serde(default)]
    pub domain_urls: BTreeMap<Domain, Vec<String>>,
    pub export_url: String,
    pub export_mode: ExportMode,
    pub export_poll_ms: u64,
    pub export_deadline_secs: u64,
    pub map: MapParameterConfig,
    pub batch_workers: usize,
    pub batch_retries: u32,
    pub batch_retry_base_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn env_key(domain: Domain) -> &'static str {
    match domain {
        Domain::Wetlands => "ECO_WETLANDS_URLS",
        Domain::CriticalHabitat => "ECO_HABITAT_URLS",
        Domain::Nonattainment => "ECO_NONATTAINMENT_URLS",
        Domain::Karst => "ECO_KARST_URLS",
        Domain::Flood => "ECO_FLOOD_URLS",
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f64 = |key: &str, default: f64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(default)
        };

        let domain_urls = Domain::ALL
            .into_iter()
            .filter_map(|domain| {
                let urls: Vec<String> = lookup(env_key(domain))?
                    .split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect();
                (!urls.is_empty()).then_some((domain, urls))
            })
            .collect();

        Self {
            query_timeout_secs: lookup("ECO_QUERY_TIMEOUT_S")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_QUERY_TIMEOUT.as_secs()),
            domain_urls,
            export_url: lookup("ECO_EXPORT_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_EXPORT_URL.to_string()),
            export_mode: lookup("ECO_EXPORT_MODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            export_poll_ms: lookup("ECO_EXPORT_POLL_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(2000),
            export_deadline_secs: lookup("ECO_EXPORT_DEADLINE_S")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(300),
            map: MapParameterConfig::new(
                parse_f64("ECO_MAP_MIN_BUFFER_MI", 1.0),
                parse_f64("ECO_MAP_MAX_BUFFER_MI", 3.0),
                parse_f64("ECO_MAP_MARGIN_MI", 1.0),
            ),
            batch_workers: lookup("ECO_BATCH_WORKERS")
                .and_then(|s| s.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            batch_retries: lookup("ECO_BATCH_RETRIES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            batch_retry_base_ms: lookup("ECO_BATCH_RETRY_BASE_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(500),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    pub fn batch_retry_base(&self) -> Duration {
        Duration::from_millis(self.batch_retry_base_ms)
    }

    /// Default registry with this configuration's overrides applied.
    pub fn registry(&self) -> Result<ServiceRegistry> {
        let mut registry = ServiceRegistry::defaults()?;
        for (domain, urls) in &self.domain_urls {
            registry.override_layers(*domain, urls);
        }
        registry.export = Some(ExportSettings {
            task_url: self.export_url.clone(),
            mode: self.export_mode,
            poll_interval_ms: self.export_poll_ms,
            deadline_secs: self.export_deadline_secs,
            ..ExportSettings::default()
        });

        let errors = registry.validate();
        if !errors.is_empty() {
            bail!("invalid service registry: {}", errors.join("; "));
        }
        Ok(registry)
    }
}
