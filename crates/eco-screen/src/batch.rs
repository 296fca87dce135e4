//! Batch screening over many locations with a bounded worker pool.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use eco_arcgis::ExportBackend;
use eco_core::{Coordinate, FeatureSource};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::RetryBackoff;
use crate::config::Config;
use crate::pipeline::{ArtifactRequest, Screener, ScreeningReport};

const MAX_RETRY_DELAY_FACTOR: u32 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

impl Location {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub id: String,
    /// Position in the input list.
    pub index: usize,
    pub location: Location,
    pub attempts: u32,
    pub status: ItemStatus,
    pub report: Option<ScreeningReport>,
    #[serde(skip)]
    pub artifact: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Succeeded, but with at least one domain UNKNOWN.
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub workers: usize,
    pub retries: u32,
    pub retry_base: Duration,
    pub export: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            retries: 0,
            retry_base: Duration::from_millis(500),
            export: false,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.batch_workers.max(1),
            retries: config.batch_retries,
            retry_base: config.batch_retry_base(),
            export: false,
        }
    }
}

/// Runs the screening pipeline for each location independently. The worker
/// pool is the only resource shared between items.
pub struct BatchCoordinator<S, B> {
    screener: Arc<Screener<S, B>>,
    options: BatchOptions,
    statuses: DashMap<String, ItemStatus>,
}

impl<S: FeatureSource, B: ExportBackend> BatchCoordinator<S, B> {
    pub fn new(screener: Arc<Screener<S, B>>, options: BatchOptions) -> Self {
        Self {
            screener,
            options,
            statuses: DashMap::new(),
        }
    }

    pub fn status(&self, id: &str) -> Option<ItemStatus> {
        self.statuses.get(id).map(|entry| entry.value().clone())
    }

    pub fn statuses(&self) -> Vec<(String, ItemStatus)> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Screen every location. Outcomes are returned in input order.
    pub async fn run(&self, locations: &[Location]) -> (Vec<BatchOutcome>, BatchSummary) {
        let items: Vec<(usize, String, Location)> = locations
            .iter()
            .enumerate()
            .map(|(index, location)| (index, Uuid::new_v4().to_string(), *location))
            .collect();
        for (_, id, _) in &items {
            self.statuses.insert(id.clone(), ItemStatus::Pending);
        }
        tracing::info!(items = items.len(), workers = self.options.workers, "batch started");

        let mut outcomes: Vec<BatchOutcome> = stream::iter(items)
            .map(|(index, id, location)| self.process(index, id, location))
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|outcome| outcome.index);

        let summary = summarize(&outcomes);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            degraded = summary.degraded,
            "batch finished"
        );
        (outcomes, summary)
    }

    async fn process(&self, index: usize, id: String, location: Location) -> BatchOutcome {
        self.statuses.insert(id.clone(), ItemStatus::Running);
        let mut outcome = BatchOutcome {
            id: id.clone(),
            index,
            location,
            attempts: 0,
            status: ItemStatus::Running,
            report: None,
            artifact: None,
        };

        let coordinate = match Coordinate::new(location.longitude, location.latitude) {
            Ok(coordinate) => coordinate,
            Err(err) => return self.finish(outcome, ItemStatus::Failed(err.to_string())),
        };

        let base = self.options.retry_base;
        let mut backoff = RetryBackoff::new(base, base.saturating_mul(MAX_RETRY_DELAY_FACTOR));
        let report = loop {
            outcome.attempts += 1;
            let report = self.screener.analyze_all_domains(coordinate).await;
            if report.all_unknown() && outcome.attempts <= self.options.retries {
                let delay = backoff.next_delay();
                tracing::warn!(
                    id = %id,
                    attempt = outcome.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "every domain unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            break report;
        };

        let status = if report.all_unknown() {
            ItemStatus::Failed("every domain unavailable".to_string())
        } else if self.options.export {
            let params = self.screener.report_map_parameters(&report);
            match self
                .screener
                .generate_artifact(coordinate, ArtifactRequest::Adaptive(params))
                .await
            {
                Ok(bytes) => {
                    outcome.artifact = Some(bytes);
                    ItemStatus::Succeeded
                }
                Err(err) => ItemStatus::Failed(format!("export: {err}")),
            }
        } else {
            ItemStatus::Succeeded
        };
        outcome.report = Some(report);
        self.finish(outcome, status)
    }

    fn finish(&self, mut outcome: BatchOutcome, status: ItemStatus) -> BatchOutcome {
        if let ItemStatus::Failed(reason) = &status {
            tracing::warn!(id = %outcome.id, %reason, "batch item failed");
        }
        self.statuses.insert(outcome.id.clone(), status.clone());
        outcome.status = status;
        outcome
    }
}

fn summarize(outcomes: &[BatchOutcome]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: outcomes.len(),
        ..BatchSummary::default()
    };
    for outcome in outcomes {
        match outcome.status {
            ItemStatus::Succeeded => {
                summary.succeeded += 1;
                if outcome
                    .report
                    .as_ref()
                    .is_some_and(|report| report.overall.is_degraded())
                {
                    summary.degraded += 1;
                }
            }
            ItemStatus::Failed(_) => summary.failed += 1,
            ItemStatus::Pending | ItemStatus::Running => {}
        }
    }
    summary
}
