//! Export job state machine and web-map specification for map/report export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ExportError, GeoError};
use crate::geodesic::{self, METERS_PER_MILE};
use crate::map_params::{AdaptiveMapParameters, BaseMapStyle};
use crate::models::{Coordinate, Envelope, SpatialReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportStatus::Succeeded | ExportStatus::Failed | ExportStatus::TimedOut
        )
    }

    /// Allowed edges of the job lifecycle.
    pub fn can_transition_to(self, next: ExportStatus) -> bool {
        use ExportStatus::*;
        matches!(
            (self, next),
            (Submitted, Running)
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    status: ExportStatus,
    pub submitted_at: DateTime<Utc>,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

impl ExportJob {
    pub fn submitted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ExportStatus::Submitted,
            submitted_at: Utc::now(),
            result_url: None,
            error: None,
        }
    }

    pub fn status(&self) -> ExportStatus {
        self.status
    }

    /// Move the job to `next`. Terminal states reject every transition.
    pub fn advance(&mut self, next: ExportStatus) -> Result<(), ExportError> {
        if !self.status.can_transition_to(next) {
            return Err(ExportError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if self.status != next {
            tracing::debug!(job_id = %self.id, from = ?self.status, to = ?next, "export job transition");
        }
        self.status = next;
        Ok(())
    }

    pub fn succeed(&mut self, result_url: impl Into<String>) -> Result<(), ExportError> {
        self.advance(ExportStatus::Succeeded)?;
        self.result_url = Some(result_url.into());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), ExportError> {
        self.advance(ExportStatus::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    #[default]
    Pdf,
    Png32,
    Jpg,
}

impl ExportFormat {
    pub fn as_param(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "PDF",
            ExportFormat::Png32 => "PNG32",
            ExportFormat::Jpg => "JPG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalLayer {
    pub id: String,
    pub title: String,
    pub url: String,
    pub opacity: f64,
}

/// Everything the export service needs to render one map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJobSpec {
    pub extent: Envelope,
    pub operational_layers: Vec<OperationalLayer>,
    pub base_map: BaseMapStyle,
    pub title: String,
    pub layout_template: String,
    pub format: ExportFormat,
}

pub const DEFAULT_LAYOUT_TEMPLATE: &str = "Letter ANSI A Landscape";

impl ExportJobSpec {
    /// Build a spec centred on `center`, sized by the adaptive parameters.
    ///
    /// Only layers listed in `params.included_layers` are drawn, unless that
    /// list is empty, in which case every candidate layer is drawn.
    pub fn build(
        center: Coordinate,
        params: &AdaptiveMapParameters,
        candidate_layers: &[(String, String)],
        title: impl Into<String>,
    ) -> Result<Self, GeoError> {
        let (x, y) = geodesic::to_projected(center)?;
        let half = params.buffer_miles.max(0.0) * METERS_PER_MILE;
        let extent = Envelope {
            xmin: x - half,
            ymin: y - half,
            xmax: x + half,
            ymax: y + half,
            spatial_reference: SpatialReference::WebMercator,
        };
        let opacity = (1.0 - params.transparency).clamp(0.0, 1.0);
        let operational_layers = candidate_layers
            .iter()
            .filter(|(name, _)| {
                params.included_layers.is_empty() || params.included_layers.contains(name)
            })
            .enumerate()
            .map(|(idx, (name, url))| OperationalLayer {
                id: format!("layer_{idx}"),
                title: name.clone(),
                url: url.clone(),
                opacity,
            })
            .collect();

        Ok(Self {
            extent,
            operational_layers,
            base_map: params.base_map_style,
            title: title.into(),
            layout_template: DEFAULT_LAYOUT_TEMPLATE.to_string(),
            format: ExportFormat::default(),
        })
    }

    /// The `Web_Map_as_JSON` document submitted to the print service.
    pub fn web_map_json(&self) -> Value {
        let wkid = self.extent.spatial_reference.wkid();
        let layers: Vec<Value> = self
            .operational_layers
            .iter()
            .map(|layer| {
                json!({
                    "id": layer.id,
                    "title": layer.title,
                    "url": layer.url,
                    "opacity": layer.opacity,
                    "visibility": true,
                })
            })
            .collect();
        json!({
            "mapOptions": {
                "extent": {
                    "xmin": self.extent.xmin,
                    "ymin": self.extent.ymin,
                    "xmax": self.extent.xmax,
                    "ymax": self.extent.ymax,
                    "spatialReference": { "wkid": wkid },
                },
                "spatialReference": { "wkid": wkid },
            },
            "operationalLayers": layers,
            "baseMap": {
                "title": base_map_title(self.base_map),
                "baseMapLayers": [{ "url": base_map_url(self.base_map) }],
            },
            "exportOptions": { "outputSize": [1100, 850], "dpi": 96 },
            "layoutOptions": { "titleText": self.title },
        })
    }
}

pub fn base_map_url(style: BaseMapStyle) -> &'static str {
    match style {
        BaseMapStyle::Imagery | BaseMapStyle::ImageryWithLabels => {
            "https://services.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer"
        }
        BaseMapStyle::Topographic => {
            "https://services.arcgisonline.com/ArcGIS/rest/services/World_Topo_Map/MapServer"
        }
        BaseMapStyle::Streets => {
            "https://services.arcgisonline.com/ArcGIS/rest/services/World_Street_Map/MapServer"
        }
    }
}

fn base_map_title(style: BaseMapStyle) -> &'static str {
    match style {
        BaseMapStyle::Imagery => "World Imagery",
        BaseMapStyle::ImageryWithLabels => "Imagery with Labels",
        BaseMapStyle::Topographic => "World Topographic",
        BaseMapStyle::Streets => "World Streets",
    }
}
