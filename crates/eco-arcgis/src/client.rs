//! ArcGIS feature service HTTP client.

use eco_core::{Domain, Feature, FeatureSource, Geometry, ServiceError};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::esri;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Query client for one feature layer (`.../FeatureServer/<n>` or
/// `.../MapServer/<n>`).
#[derive(Clone)]
pub struct FeatureServiceClient {
    client: Client,
    name: String,
    layer_url: String,
    domain: Domain,
    request_id: Option<String>,
}

impl FeatureServiceClient {
    pub fn new(
        name: impl Into<String>,
        layer_url: impl Into<String>,
        domain: Domain,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ServiceError::unavailable(format!("failed to create HTTP client: {err}")))?;
        Ok(Self::with_client(client, name, layer_url, domain))
    }

    /// Reuse an existing connection pool.
    pub fn with_client(
        client: Client,
        name: impl Into<String>,
        layer_url: impl Into<String>,
        domain: Domain,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            layer_url: layer_url.into().trim_end_matches('/').to_string(),
            domain,
            request_id: None,
        }
    }

    pub fn layer_url(&self) -> &str {
        &self.layer_url
    }

    pub fn set_request_id(&mut self, request_id: Option<String>) {
        self.request_id = request_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
    }

    fn apply_request_id(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.request_id.as_deref() {
            Some(value) => request.header("X-Request-ID", value),
            None => request,
        }
    }

    fn query_params(geometry: &Geometry, out_fields: &[String], count_only: bool) -> Vec<(&'static str, String)> {
        let out_fields = if out_fields.is_empty() {
            "*".to_string()
        } else {
            out_fields.join(",")
        };
        let mut params = vec![
            ("geometry", esri::geometry_to_json(geometry).to_string()),
            ("geometryType", geometry.esri_type().to_string()),
            ("inSR", geometry.spatial_reference().wkid().to_string()),
            ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ("f", "json".to_string()),
        ];
        if count_only {
            params.push(("returnCountOnly", "true".to_string()));
        } else {
            params.push(("outFields", out_fields));
            params.push(("returnGeometry", "true".to_string()));
            params.push(("outSR", "4326".to_string()));
        }
        params
    }

    /// POST the query form; bodies can carry large buffer polygons.
    async fn send_query(&self, params: &[(&'static str, String)]) -> Result<Value, ServiceError> {
        let url = format!("{}/query", self.layer_url);
        let response = self
            .apply_request_id(self.client.post(&url).form(params))
            .send()
            .await
            .map_err(|err| {
                let reason = if err.is_timeout() { "timed out" } else { "request failed" };
                ServiceError::unavailable(format!("{} {reason}: {err}", self.name))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::unavailable(format!(
                "{} query failed: {} {}",
                self.name, status, body
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| ServiceError::malformed(format!("{} returned invalid JSON: {err}", self.name)))
    }

    pub async fn query(
        &self,
        geometry: &Geometry,
        out_fields: &[String],
    ) -> Result<Vec<Feature>, ServiceError> {
        let params = Self::query_params(geometry, out_fields, false);
        let payload = self.send_query(&params).await?;
        let features = esri::parse_features(&payload, self.domain, &self.name)?;
        tracing::debug!(
            layer = %self.name,
            geometry_type = geometry.esri_type(),
            count = features.len(),
            "feature query complete"
        );
        Ok(features)
    }

    pub async fn count(&self, geometry: &Geometry) -> Result<u64, ServiceError> {
        let params = Self::query_params(geometry, &[], true);
        let payload = self.send_query(&params).await?;
        esri::parse_count(&payload)
    }
}

impl FeatureSource for FeatureServiceClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_intersecting(
        &self,
        geometry: &Geometry,
        out_fields: &[String],
    ) -> impl Future<Output = Result<Vec<Feature>, ServiceError>> + Send {
        self.query(geometry, out_fields)
    }

    fn count_intersecting(
        &self,
        geometry: &Geometry,
    ) -> impl Future<Output = Result<u64, ServiceError>> + Send {
        self.count(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_core::{Coordinate, ServiceErrorKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the layer URL pointing at it.
    async fn canned_layer(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/arcgis/rest/services/x/FeatureServer/0")
    }

    /// Drain headers and the form body so the socket closes cleanly.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request);
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }

    async fn query_canned(status: &'static str, body: &'static str) -> Result<Vec<Feature>, ServiceError> {
        let url = canned_layer(status, body).await;
        let client = FeatureServiceClient::new("canned", url, Domain::Flood, Duration::from_secs(5)).unwrap();
        let point = Geometry::point(Coordinate::new(-90.07, 29.95).unwrap());
        client.query(&point, &[]).await
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn feature_query_params() {
        let point = Geometry::point(Coordinate::new(-118.2437, 34.0522).unwrap());
        let params = FeatureServiceClient::query_params(&point, &["NAME".into(), "POLLUTANT".into()], false);
        assert_eq!(param(&params, "geometryType"), Some("esriGeometryPoint"));
        assert_eq!(param(&params, "spatialRel"), Some("esriSpatialRelIntersects"));
        assert_eq!(param(&params, "inSR"), Some("4326"));
        assert_eq!(param(&params, "outFields"), Some("NAME,POLLUTANT"));
        assert_eq!(param(&params, "returnGeometry"), Some("true"));
        assert_eq!(param(&params, "returnCountOnly"), None);
    }

    #[test]
    fn count_query_params() {
        let point = Geometry::point(Coordinate::new(0.0, 0.0).unwrap());
        let params = FeatureServiceClient::query_params(&point, &[], true);
        assert_eq!(param(&params, "returnCountOnly"), Some("true"));
        assert_eq!(param(&params, "outFields"), None);
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = FeatureServiceClient::with_client(
            Client::new(),
            "nwi",
            "https://example.test/FeatureServer/0/",
            Domain::Wetlands,
        );
        assert_eq!(client.layer_url(), "https://example.test/FeatureServer/0");
    }

    #[test]
    fn blank_request_id_is_dropped() {
        let mut client =
            FeatureServiceClient::with_client(Client::new(), "nfhl", "https://example.test/28", Domain::Flood);
        client.set_request_id(Some("  batch-7 ".to_string()));
        assert_eq!(client.request_id.as_deref(), Some("batch-7"));
        client.set_request_id(Some("   ".to_string()));
        assert!(client.request_id.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let err = query_canned("503 Service Unavailable", "upstream busy").await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Unavailable);
        assert!(err.detail.contains("503"));
        assert!(err.detail.contains("upstream busy"));
    }

    #[tokio::test]
    async fn error_payload_with_ok_status_is_an_outage() {
        let err = query_canned(
            "200 OK",
            r#"{"error":{"code":500,"message":"Unable to complete operation.","details":[]}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Fault);
        assert!(err.is_outage());
        assert!(err.detail.contains("Unable to complete operation."));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let err = query_canned("200 OK", "<html>maintenance</html>").await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Malformed);
    }

    #[tokio::test]
    async fn ok_response_decodes_features() {
        let features = query_canned(
            "200 OK",
            r#"{"spatialReference":{"wkid":4326},"features":[{"attributes":{"OBJECTID":7,"FLD_ZONE":"AE"},"geometry":{"x":-90.07,"y":29.95}}]}"#,
        )
        .await
        .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, "7");
        assert_eq!(features[0].layer, "canned");
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let client = FeatureServiceClient::new(
            "nowhere",
            "http://127.0.0.1:9/arcgis/rest/services/x/FeatureServer/0",
            Domain::Karst,
            Duration::from_millis(500),
        )
        .unwrap();
        let point = Geometry::point(Coordinate::new(-86.0, 36.0).unwrap());
        let err = client.query(&point, &[]).await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Unavailable);
    }
}
