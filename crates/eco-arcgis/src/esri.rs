//! Esri JSON encoding of geometries and decoding of query responses.

use eco_core::{Domain, Feature, Geometry, ServiceError, SpatialReference};
use serde_json::{json, Map, Value};

/// Encode a geometry in the shape the `query` endpoint expects.
pub fn geometry_to_json(geometry: &Geometry) -> Value {
    let sr = json!({ "wkid": geometry.spatial_reference().wkid() });
    match geometry {
        Geometry::Point { x, y, .. } => json!({ "x": x, "y": y, "spatialReference": sr }),
        Geometry::Polygon { rings, .. } => json!({ "rings": rings, "spatialReference": sr }),
        Geometry::Envelope(env) => json!({
            "xmin": env.xmin,
            "ymin": env.ymin,
            "xmax": env.xmax,
            "ymax": env.ymax,
            "spatialReference": sr,
        }),
    }
}

fn spatial_reference_of(value: &Value) -> Option<SpatialReference> {
    let sr = value.get("spatialReference")?;
    sr.get("latestWkid")
        .or_else(|| sr.get("wkid"))
        .and_then(Value::as_u64)
        .and_then(|wkid| SpatialReference::from_wkid(wkid as u32))
}

/// Decode an Esri JSON geometry. Unsupported shapes (polylines, multipoints)
/// and unknown spatial references decode to `None`.
pub fn geometry_from_json(value: &Value, default_sr: SpatialReference) -> Option<Geometry> {
    let spatial_reference = match value.get("spatialReference") {
        Some(_) => spatial_reference_of(value)?,
        None => default_sr,
    };

    if let (Some(x), Some(y)) = (
        value.get("x").and_then(Value::as_f64),
        value.get("y").and_then(Value::as_f64),
    ) {
        return Some(Geometry::Point {
            x,
            y,
            spatial_reference,
        });
    }

    if let Some(rings) = value.get("rings").and_then(Value::as_array) {
        let rings: Vec<Vec<[f64; 2]>> = rings
            .iter()
            .filter_map(Value::as_array)
            .map(|ring| {
                ring.iter()
                    .filter_map(|vertex| {
                        let pair = vertex.as_array()?;
                        Some([pair.first()?.as_f64()?, pair.get(1)?.as_f64()?])
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|ring| !ring.is_empty())
            .collect();
        if rings.is_empty() {
            return None;
        }
        return Some(Geometry::Polygon {
            rings,
            spatial_reference,
        });
    }

    let corner = |key: &str| value.get(key).and_then(Value::as_f64);
    if let (Some(xmin), Some(ymin), Some(xmax), Some(ymax)) =
        (corner("xmin"), corner("ymin"), corner("xmax"), corner("ymax"))
    {
        return Some(Geometry::Envelope(eco_core::Envelope {
            xmin,
            ymin,
            xmax,
            ymax,
            spatial_reference,
        }));
    }

    None
}

/// `{error: {message, code}}` payloads come back with HTTP 200.
pub fn error_payload(payload: &Value) -> Option<ServiceError> {
    let error = payload.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified service error");
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    Some(ServiceError::fault(format!("service error {code}: {message}")))
}

fn feature_id(attributes: &Map<String, Value>, index: usize) -> String {
    ["OBJECTID", "objectid", "FID", "fid"]
        .iter()
        .find_map(|key| attributes.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| index.to_string())
}

/// Decode a `query` response into features tagged with `domain` and `layer`.
pub fn parse_features(
    payload: &Value,
    domain: Domain,
    layer: &str,
) -> Result<Vec<Feature>, ServiceError> {
    if let Some(err) = error_payload(payload) {
        return Err(err);
    }
    let entries = payload
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::malformed("response has no `features` array"))?;
    let default_sr = spatial_reference_of(payload).unwrap_or(SpatialReference::Wgs84);

    Ok(entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let attributes = entry
                .get("attributes")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Feature {
                id: feature_id(&attributes, index),
                geometry: entry
                    .get("geometry")
                    .and_then(|g| geometry_from_json(g, default_sr)),
                attributes,
                normalized: Default::default(),
                source_domain: domain,
                layer: layer.to_string(),
            }
        })
        .collect())
}

/// Decode a `returnCountOnly=true` response.
pub fn parse_count(payload: &Value) -> Result<u64, ServiceError> {
    if let Some(err) = error_payload(payload) {
        return Err(err);
    }
    payload
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| ServiceError::malformed("response has no `count` field"))
}
