//! Geodesic math: great-circle distance, bearings, spherical Mercator
//! conversion and buffer construction.

use std::f64::consts::PI;

use crate::error::GeoError;
use crate::models::{Coordinate, Envelope, Geometry, SpatialReference};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Sphere radius for spherical Mercator (EPSG:3857). The projected half-width
/// `20037508.34` is `PI * MERCATOR_RADIUS_M` and is always derived from it.
pub const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the square spherical Mercator world.
pub const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

pub const METERS_PER_MILE: f64 = 1609.344;

/// Great-circle distance in miles using the haversine formula.
pub fn distance_miles(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let dphi = (b.latitude() - a.latitude()).to_radians();
    let dlambda = (b.longitude() - a.longitude()).to_radians();
    let h =
        (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial compass bearing from `a` toward `b` in `[0, 360)`, 0 = north,
/// clockwise.
pub fn initial_bearing_degrees(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let delta_lambda = (b.longitude() - a.longitude()).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    let bearing = x.atan2(y).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

/// Sixteen-wind compass label for a bearing in degrees.
pub fn compass_point(bearing_deg: f64) -> &'static str {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let index = ((bearing_deg.rem_euclid(360.0) / 22.5).round() as usize) % POINTS.len();
    POINTS[index]
}

/// Forward spherical Mercator projection to meters.
///
/// Latitudes beyond [`MERCATOR_MAX_LAT`] have no finite image and are
/// rejected rather than clamped.
pub fn to_projected(c: Coordinate) -> Result<(f64, f64), GeoError> {
    if c.latitude().abs() > MERCATOR_MAX_LAT {
        return Err(GeoError::InvalidCoordinate {
            lon: c.longitude(),
            lat: c.latitude(),
        });
    }
    let x = c.longitude() * MERCATOR_RADIUS_M * PI / 180.0;
    let y = MERCATOR_RADIUS_M * (PI / 4.0 + c.latitude() * PI / 360.0).tan().ln();
    Ok((x, y))
}

/// Inverse spherical Mercator projection.
pub fn to_geographic(x: f64, y: f64) -> Result<Coordinate, GeoError> {
    if !x.is_finite() || !y.is_finite() {
        return Err(GeoError::InvalidCoordinate { lon: x, lat: y });
    }
    let longitude = (x / MERCATOR_RADIUS_M).to_degrees();
    let latitude = (2.0 * (y / MERCATOR_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Coordinate::new(longitude, latitude)
}

/// Point reached travelling `distance_miles` from `origin` along the
/// initial bearing `bearing_deg`.
pub fn destination(origin: Coordinate, distance_miles: f64, bearing_deg: f64) -> Coordinate {
    if distance_miles.abs() <= f64::EPSILON {
        return origin;
    }

    let lat1 = origin.latitude().to_radians();
    let lon1 = origin.longitude().to_radians();
    let bearing_rad = bearing_deg.to_radians();
    let angular_distance = distance_miles / EARTH_RADIUS_MILES;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let lon2 = (lon1 + y.atan2(x) + PI).rem_euclid(2.0 * PI) - PI;

    // Both components are normalized into range above.
    Coordinate::new(lon2.to_degrees(), lat2.to_degrees()).unwrap_or(origin)
}

/// `lon` shifted by whole turns to lie within 180 degrees of `reference`.
/// The result may fall outside [-180, 180] near the antimeridian.
pub fn unwrap_longitude(lon: f64, reference: f64) -> f64 {
    reference + (lon - reference + 180.0).rem_euclid(360.0) - 180.0
}

/// Geodesic buffer: a closed WGS84 ring approximating every point within
/// `radius_miles` of `center`.
///
/// Vertex longitudes are continuous around `center`, so a buffer crossing
/// the antimeridian extends past +/-180 instead of wrapping.
pub fn buffer_polygon(center: Coordinate, radius_miles: f64, segments: usize) -> Geometry {
    let segments = segments.max(8);
    let mut ring: Vec<[f64; 2]> = (0..segments)
        .map(|step| {
            let bearing = 360.0 * step as f64 / segments as f64;
            let vertex = destination(center, radius_miles, bearing);
            [
                unwrap_longitude(vertex.longitude(), center.longitude()),
                vertex.latitude(),
            ]
        })
        .collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    Geometry::Polygon {
        rings: vec![ring],
        spatial_reference: SpatialReference::Wgs84,
    }
}

/// WGS84 envelope bounding a circle of `radius_miles` around `center`.
/// Like [`buffer_polygon`], `xmin`/`xmax` may extend past +/-180 so that
/// `xmin < xmax` always holds.
pub fn envelope_around(center: Coordinate, radius_miles: f64) -> Envelope {
    let north = destination(center, radius_miles, 0.0);
    let south = destination(center, radius_miles, 180.0);
    let east = destination(center, radius_miles, 90.0);
    let west = destination(center, radius_miles, 270.0);
    Envelope {
        xmin: unwrap_longitude(west.longitude(), center.longitude()),
        ymin: south.latitude(),
        xmax: unwrap_longitude(east.longitude(), center.longitude()),
        ymax: north.latitude(),
        spatial_reference: SpatialReference::Wgs84,
    }
}

/// Even-odd point-in-polygon test across all rings, so holes are excluded.
pub fn rings_contain(rings: &[Vec<[f64; 2]>], x: f64, y: f64) -> bool {
    let mut inside = false;
    for ring in rings {
        let n = ring.len();
        if n < 3 {
            continue;
        }
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = ring[i];
            let [xj, yj] = ring[j];
            if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                inside = !inside;
            }
            j = i;
        }
    }
    inside
}

/// Whether a geometry covers a geographic point.
pub fn geometry_contains(geometry: &Geometry, point: Coordinate) -> bool {
    let Ok(geographic) = to_wgs84(geometry) else {
        return false;
    };
    match geographic {
        Geometry::Point { x, y, .. } => {
            (x - point.longitude()).abs() < 1e-9 && (y - point.latitude()).abs() < 1e-9
        }
        Geometry::Polygon { rings, .. } => {
            rings_contain(&rings, point.longitude(), point.latitude())
        }
        Geometry::Envelope(env) => {
            (env.xmin..=env.xmax).contains(&point.longitude())
                && (env.ymin..=env.ymax).contains(&point.latitude())
        }
    }
}

/// Re-express a geometry in WGS84.
pub fn to_wgs84(geometry: &Geometry) -> Result<Geometry, GeoError> {
    if geometry.spatial_reference() == SpatialReference::Wgs84 {
        return Ok(geometry.clone());
    }
    let convert = |x: f64, y: f64| -> Result<[f64; 2], GeoError> {
        let c = to_geographic(x, y)?;
        Ok([c.longitude(), c.latitude()])
    };
    match geometry {
        Geometry::Point { x, y, .. } => {
            let [lon, lat] = convert(*x, *y)?;
            Ok(Geometry::Point {
                x: lon,
                y: lat,
                spatial_reference: SpatialReference::Wgs84,
            })
        }
        Geometry::Polygon { rings, .. } => {
            let rings = rings
                .iter()
                .map(|ring| ring.iter().map(|[x, y]| convert(*x, *y)).collect())
                .collect::<Result<Vec<Vec<[f64; 2]>>, GeoError>>()?;
            Ok(Geometry::Polygon {
                rings,
                spatial_reference: SpatialReference::Wgs84,
            })
        }
        Geometry::Envelope(env) => {
            let [xmin, ymin] = convert(env.xmin, env.ymin)?;
            let [xmax, ymax] = convert(env.xmax, env.ymax)?;
            Ok(Geometry::Envelope(Envelope {
                xmin,
                ymin,
                xmax,
                ymax,
                spatial_reference: SpatialReference::Wgs84,
            }))
        }
    }
}

/// Closest point to `(px, py)` on the segment `a`-`b`, working in a local
/// flat frame scaled by `cos(lat)` so east and north distances are comparable.
fn closest_on_segment(px: f64, py: f64, a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    let k = py.to_radians().cos();
    let (ax, ay) = ((unwrap_longitude(a[0], px) - px) * k, a[1] - py);
    let (bx, by) = ((unwrap_longitude(b[0], px) - px) * k, b[1] - py);
    let (sx, sy) = (bx - ax, by - ay);
    let len_sq = sx * sx + sy * sy;
    let t = if len_sq < 1e-18 {
        0.0
    } else {
        (-(ax * sx + ay * sy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * sx, ay + t * sy);
    let lon = if k > 1e-12 { px + cx / k } else { unwrap_longitude(a[0], px) };
    [lon, py + cy]
}

/// Distance (miles) and bearing (degrees) from `origin` to the closest point
/// on the boundary of `geometry`: the nearest edge for polygons and envelopes,
/// the point itself otherwise. A polygon or envelope covering `origin` is at
/// distance zero.
pub fn nearest_point(origin: Coordinate, geometry: &Geometry) -> Option<(f64, f64)> {
    let geographic = to_wgs84(geometry).ok()?;
    let (px, py) = (origin.longitude(), origin.latitude());
    let rings: Vec<Vec<[f64; 2]>> = match &geographic {
        Geometry::Point { x, y, .. } => vec![vec![[*x, *y]]],
        Geometry::Polygon { rings, .. } => rings.clone(),
        Geometry::Envelope(env) => vec![vec![
            [env.xmin, env.ymin],
            [env.xmax, env.ymin],
            [env.xmax, env.ymax],
            [env.xmin, env.ymax],
            [env.xmin, env.ymin],
        ]],
    };

    let mut best: Option<(f64, Coordinate)> = None;
    for ring in &rings {
        let candidates: Vec<[f64; 2]> = match ring.len() {
            0 => continue,
            1 => vec![ring[0]],
            _ => ring
                .windows(2)
                .map(|edge| closest_on_segment(px, py, edge[0], edge[1]))
                .collect(),
        };
        for [x, y] in candidates {
            let lon = (x + 180.0).rem_euclid(360.0) - 180.0;
            let Ok(point) = Coordinate::new(lon, y) else {
                continue;
            };
            let distance = distance_miles(origin, point);
            if best.map_or(true, |(current, _)| distance < current) {
                best = Some((distance, point));
            }
        }
    }
    let (distance, closest) = best?;
    let bearing = initial_bearing_degrees(origin, closest);

    if geometry_contains(&geographic, origin) {
        return Some((0.0, bearing));
    }
    Some((distance, bearing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lon: f64, lat: f64) -> Coordinate {
        Coordinate::new(lon, lat).unwrap()
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = c(-117.8265, 33.6846);
        assert_eq!(distance_miles(a, a), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = c(-118.2437, 34.0522);
        let b = c(-73.9857, 40.7484);
        assert!((distance_miles(a, b) - distance_miles(b, a)).abs() < 1e-9);
    }

    #[test]
    fn one_degree_latitude_is_about_69_miles() {
        let d = distance_miles(c(0.0, 0.0), c(0.0, 1.0));
        assert!((d - 69.09).abs() < 0.1, "got {d}");
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = c(0.0, 0.0);
        assert!(initial_bearing_degrees(origin, c(0.0, 1.0)).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, c(1.0, 0.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, c(0.0, -1.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, c(-1.0, 0.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn bearing_stays_in_range() {
        let origin = c(10.0, 45.0);
        for lon in [-170.0, -10.0, 9.999_999, 10.0, 10.000_001, 170.0] {
            for lat in [-80.0, 44.999_999, 45.0, 80.0] {
                let b = initial_bearing_degrees(origin, c(lon, lat));
                assert!((0.0..360.0).contains(&b), "bearing {b} out of range");
            }
        }
    }

    #[test]
    fn compass_labels() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(359.0), "N");
        assert_eq!(compass_point(45.0), "NE");
        assert_eq!(compass_point(200.0), "SSW");
    }

    #[test]
    fn projection_round_trip() {
        for lon in [-179.999, -118.2437, -0.5, 0.0, 45.25, 179.999] {
            for lat in [-85.0, -34.0522, 0.0, 12.5, 60.0, 85.0] {
                let original = c(lon, lat);
                let (x, y) = to_projected(original).unwrap();
                let back = to_geographic(x, y).unwrap();
                assert!((back.longitude() - lon).abs() < 1e-6);
                assert!((back.latitude() - lat).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn projection_half_width_derives_from_radius() {
        let (x, _) = to_projected(c(180.0, 0.0)).unwrap();
        assert!((x - 20_037_508.342_789_244).abs() < 1e-3);
    }

    #[test]
    fn projection_rejects_polar_latitude() {
        assert!(matches!(
            to_projected(c(0.0, 89.0)),
            Err(GeoError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn to_geographic_rejects_out_of_world_x() {
        assert!(to_geographic(MERCATOR_RADIUS_M * PI * 1.5, 0.0).is_err());
        assert!(to_geographic(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn destination_matches_distance_and_bearing() {
        let origin = c(-80.0, 30.0);
        let target = destination(origin, 2.0, 45.0);
        assert!((distance_miles(origin, target) - 2.0).abs() < 1e-6);
        assert!((initial_bearing_degrees(origin, target) - 45.0).abs() < 1e-3);
    }

    #[test]
    fn buffer_polygon_vertices_sit_on_radius() {
        let center = c(-90.0, 35.0);
        let Geometry::Polygon { rings, .. } = buffer_polygon(center, 1.0, 16) else {
            panic!("expected polygon");
        };
        assert_eq!(rings[0].len(), 17);
        assert_eq!(rings[0].first(), rings[0].last());
        for [x, y] in &rings[0] {
            let d = distance_miles(center, c(*x, *y));
            assert!((d - 1.0).abs() < 1e-6);
        }
        assert!(rings_contain(&rings, center.longitude(), center.latitude()));
    }

    #[test]
    fn rings_with_hole_exclude_hole() {
        let outer = vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]];
        let hole = vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]];
        let rings = vec![outer, hole];
        assert!(rings_contain(&rings, 2.0, 2.0));
        assert!(!rings_contain(&rings, 5.0, 5.0));
        assert!(!rings_contain(&rings, 11.0, 5.0));
    }

    #[test]
    fn nearest_point_handles_mercator_geometry() {
        let origin = c(-100.0, 40.0);
        let vertex = c(-100.0, 40.01);
        let (x, y) = to_projected(vertex).unwrap();
        let geometry = Geometry::Point {
            x,
            y,
            spatial_reference: SpatialReference::WebMercator,
        };
        let (distance, bearing) = nearest_point(origin, &geometry).unwrap();
        assert!((distance - distance_miles(origin, vertex)).abs() < 1e-6);
        assert!(bearing < 1e-3 || bearing > 359.999);
    }

    #[test]
    fn nearest_point_is_zero_inside_polygon() {
        let origin = c(-100.0, 40.0);
        let geometry = buffer_polygon(origin, 0.5, 12);
        let (distance, _) = nearest_point(origin, &geometry).unwrap();
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn nearest_point_measures_to_edge_not_vertex() {
        // long east-west strip whose southern edge passes 0.1 mi north of
        // the origin; every vertex is tens of miles away
        let origin = c(-90.0, 30.0);
        let edge_lat = destination(origin, 0.1, 0.0).latitude();
        let geometry = Geometry::Polygon {
            rings: vec![vec![
                [-91.0, edge_lat],
                [-89.0, edge_lat],
                [-89.0, edge_lat + 0.5],
                [-91.0, edge_lat + 0.5],
                [-91.0, edge_lat],
            ]],
            spatial_reference: SpatialReference::Wgs84,
        };
        let (distance, bearing) = nearest_point(origin, &geometry).unwrap();
        assert!((distance - 0.1).abs() < 1e-3, "distance {distance}");
        assert!(bearing < 0.5 || bearing > 359.5, "bearing {bearing}");
    }

    #[test]
    fn buffer_across_antimeridian_stays_local() {
        let center = c(179.99, -16.5);
        let Geometry::Polygon { rings, .. } = buffer_polygon(center, 1.0, 32) else {
            panic!("expected polygon");
        };
        let (min_lon, max_lon) = rings[0]
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), [x, _]| (lo.min(*x), hi.max(*x)));
        assert!(max_lon > 180.0);
        assert!(max_lon - min_lon < 0.05, "span {min_lon}..{max_lon}");
        assert!(rings_contain(&rings, center.longitude(), center.latitude()));
        assert!(!rings_contain(&rings, 0.0, -16.5));
        for [x, y] in &rings[0] {
            let lon = (x + 180.0).rem_euclid(360.0) - 180.0;
            assert!((distance_miles(center, c(lon, *y)) - 1.0).abs() < 1e-6);
        }

        let env = envelope_around(c(-179.995, 52.0), 1.0);
        assert!(env.xmin < -180.0 && env.xmin < env.xmax);
        assert!(env.xmax - env.xmin < 0.06);
    }

    #[test]
    fn unwrap_longitude_keeps_nearby_values() {
        assert_eq!(unwrap_longitude(-100.0, -90.0), -100.0);
        assert!((unwrap_longitude(-179.99, 179.99) - 180.01).abs() < 1e-9);
        assert!((unwrap_longitude(179.99, -179.99) + 180.01).abs() < 1e-9);
    }

    #[test]
    fn envelope_around_contains_center() {
        let center = c(-81.4, 28.5);
        let env = envelope_around(center, 1.0);
        assert!(env.xmin < center.longitude() && center.longitude() < env.xmax);
        assert!(env.ymin < center.latitude() && center.latitude() < env.ymax);
        let height = distance_miles(c(center.longitude(), env.ymin), c(center.longitude(), env.ymax));
        assert!((height - 2.0).abs() < 1e-6);
    }
}
