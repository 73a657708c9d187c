//! Spatial math for road matching and distance calculations.
//!
//! Coordinates are decimal degrees in (lon, lat) order, matching the way road
//! segments and pings are reported.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Calculate the great-circle distance between two points in kilometers.
///
/// Uses the haversine formula on a sphere of radius [`EARTH_RADIUS_KM`].
/// Symmetric in its arguments and zero for identical points.
pub fn great_circle_distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Distance from a point to a road segment.
///
/// When the point falls inside the segment's axis-aligned bounding box this
/// returns the perpendicular distance to the infinite line through the two
/// endpoints, treating raw lon/lat as planar coordinates (so the value is in
/// degree units, not kilometers). Otherwise it returns the great-circle
/// distance to the closer endpoint.
///
/// The bounding-box test only approximates "projects onto the segment": near
/// the ends of a diagonal segment a point can land in the box without
/// projecting onto the segment, or the reverse. Nearest-road tie-breaking
/// depends on this exact behaviour, so it is not a true projection test.
pub fn point_to_segment_distance_km(point: GeoPoint, start: GeoPoint, end: GeoPoint) -> f64 {
    // Line through the endpoints as A*x + B*y + C = 0, with C folded in by
    // measuring from `start` so that both endpoints land exactly on zero.
    let a = end.lat - start.lat;
    let b = start.lon - end.lon;
    let norm = (a * a + b * b).sqrt();

    if norm <= f64::EPSILON {
        // Zero-length segment: there is no line to project onto.
        return great_circle_distance_km(point, start);
    }

    if within_bounding_box(point, start, end) {
        let dx = point.lon - start.lon;
        let dy = point.lat - start.lat;
        return (a * dx + b * dy).abs() / norm;
    }

    let to_start = great_circle_distance_km(point, start);
    let to_end = great_circle_distance_km(point, end);
    to_start.min(to_end)
}

fn within_bounding_box(point: GeoPoint, start: GeoPoint, end: GeoPoint) -> bool {
    let (min_lon, max_lon) = (start.lon.min(end.lon), start.lon.max(end.lon));
    let (min_lat, max_lat) = (start.lat.min(end.lat), start.lat.max(end.lat));
    point.lon >= min_lon && point.lon <= max_lon && point.lat >= min_lat && point.lat <= max_lat
}

/// Direction from `start` to `end` in degrees, 0 = north, clockwise, in [0, 360).
///
/// Measured in the same raw lon/lat plane as [`point_to_segment_distance_km`],
/// so it is not the geodesic initial bearing away from the equator.
pub fn bearing_degrees(start: GeoPoint, end: GeoPoint) -> f64 {
    let delta_lon = end.lon - start.lon;
    let delta_lat = end.lat - start.lat;

    let degrees = delta_lon.atan2(delta_lat).to_degrees().rem_euclid(360.0);
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `origin` - Starting position
/// * `distance_km` - Distance in kilometers
/// * `bearing_deg` - Bearing in degrees (0 = north, 90 = east)
pub fn offset_by_bearing(origin: GeoPoint, distance_km: f64, bearing_deg: f64) -> GeoPoint {
    if distance_km.abs() <= f64::EPSILON {
        return origin;
    }

    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();
    let bearing_rad = bearing_deg.to_radians();
    let angular_distance = distance_km / EARTH_RADIUS_KM;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    GeoPoint::new(lon2.to_degrees(), lat2.to_degrees())
}

/// Linear interpolation between two points, `t` in [0, 1].
pub fn interpolate(start: GeoPoint, end: GeoPoint, t: f64) -> GeoPoint {
    let t = t.clamp(0.0, 1.0);
    GeoPoint::new(
        start.lon + (end.lon - start.lon) * t,
        start.lat + (end.lat - start.lat) * t,
    )
}
