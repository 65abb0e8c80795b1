//! Great-circle distance on coordinates given in degrees.

use crate::model::RADIUS_KM;

/// Approximate distance in kilometres between two (longitude, latitude)
/// pairs given in degrees.
///
/// The dot product is clamped to 1.0: floating rounding can push it just
/// above 1 for identical or antipodal points, and `acos` would return NaN.
pub fn distance_km(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    const PI: f64 = std::f64::consts::PI;

    let radlat1 = PI * lat1 / 180.0;
    let radlat2 = PI * lat2 / 180.0;

    let theta = lng1 - lng2;
    let radtheta = PI * theta / 180.0;

    let mut dist =
        radlat1.sin() * radlat2.sin() + radlat1.cos() * radlat2.cos() * radtheta.cos();
    if dist > 1.0 {
        dist = 1.0;
    }

    dist = dist.acos();
    dist = dist * 180.0 / PI;
    dist = dist * 60.0 * 1.1515;
    dist * 1.609344
}

/// Whether the candidate point lies within the service radius of the origin.
pub fn within_radius(
    candidate_lng: f64,
    candidate_lat: f64,
    origin_lng: f64,
    origin_lat: f64,
) -> bool {
    distance_km(candidate_lng, candidate_lat, origin_lng, origin_lat) < RADIUS_KM
}
