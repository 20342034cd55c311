//! Great-circle distance between node positions.

use meshtrace_core::Position;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance source for segment observations.
pub trait Geodesic: Send + Sync {
    /// Distance in kilometres between two positions.
    fn distance_km(&self, from: &Position, to: &Position) -> f64;
}

/// Haversine distance on a spherical earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl Geodesic for Haversine {
    fn distance_km(&self, from: &Position, to: &Position) -> f64 {
        haversine_km(from, to)
    }
}

pub fn haversine_km(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}
