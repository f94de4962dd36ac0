// Geocoding interface consumed by the geolocation validator.

use crate::error::Result;
use serde_json::Value;

/// How precisely a geocoder pinned an address to a point. Mirrors the usual
/// provider location-type classification; only [`Precision::Rooftop`] counts
/// as an exact street-address match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Rooftop,
    RangeInterpolated,
    GeometricCenter,
    Approximate,
}

/// One geocoder result for an address lookup.
#[derive(Debug, Clone)]
pub struct GeoMatch {
    /// The formatted address the provider matched.
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub precision: Precision,
    /// Raw administrative-area components, provider-shaped.
    pub components: Value,
}

impl GeoMatch {
    pub fn point(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// External geocoding provider; implementations live with the host service.
pub trait GeocodeProvider {
    fn geocode(&self, address: &str) -> Result<Vec<GeoMatch>>;
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle (haversine) distance in meters between two `(lat, lon)`
/// points given in degrees.
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat_a, lon_a) = (a.0.to_radians(), a.1.to_radians());
    let (lat_b, lon_b) = (b.0.to_radians(), b.1.to_radians());

    let d_lat = lat_b - lat_a;
    let d_lon = lon_b - lon_a;

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}
