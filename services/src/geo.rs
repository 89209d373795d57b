//! Great-circle distance between WGS84 degree coordinates.
//!
//! One Earth-radius constant for every call site. Inputs are not validated;
//! implausible coordinates simply produce an implausible distance, and callers
//! own plausibility checks.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two (lat, lon) pairs given in degrees.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_meters() {
        let d = haversine_distance_m(14.5995, 120.9842, 14.5995, 120.9842);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn one_degree_of_longitude_at_the_equator() {
        // ~111.195 km, allow 1%
        let d = haversine_distance_m(0.0, 0.0, 0.0, 1.0);
        let expected = 111_195.0;
        assert!((d - expected).abs() / expected < 0.01, "got {d}");
    }

    #[test]
    fn symmetric_in_its_arguments() {
        let a = haversine_distance_m(-25.7545, 28.2314, -25.7560, 28.2330);
        let b = haversine_distance_m(-25.7560, 28.2330, -25.7545, 28.2314);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn meridian_offset_maps_back_to_arc_length() {
        // A pure-latitude offset of d/R radians is a great-circle arc of
        // exactly d meters, which makes boundary fixtures solvable in closed
        // form.
        let offset_deg = (250.0 / EARTH_RADIUS_M).to_degrees();
        let d = haversine_distance_m(-25.75, 28.23, -25.75 + offset_deg, 28.23);
        assert!((d - 250.0).abs() < 1e-6, "got {d}");
    }
}
