//! Placement of the tiling frame on the WGS84 ellipsoid.
//!
//! Model coordinates are read as East-North-Up metres around a geographic
//! origin; the root transform carries them into Earth-centred, Earth-fixed
//! (ECEF) coordinates.

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};

/// WGS84 semi-major axis in metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// First eccentricity squared.
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Geodetic anchor of the model's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    /// Degrees east.
    pub longitude: f64,
    /// Degrees north.
    pub latitude: f64,
    /// Metres above the ellipsoid.
    #[serde(default)]
    pub height: f64,
}

impl GeoOrigin {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(TilerError::Validation(format!(
                "longitude must be within [-180, 180], got {}",
                self.longitude
            )));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(TilerError::Validation(format!(
                "latitude must be within [-90, 90], got {}",
                self.latitude
            )));
        }
        if !self.height.is_finite() {
            return Err(TilerError::Validation(format!(
                "height must be finite, got {}",
                self.height
            )));
        }
        Ok(())
    }

    /// ECEF position of the origin in metres.
    pub fn to_ecef(&self) -> DVec3 {
        let (sin_lon, cos_lon) = self.longitude.to_radians().sin_cos();
        let (sin_lat, cos_lat) = self.latitude.to_radians().sin_cos();

        // Prime vertical radius of curvature
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        DVec3::new(
            (n + self.height) * cos_lat * cos_lon,
            (n + self.height) * cos_lat * sin_lon,
            (n * (1.0 - WGS84_E2) + self.height) * sin_lat,
        )
    }

    /// ENU to ECEF: rotation onto the local tangent plane plus the origin.
    pub fn enu_to_ecef(&self) -> DMat4 {
        let (sin_lon, cos_lon) = self.longitude.to_radians().sin_cos();
        let (sin_lat, cos_lat) = self.latitude.to_radians().sin_cos();

        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
        DMat4::from_cols(
            east.extend(0.0),
            north.extend(0.0),
            up.extend(0.0),
            self.to_ecef().extend(1.0),
        )
    }
}

/// Column-major root transform for a tileset whose tiles start at the
/// model minimum `local_origin`.
///
/// Without a geographic origin this is a plain translation back to model
/// coordinates.
pub fn root_transform(geo: Option<&GeoOrigin>, local_origin: [f64; 3]) -> [f64; 16] {
    let local = DMat4::from_translation(DVec3::from_array(local_origin));
    match geo {
        Some(g) => (g.enu_to_ecef() * local).to_cols_array(),
        None => local.to_cols_array(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn equator_prime_meridian_sits_on_the_x_axis() {
        let ecef = GeoOrigin::new(0.0, 0.0, 0.0).to_ecef();
        assert_abs_diff_eq!(ecef.x, WGS84_A, epsilon = 1e-6);
        assert_abs_diff_eq!(ecef.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(ecef.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn north_pole_is_the_semi_minor_axis() {
        let ecef = GeoOrigin::new(0.0, 90.0, 0.0).to_ecef();
        assert_abs_diff_eq!(ecef.z, WGS84_A * (1.0 - WGS84_F), epsilon = 1e-3);
        assert_abs_diff_eq!(ecef.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn london() {
        // 51.5074 N, 0.1278 W
        let ecef = GeoOrigin::new(-0.1278, 51.5074, 0.0).to_ecef();
        assert_abs_diff_eq!(ecef.x, 3_978_000.0, epsilon = 1_000.0);
        assert_abs_diff_eq!(ecef.y, -8_700.0, epsilon = 1_000.0);
        assert_abs_diff_eq!(ecef.z, 4_968_000.0, epsilon = 1_000.0);
    }

    #[test]
    fn height_moves_along_up() {
        let geo = GeoOrigin::new(30.0, 45.0, 0.0);
        let raised = GeoOrigin { height: 100.0, ..geo };
        let up = geo.enu_to_ecef().z_axis.truncate();
        let delta = raised.to_ecef() - geo.to_ecef();
        assert_abs_diff_eq!(delta.length(), 100.0, epsilon = 1e-6);
        assert_abs_diff_eq!(delta.normalize().dot(up), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn enu_axes_are_orthonormal() {
        let m = GeoOrigin::new(116.39, 39.9, 50.0).enu_to_ecef();
        let (e, n, u) = (m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate());
        assert_abs_diff_eq!(e.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(n.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.dot(n), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.cross(n).dot(u), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn root_transform_without_geo_is_a_translation() {
        let m = root_transform(None, [5.0, 6.0, 7.0]);
        assert_eq!(&m[12..], &[5.0, 6.0, 7.0, 1.0]);
        assert_eq!(m[0], 1.0);
        assert_eq!(m[5], 1.0);
    }

    #[test]
    fn root_transform_applies_the_local_origin_in_enu() {
        // At (0, 0) east is +Y and north is +Z in ECEF.
        let geo = GeoOrigin::new(0.0, 0.0, 0.0);
        let m = root_transform(Some(&geo), [10.0, 20.0, 0.0]);
        assert_abs_diff_eq!(m[12], WGS84_A, epsilon = 1e-6);
        assert_abs_diff_eq!(m[13], 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m[14], 20.0, epsilon = 1e-6);
        assert_eq!(m[15], 1.0);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoOrigin::new(181.0, 0.0, 0.0).validate().is_err());
        assert!(GeoOrigin::new(0.0, -91.0, 0.0).validate().is_err());
        assert!(GeoOrigin::new(0.0, 0.0, f64::NAN).validate().is_err());
        assert!(GeoOrigin::new(-0.1278, 51.5074, 35.0).validate().is_ok());
    }
}
