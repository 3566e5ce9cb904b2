//! Coordinate reference systems the engine can project between.
//!
//! Everything routes through geographic WGS-84 lon/lat as the hub: a source
//! CRS unprojects to lon/lat, the grid CRS projects from lon/lat. The
//! transverse-Mercator series below are the classic Snyder expansions and
//! close to well under a centimeter over a UTM zone, which is far below any
//! practical cell size.

use serde::{Deserialize, Serialize};

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);

    /// Second eccentricity squared.
    pub const E2P: f64 = (A * A - B * B) / (B * B);
}

const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude cutoff of the square web-mercator world; beyond it the
/// projection has no usable image.
const MERCATOR_LAT_LIMIT: f64 = 85.051_128_78;

/// A coordinate reference system for layer inputs and the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoCrs {
    /// WGS-84 geographic lon/lat degrees (EPSG:4326).
    Geographic,
    /// Spherical web-mercator meters (EPSG:3857).
    WebMercator,
    /// A UTM zone on the WGS-84 ellipsoid (EPSG:326xx / 327xx).
    Utm { zone: u8, south: bool },
}

/// How the output CRS is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrsChoice {
    /// Pick the UTM zone containing the region centroid.
    Auto,
    Fixed(GeoCrs),
}

impl GeoCrs {
    /// The UTM zone containing the given geographic point.
    pub fn utm_for(lon: f64, lat: f64) -> GeoCrs {
        let zone = (((lon + 180.0) / 6.0).floor() as i32).clamp(0, 59) as u8 + 1;
        GeoCrs::Utm {
            zone,
            south: lat < 0.0,
        }
    }

    pub fn to_epsg(self) -> u32 {
        match self {
            GeoCrs::Geographic => 4326,
            GeoCrs::WebMercator => 3857,
            GeoCrs::Utm { zone, south: false } => 32_600 + zone as u32,
            GeoCrs::Utm { zone, south: true } => 32_700 + zone as u32,
        }
    }

    /// Project geographic lon/lat degrees into this CRS. `None` when the
    /// point has no finite image (poles under mercator, non-finite input).
    pub fn project(self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return None;
        }

        let (x, y) = match self {
            GeoCrs::Geographic => (lon, lat),
            GeoCrs::WebMercator => {
                if lat.abs() > MERCATOR_LAT_LIMIT {
                    return None;
                }
                let x = wgs84::A * lon.to_radians();
                let y = wgs84::A * (std::f64::consts::FRAC_PI_4 + 0.5 * lat.to_radians()).tan().ln();
                (x, y)
            }
            GeoCrs::Utm { zone, south } => utm_forward(zone, south, lon, lat),
        };

        (x.is_finite() && y.is_finite()).then_some((x, y))
    }

    /// Inverse of [`GeoCrs::project`].
    pub fn unproject(self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }

        let (lon, lat) = match self {
            GeoCrs::Geographic => (x, y),
            GeoCrs::WebMercator => {
                let lon = (x / wgs84::A).to_degrees();
                let lat = (2.0 * (y / wgs84::A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
                (lon, lat)
            }
            GeoCrs::Utm { zone, south } => utm_inverse(zone, south, x, y),
        };

        (lon.is_finite() && lat.is_finite() && lat.abs() <= 90.0).then_some((lon, lat))
    }
}

impl std::fmt::Display for GeoCrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.to_epsg())
    }
}

/// Reproject a point between two systems through the lon/lat hub.
pub fn transform(src: GeoCrs, dst: GeoCrs, x: f64, y: f64) -> Option<(f64, f64)> {
    if src == dst {
        return (x.is_finite() && y.is_finite()).then_some((x, y));
    }

    let (lon, lat) = src.unproject(x, y)?;
    dst.project(lon, lat)
}

#[inline]
fn central_meridian_deg(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// Meridian arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = wgs84::E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    wgs84::A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn utm_forward(zone: u8, south: bool, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let phi = lat_deg.to_radians();
    let dlam = (lon_deg - central_meridian_deg(zone)).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = sin_phi / cos_phi;

    let e2 = wgs84::E2;
    let ep2 = wgs84::E2P;

    let n = wgs84::A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * dlam;

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a2 * a2;
    let a5 = a4 * a;
    let a6 = a4 * a2;

    let easting = UTM_SCALE
        * n
        * (a + (1.0 - t + c) * a3 / 6.0 + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
        + UTM_FALSE_EASTING;

    let mut northing = UTM_SCALE
        * (meridian_arc(phi)
            + n * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    if south {
        northing += UTM_FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

fn utm_inverse(zone: u8, south: bool, easting: f64, northing: f64) -> (f64, f64) {
    let e2 = wgs84::E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = wgs84::E2P;

    let x = easting - UTM_FALSE_EASTING;
    let y = if south {
        northing - UTM_FALSE_NORTHING_SOUTH
    } else {
        northing
    };

    // Footpoint latitude from the rectified arc length.
    let mu = (y / UTM_SCALE) / (wgs84::A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let sqrt_1me2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_2 * e1_2;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let tan1 = sin1 / cos1;

    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let sin1_sq = sin1 * sin1;
    let n1 = wgs84::A / (1.0 - e2 * sin1_sq).sqrt();
    let r1 = wgs84::A * (1.0 - e2) / (1.0 - e2 * sin1_sq).powf(1.5);

    let d = x / (n1 * UTM_SCALE);
    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d2 * d2;
    let d5 = d4 * d;
    let d6 = d4 * d2;

    let phi = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lam = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5 / 120.0)
        / cos1;

    (
        central_meridian_deg(zone) + lam.to_degrees(),
        phi.to_degrees(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn utm_zone_selection() {
        assert_eq!(
            GeoCrs::utm_for(139.76, 35.68),
            GeoCrs::Utm { zone: 54, south: false }
        );
        assert_eq!(
            GeoCrs::utm_for(151.21, -33.87),
            GeoCrs::Utm { zone: 56, south: true }
        );
        assert_eq!(
            GeoCrs::utm_for(-180.0, 10.0),
            GeoCrs::Utm { zone: 1, south: false }
        );
    }

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let crs = GeoCrs::Utm { zone: 31, south: false };
        let (x, y) = crs.project(3.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn utm_round_trip_closes() {
        let samples = [
            (139.7671, 35.6812),
            (138.20, 34.95),
            (141.0, 39.5),
            (136.9, 35.1),
        ];
        let crs = GeoCrs::Utm { zone: 54, south: false };

        for (lon, lat) in samples {
            let (x, y) = crs.project(lon, lat).unwrap();
            let (lon2, lat2) = crs.unproject(x, y).unwrap();
            assert_abs_diff_eq!(lon, lon2, epsilon = 1e-8);
            assert_abs_diff_eq!(lat, lat2, epsilon = 1e-8);
        }
    }

    #[test]
    fn utm_southern_hemisphere_round_trip() {
        let crs = GeoCrs::Utm { zone: 56, south: true };
        let (x, y) = crs.project(151.21, -33.87).unwrap();
        assert!(y > 0.0 && y < UTM_FALSE_NORTHING_SOUTH);

        let (lon, lat) = crs.unproject(x, y).unwrap();
        assert_abs_diff_eq!(lon, 151.21, epsilon = 1e-8);
        assert_abs_diff_eq!(lat, -33.87, epsilon = 1e-8);
    }

    #[test]
    fn web_mercator_round_trip() {
        let crs = GeoCrs::WebMercator;
        let (x, y) = crs.project(-0.1276, 51.5072).unwrap();
        let (lon, lat) = crs.unproject(x, y).unwrap();
        assert_abs_diff_eq!(lon, -0.1276, epsilon = 1e-9);
        assert_abs_diff_eq!(lat, 51.5072, epsilon = 1e-9);
    }

    #[test]
    fn pole_has_no_mercator_image() {
        assert!(GeoCrs::WebMercator.project(0.0, 90.0).is_none());
        assert!(GeoCrs::WebMercator.project(0.0, f64::NAN).is_none());
    }

    #[test]
    fn cross_crs_transform_roundtrips() {
        let utm = GeoCrs::Utm { zone: 54, south: false };
        let (mx, my) = transform(GeoCrs::Geographic, GeoCrs::WebMercator, 139.76, 35.68).unwrap();
        let (ux, uy) = transform(GeoCrs::WebMercator, utm, mx, my).unwrap();
        let (lon, lat) = transform(utm, GeoCrs::Geographic, ux, uy).unwrap();
        assert_abs_diff_eq!(lon, 139.76, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, 35.68, epsilon = 1e-7);
    }
}
