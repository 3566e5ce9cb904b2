//! The geographic area of interest.

use crate::crs::GeoCrs;
use crate::error::{Result, VoxError};

/// A closed polygon in geographic lon/lat degrees delimiting the area to
/// voxelize. Immutable once constructed; only the grid-specification stage
/// consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingRegion {
    /// Exterior ring, open form (the closing vertex is implicit).
    ring: Vec<[f64; 2]>,
}

impl BoundingRegion {
    /// An axis-aligned lon/lat rectangle.
    pub fn rect(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            ring: vec![
                [lon_min, lat_min],
                [lon_max, lat_min],
                [lon_max, lat_max],
                [lon_min, lat_max],
            ],
        }
    }

    /// A polygonal region. Accepts both open and closed rings; a repeated
    /// closing vertex is dropped.
    pub fn polygon(mut ring: Vec<[f64; 2]>) -> Self {
        if ring.len() >= 2 && ring.first() == ring.last() {
            ring.pop();
        }
        Self { ring }
    }

    pub fn ring(&self) -> &[[f64; 2]] {
        &self.ring
    }

    /// Validate the ring: enough distinct finite vertices, non-zero
    /// enclosed area, and no antimeridian-scale longitude span.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| VoxError::InvalidRegion {
            reason: reason.to_string(),
        };

        if self.ring.len() < 3 {
            return Err(invalid("fewer than 3 vertices"));
        }

        for &[lon, lat] in &self.ring {
            if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
                return Err(invalid("non-finite or out-of-range vertex"));
            }
        }

        let (mut lon_min, mut lon_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for &[lon, _] in &self.ring {
            lon_min = lon_min.min(lon);
            lon_max = lon_max.max(lon);
        }
        if lon_max - lon_min >= 180.0 {
            return Err(invalid("longitude span crosses the antimeridian"));
        }

        if shoelace_area(&self.ring).abs() < f64::EPSILON {
            return Err(invalid("enclosed area is zero"));
        }

        Ok(())
    }

    /// Geographic center of the ring's bounding box, used to pick an
    /// automatic UTM zone.
    pub fn centroid(&self) -> [f64; 2] {
        let (mut lon_min, mut lat_min) = (f64::INFINITY, f64::INFINITY);
        let (mut lon_max, mut lat_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

        for &[lon, lat] in &self.ring {
            if lon.is_finite() && lat.is_finite() {
                lon_min = lon_min.min(lon);
                lon_max = lon_max.max(lon);
                lat_min = lat_min.min(lat);
                lat_max = lat_max.max(lat);
            }
        }

        [0.5 * (lon_min + lon_max), 0.5 * (lat_min + lat_max)]
    }

    /// Reproject the ring into a projected CRS.
    pub fn project(&self, crs: GeoCrs) -> Result<Vec<[f64; 2]>> {
        self.ring
            .iter()
            .map(|&[lon, lat]| {
                crs.project(lon, lat)
                    .map(|(x, y)| [x, y])
                    .ok_or_else(|| VoxError::InvalidRegion {
                        reason: format!("vertex ({lon}, {lat}) has no image in {crs}"),
                    })
            })
            .collect()
    }
}

/// Signed shoelace area of an open ring (planar; only used for degeneracy
/// checks and winding, never for metric quantities).
pub fn shoelace_area(ring: &[[f64; 2]]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }

    let mut acc = 0.0;
    for i in 0..n {
        let [x0, y0] = ring[i];
        let [x1, y1] = ring[(i + 1) % n];
        acc += x0 * y1 - x1 * y0;
    }
    acc * 0.5
}
