//! Rasterization of source layers onto the common grid.
//!
//! Vector geometries burn by cell-overlap area: a continuous geometry
//! (building or canopy height) claims a cell when it covers more than half
//! of it, and overlapping claims keep the maximum value, which errs on the
//! side of obstruction. A categorical geometry claims a cell by greatest
//! overlap area, ties breaking to the smallest geometry index. Rasters
//! resample through an inverse projection of each cell center with a
//! per-layer interpolation policy.
//!
//! Cells no source datum reaches keep the layer's no-data sentinel; a
//! missing sample is never reported as zero.

use log::{debug, info, warn};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use smallvec::SmallVec;

use crate::crs;
use crate::error::{Result, VoxError};
use crate::grid::{Grid2d, GridSpec};
use crate::layers::{
    LayerGrid, LayerKind, LayerSource, LayerStack, RasterLayer, Resampling, SourceLayer,
    VectorGeometry, VectorLayer, NO_DATA_CLASS,
};
use crate::region::shoelace_area;

/// Fraction of a cell a continuous geometry must cover to claim it.
const COVERAGE_THRESHOLD: f64 = 0.5;

/// Rasterize every source layer onto `spec`'s grid. Layers are independent
/// and run in parallel; each produces exactly one grid of `spec`'s shape.
pub fn rasterize_layers(spec: &GridSpec, sources: &[SourceLayer]) -> Result<LayerStack> {
    info!(
        "Rasterizing {} layers onto a {}x{} grid",
        sources.len(),
        spec.n_rows,
        spec.n_cols
    );

    let grids: Vec<Result<(crate::layers::LayerRole, LayerGrid)>> = sources
        .par_iter()
        .map(|layer| {
            let grid = match &layer.source {
                LayerSource::Vector(vector) => rasterize_vector(spec, vector)?,
                LayerSource::Raster(raster) => resample_raster(spec, raster)?,
            };

            if grid.is_all_nodata() {
                return Err(VoxError::EmptyLayer {
                    layer: layer.source.name().to_string(),
                    n_rows: spec.n_rows,
                    n_cols: spec.n_cols,
                });
            }

            Ok((layer.role, grid))
        })
        .collect();

    let mut stack = LayerStack::new();
    for result in grids {
        let (role, grid) = result?;
        stack.insert(role, grid);
    }

    Ok(stack)
}

/// A geometry envelope in cell coordinates, for the R-tree.
struct IndexedRing {
    index: u32,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedRing {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Burn a vector layer into a grid of `spec`'s shape.
pub fn rasterize_vector(spec: &GridSpec, layer: &VectorLayer) -> Result<LayerGrid> {
    let rings = project_rings(spec, layer)?;

    if layer.kind == LayerKind::Categorical {
        for geometry in &layer.geometries {
            let code = geometry.value;
            if code.fract() != 0.0 || code < 0.0 || code >= NO_DATA_CLASS as f64 {
                return Err(VoxError::LayerAlignment {
                    layer: layer.name.clone(),
                    reason: format!("categorical value {code} is not a valid class code"),
                });
            }
        }
    }

    let boxes: Vec<IndexedRing> = rings
        .iter()
        .enumerate()
        .filter(|(_, ring)| ring.len() >= 3)
        .map(|(index, ring)| {
            let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
            let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
            for &[x, y] in ring.iter() {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
            IndexedRing {
                index: index as u32,
                env: AABB::from_corners([min_x, min_y], [max_x, max_y]),
            }
        })
        .collect();

    let tree = RTree::bulk_load(boxes);
    let n_cols = spec.n_cols;

    match layer.kind {
        LayerKind::Continuous => {
            let mut data = vec![f32::NAN; spec.cell_count()];
            data.par_chunks_mut(n_cols).enumerate().for_each(|(row, out)| {
                for (col, cell) in out.iter_mut().enumerate() {
                    let mut best = f32::NAN;
                    for hit in candidate_indices(&tree, row, col) {
                        let geometry = &layer.geometries[hit as usize];
                        let area = overlap_area(&rings[hit as usize], col as f64, row as f64);
                        if area > COVERAGE_THRESHOLD {
                            let value = geometry.value as f32;
                            if best.is_nan() || value > best {
                                best = value;
                            }
                        }
                    }
                    *cell = best;
                }
            });
            Ok(LayerGrid::Continuous(Grid2d::from_vec(
                spec.n_rows,
                n_cols,
                data,
            )))
        }
        LayerKind::Categorical => {
            let mut data = vec![NO_DATA_CLASS; spec.cell_count()];
            data.par_chunks_mut(n_cols).enumerate().for_each(|(row, out)| {
                for (col, cell) in out.iter_mut().enumerate() {
                    let mut best_area = 0.0f64;
                    let mut best_index = u32::MAX;
                    for hit in candidate_indices(&tree, row, col) {
                        let area = overlap_area(&rings[hit as usize], col as f64, row as f64);
                        if area > best_area || (area == best_area && area > 0.0 && hit < best_index)
                        {
                            best_area = area;
                            best_index = hit;
                        }
                    }
                    if best_index != u32::MAX {
                        *cell = layer.geometries[best_index as usize].value as u16;
                    }
                }
            });
            Ok(LayerGrid::Categorical(Grid2d::from_vec(
                spec.n_rows,
                n_cols,
                data,
            )))
        }
    }
}

/// Reproject every ring into fractional cell coordinates.
fn project_rings(spec: &GridSpec, layer: &VectorLayer) -> Result<Vec<Vec<[f64; 2]>>> {
    let mut rings = Vec::with_capacity(layer.geometries.len());
    let mut degenerate = 0usize;

    for geometry in &layer.geometries {
        let mut ring = Vec::with_capacity(geometry.ring.len());
        for &[x, y] in geometry.ring.iter() {
            let (gx, gy) = crs::transform(layer.crs, spec.crs, x, y).ok_or_else(|| {
                VoxError::LayerAlignment {
                    layer: layer.name.clone(),
                    reason: format!("vertex ({x}, {y}) has no image in {}", spec.crs),
                }
            })?;
            let (col, row) = spec.world_to_cell(gx, gy);
            ring.push([col, row]);
        }

        if ring.len() < 3 {
            degenerate += 1;
            ring.clear();
        }
        rings.push(ring);
    }

    if degenerate > 0 {
        warn!(
            "Layer '{}': skipped {} degenerate geometries",
            layer.name, degenerate
        );
    }

    Ok(rings)
}

#[inline]
fn candidate_indices(tree: &RTree<IndexedRing>, row: usize, col: usize) -> SmallVec<[u32; 8]> {
    let cell = AABB::from_corners([col as f64, row as f64], [col as f64 + 1.0, row as f64 + 1.0]);
    let mut hits = SmallVec::new();
    for obj in tree.locate_in_envelope_intersecting(&cell) {
        hits.push(obj.index);
    }
    hits
}

/// Area of `ring ∩ [col, col+1] x [row, row+1]` in cell units.
fn overlap_area(ring: &[[f64; 2]], col: f64, row: f64) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let clipped = clip_ring_to_rect(ring, col, row, col + 1.0, row + 1.0);
    shoelace_area(&clipped).abs()
}

/// Sutherland-Hodgman clip of a ring against an axis-aligned rectangle.
fn clip_ring_to_rect(ring: &[[f64; 2]], x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<[f64; 2]> {
    #[inline]
    fn clip_edge(
        pts: &[[f64; 2]],
        inside: impl Fn(&[f64; 2]) -> bool,
        cross: impl Fn(&[f64; 2], &[f64; 2]) -> [f64; 2],
    ) -> Vec<[f64; 2]> {
        let mut out = Vec::with_capacity(pts.len() + 4);
        for i in 0..pts.len() {
            let s = &pts[(i + pts.len() - 1) % pts.len()];
            let e = &pts[i];
            if inside(e) {
                if !inside(s) {
                    out.push(cross(s, e));
                }
                out.push(*e);
            } else if inside(s) {
                out.push(cross(s, e));
            }
        }
        out
    }

    #[inline]
    fn at_x(s: &[f64; 2], e: &[f64; 2], x: f64) -> [f64; 2] {
        let t = (x - s[0]) / (e[0] - s[0]);
        [x, s[1] + t * (e[1] - s[1])]
    }

    #[inline]
    fn at_y(s: &[f64; 2], e: &[f64; 2], y: f64) -> [f64; 2] {
        let t = (y - s[1]) / (e[1] - s[1]);
        [s[0] + t * (e[0] - s[0]), y]
    }

    let pts = clip_edge(ring, |p| p[0] >= x0, |s, e| at_x(s, e, x0));
    if pts.is_empty() {
        return pts;
    }
    let pts = clip_edge(&pts, |p| p[0] <= x1, |s, e| at_x(s, e, x1));
    if pts.is_empty() {
        return pts;
    }
    let pts = clip_edge(&pts, |p| p[1] >= y0, |s, e| at_y(s, e, y0));
    if pts.is_empty() {
        return pts;
    }
    clip_edge(&pts, |p| p[1] <= y1, |s, e| at_y(s, e, y1))
}

/// Resample a raster layer onto `spec`'s grid.
pub fn resample_raster(spec: &GridSpec, layer: &RasterLayer) -> Result<LayerGrid> {
    let resampling = match (layer.kind, layer.resampling) {
        (LayerKind::Categorical, Resampling::Nearest) => Resampling::Nearest,
        (LayerKind::Categorical, other) => {
            debug!(
                "Layer '{}': {:?} resampling ignored for categorical data, using nearest",
                layer.name, other
            );
            Resampling::Nearest
        }
        (LayerKind::Continuous, policy) => policy,
    };

    let n_cols = spec.n_cols;
    let mut samples = vec![f32::NAN; spec.cell_count()];
    let unaligned: usize = samples
        .par_chunks_mut(n_cols)
        .enumerate()
        .map(|(row, out)| {
            let mut misses = 0usize;
            for (col, cell) in out.iter_mut().enumerate() {
                let (x, y) = spec.cell_center(row, col);
                let Some((lx, ly)) = crs::transform(spec.crs, layer.crs, x, y) else {
                    misses += 1;
                    continue;
                };
                let Some((fx, fy)) = layer.transform.invert(lx, ly) else {
                    misses += 1;
                    continue;
                };

                *cell = match resampling {
                    Resampling::Nearest => sample_nearest(layer, fx, fy),
                    Resampling::Bilinear => sample_bilinear(layer, fx, fy),
                    Resampling::Cubic => sample_cubic(layer, fx, fy),
                };
            }
            misses
        })
        .sum();

    if unaligned == spec.cell_count() {
        return Err(VoxError::LayerAlignment {
            layer: layer.name.clone(),
            reason: format!("no grid cell projects into {}", layer.crs),
        });
    }
    if unaligned > 0 {
        warn!(
            "Layer '{}': {} cells have no image in the layer CRS",
            layer.name, unaligned
        );
    }

    match layer.kind {
        LayerKind::Continuous => Ok(LayerGrid::Continuous(Grid2d::from_vec(
            spec.n_rows,
            n_cols,
            samples,
        ))),
        LayerKind::Categorical => {
            let mut invalid = 0usize;
            let codes: Vec<u16> = samples
                .iter()
                .map(|&v| {
                    if v.is_nan() {
                        NO_DATA_CLASS
                    } else {
                        let rounded = v.round();
                        if rounded < 0.0 || rounded >= NO_DATA_CLASS as f32 {
                            invalid += 1;
                            NO_DATA_CLASS
                        } else {
                            rounded as u16
                        }
                    }
                })
                .collect();

            if invalid > 0 {
                warn!(
                    "Layer '{}': {} samples outside the class-code range treated as no-data",
                    layer.name, invalid
                );
            }

            Ok(LayerGrid::Categorical(Grid2d::from_vec(
                spec.n_rows,
                n_cols,
                codes,
            )))
        }
    }
}

#[inline]
fn pixel_value(layer: &RasterLayer, col: i64, row: i64) -> Option<f32> {
    if col < 0 || row < 0 || col >= layer.data.n_cols() as i64 || row >= layer.data.n_rows() as i64
    {
        return None;
    }
    let v = layer.data.get(row as usize, col as usize);
    (!layer.is_nodata(v)).then_some(v)
}

fn sample_nearest(layer: &RasterLayer, fx: f64, fy: f64) -> f32 {
    pixel_value(layer, fx.floor() as i64, fy.floor() as i64).unwrap_or(f32::NAN)
}

/// Bilinear blend of the four surrounding pixel centers. No-data neighbors
/// drop out and the remaining weights renormalize; all-invalid stays
/// no-data.
fn sample_bilinear(layer: &RasterLayer, fx: f64, fy: f64) -> f32 {
    let u = fx - 0.5;
    let v = fy - 0.5;
    let i0 = u.floor();
    let j0 = v.floor();
    let du = u - i0;
    let dv = v - j0;

    let mut acc = 0.0f64;
    let mut weight_sum = 0.0f64;
    for (di, dj, w) in [
        (0, 0, (1.0 - du) * (1.0 - dv)),
        (1, 0, du * (1.0 - dv)),
        (0, 1, (1.0 - du) * dv),
        (1, 1, du * dv),
    ] {
        if let Some(value) = pixel_value(layer, i0 as i64 + di, j0 as i64 + dj) {
            acc += w * value as f64;
            weight_sum += w;
        }
    }

    if weight_sum > 0.0 {
        (acc / weight_sum) as f32
    } else {
        f32::NAN
    }
}

#[inline]
fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (p2 - p0) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (3.0 * p1 - 3.0 * p2 + p0 - p3) * t3)
}

/// Catmull-Rom bicubic over the 4x4 neighborhood; falls back to bilinear
/// when any tap is missing rather than letting no-data leak into the
/// spline.
fn sample_cubic(layer: &RasterLayer, fx: f64, fy: f64) -> f32 {
    let u = fx - 0.5;
    let v = fy - 0.5;
    let i1 = u.floor();
    let j1 = v.floor();
    let du = u - i1;
    let dv = v - j1;

    let mut rows = [0.0f64; 4];
    for (j, row_acc) in rows.iter_mut().enumerate() {
        let mut taps = [0.0f64; 4];
        for (i, tap) in taps.iter_mut().enumerate() {
            match pixel_value(layer, i1 as i64 + i as i64 - 1, j1 as i64 + j as i64 - 1) {
                Some(value) => *tap = value as f64,
                None => return sample_bilinear(layer, fx, fy),
            }
        }
        *row_acc = catmull_rom(taps[0], taps[1], taps[2], taps[3], du);
    }

    catmull_rom(rows[0], rows[1], rows[2], rows[3], dv) as f32
}

/// Synthesize a canopy-height grid from land cover: tree-covered cells get
/// the fallback height, everything else is zero (an absent tree is a known
/// zero, not missing data).
pub fn canopy_from_land_cover(
    land_cover: &Grid2d<u16>,
    tree_classes: &[u16],
    fallback_height: f32,
) -> LayerGrid {
    let data = land_cover
        .as_slice()
        .iter()
        .map(|code| {
            if tree_classes.contains(code) {
                fallback_height
            } else {
                0.0
            }
        })
        .collect();

    LayerGrid::Continuous(Grid2d::from_vec(
        land_cover.n_rows(),
        land_cover.n_cols(),
        data,
    ))
}

/// Derive a categorical building-identifier layer from footprints: each
/// geometry burns its 1-based index, so downstream exports can number
/// buildings.
pub fn building_id_layer(footprints: &VectorLayer) -> VectorLayer {
    VectorLayer {
        name: format!("{}_ids", footprints.name),
        crs: footprints.crs,
        kind: LayerKind::Categorical,
        geometries: footprints
            .geometries
            .iter()
            .enumerate()
            .map(|(i, g)| VectorGeometry {
                ring: g.ring.clone(),
                value: (i + 1) as f64,
            })
            .collect(),
    }
}
