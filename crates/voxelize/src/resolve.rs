//! Vertical resolution: collapsing the per-layer 2D grids into one
//! classified 3D grid.
//!
//! Per cell, each layer role claims a vertical interval of levels: buildings
//! span base to roof, canopy spans crown base to crown top, land cover a
//! one-level band at the surface, terrain the levels below the surface.
//! Conflicts resolve through the configured precedence list alone — roles
//! paint in reverse precedence order so a stronger role simply overwrites a
//! weaker one. Identical inputs always produce identical grids.

use log::{info, warn};
use rayon::prelude::*;

use crate::config::{UndergroundFill, VoxelizeConfig};
use crate::error::{Result, VoxError};
use crate::grid::GridSpec;
use crate::layers::{LayerGrid, LayerRole, LayerStack, NO_DATA_CLASS};
use crate::palette::{ClassId, Palette, TREE, UNDERGROUND};
use crate::progress::Tick;
use crate::voxel::VoxelGrid;

/// Aggregate per-cell fallbacks of one resolution run. These are
/// recoveries, not failures; they are logged once and carried here so
/// callers can inspect them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveDiagnostics {
    /// Terrain cells that had no data and received the fallback elevation.
    pub terrain_fallback_cells: usize,
    /// Land-cover cells whose class is not in the palette and were painted
    /// with the default surface class instead.
    pub unknown_class_cells: usize,
}

/// The resolved 3D model plus the metadata needed to interpret it.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub grid: VoxelGrid,
    pub diagnostics: ResolveDiagnostics,
    /// Elevation of level 0 in meters (grid CRS vertical datum).
    pub base_elevation: f64,
    pub voxel_vertical_size: f64,
}

/// Per-cell painting plan, derived in a first pass so the grid height is
/// known before the dense allocation.
#[derive(Debug, Clone, Copy)]
struct CellPlan {
    surface: u32,
    under_lo: u32,
    land_cover: ClassId,
    building: Option<(u32, u32)>,
    canopy: Option<(u32, u32)>,
}

/// Resolve the layer stack into a voxel grid.
pub fn resolve(
    spec: &GridSpec,
    stack: &LayerStack,
    palette: &Palette,
    config: &VoxelizeConfig,
) -> Result<ResolvedModel> {
    for role in stack.roles() {
        let grid = stack.get(role).map(LayerGrid::shape);
        if grid != Some((spec.n_rows, spec.n_cols)) {
            return Err(VoxError::LayerAlignment {
                layer: format!("{role:?}"),
                reason: "layer grid shape does not match the grid spec".to_string(),
            });
        }
    }

    let terrain = stack.terrain()?;
    let dz = config.voxel_vertical_size;
    if !(dz > 0.0) || !dz.is_finite() {
        return Err(VoxError::InvalidResolution {
            reason: format!("voxel_vertical_size must be positive, got {dz}"),
        });
    }

    let mut diagnostics = ResolveDiagnostics::default();

    // Terrain base elevations, with the documented fallback for holes.
    let mut valid_sum = 0.0f64;
    let mut valid_count = 0usize;
    for &v in terrain.as_slice() {
        if !v.is_nan() {
            valid_sum += v as f64;
            valid_count += 1;
        }
    }

    let fallback = config.terrain_fallback.unwrap_or_else(|| {
        if valid_count > 0 {
            valid_sum / valid_count as f64
        } else {
            0.0
        }
    });

    let elevations: Vec<f64> = terrain
        .as_slice()
        .iter()
        .map(|&v| {
            if v.is_nan() {
                diagnostics.terrain_fallback_cells += 1;
                fallback
            } else {
                v as f64
            }
        })
        .collect();

    if diagnostics.terrain_fallback_cells > 0 {
        warn!(
            "Terrain: {} no-data cells fell back to {:.2} m",
            diagnostics.terrain_fallback_cells, fallback
        );
    }

    let min_elevation = elevations.iter().copied().fold(f64::INFINITY, f64::min);

    let slab = match config.underground {
        UndergroundFill::Slab(n) => n,
        UndergroundFill::Solid | UndergroundFill::None => 0,
    };

    let snap = |height: f64| -> u32 {
        if !height.is_finite() {
            return 0;
        }
        let levels = (height / dz + 0.5).floor();
        levels.clamp(0.0, u32::MAX as f64) as u32
    };

    let building_height = continuous(stack, LayerRole::BuildingHeight);
    let building_base = continuous(stack, LayerRole::BuildingBase);
    let canopy_height = continuous(stack, LayerRole::CanopyHeight);
    let land_cover = stack
        .get(LayerRole::LandCover)
        .and_then(LayerGrid::categorical);

    // Pass 1: per-cell plans and the uniform grid height.
    let mut plans = Vec::with_capacity(spec.cell_count());
    let mut n_levels = 0u32;
    let mut tick = Tick::new(1_000_000);

    for i in 0..spec.cell_count() {
        if tick.should(i) {
            info!(
                "Planning columns: {:>10}/{} ({:.2} M cells/s)",
                i,
                spec.cell_count(),
                tick.rate_mps(i)
            );
            tick.bump();
        }

        let surface = snap(elevations[i] - min_elevation).saturating_add(slab);

        let under_lo = match config.underground {
            UndergroundFill::Solid => 0,
            UndergroundFill::Slab(n) => surface.saturating_sub(n),
            UndergroundFill::None => surface,
        };

        let land_cover_class = match land_cover.map(|g| g.as_slice()[i]) {
            None | Some(NO_DATA_CLASS) => config.default_surface,
            Some(code) => {
                let id = code as ClassId;
                if palette.contains(id) {
                    id
                } else {
                    diagnostics.unknown_class_cells += 1;
                    config.default_surface
                }
            }
        };

        let building = building_height
            .map(|g| g.as_slice()[i])
            .filter(|h| !h.is_nan() && *h > 0.0)
            .map(|h| {
                let base = building_base
                    .map(|g| g.as_slice()[i])
                    .filter(|b| !b.is_nan() && *b > 0.0)
                    .unwrap_or(0.0);
                (
                    surface.saturating_add(snap(base as f64)),
                    surface.saturating_add(snap(h as f64)),
                )
            })
            .filter(|(lo, hi)| hi > lo);

        let canopy = canopy_height
            .map(|g| g.as_slice()[i])
            .filter(|h| !h.is_nan() && *h > 0.0)
            .map(|h| {
                let crown_base = config.crown_base_ratio.clamp(0.0, 1.0) * h as f64;
                (
                    surface.saturating_add(snap(crown_base)),
                    surface.saturating_add(snap(h as f64)),
                )
            })
            .filter(|(lo, hi)| hi > lo);

        let mut top = surface.saturating_add(1);
        if let Some((_, hi)) = building {
            top = top.max(hi);
        }
        if let Some((_, hi)) = canopy {
            top = top.max(hi);
        }
        n_levels = n_levels.max(top);

        plans.push(CellPlan {
            surface,
            under_lo,
            land_cover: land_cover_class,
            building,
            canopy,
        });
    }

    if diagnostics.unknown_class_cells > 0 {
        warn!(
            "Land cover: {} cells carry classes missing from the palette",
            diagnostics.unknown_class_cells
        );
    }

    let n_levels = n_levels as usize;
    let mut grid = VoxelGrid::allocate(
        spec.n_rows,
        spec.n_cols,
        n_levels,
        config.limits.max_voxels,
    )?;

    // Pass 2: paint each column, weakest role first so precedence wins by
    // overwriting. Columns are independent.
    let precedence = &config.precedence;
    let default_surface = config.default_surface;

    grid.as_mut_slice()
        .par_chunks_mut(n_levels)
        .zip(plans.par_iter())
        .for_each(|(column, plan)| {
            column[plan.surface as usize] = default_surface;

            for role in precedence.iter().rev() {
                match role {
                    LayerRole::LandCover => {
                        column[plan.surface as usize] = plan.land_cover;
                    }
                    LayerRole::Terrain => {
                        for level in plan.under_lo..plan.surface {
                            column[level as usize] = UNDERGROUND;
                        }
                    }
                    LayerRole::CanopyHeight => {
                        if let Some((lo, hi)) = plan.canopy {
                            for level in lo..hi {
                                column[level as usize] = TREE;
                            }
                        }
                    }
                    LayerRole::BuildingHeight => {
                        if let Some((lo, hi)) = plan.building {
                            for level in lo..hi {
                                column[level as usize] = crate::palette::BUILDING;
                            }
                        }
                    }
                    // Base heights and identifiers shape other intervals;
                    // they paint nothing themselves.
                    LayerRole::BuildingBase | LayerRole::BuildingId => {}
                }
            }
        });

    let base_elevation = min_elevation - slab as f64 * dz;

    info!(
        "Resolved {}x{}x{} voxels, base elevation {:.2} m",
        spec.n_rows, spec.n_cols, n_levels, base_elevation
    );

    Ok(ResolvedModel {
        grid,
        diagnostics,
        base_elevation,
        voxel_vertical_size: dz,
    })
}

fn continuous(stack: &LayerStack, role: LayerRole) -> Option<&crate::grid::Grid2d<f32>> {
    stack.get(role).and_then(LayerGrid::continuous)
}
