//! Run configuration. All values travel explicitly through the pipeline;
//! nothing here is process-global.

use serde::{Deserialize, Serialize};

use crate::crs::CrsChoice;
use crate::layers::LayerRole;
use crate::palette::{ClassId, BARELAND};

/// Allocation ceilings checked before any large array is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum `n_rows * n_cols` for the 2D grid.
    pub max_grid_cells: usize,
    /// Maximum `n_rows * n_cols * n_levels` for the dense voxel grid.
    pub max_voxels: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_grid_cells: 64_000_000,
            max_voxels: 512_000_000,
        }
    }
}

/// What to put at levels strictly below a cell's terrain surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndergroundFill {
    /// Fill every level from the grid floor up to the surface.
    Solid,
    /// A fixed number of levels below each cell's surface; empty beneath.
    Slab(u32),
    /// Nothing below the surface.
    None,
}

/// Configuration of one voxelization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelizeConfig {
    /// Horizontal cell edge in meters.
    pub cell_size: f64,
    /// Vertical voxel size in meters per level.
    pub voxel_vertical_size: f64,
    /// Output CRS; `Auto` picks the UTM zone of the region centroid.
    pub crs: CrsChoice,
    /// Role precedence for vertical conflicts, strongest first. Roles
    /// absent from the list never paint.
    pub precedence: Vec<LayerRole>,
    pub underground: UndergroundFill,
    /// Elevation substituted for no-data terrain cells. `None` uses the
    /// mean of the valid terrain samples.
    pub terrain_fallback: Option<f64>,
    /// Surface-band class for cells no land-cover layer claims.
    pub default_surface: ClassId,
    /// Fraction of canopy height taken up by bare trunk; crowns start at
    /// `ratio * height` above ground.
    pub crown_base_ratio: f64,
    /// Canopy height assumed for tree-covered land-cover cells when no
    /// canopy raster is supplied.
    pub canopy_fallback_height: f64,
    /// Maximum chunk extent per axis for export, at most
    /// [`mvox::MAX_EXTENT`].
    pub chunk_limit: u32,
    pub limits: Limits,
}

impl Default for VoxelizeConfig {
    fn default() -> Self {
        Self {
            cell_size: 2.0,
            voxel_vertical_size: 2.0,
            crs: CrsChoice::Auto,
            precedence: vec![
                LayerRole::BuildingHeight,
                LayerRole::CanopyHeight,
                LayerRole::Terrain,
                LayerRole::LandCover,
            ],
            underground: UndergroundFill::Solid,
            terrain_fallback: None,
            default_surface: BARELAND,
            crown_base_ratio: 0.0,
            canopy_fallback_height: 10.0,
            chunk_limit: mvox::MAX_EXTENT,
            limits: Limits::default(),
        }
    }
}
