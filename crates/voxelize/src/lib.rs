//! Voxelization of urban geodata.
//!
//! Takes heterogeneous 2D/2.5D inputs over a bounding region — building
//! footprints with heights, a digital elevation model, land-cover and
//! tree-canopy layers — and produces a single classified 3D voxel grid
//! suitable for microclimate simulation or voxel-model viewers.
//!
//! The pipeline is a sequence of whole-grid transforms:
//!
//! 1. [`grid::GridSpec::derive`] fixes a common projected grid (origin
//!    snapped to the cell lattice, extents rounded up) from the region and
//!    target resolution.
//! 2. [`raster::rasterize_layers`] burns vector sources and resamples
//!    raster sources onto that grid, one aligned 2D grid per layer, with
//!    explicit no-data sentinels.
//! 3. [`resolve::resolve`] collapses the layer grids into a dense
//!    [`voxel::VoxelGrid`] using an ordered role-precedence list
//!    (buildings > canopy > terrain > land cover by default).
//! 4. [`serialize::write_model`] tiles the grid into `.vox` chunk files
//!    (through the `mvox` crate) plus a manifest that is written only once
//!    every chunk is on disk.
//!
//! Auxiliary exports live in [`export`] (raw dense arrays, class
//! statistics) and [`envimet`] (ENVI-met INX/EDB files).
//!
//! Data acquisition, plotting and the command-line surface are outside
//! this crate: layers arrive as in-memory values with a known CRS, and
//! logging goes through the `log` facade with initialization left to the
//! embedder.

pub mod chunk;
pub mod config;
pub mod crs;
pub mod envimet;
pub mod error;
pub mod export;
pub mod grid;
pub mod layers;
pub mod palette;
pub mod pipeline;
pub mod progress;
pub mod raster;
pub mod region;
pub mod resolve;
pub mod serialize;
pub mod voxel;

pub use config::{Limits, UndergroundFill, VoxelizeConfig};
pub use crs::{CrsChoice, GeoCrs};
pub use error::{Result, VoxError};
pub use grid::{Grid2d, GridSpec};
pub use layers::{
    AffineTransform, LayerGrid, LayerKind, LayerRole, LayerSource, LayerStack, RasterLayer,
    Resampling, SourceLayer, VectorGeometry, VectorLayer,
};
pub use palette::{ClassId, ClassKind, Palette, PaletteEntry};
pub use pipeline::{voxelize, voxelize_to_dir, PipelineOutput};
pub use region::BoundingRegion;
pub use resolve::{resolve, ResolveDiagnostics, ResolvedModel};
pub use serialize::{reassemble, write_model, ChunkRecord, Manifest};
pub use voxel::VoxelGrid;
