//! Pass-through exports for simulators that want raw arrays rather than
//! the chunked voxel-model format.

use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};
use crate::grid::GridSpec;
use crate::palette::{ClassId, Palette};
use crate::resolve::ResolvedModel;
use crate::voxel::VoxelGrid;

pub const DENSE_ARRAY_FILE: &str = "voxels.bin";
pub const DENSE_META_FILE: &str = "voxels.json";
pub const STATS_FILE: &str = "class_stats.json";

/// Dump the dense class array as little-endian `i16` plus a JSON sidecar
/// describing its layout.
pub fn export_dense_array(model: &ResolvedModel, spec: &GridSpec, dir: &Path) -> Result<()> {
    let io_err = |artifact: &str| {
        let artifact = artifact.to_string();
        move |e: std::io::Error| VoxError::chunk_write(artifact.clone(), e)
    };

    std::fs::create_dir_all(dir).map_err(io_err("output directory"))?;

    let grid = &model.grid;
    let bin_path = dir.join(DENSE_ARRAY_FILE);
    let file = std::fs::File::create(&bin_path).map_err(io_err(DENSE_ARRAY_FILE))?;
    let mut writer = BufWriter::new(file);
    for &class in grid.as_slice() {
        writer
            .write_all(&class.to_le_bytes())
            .map_err(io_err(DENSE_ARRAY_FILE))?;
    }
    writer.flush().map_err(io_err(DENSE_ARRAY_FILE))?;

    let meta = serde_json::json!({
        "file": DENSE_ARRAY_FILE,
        "dtype": "int16",
        "byte_order": "little-endian",
        "shape": [grid.n_rows(), grid.n_cols(), grid.n_levels()],
        "order": "row-major, level axis fastest",
        "cell_size_m": spec.cell_size,
        "voxel_vertical_size_m": model.voxel_vertical_size,
        "base_elevation_m": model.base_elevation,
        "crs": spec.crs.to_string(),
        "origin": [spec.origin_x, spec.origin_y],
    });
    std::fs::write(dir.join(DENSE_META_FILE), meta.to_string())
        .map_err(io_err(DENSE_META_FILE))?;

    info!(
        "Exported dense array {} ({} voxels)",
        bin_path.display(),
        grid.as_slice().len()
    );

    Ok(())
}

/// Per-class voxel count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCount {
    pub id: ClassId,
    pub name: Option<String>,
    pub count: usize,
}

/// Voxel counts per distinct class, named through the palette where known.
pub fn class_statistics(grid: &VoxelGrid, palette: &Palette) -> Vec<ClassCount> {
    grid.class_counts()
        .into_iter()
        .map(|(id, count)| ClassCount {
            id,
            name: palette.get(id).map(|e| e.name.clone()),
            count,
        })
        .collect()
}

/// Write the per-class statistics as JSON.
pub fn export_statistics(grid: &VoxelGrid, palette: &Palette, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| VoxError::chunk_write("output directory", e))?;

    let stats = class_statistics(grid, palette);
    let json = serde_json::to_string_pretty(&stats)
        .map_err(|e| VoxError::chunk_write(STATS_FILE, std::io::Error::other(e)))?;
    std::fs::write(dir.join(STATS_FILE), json)
        .map_err(|e| VoxError::chunk_write(STATS_FILE, e))?;

    Ok(())
}
