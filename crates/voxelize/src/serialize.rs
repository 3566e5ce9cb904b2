//! Writing a voxel grid to disk as tiled `.vox` chunk files plus a
//! manifest, and reading the pair back.
//!
//! The manifest is written only after every chunk file succeeded, so its
//! absence is the caller-visible signal of an incomplete export. Chunks
//! already on disk are left in place on failure for inspection and resume;
//! no partial manifest is ever produced.

use std::io::{self, ErrorKind};
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chunk::{partition, ChunkSpec, VoxelChunk};
use crate::error::{Result, VoxError};
use crate::grid::GridSpec;
use crate::palette::Palette;
use crate::resolve::ResolvedModel;
use crate::voxel::VoxelGrid;

pub const MANIFEST_FILE: &str = "manifest.json";

/// One chunk file's placement, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub file: String,
    #[serde(flatten)]
    pub spec: ChunkSpec,
}

/// Everything a consumer needs to reassemble the grid or map between world
/// and chunk-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub grid: GridSpec,
    pub voxel_vertical_size: f64,
    pub base_elevation: f64,
    pub n_levels: usize,
    pub palette: Palette,
    pub chunks: Vec<ChunkRecord>,
}

impl Manifest {
    /// The chunk containing a global (row, col, level), with the local
    /// coordinates inside it.
    pub fn locate(
        &self,
        row: usize,
        col: usize,
        level: usize,
    ) -> Option<(usize, (usize, usize, usize))> {
        self.chunks.iter().position(|c| {
            let s = &c.spec;
            row >= s.row_offset
                && row < s.row_offset + s.n_rows
                && col >= s.col_offset
                && col < s.col_offset + s.n_cols
                && level >= s.level_offset
                && level < s.level_offset + s.n_levels
        }).map(|i| {
            let s = &self.chunks[i].spec;
            (
                i,
                (row - s.row_offset, col - s.col_offset, level - s.level_offset),
            )
        })
    }

    /// Global (row, col, level) of a chunk-local coordinate.
    pub fn globalize(
        &self,
        chunk_index: usize,
        local: (usize, usize, usize),
    ) -> Option<(usize, usize, usize)> {
        let s = &self.chunks.get(chunk_index)?.spec;
        (local.0 < s.n_rows && local.1 < s.n_cols && local.2 < s.n_levels).then(|| {
            (
                s.row_offset + local.0,
                s.col_offset + local.1,
                s.level_offset + local.2,
            )
        })
    }
}

fn chunk_file_name(spec: &ChunkSpec) -> String {
    format!("chunk_{}_{}_{}.vox", spec.ix, spec.iy, spec.iz)
}

/// Materialize one chunk as a `.vox` model: x = columns, y = rows,
/// z = levels, empty voxels omitted.
fn chunk_to_model(chunk: &VoxelChunk<'_>, palette: &Palette) -> io::Result<mvox::VoxModel> {
    let spec = chunk.spec;
    let mut model = mvox::VoxModel::new(
        spec.n_cols as u32,
        spec.n_rows as u32,
        spec.n_levels as u32,
    );
    model.palette = palette.vox_palette();

    for row in 0..spec.n_rows {
        for col in 0..spec.n_cols {
            for level in 0..spec.n_levels {
                let class = chunk.get(row, col, level);
                if class == crate::palette::EMPTY {
                    continue;
                }

                let color = palette.color_index(class).ok_or_else(|| {
                    io::Error::new(
                        ErrorKind::InvalidData,
                        format!("class {class} is not in the palette"),
                    )
                })?;

                model.voxels.push(mvox::Voxel {
                    x: col as u8,
                    y: row as u8,
                    z: level as u8,
                    color,
                });
            }
        }
    }

    Ok(model)
}

/// Write `model` under `dir` as chunk files of at most `chunk_limit` cells
/// per axis, then the manifest. Palette capacity is validated before any
/// file is created.
pub fn write_model(
    model: &ResolvedModel,
    spec: &GridSpec,
    palette: &Palette,
    dir: &Path,
    chunk_limit: u32,
) -> Result<Manifest> {
    palette.validate_capacity()?;

    if (model.grid.n_rows(), model.grid.n_cols()) != (spec.n_rows, spec.n_cols) {
        return Err(VoxError::InvalidResolution {
            reason: "voxel grid shape does not match the grid spec".to_string(),
        });
    }

    if chunk_limit == 0 || chunk_limit > mvox::MAX_EXTENT {
        return Err(VoxError::InvalidResolution {
            reason: format!(
                "chunk limit {chunk_limit} outside 1..={}",
                mvox::MAX_EXTENT
            ),
        });
    }

    std::fs::create_dir_all(dir)
        .map_err(|e| VoxError::chunk_write(format!("output directory {}", dir.display()), e))?;

    let grid = &model.grid;
    let chunks = partition(grid.shape(), chunk_limit as usize);
    info!(
        "Writing {} chunks of at most {} cells per axis to {}",
        chunks.len(),
        chunk_limit,
        dir.display()
    );

    let records: Vec<Result<ChunkRecord>> = chunks
        .par_iter()
        .map(|&chunk_spec| {
            let artifact = || {
                format!(
                    "chunk ({}, {}, {})",
                    chunk_spec.ix, chunk_spec.iy, chunk_spec.iz
                )
            };

            let chunk = VoxelChunk::new(grid, chunk_spec);
            let vox = chunk_to_model(&chunk, palette)
                .map_err(|e| VoxError::chunk_write(artifact(), e))?;

            let file = chunk_file_name(&chunk_spec);
            mvox::write_file(dir.join(&file), &vox)
                .map_err(|e| VoxError::chunk_write(artifact(), e))?;

            debug!(
                "Wrote {} ({} voxels, {}x{}x{})",
                file,
                vox.voxels.len(),
                chunk_spec.n_cols,
                chunk_spec.n_rows,
                chunk_spec.n_levels
            );

            Ok(ChunkRecord {
                file,
                spec: chunk_spec,
            })
        })
        .collect();

    let mut chunk_records = Vec::with_capacity(records.len());
    for record in records {
        chunk_records.push(record?);
    }

    let manifest = Manifest {
        grid: spec.clone(),
        voxel_vertical_size: model.voxel_vertical_size,
        base_elevation: model.base_elevation,
        n_levels: grid.n_levels(),
        palette: palette.clone(),
        chunks: chunk_records,
    };

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| VoxError::chunk_write("manifest", io::Error::new(ErrorKind::InvalidData, e)))?;
    std::fs::write(dir.join(MANIFEST_FILE), json)
        .map_err(|e| VoxError::chunk_write("manifest", e))?;

    info!(
        "Export complete: {} chunks + {}",
        manifest.chunks.len(),
        MANIFEST_FILE
    );

    Ok(manifest)
}

/// Rebuild the full grid from a directory written by [`write_model`].
pub fn reassemble(dir: &Path) -> Result<(VoxelGrid, Manifest)> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = std::fs::read(&manifest_path)
        .map_err(|e| VoxError::chunk_write("manifest", e))?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
        .map_err(|e| VoxError::chunk_write("manifest", io::Error::new(ErrorKind::InvalidData, e)))?;

    let mut grid = VoxelGrid::allocate(
        manifest.grid.n_rows,
        manifest.grid.n_cols,
        manifest.n_levels,
        usize::MAX,
    )?;

    for record in &manifest.chunks {
        let artifact = || format!("chunk file {}", record.file);
        let model = mvox::read_file(dir.join(&record.file))
            .map_err(|e| VoxError::chunk_write(artifact(), e))?;

        let s = &record.spec;
        if model.size != [s.n_cols as u32, s.n_rows as u32, s.n_levels as u32] {
            return Err(VoxError::chunk_write(
                artifact(),
                io::Error::new(ErrorKind::InvalidData, "chunk size disagrees with manifest"),
            ));
        }

        for voxel in &model.voxels {
            let class = manifest.palette.class_of_index(voxel.color).ok_or_else(|| {
                VoxError::chunk_write(
                    artifact(),
                    io::Error::new(
                        ErrorKind::InvalidData,
                        format!("color index {} outside the palette", voxel.color),
                    ),
                )
            })?;

            grid.set(
                s.row_offset + voxel.y as usize,
                s.col_offset + voxel.x as usize,
                s.level_offset + voxel.z as usize,
                class,
            );
        }
    }

    Ok((grid, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::GeoCrs;
    use crate::palette::{ClassKind, PaletteEntry, BUILDING, TREE};
    use crate::resolve::ResolveDiagnostics;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "voxelize-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn spec_for(grid: &VoxelGrid) -> GridSpec {
        GridSpec::from_origin(
            0.0,
            0.0,
            2.0,
            grid.n_rows(),
            grid.n_cols(),
            GeoCrs::Utm { zone: 54, south: false },
        )
        .unwrap()
    }

    fn model_from(grid: VoxelGrid) -> ResolvedModel {
        ResolvedModel {
            grid,
            diagnostics: ResolveDiagnostics::default(),
            base_elevation: 12.0,
            voxel_vertical_size: 2.0,
        }
    }

    fn scattered_grid(n_rows: usize, n_cols: usize, n_levels: usize) -> VoxelGrid {
        let mut grid = VoxelGrid::allocate(n_rows, n_cols, n_levels, usize::MAX).unwrap();
        for row in 0..n_rows {
            for col in 0..n_cols {
                for level in 0..n_levels {
                    if (row + 2 * col + 3 * level) % 5 == 0 {
                        grid.set(row, col, level, BUILDING);
                    } else if (row + col) % 7 == 0 {
                        grid.set(row, col, level, TREE);
                    }
                }
            }
        }
        grid
    }

    #[test]
    fn round_trip_reproduces_the_grid_across_chunk_boundaries() {
        let dir = temp_dir("roundtrip");
        let grid = scattered_grid(5, 7, 3);
        let model = model_from(grid.clone());
        let palette = Palette::default();

        // A chunk limit of 2 forces boundaries on every axis.
        let manifest = write_model(&model, &spec_for(&grid), &palette, &dir, 2).unwrap();
        assert_eq!(manifest.chunks.len(), 3 * 4 * 2);

        let (rebuilt, read_back) = reassemble(&dir).unwrap();
        assert_eq!(rebuilt, grid);
        assert_eq!(read_back, manifest);
    }

    #[test]
    fn manifest_locate_and_globalize_are_inverse() {
        let dir = temp_dir("locate");
        let grid = scattered_grid(5, 5, 4);
        let model = model_from(grid.clone());
        let manifest = write_model(&model, &spec_for(&grid), &Palette::default(), &dir, 2).unwrap();

        for probe in [(0, 0, 0), (4, 4, 3), (2, 3, 1)] {
            let (chunk_index, local) = manifest.locate(probe.0, probe.1, probe.2).unwrap();
            assert_eq!(manifest.globalize(chunk_index, local), Some(probe));
        }
        assert!(manifest.locate(5, 0, 0).is_none());
    }

    #[test]
    fn palette_overflow_happens_before_any_file_exists() {
        let dir = temp_dir("overflow");
        let grid = scattered_grid(3, 3, 2);
        let model = model_from(grid);

        let mut palette = Palette::new();
        for id in 1..=(mvox::PALETTE_CAPACITY as i16 + 1) {
            palette.push(PaletteEntry {
                id,
                name: format!("class {id}"),
                color: [1, 2, 3],
                kind: ClassKind::Ground,
            });
        }

        let spec = spec_for(&model.grid);
        assert!(matches!(
            write_model(&model, &spec, &palette, &dir, 64),
            Err(VoxError::PaletteOverflow { .. })
        ));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn failed_chunk_write_leaves_no_manifest() {
        let dir = temp_dir("failed");
        let grid = scattered_grid(3, 3, 2);
        let model = model_from(grid);
        let spec = spec_for(&model.grid);

        // A directory squatting on the chunk's file name makes the write fail.
        std::fs::create_dir_all(dir.join("chunk_0_0_0.vox")).unwrap();

        assert!(matches!(
            write_model(&model, &spec, &Palette::default(), &dir, 64),
            Err(VoxError::ChunkWrite { .. })
        ));
        assert!(!dir.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn chunk_files_respect_the_extent_limit() {
        let dir = temp_dir("limit");
        let grid = scattered_grid(5, 3, 2);
        let model = model_from(grid);
        let spec = spec_for(&model.grid);

        let manifest = write_model(&model, &spec, &Palette::default(), &dir, 4).unwrap();
        for record in &manifest.chunks {
            let vox = mvox::read_file(dir.join(&record.file)).unwrap();
            assert!(vox.size.iter().all(|&extent| extent <= 4));
        }
    }

    #[test]
    fn oversized_chunk_limit_is_rejected() {
        let dir = temp_dir("badlimit");
        let grid = scattered_grid(2, 2, 2);
        let model = model_from(grid);
        let spec = spec_for(&model.grid);

        for bad in [0u32, mvox::MAX_EXTENT + 1] {
            assert!(matches!(
                write_model(&model, &spec, &Palette::default(), &dir, bad),
                Err(VoxError::InvalidResolution { .. })
            ));
        }
    }
}
