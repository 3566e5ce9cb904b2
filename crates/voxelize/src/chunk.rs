//! Partitioning a voxel grid into file-sized chunks.
//!
//! A chunk is offsets plus a borrowed view into the shared grid; nothing is
//! copied until a chunk is materialized for writing. Chunks partition the
//! grid exactly: no overlap, full coverage, and the last chunk along an
//! axis absorbs the remainder.

use serde::{Deserialize, Serialize};

use crate::palette::ClassId;
use crate::voxel::VoxelGrid;

/// Placement and extent of one chunk within the full grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Chunk indices along rows / columns / levels.
    pub ix: usize,
    pub iy: usize,
    pub iz: usize,
    pub row_offset: usize,
    pub col_offset: usize,
    pub level_offset: usize,
    pub n_rows: usize,
    pub n_cols: usize,
    pub n_levels: usize,
}

/// Split a grid shape into chunk placements of at most `limit` cells per
/// axis, in (row, col, level) chunk-index order.
pub fn partition(shape: (usize, usize, usize), limit: usize) -> Vec<ChunkSpec> {
    let (rows, cols, levels) = shape;
    let splits_r = rows.div_ceil(limit);
    let splits_c = cols.div_ceil(limit);
    let splits_l = levels.div_ceil(limit);

    let mut chunks = Vec::with_capacity(splits_r * splits_c * splits_l);
    for ix in 0..splits_r {
        for iy in 0..splits_c {
            for iz in 0..splits_l {
                let row_offset = ix * limit;
                let col_offset = iy * limit;
                let level_offset = iz * limit;
                chunks.push(ChunkSpec {
                    ix,
                    iy,
                    iz,
                    row_offset,
                    col_offset,
                    level_offset,
                    n_rows: limit.min(rows - row_offset),
                    n_cols: limit.min(cols - col_offset),
                    n_levels: limit.min(levels - level_offset),
                });
            }
        }
    }
    chunks
}

/// A read-only window into a [`VoxelGrid`].
#[derive(Debug, Clone, Copy)]
pub struct VoxelChunk<'a> {
    pub spec: ChunkSpec,
    grid: &'a VoxelGrid,
}

impl<'a> VoxelChunk<'a> {
    pub fn new(grid: &'a VoxelGrid, spec: ChunkSpec) -> Self {
        Self { spec, grid }
    }

    /// Class at chunk-local coordinates.
    #[inline]
    pub fn get(&self, row: usize, col: usize, level: usize) -> ClassId {
        self.grid.get(
            self.spec.row_offset + row,
            self.spec.col_offset + col,
            self.spec.level_offset + level,
        )
    }
}
