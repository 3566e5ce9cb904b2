use thiserror::Error;

/// Errors surfaced by the voxelization pipeline.
///
/// Grid and rasterizer failures abort a run outright; a misaligned or
/// missing mandatory layer invalidates every downstream cell. Export
/// failures abort only the artifacts not yet written. Per-cell anomalies
/// (no-data terrain, zero-coverage cells) are never errors; they are
/// recovered with documented fallbacks and reported as aggregate counts in
/// [`crate::resolve::ResolveDiagnostics`].
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("invalid region: {reason}")]
    InvalidRegion { reason: String },

    #[error("invalid resolution: {reason}")]
    InvalidResolution { reason: String },

    #[error("layer '{layer}' cannot be aligned to the grid: {reason}")]
    LayerAlignment { layer: String, reason: String },

    #[error("layer '{layer}' is entirely no-data over the {n_rows}x{n_cols} grid")]
    EmptyLayer {
        layer: String,
        n_rows: usize,
        n_cols: usize,
    },

    #[error("no terrain elevation layer supplied")]
    MissingRequiredLayer,

    #[error("{classes} non-empty classes exceed the palette capacity of {capacity}")]
    PaletteOverflow { classes: usize, capacity: usize },

    #[error("failed writing {artifact}")]
    ChunkWrite {
        /// `"chunk (i, j, k)"`, `"manifest"`, or another export artifact.
        artifact: String,
        #[source]
        source: std::io::Error,
    },
}

impl VoxError {
    pub(crate) fn chunk_write(artifact: impl Into<String>, source: std::io::Error) -> Self {
        VoxError::ChunkWrite {
            artifact: artifact.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;
