//! End-to-end orchestration: grid derivation, rasterization, vertical
//! resolution, and optionally the chunked export. Each stage is a pure
//! transform over the previous stage's output; grid and rasterizer errors
//! abort the run, export errors abort only the artifacts not yet written.

use std::path::Path;

use log::info;

use crate::config::VoxelizeConfig;
use crate::error::Result;
use crate::grid::GridSpec;
use crate::layers::{LayerGrid, LayerRole, LayerStack, SourceLayer};
use crate::palette::{Palette, TREE_COVER};
use crate::raster::{canopy_from_land_cover, rasterize_layers};
use crate::region::BoundingRegion;
use crate::resolve::{resolve, ResolvedModel};
use crate::serialize::{write_model, Manifest};

/// Everything one run produces before export.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub spec: GridSpec,
    pub stack: LayerStack,
    pub model: ResolvedModel,
}

/// Run grid specification, rasterization and vertical resolution over the
/// given sources.
pub fn voxelize(
    region: &BoundingRegion,
    sources: &[SourceLayer],
    palette: &Palette,
    config: &VoxelizeConfig,
) -> Result<PipelineOutput> {
    let spec = GridSpec::derive(region, config.cell_size, config.crs, &config.limits)?;

    let mut stack = rasterize_layers(&spec, sources)?;

    // Without a canopy source, tree-covered land-cover cells still carry
    // vegetation at the configured default height.
    if stack.get(LayerRole::CanopyHeight).is_none() {
        let synthesized = stack
            .get(LayerRole::LandCover)
            .and_then(LayerGrid::categorical)
            .map(|land_cover| {
                canopy_from_land_cover(
                    land_cover,
                    &[TREE_COVER as u16],
                    config.canopy_fallback_height as f32,
                )
            });

        if let Some(canopy) = synthesized {
            info!(
                "No canopy layer supplied; synthesizing {:.1} m canopy from land cover",
                config.canopy_fallback_height
            );
            stack.insert(LayerRole::CanopyHeight, canopy);
        }
    }

    let model = resolve(&spec, &stack, palette, config)?;

    Ok(PipelineOutput { spec, stack, model })
}

/// [`voxelize`] followed by the chunked export into `dir`.
pub fn voxelize_to_dir(
    region: &BoundingRegion,
    sources: &[SourceLayer],
    palette: &Palette,
    config: &VoxelizeConfig,
    dir: &Path,
) -> Result<(PipelineOutput, Manifest)> {
    let output = voxelize(region, sources, palette, config)?;
    let manifest = write_model(&output.model, &output.spec, palette, dir, config.chunk_limit)?;
    Ok((output, manifest))
}
