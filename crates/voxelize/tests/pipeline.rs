//! End-to-end pipeline scenarios: rasterize, resolve, export, reassemble.

use std::path::PathBuf;
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use voxelize::palette::{BARELAND, BUILDING, EMPTY, TREE};
use voxelize::raster::rasterize_layers;
use voxelize::resolve::resolve;
use voxelize::{
    reassemble, voxelize, voxelize_to_dir, AffineTransform, BoundingRegion, GeoCrs, Grid2d,
    GridSpec, LayerGrid, LayerKind, LayerRole, LayerSource, LayerStack, Palette, RasterLayer,
    Resampling, SourceLayer, VectorGeometry, VectorLayer, VoxelizeConfig,
};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("voxelize-e2e-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

const UTM54: GeoCrs = GeoCrs::Utm {
    zone: 54,
    south: false,
};

/// A flat terrain raster exactly covering `extent` meters with `px` meter
/// pixels, anchored at the origin.
fn flat_terrain(extent: f64, px: f64, elevation: f32) -> RasterLayer {
    let n = (extent / px) as usize;
    RasterLayer {
        name: "dem".to_string(),
        crs: UTM54,
        transform: AffineTransform::north_up(0.0, extent, px, px),
        data: Grid2d::filled(n, n, elevation),
        nodata: Some(-9999.0),
        kind: LayerKind::Continuous,
        resampling: Resampling::Nearest,
    }
}

fn footprint(x0: f64, y0: f64, x1: f64, y1: f64, height: f64) -> VectorGeometry {
    VectorGeometry {
        ring: Arc::new(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]]),
        value: height,
    }
}

#[test]
fn square_building_occupies_expected_cells_and_levels() {
    // 200 m x 200 m at 2 m cells; one 20 m x 20 m footprint, 30 m tall,
    // 3 m vertical levels.
    let spec = GridSpec::from_origin(0.0, 0.0, 2.0, 100, 100, UTM54).unwrap();
    assert_eq!((spec.n_rows, spec.n_cols), (100, 100));

    let sources = vec![
        SourceLayer {
            role: LayerRole::Terrain,
            source: LayerSource::Raster(flat_terrain(200.0, 2.0, 0.0)),
        },
        SourceLayer {
            role: LayerRole::BuildingHeight,
            source: LayerSource::Vector(VectorLayer {
                name: "buildings".to_string(),
                crs: UTM54,
                kind: LayerKind::Continuous,
                geometries: vec![footprint(40.0, 40.0, 60.0, 60.0, 30.0)],
            }),
        },
    ];

    let stack = rasterize_layers(&spec, &sources).unwrap();
    let config = VoxelizeConfig {
        cell_size: 2.0,
        voxel_vertical_size: 3.0,
        ..VoxelizeConfig::default()
    };
    let model = resolve(&spec, &stack, &Palette::default(), &config).unwrap();

    // 30 m / 3 m = 10 building levels; nothing taller anywhere.
    assert_eq!(model.grid.shape(), (100, 100, 10));

    // The footprint covers cells 20..30 on both axes.
    let heights = stack
        .get(LayerRole::BuildingHeight)
        .unwrap()
        .continuous()
        .unwrap();
    let claimed: Vec<(usize, usize)> = (0..100)
        .flat_map(|r| (0..100).map(move |c| (r, c)))
        .filter(|&(r, c)| !heights.get(r, c).is_nan())
        .collect();
    assert_eq!(claimed.len(), 100);
    assert!(claimed
        .iter()
        .all(|&(r, c)| (20..30).contains(&r) && (20..30).contains(&c)));

    // Building cells are full columns of building class.
    assert!(model.grid.column(25, 25).iter().all(|&v| v == BUILDING));

    // Elsewhere: ground at base elevation, air above.
    let open = model.grid.column(5, 5);
    assert_eq!(open[0], BARELAND);
    assert!(open[1..].iter().all(|&v| v == EMPTY));

    assert_eq!(model.diagnostics.terrain_fallback_cells, 0);
}

#[test]
fn terrain_hole_falls_back_and_reports_exact_cell_count() {
    let spec = GridSpec::from_origin(0.0, 0.0, 1.0, 10, 10, UTM54).unwrap();

    let mut dem = flat_terrain(10.0, 1.0, 20.0);
    // Pixel rows count from the top (north); grid rows from the south.
    for (px_row, px_col) in [(0, 0), (0, 1), (3, 4), (7, 7), (9, 9)] {
        dem.data.set(px_row, px_col, -9999.0);
    }

    let sources = vec![SourceLayer {
        role: LayerRole::Terrain,
        source: LayerSource::Raster(dem),
    }];

    let stack = rasterize_layers(&spec, &sources).unwrap();
    let config = VoxelizeConfig {
        cell_size: 1.0,
        voxel_vertical_size: 1.0,
        ..VoxelizeConfig::default()
    };
    let model = resolve(&spec, &stack, &Palette::default(), &config).unwrap();

    assert_eq!(model.diagnostics.terrain_fallback_cells, 5);
    // The fallback is the mean of the valid samples (all 20 m), so the
    // grid stays flat.
    assert_eq!(model.grid.n_levels(), 1);
}

#[test]
fn building_beats_canopy_wherever_both_claim_a_level() {
    let n = 24;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut buildings = Grid2d::filled(n, n, f32::NAN);
    let mut canopy = Grid2d::filled(n, n, f32::NAN);
    for row in 0..n {
        for col in 0..n {
            if rng.gen::<f32>() < 0.6 {
                buildings.set(row, col, rng.gen::<f32>() * 30.0);
            }
            if rng.gen::<f32>() < 0.6 {
                canopy.set(row, col, rng.gen::<f32>() * 30.0);
            }
        }
    }

    let mut stack = LayerStack::new();
    stack.insert(
        LayerRole::Terrain,
        LayerGrid::Continuous(Grid2d::filled(n, n, 0.0f32)),
    );
    stack.insert(LayerRole::BuildingHeight, LayerGrid::Continuous(buildings.clone()));
    stack.insert(LayerRole::CanopyHeight, LayerGrid::Continuous(canopy.clone()));

    let spec = GridSpec::from_origin(0.0, 0.0, 2.0, n, n, UTM54).unwrap();
    let config = VoxelizeConfig::default();
    let model = resolve(&spec, &stack, &Palette::default(), &config).unwrap();

    let levels_of = |h: f32| -> usize {
        if h.is_nan() || h <= 0.0 {
            0
        } else {
            (h as f64 / config.voxel_vertical_size + 0.5).floor() as usize
        }
    };

    for row in 0..n {
        for col in 0..n {
            let b = levels_of(buildings.get(row, col));
            let c = levels_of(canopy.get(row, col));
            let column = model.grid.column(row, col);

            for level in 0..b.min(c) {
                assert_eq!(column[level], BUILDING, "cell ({row}, {col}) level {level}");
            }
            for level in b..c {
                assert_eq!(column[level], TREE, "cell ({row}, {col}) level {level}");
            }
        }
    }
}

/// Sources for the geographic end-to-end runs: a gently sloped DEM in
/// geographic coordinates plus two footprints.
fn tokyo_sources() -> (BoundingRegion, Vec<SourceLayer>) {
    let region = BoundingRegion::rect(139.7600, 35.6800, 139.7618, 35.6815);

    let n = 40;
    let mut dem_values = Grid2d::filled(n, n, 0.0f32);
    for row in 0..n {
        for col in 0..n {
            dem_values.set(row, col, 3.0 + (row as f32 * 0.2) + (col as f32 * 0.1));
        }
    }

    let dem = RasterLayer {
        name: "dem".to_string(),
        crs: GeoCrs::Geographic,
        transform: AffineTransform::north_up(
            139.7595,
            35.6820,
            0.003 / n as f64,
            0.0025 / n as f64,
        ),
        data: dem_values,
        nodata: None,
        kind: LayerKind::Continuous,
        resampling: Resampling::Bilinear,
    };

    let buildings = VectorLayer {
        name: "buildings".to_string(),
        crs: GeoCrs::Geographic,
        kind: LayerKind::Continuous,
        geometries: vec![
            footprint(139.7604, 35.6804, 139.7608, 35.6808, 24.0),
            footprint(139.7610, 35.6809, 139.7615, 35.6812, 45.0),
        ],
    };

    let sources = vec![
        SourceLayer {
            role: LayerRole::Terrain,
            source: LayerSource::Raster(dem),
        },
        SourceLayer {
            role: LayerRole::BuildingHeight,
            source: LayerSource::Vector(buildings),
        },
    ];

    (region, sources)
}

#[test]
fn pipeline_reruns_are_byte_identical() {
    let (region, sources) = tokyo_sources();
    let palette = Palette::default();
    let config = VoxelizeConfig {
        cell_size: 4.0,
        voxel_vertical_size: 4.0,
        ..VoxelizeConfig::default()
    };

    let a = voxelize(&region, &sources, &palette, &config).unwrap();
    let b = voxelize(&region, &sources, &palette, &config).unwrap();

    assert_eq!(a.spec, b.spec);
    assert_eq!(a.model.grid, b.model.grid);
    assert_eq!(a.model.diagnostics, b.model.diagnostics);
}

#[test]
fn export_and_reassembly_reproduce_the_grid() {
    let (region, sources) = tokyo_sources();
    let palette = Palette::default();
    let config = VoxelizeConfig {
        cell_size: 4.0,
        voxel_vertical_size: 4.0,
        // Small chunks force boundaries through the buildings.
        chunk_limit: 8,
        ..VoxelizeConfig::default()
    };

    let dir = temp_dir("reassembly");
    let (output, manifest) =
        voxelize_to_dir(&region, &sources, &palette, &config, &dir).unwrap();

    assert!(dir.join("manifest.json").exists());
    assert_eq!(manifest.n_levels, output.model.grid.n_levels());

    let (rebuilt, _) = reassemble(&dir).unwrap();
    assert_eq!(rebuilt, output.model.grid);
}
