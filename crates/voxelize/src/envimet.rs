//! ENVI-met area-input (INX) and plant-database (EDB) export.
//!
//! The INX file carries the 2D grids a microclimate run needs: building
//! top/bottom matrices, building numbering, simple-plant and soil profiles
//! from land cover, per-cell 3D plants for tree canopy, and the terrain
//! model. Location metadata is caller-supplied; nothing is ever geocoded
//! here.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};
use crate::grid::{Grid2d, GridSpec};
use crate::layers::{LayerGrid, LayerRole, LayerStack, NO_DATA_CLASS};
use crate::palette::{AGRICULTURE, DEVELOPED, RANGELAND, ROAD, TREE_COVER, WATER};

/// Default building height substituted for footprints without height data.
const UNKNOWN_BUILDING_HEIGHT: f32 = 10.0;

/// Ratio of trunk height to total tree height in the generated plant
/// profiles.
const DEFAULT_TRUNK_HEIGHT_RATIO: f64 = 11.76 / 19.98;

/// Telescoping vertical grid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telescoping {
    /// Per-level growth in percent.
    pub vertical_stretch: f64,
    /// Height in meters at which stretching begins; defaults to the top of
    /// the tallest building.
    pub start_stretch: Option<f64>,
}

/// Caller-supplied export options and location metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvimetOptions {
    pub author: String,
    pub description: String,
    pub location_name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub timezone_name: String,
    pub timezone_longitude: f64,
    /// Vertical domain height as a multiple of the tallest structure.
    pub domain_building_max_height_ratio: usize,
    pub min_grids_z: usize,
    pub telescoping: Option<Telescoping>,
    pub trunk_height_ratio: f64,
    /// Leaf area density written into the plant database.
    pub lad: f64,
}

impl Default for EnvimetOptions {
    fn default() -> Self {
        Self {
            author: "[Enter model author name]".to_string(),
            description: "[Enter model description]".to_string(),
            location_name: "unknown".to_string(),
            longitude: 0.0,
            latitude: 0.0,
            timezone_name: "UTC".to_string(),
            timezone_longitude: 0.0,
            domain_building_max_height_ratio: 2,
            min_grids_z: 0,
            telescoping: None,
            trunk_height_ratio: DEFAULT_TRUNK_HEIGHT_RATIO,
            lad: 1.0,
        }
    }
}

/// Snap heights to the nearest multiple of the mesh size.
fn snap_heights(grid: &mut Grid2d<f32>, meshsize: f64) {
    for v in grid.as_mut_slice() {
        *v = ((*v as f64 / meshsize + 0.5).floor() * meshsize) as f32;
    }
}

/// 4-connectivity component labeling of non-zero cells, labels assigned in
/// scan order starting at 1.
pub fn group_and_label_cells(grid: &Grid2d<u16>) -> Grid2d<u32> {
    let (n_rows, n_cols) = (grid.n_rows(), grid.n_cols());
    let mut labels = Grid2d::filled(n_rows, n_cols, 0u32);
    let mut next_label = 0u32;
    let mut queue = Vec::new();

    for row in 0..n_rows {
        for col in 0..n_cols {
            if grid.get(row, col) == 0 || labels.get(row, col) != 0 {
                continue;
            }

            next_label += 1;
            labels.set(row, col, next_label);
            queue.push((row, col));

            while let Some((r, c)) = queue.pop() {
                let mut visit = |nr: usize, nc: usize| {
                    if grid.get(nr, nc) != 0 && labels.get(nr, nc) == 0 {
                        labels.set(nr, nc, next_label);
                        queue.push((nr, nc));
                    }
                };

                if r > 0 {
                    visit(r - 1, c);
                }
                if r + 1 < n_rows {
                    visit(r + 1, c);
                }
                if c > 0 {
                    visit(r, c - 1);
                }
                if c + 1 < n_cols {
                    visit(r, c + 1);
                }
            }
        }
    }

    labels
}

/// Flatten the terrain under each building to the component's mean
/// elevation, then shift the whole surface down to a zero minimum.
pub fn flatten_dem_under_buildings(building_nr: &Grid2d<u32>, dem: &Grid2d<f32>) -> Grid2d<f32> {
    let mut result = dem.clone();

    let max_label = building_nr.as_slice().iter().copied().max().unwrap_or(0);
    if max_label > 0 {
        let mut sums = vec![0.0f64; max_label as usize + 1];
        let mut counts = vec![0usize; max_label as usize + 1];
        for (label, &elev) in building_nr.as_slice().iter().zip(dem.as_slice()) {
            if *label > 0 {
                sums[*label as usize] += elev as f64;
                counts[*label as usize] += 1;
            }
        }

        for (label, v) in building_nr.as_slice().iter().zip(result.as_mut_slice()) {
            if *label > 0 {
                *v = (sums[*label as usize] / counts[*label as usize] as f64) as f32;
            }
        }
    }

    let min = result
        .as_slice()
        .iter()
        .copied()
        .fold(f32::INFINITY, f32::min);
    if min.is_finite() {
        for v in result.as_mut_slice() {
            *v -= min;
        }
    }

    result
}

/// Smallest `n` with `a * (1 - r^n) / (1 - r) > target` (geometric series
/// of stretched level heights).
fn find_min_n(a: f64, r: f64, target: f64, max_n: usize) -> Option<usize> {
    for n in 1..=max_n {
        let sum = if r == 1.0 {
            a * n as f64
        } else {
            a * (1.0 - r.powi(n as i32)) / (1.0 - r)
        };
        if (a > 0.0 && sum > target) || (a < 0.0 && sum < target) {
            return Some(n);
        }
    }
    None
}

fn matrix<T, F: Fn(usize, usize) -> T>(n_rows: usize, n_cols: usize, f: F) -> String
where
    T: std::fmt::Display,
{
    (0..n_rows)
        .map(|row| {
            let cells: Vec<String> = (0..n_cols).map(|col| f(row, col).to_string()).collect();
            format!("     {}", cells.join(","))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Simple-plant profile for a land-cover class, empty when the class grows
/// no 1D vegetation.
fn plant_profile(class: u16) -> &'static str {
    match class as i16 {
        RANGELAND | TREE_COVER | AGRICULTURE => "0200XX",
        _ => "",
    }
}

/// Soil profile for a land-cover class.
fn soil_profile(class: u16) -> &'static str {
    if class == NO_DATA_CLASS {
        return "0200SD";
    }
    match class as i16 {
        WATER => "0200WW",
        DEVELOPED => "0200PG",
        ROAD => "0200ST",
        _ => "000000",
    }
}

const INX_TEMPLATE: &str = r#"<ENVI-MET_Datafile>
<Header>
<filetype>INPX ENVI-met Area Input File</filetype>
<version>440</version>
<revisiondate>7/5/2024 5:44:52 PM</revisiondate>
<checksum>0</checksum>
<encryptionlevel>0</encryptionlevel>
</Header>
  <baseData>
     <modelDescription> $modelDescription$ </modelDescription>
     <modelAuthor> $modelAuthor$ </modelAuthor>
     <modelcopyright> The creator or distributor is responsible for following Copyright Laws </modelcopyright>
  </baseData>
  <modelGeometry>
     <grids-I> $grids-I$ </grids-I>
     <grids-J> $grids-J$ </grids-J>
     <grids-Z> $grids-Z$ </grids-Z>
     <dx> $dx$ </dx>
     <dy> $dy$ </dy>
     <dz-base> $dz-base$ </dz-base>
     <useTelescoping_grid> $useTelescoping_grid$ </useTelescoping_grid>
     <useSplitting> 1 </useSplitting>
     <verticalStretch> $verticalStretch$ </verticalStretch>
     <startStretch> $startStretch$ </startStretch>
     <has3DModel> 0 </has3DModel>
     <isFull3DDesign> 0 </isFull3DDesign>
  </modelGeometry>
  <nestingArea>
     <numberNestinggrids> 0 </numberNestinggrids>
     <soilProfileA> 000000 </soilProfileA>
     <soilProfileB> 000000 </soilProfileB>
  </nestingArea>
  <locationData>
     <modelRotation> 0 </modelRotation>
     <projectionSystem> GCS_WGS_1984 </projectionSystem>
     <UTMZone> 0 </UTMZone>
     <realworldLowerLeft_X> 0.00000 </realworldLowerLeft_X>
     <realworldLowerLeft_Y> 0.00000 </realworldLowerLeft_Y>
     <locationName> $locationName$ </locationName>
     <location_Longitude> $location_Longitude$ </location_Longitude>
     <location_Latitude> $location_Latitude$ </location_Latitude>
     <locationTimeZone_Name> $locationTimeZone_Name$ </locationTimeZone_Name>
     <locationTimeZone_Longitude> $locationTimeZone_Longitude$ </locationTimeZone_Longitude>
  </locationData>
  <defaultSettings>
     <commonWallMaterial> 000000 </commonWallMaterial>
     <commonRoofMaterial> 000000 </commonRoofMaterial>
  </defaultSettings>
  <buildings2D>
     <zTop type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$zTop$
     </zTop>
     <zBottom type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$zBottom$
     </zBottom>
     <buildingNr type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$buildingNr$
     </buildingNr>
     <fixedheight type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$fixedheight$
     </fixedheight>
  </buildings2D>
  <simpleplants2D>
     <ID_plants1D type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$ID_plants1D$
     </ID_plants1D>
  </simpleplants2D>
$3Dplants$
  <soils2D>
     <ID_soilprofile type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$ID_soilprofile$
     </ID_soilprofile>
  </soils2D>
  <dem>
     <DEMReference> 0 </DEMReference>
     <terrainheight type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$terrainheight$
     </terrainheight>
  </dem>
  <sources2D>
     <ID_sources type="matrix-data" dataI="$grids-I$" dataJ="$grids-J$">
$ID_sources$
     </ID_sources>
  </sources2D>
</ENVI-MET_Datafile>"#;

/// Write the INX area file for the rasterized layers.
pub fn export_inx(
    stack: &LayerStack,
    spec: &GridSpec,
    options: &EnvimetOptions,
    path: &Path,
) -> Result<()> {
    let meshsize = spec.cell_size;
    let (n_rows, n_cols) = (spec.n_rows, spec.n_cols);

    let terrain = stack.terrain()?;

    // Building heights: unknown heights get a stated default, the domain
    // border is cleared, and heights snap to mesh multiples.
    let mut building_height = match stack.get(LayerRole::BuildingHeight) {
        Some(LayerGrid::Continuous(g)) => g.clone(),
        _ => Grid2d::filled(n_rows, n_cols, f32::NAN),
    };
    // NaN under a footprint is a building with unknown height and gets the
    // stated default; NaN elsewhere is simply no building.
    let footprint_ids = match stack.get(LayerRole::BuildingId) {
        Some(LayerGrid::Categorical(g)) => Some(g),
        _ => None,
    };
    for (i, v) in building_height.as_mut_slice().iter_mut().enumerate() {
        if v.is_nan() {
            let has_footprint = footprint_ids
                .is_some_and(|g| g.as_slice()[i] != 0 && g.as_slice()[i] != NO_DATA_CLASS);
            *v = if has_footprint {
                UNKNOWN_BUILDING_HEIGHT
            } else {
                0.0
            };
        }
    }
    for col in 0..n_cols {
        building_height.set(0, col, 0.0);
        building_height.set(n_rows - 1, col, 0.0);
    }
    for row in 0..n_rows {
        building_height.set(row, 0, 0.0);
        building_height.set(row, n_cols - 1, 0.0);
    }
    snap_heights(&mut building_height, meshsize);

    let building_id = match stack.get(LayerRole::BuildingId) {
        Some(LayerGrid::Categorical(g)) => g.clone(),
        _ => {
            // Fall back to the height grid itself as the occupancy mask.
            let mut mask = Grid2d::filled(n_rows, n_cols, 0u16);
            for (m, &h) in mask.as_mut_slice().iter_mut().zip(building_height.as_slice()) {
                if h > 0.0 {
                    *m = 1;
                }
            }
            mask
        }
    };
    let building_nr = group_and_label_cells(&building_id);

    let land_cover = stack
        .get(LayerRole::LandCover)
        .and_then(LayerGrid::categorical);
    let canopy = stack
        .get(LayerRole::CanopyHeight)
        .and_then(LayerGrid::continuous);

    // Terrain normalized to a zero minimum and flattened under buildings.
    let mut dem = terrain.clone();
    let dem_min = dem.as_slice().iter().copied().fold(f32::INFINITY, f32::min);
    if dem_min.is_finite() {
        for v in dem.as_mut_slice() {
            if v.is_nan() {
                *v = dem_min;
            }
            *v -= dem_min;
        }
    }
    let dem = flatten_dem_under_buildings(&building_nr, &dem);

    // Vertical extent.
    let max_top = building_height
        .as_slice()
        .iter()
        .zip(dem.as_slice())
        .map(|(&b, &d)| b as f64 + d as f64)
        .fold(0.0f64, f64::max);
    let top_levels = (max_top / meshsize + 0.5).floor() as usize;

    let (use_telescoping, vertical_stretch, start_stretch, grids_z) = match options.telescoping {
        None => (
            0,
            0.0,
            0.0,
            (top_levels * options.domain_building_max_height_ratio).max(options.min_grids_z),
        ),
        Some(telescoping) => {
            let stretch = telescoping.vertical_stretch;
            let start = telescoping
                .start_stretch
                .unwrap_or(top_levels as f64 * meshsize);
            let ratio = (100.0 + stretch) / 100.0;
            let target =
                top_levels as f64 * meshsize * (options.domain_building_max_height_ratio - 1) as f64;
            let extra = find_min_n(meshsize, ratio, target, 1_000_000).unwrap_or(0);
            (1, stretch, start, (top_levels + extra).max(options.min_grids_z))
        }
    };

    let plants_3d = build_3d_plants(&building_height, canopy, n_rows, n_cols);

    let replacements: Vec<(&str, String)> = vec![
        ("$modelDescription$", options.description.clone()),
        ("$modelAuthor$", options.author.clone()),
        ("$locationName$", options.location_name.clone()),
        ("$location_Longitude$", options.longitude.to_string()),
        ("$location_Latitude$", options.latitude.to_string()),
        ("$locationTimeZone_Name$", options.timezone_name.clone()),
        (
            "$locationTimeZone_Longitude$",
            options.timezone_longitude.to_string(),
        ),
        ("$grids-Z$", grids_z.to_string()),
        ("$dx$", meshsize.to_string()),
        ("$dy$", meshsize.to_string()),
        ("$dz-base$", meshsize.to_string()),
        ("$useTelescoping_grid$", use_telescoping.to_string()),
        ("$verticalStretch$", vertical_stretch.to_string()),
        ("$startStretch$", start_stretch.to_string()),
        ("$zTop$", matrix(n_rows, n_cols, |r, c| building_height.get(r, c))),
        ("$zBottom$", matrix(n_rows, n_cols, |_, _| 0)),
        ("$buildingNr$", matrix(n_rows, n_cols, |r, c| building_nr.get(r, c))),
        ("$fixedheight$", matrix(n_rows, n_cols, |_, _| 0)),
        (
            "$ID_plants1D$",
            matrix(n_rows, n_cols, |r, c| {
                land_cover.map_or("", |g| plant_profile(g.get(r, c))).to_string()
            }),
        ),
        ("$3Dplants$", plants_3d),
        (
            "$ID_soilprofile$",
            matrix(n_rows, n_cols, |r, c| {
                land_cover
                    .map_or("000000", |g| soil_profile(g.get(r, c)))
                    .to_string()
            }),
        ),
        (
            "$terrainheight$",
            matrix(n_rows, n_cols, |r, c| (dem.get(r, c) + 0.5).floor() as i64),
        ),
        ("$ID_sources$", matrix(n_rows, n_cols, |_, _| "".to_string())),
    ];

    let mut content = INX_TEMPLATE.to_string();
    for (placeholder, value) in &replacements {
        content = content.replace(placeholder, value);
    }
    // Grid dimensions appear inside matrix attributes too, so they go last.
    content = content.replace("$grids-I$", &n_cols.to_string());
    content = content.replace("$grids-J$", &n_rows.to_string());

    std::fs::write(path, content)
        .map_err(|e| VoxError::chunk_write(format!("INX file {}", path.display()), e))?;

    info!("Exported ENVI-met area file {}", path.display());
    Ok(())
}

/// One `3Dplants` element per tree-covered cell outside buildings.
fn build_3d_plants(
    building_height: &Grid2d<f32>,
    canopy: Option<&Grid2d<f32>>,
    n_rows: usize,
    n_cols: usize,
) -> String {
    let Some(canopy) = canopy else {
        return String::new();
    };

    let mut out = String::new();
    for row in 0..n_rows {
        for col in 0..n_cols {
            let height = canopy.get(row, col);
            if height.is_nan() || height <= 0.0 || building_height.get(row, col) > 0.0 {
                continue;
            }

            let levels = (height + 0.5).floor() as i64;
            if levels < 1 {
                continue;
            }

            let plant_id = format!("H{levels:02}W01");
            out.push_str(&format!(
                "  <3Dplants>\n     <rootcell_i> {} </rootcell_i>\n     <rootcell_j> {} </rootcell_j>\n     <rootcell_k> 0 </rootcell_k>\n     <plantID> {} </plantID>\n     <name> .{} </name>\n     <observe> 0 </observe>\n  </3Dplants>\n",
                col + 1,
                row + 1,
                plant_id,
                plant_id
            ));
        }
    }
    out
}

/// Generate the matching plant database with `H01W01`..`H50W01` trees.
pub fn export_plant_database(options: &EnvimetOptions, path: &Path) -> Result<()> {
    let mut plants = String::new();

    for height in 1..=50usize {
        let trunk = (height as f64 * options.trunk_height_ratio).max(0.0);
        let lad_start = (trunk as usize).min(height - 1);
        let lad_profile: Vec<String> = (lad_start..height)
            .map(|level| format!("     0,0,{level},{}", options.lad))
            .collect();

        plants.push_str(&format!(
            r#"  <PLANT3D>
     <ID> H{height:02}W01 </ID>
     <Description> H{height:02}W01 </Description>
     <Planttype> 0 </Planttype>
     <Leaftype> 1 </Leaftype>
     <Albedo> 0.18000 </Albedo>
     <Transmittance> 0.30000 </Transmittance>
     <Height> {height_m:.5} </Height>
     <Width> 1.00000 </Width>
     <Depth> {depth:.5} </Depth>
     <RootDiameter> 1.00000 </RootDiameter>
     <cellsize> 1.00000 </cellsize>
     <xy_cells> 1 </xy_cells>
     <z_cells> {height} </z_cells>
     <LAD-Profile type="sparematrix-3D" dataI="1" dataJ="1" zlayers="{height}" defaultValue="0.00000">
{lad}
     </LAD-Profile>
     <Season-Profile> 0.30000,0.30000,0.30000,0.40000,0.70000,1.00000,1.00000,1.00000,0.80000,0.60000,0.30000,0.30000 </Season-Profile>
     <PlantGroup> 0 </PlantGroup>
  </PLANT3D>
"#,
            height = height,
            height_m = height as f64,
            depth = trunk,
            lad = lad_profile.join("\n"),
        ));
    }

    let content = format!(
        "<ENVI-MET_Datafile>\n<Header>\n<filetype>DATA</filetype>\n<version>1</version>\n<remark>Envi-Data</remark>\n<checksum>0</checksum>\n<encryptionlevel>1699612</encryptionlevel>\n</Header>\n{plants}</ENVI-MET_Datafile>"
    );

    std::fs::write(path, content)
        .map_err(|e| VoxError::chunk_write(format!("EDB file {}", path.display()), e))?;

    info!("Exported plant database {}", path.display());
    Ok(())
}
