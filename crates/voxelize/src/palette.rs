//! Voxel class labels and the palette mapping them to colors.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

/// A voxel class label. Code 0 is the reserved empty/air value; negative
/// codes are volumetric features; positive codes are ground-surface
/// land-cover classes.
pub type ClassId = i16;

pub const EMPTY: ClassId = 0;
pub const UNDERGROUND: ClassId = -1;
pub const TREE: ClassId = -2;
pub const BUILDING: ClassId = -3;

pub const BARELAND: ClassId = 1;
pub const RANGELAND: ClassId = 2;
pub const DEVELOPED: ClassId = 3;
pub const ROAD: ClassId = 4;
pub const TREE_COVER: ClassId = 5;
pub const WATER: ClassId = 6;
pub const AGRICULTURE: ClassId = 7;
pub const BUILDING_COVER: ClassId = 8;

/// Broad semantic family of a class, for consumers that do not care about
/// the individual code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Building,
    Vegetation,
    Ground,
    Water,
    Underground,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub id: ClassId,
    pub name: String,
    pub color: [u8; 3],
    pub kind: ClassKind,
}

/// The closed, finite set of non-empty classes a voxel grid may use, with
/// display colors. Passed explicitly through the pipeline; its order fixes
/// the on-disk color indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry. Replaces a previous entry with the same id so a
    /// caller can recolor the defaults.
    pub fn push(&mut self, entry: PaletteEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ClassId) -> Option<&PaletteEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ClassId) -> bool {
        id == EMPTY || self.get(id).is_some()
    }

    /// Fails when the non-empty entry count exceeds what the voxel-model
    /// format can address. Callers with richer classifications must coarsen
    /// before exporting.
    pub fn validate_capacity(&self) -> Result<()> {
        if self.entries.len() > mvox::PALETTE_CAPACITY {
            return Err(VoxError::PaletteOverflow {
                classes: self.entries.len(),
                capacity: mvox::PALETTE_CAPACITY,
            });
        }
        Ok(())
    }

    /// 1-based color index of a class in chunk files; `None` for unknown
    /// classes and for [`EMPTY`] (which serializes as absence).
    pub fn color_index(&self, id: ClassId) -> Option<u8> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .map(|i| (i + 1) as u8)
    }

    /// Class of a 1-based color index read back from a chunk file.
    pub fn class_of_index(&self, index: u8) -> Option<ClassId> {
        if index == 0 {
            return Some(EMPTY);
        }
        self.entries.get(index as usize - 1).map(|e| e.id)
    }

    /// The 256-entry RGBA table for chunk files; slot 0 is transparent.
    pub fn vox_palette(&self) -> [[u8; 4]; 256] {
        let mut palette = [[0u8, 0, 0, 255]; 256];
        palette[0] = [0, 0, 0, 0];
        for (i, entry) in self.entries.iter().take(mvox::PALETTE_CAPACITY).enumerate() {
            let [r, g, b] = entry.color;
            palette[i + 1] = [r, g, b, 255];
        }
        palette
    }
}

impl Default for Palette {
    /// The standard urban palette: buildings, trees, underground, and the
    /// ground-surface land-cover classes.
    fn default() -> Self {
        fn entry(id: ClassId, name: &str, color: [u8; 3], kind: ClassKind) -> PaletteEntry {
            PaletteEntry {
                id,
                name: name.to_string(),
                color,
                kind,
            }
        }

        Self {
            entries: vec![
                entry(BUILDING, "building", [180, 187, 216], ClassKind::Building),
                entry(TREE, "tree", [78, 99, 63], ClassKind::Vegetation),
                entry(UNDERGROUND, "underground", [188, 143, 143], ClassKind::Underground),
                entry(BARELAND, "bareland", [235, 202, 178], ClassKind::Ground),
                entry(RANGELAND, "rangeland", [123, 130, 59], ClassKind::Ground),
                entry(DEVELOPED, "developed", [108, 119, 129], ClassKind::Ground),
                entry(ROAD, "road", [59, 62, 87], ClassKind::Ground),
                entry(TREE_COVER, "tree cover", [116, 150, 66], ClassKind::Vegetation),
                entry(WATER, "water", [44, 66, 133], ClassKind::Water),
                entry(AGRICULTURE, "agriculture", [112, 120, 56], ClassKind::Ground),
                entry(BUILDING_COVER, "building footprint", [150, 166, 190], ClassKind::Ground),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_palette_has_distinct_codes_within_capacity() {
        let palette = Palette::default();
        assert!(palette.validate_capacity().is_ok());

        let mut ids: Vec<ClassId> = palette.entries().iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), palette.len());
        assert!(!ids.contains(&EMPTY));
    }

    #[test]
    fn color_index_round_trips_through_class_of_index() {
        let palette = Palette::default();
        for entry in palette.entries() {
            let index = palette.color_index(entry.id).unwrap();
            assert!(index >= 1);
            assert_eq!(palette.class_of_index(index), Some(entry.id));
        }
        assert_eq!(palette.class_of_index(0), Some(EMPTY));
        assert_eq!(palette.color_index(EMPTY), None);
    }

    #[test]
    fn overflowing_palette_is_rejected() {
        let mut palette = Palette::new();
        for id in 1..=(mvox::PALETTE_CAPACITY as ClassId + 1) {
            palette.push(PaletteEntry {
                id,
                name: format!("class {id}"),
                color: [0, 0, 0],
                kind: ClassKind::Ground,
            });
        }

        assert!(matches!(
            palette.validate_capacity(),
            Err(VoxError::PaletteOverflow {
                classes,
                capacity: 255,
            }) if classes == 256
        ));
    }

    #[test]
    fn push_replaces_by_id() {
        let mut palette = Palette::default();
        let before = palette.len();
        palette.push(PaletteEntry {
            id: WATER,
            name: "water".to_string(),
            color: [16, 24, 48],
            kind: ClassKind::Water,
        });
        assert_eq!(palette.len(), before);
        assert_eq!(palette.get(WATER).unwrap().color, [16, 24, 48]);
    }
}
