//! MVOX: reader/writer for single-model MagicaVoxel `.vox` files.
//!
//! - One model per file: a `SIZE`/`XYZI` chunk pair plus an optional `RGBA`
//!   palette chunk.
//! - Voxels are sparse: only non-empty cells are stored, one record each.
//! - Color index 0 is reserved for "empty"; indices 1..=255 address the
//!   palette. The on-disk `RGBA` chunk stores 256 entries where file entry
//!   `i` is the color of index `i + 1` (entry 255 is dead weight the format
//!   carries for historical reasons).
//! - Maximum model extent is 256 cells per axis; callers with larger grids
//!   must tile them into several files.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"VOX "
//!   04  : u32     version = 150
//!   08  : chunk   MAIN (content empty, all other chunks are its children)
//!
//! Chunk layout:
//!   [u8;4] id, u32 content_size, u32 children_size,
//!   [content_size bytes], [children_size bytes of child chunks]
//!
//! MAIN children:
//!   SIZE : u32 size_x, u32 size_y, u32 size_z
//!   XYZI : u32 count, then count * [u8 x, u8 y, u8 z, u8 color_index]
//!   RGBA : 256 * [u8 r, u8 g, u8 b, u8 a]
//!
//! Unknown chunks (MATL, nTRN, ... written by the MagicaVoxel editor) are
//! skipped on read.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const VOX_MAGIC: [u8; 4] = *b"VOX ";
pub const VOX_VERSION: u32 = 150;

/// Maximum model size per axis the format can address.
pub const MAX_EXTENT: u32 = 256;

/// Usable palette entries; index 0 is the reserved empty value.
pub const PALETTE_CAPACITY: usize = 255;

/// A single non-empty voxel record. Coordinates are model-local and must be
/// strictly below the model size on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voxel {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    /// Palette index, 1..=255. Index 0 never appears in a file.
    pub color: u8,
}

/// An in-memory `.vox` model.
///
/// `palette[i]` is the RGBA color of voxel color index `i`; `palette[0]` is
/// the empty slot and is never written to or read from disk.
#[derive(Debug, Clone)]
pub struct VoxModel {
    pub size: [u32; 3],
    pub voxels: Vec<Voxel>,
    pub palette: [[u8; 4]; 256],
}

impl VoxModel {
    /// An empty model of the given size with an all-opaque-black palette.
    pub fn new(size_x: u32, size_y: u32, size_z: u32) -> Self {
        let mut palette = [[0u8, 0, 0, 255]; 256];
        palette[0] = [0, 0, 0, 0];
        Self {
            size: [size_x, size_y, size_z],
            voxels: Vec::new(),
            palette,
        }
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated VOX"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Header of one chunk: id, content slice, children slice.
struct RawChunk<'a> {
    id: [u8; 4],
    content: &'a [u8],
    children: &'a [u8],
}

fn take_chunk<'a>(buf: &mut &'a [u8]) -> io::Result<RawChunk<'a>> {
    let id_bytes = take(buf, 4)?;
    let mut id = [0u8; 4];
    id.copy_from_slice(id_bytes);

    let content_size = le_u32(buf)? as usize;
    let children_size = le_u32(buf)? as usize;

    let content = take(buf, content_size)?;
    let children = take(buf, children_size)?;

    Ok(RawChunk {
        id,
        content,
        children,
    })
}

/// Parse a `.vox` model from a contiguous byte slice. This is the single
/// source of truth for parsing.
pub fn parse_vox_bytes(mut p: &[u8]) -> io::Result<VoxModel> {
    if take(&mut p, 4)? != b"VOX " {
        return Err(bad("bad VOX magic"));
    }

    // MagicaVoxel bumped the version past 150 without changing the chunks we
    // care about, so anything current-or-newer is accepted.
    let version = le_u32(&mut p)?;
    if version < VOX_VERSION {
        return Err(bad("unsupported VOX version"));
    }

    let main = take_chunk(&mut p)?;
    if &main.id != b"MAIN" {
        return Err(bad("expected MAIN chunk"));
    }

    let mut size: Option<[u32; 3]> = None;
    let mut voxels: Option<Vec<Voxel>> = None;
    let mut palette: Option<[[u8; 4]; 256]> = None;

    let mut children = main.children;
    while !children.is_empty() {
        let chunk = take_chunk(&mut children)?;

        match &chunk.id {
            b"SIZE" => {
                if size.is_some() {
                    // A second model; only the first one is ours.
                    continue;
                }

                let mut c = chunk.content;
                let sx = le_u32(&mut c)?;
                let sy = le_u32(&mut c)?;
                let sz = le_u32(&mut c)?;

                if sx == 0 || sy == 0 || sz == 0 {
                    return Err(bad("zero-sized model"));
                }
                if sx > MAX_EXTENT || sy > MAX_EXTENT || sz > MAX_EXTENT {
                    return Err(bad("model exceeds 256 cells on an axis"));
                }

                size = Some([sx, sy, sz]);
            }
            b"XYZI" => {
                if voxels.is_some() {
                    continue;
                }

                let mut c = chunk.content;
                let count = le_u32(&mut c)? as usize;
                let raw = take(&mut c, count.checked_mul(4).ok_or_else(|| bad("voxel count overflow"))?)?;

                // Records are plain u8 quadruples; reinterpret in one pass.
                let records: &[[u8; 4]] = bytemuck::cast_slice(raw);
                let mut out = Vec::with_capacity(count);
                for &[x, y, z, color] in records {
                    if color == 0 {
                        return Err(bad("voxel with empty color index 0"));
                    }
                    out.push(Voxel { x, y, z, color });
                }

                voxels = Some(out);
            }
            b"RGBA" => {
                need(chunk.content, 256 * 4)?;

                let mut pal = [[0u8; 4]; 256];
                pal[0] = [0, 0, 0, 0];
                for (i, quad) in chunk.content.chunks_exact(4).take(255).enumerate() {
                    // File entry i colors index i + 1.
                    pal[i + 1] = [quad[0], quad[1], quad[2], quad[3]];
                }

                palette = Some(pal);
            }
            // PACK, MATL, nTRN, ... : not ours, skip.
            _ => {}
        }
    }

    let size = size.ok_or_else(|| bad("missing SIZE chunk"))?;
    let voxels = voxels.ok_or_else(|| bad("missing XYZI chunk"))?;

    for v in &voxels {
        if (v.x as u32) >= size[0] || (v.y as u32) >= size[1] || (v.z as u32) >= size[2] {
            return Err(bad("voxel outside model bounds"));
        }
    }

    let palette = palette.unwrap_or_else(|| {
        let mut pal = [[0u8, 0, 0, 255]; 256];
        pal[0] = [0, 0, 0, 0];
        pal
    });

    Ok(VoxModel {
        size,
        voxels,
        palette,
    })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<VoxModel> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_vox_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<VoxModel> {
    let bytes = std::fs::read(path)?;
    parse_vox_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, model: &VoxModel) -> io::Result<()> {
    let [sx, sy, sz] = model.size;

    if sx == 0 || sy == 0 || sz == 0 {
        return Err(bad("zero-sized model"));
    }
    if sx > MAX_EXTENT || sy > MAX_EXTENT || sz > MAX_EXTENT {
        return Err(bad("model exceeds 256 cells on an axis"));
    }

    for v in &model.voxels {
        if v.color == 0 {
            return Err(bad("voxel with empty color index 0"));
        }
        if (v.x as u32) >= sx || (v.y as u32) >= sy || (v.z as u32) >= sz {
            return Err(bad("voxel outside model bounds"));
        }
    }

    let size_total = 12 + 12u32;
    let xyzi_content = 4 + 4 * model.voxels.len() as u32;
    let xyzi_total = 12 + xyzi_content;
    let rgba_total = 12 + 256 * 4u32;
    let main_children = size_total + xyzi_total + rgba_total;

    let mut file = File::create(path)?;

    file.write_all(&VOX_MAGIC)?;
    write_u32(&mut file, VOX_VERSION)?;

    // MAIN
    file.write_all(b"MAIN")?;
    write_u32(&mut file, 0)?;
    write_u32(&mut file, main_children)?;

    // SIZE
    file.write_all(b"SIZE")?;
    write_u32(&mut file, 12)?;
    write_u32(&mut file, 0)?;
    write_u32(&mut file, sx)?;
    write_u32(&mut file, sy)?;
    write_u32(&mut file, sz)?;

    // XYZI
    file.write_all(b"XYZI")?;
    write_u32(&mut file, xyzi_content)?;
    write_u32(&mut file, 0)?;
    write_u32(&mut file, model.voxels.len() as u32)?;
    for v in &model.voxels {
        file.write_all(&[v.x, v.y, v.z, v.color])?;
    }

    // RGBA: file entry i = color of index i + 1; last entry is padding.
    file.write_all(b"RGBA")?;
    write_u32(&mut file, 256 * 4)?;
    write_u32(&mut file, 0)?;
    for i in 1..=255usize {
        file.write_all(&model.palette[i])?;
    }
    file.write_all(&[0, 0, 0, 0])?;

    file.flush()?;

    Ok(())
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> VoxModel {
        let mut model = VoxModel::new(4, 3, 2);
        model.palette[1] = [255, 0, 0, 255];
        model.palette[7] = [10, 20, 30, 255];
        model.voxels.push(Voxel {
            x: 0,
            y: 0,
            z: 0,
            color: 1,
        });
        model.voxels.push(Voxel {
            x: 3,
            y: 2,
            z: 1,
            color: 7,
        });
        model
    }

    fn write_to_bytes(model: &VoxModel) -> Vec<u8> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let dir = std::env::temp_dir().join(format!("mvox-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!(
            "model-{}.vox",
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        write_file(&path, model).unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn round_trip_preserves_voxels_and_palette() {
        let model = sample_model();
        let bytes = write_to_bytes(&model);
        let parsed = parse_vox_bytes(&bytes).unwrap();

        assert_eq!(parsed.size, model.size);
        assert_eq!(parsed.voxels, model.voxels);
        assert_eq!(parsed.palette[1], [255, 0, 0, 255]);
        assert_eq!(parsed.palette[7], [10, 20, 30, 255]);
        assert_eq!(parsed.palette[0], [0, 0, 0, 0]);
    }

    #[test]
    fn header_is_magic_then_version_then_main() {
        let bytes = write_to_bytes(&sample_model());

        assert_eq!(&bytes[0..4], b"VOX ");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), VOX_VERSION);
        assert_eq!(&bytes[8..12], b"MAIN");
    }

    #[test]
    fn oversized_model_is_rejected() {
        let model = VoxModel::new(257, 1, 1);
        let dir = std::env::temp_dir();
        let err = write_file(dir.join("mvox-oversized.vox"), &model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn out_of_bounds_voxel_is_rejected() {
        let mut model = VoxModel::new(2, 2, 2);
        model.voxels.push(Voxel {
            x: 2,
            y: 0,
            z: 0,
            color: 1,
        });
        let err = write_file(std::env::temp_dir().join("mvox-oob.vox"), &model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_input_errors_cleanly() {
        let bytes = write_to_bytes(&sample_model());
        for cut in [0, 3, 8, 20, bytes.len() - 1] {
            assert!(parse_vox_bytes(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let model = sample_model();
        let mut bytes = write_to_bytes(&model);

        // Append a made-up child chunk to MAIN and patch its children size.
        let extra: &[u8] = b"ZZZZ\x04\x00\x00\x00\x00\x00\x00\x00\xde\xad\xbe\xef";
        bytes.extend_from_slice(extra);
        let old = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        bytes[16..20].copy_from_slice(&(old + extra.len() as u32).to_le_bytes());

        let parsed = parse_vox_bytes(&bytes).unwrap();
        assert_eq!(parsed.voxels, model.voxels);
    }
}
