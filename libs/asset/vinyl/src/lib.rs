// This file is part of RetroGfx.
//
// RetroGfx is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// RetroGfx is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with RetroGfx.  If not, see <http://www.gnu.org/licenses/>.

// Vinyl Goddess From Mars. Tiles are lists of 16-bit codes indexing a
// shared dictionary of 4-pixel groups stored at the end of the file;
// masked tiles interleave a per-group transparency byte. New pixel
// groups are appended to the dictionary as tiles are written, and
// flush() compacts the dictionary down to the codes still in use.

use anyhow::{bail, ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{
    supp, Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem,
    with_extension,
};
use log::warn;
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, Mask, PixelBuffer, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatHooks, FatIo, FatRef, Tileset,
    TilesetCaps, TilesetFormat,
};

const TILE: Point = Point::new(16, 16);
const TILE_PIXELS: usize = 16 * 16;
/// Stored size of a solid tile: 64 two-byte codes.
const TILE_SOLID: usize = 0x80;
/// Stored size of a masked tile: 64 three-byte mask+code groups.
const TILE_MASKED: usize = 0xC0;
const FAT_ENTRY_LEN: usize = 2;
const SAFETY_MAX_TILES: usize = 4096;
const TILE_TYPE: &str = "tile/vinyl";

type Dict = Rc<RefCell<Vec<u8>>>;
type Flag = Rc<RefCell<bool>>;

struct VinylHooks {
    dict_changed: Flag,
}

impl FatHooks for VinylHooks {
    fn pre_insert(&mut self, _io: &mut FatIo, entry: &mut FatEntry) -> Result<()> {
        entry.header_size = FAT_ENTRY_LEN;
        Ok(())
    }

    fn update_size(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        let entry = &io.entries[index];
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, entry.stored_size as u16);
        io.stream.write_at(entry.offset, &buf)
    }

    fn post_insert(&mut self, io: &mut FatIo, _index: usize) -> Result<()> {
        self.dict_changed.replace(true);
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, io.entries.len() as u16);
        io.stream.write_at(0, &buf)
    }

    fn post_remove(&mut self, io: &mut FatIo, _removed: &FatEntry) -> Result<()> {
        self.dict_changed.replace(true);
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, io.entries.len() as u16);
        io.stream.write_at(0, &buf)
    }
}

/// One tile; decoding and encoding go through the shared dictionary.
struct VinylTileImage {
    entry: StreamRef,
    dict: Dict,
    dict_changed: Flag,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl VinylTileImage {
    fn decode(&self) -> Result<PixelBuffer> {
        let data = self.entry.borrow().read_all()?;
        let dict = self.dict.borrow();
        let max_code = dict.len() / 4;
        let mut out = PixelBuffer::new(TILE);
        let group_len = match data.len() {
            TILE_SOLID => 2,
            TILE_MASKED => 3,
            n => bail!(GfxError::InvalidFormat(format!(
                "tile of unsupported size {n}"
            ))),
        };
        for (g, group) in data.chunks_exact(group_len).enumerate() {
            let code_bytes = &group[group_len - 2..];
            let mut code = LittleEndian::read_u16(code_bytes) as usize;
            if code >= max_code {
                warn!("tile references dictionary code {code} of {max_code}; using 0");
                code = 0;
            }
            let px = &dict[code * 4..code * 4 + 4];
            out.pixels[g * 4..g * 4 + 4].copy_from_slice(px);
            if group_len == 3 {
                let mask_byte = group[0];
                for b in 0..4 {
                    // A set bit is opaque.
                    if (mask_byte >> b) & 1 == 0 {
                        out.mask[g * 4 + b] = Mask::TRANSPARENT.bits();
                    }
                }
            }
        }
        Ok(out)
    }

    fn encode(&mut self, buf: &PixelBuffer) -> Result<()> {
        let has_mask = buf
            .mask
            .iter()
            .any(|&m| m & Mask::TRANSPARENT.bits() != 0);
        let stored = if has_mask { TILE_MASKED } else { TILE_SOLID };
        self.entry.borrow_mut().truncate(stored)?;

        let mut dict = self.dict.borrow_mut();
        let mut data = Vec::with_capacity(stored);
        for g in 0..TILE_PIXELS / 4 {
            if has_mask {
                let mut mask_byte = 0u8;
                for b in 0..4 {
                    if buf.mask[g * 4 + b] & Mask::TRANSPARENT.bits() == 0 {
                        mask_byte |= 1 << b;
                    }
                }
                data.push(mask_byte);
            }
            let group = &buf.pixels[g * 4..g * 4 + 4];
            let code = match dict.chunks_exact(4).position(|c| c == group) {
                Some(c) => c,
                None => {
                    // New pixel group; flush() drops it again if it
                    // ends up unused.
                    dict.extend_from_slice(group);
                    self.dict_changed.replace(true);
                    dict.len() / 4 - 1
                }
            };
            let mut code_bytes = [0u8; 2];
            LittleEndian::write_u16(&mut code_bytes, code as u16);
            data.extend_from_slice(&code_bytes);
        }
        self.entry.borrow_mut().write_at(0, &data)?;
        Ok(())
    }
}

impl Image for VinylTileImage {
    fn caps(&self) -> ImageCaps {
        if self.pal.is_some() {
            ImageCaps::HAS_PALETTE
        } else {
            ImageCaps::empty()
        }
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        TILE
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = self.decode()?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            buf.dims == TILE,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, tiles are 16x16",
                buf.dims.x, buf.dims.y
            ))
        );
        self.encode(buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct VinylTileset {
    core: FatRef,
    dict: Dict,
    dict_changed: Flag,
    pal: Option<Palette>,
}

impl VinylTileset {
    fn open(stream: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let data = stream.borrow().read_all()?;
        ensure!(
            data.len() >= 2,
            GfxError::InvalidFormat("file too short".into())
        );
        let count = LittleEndian::read_u16(&data) as usize;
        ensure!(
            count <= SAFETY_MAX_TILES,
            GfxError::InvalidFormat(format!("too many tiles ({count})"))
        );
        let dict_changed: Flag = Rc::new(RefCell::new(false));
        let mut core = FatCore::new(
            stream,
            EntrySizing::Variable,
            2,
            Box::new(VinylHooks {
                dict_changed: dict_changed.clone(),
            }),
        );
        let mut offset = 2usize;
        for _ in 0..count {
            ensure!(
                offset + FAT_ENTRY_LEN <= data.len(),
                GfxError::InvalidFormat("tile list truncated".into())
            );
            let size = LittleEndian::read_u16(&data[offset..]) as usize;
            ensure!(
                offset + FAT_ENTRY_LEN + size <= data.len(),
                GfxError::InvalidFormat("tile data truncated".into())
            );
            core.push_entry(offset, size, FAT_ENTRY_LEN, EntryAttrs::empty(), TILE_TYPE);
            offset += FAT_ENTRY_LEN + size;
        }
        ensure!(
            offset + 2 <= data.len(),
            GfxError::InvalidFormat("missing pixel dictionary".into())
        );
        let dict_len = LittleEndian::read_u16(&data[offset..]) as usize;
        ensure!(
            offset + 2 + dict_len <= data.len(),
            GfxError::InvalidFormat("pixel dictionary truncated".into())
        );
        let dict = data[offset + 2..offset + 2 + dict_len].to_vec();
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            dict: Rc::new(RefCell::new(dict)),
            dict_changed,
            pal,
        })
    }

    fn end_of_tiles(&self) -> usize {
        self.core
            .borrow()
            .entries()
            .last()
            .map(|e| e.end())
            .unwrap_or(2)
    }

    /// Rewrite tile codes so no dictionary group is unused, then store
    /// the shrunken dictionary after the tile data.
    fn compact(&mut self) -> Result<()> {
        let entries = self.core.borrow().files_snapshot();
        let stream = self.core.borrow().stream();

        let num_codes = self.dict.borrow().len() / 4;
        let mut used = vec![false; num_codes];
        let mut tiles = Vec::with_capacity(entries.len());
        for e in &entries {
            let data = stream
                .borrow()
                .read_vec(e.offset + e.header_size, e.stored_size)?;
            let group_len = match e.stored_size {
                TILE_SOLID => 2,
                TILE_MASKED => 3,
                n => bail!(GfxError::InvalidFormat(format!(
                    "tile of unsupported size {n}"
                ))),
            };
            for group in data.chunks_exact(group_len) {
                let code = LittleEndian::read_u16(&group[group_len - 2..]) as usize;
                if code < num_codes {
                    used[code] = true;
                } else {
                    warn!("tile references dictionary code {code} of {num_codes}");
                }
            }
            tiles.push((e.clone(), data, group_len));
        }

        if used.iter().any(|u| !u) {
            // Remap every code downwards past the unused ones.
            let mut remap = vec![0u16; num_codes];
            let mut next = 0u16;
            for (code, &u) in used.iter().enumerate() {
                remap[code] = next;
                if u {
                    next += 1;
                }
            }
            for (e, data, group_len) in tiles.iter_mut() {
                let mut changed = false;
                for group in data.chunks_exact_mut(*group_len) {
                    let at = *group_len - 2;
                    let code = LittleEndian::read_u16(&group[at..]) as usize;
                    if code < num_codes && remap[code] != code as u16 {
                        LittleEndian::write_u16(&mut group[at..], remap[code]);
                        changed = true;
                    }
                }
                if changed {
                    stream
                        .borrow_mut()
                        .write_at(e.offset + e.header_size, data)?;
                }
            }
            let mut dict = self.dict.borrow_mut();
            let old = std::mem::take(&mut *dict);
            for (code, chunk) in old.chunks_exact(4).enumerate() {
                if used[code] {
                    dict.extend_from_slice(chunk);
                }
            }
        }

        // Fit the stream to tiles + dictionary exactly.
        let end = self.end_of_tiles();
        let dict = self.dict.borrow();
        let target = end + 2 + dict.len();
        {
            let mut s = stream.borrow_mut();
            s.truncate(target)?;
            let mut len_bytes = [0u8; 2];
            LittleEndian::write_u16(&mut len_bytes, dict.len() as u16);
            s.write_at(end, &len_bytes)?;
            s.write_at(end + 2, &dict)?;
        }
        self.dict_changed.replace(false);
        Ok(())
    }
}

impl Tileset for VinylTileset {
    fn caps(&self) -> TilesetCaps {
        let mut caps = TilesetCaps::HAS_DIMENSIONS;
        if self.pal.is_some() {
            caps |= TilesetCaps::HAS_PALETTE;
        }
        caps
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn tile_dimensions(&self) -> Point {
        TILE
    }

    fn layout_width(&self) -> u32 {
        16
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(Box::new(VinylTileImage {
            entry,
            dict: self.dict.clone(),
            dict_changed: self.dict_changed.clone(),
            pal: self.pal.clone(),
            cache: RefCell::new(None),
        }))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        // A fresh solid tile of code zero; the codes become meaningful
        // once pixels are written.
        let entry = self
            .core
            .borrow_mut()
            .insert(before, TILE_SOLID, TILE_TYPE, attrs)?;
        if self.dict.borrow().is_empty() {
            self.dict.borrow_mut().extend_from_slice(&[0, 0, 0, 0]);
            self.dict_changed.replace(true);
        }
        Ok(entry)
    }

    fn remove(&mut self, index: usize) -> Result<()> {
        self.core.borrow_mut().remove(index)
    }

    fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()> {
        ensure!(
            new_stored == TILE_SOLID || new_stored == TILE_MASKED,
            GfxError::InvariantViolation(format!(
                "tiles are {TILE_SOLID} or {TILE_MASKED} bytes, not {new_stored}"
            ))
        );
        self.core.borrow_mut().resize(index, new_stored, new_real)
    }

    fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()> {
        self.core.borrow_mut().move_entry(from, before)
    }

    fn flush(&mut self) -> Result<()> {
        if *self.dict_changed.borrow() {
            self.compact()?;
        }
        self.core.borrow_mut().flush()
    }
}

pub struct VinylTilesetFormat;

impl TilesetFormat for VinylTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-vinyl"
    }

    fn friendly_name(&self) -> &'static str {
        "Vinyl Goddess From Mars tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["tls"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Vinyl Goddess From Mars"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.len() < 4 {
            return Ok(Certainty::DefinitelyNo);
        }
        let count = LittleEndian::read_u16(&data) as usize;
        if count > SAFETY_MAX_TILES {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut offset = 2usize;
        for _ in 0..count {
            if offset + FAT_ENTRY_LEN > data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
            let size = LittleEndian::read_u16(&data[offset..]) as usize;
            offset += FAT_ENTRY_LEN + size;
            if offset >= data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::PossiblyYes)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = match supp(supps, SuppItem::Palette) {
            Some(s) => {
                let data = s.borrow().read_all()?;
                Some(Palette::from_bytes(&data, PaletteDepth::Eight)?)
            }
            None => None,
        };
        Ok(Box::new(VinylTileset::open(stream, pal)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(4)?;
            s.write_at(0, &[0, 0, 0, 0])?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, with_extension(filename, "pal"));
        supps
    }
}

/// Vinyl SCR fullscreen image: mode-X planar with an 8-bit palette.
pub struct VinylScrFormat;

impl ImageFormat for VinylScrFormat {
    fn code(&self) -> &'static str {
        "img-scr-vinyl"
    }

    fn friendly_name(&self) -> &'static str {
        "Vinyl Goddess From Mars SCR image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["scr"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Vinyl Goddess From Mars"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 64000 {
            Certainty::Unsure
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = match supp(supps, SuppItem::Palette) {
            Some(s) => {
                let data = s.borrow().read_all()?;
                Some(Palette::from_bytes(&data, PaletteDepth::Eight)?)
            }
            None => None,
        };
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            Point::new(320, 200),
            Codec::ModeX,
            ColourDepth::Vga,
            pal,
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(64000)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, with_extension(filename, "pal"));
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    /// Two solid tiles sharing a two-group dictionary.
    fn sample_tileset() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&2u16.to_le_bytes());
        for code in [0u16, 1] {
            out.extend_from_slice(&(TILE_SOLID as u16).to_le_bytes());
            for _ in 0..64 {
                out.extend_from_slice(&code.to_le_bytes());
            }
        }
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        out
    }

    #[test]
    fn tiles_decode_through_the_dictionary() -> Result<()> {
        let ts = VinylTilesetFormat.open(MemStream::wrap(sample_tileset()), &SuppData::new())?;
        let a = ts.open_image(0)?.to_pixels()?;
        assert!(a.pixels.chunks(4).all(|c| c == [1, 2, 3, 4]));
        let b = ts.open_image(1)?.to_pixels()?;
        assert!(b.pixels.chunks(4).all(|c| c == [5, 6, 7, 8]));
        assert!(a.mask.iter().all(|&m| m == 0));
        Ok(())
    }

    #[test]
    fn masked_tiles_round_trip_their_transparency() -> Result<()> {
        let stream = MemStream::wrap(sample_tileset());
        let ts = VinylTilesetFormat.open(stream, &SuppData::new())?;
        let mut img = ts.open_image(0)?;
        let mut buf = PixelBuffer::new(TILE);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = (i % 7) as u8;
        }
        buf.mask[0] = Mask::TRANSPARENT.bits();
        buf.mask[255] = Mask::TRANSPARENT.bits();
        img.from_pixels(&buf)?;

        let back = img.to_pixels()?;
        assert_eq!(back.pixels, buf.pixels);
        assert_eq!(back.mask, buf.mask);
        Ok(())
    }

    #[test]
    fn flush_compacts_unused_dictionary_groups() -> Result<()> {
        let stream = MemStream::wrap(sample_tileset());
        let mut ts = VinylTilesetFormat.open(stream.clone(), &SuppData::new())?;
        // Removing tile 1 leaves dictionary group 1 unused.
        ts.remove(1)?;
        ts.flush()?;

        let raw = stream.borrow().read_all()?;
        // count, one tile record, dictionary of one group.
        assert_eq!(LittleEndian::read_u16(&raw), 1);
        let dict_at = 2 + 2 + TILE_SOLID;
        assert_eq!(LittleEndian::read_u16(&raw[dict_at..]), 4);
        assert_eq!(&raw[dict_at + 2..], &[1, 2, 3, 4]);
        assert_eq!(raw.len(), dict_at + 2 + 4);

        // The surviving tile still decodes to the same pixels.
        let ts = VinylTilesetFormat.open(stream, &SuppData::new())?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert!(buf.pixels.chunks(4).all(|c| c == [1, 2, 3, 4]));
        Ok(())
    }

    #[test]
    fn compaction_remaps_codes_in_surviving_tiles() -> Result<()> {
        let stream = MemStream::wrap(sample_tileset());
        let mut ts = VinylTilesetFormat.open(stream.clone(), &SuppData::new())?;
        // Drop tile 0 (code 0); tile 1's code 1 must remap to 0.
        ts.remove(0)?;
        ts.flush()?;

        let ts = VinylTilesetFormat.open(stream.clone(), &SuppData::new())?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert!(buf.pixels.chunks(4).all(|c| c == [5, 6, 7, 8]));
        let raw = stream.borrow().read_all()?;
        // First code of the tile is now zero.
        assert_eq!(LittleEndian::read_u16(&raw[4..]), 0);
        Ok(())
    }

    #[test]
    fn probe_walks_the_tile_list() -> Result<()> {
        assert_eq!(
            VinylTilesetFormat.probe(&MemStream::from(sample_tileset()))?,
            Certainty::PossiblyYes
        );
        let mut truncated = sample_tileset();
        truncated.truncate(40);
        assert_eq!(
            VinylTilesetFormat.probe(&MemStream::from(truncated))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }
}
