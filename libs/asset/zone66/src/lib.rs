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

// Zone 66: run-length tiles with skip-to-EOL codes, the tileset whose
// FAT stores offsets relative to the end of its own table, and the raw
// 32x32 map tiles.

use anyhow::{bail, ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{
    supp, Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem,
};
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatHooks, FatIo, FatRef, NoHooks,
    Tileset, TilesetCaps, TilesetFormat,
};

/// Tiles larger than this are considered corrupt.
const MAX_DIMS: i32 = 2048;

/// Palette index the game treats as transparent.
const TRANSPARENT_INDEX: usize = 0;

fn load_palette(supps: &SuppData) -> Result<Option<Palette>> {
    Ok(match supp(supps, SuppItem::Palette) {
        Some(s) => {
            let data = s.borrow().read_all()?;
            let mut pal = Palette::from_bytes(&data, PaletteDepth::Six)?;
            if pal.len() > TRANSPARENT_INDEX {
                pal.set_transparent(TRANSPARENT_INDEX);
            }
            Some(pal)
        }
        None => None,
    })
}

//
// img-zone66-tile
//

/// One RLE tile: a 4-byte dimension header, then literal runs, 0xFD
/// pixel skips, 0xFE end-of-line codes and a 0xFF terminator.
pub struct Zone66TileImage {
    stream: StreamRef,
    dims: Point,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl Zone66TileImage {
    pub fn open(stream: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let mut header = [0u8; 4];
        stream.borrow().read_at_most(0, &mut header)?;
        let dims = Point::new(
            LittleEndian::read_u16(&header[0..]) as i32,
            LittleEndian::read_u16(&header[2..]) as i32,
        );
        Ok(Self {
            stream,
            dims,
            pal,
            cache: RefCell::new(None),
        })
    }

    fn decode(&self) -> Result<PixelBuffer> {
        let dims = self.dims;
        ensure!(
            dims.x > 0 && dims.y > 0,
            GfxError::InvalidFormat("tile has no dimensions yet".into())
        );
        let data = self.stream.borrow().read_all()?;
        let mut out = PixelBuffer::new(dims);
        let total = dims.area();
        let mut pos = 4usize;
        let mut i = 0usize;
        let mut y = 0i32;
        while i < total {
            ensure!(
                pos < data.len(),
                GfxError::IncompleteRead {
                    expected: pos + 1,
                    actual: data.len()
                }
            );
            let code = data[pos];
            pos += 1;
            match code {
                0xFD => {
                    ensure!(
                        pos < data.len(),
                        GfxError::IncompleteRead {
                            expected: pos + 1,
                            actual: data.len()
                        }
                    );
                    i += data[pos] as usize;
                    pos += 1;
                }
                0xFE => {
                    y += 1;
                    i = (y * dims.x) as usize;
                }
                0xFF => break,
                0x00 => bail!(GfxError::InvalidFormat("corrupted tile data".into())),
                n => {
                    let n = n as usize;
                    ensure!(
                        i + n <= total,
                        GfxError::InvalidFormat(
                            "tile data runs past the end of the image".into()
                        )
                    );
                    ensure!(
                        pos + n <= data.len(),
                        GfxError::IncompleteRead {
                            expected: pos + n,
                            actual: data.len()
                        }
                    );
                    out.pixels[i..i + n].copy_from_slice(&data[pos..pos + n]);
                    i += n;
                    pos += n;
                }
            }
        }
        Ok(out)
    }

    fn encode(&self, buf: &PixelBuffer) -> Result<()> {
        let dims = self.dims;
        let img = &buf.pixels;
        let total = dims.area();

        let mut out = Vec::with_capacity(4 + total + dims.y as usize + 1);
        out.extend_from_slice(&(dims.x as u16).to_le_bytes());
        out.extend_from_slice(&(dims.y as u16).to_le_bytes());

        // Everything past the last non-black pixel is left to the
        // terminator, with no skip codes for trailing blank lines.
        let mut img_end = total;
        while img_end > 1 && img[img_end - 1] == 0 {
            img_end -= 1;
        }

        let mut pos = 0usize;
        'rows: for _y in 0..dims.y {
            let mut dw = dims.x as usize;
            while dw > 0 {
                // Leading blanks on this stretch.
                let mut amt = 0usize;
                while dw > 0 && amt < 254 && img[pos] == 0 {
                    pos += 1;
                    amt += 1;
                    dw -= 1;
                }
                if amt > 0 {
                    if dw == 0 {
                        // Blank to end of line; the EOL code covers it.
                        break;
                    }
                    if amt > 1 {
                        out.push(0xFD);
                        out.push(amt as u8);
                    } else {
                        // A single blank costs less inside a literal.
                        pos -= amt;
                        dw += amt;
                    }
                }
                if dw == 0 {
                    break;
                }
                // Literal run, cut short where three or more blanks
                // start.
                let mut amt = dw.min(255);
                let mut l = 1;
                while l < amt {
                    if img[pos + l] == 0 {
                        let mut blank = 1;
                        let mut ll = l + 1;
                        while ll < amt && img[pos + ll] == 0 {
                            blank += 1;
                            ll += 1;
                        }
                        if blank > 2 {
                            amt = l;
                            break;
                        }
                    }
                    l += 1;
                }
                out.push(amt as u8);
                out.extend_from_slice(&img[pos..pos + amt]);
                pos += amt;
                dw -= amt;
            }
            if pos >= img_end {
                break 'rows;
            }
            out.push(0xFE);
        }
        out.push(0xFF);

        let mut s = self.stream.borrow_mut();
        s.truncate(out.len())?;
        s.write_at(0, &out)?;
        Ok(())
    }
}

impl Image for Zone66TileImage {
    fn caps(&self) -> ImageCaps {
        let mut caps = ImageCaps::SET_DIMENSIONS;
        if self.pal.is_some() {
            caps |= ImageCaps::HAS_PALETTE;
        }
        caps
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        self.dims
    }

    fn set_dimensions(&mut self, dims: Point) -> Result<()> {
        ensure!(
            dims.x > 0 && dims.y > 0 && dims.x <= MAX_DIMS && dims.y <= MAX_DIMS,
            GfxError::InvariantViolation(format!("cannot resize tile to {}x{}", dims.x, dims.y))
        );
        self.dims = dims;
        self.cache.replace(None);
        let mut s = self.stream.borrow_mut();
        if s.len() < 4 {
            s.truncate(4)?;
        }
        let mut header = [0u8; 4];
        LittleEndian::write_u16(&mut header[0..], dims.x as u16);
        LittleEndian::write_u16(&mut header[2..], dims.y as u16);
        s.write_at(0, &header)
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
            buf.dims == self.dims,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, tile is {}x{}",
                buf.dims.x, buf.dims.y, self.dims.x, self.dims.y
            ))
        );
        self.encode(buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct Zone66TileImageFormat;

impl ImageFormat for Zone66TileImageFormat {
    fn code(&self) -> &'static str {
        "img-zone66-tile"
    }

    fn friendly_name(&self) -> &'static str {
        "Zone 66 tile"
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Zone 66"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.len() < 4 {
            return Ok(Certainty::DefinitelyNo);
        }
        let w = LittleEndian::read_u16(&data[0..]) as i32;
        let h = LittleEndian::read_u16(&data[2..]) as i32;
        if w > MAX_DIMS || h > MAX_DIMS {
            return Ok(Certainty::DefinitelyNo);
        }
        let total = (w as usize) * (h as usize);
        let mut i = 0usize;
        let mut y = 0usize;
        let mut pos = 4usize;
        while pos < data.len() && i <= total {
            let code = data[pos];
            pos += 1;
            match code {
                0x00 => return Ok(Certainty::DefinitelyNo),
                0xFF => {
                    return Ok(if pos == data.len() {
                        Certainty::DefinitelyYes
                    } else {
                        Certainty::DefinitelyNo
                    });
                }
                0xFE => {
                    y += 1;
                    i = y * w as usize;
                }
                0xFD => {
                    if pos >= data.len() {
                        return Ok(Certainty::DefinitelyNo);
                    }
                    i += data[pos] as usize;
                    pos += 1;
                }
                n => {
                    i += n as usize;
                    pos += n as usize;
                    if pos > data.len() {
                        return Ok(Certainty::DefinitelyNo);
                    }
                }
            }
        }
        Ok(if pos == data.len() && i == total {
            Certainty::DefinitelyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(Zone66TileImage::open(stream, load_palette(supps)?)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(5)?;
            s.write_at(0, &[0, 0, 0, 0, 0xFF])?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "tpal.z66".to_string());
        supps
    }
}

//
// tls-zone66
//

const Z66_FAT_OFFSET: usize = 4;
const Z66_FAT_ENTRY_LEN: usize = 4;
const Z66_SAFETY_MAX_TILES: usize = 4096;
const Z66_TILE_TYPE: &str = "tile/zone66";
const Z66_FS_TYPE: &str = "image/vga-raw-fullscreen";

/// Smallest valid tile: an empty header plus the end-of-image code.
const Z66_EMPTY_TILE: [u8; 5] = [0, 0, 0, 0, 0xFF];

fn z66_fat_size(count: usize) -> usize {
    Z66_FAT_OFFSET + count * Z66_FAT_ENTRY_LEN
}

struct Zone66Hooks;

impl FatHooks for Zone66Hooks {
    fn pre_insert(&mut self, io: &mut FatIo, entry: &mut FatEntry) -> Result<()> {
        // Grow the offset table by one slot at this entry's position.
        let slot = Z66_FAT_OFFSET + entry.index * Z66_FAT_ENTRY_LEN;
        io.stream.insert(slot, Z66_FAT_ENTRY_LEN)?;
        io.shift_from(slot, Z66_FAT_ENTRY_LEN as isize);
        entry.offset += Z66_FAT_ENTRY_LEN;
        Ok(())
    }

    fn post_insert(&mut self, io: &mut FatIo, _index: usize) -> Result<()> {
        let mut count = [0u8; 4];
        LittleEndian::write_u32(&mut count, io.entries.len() as u32);
        io.stream.write_at(0, &count)
    }

    fn post_remove(&mut self, io: &mut FatIo, _removed: &FatEntry) -> Result<()> {
        // Drop the trailing table slot; the slots from the removed
        // index on are rewritten afterwards.
        io.stream
            .remove(z66_fat_size(io.entries.len()), Z66_FAT_ENTRY_LEN)?;
        io.shift_from(0, -(Z66_FAT_ENTRY_LEN as isize));
        let mut count = [0u8; 4];
        LittleEndian::write_u32(&mut count, io.entries.len() as u32);
        io.stream.write_at(0, &count)
    }

    fn update_offset(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        // Offsets are stored relative to the end of the table.
        let fat_size = z66_fat_size(io.entries.len());
        let entry = &io.entries[index];
        let mut rel = [0u8; 4];
        LittleEndian::write_u32(&mut rel, (entry.offset - fat_size) as u32);
        io.stream
            .write_at(Z66_FAT_OFFSET + index * Z66_FAT_ENTRY_LEN, &rel)
    }
}

struct Zone66Tileset {
    core: FatRef,
    pal: Option<Palette>,
}

impl Zone66Tileset {
    fn open(stream: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let data = stream.borrow().read_all()?;
        ensure!(
            data.len() >= Z66_FAT_OFFSET,
            GfxError::InvalidFormat("file too short".into())
        );
        let count = LittleEndian::read_u32(&data) as usize;
        ensure!(
            count <= Z66_SAFETY_MAX_TILES,
            GfxError::InvalidFormat(format!("too many tiles ({count})"))
        );
        let fat_size = z66_fat_size(count);
        ensure!(
            data.len() >= fat_size,
            GfxError::InvalidFormat("offset table truncated".into())
        );

        let mut core = FatCore::new(
            stream,
            EntrySizing::Variable,
            Z66_FAT_OFFSET,
            Box::new(Zone66Hooks),
        );
        let mut offsets = Vec::with_capacity(count + 1);
        for i in 0..count {
            let rel = LittleEndian::read_u32(&data[Z66_FAT_OFFSET + i * Z66_FAT_ENTRY_LEN..]);
            offsets.push(fat_size + rel as usize);
        }
        offsets.push(data.len());
        for w in offsets.windows(2) {
            ensure!(
                w[1] >= w[0],
                GfxError::InvalidFormat("offset table is not monotonic".into())
            );
            let size = w[1] - w[0];
            core.push_entry(
                w[0],
                size,
                0,
                EntryAttrs::empty(),
                if size == 64000 { Z66_FS_TYPE } else { Z66_TILE_TYPE },
            );
        }
        core.validate()?;
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            pal,
        })
    }
}

impl Tileset for Zone66Tileset {
    fn caps(&self) -> TilesetCaps {
        if self.pal.is_some() {
            TilesetCaps::HAS_PALETTE
        } else {
            TilesetCaps::empty()
        }
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
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
        let stored = self.core.borrow().entry(index)?.stored_size;
        let entry = EntryStream::open(&self.core, index)?;
        if stored == 64000 {
            // Fullscreen tiles are raw VGA dumps.
            Ok(Box::new(CodecImage::new(
                entry,
                0,
                Point::new(320, 200),
                Codec::Linear8,
                ColourDepth::Vga,
                self.pal.clone(),
            )))
        } else {
            Ok(Box::new(Zone66TileImage::open(entry, self.pal.clone())?))
        }
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        let entry = self
            .core
            .borrow_mut()
            .insert(before, Z66_EMPTY_TILE.len(), Z66_TILE_TYPE, attrs)?;
        self.core
            .borrow()
            .stream()
            .borrow_mut()
            .write_at(entry.offset, &Z66_EMPTY_TILE)?;
        Ok(entry)
    }

    fn remove(&mut self, index: usize) -> Result<()> {
        self.core.borrow_mut().remove(index)
    }

    fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()> {
        self.core.borrow_mut().resize(index, new_stored, new_real)
    }

    fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()> {
        self.core.borrow_mut().move_entry(from, before)
    }

    fn flush(&mut self) -> Result<()> {
        self.core.borrow_mut().flush()
    }
}

pub struct Zone66TilesetFormat;

impl TilesetFormat for Zone66TilesetFormat {
    fn code(&self) -> &'static str {
        "tls-zone66"
    }

    fn friendly_name(&self) -> &'static str {
        "Zone 66 tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["z66"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Zone 66"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.len() < Z66_FAT_OFFSET {
            return Ok(Certainty::DefinitelyNo);
        }
        let count = LittleEndian::read_u32(&data) as usize;
        if count == 0 && data.len() > 8 {
            return Ok(Certainty::DefinitelyNo);
        }
        if z66_fat_size(count) > data.len() {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut last = 0u32;
        for i in 0..count {
            let offset = LittleEndian::read_u32(&data[Z66_FAT_OFFSET + i * Z66_FAT_ENTRY_LEN..]);
            if i == 0 && offset != 0 {
                return Ok(Certainty::DefinitelyNo);
            }
            if offset < last {
                return Ok(Certainty::DefinitelyNo);
            }
            if z66_fat_size(count) + offset as usize > data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
            last = offset;
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = match supp(supps, SuppItem::Palette) {
            Some(s) => {
                let data = s.borrow().read_all()?;
                let mut pal = Palette::from_bytes(&data, PaletteDepth::Six)?;
                if pal.len() > TRANSPARENT_INDEX {
                    pal.set_transparent(TRANSPARENT_INDEX);
                }
                Some(pal)
            }
            None => None,
        };
        Ok(Box::new(Zone66Tileset::open(stream, pal)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(4)?;
            s.write_at(0, &[0, 0, 0, 0])?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "mpal.z66".to_string());
        supps
    }
}

//
// tls-zone66-map
//

const MAP_TILE: Point = Point::new(32, 32);
const MAP_TILE_LEN: usize = 32 * 32;

struct Zone66MapTileset {
    core: FatRef,
    pal: Option<Palette>,
}

impl Tileset for Zone66MapTileset {
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
        MAP_TILE
    }

    fn layout_width(&self) -> u32 {
        18
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(Box::new(CodecImage::new(
            entry,
            0,
            MAP_TILE,
            Codec::Linear8,
            ColourDepth::Vga,
            self.pal.clone(),
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        self.core
            .borrow_mut()
            .insert(before, MAP_TILE_LEN, "tile/zone66-map", attrs)
    }

    fn remove(&mut self, index: usize) -> Result<()> {
        self.core.borrow_mut().remove(index)
    }

    fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()> {
        self.core.borrow_mut().resize(index, new_stored, new_real)
    }

    fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()> {
        self.core.borrow_mut().move_entry(from, before)
    }

    fn flush(&mut self) -> Result<()> {
        self.core.borrow_mut().flush()
    }
}

pub struct Zone66MapTilesetFormat;

impl TilesetFormat for Zone66MapTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-zone66-map"
    }

    fn friendly_name(&self) -> &'static str {
        "Zone 66 Map Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["z66"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Zone 66"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() % MAP_TILE_LEN == 0 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = load_palette(supps)?;
        let count = stream.borrow().len() / MAP_TILE_LEN;
        let mut core = FatCore::new(
            stream,
            EntrySizing::Fixed(MAP_TILE_LEN),
            0,
            Box::new(NoHooks),
        );
        for i in 0..count {
            core.push_entry(
                i * MAP_TILE_LEN,
                MAP_TILE_LEN,
                0,
                EntryAttrs::empty(),
                "tile/zone66-map",
            );
        }
        Ok(Box::new(Zone66MapTileset {
            core: Rc::new(RefCell::new(core)),
            pal,
        }))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "mpal.z66".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    /// An 8x8 tile: white top row, blank interior, a bottom row ending
    /// in 0x0E.
    fn sample_tile() -> Vec<u8> {
        let mut data = vec![8, 0, 8, 0];
        data.push(8);
        data.extend([0x0F; 8]);
        data.extend([0xFE; 7]);
        data.push(8);
        data.extend([0x0C, 0x09, 0x09, 0x09, 0x09, 0x09, 0x09, 0x0E]);
        data.push(0xFF);
        data
    }

    #[test]
    fn tile_decodes_rows_and_skips() -> Result<()> {
        let img = Zone66TileImage::open(MemStream::wrap(sample_tile()), None)?;
        assert_eq!(img.dimensions(), Point::new(8, 8));
        let buf = img.to_pixels()?;
        assert!(buf.pixels[..8].iter().all(|&p| p == 0x0F));
        assert!(buf.pixels[8..56].iter().all(|&p| p == 0x00));
        assert_eq!(buf.pixels[56], 0x0C);
        assert_eq!(buf.pixels[63], 0x0E);
        Ok(())
    }

    #[test]
    fn tile_encoder_reproduces_the_reference_layout() -> Result<()> {
        let reference = sample_tile();
        let img = Zone66TileImage::open(MemStream::wrap(reference.clone()), None)?;
        let buf = img.to_pixels()?;
        let stream = MemStream::wrap(vec![8, 0, 8, 0, 0xFF]);
        let mut fresh = Zone66TileImage::open(stream.clone(), None)?;
        fresh.from_pixels(&buf)?;
        assert_eq!(stream.borrow().read_all()?, reference);
        Ok(())
    }

    #[test]
    fn tile_probe_validates_the_command_stream() -> Result<()> {
        assert_eq!(
            Zone66TileImageFormat.probe(&MemStream::from(sample_tile()))?,
            Certainty::DefinitelyYes
        );
        // Trailing data after the terminator.
        let mut bad = sample_tile();
        bad.push(0x00);
        assert_eq!(
            Zone66TileImageFormat.probe(&MemStream::from(bad))?,
            Certainty::DefinitelyNo
        );
        // An embedded 0x00 command is invalid.
        let mut bad = sample_tile();
        bad[4] = 0x00;
        assert_eq!(
            Zone66TileImageFormat.probe(&MemStream::from(bad))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    fn build_tileset(tiles: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(tiles.len() as u32).to_le_bytes());
        let mut rel = 0u32;
        for t in tiles {
            out.extend_from_slice(&rel.to_le_bytes());
            rel += t.len() as u32;
        }
        for t in tiles {
            out.extend_from_slice(t);
        }
        out
    }

    #[test]
    fn tileset_entries_follow_the_offset_table() -> Result<()> {
        let raw = build_tileset(&[sample_tile(), sample_tile()]);
        let ts = Zone66TilesetFormat.open(MemStream::wrap(raw.clone()), &SuppData::new())?;
        let files = ts.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].offset, 12);
        assert_eq!(files[1].offset, 12 + sample_tile().len());
        let buf = ts.open_image(1)?.to_pixels()?;
        assert_eq!(buf.pixels[0], 0x0F);
        Ok(())
    }

    #[test]
    fn tileset_insert_remove_is_byte_exact() -> Result<()> {
        let raw = build_tileset(&[sample_tile(), sample_tile()]);
        let stream = MemStream::wrap(raw.clone());
        let mut ts = Zone66TilesetFormat.open(stream.clone(), &SuppData::new())?;
        ts.insert(Some(1), EntryAttrs::empty())?;
        assert_eq!(ts.files().len(), 3);
        ts.remove(1)?;
        ts.flush()?;
        assert_eq!(stream.borrow().read_all()?, raw);
        Ok(())
    }

    #[test]
    fn tileset_insert_writes_table_count_and_default_tile() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut ts = Zone66TilesetFormat.create(stream.clone(), &SuppData::new())?;
        ts.insert(None, EntryAttrs::empty())?;
        ts.flush()?;
        let raw = stream.borrow().read_all()?;
        assert_eq!(LittleEndian::read_u32(&raw), 1);
        assert_eq!(LittleEndian::read_u32(&raw[4..]), 0);
        assert_eq!(&raw[8..], &Z66_EMPTY_TILE);
        // Still a valid tileset.
        assert_eq!(
            Zone66TilesetFormat.probe(&MemStream::from(raw))?,
            Certainty::DefinitelyYes
        );
        Ok(())
    }

    #[test]
    fn probe_rejects_non_monotonic_tables() -> Result<()> {
        let mut raw = build_tileset(&[sample_tile(), sample_tile()]);
        // Swap the two table entries.
        let second = LittleEndian::read_u32(&raw[8..]);
        LittleEndian::write_u32(&mut raw[4..], second);
        LittleEndian::write_u32(&mut raw[8..], 0);
        assert_eq!(
            Zone66TilesetFormat.probe(&MemStream::from(raw))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }
}
