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

// God of Thunder: a stream of variable-sized mode-X tiles with no
// index. Each tile is {width/4, height, pad} then the planar pixels;
// the list is rebuilt by walking the file.

use anyhow::{ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{supp, Image, ImageCaps, SuppData, SuppFilenames, SuppItem};
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatRef, NoHooks, Tileset, TilesetCaps,
    TilesetFormat,
};

const HEADER_LEN: usize = 6;
const TILE_TYPE: &str = "tile/got";

fn load_palette(supps: &SuppData) -> Result<Option<Palette>> {
    Ok(match supp(supps, SuppItem::Palette) {
        Some(s) => {
            let data = s.borrow().read_all()?;
            let mut pal = Palette::from_bytes(&data, PaletteDepth::Eight)?;
            // Colours 0 and 15 are transparent in the game.
            if pal.len() > 0 {
                pal.set_transparent(0);
            }
            if pal.len() > 15 {
                pal.set_transparent(15);
            }
            Some(pal)
        }
        None => None,
    })
}

/// One tile: {u16 width-in-quads, u16 height, u16 unused} then mode-X
/// planar pixel data.
pub struct GotImage {
    entry: StreamRef,
    dims: Point,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl GotImage {
    pub fn open(entry: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        entry.borrow().read_at_most(0, &mut header)?;
        let dims = Point::new(
            LittleEndian::read_u16(&header[0..]) as i32 * 4,
            LittleEndian::read_u16(&header[2..]) as i32,
        );
        Ok(Self {
            entry,
            dims,
            pal,
            cache: RefCell::new(None),
        })
    }
}

impl Image for GotImage {
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
            dims.x > 0 && dims.y > 0 && dims.x % 4 == 0,
            GfxError::InvariantViolation(
                "tiles can only have a width that is a multiple of 4".into()
            )
        );
        self.dims = dims;
        self.cache.replace(None);
        let mut entry = self.entry.borrow_mut();
        entry.truncate(HEADER_LEN + dims.area())?;
        let mut header = [0u8; 4];
        LittleEndian::write_u16(&mut header[0..], (dims.x / 4) as u16);
        LittleEndian::write_u16(&mut header[2..], dims.y as u16);
        entry.write_at(0, &header)
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = vga::decode_mode_x(&*self.entry.borrow(), HEADER_LEN, self.dims)?;
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
        {
            let mut entry = self.entry.borrow_mut();
            entry.truncate(HEADER_LEN + buf.pixels.len())?;
            vga::encode_mode_x(&mut *entry, HEADER_LEN, self.dims, buf)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

struct GotTileset {
    core: FatRef,
    pal: Option<Palette>,
}

impl Tileset for GotTileset {
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
        8
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(Box::new(GotImage::open(entry, self.pal.clone())?))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        // A 0x0 tile: just the header.
        self.core
            .borrow_mut()
            .insert(before, HEADER_LEN, TILE_TYPE, attrs)
    }

    fn remove(&mut self, index: usize) -> Result<()> {
        self.core.borrow_mut().remove(index)
    }

    fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()> {
        // Check a width/height pair exists for this byte count before
        // moving any data, then record it in the tile header so the
        // walk stays consistent even if no pixels are written.
        ensure!(
            new_stored >= HEADER_LEN,
            GfxError::InvariantViolation(format!(
                "tiles need at least their {HEADER_LEN}-byte header"
            ))
        );
        let target = new_stored - HEADER_LEN;
        let mut width = 0usize;
        for w in (4..=32).rev().step_by(4) {
            if target % w == 0 {
                width = w;
                break;
            }
        }
        ensure!(
            target == 0 || width >= 4,
            GfxError::InvariantViolation(format!(
                "tiles cannot store exactly {new_stored} bytes"
            ))
        );
        self.core.borrow_mut().resize(index, new_stored, new_real)?;
        let offset = self.core.borrow().entry(index)?.offset;
        let mut header = [0u8; 4];
        if target > 0 {
            LittleEndian::write_u16(&mut header[0..], (width / 4) as u16);
            LittleEndian::write_u16(&mut header[2..], (target / width) as u16);
        }
        self.core
            .borrow()
            .stream()
            .borrow_mut()
            .write_at(offset, &header)
    }

    fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()> {
        self.core.borrow_mut().move_entry(from, before)
    }

    fn flush(&mut self) -> Result<()> {
        self.core.borrow_mut().flush()
    }
}

pub struct GotTilesetFormat;

impl TilesetFormat for GotTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-got"
    }

    fn friendly_name(&self) -> &'static str {
        "God of Thunder tileset"
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["God of Thunder"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        if len == 0 {
            return Ok(Certainty::PossiblyYes);
        }
        let mut pos = 0usize;
        while pos < len {
            if pos + HEADER_LEN > len {
                return Ok(Certainty::DefinitelyNo);
            }
            let mut header = [0u8; 4];
            stream.read_at(pos, &mut header)?;
            let width = LittleEndian::read_u16(&header[0..]) as usize * 4;
            let height = LittleEndian::read_u16(&header[2..]) as usize;
            if width > 320 || height > 200 {
                return Ok(Certainty::DefinitelyNo);
            }
            pos += HEADER_LEN + width * height;
            if pos > len {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = load_palette(supps)?;
        let data = stream.borrow().read_all()?;
        let mut core = FatCore::new(stream, EntrySizing::Variable, 0, Box::new(NoHooks));
        let mut pos = 0usize;
        while pos + HEADER_LEN <= data.len() {
            let width = LittleEndian::read_u16(&data[pos..]) as usize * 4;
            let height = LittleEndian::read_u16(&data[pos + 2..]) as usize;
            let size = HEADER_LEN + width * height;
            ensure!(
                pos + size <= data.len(),
                GfxError::InvalidFormat(format!("tile at {pos} runs past the end of the file"))
            );
            core.push_entry(pos, size, 0, EntryAttrs::empty(), TILE_TYPE);
            pos += size;
        }
        Ok(Box::new(GotTileset {
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
        supps.insert(SuppItem::Palette, "palette".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn tile(width_quads: u16, height: u16, fill: u8) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut out[0..], width_quads);
        LittleEndian::write_u16(&mut out[2..], height);
        out.extend(vec![fill; width_quads as usize * 4 * height as usize]);
        out
    }

    #[test]
    fn walking_recovers_variable_tiles() -> Result<()> {
        let mut data = tile(2, 8, 1);
        data.extend(tile(4, 16, 2));
        assert_eq!(
            GotTilesetFormat.probe(&MemStream::from(data.clone()))?,
            Certainty::DefinitelyYes
        );
        let ts = GotTilesetFormat.open(MemStream::wrap(data), &SuppData::new())?;
        let files = ts.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].stored_size, 6 + 64);
        assert_eq!(files[1].offset, 6 + 64);

        let a = ts.open_image(0)?;
        assert_eq!(a.dimensions(), Point::new(8, 8));
        let b = ts.open_image(1)?;
        assert_eq!(b.dimensions(), Point::new(16, 16));
        Ok(())
    }

    #[test]
    fn tiles_are_mode_x_planar() -> Result<()> {
        // 4x1 tile: planes hold columns 0..3 in order.
        let mut data = vec![0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut data[0..], 1);
        LittleEndian::write_u16(&mut data[2..], 1);
        data.extend([10, 11, 12, 13]);
        let ts = GotTilesetFormat.open(MemStream::wrap(data), &SuppData::new())?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert_eq!(buf.pixels, &[10, 11, 12, 13]);
        Ok(())
    }

    #[test]
    fn width_must_stay_a_multiple_of_four() -> Result<()> {
        let data = tile(1, 4, 0);
        let ts = GotTilesetFormat.open(MemStream::wrap(data), &SuppData::new())?;
        let mut img = ts.open_image(0)?;
        assert!(img.set_dimensions(Point::new(6, 4)).is_err());
        img.set_dimensions(Point::new(8, 4))?;
        assert_eq!(img.dimensions(), Point::new(8, 4));
        Ok(())
    }

    #[test]
    fn resize_rejects_impossible_byte_counts() -> Result<()> {
        let data = tile(1, 4, 0);
        let stream = MemStream::wrap(data);
        let mut ts = GotTilesetFormat.open(stream, &SuppData::new())?;
        // 6 + 23 bytes has no width in 4..=32 dividing it.
        assert!(ts.resize(0, HEADER_LEN + 23, HEADER_LEN + 23).is_err());
        ts.resize(0, HEADER_LEN + 64, HEADER_LEN + 64)?;
        Ok(())
    }

    #[test]
    fn grown_tiles_update_their_headers() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut ts = GotTilesetFormat.create(stream.clone(), &SuppData::new())?;
        ts.insert(None, EntryAttrs::empty())?;
        ts.resize(0, HEADER_LEN + 32 * 4, HEADER_LEN + 32 * 4)?;
        ts.flush()?;
        // The file must still walk cleanly.
        assert_eq!(
            GotTilesetFormat.probe(&*stream.borrow())?,
            Certainty::DefinitelyYes
        );
        Ok(())
    }
}
