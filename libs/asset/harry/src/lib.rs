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

// Halloween Harry / Alien Carnage: the palette buried in the level
// files, the flat CHR tile grid, and the HSB tileset with per-tile
// dimension headers.

use anyhow::{ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{
    supp, Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem,
};
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatRef, NoHooks, Tileset, TilesetCaps,
    TilesetFormat,
};

/// Offset of the palette inside a GMF level file.
const GMF_PAL_OFFSET: usize = 0x1D;
const GMF_SIGNATURE: &[u8] = b"\x11SubZero Game File";

const CHR_TILE: Point = Point::new(16, 16);
const CHR_TILE_LEN: usize = 16 * 16;
const CHR_NUM_TILES: usize = 255;

const HSB_HEADER_LEN: usize = 8;

/// Parse the palette out of a GMF stream: 256 six-bit entries at 0x1D,
/// index 0 transparent.
pub fn palette_from_gmf(stream: &dyn Stream) -> Result<Palette> {
    let mut buf = [0u8; 768];
    stream.read_at_most(GMF_PAL_OFFSET, &mut buf)?;
    let mut pal = Palette::from_bytes(&buf, PaletteDepth::Six)?;
    pal.set_transparent(0);
    Ok(pal)
}

fn load_gmf_palette(supps: &SuppData) -> Result<Option<Palette>> {
    Ok(match supp(supps, SuppItem::Palette) {
        Some(s) => Some(palette_from_gmf(&*s.borrow())?),
        None => None,
    })
}

/// Convert "missionX.chr" into the palette file "mXz1.gmf".
fn gmf_name_for(filename: &str) -> String {
    let digit = filename
        .len()
        .checked_sub(5)
        .and_then(|i| filename.as_bytes().get(i))
        .copied()
        .unwrap_or(b'1') as char;
    format!("m{digit}z1.gmf")
}

//
// pal-gmf-harry
//

/// The level file as a palette carrier.
pub struct HarryGmfPalette {
    stream: StreamRef,
    pal: Palette,
}

impl Image for HarryGmfPalette {
    fn caps(&self) -> ImageCaps {
        ImageCaps::HAS_PALETTE | ImageCaps::SET_PALETTE
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        Point::new(self.pal.len() as i32, 1)
    }

    fn palette(&self) -> Option<Palette> {
        Some(self.pal.clone())
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        let mut bytes = pal.as_bytes();
        bytes.resize(768, 0);
        self.stream.borrow_mut().write_at(GMF_PAL_OFFSET, &bytes)?;
        self.pal = pal.clone();
        Ok(())
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        let mut buf = PixelBuffer::new(self.dimensions());
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = i as u8;
        }
        Ok(buf)
    }

    fn from_pixels(&mut self, _buf: &PixelBuffer) -> Result<()> {
        anyhow::bail!(GfxError::InvariantViolation(
            "level palettes have no pixel data".into()
        ))
    }
}

pub struct HarryGmfPaletteFormat;

impl ImageFormat for HarryGmfPaletteFormat {
    fn code(&self) -> &'static str {
        "pal-gmf-harry"
    }

    fn friendly_name(&self) -> &'static str {
        "Halloween Harry VGA palette"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["gmf"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Alien Carnage", "Halloween Harry"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        if stream.len() < GMF_PAL_OFFSET + 768 {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut sig = [0u8; 18];
        stream.read_at(0, &mut sig)?;
        if &sig[..] != GMF_SIGNATURE {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut pal = [0u8; 768];
        stream.read_at(GMF_PAL_OFFSET, &mut pal)?;
        if pal.iter().any(|&b| b > 0x40) {
            return Ok(Certainty::DefinitelyNo);
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = palette_from_gmf(&*stream.borrow())?;
        Ok(Box::new(HarryGmfPalette { stream, pal }))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(GMF_PAL_OFFSET + 768)?;
            s.write_at(0, GMF_SIGNATURE)?;
        }
        self.open(stream, supps)
    }
}

//
// tls-harry-chr
//

struct HarryChrTileset {
    core: FatRef,
    pal: Option<Palette>,
}

impl Tileset for HarryChrTileset {
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
        CHR_TILE
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
            CHR_TILE,
            Codec::Linear8,
            ColourDepth::Vga,
            self.pal.clone(),
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        self.core
            .borrow_mut()
            .insert(before, CHR_TILE_LEN, "tile/harry-chr", attrs)
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

pub struct HarryChrFormat;

impl TilesetFormat for HarryChrFormat {
    fn code(&self) -> &'static str {
        "tls-harry-chr"
    }

    fn friendly_name(&self) -> &'static str {
        "Halloween Harry CHR tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["chr"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Alien Carnage", "Halloween Harry"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        if len == CHR_TILE_LEN * CHR_NUM_TILES {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(if len % CHR_TILE_LEN == 0 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = load_gmf_palette(supps)?;
        let count = stream.borrow().len() / CHR_TILE_LEN;
        let mut core = FatCore::new(
            stream,
            EntrySizing::Fixed(CHR_TILE_LEN),
            0,
            Box::new(NoHooks),
        );
        for i in 0..count {
            core.push_entry(
                i * CHR_TILE_LEN,
                CHR_TILE_LEN,
                0,
                EntryAttrs::empty(),
                "tile/harry-chr",
            );
        }
        Ok(Box::new(HarryChrTileset {
            core: Rc::new(RefCell::new(core)),
            pal,
        }))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, gmf_name_for(filename));
        supps
    }
}

//
// tls-harry-hsb
//

/// One HSB tile: {unk1, unk2, width, height} then linear VGA pixels.
struct HarryHsbImage {
    entry: StreamRef,
    dims: Point,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl HarryHsbImage {
    fn open(entry: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let mut header = [0u8; HSB_HEADER_LEN];
        let got = entry.borrow().read_at_most(0, &mut header)?;
        let dims = if got < HSB_HEADER_LEN {
            Point::new(0, 0)
        } else {
            Point::new(
                LittleEndian::read_u16(&header[4..]) as i32,
                LittleEndian::read_u16(&header[6..]) as i32,
            )
        };
        Ok(Self {
            entry,
            dims,
            pal,
            cache: RefCell::new(None),
        })
    }
}

impl Image for HarryHsbImage {
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
            dims.x >= 0 && dims.y >= 0 && dims.x <= 0xFFFF && dims.y <= 0xFFFF,
            GfxError::InvariantViolation(format!("cannot resize tile to {}x{}", dims.x, dims.y))
        );
        self.dims = dims;
        self.cache.replace(None);
        Ok(())
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = vga::decode_linear(&*self.entry.borrow(), HSB_HEADER_LEN, self.dims)?;
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
            entry.truncate(HSB_HEADER_LEN + buf.pixels.len())?;
            let mut header = [0u8; HSB_HEADER_LEN];
            LittleEndian::write_u16(&mut header[4..], self.dims.x as u16);
            LittleEndian::write_u16(&mut header[6..], self.dims.y as u16);
            entry.write_at(0, &header)?;
            entry.write_at(HSB_HEADER_LEN, &buf.pixels)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

struct HarryHsbTileset {
    core: FatRef,
    pal: Option<Palette>,
}

impl Tileset for HarryHsbTileset {
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
        Ok(Box::new(HarryHsbImage::open(entry, self.pal.clone())?))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        // A 0x0 tile is just its header.
        self.core
            .borrow_mut()
            .insert(before, HSB_HEADER_LEN, "tile/harry-hsb", attrs)
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

pub struct HarryHsbFormat;

impl TilesetFormat for HarryHsbFormat {
    fn code(&self) -> &'static str {
        "tls-harry-hsb"
    }

    fn friendly_name(&self) -> &'static str {
        "Halloween Harry HSB tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["hsb"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Alien Carnage", "Halloween Harry"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        // No header, so an empty file could be an empty tileset.
        if len == 0 {
            return Ok(Certainty::PossiblyYes);
        }
        if len < HSB_HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut pos = 0usize;
        while pos < len {
            if pos + HSB_HEADER_LEN > len {
                return Ok(Certainty::DefinitelyNo);
            }
            let mut header = [0u8; HSB_HEADER_LEN];
            stream.read_at(pos, &mut header)?;
            let w = LittleEndian::read_u16(&header[4..]) as usize;
            let h = LittleEndian::read_u16(&header[6..]) as usize;
            pos += HSB_HEADER_LEN + w * h;
            if pos > len {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let pal = load_gmf_palette(supps)?;
        let data = stream.borrow().read_all()?;
        let mut core = FatCore::new(stream, EntrySizing::Variable, 0, Box::new(NoHooks));
        let mut pos = 0usize;
        while pos + HSB_HEADER_LEN <= data.len() {
            let w = LittleEndian::read_u16(&data[pos + 4..]) as usize;
            let h = LittleEndian::read_u16(&data[pos + 6..]) as usize;
            let size = HSB_HEADER_LEN + w * h;
            ensure!(
                pos + size <= data.len(),
                GfxError::InvalidFormat(format!("tile at {pos} runs past the end of the file"))
            );
            core.push_entry(pos, size, 0, EntryAttrs::empty(), "tile/harry-hsb");
            pos += size;
        }
        Ok(Box::new(HarryHsbTileset {
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
        supps.insert(SuppItem::Palette, "m1z1.gmf".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn gmf_file() -> Vec<u8> {
        let mut data = vec![0u8; GMF_PAL_OFFSET + 768 + 10];
        data[..18].copy_from_slice(GMF_SIGNATURE);
        for i in 0..256usize {
            data[GMF_PAL_OFFSET + i * 3] = (i % 64) as u8;
        }
        data
    }

    #[test]
    fn gmf_palette_reads_at_its_offset_with_transparency() -> Result<()> {
        let stream = MemStream::wrap(gmf_file());
        assert_eq!(
            HarryGmfPaletteFormat.probe(&*stream.borrow())?,
            Certainty::DefinitelyYes
        );
        let img = HarryGmfPaletteFormat.open(stream, &SuppData::new())?;
        let pal = img.palette().unwrap();
        assert_eq!(pal.len(), 256);
        assert!(pal.is_transparent(0));
        assert!(!pal.is_transparent(1));
        Ok(())
    }

    #[test]
    fn gmf_probe_needs_the_signature() -> Result<()> {
        let mut data = gmf_file();
        data[0] = 0x12;
        assert_eq!(
            HarryGmfPaletteFormat.probe(&MemStream::from(data))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn chr_supp_palette_name_is_derived_from_the_mission() {
        let supps = HarryChrFormat.required_supps("mission3.chr");
        assert_eq!(supps[&SuppItem::Palette], "m3z1.gmf");
    }

    #[test]
    fn chr_tiles_are_flat_vga() -> Result<()> {
        let mut data = vec![0u8; 2 * CHR_TILE_LEN];
        data[CHR_TILE_LEN] = 0x42;
        let ts = HarryChrFormat.open(MemStream::wrap(data), &SuppData::new())?;
        assert_eq!(ts.files().len(), 2);
        let buf = ts.open_image(1)?.to_pixels()?;
        assert_eq!(buf.pixels[0], 0x42);
        Ok(())
    }

    fn hsb_with_one_tile(w: u16, h: u16) -> Vec<u8> {
        let mut data = vec![0u8; HSB_HEADER_LEN];
        LittleEndian::write_u16(&mut data[4..], w);
        LittleEndian::write_u16(&mut data[6..], h);
        data.extend((0..w as usize * h as usize).map(|i| i as u8));
        data
    }

    #[test]
    fn hsb_walks_tile_headers() -> Result<()> {
        let mut data = hsb_with_one_tile(4, 3);
        data.extend(hsb_with_one_tile(2, 2));
        assert_eq!(
            HarryHsbFormat.probe(&MemStream::from(data.clone()))?,
            Certainty::DefinitelyYes
        );
        let ts = HarryHsbFormat.open(MemStream::wrap(data), &SuppData::new())?;
        let files = ts.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].stored_size, 8 + 12);
        assert_eq!(files[1].offset, 8 + 12);

        let img = ts.open_image(0)?;
        assert_eq!(img.dimensions(), Point::new(4, 3));
        assert_eq!(img.to_pixels()?.pixels, (0..12).collect::<Vec<u8>>());
        Ok(())
    }

    #[test]
    fn hsb_tiles_resize_on_write() -> Result<()> {
        let data = hsb_with_one_tile(2, 2);
        let stream = MemStream::wrap(data);
        let ts = HarryHsbFormat.open(stream.clone(), &SuppData::new())?;
        let mut img = ts.open_image(0)?;
        img.set_dimensions(Point::new(3, 3))?;
        let mut buf = PixelBuffer::new(Point::new(3, 3));
        buf.pixels.copy_from_slice(&[9, 8, 7, 6, 5, 4, 3, 2, 1]);
        img.from_pixels(&buf)?;

        let raw = stream.borrow().read_all()?;
        assert_eq!(raw.len(), 8 + 9);
        assert_eq!(LittleEndian::read_u16(&raw[4..]), 3);
        assert_eq!(&raw[8..], &[9, 8, 7, 6, 5, 4, 3, 2, 1]);
        Ok(())
    }

    #[test]
    fn hsb_probe_rejects_truncated_tiles() -> Result<()> {
        let mut data = hsb_with_one_tile(4, 4);
        data.pop();
        assert_eq!(
            HarryHsbFormat.probe(&MemStream::from(data))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }
}
