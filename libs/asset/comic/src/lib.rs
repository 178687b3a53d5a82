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

// Captain Comic and Captain Comic II: RLE fullscreen images, the plain
// tile/sprite grids of the first game, and the RLE-compressed tileset
// of the second.

use anyhow::{ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use ega::{PlaneLayout, PlanePurpose};
use img::{Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use rle::{ChunkFilter, Comic2Rle, Comic2Unrle, ComicRle, ComicUnrle};
use std::{cell::RefCell, rc::Rc};
use stream::{MemStream, Stream, StreamRef};
use tls::{
    Attribute, EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatRef, NoHooks, Tileset,
    TilesetCaps, TilesetFormat,
};

const SCREEN: Point = Point::new(320, 200);
const TILE: Point = Point::new(16, 16);

/// Bytes per decoded plane of a fullscreen image.
const PLANE_LEN: usize = 8000;

fn bgri() -> PlaneLayout {
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
        PlanePurpose::Unused,
        PlanePurpose::Unused,
    ]
}

fn sprite_planes() -> PlaneLayout {
    // Trailing transparency plane; a set bit is opaque.
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
        PlanePurpose::Opaque0,
        PlanePurpose::Unused,
    ]
}

//
// img-ccomic
//

/// Captain Comic fullscreen image: a four-plane 320x200 EGA screen
/// behind the Comic RLE filter.
struct ComicImage {
    stream: StreamRef,
    cache: RefCell<Option<PixelBuffer>>,
}

impl Image for ComicImage {
    fn caps(&self) -> ImageCaps {
        ImageCaps::empty()
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn dimensions(&self) -> Point {
        SCREEN
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let packed = self.stream.borrow().read_all()?;
        let decoded = ComicUnrle::new().apply_all(&packed);
        let mem = MemStream::from(decoded);
        let buf = ega::decode_planar(&mem, 0, SCREEN, &bgri())?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        let mut mem = MemStream::new();
        ega::encode_planar(&mut mem, 0, SCREEN, &bgri(), buf)?;
        let packed = ComicRle::new().apply_all(mem.as_slice());
        {
            let mut s = self.stream.borrow_mut();
            s.truncate(packed.len())?;
            s.write_at(0, &packed)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct ComicImageFormat;

impl ImageFormat for ComicImageFormat {
    fn code(&self) -> &'static str {
        "img-ccomic"
    }

    fn friendly_name(&self) -> &'static str {
        "Captain Comic full-screen image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["ega"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Captain Comic"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.len() < 2 {
            return Ok(Certainty::DefinitelyNo);
        }
        let plane_len = LittleEndian::read_u16(&data) as usize;
        if plane_len != PLANE_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut remaining = plane_len * 4;
        let mut pos = 2;
        while remaining > 0 {
            if pos >= data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
            let code = data[pos];
            pos += 1;
            if code & 0x80 != 0 {
                let repeat = (code & 0x7F) as usize;
                if repeat > remaining || pos >= data.len() {
                    return Ok(Certainty::DefinitelyNo);
                }
                pos += 1;
                remaining -= repeat;
            } else {
                let lit = code as usize;
                if lit > remaining {
                    return Ok(Certainty::DefinitelyNo);
                }
                remaining -= lit;
                pos += lit;
                if pos > data.len() {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
        }
        // Should be no trailing data.
        Ok(if pos == data.len() {
            Certainty::DefinitelyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(ComicImage {
            stream,
            cache: RefCell::new(None),
        }))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        // An empty screen still carries its plane-length prefix.
        let packed = ComicRle::new().apply_all(&vec![0u8; PLANE_LEN * 4]);
        {
            let mut s = stream.borrow_mut();
            s.truncate(packed.len())?;
            s.write_at(0, &packed)?;
        }
        self.open(stream, supps)
    }
}

//
// tls-ccomic / tls-ccomic-sprite
//

const TILE_TYPE: &str = "tile/ccomic";
const SOLID_TILE_LEN: usize = 2 * 16 * 4; // 128
const SPRITE_TILE_LEN: usize = 2 * 16 * 5; // 160

struct ComicTileset {
    core: FatRef,
    masked: bool,
}

impl ComicTileset {
    fn open(stream: StreamRef, masked: bool) -> Result<Self> {
        let (tile_len, header) = if masked {
            (SPRITE_TILE_LEN, 0)
        } else {
            (SOLID_TILE_LEN, 4)
        };
        let count = stream.borrow().len().saturating_sub(header) / tile_len;
        let mut core = FatCore::new(
            stream,
            EntrySizing::Fixed(tile_len),
            header,
            Box::new(NoHooks),
        );
        for i in 0..count {
            core.push_entry(
                header + i * tile_len,
                tile_len,
                0,
                EntryAttrs::empty(),
                TILE_TYPE,
            );
        }
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            masked,
        })
    }
}

impl Tileset for ComicTileset {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::HAS_DIMENSIONS
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn tile_dimensions(&self) -> Point {
        TILE
    }

    fn layout_width(&self) -> u32 {
        4
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        let planes = if self.masked {
            sprite_planes()
        } else {
            bgri()
        };
        Ok(Box::new(CodecImage::new(
            entry,
            0,
            TILE,
            Codec::Planar(planes),
            ColourDepth::Ega,
            None,
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        let len = if self.masked {
            SPRITE_TILE_LEN
        } else {
            SOLID_TILE_LEN
        };
        self.core.borrow_mut().insert(before, len, TILE_TYPE, attrs)
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

pub struct ComicTilesetFormat;

impl TilesetFormat for ComicTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-ccomic"
    }

    fn friendly_name(&self) -> &'static str {
        "Captain Comic Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["tt2"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Captain Comic"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() % SOLID_TILE_LEN == 4 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(ComicTileset::open(stream, false)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(4)?;
            s.write_at(0, &[0, 0, 0, 0])?;
        }
        self.open(stream, supps)
    }
}

pub struct ComicSpriteFormat;

impl TilesetFormat for ComicSpriteFormat {
    fn code(&self) -> &'static str {
        "tls-ccomic-sprite"
    }

    fn friendly_name(&self) -> &'static str {
        "Captain Comic Sprite"
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Captain Comic"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() % SPRITE_TILE_LEN == 0 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(ComicTileset::open(stream, true)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

//
// tls-ccomic2
//

const CC2_TILE_TYPE: &str = "tile/ccomic2";
const CC2_HEADER: usize = 6;

/// Captain Comic II tileset. The file as a whole is RLE-compressed;
/// edits run against the decompressed form and flush() re-packs it.
struct Comic2Tileset {
    raw: StreamRef,
    core: FatRef,
    attrs: [i64; 3],
    attrs_changed: bool,
}

const CC2_ATTR_NAMES: [(&str, &str); 3] = [
    (
        "Last blocking tile",
        "Zero-based index of the last tile that blocks the player; -1 if none.",
    ),
    (
        "Last standing tile",
        "Zero-based index of the last tile the player can walk through but stand upon; -1 if none.",
    ),
    (
        "Last underwater tile",
        "Zero-based index of the last underwater tile; all later tiles are background; -1 if none.",
    ),
];

impl Comic2Tileset {
    fn open(raw: StreamRef) -> Result<Self> {
        let packed = raw.borrow().read_all()?;
        let decoded = Comic2Unrle::new(CC2_HEADER).apply_all(&packed);
        ensure!(
            decoded.len() >= CC2_HEADER,
            GfxError::InvalidFormat("file too short for the attribute words".into())
        );
        let mut attrs = [0i64; 3];
        for (i, a) in attrs.iter_mut().enumerate() {
            let v = LittleEndian::read_u16(&decoded[i * 2..]);
            *a = if v == 0xFFFF { -1 } else { v as i64 };
        }
        let count = (decoded.len() - CC2_HEADER) / SOLID_TILE_LEN;

        let decoded = MemStream::wrap(decoded);
        let mut core = FatCore::new(
            decoded,
            EntrySizing::Fixed(SOLID_TILE_LEN),
            CC2_HEADER,
            Box::new(NoHooks),
        );
        for i in 0..count {
            core.push_entry(
                CC2_HEADER + i * SOLID_TILE_LEN,
                SOLID_TILE_LEN,
                0,
                EntryAttrs::empty(),
                CC2_TILE_TYPE,
            );
        }
        Ok(Self {
            raw,
            core: Rc::new(RefCell::new(core)),
            attrs,
            attrs_changed: false,
        })
    }
}

impl Tileset for Comic2Tileset {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::HAS_DIMENSIONS
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn tile_dimensions(&self) -> Point {
        TILE
    }

    fn layout_width(&self) -> u32 {
        4
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(Box::new(CodecImage::new(
            entry,
            0,
            TILE,
            Codec::Planar(bgri()),
            ColourDepth::Ega,
            None,
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        self.core
            .borrow_mut()
            .insert(before, SOLID_TILE_LEN, CC2_TILE_TYPE, attrs)
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

    fn attributes(&self) -> Vec<Attribute> {
        self.attrs
            .iter()
            .zip(CC2_ATTR_NAMES)
            .map(|(&value, (name, desc))| Attribute {
                name,
                desc,
                value,
                min: -1,
                max: 255,
            })
            .collect()
    }

    fn set_attribute(&mut self, index: usize, value: i64) -> Result<()> {
        ensure!(
            index < 3,
            GfxError::InvariantViolation(format!("no attribute {index}"))
        );
        ensure!(
            (-1..=0xFFFE).contains(&value),
            GfxError::InvariantViolation(format!("attribute value {value} out of range"))
        );
        self.attrs[index] = value;
        self.attrs_changed = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.attrs_changed {
            let mut header = [0u8; CC2_HEADER];
            for (i, &a) in self.attrs.iter().enumerate() {
                let v = if a < 0 { 0xFFFF } else { a as u16 };
                LittleEndian::write_u16(&mut header[i * 2..], v);
            }
            self.core
                .borrow_mut()
                .with_io(|io| io.stream.write_at(0, &header))?;
            self.attrs_changed = false;
        }
        self.core.borrow_mut().flush()?;

        // Re-pack the decompressed stream into the real file.
        let decoded = {
            let core = self.core.borrow();
            let s = core.stream();
            let data = s.borrow().read_all()?;
            data
        };
        let packed = Comic2Rle::new(CC2_HEADER).apply_all(&decoded);
        let mut raw = self.raw.borrow_mut();
        raw.truncate(packed.len())?;
        raw.write_at(0, &packed)?;
        Ok(())
    }
}

pub struct Comic2TilesetFormat;

impl TilesetFormat for Comic2TilesetFormat {
    fn code(&self) -> &'static str {
        "tls-ccomic2"
    }

    fn friendly_name(&self) -> &'static str {
        "Captain Comic II Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["0"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Captain Comic 2"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        // Compressed tilesets are small files.
        if stream.len() > 65535 || stream.len() < CC2_HEADER {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut words = [0u8; 6];
        stream.read_at(0, &mut words)?;
        for i in 0..3 {
            let v = LittleEndian::read_u16(&words[i * 2..]);
            if v != 0xFFFF && v > 512 {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::Unsure)
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(Comic2Tileset::open(stream)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let packed = Comic2Rle::new(CC2_HEADER).apply_all(&[0u8; CC2_HEADER]);
        {
            let mut s = stream.borrow_mut();
            s.truncate(packed.len())?;
            s.write_at(0, &packed)?;
        }
        self.open(stream, supps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_screen(pixels: &PixelBuffer) -> Vec<u8> {
        let mut mem = MemStream::new();
        ega::encode_planar(&mut mem, 0, SCREEN, &bgri(), pixels).unwrap();
        ComicRle::new().apply_all(mem.as_slice())
    }

    #[test]
    fn fullscreen_probe_walks_the_command_stream() -> Result<()> {
        let mut buf = PixelBuffer::new(SCREEN);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = ((i / 320) % 16) as u8;
        }
        let packed = encode_screen(&buf);
        assert_eq!(
            ComicImageFormat.probe(&MemStream::from(packed.clone()))?,
            Certainty::DefinitelyYes
        );

        // Trailing junk is rejected.
        let mut longer = packed.clone();
        longer.push(0x00);
        assert_eq!(
            ComicImageFormat.probe(&MemStream::from(longer))?,
            Certainty::DefinitelyNo
        );

        // Wrong plane length is rejected.
        let mut wrong = packed;
        wrong[0] = 0x41;
        assert_eq!(
            ComicImageFormat.probe(&MemStream::from(wrong))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn fullscreen_image_round_trips() -> Result<()> {
        let mut buf = PixelBuffer::new(SCREEN);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = ((i % 11) % 16) as u8;
        }
        let stream = MemStream::wrap(vec![]);
        let mut img = ComicImageFormat.create(stream.clone(), &SuppData::new())?;
        img.from_pixels(&buf)?;
        let reread = ComicImageFormat.open(stream, &SuppData::new())?;
        assert_eq!(reread.to_pixels()?.pixels, buf.pixels);
        Ok(())
    }

    #[test]
    fn solid_tileset_maps_tiles_behind_the_header() -> Result<()> {
        let stream = MemStream::wrap(vec![0u8; 4 + 3 * SOLID_TILE_LEN]);
        let ts = ComicTilesetFormat.open(stream, &SuppData::new())?;
        let files = ts.files();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].offset, 4);
        assert_eq!(files[2].offset, 4 + 2 * SOLID_TILE_LEN);
        assert_eq!(ts.tile_dimensions(), TILE);
        Ok(())
    }

    #[test]
    fn sprite_tiles_decode_their_mask_plane() -> Result<()> {
        // One sprite tile; colour planes zero, mask plane all zero
        // means fully transparent (a set bit is opaque).
        let stream = MemStream::wrap(vec![0u8; SPRITE_TILE_LEN]);
        let ts = ComicSpriteFormat.open(stream, &SuppData::new())?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert!(!buf.is_opaque(0, 0));
        assert!(!buf.is_opaque(15, 15));
        Ok(())
    }

    #[test]
    fn comic2_tileset_decodes_attributes_and_tiles() -> Result<()> {
        // Build a decompressed image: attrs 5, 0xFFFF, 7 and two tiles.
        let mut decoded = vec![0u8; CC2_HEADER + 2 * SOLID_TILE_LEN];
        LittleEndian::write_u16(&mut decoded[0..], 5);
        LittleEndian::write_u16(&mut decoded[2..], 0xFFFF);
        LittleEndian::write_u16(&mut decoded[4..], 7);
        decoded[CC2_HEADER] = 0xAB;
        let packed = Comic2Rle::new(CC2_HEADER).apply_all(&decoded);

        let stream = MemStream::wrap(packed);
        let ts = Comic2TilesetFormat.open(stream, &SuppData::new())?;
        assert_eq!(ts.files().len(), 2);
        let attrs = ts.attributes();
        assert_eq!(attrs[0].value, 5);
        assert_eq!(attrs[1].value, -1);
        assert_eq!(attrs[2].value, 7);
        Ok(())
    }

    #[test]
    fn comic2_flush_repacks_the_file() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut ts = Comic2TilesetFormat.create(stream.clone(), &SuppData::new())?;
        ts.insert(None, EntryAttrs::empty())?;
        ts.set_attribute(0, 3)?;
        ts.flush()?;

        let reread = Comic2TilesetFormat.open(stream, &SuppData::new())?;
        assert_eq!(reread.files().len(), 1);
        assert_eq!(reread.attributes()[0].value, 3);
        Ok(())
    }
}
