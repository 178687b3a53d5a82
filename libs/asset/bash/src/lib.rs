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

// Monster Bash: background/foreground tile grids, and the sprite files
// made of length-framed records whose planes carry an ID byte saying
// which EGA planes they XOR into.

use anyhow::{ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use ega::{PlaneLayout, PlanePurpose};
use img::{Codec, CodecImage, Image, ImageCaps, SuppData};
use log::warn;
use packed_struct::packed_struct;
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{MemStream, Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatHooks, FatIo, FatRef, NoHooks,
    Tileset, TilesetCaps, TilesetFormat,
};

const TILE: Point = Point::new(16, 16);
const NUM_TILES_BG: usize = 511;
const NUM_TILES_FG: usize = 128;
const TILE_LEN_BG: usize = 32 * 4;
const TILE_LEN_FG: usize = 32 * 5;

/// Flag set in the sprite header when the image is over 64 pixels wide.
const FLAG_WIDE: u8 = 1 << 6;

/// Smallest valid sprite record: the 12-byte header plus the plane
/// terminator.
const MIN_SPRITE_LEN: usize = 13;

fn tile_planes(masked: bool) -> PlaneLayout {
    let mut planes = vec![
        PlanePurpose::Intensity1,
        PlanePurpose::Red1,
        PlanePurpose::Green1,
        PlanePurpose::Blue1,
    ];
    if masked {
        // Leading mask plane: a set bit is opaque.
        planes.insert(0, PlanePurpose::Opaque0);
    }
    planes
}

//
// tls-bash-bg / tls-bash-fg
//

struct BashTileset {
    core: FatRef,
    masked: bool,
}

impl BashTileset {
    fn open(stream: StreamRef, masked: bool) -> Result<Self> {
        let tile_len = if masked { TILE_LEN_FG } else { TILE_LEN_BG };
        // Some files carry one spare byte past the last tile; it stays
        // outside every entry and survives round-trips untouched.
        let count = stream.borrow().len() / tile_len;
        let mut core = FatCore::new(stream, EntrySizing::Fixed(tile_len), 0, Box::new(NoHooks));
        for i in 0..count {
            core.push_entry(
                i * tile_len,
                tile_len,
                0,
                EntryAttrs::empty(),
                if masked {
                    "tile/bash-masked"
                } else {
                    "tile/bash-solid"
                },
            );
        }
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            masked,
        })
    }
}

impl Tileset for BashTileset {
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
        20
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
            Codec::Planar(tile_planes(self.masked)),
            ColourDepth::Ega,
            None,
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        let (len, tag) = if self.masked {
            (TILE_LEN_FG, "tile/bash-masked")
        } else {
            (TILE_LEN_BG, "tile/bash-solid")
        };
        self.core.borrow_mut().insert(before, len, tag, attrs)
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

pub struct BashBackgroundFormat;

impl TilesetFormat for BashBackgroundFormat {
    fn code(&self) -> &'static str {
        "tls-bash-bg"
    }

    fn friendly_name(&self) -> &'static str {
        "Monster Bash Background Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["tbg"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Monster Bash"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        Ok(
            if len == 0
                || len == NUM_TILES_BG * TILE_LEN_BG
                || len == NUM_TILES_BG * TILE_LEN_BG + 1
            {
                Certainty::PossiblyYes
            } else {
                Certainty::DefinitelyNo
            },
        )
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(BashTileset::open(stream, false)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

pub struct BashForegroundFormat;

impl TilesetFormat for BashForegroundFormat {
    fn code(&self) -> &'static str {
        "tls-bash-fg"
    }

    fn friendly_name(&self) -> &'static str {
        "Monster Bash Foreground Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["tfg", "tbn"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Monster Bash"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        Ok(
            if len == 0
                || len == NUM_TILES_FG * TILE_LEN_FG
                || len == NUM_TILES_FG * TILE_LEN_FG + 1
            {
                Certainty::PossiblyYes
            } else {
                Certainty::DefinitelyNo
            },
        )
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(BashTileset::open(stream, true)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

//
// img-bash-sprite
//

packed_struct!(SpriteHeader {
    _0 => flags: u8,
    _1 => height: u8,
    _2 => width: u8,
    _3 => reserved: u8,
    _4 => hotspot_x: i16 as i32,
    _5 => hotspot_y: i16 as i32,
    _6 => hitrect_x: u16 as i32,
    _7 => hitrect_y: u16 as i32
});

fn sprite_decode_planes() -> PlaneLayout {
    // Trailing transparency plane; a set bit is transparent.
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
        PlanePurpose::Opaque1,
    ]
}

/// One sprite frame. The stored planes each begin with an ID byte:
/// the first is always the transparency plane (its ID is the row
/// width in bytes), then colour planes whose ID bits say which EGA
/// planes the data XORs into, then a 0x00 terminator.
pub struct BashSpriteImage {
    stream: StreamRef,
    dims: Point,
    flags: u8,
    hotspot: Point,
    hitrect: Point,
    cache: RefCell<Option<PixelBuffer>>,
}

impl BashSpriteImage {
    pub fn open(stream: StreamRef) -> Result<Self> {
        let mut raw = [0u8; SpriteHeader::SIZE];
        let got = stream.borrow().read_at_most(0, &mut raw)?;
        ensure!(
            got == SpriteHeader::SIZE || got == 0,
            GfxError::InvalidFormat(format!("sprite frame header truncated at {got} bytes"))
        );
        let header = SpriteHeader::overlay(&raw)?;
        Ok(Self {
            stream,
            dims: Point::new(header.width() as i32, header.height() as i32),
            flags: header.flags(),
            // Stored negated.
            hotspot: Point::new(-header.hotspot_x(), -header.hotspot_y()),
            hitrect: Point::new(header.hitrect_x(), header.hitrect_y()),
            cache: RefCell::new(None),
        })
    }

    fn ensure_header(&self) -> Result<()> {
        let mut s = self.stream.borrow_mut();
        if s.len() < SpriteHeader::SIZE {
            s.truncate(SpriteHeader::SIZE)?;
        }
        Ok(())
    }

    /// Merge the stored XOR planes into one planar [B,G,R,I,mask]
    /// buffer.
    fn compose_planar(&self) -> Result<Vec<u8>> {
        let row_len = (self.dims.x as usize + 7) / 8;
        let plane_len = row_len * self.dims.y as usize;
        let mut planar = vec![0u8; plane_len * 5];

        let data = self.stream.borrow().read_all()?;
        let mut pos = SpriteHeader::SIZE;
        let mut first = true;
        while pos < data.len() {
            let plane_id = data[pos];
            pos += 1;
            if plane_id == 0x00 {
                break;
            }
            if pos + plane_len > data.len() {
                warn!("sprite plane data ends early; ignoring the partial plane");
                break;
            }
            let plane = &data[pos..pos + plane_len];
            pos += plane_len;
            if first {
                // Transparency plane; its ID is the row width in bytes.
                planar[plane_len * 4..].copy_from_slice(plane);
                first = false;
                continue;
            }
            for p in 0..4 {
                if (plane_id >> p) & 1 == 1 {
                    for (dst, src) in planar[plane_len * p..plane_len * (p + 1)]
                        .iter_mut()
                        .zip(plane)
                    {
                        *dst ^= src;
                    }
                }
            }
        }
        Ok(planar)
    }
}

impl Image for BashSpriteImage {
    fn caps(&self) -> ImageCaps {
        ImageCaps::SET_DIMENSIONS | ImageCaps::HAS_HOTSPOT | ImageCaps::HAS_HITRECT
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn dimensions(&self) -> Point {
        self.dims
    }

    fn set_dimensions(&mut self, dims: Point) -> Result<()> {
        ensure!(
            (0..=255).contains(&dims.x) && (0..=255).contains(&dims.y),
            GfxError::InvariantViolation(format!(
                "sprite frames are at most 255x255, not {}x{}",
                dims.x, dims.y
            ))
        );
        self.ensure_header()?;
        self.dims = dims;
        if dims.x > 64 {
            self.flags |= FLAG_WIDE;
        } else {
            self.flags &= !FLAG_WIDE;
        }
        self.cache.replace(None);
        self.stream
            .borrow_mut()
            .write_at(0, &[self.flags, dims.y as u8, dims.x as u8])
    }

    fn hotspot(&self) -> Option<Point> {
        Some(self.hotspot)
    }

    fn set_hotspot(&mut self, p: Point) -> Result<()> {
        self.ensure_header()?;
        self.hotspot = p;
        let mut buf = [0u8; 4];
        LittleEndian::write_i16(&mut buf[0..], -p.x as i16);
        LittleEndian::write_i16(&mut buf[2..], -p.y as i16);
        self.stream.borrow_mut().write_at(4, &buf)
    }

    fn hitrect(&self) -> Option<Point> {
        Some(self.hitrect)
    }

    fn set_hitrect(&mut self, p: Point) -> Result<()> {
        self.ensure_header()?;
        self.hitrect = p;
        let mut buf = [0u8; 4];
        LittleEndian::write_u16(&mut buf[0..], p.x as u16);
        LittleEndian::write_u16(&mut buf[2..], p.y as u16);
        self.stream.borrow_mut().write_at(8, &buf)
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        ensure!(
            self.dims.x > 0 && self.dims.y > 0,
            GfxError::InvalidFormat("sprite frame has no dimensions yet".into())
        );
        let planar = MemStream::from(self.compose_planar()?);
        let buf = ega::decode_planar(&planar, 0, self.dims, &sprite_decode_planes())?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            self.dims.x > 0 && self.dims.y > 0,
            GfxError::InvariantViolation("set the sprite dimensions before writing pixels".into())
        );
        let row_len = (self.dims.x as usize + 7) / 8;
        let plane_len = row_len * self.dims.y as usize;

        // Transparency first, then the colour planes; the codec's
        // padding rules keep the overdraw area transparent.
        let mut planar = MemStream::new();
        let write_planes = vec![
            PlanePurpose::Opaque1,
            PlanePurpose::Blue1,
            PlanePurpose::Green1,
            PlanePurpose::Red1,
            PlanePurpose::Intensity1,
        ];
        ega::encode_planar(&mut planar, 0, self.dims, &write_planes, buf)?;
        let planar = planar.into_inner();

        let data_len = (plane_len + 1) * 5 + 1;
        let mut data = vec![0u8; data_len];
        // Plane IDs: width-in-bytes for the transparency plane, then
        // one ID bit per colour plane, then the terminator.
        data[0] = row_len as u8;
        for (p, id) in [0x01u8, 0x02, 0x04, 0x08].iter().enumerate() {
            data[(plane_len + 1) * (p + 1)] = *id;
        }
        for p in 0..5 {
            data[(plane_len + 1) * p + 1..(plane_len + 1) * p + 1 + plane_len]
                .copy_from_slice(&planar[plane_len * p..plane_len * (p + 1)]);
        }

        {
            let mut s = self.stream.borrow_mut();
            s.truncate(SpriteHeader::SIZE + data_len)?;
            s.write_at(SpriteHeader::SIZE, &data)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

//
// tls-bash-sprite
//

const SPRITE_TYPE: &str = "tile/bash-sprite";
const SPRITE_EFAT_LEN: usize = 2;

struct SpriteHooks;

impl FatHooks for SpriteHooks {
    fn pre_insert(&mut self, _io: &mut FatIo, entry: &mut FatEntry) -> Result<()> {
        entry.header_size = SPRITE_EFAT_LEN;
        Ok(())
    }

    fn update_size(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        let entry = &io.entries[index];
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, entry.stored_size as u16);
        io.stream.write_at(entry.offset, &buf)
    }
}

struct BashSpriteTileset {
    core: FatRef,
}

impl BashSpriteTileset {
    fn open(stream: StreamRef) -> Result<Self> {
        let data = stream.borrow().read_all()?;
        ensure!(
            !data.is_empty() && data[0] == 0xFF,
            GfxError::InvalidFormat("missing sprite signature byte".into())
        );
        let mut core = FatCore::new(stream, EntrySizing::Variable, 1, Box::new(SpriteHooks));
        let mut offset = 1;
        while offset + SPRITE_EFAT_LEN <= data.len() {
            let len_block = LittleEndian::read_u16(&data[offset..]) as usize;
            if offset + SPRITE_EFAT_LEN + len_block > data.len() {
                warn!(
                    "ignoring incomplete sprite frame of {len_block} bytes at offset {offset}"
                );
                core.push_entry(offset, len_block, SPRITE_EFAT_LEN, EntryAttrs::empty(), SPRITE_TYPE);
                break;
            }
            core.push_entry(offset, len_block, SPRITE_EFAT_LEN, EntryAttrs::empty(), SPRITE_TYPE);
            offset += SPRITE_EFAT_LEN + len_block;
        }
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
        })
    }
}

impl Tileset for BashSpriteTileset {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::empty()
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn layout_width(&self) -> u32 {
        1
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(Box::new(BashSpriteImage::open(entry)?))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        self.core
            .borrow_mut()
            .insert(before, MIN_SPRITE_LEN, SPRITE_TYPE, attrs)
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

pub struct BashSpriteFormat;

impl TilesetFormat for BashSpriteFormat {
    fn code(&self) -> &'static str {
        "tls-bash-sprite"
    }

    fn friendly_name(&self) -> &'static str {
        "Monster Bash Sprite"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["spr"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Monster Bash"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.is_empty() {
            return Ok(Certainty::DefinitelyNo);
        }
        if data[0] != 0xFF {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut pos = 1;
        while pos + SPRITE_EFAT_LEN <= data.len() {
            let len_block = LittleEndian::read_u16(&data[pos..]) as usize;
            pos += SPRITE_EFAT_LEN;
            if len_block < MIN_SPRITE_LEN {
                return Ok(Certainty::DefinitelyNo);
            }
            if pos + len_block > data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
            // Each record ends with the plane terminator.
            if data[pos + len_block - 1] != 0x00 {
                return Ok(Certainty::DefinitelyNo);
            }
            pos += len_block;
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(BashSpriteTileset::open(stream)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(1)?;
            s.write_at(0, &[0xFF])?;
        }
        self.open(stream, supps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_probe_accepts_the_spare_byte() -> Result<()> {
        let exact = NUM_TILES_BG * TILE_LEN_BG;
        for len in [0, exact, exact + 1] {
            assert_eq!(
                BashBackgroundFormat.probe(&MemStream::from(vec![0; len]))?,
                Certainty::PossiblyYes
            );
        }
        assert_eq!(
            BashBackgroundFormat.probe(&MemStream::from(vec![0; exact + 2]))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn the_spare_byte_survives_an_insert_remove_cycle() -> Result<()> {
        let mut data = vec![0u8; NUM_TILES_BG * TILE_LEN_BG];
        data.push(0x5A);
        let stream = MemStream::wrap(data.clone());
        let mut ts = BashBackgroundFormat.open(stream.clone(), &SuppData::new())?;
        assert_eq!(ts.files().len(), NUM_TILES_BG);
        ts.insert(Some(0), EntryAttrs::empty())?;
        ts.remove(0)?;
        ts.flush()?;
        assert_eq!(stream.borrow().read_all()?, data);
        Ok(())
    }

    #[test]
    fn sprite_header_synthesis_matches_the_game_layout() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut ts = BashSpriteFormat.create(stream.clone(), &SuppData::new())?;
        ts.insert(None, EntryAttrs::empty())?;
        let mut frame = ts.open_image(0)?;
        frame.set_dimensions(Point::new(16, 16))?;
        frame.set_hotspot(Point::new(1, -1))?;
        frame.set_hitrect(Point::new(0, 1))?;
        ts.flush()?;

        let raw = stream.borrow().read_all()?;
        // Signature, then the frame length, then the 12-byte header.
        assert_eq!(raw[0], 0xFF);
        assert_eq!(
            &raw[3..15],
            &[0x00, 0x10, 0x10, 0x00, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00]
        );
        Ok(())
    }

    #[test]
    fn sprite_pixels_round_trip_through_the_xor_planes() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut ts = BashSpriteFormat.create(stream.clone(), &SuppData::new())?;
        ts.insert(None, EntryAttrs::empty())?;

        let dims = Point::new(12, 5);
        let mut buf = PixelBuffer::new(dims);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = (i % 16) as u8;
        }
        buf.mask[3] = pix::Mask::TRANSPARENT.bits();
        buf.pixels[3] = 0;

        {
            let mut frame = ts.open_image(0)?;
            frame.set_dimensions(dims)?;
            frame.from_pixels(&buf)?;
        }
        ts.flush()?;

        // Reopen from scratch and compare.
        let ts2 = BashSpriteFormat.open(stream.clone(), &SuppData::new())?;
        let frame = ts2.open_image(0)?;
        assert_eq!(frame.dimensions(), dims);
        let back = frame.to_pixels()?;
        assert_eq!(back.pixels, buf.pixels);
        assert_eq!(back.mask, buf.mask);

        // And the container's length field tracked the resize.
        let raw = stream.borrow().read_all()?;
        let expect_len = 12 + ((12 + 7) / 8 * 5 + 1) * 5 + 1;
        assert_eq!(LittleEndian::read_u16(&raw[1..]) as usize, expect_len);
        Ok(())
    }

    #[test]
    fn sprite_probe_checks_framing_and_terminators() -> Result<()> {
        // One 13-byte record, correctly terminated.
        let mut data = vec![0xFFu8, 13, 0];
        data.extend(vec![0u8; 13]);
        assert_eq!(
            BashSpriteFormat.probe(&MemStream::from(data.clone()))?,
            Certainty::DefinitelyYes
        );
        // Break the terminator.
        let last = data.len() - 1;
        data[last] = 0x01;
        assert_eq!(
            BashSpriteFormat.probe(&MemStream::from(data))?,
            Certainty::DefinitelyNo
        );
        // Record shorter than a header.
        let bad = vec![0xFFu8, 5, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            BashSpriteFormat.probe(&MemStream::from(bad))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }
}
