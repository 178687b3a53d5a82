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

// Cosmo's Cosmic Adventures: the plain 8x8 tile grids (shared with
// Duke Nukem II), the level backdrop presented as one image, and the
// two-stream actor tilesets where ACTRINFO.MNI indexes frames stored in
// ACTORS.MNI.

use anyhow::{bail, ensure, Result};
use apogee::{EgaGridTileset, PlaneCount};
use byteorder::{ByteOrder, LittleEndian};
use ega::{PlaneLayout, PlanePurpose};
use img::{supp, Codec, CodecImage, Image, ImageFormat, SuppData, SuppFilenames, SuppItem};
use pix::{Certainty, ColourDepth, GfxError, Point};
use stream::{Stream, StreamRef, SubStream};
use tls::{
    EntryAttrs, FatEntry, ImageFromTileset, Tileset, TilesetCaps, TilesetFormat,
};

const TILE: Point = Point::new(8, 8);
const IDEAL_WIDTH: u32 = 40;

/// Size in bytes of the standard tileset (40x50 tiles).
const SIZE_STANDARD: usize = 40 * 50 * 32;
/// Size in bytes of a Cosmo backdrop (40x18 tiles).
const SIZE_BACKDROP: usize = 40 * 18 * 32;
/// Size in bytes of a Duke Nukem II backdrop / CZone solid block.
const SIZE_BACKDROP_DN2: usize = 40 * 25 * 32;
/// Size in bytes of the masked tileset (40x25 tiles).
const SIZE_MASKED: usize = 40 * 25 * 40;
/// Size in bytes of the Duke Nukem II CZone masked block.
const SIZE_MASKED_DN2: usize = 40 * 4 * 40;

pub struct CosmoTilesetFormat;

impl TilesetFormat for CosmoTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-cosmo"
    }

    fn friendly_name(&self) -> &'static str {
        "Cosmo's Cosmic Adventures Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Cosmo's Cosmic Adventures", "Duke Nukem II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(match stream.len() {
            SIZE_STANDARD | SIZE_BACKDROP | SIZE_BACKDROP_DN2 => Certainty::PossiblyYes,
            _ => Certainty::DefinitelyNo,
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(EgaGridTileset::open(
            stream,
            TILE,
            PlaneCount::Solid,
            IDEAL_WIDTH,
            None,
        )?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

pub struct CosmoMaskedTilesetFormat;

impl TilesetFormat for CosmoMaskedTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-cosmo-masked"
    }

    fn friendly_name(&self) -> &'static str {
        "Cosmo's Cosmic Adventures Masked Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Cosmo's Cosmic Adventures", "Duke Nukem II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(match stream.len() {
            SIZE_MASKED | SIZE_MASKED_DN2 => Certainty::PossiblyYes,
            _ => Certainty::DefinitelyNo,
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(EgaGridTileset::open(
            stream,
            TILE,
            PlaneCount::Masked,
            IDEAL_WIDTH,
            None,
        )?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

/// The level backdrop: the 40x18-tile grid flattened into one image.
pub struct CosmoBackdropFormat;

impl ImageFormat for CosmoBackdropFormat {
    fn code(&self) -> &'static str {
        "img-cosmo-backdrop"
    }

    fn friendly_name(&self) -> &'static str {
        "Cosmo's Cosmic Adventures level backdrop"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Cosmo's Cosmic Adventures"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == SIZE_BACKDROP {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        let tiles = EgaGridTileset::open(stream, TILE, PlaneCount::Solid, 1, None)?;
        Ok(Box::new(ImageFromTileset::new(
            Box::new(tiles),
            0,
            40,
            Point::new(40, 18),
        )?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(SIZE_BACKDROP)?;
        }
        self.open(stream, supps)
    }
}

//
// tls-actrinfo
//

fn actor_planes() -> PlaneLayout {
    // Transparency plane first; a set bit is transparent.
    vec![
        PlanePurpose::Opaque1,
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
    ]
}

/// Undo the original's segmented-memory offset encoding.
fn unsegment(offset: usize) -> usize {
    offset - offset / 65536
}

/// One actor: the frame records inside its slice of the info stream,
/// each describing a tile-aligned image in the shared data stream.
struct SingleActorTileset {
    data: StreamRef,
    // (dims in tiles, data offset, data len) per frame.
    frames: Vec<(Point, usize, usize)>,
}

impl SingleActorTileset {
    fn open(info: &[u8], data: StreamRef) -> Result<Self> {
        ensure!(
            info.len() % 8 == 0,
            GfxError::InvalidFormat(format!(
                "actor info slice of {} bytes is not whole frame records",
                info.len()
            ))
        );
        let data_len = data.borrow().len();
        let mut frames = Vec::with_capacity(info.len() / 8);
        for rec in info.chunks_exact(8) {
            let height = LittleEndian::read_u16(&rec[0..]) as i32;
            let width = LittleEndian::read_u16(&rec[2..]) as i32;
            let offset = unsegment(LittleEndian::read_u32(&rec[4..]) as usize);
            frames.push((Point::new(width, height), offset, 0));
        }
        // Sizes run to the next frame's offset; the last runs to EOF.
        for i in 0..frames.len() {
            let end = if i + 1 < frames.len() {
                frames[i + 1].1
            } else {
                data_len
            };
            frames[i].2 = end.saturating_sub(frames[i].1);
        }
        Ok(Self { data, frames })
    }
}

impl Tileset for SingleActorTileset {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::empty()
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn layout_width(&self) -> u32 {
        40
    }

    fn files(&self) -> Vec<FatEntry> {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, (dims, offset, len))| FatEntry {
                id: i as u64,
                index: i,
                offset: *offset,
                stored_size: *len,
                real_size: *len,
                header_size: 0,
                attrs: if *len == 0 {
                    EntryAttrs::VACANT
                } else {
                    EntryAttrs::empty()
                },
                type_tag: format!("tile/actor-frame-{}x{}", dims.x, dims.y),
                valid: true,
            })
            .collect()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let (dims_tiles, offset, len) = *self
            .frames
            .get(index)
            .ok_or_else(|| GfxError::InvariantViolation(format!("no frame {index}")))?;
        ensure!(
            len > 0,
            GfxError::InvariantViolation(format!("frame {index} is an empty slot"))
        );
        let region = SubStream::wrap(self.data.clone(), offset, len)?;
        Ok(Box::new(CodecImage::new(
            region,
            0,
            Point::new(dims_tiles.x * 8, dims_tiles.y * 8),
            Codec::BytePlanarTiled(actor_planes()),
            ColourDepth::Ega,
            None,
        )))
    }

    fn insert(&mut self, _before: Option<usize>, _attrs: EntryAttrs) -> Result<FatEntry> {
        bail!(GfxError::InvariantViolation(
            "actor frames cannot be added here; edit the info file".into()
        ))
    }

    fn remove(&mut self, _index: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "actor frames cannot be removed here; edit the info file".into()
        ))
    }

    fn resize(&mut self, index: usize, new_stored: usize, _new_real: usize) -> Result<()> {
        let (_, _, len) = self.frames[index];
        ensure!(
            new_stored == len,
            GfxError::InvariantViolation("tiles in this tileset are a fixed size".into())
        );
        Ok(())
    }

    fn move_entry(&mut self, _from: usize, _before: Option<usize>) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "actor frames cannot be reordered".into()
        ))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The outer actor list: each entry is one actor's slice of the info
/// stream, opened as a sub-tileset of frames.
struct ActorInfoTileset {
    info: StreamRef,
    data: StreamRef,
    // (offset, len) into the info stream per actor.
    actors: Vec<(usize, usize)>,
}

impl ActorInfoTileset {
    fn open(info: StreamRef, data: StreamRef) -> Result<Self> {
        let raw = info.borrow().read_all()?;
        ensure!(
            raw.len() >= 2,
            GfxError::InvalidFormat("actor info stream too short".into())
        );
        let count = unsegment(LittleEndian::read_u16(&raw) as usize);
        ensure!(
            count * 2 <= raw.len(),
            GfxError::InvalidFormat(format!(
                "actor table claims {count} entries but the info stream has {} bytes",
                raw.len()
            ))
        );
        let mut offsets = Vec::with_capacity(count + 1);
        for i in 0..count {
            let word = LittleEndian::read_u16(&raw[i * 2..]) as usize;
            offsets.push(unsegment(word) * 2);
        }
        offsets.push(raw.len());
        let actors = offsets
            .windows(2)
            .map(|w| (w[0], w[1].saturating_sub(w[0])))
            .collect();
        Ok(Self { info, data, actors })
    }
}

impl Tileset for ActorInfoTileset {
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
        self.actors
            .iter()
            .enumerate()
            .map(|(i, (offset, len))| FatEntry {
                id: i as u64,
                index: i,
                offset: *offset,
                stored_size: *len,
                real_size: *len,
                header_size: 0,
                attrs: if *len == 0 {
                    EntryAttrs::FOLDER | EntryAttrs::VACANT
                } else {
                    EntryAttrs::FOLDER
                },
                type_tag: "tileset/actor".to_string(),
                valid: true,
            })
            .collect()
    }

    fn open_image(&self, _index: usize) -> Result<Box<dyn Image>> {
        bail!(GfxError::InvariantViolation(
            "actor entries are sub-tilesets, not images".into()
        ))
    }

    fn open_tileset(&self, index: usize) -> Result<Box<dyn Tileset>> {
        let (offset, len) = *self
            .actors
            .get(index)
            .ok_or_else(|| GfxError::InvariantViolation(format!("no actor {index}")))?;
        let slice = self.info.borrow().read_vec(offset, len)?;
        Ok(Box::new(SingleActorTileset::open(
            &slice,
            self.data.clone(),
        )?))
    }

    fn insert(&mut self, _before: Option<usize>, _attrs: EntryAttrs) -> Result<FatEntry> {
        bail!(GfxError::InvariantViolation(
            "actors cannot be added here; edit the info file".into()
        ))
    }

    fn remove(&mut self, _index: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "actors cannot be removed here; edit the info file".into()
        ))
    }

    fn resize(&mut self, _index: usize, _new_stored: usize, _new_real: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are a fixed size".into()
        ))
    }

    fn move_entry(&mut self, _from: usize, _before: Option<usize>) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "actors cannot be reordered".into()
        ))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct ActorInfoTilesetFormat;

impl TilesetFormat for ActorInfoTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-actrinfo"
    }

    fn friendly_name(&self) -> &'static str {
        "Cosmo Actor Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Cosmo's Cosmic Adventures"]
    }

    fn probe(&self, _stream: &dyn Stream) -> Result<Certainty> {
        // The data stream is opaque without its info file.
        Ok(Certainty::Unsure)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let info = supp(supps, SuppItem::Fat).ok_or_else(|| {
            GfxError::InvalidFormat("no actor info file specified (missing supplementary item)".into())
        })?;
        Ok(Box::new(ActorInfoTileset::open(info, stream)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        let info = supp(supps, SuppItem::Fat).ok_or_else(|| {
            GfxError::InvalidFormat("no actor info file specified (missing supplementary item)".into())
        })?;
        {
            // A single empty actor slot: the count word is also the
            // first actor's offset.
            let mut i = info.borrow_mut();
            i.truncate(2)?;
            i.write_at(0, &[1, 0])?;
        }
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        let fat = match filename {
            "players.mni" => "plyrinfo.mni",
            "cartoon.mni" => "cartinfo.mni",
            _ => "actrinfo.mni",
        };
        supps.insert(SuppItem::Fat, fat.to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn tileset_probe_accepts_the_known_grid_sizes() -> Result<()> {
        for len in [SIZE_STANDARD, SIZE_BACKDROP, SIZE_BACKDROP_DN2] {
            assert_eq!(
                CosmoTilesetFormat.probe(&MemStream::from(vec![0; len]))?,
                Certainty::PossiblyYes
            );
        }
        assert_eq!(
            CosmoTilesetFormat.probe(&MemStream::from(vec![0; 12345]))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn known_tile_bytes_decode_to_the_expected_pixels() -> Result<()> {
        // An 8x8 solid tile whose first row is BF BF BF BF and whose
        // last row is 7C 01 81 FD.
        let mut tile = vec![0u8; 32];
        tile[0..4].copy_from_slice(&[0xBF, 0xBF, 0xBF, 0xBF]);
        tile[4..8].copy_from_slice(&[0x00, 0x01, 0x80, 0x81]);
        tile[28..32].copy_from_slice(&[0x7C, 0x01, 0x81, 0xFD]);

        let ts = EgaGridTileset::open(
            MemStream::wrap(tile),
            TILE,
            PlaneCount::Solid,
            IDEAL_WIDTH,
            None,
        )?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert_eq!(buf.pixels[0], 0x0F);
        assert_eq!(buf.pixels[63], 0x0E);
        assert_eq!(buf.pixels[56], 0x0C);
        assert_eq!(buf.pixels[57], 0x09);
        Ok(())
    }

    #[test]
    fn backdrop_composes_the_whole_grid() -> Result<()> {
        let mut data = vec![0u8; SIZE_BACKDROP];
        // Make tile 1 (second in the top row) solid white.
        for b in data[32..64].iter_mut() {
            *b = 0xFF;
        }
        let image = CosmoBackdropFormat.open(MemStream::wrap(data), &SuppData::new())?;
        assert_eq!(image.dimensions(), Point::new(320, 144));
        let buf = image.to_pixels()?;
        assert_eq!(buf.pixel(0, 0), 0x00);
        assert_eq!(buf.pixel(8, 0), 0x0F);
        assert_eq!(buf.pixel(15, 7), 0x0F);
        assert_eq!(buf.pixel(16, 0), 0x00);
        Ok(())
    }

    #[test]
    fn actor_info_slices_and_frame_records_resolve() -> Result<()> {
        // Two actors. Table: count word then second actor's offset.
        // Actor 0: one frame record at info bytes 4..12.
        // Actor 1: one frame record at info bytes 12..20.
        let mut info = vec![0u8; 20];
        LittleEndian::write_u16(&mut info[0..], 2); // count
        LittleEndian::write_u16(&mut info[2..], 6); // actor 1 at word 6 = byte 12
        // Actor 0 frame: 1x1 tiles at data offset 0.
        LittleEndian::write_u16(&mut info[4..], 1);
        LittleEndian::write_u16(&mut info[6..], 1);
        LittleEndian::write_u32(&mut info[8..], 0);
        // Actor 1 frame: 1x2 tiles at data offset 40.
        LittleEndian::write_u16(&mut info[12..], 1);
        LittleEndian::write_u16(&mut info[14..], 2);
        LittleEndian::write_u32(&mut info[16..], 40);

        let data = MemStream::wrap(vec![0u8; 120]);
        let mut supps = SuppData::new();
        supps.insert(SuppItem::Fat, MemStream::wrap(info));
        let outer = ActorInfoTilesetFormat.open(data, &supps)?;

        let actors = outer.files();
        assert_eq!(actors.len(), 2);
        assert!(actors[0].attrs.contains(EntryAttrs::FOLDER));

        let actor0 = outer.open_tileset(0)?;
        let frames = actor0.files();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset, 0);
        // A lone frame runs to the end of the data stream.
        assert_eq!(frames[0].stored_size, 120);
        let img = actor0.open_image(0)?;
        assert_eq!(img.dimensions(), Point::new(8, 8));

        let actor1 = outer.open_tileset(1)?;
        let img = actor1.open_image(0)?;
        assert_eq!(img.dimensions(), Point::new(16, 8));
        Ok(())
    }

    #[test]
    fn actor_frame_pixels_come_from_the_data_stream() -> Result<()> {
        // One actor, one 1x1-tile frame. Data: 40 bytes, transparency
        // plane zero (all opaque), blue plane solid.
        let mut info = vec![0u8; 10];
        LittleEndian::write_u16(&mut info[0..], 1);
        LittleEndian::write_u16(&mut info[2..], 1); // height
        LittleEndian::write_u16(&mut info[4..], 1); // width
        LittleEndian::write_u32(&mut info[6..], 0);

        let mut frame = vec![0u8; 40];
        for row in 0..8 {
            frame[row * 5 + 1] = 0xFF; // blue plane
        }
        let data = MemStream::wrap(frame);
        let mut supps = SuppData::new();
        supps.insert(SuppItem::Fat, MemStream::wrap(info));
        let outer = ActorInfoTilesetFormat.open(data, &supps)?;
        let actor = outer.open_tileset(0)?;
        let buf = actor.open_image(0)?.to_pixels()?;
        assert!(buf.pixels.iter().all(|&p| p == 0x01));
        assert!(buf.is_opaque(0, 0));
        Ok(())
    }
}
