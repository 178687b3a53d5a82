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

// Catacomb / Catacomb II: headerless grids of 8x8 tiles, planar for
// the EGA sets and 2bpp row-linear for the CGA sets.

use anyhow::Result;
use ega::{PlaneLayout, PlanePurpose};
use img::{Codec, CodecImage, Image};
use pal::{CgaPalette, Palette};
use pix::{Certainty, ColourDepth, Point};
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatRef, NoHooks, Tileset, TilesetCaps,
    TilesetFormat,
};
use img::SuppData;

const TILE: Point = Point::new(8, 8);
const EGA_TILE_LEN: usize = 32;
const CGA_TILE_LEN: usize = 16;
/// Tile counts of the two shipped games, used to upgrade the probe.
const CAT1_TILES: usize = 1462;
const CAT2_TILES: usize = 1618;
const TILE_TYPE: &str = "tile/catacomb";

fn ega_planes() -> PlaneLayout {
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
    ]
}

struct CatacombTileset {
    core: FatRef,
    depth: ColourDepth,
}

impl CatacombTileset {
    fn open(stream: StreamRef, depth: ColourDepth) -> Result<Self> {
        let tile_len = match depth {
            ColourDepth::Cga => CGA_TILE_LEN,
            _ => EGA_TILE_LEN,
        };
        let count = stream.borrow().len() / tile_len;
        let mut core = FatCore::new(stream, EntrySizing::Fixed(tile_len), 0, Box::new(NoHooks));
        for i in 0..count {
            core.push_entry(i * tile_len, tile_len, 0, EntryAttrs::empty(), TILE_TYPE);
        }
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            depth,
        })
    }

    fn tile_len(&self) -> usize {
        match self.depth {
            ColourDepth::Cga => CGA_TILE_LEN,
            _ => EGA_TILE_LEN,
        }
    }
}

impl Tileset for CatacombTileset {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::HAS_DIMENSIONS
    }

    fn depth(&self) -> ColourDepth {
        self.depth
    }

    fn tile_dimensions(&self) -> Point {
        TILE
    }

    fn layout_width(&self) -> u32 {
        2
    }

    fn files(&self) -> Vec<FatEntry> {
        self.core.borrow().files_snapshot()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let entry = EntryStream::open(&self.core, index)?;
        Ok(match self.depth {
            ColourDepth::Cga => Box::new(CodecImage::new(
                entry,
                0,
                TILE,
                Codec::RowLinear(ega::cga_layout()),
                ColourDepth::Cga,
                Some(Palette::default_cga(CgaPalette::CyanMagentaWhiteBright)),
            )),
            _ => Box::new(CodecImage::new(
                entry,
                0,
                TILE,
                Codec::Planar(ega_planes()),
                ColourDepth::Ega,
                Some(Palette::default_ega()),
            )),
        })
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        let len = self.tile_len();
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

pub struct CatacombEgaFormat;

impl TilesetFormat for CatacombEgaFormat {
    fn code(&self) -> &'static str {
        "tls-catacomb-ega"
    }

    fn friendly_name(&self) -> &'static str {
        "Catacomb EGA Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["cat", "ca2"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Catacomb", "Catacomb II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        if len == CAT1_TILES * EGA_TILE_LEN || len == CAT2_TILES * EGA_TILE_LEN {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(if len % EGA_TILE_LEN == 0 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(CatacombTileset::open(stream, ColourDepth::Ega)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

pub struct CatacombCgaFormat;

impl TilesetFormat for CatacombCgaFormat {
    fn code(&self) -> &'static str {
        "tls-catacomb-cga"
    }

    fn friendly_name(&self) -> &'static str {
        "Catacomb CGA Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["cat", "ca2"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Catacomb", "Catacomb II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        if len == CAT1_TILES * CGA_TILE_LEN || len == CAT2_TILES * CGA_TILE_LEN {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(if len % CGA_TILE_LEN == 0 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(CatacombTileset::open(stream, ColourDepth::Cga)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn known_game_sizes_probe_as_definite() -> Result<()> {
        assert_eq!(
            CatacombEgaFormat.probe(&MemStream::from(vec![0; CAT1_TILES * EGA_TILE_LEN]))?,
            Certainty::DefinitelyYes
        );
        assert_eq!(
            CatacombCgaFormat.probe(&MemStream::from(vec![0; CAT2_TILES * CGA_TILE_LEN]))?,
            Certainty::DefinitelyYes
        );
        assert_eq!(
            CatacombEgaFormat.probe(&MemStream::from(vec![0; 33]))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn ega_tiles_are_planar() -> Result<()> {
        // Blue plane solid, others empty.
        let mut tile = vec![0u8; EGA_TILE_LEN];
        for b in tile[..8].iter_mut() {
            *b = 0xFF;
        }
        let ts = CatacombEgaFormat.open(MemStream::wrap(tile), &SuppData::new())?;
        let buf = ts.open_image(0)?.to_pixels()?;
        assert!(buf.pixels.iter().all(|&p| p == 0x01));
        Ok(())
    }

    #[test]
    fn cga_tiles_are_2bpp_linear() -> Result<()> {
        // Every byte 0b11_10_01_00: pixels 3,2,1,0 repeated.
        let tile = vec![0xE4u8; CGA_TILE_LEN];
        let ts = CatacombCgaFormat.open(MemStream::wrap(tile), &SuppData::new())?;
        let img = ts.open_image(0)?;
        assert_eq!(img.depth(), ColourDepth::Cga);
        let buf = img.to_pixels()?;
        assert_eq!(&buf.pixels[..8], &[3, 2, 1, 0, 3, 2, 1, 0]);
        // The bright cyan/magenta palette rides along.
        let pal = img.palette().unwrap();
        assert_eq!(pal.len(), 4);
        assert_eq!(pal.rgb_bytes(3), [0xFF, 0xFF, 0xFF]);
        Ok(())
    }

    #[test]
    fn cga_round_trip_is_exact() -> Result<()> {
        let tile: Vec<u8> = (0..CGA_TILE_LEN as u8).collect();
        let stream = MemStream::wrap(tile.clone());
        let ts = CatacombCgaFormat.open(stream.clone(), &SuppData::new())?;
        let mut img = ts.open_image(0)?;
        let buf = img.to_pixels()?;
        img.from_pixels(&buf)?;
        assert_eq!(stream.borrow().read_all()?, tile);
        Ok(())
    }
}
