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

// The headerless EGA tile grid shared by the Apogee-engine games
// (Cosmo, Major Stryker, Duke Nukem II's CZones): a file that is
// nothing but fixed-size byte-planar tiles back to back, solid or with
// a leading transparency plane.

use anyhow::Result;
use ega::{PlaneLayout, PlanePurpose};
use img::{Codec, CodecImage, Image};
use pal::Palette;
use pix::{ColourDepth, Point};
use std::{cell::RefCell, rc::Rc};
use stream::StreamRef;
use tls::{
    EntryAttrs, EntrySizing, EntryStream, FatCore, FatEntry, FatRef, NoHooks, Tileset, TilesetCaps,
};

const TYPE_TAG: &str = "tile/apogee-ega";

/// Number of planes per tile.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlaneCount {
    Solid,
    Masked,
}

impl PlaneCount {
    pub fn planes(&self) -> usize {
        match self {
            PlaneCount::Solid => 4,
            PlaneCount::Masked => 5,
        }
    }

    pub fn layout(&self) -> PlaneLayout {
        match self {
            PlaneCount::Solid => vec![
                PlanePurpose::Blue1,
                PlanePurpose::Green1,
                PlanePurpose::Red1,
                PlanePurpose::Intensity1,
            ],
            // The transparency plane comes first; a set bit means the
            // pixel is transparent.
            PlaneCount::Masked => vec![
                PlanePurpose::Opaque1,
                PlanePurpose::Blue1,
                PlanePurpose::Green1,
                PlanePurpose::Red1,
                PlanePurpose::Intensity1,
            ],
        }
    }
}

/// Bytes per tile for the given geometry.
pub fn tile_len(tile_dims: Point, planes: PlaneCount) -> usize {
    (tile_dims.x as usize / 8) * tile_dims.y as usize * planes.planes()
}

pub struct EgaGridTileset {
    core: FatRef,
    tile_dims: Point,
    planes: PlaneCount,
    layout_width: u32,
    pal: Option<Palette>,
}

impl EgaGridTileset {
    /// Map every complete tile in the stream. Trailing part-tiles are
    /// left alone (some Monster Bash files carry one spare byte).
    pub fn open(
        stream: StreamRef,
        tile_dims: Point,
        planes: PlaneCount,
        layout_width: u32,
        pal: Option<Palette>,
    ) -> Result<Self> {
        let len_tile = tile_len(tile_dims, planes);
        let count = stream.borrow().len() / len_tile;
        let mut core = FatCore::new(
            stream,
            EntrySizing::Fixed(len_tile),
            0,
            Box::new(NoHooks),
        );
        for i in 0..count {
            core.push_entry(i * len_tile, len_tile, 0, EntryAttrs::empty(), TYPE_TAG);
        }
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            tile_dims,
            planes,
            layout_width,
            pal,
        })
    }

    fn len_tile(&self) -> usize {
        tile_len(self.tile_dims, self.planes)
    }
}

impl Tileset for EgaGridTileset {
    fn caps(&self) -> TilesetCaps {
        let mut caps = TilesetCaps::HAS_DIMENSIONS;
        if self.pal.is_some() {
            caps |= TilesetCaps::HAS_PALETTE;
        }
        caps
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn tile_dimensions(&self) -> Point {
        self.tile_dims
    }

    fn layout_width(&self) -> u32 {
        self.layout_width
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
            self.tile_dims,
            Codec::BytePlanar(self.planes.layout()),
            ColourDepth::Ega,
            self.pal.clone(),
        )))
    }

    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry> {
        let len = self.len_tile();
        self.core.borrow_mut().insert(before, len, TYPE_TAG, attrs)
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
