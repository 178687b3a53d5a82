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

mod fat;
mod image_list;
mod mosaic;

pub use fat::{EntrySizing, EntryStream, FatCore, FatHooks, FatIo, FatRef, NoHooks};
pub use image_list::{ImageListItem, SplitMode, TilesetFromImageList};
pub use mosaic::ImageFromTileset;

use anyhow::{bail, Result};
use bitflags::bitflags;
use img::{Image, SuppData, SuppFilenames};
use pal::Palette;
use pix::{Certainty, ColourDepth, GfxError, Point};
use stream::{Stream, StreamRef};

bitflags! {
    /// What a tileset handler supports.
    pub struct TilesetCaps: u32 {
        const HAS_DIMENSIONS = 0x01;
        const SET_DIMENSIONS = 0x02;
        const HAS_PALETTE = 0x04;
        const SET_PALETTE = 0x08;
    }
}

bitflags! {
    /// Per-entry attribute flags.
    pub struct EntryAttrs: u32 {
        /// Entry is a sub-tileset, not an image.
        const FOLDER = 0x01;
        /// Slot is reserved but holds no usable data.
        const VACANT = 0x02;
    }
}

/// One slot in a tileset's allocation table. `offset` is absolute
/// within the tileset stream; `header_size` covers any per-entry
/// embedded header that belongs to the slot but not to its content.
#[derive(Debug, Clone)]
pub struct FatEntry {
    /// Stable handle; survives inserts and removals of other entries.
    pub id: u64,
    /// Current position in the entry list.
    pub index: usize,
    pub offset: usize,
    pub stored_size: usize,
    pub real_size: usize,
    pub header_size: usize,
    pub attrs: EntryAttrs,
    pub type_tag: String,
    pub valid: bool,
}

impl FatEntry {
    /// End of this entry's region, header included.
    pub fn end(&self) -> usize {
        self.offset + self.header_size + self.stored_size
    }
}

/// A named integer attribute a tileset format stores in its header
/// (e.g. the Comic II tile-classification words).
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub desc: &'static str,
    pub value: i64,
    pub min: i64,
    pub max: i64,
}

/// An ordered collection of tiles, possibly nested. Mutations keep the
/// in-memory table and the backing stream consistent at every step;
/// `flush` persists whatever a format defers.
pub trait Tileset {
    fn caps(&self) -> TilesetCaps;
    fn depth(&self) -> ColourDepth;

    /// Size of every tile, or (0,0) when tiles vary.
    fn tile_dimensions(&self) -> Point {
        Point::new(0, 0)
    }

    /// Change the size of every tile. Image data becomes undefined.
    fn set_tile_dimensions(&mut self, dims: Point) -> Result<()> {
        let _ = dims;
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are a fixed size".into()
        ))
    }

    /// Editor hint: tiles per row, zero for no preference.
    fn layout_width(&self) -> u32 {
        0
    }

    fn palette(&self) -> Option<Palette> {
        None
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        let _ = pal;
        bail!(GfxError::InvariantViolation(
            "this tileset's palette is stored elsewhere".into()
        ))
    }

    /// Snapshot of the entry list, in offset order.
    fn files(&self) -> Vec<FatEntry>;

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>>;

    fn open_tileset(&self, index: usize) -> Result<Box<dyn Tileset>> {
        let _ = index;
        bail!(GfxError::InvariantViolation(
            "this tileset has no sub-tilesets".into()
        ))
    }

    /// Insert a new entry before `before` (append when `None`), filled
    /// with the format's default content. Returns the new entry.
    fn insert(&mut self, before: Option<usize>, attrs: EntryAttrs) -> Result<FatEntry>;

    fn remove(&mut self, index: usize) -> Result<()>;

    fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()>;

    /// Reorder: move `from` so it sits before `before` (or last).
    fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()>;

    /// Header-level integer attributes.
    fn attributes(&self) -> Vec<Attribute> {
        Vec::new()
    }

    fn set_attribute(&mut self, index: usize, value: i64) -> Result<()> {
        let _ = (index, value);
        bail!(GfxError::InvariantViolation(
            "this tileset has no attributes".into()
        ))
    }

    /// Persist pending header/FAT rewrites.
    fn flush(&mut self) -> Result<()>;
}

/// A format handler for tileset files.
pub trait TilesetFormat {
    /// Stable identifier, e.g. `"tls-cosmo"`.
    fn code(&self) -> &'static str;
    fn friendly_name(&self) -> &'static str;

    fn extensions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn games(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Classify how likely `stream` is to hold this format. Probes
    /// never fail on malformed content, only on real stream errors.
    fn probe(&self, stream: &dyn Stream) -> Result<Certainty>;

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>>;

    /// Initialise `stream` as a minimal valid file, then open it.
    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>>;

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let _ = filename;
        SuppFilenames::new()
    }
}
