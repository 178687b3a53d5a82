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

// Major Stryker: 16x16 headerless EGA tile grids on the shared Apogee
// layout, solid and masked.

use anyhow::Result;
use apogee::{EgaGridTileset, PlaneCount};
use img::SuppData;
use pix::{Certainty, Point};
use stream::{Stream, StreamRef};
use tls::{Tileset, TilesetFormat};

const TILE: Point = Point::new(16, 16);
const TILE_LEN_SOLID: usize = 2 * 16 * 4;
const TILE_LEN_MASKED: usize = 2 * 16 * 5;

/// Standard tileset: 20x12 tiles.
const SIZE_STANDARD: usize = 20 * 12 * TILE_LEN_SOLID;
/// Backdrop: 16x10 tiles.
const SIZE_BACKDROP: usize = 16 * 10 * TILE_LEN_SOLID;
/// Masked tileset: 20x12 tiles.
const SIZE_MASKED: usize = 20 * 12 * TILE_LEN_MASKED;

pub struct StrykerTilesetFormat;

impl TilesetFormat for StrykerTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-stryker"
    }

    fn friendly_name(&self) -> &'static str {
        "Major Stryker Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["dr1"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Major Stryker"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(match stream.len() {
            SIZE_STANDARD | SIZE_BACKDROP => Certainty::PossiblyYes,
            _ => Certainty::DefinitelyNo,
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        // Backdrops lay out 16 tiles per row instead of 20.
        let layout = if stream.borrow().len() == SIZE_BACKDROP {
            16
        } else {
            20
        };
        Ok(Box::new(EgaGridTileset::open(
            stream,
            TILE,
            PlaneCount::Solid,
            layout,
            None,
        )?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        stream.borrow_mut().truncate(0)?;
        self.open(stream, supps)
    }
}

pub struct StrykerMaskedTilesetFormat;

impl TilesetFormat for StrykerMaskedTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-stryker-masked"
    }

    fn friendly_name(&self) -> &'static str {
        "Major Stryker Masked Tileset"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["dr1"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Major Stryker"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == SIZE_MASKED {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        Ok(Box::new(EgaGridTileset::open(
            stream,
            TILE,
            PlaneCount::Masked,
            20,
            None,
        )?))
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
    fn probe_distinguishes_the_grid_sizes() -> Result<()> {
        assert_eq!(
            StrykerTilesetFormat.probe(&MemStream::from(vec![0; SIZE_STANDARD]))?,
            Certainty::PossiblyYes
        );
        assert_eq!(
            StrykerTilesetFormat.probe(&MemStream::from(vec![0; SIZE_MASKED]))?,
            Certainty::DefinitelyNo
        );
        assert_eq!(
            StrykerMaskedTilesetFormat.probe(&MemStream::from(vec![0; SIZE_MASKED]))?,
            Certainty::PossiblyYes
        );
        Ok(())
    }

    #[test]
    fn backdrops_hint_their_own_layout_width() -> Result<()> {
        let ts = StrykerTilesetFormat.open(
            MemStream::wrap(vec![0; SIZE_BACKDROP]),
            &SuppData::new(),
        )?;
        assert_eq!(ts.layout_width(), 16);
        assert_eq!(ts.files().len(), 160);

        let ts = StrykerTilesetFormat.open(
            MemStream::wrap(vec![0; SIZE_STANDARD]),
            &SuppData::new(),
        )?;
        assert_eq!(ts.layout_width(), 20);
        Ok(())
    }
}
