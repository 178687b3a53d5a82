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

// Presents a grid of same-sized tiles as one large image. Reading
// blits every constituent tile into the composite; writing cuts the
// composite back up and writes each tile through its own handler.

use crate::Tileset;
use anyhow::{ensure, Result};
use img::{Image, ImageCaps};
use pal::Palette;
use pix::{ColourDepth, GfxError, PixelBuffer, Point};
use std::cell::RefCell;

pub struct ImageFromTileset {
    tileset: Box<dyn Tileset>,
    first: usize,
    span: usize,
    dims_in_tiles: Point,
    dims: Point,
    cache: RefCell<Option<PixelBuffer>>,
}

impl ImageFromTileset {
    /// `first` is the index of the top-left tile, `span` the number of
    /// tiles from one row to the next.
    pub fn new(
        tileset: Box<dyn Tileset>,
        first: usize,
        span: usize,
        dims_in_tiles: Point,
    ) -> Result<Self> {
        let tile = tileset.tile_dimensions();
        ensure!(
            !tile.is_zero(),
            GfxError::InvalidFormat(
                "cannot compose an image from variable-size tiles".into()
            )
        );
        ensure!(
            dims_in_tiles.x > 0 && dims_in_tiles.y > 0,
            GfxError::InvalidFormat(format!(
                "mosaic needs a positive tile grid, not {}x{}",
                dims_in_tiles.x, dims_in_tiles.y
            ))
        );
        let needed = first + (dims_in_tiles.y as usize - 1) * span + dims_in_tiles.x as usize;
        ensure!(
            needed <= tileset.files().len(),
            GfxError::InvalidFormat(format!(
                "mosaic needs {needed} tiles, tileset has {}",
                tileset.files().len()
            ))
        );
        let dims = Point::new(tile.x * dims_in_tiles.x, tile.y * dims_in_tiles.y);
        Ok(Self {
            tileset,
            first,
            span,
            dims_in_tiles,
            dims,
            cache: RefCell::new(None),
        })
    }

    pub fn into_tileset(self) -> Box<dyn Tileset> {
        self.tileset
    }

    fn compose(&self) -> Result<PixelBuffer> {
        let tile_dims = self.tileset.tile_dimensions();
        let mut out = PixelBuffer::new(self.dims);
        let mut row_start = self.first;
        for ty in 0..self.dims_in_tiles.y {
            for tx in 0..self.dims_in_tiles.x {
                let tile = self.tileset.open_image(row_start + tx as usize)?;
                let src = tile.to_pixels()?;
                let dst_off = ty * tile_dims.y * self.dims.x + tx * tile_dims.x;
                for y in 0..tile_dims.y {
                    let d = (dst_off + y * self.dims.x) as usize;
                    let s = (y * tile_dims.x) as usize;
                    let w = tile_dims.x as usize;
                    out.pixels[d..d + w].copy_from_slice(&src.pixels[s..s + w]);
                    out.mask[d..d + w].copy_from_slice(&src.mask[s..s + w]);
                }
            }
            row_start += self.span;
        }
        Ok(out)
    }

    fn decompose(&mut self, buf: &PixelBuffer) -> Result<()> {
        let tile_dims = self.tileset.tile_dimensions();
        let mut row_start = self.first;
        for ty in 0..self.dims_in_tiles.y {
            for tx in 0..self.dims_in_tiles.x {
                let mut tile_buf = PixelBuffer::new(tile_dims);
                let src_off = ty * tile_dims.y * self.dims.x + tx * tile_dims.x;
                for y in 0..tile_dims.y {
                    let s = (src_off + y * self.dims.x) as usize;
                    let d = (y * tile_dims.x) as usize;
                    let w = tile_dims.x as usize;
                    tile_buf.pixels[d..d + w].copy_from_slice(&buf.pixels[s..s + w]);
                    tile_buf.mask[d..d + w].copy_from_slice(&buf.mask[s..s + w]);
                }
                let mut tile = self.tileset.open_image(row_start + tx as usize)?;
                tile.from_pixels(&tile_buf)?;
            }
            row_start += self.span;
        }
        Ok(())
    }
}

impl Image for ImageFromTileset {
    fn caps(&self) -> ImageCaps {
        if self.tileset.palette().is_some() {
            ImageCaps::HAS_PALETTE
        } else {
            ImageCaps::empty()
        }
    }

    fn depth(&self) -> ColourDepth {
        self.tileset.depth()
    }

    fn dimensions(&self) -> Point {
        self.dims
    }

    fn palette(&self) -> Option<Palette> {
        self.tileset.palette()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = self.compose()?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            buf.dims == self.dims,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, mosaic is {}x{}",
                buf.dims.x, buf.dims.y, self.dims.x, self.dims.y
            ))
        );
        self.decompose(buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}
