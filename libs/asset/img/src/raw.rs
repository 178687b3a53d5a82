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

// The workhorse image type. Most formats are "some pixel codec over a
// stream region, maybe with a fixed header in front", so one struct
// tagged with its codec configuration covers them; formats with richer
// headers wrap or reimplement it.

use crate::{Image, ImageCaps};
use anyhow::{ensure, Result};
use ega::PlaneLayout;
use pal::Palette;
use pix::{ColourDepth, GfxError, PixelBuffer, Point};
use std::cell::RefCell;
use stream::StreamRef;

/// Which byte layout the pixels use on disk.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Whole planes back to back (EGA).
    Planar(PlaneLayout),
    /// Planes interleaved one byte at a time (EGA).
    BytePlanar(PlaneLayout),
    /// Byte-planar inside row-major 8x8 chunks (EGA).
    BytePlanarTiled(PlaneLayout),
    /// Plane bits packed per pixel (CGA 2bpp and friends).
    RowLinear(PlaneLayout),
    /// One byte per pixel (VGA).
    Linear8,
    /// VGA mode-X four-plane layout.
    ModeX,
}

impl Codec {
    /// Stream bytes one image of `dims` occupies in this codec.
    pub fn encoded_len(&self, dims: Point) -> usize {
        match self {
            Codec::Planar(p) | Codec::BytePlanar(p) | Codec::BytePlanarTiled(p) => {
                ega::layout_len(dims, p)
            }
            Codec::RowLinear(p) => (dims.x as usize * p.len() + 7) / 8 * dims.y as usize,
            Codec::Linear8 | Codec::ModeX => dims.area(),
        }
    }
}

/// An image whose entire on-disk form is a codec over one stream
/// region, optionally preceded by a header the owner manages.
pub struct CodecImage {
    stream: StreamRef,
    offset: usize,
    dims: Point,
    codec: Codec,
    depth: ColourDepth,
    pal: Option<Palette>,
    caps: ImageCaps,
    cache: RefCell<Option<PixelBuffer>>,
}

impl CodecImage {
    pub fn new(
        stream: StreamRef,
        offset: usize,
        dims: Point,
        codec: Codec,
        depth: ColourDepth,
        pal: Option<Palette>,
    ) -> Self {
        let mut caps = ImageCaps::empty();
        if pal.is_some() {
            caps |= ImageCaps::HAS_PALETTE;
        }
        Self {
            stream,
            offset,
            dims,
            codec,
            depth,
            pal,
            caps,
            cache: RefCell::new(None),
        }
    }

    /// Add capability flags (e.g. SET_DIMENSIONS for formats whose
    /// owner rewrites a dimension header).
    pub fn with_caps(mut self, extra: ImageCaps) -> Self {
        self.caps |= extra;
        self
    }

    pub fn stream(&self) -> StreamRef {
        self.stream.clone()
    }

    fn decode(&self) -> Result<PixelBuffer> {
        let s = self.stream.borrow();
        let s: &dyn stream::Stream = &*s;
        match &self.codec {
            Codec::Planar(p) => ega::decode_planar(s, self.offset, self.dims, p),
            Codec::BytePlanar(p) => ega::decode_byte_planar(s, self.offset, self.dims, p),
            Codec::BytePlanarTiled(p) => {
                ega::decode_byte_planar_tiled(s, self.offset, self.dims, p)
            }
            Codec::RowLinear(p) => ega::decode_linear(s, self.offset, self.dims, p),
            Codec::Linear8 => vga::decode_linear(s, self.offset, self.dims),
            Codec::ModeX => vga::decode_mode_x(s, self.offset, self.dims),
        }
    }

    fn encode(&self, buf: &PixelBuffer) -> Result<()> {
        let mut s = self.stream.borrow_mut();
        let s: &mut dyn stream::Stream = &mut *s;
        match &self.codec {
            Codec::Planar(p) => ega::encode_planar(s, self.offset, self.dims, p, buf),
            Codec::BytePlanar(p) => ega::encode_byte_planar(s, self.offset, self.dims, p, buf),
            Codec::BytePlanarTiled(p) => {
                ega::encode_byte_planar_tiled(s, self.offset, self.dims, p, buf)
            }
            Codec::RowLinear(p) => ega::encode_linear(s, self.offset, self.dims, p, buf),
            Codec::Linear8 => vga::encode_linear(s, self.offset, self.dims, buf),
            Codec::ModeX => vga::encode_mode_x(s, self.offset, self.dims, buf),
        }
    }
}

impl Image for CodecImage {
    fn caps(&self) -> ImageCaps {
        self.caps
    }

    fn depth(&self) -> ColourDepth {
        self.depth
    }

    fn dimensions(&self) -> Point {
        self.dims
    }

    fn set_dimensions(&mut self, dims: Point) -> Result<()> {
        ensure!(
            self.caps.contains(ImageCaps::SET_DIMENSIONS),
            GfxError::InvariantViolation("this image is a fixed size".into())
        );
        ensure!(
            dims.x > 0 && dims.y > 0,
            GfxError::InvariantViolation(format!("cannot resize to {}x{}", dims.x, dims.y))
        );
        self.dims = dims;
        self.cache.replace(None);
        let new_len = self.offset + self.codec.encoded_len(dims);
        self.stream.borrow_mut().truncate(new_len)
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        ensure!(
            self.caps.contains(ImageCaps::SET_PALETTE),
            GfxError::InvariantViolation("this image's palette is stored elsewhere".into())
        );
        self.pal = Some(pal.clone());
        Ok(())
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = self.decode()?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        self.encode(buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}
