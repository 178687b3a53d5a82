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

// Shared vocabulary for every format crate: the canonical pixel/mask
// buffers that all codecs convert to and from, plus the handful of small
// types (points, colour depths, probe certainty, error kinds) that the
// rest of the workspace speaks in.

use bitflags::bitflags;
use thiserror::Error;

/// A position or size in pixels. Hotspots can sit outside the image, so
/// coordinates are signed.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Number of pixels covered when this point is a width/height pair.
    pub fn area(&self) -> usize {
        (self.x as usize) * (self.y as usize)
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// A rectangular region within a larger image.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn dimensions(&self) -> Point {
        Point::new(self.width, self.height)
    }
}

/// Colour depth of an image or tileset. Pixel indices in the canonical
/// buffer are always full bytes; the depth only constrains which palette
/// indices are valid.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ColourDepth {
    Mono,
    Cga,
    Ega,
    Vga,
}

impl ColourDepth {
    /// Largest number of colours this depth can address.
    pub fn max_colours(&self) -> usize {
        match self {
            ColourDepth::Mono => 2,
            ColourDepth::Cga => 4,
            ColourDepth::Ega => 16,
            ColourDepth::Vga => 256,
        }
    }
}

bitflags! {
    /// Per-pixel flags in the mask buffer. A pixel is opaque iff
    /// TRANSPARENT is clear.
    pub struct Mask: u8 {
        const TRANSPARENT = 0x01;
        const TOUCH = 0x02;
    }
}

/// The canonical in-memory image: row-major 8-bit palette indices plus a
/// parallel mask buffer of the same length.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PixelBuffer {
    pub dims: Point,
    pub pixels: Vec<u8>,
    pub mask: Vec<u8>,
}

impl PixelBuffer {
    /// An all-zero (black, fully opaque) buffer of the given size.
    pub fn new(dims: Point) -> Self {
        let len = dims.area();
        Self {
            dims,
            pixels: vec![0; len],
            mask: vec![0; len],
        }
    }

    pub fn from_parts(dims: Point, pixels: Vec<u8>, mask: Vec<u8>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            pixels.len() == dims.area() && mask.len() == dims.area(),
            GfxError::InvariantViolation(format!(
                "pixel buffer for {}x{} needs {} bytes per plane, got {}/{}",
                dims.x,
                dims.y,
                dims.area(),
                pixels.len(),
                mask.len()
            ))
        );
        Ok(Self { dims, pixels, mask })
    }

    pub fn pixel(&self, x: i32, y: i32) -> u8 {
        self.pixels[(y * self.dims.x + x) as usize]
    }

    pub fn mask_at(&self, x: i32, y: i32) -> Mask {
        Mask::from_bits_truncate(self.mask[(y * self.dims.x + x) as usize])
    }

    pub fn is_opaque(&self, x: i32, y: i32) -> bool {
        !self.mask_at(x, y).contains(Mask::TRANSPARENT)
    }
}

/// How confident a probe is that a stream holds its format.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Certainty {
    DefinitelyNo,
    Unsure,
    PossiblyYes,
    DefinitelyYes,
}

/// Error kinds shared by every format handler. These ride inside
/// `anyhow::Error`; callers that need to classify a failure downcast to
/// this type.
#[derive(Debug, Error)]
pub enum GfxError {
    /// Signature, length or dimension checks failed while opening.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The caller asked for something the format cannot represent.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The stream ended mid-decode. Decoders that can produce a
    /// meaningful partial image log a warning instead of raising this.
    #[error("incomplete read: wanted {expected} bytes, got {actual}")]
    IncompleteRead { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_round_trips_parts() -> anyhow::Result<()> {
        let dims = Point::new(4, 2);
        let buf = PixelBuffer::from_parts(dims, vec![1; 8], vec![0; 8])?;
        assert_eq!(buf.pixel(3, 1), 1);
        assert!(buf.is_opaque(0, 0));
        Ok(())
    }

    #[test]
    fn buffer_rejects_short_planes() {
        assert!(PixelBuffer::from_parts(Point::new(4, 2), vec![0; 7], vec![0; 8]).is_err());
    }

    #[test]
    fn certainty_orders_by_confidence() {
        assert!(Certainty::DefinitelyYes > Certainty::PossiblyYes);
        assert!(Certainty::PossiblyYes > Certainty::Unsure);
        assert!(Certainty::Unsure > Certainty::DefinitelyNo);
    }

    #[test]
    fn transparent_bit_controls_opacity() {
        let mut buf = PixelBuffer::new(Point::new(2, 1));
        buf.mask[1] = Mask::TRANSPARENT.bits();
        assert!(buf.is_opaque(0, 0));
        assert!(!buf.is_opaque(1, 0));
    }
}
