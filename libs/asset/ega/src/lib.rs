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

// EGA pixel codecs. Every EGA-era format in this corpus is some
// arrangement of 1-bit planes; a handler describes the arrangement with
// an ordered PlaneLayout and one of three byte orders:
//
//   planar            all of plane 0, then all of plane 1, ...
//   byte-planar       per row, per 8-pixel cell, one byte per plane
//   byte-planar-tiled byte-planar inside 8x8 chunks, chunks row-major
//
// plus the CGA 2bpp row-linear layout, which packs the plane bits of
// each pixel next to each other instead.

mod byteplanar;
mod linear;
mod planar;

pub use byteplanar::{decode_byte_planar, decode_byte_planar_tiled, encode_byte_planar,
                     encode_byte_planar_tiled};
pub use linear::{cga_layout, decode_linear, encode_linear};
pub use planar::{decode_planar, encode_planar};

use pix::Mask;

/// What one on-disk plane contributes to the decoded image. The
/// trailing digit says what a set bit means: `1` = the target bit is
/// present, `0` = inverted. For the mask planes: `Opaque0` means a set
/// bit is opaque, `Opaque1` means a set bit is transparent; `Hit1`
/// means a set bit sets the touch flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlanePurpose {
    /// Plane does not exist in the stream at all.
    Unused,
    /// Plane occupies stream bytes but contributes nothing.
    Blank,
    Blue0,
    Blue1,
    Green0,
    Green1,
    Red0,
    Red1,
    Intensity0,
    Intensity1,
    Hit0,
    Hit1,
    Opaque0,
    Opaque1,
}

/// Ordered list of plane roles, first plane first. One to six entries.
pub type PlaneLayout = Vec<PlanePurpose>;

/// Resolved read/write behaviour of one plane.
#[derive(Debug, Copy, Clone)]
pub(crate) enum PlaneOp {
    /// No bytes in the stream.
    Skip,
    /// Bytes in the stream, ignored on read, zeroed on write.
    Blank,
    /// A real plane: which buffer it lands in, which bit it carries,
    /// and whether the stream stores it inverted.
    Bit {
        to_mask: bool,
        value: u8,
        invert: bool,
    },
}

impl PlanePurpose {
    pub(crate) fn op(&self) -> PlaneOp {
        let bit = |to_mask, value, invert| PlaneOp::Bit { to_mask, value, invert };
        match self {
            PlanePurpose::Unused => PlaneOp::Skip,
            PlanePurpose::Blank => PlaneOp::Blank,
            PlanePurpose::Blue0 => bit(false, 0x01, true),
            PlanePurpose::Blue1 => bit(false, 0x01, false),
            PlanePurpose::Green0 => bit(false, 0x02, true),
            PlanePurpose::Green1 => bit(false, 0x02, false),
            PlanePurpose::Red0 => bit(false, 0x04, true),
            PlanePurpose::Red1 => bit(false, 0x04, false),
            PlanePurpose::Intensity0 => bit(false, 0x08, true),
            PlanePurpose::Intensity1 => bit(false, 0x08, false),
            PlanePurpose::Hit0 => bit(true, Mask::TOUCH.bits(), true),
            PlanePurpose::Hit1 => bit(true, Mask::TOUCH.bits(), false),
            // Opaque0: set bit = opaque, so the TRANSPARENT mask bit is
            // the inverse of the stream bit.
            PlanePurpose::Opaque0 => bit(true, Mask::TRANSPARENT.bits(), true),
            PlanePurpose::Opaque1 => bit(true, Mask::TRANSPARENT.bits(), false),
        }
    }

    /// Bit value for the don't-care padding bits at the end of each row
    /// when the width is not a multiple of 8: always cleared, except an
    /// Opaque-typed plane encodes the padding as transparent so the
    /// game never draws it.
    pub(crate) fn pad_bit(&self) -> bool {
        matches!(self, PlanePurpose::Opaque1)
    }

    /// Number of stream planes this purpose occupies.
    pub(crate) fn occupies_stream(&self) -> bool {
        !matches!(self, PlanePurpose::Unused)
    }
}

/// Row stride in bytes for a 1bpp plane of `width` pixels.
pub fn row_stride(width: i32) -> usize {
    (width as usize + 7) / 8
}

/// Stream bytes for one full set of planes over `dims`.
pub fn layout_len(dims: pix::Point, planes: &PlaneLayout) -> usize {
    let plane_len = row_stride(dims.x) * dims.y as usize;
    planes.iter().filter(|p| p.occupies_stream()).count() * plane_len
}

/// Encode one plane bit from the canonical buffers.
pub(crate) fn encode_bit(op: &PlaneOp, pixel: u8, mask: u8) -> bool {
    match op {
        PlaneOp::Skip | PlaneOp::Blank => false,
        PlaneOp::Bit { to_mask, value, invert } => {
            let src = if *to_mask { mask } else { pixel };
            ((src & value) != 0) ^ invert
        }
    }
}

/// Decode one stream bit into the canonical buffers.
pub(crate) fn decode_bit(op: &PlaneOp, bit: bool, pixel: &mut u8, mask: &mut u8) {
    if let PlaneOp::Bit { to_mask, value, invert } = op {
        if bit ^ invert {
            if *to_mask {
                *mask |= value;
            } else {
                *pixel |= value;
            }
        }
    }
}
