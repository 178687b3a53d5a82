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

// Row-linear packing: instead of separate planes, each pixel's plane
// bits sit next to each other, MSB-first, first layout entry first.
// With the CGA layout {Green1, Blue1} this is the usual 2bpp format
// where each byte holds four pixels. Rows start on byte boundaries.

use crate::{decode_bit, encode_bit, PlaneLayout, PlaneOp};
use anyhow::{ensure, Result};
use log::warn;
use pix::{GfxError, PixelBuffer, Point};
use stream::Stream;

fn check_args(dims: Point, planes: &PlaneLayout) -> Result<()> {
    ensure!(
        dims.x > 0 && dims.y > 0,
        GfxError::InvalidFormat(format!("impossible dimensions {}x{}", dims.x, dims.y))
    );
    ensure!(
        (1..=6).contains(&planes.len()),
        GfxError::InvalidFormat(format!("plane layout has {} entries", planes.len()))
    );
    ensure!(
        8 % planes.len() == 0,
        GfxError::InvalidFormat(format!(
            "row-linear packing needs a bit depth dividing 8, not {}",
            planes.len()
        ))
    );
    Ok(())
}

fn stride(dims: Point, bpp: usize) -> usize {
    (dims.x as usize * bpp + 7) / 8
}

/// Decode row-linear packed pixels.
pub fn decode_linear(
    stream: &dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
) -> Result<PixelBuffer> {
    check_args(dims, planes)?;
    let bpp = planes.len();
    let ops: Vec<PlaneOp> = planes.iter().map(|p| p.op()).collect();
    let row_bytes = stride(dims, bpp);
    let mut data = vec![0u8; row_bytes * dims.y as usize];
    let avail = stream.read_at_most(offset, &mut data)?;

    let mut out = PixelBuffer::new(dims);
    for y in 0..dims.y {
        for x in 0..dims.x {
            let bit_pos = x as usize * bpp;
            let src = y as usize * row_bytes + bit_pos / 8;
            if src >= avail {
                warn!("row-linear data ends early; returning partial image");
                return Ok(out);
            }
            let idx = (y * dims.x + x) as usize;
            for (p, op) in ops.iter().enumerate() {
                let shift = 7 - (bit_pos % 8) - p;
                let bit = (data[src] >> shift) & 1 == 1;
                decode_bit(op, bit, &mut out.pixels[idx], &mut out.mask[idx]);
            }
        }
    }
    Ok(out)
}

/// Encode row-linear packed pixels, resizing the stream to fit.
pub fn encode_linear(
    stream: &mut dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
    buf: &PixelBuffer,
) -> Result<()> {
    check_args(dims, planes)?;
    ensure!(
        buf.dims == dims,
        GfxError::InvariantViolation(format!(
            "pixel buffer is {}x{}, image is {}x{}",
            buf.dims.x, buf.dims.y, dims.x, dims.y
        ))
    );
    let bpp = planes.len();
    let ops: Vec<PlaneOp> = planes.iter().map(|p| p.op()).collect();
    let row_bytes = stride(dims, bpp);
    let mut data = vec![0u8; row_bytes * dims.y as usize];

    for y in 0..dims.y {
        for x in 0..dims.x {
            let idx = (y * dims.x + x) as usize;
            let bit_pos = x as usize * bpp;
            let dst = y as usize * row_bytes + bit_pos / 8;
            for (p, op) in ops.iter().enumerate() {
                if encode_bit(op, buf.pixels[idx], buf.mask[idx]) {
                    data[dst] |= 1 << (7 - (bit_pos % 8) - p);
                }
            }
        }
    }

    stream.truncate(offset + data.len())?;
    stream.write_at(offset, &data)?;
    Ok(())
}

/// The CGA plane assignment: first bit green, second bit blue, so each
/// 2-bit group reads directly as the CGA colour number.
pub fn cga_layout() -> PlaneLayout {
    vec![crate::PlanePurpose::Green1, crate::PlanePurpose::Blue1]
}
