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

use crate::{decode_bit, encode_bit, layout_len, PlaneLayout, PlaneOp, PlanePurpose};
use anyhow::{ensure, Result};
use log::warn;
use pix::{GfxError, PixelBuffer, Point};
use stream::Stream;

/// Side of the chunks in the tiled variant.
const CHUNK: i32 = 8;

fn check_args(dims: Point, planes: &PlaneLayout) -> Result<()> {
    ensure!(
        dims.x > 0 && dims.y > 0,
        GfxError::InvalidFormat(format!("impossible dimensions {}x{}", dims.x, dims.y))
    );
    ensure!(
        (1..=6).contains(&planes.len()),
        GfxError::InvalidFormat(format!("plane layout has {} entries", planes.len()))
    );
    Ok(())
}

// In byte-planar data the planes are interleaved per byte: for each
// row, for each 8-pixel cell, one byte per plane in layout order.

fn decode_cell(
    planes: &[(PlanePurpose, PlaneOp)],
    data: &[u8],
    src: &mut usize,
    avail: usize,
    out: &mut PixelBuffer,
    x: i32,
    y: i32,
) -> bool {
    let dims = out.dims;
    for (_, op) in planes {
        if *src >= avail {
            return false;
        }
        let byte = data[*src];
        *src += 1;
        let low = if x + 8 > dims.x { 8 - (dims.x % 8) } else { 0 };
        let mut idx = (y * dims.x + x) as usize;
        for b in (low..8).rev() {
            let bit = (byte >> b) & 1 == 1;
            decode_bit(op, bit, &mut out.pixels[idx], &mut out.mask[idx]);
            idx += 1;
        }
    }
    true
}

fn encode_cell(
    planes: &[(PlanePurpose, PlaneOp)],
    data: &mut [u8],
    dst: &mut usize,
    buf: &PixelBuffer,
    x: i32,
    y: i32,
) {
    let dims = buf.dims;
    for (purpose, op) in planes {
        let mut c = 0u8;
        for b in 0..8 {
            let px = x + b;
            let bit = if px < dims.x {
                let idx = (y * dims.x + px) as usize;
                encode_bit(op, buf.pixels[idx], buf.mask[idx])
            } else {
                purpose.pad_bit()
            };
            if bit {
                c |= 0x80 >> b;
            }
        }
        data[*dst] = c;
        *dst += 1;
    }
}

fn present_planes(planes: &PlaneLayout) -> Vec<(PlanePurpose, PlaneOp)> {
    planes
        .iter()
        .filter(|p| p.occupies_stream())
        .map(|p| (*p, p.op()))
        .collect()
}

/// Decode byte-planar data. A short stream yields the partial image.
pub fn decode_byte_planar(
    stream: &dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
) -> Result<PixelBuffer> {
    check_args(dims, planes)?;
    let mut data = vec![0u8; layout_len(dims, planes)];
    let avail = stream.read_at_most(offset, &mut data)?;
    let ops = present_planes(planes);

    let mut out = PixelBuffer::new(dims);
    let mut src = 0usize;
    for y in 0..dims.y {
        for x in (0..dims.x).step_by(8) {
            if !decode_cell(&ops, &data, &mut src, avail, &mut out, x, y) {
                warn!("byte-planar EGA data ends early; returning partial image");
                return Ok(out);
            }
        }
    }
    Ok(out)
}

/// Encode into byte-planar layout, resizing the stream to fit.
pub fn encode_byte_planar(
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
    let mut data = vec![0u8; layout_len(dims, planes)];
    let ops = present_planes(planes);

    let mut dst = 0usize;
    for y in 0..dims.y {
        for x in (0..dims.x).step_by(8) {
            encode_cell(&ops, &mut data, &mut dst, buf, x, y);
        }
    }

    stream.truncate(offset + data.len())?;
    stream.write_at(offset, &data)?;
    Ok(())
}

fn check_tiled(dims: Point) -> Result<()> {
    ensure!(
        dims.x % CHUNK == 0 && dims.y % CHUNK == 0,
        GfxError::InvalidFormat(format!(
            "byte-planar-tiled images must be multiples of 8, not {}x{}",
            dims.x, dims.y
        ))
    );
    Ok(())
}

/// Decode the tiled variant: the image is a row-major grid of 8x8
/// chunks, each chunk stored byte-planar.
pub fn decode_byte_planar_tiled(
    stream: &dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
) -> Result<PixelBuffer> {
    check_args(dims, planes)?;
    check_tiled(dims)?;
    let mut data = vec![0u8; layout_len(dims, planes)];
    let avail = stream.read_at_most(offset, &mut data)?;
    let ops = present_planes(planes);

    let mut out = PixelBuffer::new(dims);
    let mut src = 0usize;
    for cy in 0..dims.y / CHUNK {
        for cx in 0..dims.x / CHUNK {
            for ty in 0..CHUNK {
                if !decode_cell(&ops, &data, &mut src, avail, &mut out, cx * CHUNK, cy * CHUNK + ty)
                {
                    warn!("tiled EGA data ends early; returning partial image");
                    return Ok(out);
                }
            }
        }
    }
    Ok(out)
}

/// Encode the tiled variant.
pub fn encode_byte_planar_tiled(
    stream: &mut dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
    buf: &PixelBuffer,
) -> Result<()> {
    check_args(dims, planes)?;
    check_tiled(dims)?;
    ensure!(
        buf.dims == dims,
        GfxError::InvariantViolation(format!(
            "pixel buffer is {}x{}, image is {}x{}",
            buf.dims.x, buf.dims.y, dims.x, dims.y
        ))
    );
    let mut data = vec![0u8; layout_len(dims, planes)];
    let ops = present_planes(planes);

    let mut dst = 0usize;
    for cy in 0..dims.y / CHUNK {
        for cx in 0..dims.x / CHUNK {
            for ty in 0..CHUNK {
                encode_cell(&ops, &mut data, &mut dst, buf, cx * CHUNK, cy * CHUNK + ty);
            }
        }
    }

    stream.truncate(offset + data.len())?;
    stream.write_at(offset, &data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn bgri() -> PlaneLayout {
        vec![
            PlanePurpose::Blue1,
            PlanePurpose::Green1,
            PlanePurpose::Red1,
            PlanePurpose::Intensity1,
        ]
    }

    #[test]
    fn rows_interleave_one_byte_per_plane() -> Result<()> {
        // 8x2, four planes: row 0 all white, row 1 all red.
        let s = MemStream::from(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0x00]);
        let out = decode_byte_planar(&s, 0, Point::new(8, 2), &bgri())?;
        assert!(out.pixels[..8].iter().all(|&p| p == 0x0F));
        assert!(out.pixels[8..].iter().all(|&p| p == 0x04));
        Ok(())
    }

    #[test]
    fn last_row_of_a_solid_tile_decodes_like_the_reference() -> Result<()> {
        // The tail of a known 8x8 Cosmo tile: row 7 is 7C 01 81 FD.
        let mut data = vec![0u8; 28];
        data.extend([0x7C, 0x01, 0x81, 0xFD]);
        let s = MemStream::from(data);
        let out = decode_byte_planar(&s, 0, Point::new(8, 8), &bgri())?;
        assert_eq!(out.pixels[56], 0x0C);
        assert_eq!(out.pixels[57], 0x09);
        assert_eq!(out.pixels[63], 0x0E);
        Ok(())
    }

    #[test]
    fn byte_planar_round_trips_masked_tiles() -> Result<()> {
        let planes = vec![
            PlanePurpose::Opaque0,
            PlanePurpose::Blue1,
            PlanePurpose::Green1,
            PlanePurpose::Red1,
            PlanePurpose::Intensity1,
        ];
        let dims = Point::new(16, 16);
        let mut buf = PixelBuffer::new(dims);
        for i in 0..buf.pixels.len() {
            buf.pixels[i] = (i % 16) as u8;
            if i % 5 == 0 {
                buf.mask[i] = pix::Mask::TRANSPARENT.bits();
                buf.pixels[i] = 0;
            }
        }
        let mut s = MemStream::new();
        encode_byte_planar(&mut s, 0, dims, &planes, &buf)?;
        assert_eq!(s.len(), 16 / 8 * 16 * 5);
        let back = decode_byte_planar(&s, 0, dims, &planes)?;
        assert_eq!(back, buf);
        Ok(())
    }

    #[test]
    fn tiled_layout_stores_whole_chunks_consecutively() -> Result<()> {
        let planes = vec![PlanePurpose::Intensity1];
        let dims = Point::new(16, 8);
        let mut buf = PixelBuffer::new(dims);
        // Light up only the right-hand 8x8 chunk.
        for y in 0..8 {
            for x in 8..16 {
                buf.pixels[(y * 16 + x) as usize] = 0x08;
            }
        }
        let mut s = MemStream::new();
        encode_byte_planar_tiled(&mut s, 0, dims, &planes, &buf)?;
        // First chunk all zero, second chunk all ones.
        assert_eq!(&s.as_slice()[..8], &[0u8; 8]);
        assert_eq!(&s.as_slice()[8..], &[0xFFu8; 8]);
        let back = decode_byte_planar_tiled(&s, 0, dims, &planes)?;
        assert_eq!(back, buf);
        Ok(())
    }

    #[test]
    fn tiled_rejects_unaligned_dimensions() {
        let s = MemStream::new();
        assert!(decode_byte_planar_tiled(&s, 0, Point::new(12, 8), &bgri()).is_err());
    }
}
