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

use crate::{decode_bit, encode_bit, layout_len, row_stride, PlaneLayout, PlaneOp};
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
    Ok(())
}

/// Decode a whole-plane-at-a-time EGA image: all of plane 0's bytes,
/// then all of plane 1's, rows MSB-first within each plane. A short
/// stream yields the partial image with the remainder left black.
pub fn decode_planar(
    stream: &dyn Stream,
    offset: usize,
    dims: Point,
    planes: &PlaneLayout,
) -> Result<PixelBuffer> {
    check_args(dims, planes)?;
    let stride = row_stride(dims.x);
    let plane_len = stride * dims.y as usize;
    let mut data = vec![0u8; layout_len(dims, planes)];
    let avail = stream.read_at_most(offset, &mut data)?;

    let mut out = PixelBuffer::new(dims);
    let mut src = 0usize;
    for purpose in planes {
        let op = purpose.op();
        match op {
            PlaneOp::Skip => continue,
            PlaneOp::Blank => {
                src += plane_len;
                continue;
            }
            PlaneOp::Bit { .. } => {}
        }
        for y in 0..dims.y {
            for x in (0..dims.x).step_by(8) {
                if src >= avail {
                    warn!("planar EGA data ends early; returning partial image");
                    return Ok(out);
                }
                let byte = data[src];
                src += 1;
                let low = if x + 8 > dims.x { 8 - (dims.x % 8) } else { 0 };
                let mut idx = (y * dims.x + x) as usize;
                for b in (low..8).rev() {
                    let bit = (byte >> b) & 1 == 1;
                    decode_bit(&op, bit, &mut out.pixels[idx], &mut out.mask[idx]);
                    idx += 1;
                }
            }
        }
    }
    Ok(out)
}

/// Encode into whole-plane layout, resizing the stream to exactly hold
/// the planes starting at `offset`.
pub fn encode_planar(
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
    let stride = row_stride(dims.x);
    let plane_len = stride * dims.y as usize;
    let mut data = vec![0u8; layout_len(dims, planes)];

    let mut dst = 0usize;
    for purpose in planes {
        let op = purpose.op();
        match op {
            PlaneOp::Skip => continue,
            PlaneOp::Blank => {
                dst += plane_len;
                continue;
            }
            PlaneOp::Bit { .. } => {}
        }
        for y in 0..dims.y {
            for x in (0..dims.x).step_by(8) {
                let mut c = 0u8;
                for b in 0..8 {
                    let px = x + b;
                    let bit = if px < dims.x {
                        let idx = (y * dims.x + px) as usize;
                        encode_bit(&op, buf.pixels[idx], buf.mask[idx])
                    } else {
                        purpose.pad_bit()
                    };
                    if bit {
                        c |= 0x80 >> b;
                    }
                }
                data[dst] = c;
                dst += 1;
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
    use crate::PlanePurpose;
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
    fn decodes_single_plane_bits_msb_first() -> Result<()> {
        let mut s = MemStream::from(vec![0b1010_0000]);
        let out = decode_planar(&s, 0, Point::new(8, 1), &vec![PlanePurpose::Intensity1])?;
        assert_eq!(out.pixels, &[8, 0, 8, 0, 0, 0, 0, 0]);
        // Round trip.
        encode_planar(&mut s, 0, Point::new(8, 1), &vec![PlanePurpose::Intensity1], &out)?;
        assert_eq!(s.as_slice(), &[0b1010_0000]);
        Ok(())
    }

    #[test]
    fn four_planes_compose_a_palette_index() -> Result<()> {
        // Pixel 0 gets all four bits, pixel 7 only green.
        let s = MemStream::from(vec![0x80, 0x81, 0x80, 0x80]);
        let out = decode_planar(&s, 0, Point::new(8, 1), &bgri())?;
        assert_eq!(out.pixels[0], 0x0F);
        assert_eq!(out.pixels[7], 0x02);
        assert_eq!(out.mask, vec![0; 8]);
        Ok(())
    }

    #[test]
    fn non_byte_aligned_widths_round_trip_with_clear_padding() -> Result<()> {
        let dims = Point::new(11, 3);
        let mut buf = PixelBuffer::new(dims);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = (i % 16) as u8;
        }
        let mut s = MemStream::new();
        encode_planar(&mut s, 0, dims, &bgri(), &buf)?;
        assert_eq!(s.len(), 2 * 3 * 4);
        // Padding bits of every colour plane are clear.
        for plane in 0..4 {
            for y in 0..3 {
                let b = s.as_slice()[plane * 6 + y * 2 + 1];
                assert_eq!(b & 0x1F, 0, "padding bits set in plane {plane} row {y}");
            }
        }
        let back = decode_planar(&s, 0, dims, &bgri())?;
        assert_eq!(back.pixels, buf.pixels);
        Ok(())
    }

    #[test]
    fn opaque_plane_encodes_padding_as_transparent() -> Result<()> {
        let dims = Point::new(12, 1);
        let buf = PixelBuffer::new(dims); // fully opaque
        let planes = vec![PlanePurpose::Opaque1, PlanePurpose::Blue1];
        let mut s = MemStream::new();
        encode_planar(&mut s, 0, dims, &planes, &buf)?;
        // Opaque1: set bit = transparent, so image bits clear, pad bits set.
        assert_eq!(s.as_slice()[0], 0x00);
        assert_eq!(s.as_slice()[1], 0x0F);
        let back = decode_planar(&s, 0, dims, &planes)?;
        assert_eq!(back.mask, buf.mask);
        Ok(())
    }

    #[test]
    fn blank_planes_occupy_bytes_but_contribute_nothing() -> Result<()> {
        let s = MemStream::from(vec![0xFF, 0x80]);
        let planes = vec![PlanePurpose::Blank, PlanePurpose::Green1];
        let out = decode_planar(&s, 0, Point::new(8, 1), &planes)?;
        assert_eq!(out.pixels[0], 0x02);
        assert_eq!(out.pixels[1], 0x00);
        Ok(())
    }

    #[test]
    fn short_stream_yields_partial_image() -> Result<()> {
        // Two planes declared but only the first present.
        let s = MemStream::from(vec![0xF0]);
        let planes = vec![PlanePurpose::Blue1, PlanePurpose::Green1];
        let out = decode_planar(&s, 0, Point::new(8, 1), &planes)?;
        assert_eq!(out.pixels, &[1, 1, 1, 1, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn hit_plane_lands_in_the_touch_bit() -> Result<()> {
        let s = MemStream::from(vec![0xC0]);
        let out = decode_planar(&s, 0, Point::new(8, 1), &vec![PlanePurpose::Hit1])?;
        assert_eq!(out.mask[0], pix::Mask::TOUCH.bits());
        assert_eq!(out.mask[2], 0);
        assert_eq!(out.pixels, vec![0; 8]);
        Ok(())
    }
}
