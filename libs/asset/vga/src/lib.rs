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

// VGA pixel codecs: linear chunky data (one byte per pixel), the
// mode-X four-plane arrangement, and the byte-interleaved layout that
// spreads an image across four separate streams.

use anyhow::{ensure, Result};
use log::warn;
use pix::{GfxError, PixelBuffer, Point};
use stream::Stream;

fn check_dims(dims: Point) -> Result<()> {
    ensure!(
        dims.x > 0 && dims.y > 0,
        GfxError::InvalidFormat(format!("impossible dimensions {}x{}", dims.x, dims.y))
    );
    Ok(())
}

/// Linear chunky VGA: `pixels[i] = stream[offset + i]`. The mask comes
/// back all-opaque; a short stream leaves the remainder black.
pub fn decode_linear(stream: &dyn Stream, offset: usize, dims: Point) -> Result<PixelBuffer> {
    check_dims(dims)?;
    let mut out = PixelBuffer::new(dims);
    let avail = stream.read_at_most(offset, &mut out.pixels)?;
    if avail < out.pixels.len() {
        warn!(
            "linear VGA data ends early ({avail} of {} bytes); returning partial image",
            out.pixels.len()
        );
    }
    Ok(out)
}

/// Linear chunky VGA encode; the mask is dropped. Resizes the stream to
/// end exactly after the pixel data.
pub fn encode_linear(
    stream: &mut dyn Stream,
    offset: usize,
    dims: Point,
    buf: &PixelBuffer,
) -> Result<()> {
    check_dims(dims)?;
    ensure!(
        buf.dims == dims,
        GfxError::InvariantViolation(format!(
            "pixel buffer is {}x{}, image is {}x{}",
            buf.dims.x, buf.dims.y, dims.x, dims.y
        ))
    );
    stream.truncate(offset + buf.pixels.len())?;
    stream.write_at(offset, &buf.pixels)?;
    Ok(())
}

fn check_mode_x(dims: Point) -> Result<()> {
    check_dims(dims)?;
    ensure!(
        dims.x % 4 == 0,
        GfxError::InvalidFormat(format!(
            "mode-X images must be a multiple of 4 wide, not {}",
            dims.x
        ))
    );
    Ok(())
}

/// Mode-X planar VGA: four contiguous planes of `W/4 * H` bytes, pixel
/// (x, y) in plane `x % 4` at `y * W/4 + x/4`.
pub fn decode_mode_x(stream: &dyn Stream, offset: usize, dims: Point) -> Result<PixelBuffer> {
    check_mode_x(dims)?;
    let mut out = PixelBuffer::new(dims);
    let mut src = vec![0u8; dims.area()];
    let avail = stream.read_at_most(offset, &mut src)?;
    if avail < src.len() {
        warn!(
            "mode-X data ends early ({avail} of {} bytes); returning partial image",
            src.len()
        );
    }
    let plane_size = dims.area() / 4;
    for (i, &b) in src[..avail].iter().enumerate() {
        out.pixels[i % plane_size * 4 + i / plane_size] = b;
    }
    Ok(out)
}

/// Mode-X planar VGA encode; resizes the stream to fit.
pub fn encode_mode_x(
    stream: &mut dyn Stream,
    offset: usize,
    dims: Point,
    buf: &PixelBuffer,
) -> Result<()> {
    check_mode_x(dims)?;
    ensure!(
        buf.dims == dims,
        GfxError::InvariantViolation(format!(
            "pixel buffer is {}x{}, image is {}x{}",
            buf.dims.x, buf.dims.y, dims.x, dims.y
        ))
    );
    let plane_size = dims.area() / 4;
    let mut data = vec![0u8; dims.area()];
    for (i, b) in data.iter_mut().enumerate() {
        *b = buf.pixels[i % plane_size * 4 + i / plane_size];
    }
    stream.truncate(offset + data.len())?;
    stream.write_at(offset, &data)?;
    Ok(())
}

/// Byte-interleaved VGA across four separate streams: stream `p` holds
/// the columns with `x % 4 == p`, row-major in natural order.
pub fn decode_interleaved(streams: [&dyn Stream; 4], dims: Point) -> Result<PixelBuffer> {
    check_mode_x(dims)?;
    let mut out = PixelBuffer::new(dims);
    let cols = (dims.x / 4) as usize;
    for (p, s) in streams.iter().enumerate() {
        let mut plane = vec![0u8; cols * dims.y as usize];
        let avail = s.read_at_most(0, &mut plane)?;
        if avail < plane.len() {
            warn!("interleaved plane {p} ends early; leaving remainder black");
        }
        for y in 0..dims.y as usize {
            for x in 0..cols {
                out.pixels[y * dims.x as usize + x * 4 + p] = plane[y * cols + x];
            }
        }
    }
    Ok(out)
}

/// Byte-interleaved VGA encode; each plane stream is resized to fit.
pub fn encode_interleaved(
    streams: [&mut dyn Stream; 4],
    dims: Point,
    buf: &PixelBuffer,
) -> Result<()> {
    check_mode_x(dims)?;
    ensure!(
        buf.dims == dims,
        GfxError::InvariantViolation(format!(
            "pixel buffer is {}x{}, image is {}x{}",
            buf.dims.x, buf.dims.y, dims.x, dims.y
        ))
    );
    let cols = (dims.x / 4) as usize;
    for (p, s) in streams.into_iter().enumerate() {
        let mut plane = vec![0u8; cols * dims.y as usize];
        for y in 0..dims.y as usize {
            for x in 0..cols {
                plane[y * cols + x] = buf.pixels[y * dims.x as usize + x * 4 + p];
            }
        }
        s.truncate(plane.len())?;
        s.write_at(0, &plane)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn linear_is_a_straight_copy() -> Result<()> {
        let s = MemStream::from(vec![9, 8, 7, 6]);
        let out = decode_linear(&s, 0, Point::new(2, 2))?;
        assert_eq!(out.pixels, &[9, 8, 7, 6]);
        assert_eq!(out.mask, &[0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn mode_x_places_columns_in_planes() -> Result<()> {
        // 4x2 image: plane p holds column p, two rows each.
        let s = MemStream::from(vec![0, 4, 1, 5, 2, 6, 3, 7]);
        let out = decode_mode_x(&s, 0, Point::new(4, 2))?;
        assert_eq!(out.pixels, &[0, 1, 2, 3, 4, 5, 6, 7]);

        let mut s2 = MemStream::new();
        encode_mode_x(&mut s2, 0, Point::new(4, 2), &out)?;
        assert_eq!(s2.as_slice(), s.as_slice());
        Ok(())
    }

    #[test]
    fn mode_x_rejects_ragged_widths() {
        let s = MemStream::new();
        assert!(decode_mode_x(&s, 0, Point::new(6, 2)).is_err());
    }

    #[test]
    fn interleaved_streams_round_trip() -> Result<()> {
        let dims = Point::new(8, 3);
        let mut buf = PixelBuffer::new(dims);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = i as u8;
        }
        let mut planes = [
            MemStream::new(),
            MemStream::new(),
            MemStream::new(),
            MemStream::new(),
        ];
        {
            let [a, b, c, d] = &mut planes;
            encode_interleaved([a, b, c, d], dims, &buf)?;
        }
        // Plane 0 holds columns 0 and 4.
        assert_eq!(&planes[0].as_slice()[..2], &[0, 4]);
        let out = decode_interleaved(
            [&planes[0], &planes[1], &planes[2], &planes[3]],
            dims,
        )?;
        assert_eq!(out.pixels, buf.pixels);
        Ok(())
    }

    #[test]
    fn short_linear_data_leaves_the_tail_black() -> Result<()> {
        let s = MemStream::from(vec![5, 5]);
        let out = decode_linear(&s, 0, Point::new(2, 2))?;
        assert_eq!(out.pixels, &[5, 5, 0, 0]);
        Ok(())
    }
}
