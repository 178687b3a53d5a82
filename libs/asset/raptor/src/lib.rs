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

// Raptor PIC images: a 20-byte header (three unknown words, then width
// and height as 32-bit values) followed by linear VGA data.

use anyhow::{ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{supp, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem};
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::cell::RefCell;
use stream::{Stream, StreamRef};

const HEADER_LEN: usize = 20;
const DIMS_OFFSET: usize = 12;

pub struct RaptorPicImage {
    stream: StreamRef,
    dims: Point,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl RaptorPicImage {
    pub fn open(stream: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        let got = stream.borrow().read_at_most(0, &mut header)?;
        ensure!(
            got == HEADER_LEN,
            GfxError::InvalidFormat(format!("PIC header truncated at {got} bytes"))
        );
        let dims = Point::new(
            LittleEndian::read_u32(&header[DIMS_OFFSET..]) as i32,
            LittleEndian::read_u32(&header[DIMS_OFFSET + 4..]) as i32,
        );
        Ok(Self {
            stream,
            dims,
            pal,
            cache: RefCell::new(None),
        })
    }
}

impl Image for RaptorPicImage {
    fn caps(&self) -> ImageCaps {
        let mut caps = ImageCaps::SET_DIMENSIONS;
        if self.pal.is_some() {
            caps |= ImageCaps::HAS_PALETTE;
        }
        caps
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        self.dims
    }

    fn set_dimensions(&mut self, dims: Point) -> Result<()> {
        ensure!(
            dims.x > 0 && dims.y > 0,
            GfxError::InvariantViolation(format!("cannot resize to {}x{}", dims.x, dims.y))
        );
        self.dims = dims;
        self.cache.replace(None);
        let mut s = self.stream.borrow_mut();
        s.truncate(HEADER_LEN + dims.area())?;
        let mut buf = [0u8; 8];
        LittleEndian::write_u32(&mut buf[0..], dims.x as u32);
        LittleEndian::write_u32(&mut buf[4..], dims.y as u32);
        s.write_at(DIMS_OFFSET, &buf)
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = vga::decode_linear(&*self.stream.borrow(), HEADER_LEN, self.dims)?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            buf.dims == self.dims,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, image is {}x{}",
                buf.dims.x, buf.dims.y, self.dims.x, self.dims.y
            ))
        );
        vga::encode_linear(&mut *self.stream.borrow_mut(), HEADER_LEN, self.dims, buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct RaptorPicFormat;

impl ImageFormat for RaptorPicFormat {
    fn code(&self) -> &'static str {
        "img-pic-raptor"
    }

    fn friendly_name(&self) -> &'static str {
        "Raptor PIC image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["pic"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Raptor"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        if stream.len() < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut header = [0u8; HEADER_LEN];
        stream.read_at(0, &mut header)?;
        let w = LittleEndian::read_u32(&header[DIMS_OFFSET..]) as usize;
        let h = LittleEndian::read_u32(&header[DIMS_OFFSET + 4..]) as usize;
        Ok(
            if w.checked_mul(h)
                .map(|px| px + HEADER_LEN == stream.len())
                .unwrap_or(false)
            {
                Certainty::DefinitelyYes
            } else {
                Certainty::DefinitelyNo
            },
        )
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = match supp(supps, SuppItem::Palette) {
            Some(s) => {
                let data = s.borrow().read_all()?;
                Some(Palette::from_bytes(&data, PaletteDepth::Six)?)
            }
            None => None,
        };
        Ok(Box::new(RaptorPicImage::open(stream, pal)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(HEADER_LEN + 1)?;
            let mut header = [0u8; HEADER_LEN];
            LittleEndian::write_u32(&mut header[0..], 1);
            LittleEndian::write_u32(&mut header[4..], 1);
            LittleEndian::write_u32(&mut header[DIMS_OFFSET..], 1);
            LittleEndian::write_u32(&mut header[DIMS_OFFSET + 4..], 1);
            s.write_at(0, &header)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "palette_dat".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn pic(w: u32, h: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut data[DIMS_OFFSET..], w);
        LittleEndian::write_u32(&mut data[DIMS_OFFSET + 4..], h);
        data.extend((0..w * h).map(|i| i as u8));
        data
    }

    #[test]
    fn probe_matches_header_against_length() -> Result<()> {
        assert_eq!(
            RaptorPicFormat.probe(&MemStream::from(pic(6, 4)))?,
            Certainty::DefinitelyYes
        );
        let mut bad = pic(6, 4);
        bad.push(0);
        assert_eq!(
            RaptorPicFormat.probe(&MemStream::from(bad))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn dimensions_come_from_the_header() -> Result<()> {
        let img = RaptorPicFormat.open(MemStream::wrap(pic(6, 4)), &SuppData::new())?;
        assert_eq!(img.dimensions(), Point::new(6, 4));
        assert_eq!(img.to_pixels()?.pixels[0], 0);
        assert_eq!(img.to_pixels()?.pixels[23], 23);
        Ok(())
    }

    #[test]
    fn resizing_rewrites_header_and_data_length() -> Result<()> {
        let stream = MemStream::wrap(pic(6, 4));
        let mut img = RaptorPicFormat.open(stream.clone(), &SuppData::new())?;
        img.set_dimensions(Point::new(3, 2))?;
        let mut buf = PixelBuffer::new(Point::new(3, 2));
        buf.pixels.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        img.from_pixels(&buf)?;
        let raw = stream.borrow().read_all()?;
        assert_eq!(raw.len(), HEADER_LEN + 6);
        assert_eq!(LittleEndian::read_u32(&raw[DIMS_OFFSET..]), 3);
        assert_eq!(&raw[HEADER_LEN..], &[1, 2, 3, 4, 5, 6]);
        Ok(())
    }
}
