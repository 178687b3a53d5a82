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

// Shadow Warrior 1993 beta: column-interleaved VGA images, stored
// either as one file with per-plane width bytes, as four separate
// plane files for the wide backgrounds, or as raw 64x64 wall tiles.

use anyhow::{bail, ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use img::{
    supp, Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem,
};
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::cell::RefCell;
use stream::{Stream, StreamRef};

/// Plane stream length of a background image.
const BG_PLANE_LEN: usize = 32100;
const BG_DIMS: Point = Point::new(428 * 4, 75);

fn load_palette(supps: &SuppData) -> Result<Option<Palette>> {
    Ok(match supp(supps, SuppItem::Palette) {
        Some(s) => {
            let data = s.borrow().read_all()?;
            Some(Palette::from_bytes(&data, PaletteDepth::Six)?)
        }
        None => None,
    })
}

//
// img-sw93beta-planar
//

/// Single-file planar image: u8 height, u16 width, then four planes
/// each led by its own width byte. Plane p holds the columns with
/// x % 4 == p.
pub struct Sw93PlanarImage {
    stream: StreamRef,
    dims: Point,
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl Sw93PlanarImage {
    pub fn open(stream: StreamRef, pal: Option<Palette>) -> Result<Self> {
        let mut header = [0u8; 3];
        stream.borrow().read_at_most(0, &mut header)?;
        let dims = Point::new(
            LittleEndian::read_u16(&header[1..]) as i32,
            header[0] as i32,
        );
        Ok(Self {
            stream,
            dims,
            pal,
            cache: RefCell::new(None),
        })
    }

    fn decode(&self) -> Result<PixelBuffer> {
        let dims = self.dims;
        let data = self.stream.borrow().read_all()?;
        let mut out = PixelBuffer::new(dims);
        let mut pos = 3usize;
        for p in 0..4usize {
            ensure!(
                pos < data.len(),
                GfxError::IncompleteRead {
                    expected: pos + 1,
                    actual: data.len()
                }
            );
            let plane_width = data[pos] as usize;
            pos += 1;
            let plane_len = plane_width * dims.y as usize;
            ensure!(
                pos + plane_len <= data.len(),
                GfxError::IncompleteRead {
                    expected: pos + plane_len,
                    actual: data.len()
                }
            );
            for y in 0..dims.y as usize {
                for x in 0..plane_width {
                    let d = y * dims.x as usize + x * 4 + p;
                    if d >= out.pixels.len() {
                        break;
                    }
                    out.pixels[d] = data[pos + y * plane_width + x];
                }
            }
            pos += plane_len;
        }
        Ok(out)
    }

    fn encode(&self, buf: &PixelBuffer) -> Result<()> {
        let dims = self.dims;
        let mut out = Vec::new();
        out.push(dims.y as u8);
        out.extend_from_slice(&(dims.x as u16).to_le_bytes());
        for p in 0..4usize {
            let plane_width = (dims.x as usize + (3 - p)) / 4;
            out.push(plane_width as u8);
            for y in 0..dims.y as usize {
                for x in (p..dims.x as usize).step_by(4) {
                    out.push(buf.pixels[y * dims.x as usize + x]);
                }
            }
        }
        let mut s = self.stream.borrow_mut();
        s.truncate(out.len())?;
        s.write_at(0, &out)?;
        Ok(())
    }
}

impl Image for Sw93PlanarImage {
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
            dims.y <= 255,
            GfxError::InvariantViolation(
                "these images must be less than 256 pixels high".into()
            )
        );
        ensure!(
            dims.x >= 0 && dims.y >= 0 && dims.x <= 0xFFFF,
            GfxError::InvariantViolation(format!("cannot resize to {}x{}", dims.x, dims.y))
        );
        self.dims = dims;
        self.cache.replace(None);
        Ok(())
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
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
        ensure!(
            buf.dims == self.dims,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, image is {}x{}",
                buf.dims.x, buf.dims.y, self.dims.x, self.dims.y
            ))
        );
        self.encode(buf)?;
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct Sw93PlanarFormat;

impl ImageFormat for Sw93PlanarFormat {
    fn code(&self) -> &'static str {
        "img-sw93beta-planar"
    }

    fn friendly_name(&self) -> &'static str {
        "Shadow Warrior 1993 Beta Planar image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        // .DAT format code, exposed as an extension by the archive
        // layer.
        vec!["138"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Shadow Warrior 1993 Beta"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        if data.len() < 7 {
            return Ok(Certainty::DefinitelyNo);
        }
        let height = data[0] as usize;
        let mut pos = 3usize;
        for _ in 0..4 {
            if pos >= data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
            let plane_width = data[pos] as usize;
            pos += 1 + plane_width * height;
            if pos > data.len() {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(if pos == data.len() {
            Certainty::DefinitelyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(Sw93PlanarImage::open(stream, load_palette(supps)?)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(7)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "Palette1.134".to_string());
        supps
    }
}

//
// img-sw93beta-bg-planar
//

/// Background image split over four plane files.
pub struct Sw93BgPlanarImage {
    planes: [StreamRef; 4],
    pal: Option<Palette>,
    cache: RefCell<Option<PixelBuffer>>,
}

impl Image for Sw93BgPlanarImage {
    fn caps(&self) -> ImageCaps {
        if self.pal.is_some() {
            ImageCaps::HAS_PALETTE
        } else {
            ImageCaps::empty()
        }
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        BG_DIMS
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let guards: Vec<_> = self.planes.iter().map(|p| p.borrow()).collect();
        let buf = vga::decode_interleaved(
            [&*guards[0], &*guards[1], &*guards[2], &*guards[3]],
            BG_DIMS,
        )?;
        drop(guards);
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            buf.dims == BG_DIMS,
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, backgrounds are {}x{}",
                buf.dims.x, buf.dims.y, BG_DIMS.x, BG_DIMS.y
            ))
        );
        {
            let mut guards: Vec<_> = self.planes.iter().map(|p| p.borrow_mut()).collect();
            let [a, b, c, d] = guards.as_mut_slice() else {
                unreachable!("four plane streams");
            };
            vga::encode_interleaved([&mut **a, &mut **b, &mut **c, &mut **d], BG_DIMS, buf)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct Sw93BgPlanarFormat;

impl ImageFormat for Sw93BgPlanarFormat {
    fn code(&self) -> &'static str {
        "img-sw93beta-bg-planar"
    }

    fn friendly_name(&self) -> &'static str {
        "Shadow Warrior 1993 Beta Background Planar image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["130"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Shadow Warrior 1993 Beta"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == BG_PLANE_LEN {
            Certainty::Unsure
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = load_palette(supps)?;
        let mut planes = vec![stream];
        for item in [SuppItem::Extra1, SuppItem::Extra2, SuppItem::Extra3] {
            planes.push(supp(supps, item).ok_or_else(|| {
                GfxError::InvalidFormat("missing supplementary file for a plane".into())
            })?);
        }
        let planes: [StreamRef; 4] = planes
            .try_into()
            .unwrap_or_else(|_| unreachable!("collected four streams"));
        Ok(Box::new(Sw93BgPlanarImage {
            planes,
            pal,
            cache: RefCell::new(None),
        }))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        for item in [SuppItem::Extra1, SuppItem::Extra2, SuppItem::Extra3] {
            match supp(supps, item) {
                Some(s) => s.borrow_mut().truncate(BG_PLANE_LEN)?,
                None => bail!(GfxError::InvalidFormat(
                    "missing supplementary file for a plane".into()
                )),
            }
        }
        stream.borrow_mut().truncate(BG_PLANE_LEN)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let base = filename
            .rfind('.')
            .map(|dot| &filename[..dot + 1])
            .unwrap_or(filename)
            .to_string();
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "Palette1.134".to_string());
        supps.insert(SuppItem::Extra1, format!("{base}131"));
        supps.insert(SuppItem::Extra2, format!("{base}132"));
        supps.insert(SuppItem::Extra3, format!("{base}133"));
        supps
    }
}

//
// img-sw93beta-bg / img-sw93beta-wall
//

/// Single-file background strip, plain linear VGA.
pub struct Sw93BgFormat;

impl ImageFormat for Sw93BgFormat {
    fn code(&self) -> &'static str {
        "img-sw93beta-bg"
    }

    fn friendly_name(&self) -> &'static str {
        "Shadow Warrior 1993 Beta background image"
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Shadow Warrior 1993 Beta"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == BG_PLANE_LEN {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = load_palette(supps)?;
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            Point::new(1284, 25),
            Codec::Linear8,
            ColourDepth::Vga,
            pal,
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(BG_PLANE_LEN)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "Palette1.134".to_string());
        supps
    }
}

/// 64x64 wall tile, plain linear VGA.
pub struct Sw93WallFormat;

impl ImageFormat for Sw93WallFormat {
    fn code(&self) -> &'static str {
        "img-sw93beta-wall"
    }

    fn friendly_name(&self) -> &'static str {
        "Shadow Warrior 1993 Beta wall tile"
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Shadow Warrior 1993 Beta"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 64 * 64 {
            Certainty::Unsure
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = load_palette(supps)?;
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            Point::new(64, 64),
            Codec::Linear8,
            ColourDepth::Vga,
            pal,
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(64 * 64)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "Palette1.134".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn planar_image(w: u16, h: u8) -> Vec<u8> {
        let mut out = vec![h];
        out.extend_from_slice(&w.to_le_bytes());
        for p in 0..4usize {
            let plane_width = (w as usize + (3 - p)) / 4;
            out.push(plane_width as u8);
            out.extend(vec![(p + 1) as u8; plane_width * h as usize]);
        }
        out
    }

    #[test]
    fn planar_probe_walks_all_four_planes() -> Result<()> {
        assert_eq!(
            Sw93PlanarFormat.probe(&MemStream::from(planar_image(10, 3)))?,
            Certainty::DefinitelyYes
        );
        let mut bad = planar_image(10, 3);
        bad.pop();
        assert_eq!(
            Sw93PlanarFormat.probe(&MemStream::from(bad))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn planar_columns_interleave_on_decode() -> Result<()> {
        let img = Sw93PlanarFormat.open(MemStream::wrap(planar_image(8, 2)), &SuppData::new())?;
        assert_eq!(img.dimensions(), Point::new(8, 2));
        let buf = img.to_pixels()?;
        assert_eq!(&buf.pixels[..8], &[1, 2, 3, 4, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn planar_round_trips_ragged_widths() -> Result<()> {
        let reference = planar_image(10, 3);
        let stream = MemStream::wrap(reference.clone());
        let mut img = Sw93PlanarFormat.open(stream.clone(), &SuppData::new())?;
        let buf = img.to_pixels()?;
        img.from_pixels(&buf)?;
        assert_eq!(stream.borrow().read_all()?, reference);
        Ok(())
    }

    #[test]
    fn background_planes_come_from_four_streams() -> Result<()> {
        let mut supps = SuppData::new();
        let main = MemStream::wrap(vec![1u8; BG_PLANE_LEN]);
        supps.insert(SuppItem::Extra1, MemStream::wrap(vec![2u8; BG_PLANE_LEN]));
        supps.insert(SuppItem::Extra2, MemStream::wrap(vec![3u8; BG_PLANE_LEN]));
        supps.insert(SuppItem::Extra3, MemStream::wrap(vec![4u8; BG_PLANE_LEN]));
        let img = Sw93BgPlanarFormat.open(main, &supps)?;
        assert_eq!(img.dimensions(), BG_DIMS);
        let buf = img.to_pixels()?;
        assert_eq!(&buf.pixels[..8], &[1, 2, 3, 4, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn bg_planar_supp_names_follow_the_plane_numbering() {
        let supps = Sw93BgPlanarFormat.required_supps("backdrop.130");
        assert_eq!(supps[&SuppItem::Extra1], "backdrop.131");
        assert_eq!(supps[&SuppItem::Extra3], "backdrop.133");
        assert_eq!(supps[&SuppItem::Palette], "Palette1.134");
    }
}
