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

// Game-independent handlers: raw fullscreen dumps in the common pixel
// layouts, bare palette files, and the Terminal Velocity fog table.

use crate::{
    supp, with_extension, Codec, CodecImage, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames,
    SuppItem,
};
use anyhow::{bail, Result};
use ega::PlanePurpose;
use pal::{CgaPalette, Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use stream::{Stream, StreamRef};

const FULLSCREEN: Point = Point::new(320, 200);

fn load_supp_palette(supps: &SuppData, depth: PaletteDepth) -> Result<Option<Palette>> {
    Ok(match supp(supps, SuppItem::Palette) {
        Some(s) => {
            let data = s.borrow().read_all()?;
            Some(Palette::from_bytes(&data, depth)?)
        }
        None => None,
    })
}

fn blank_stream(stream: &StreamRef, len: usize) -> Result<()> {
    let mut s = stream.borrow_mut();
    s.truncate(0)?;
    s.truncate(len)
}

fn bgri() -> Vec<PlanePurpose> {
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
        PlanePurpose::Unused,
        PlanePurpose::Unused,
    ]
}

/// Raw VGA fullscreen image, 64000 bytes, palette in a companion file.
pub struct VgaRawFormat;
/// As `VgaRawFormat` with an 8-bit-per-channel companion palette.
pub struct VgaRaw8Format;

fn vga_raw_open(
    stream: StreamRef,
    supps: &SuppData,
    depth: PaletteDepth,
) -> Result<Box<dyn Image>> {
    let pal = load_supp_palette(supps, depth)?;
    Ok(Box::new(CodecImage::new(
        stream,
        0,
        FULLSCREEN,
        Codec::Linear8,
        ColourDepth::Vga,
        pal,
    )))
}

impl ImageFormat for VgaRawFormat {
    fn code(&self) -> &'static str {
        "img-vga-raw"
    }

    fn friendly_name(&self) -> &'static str {
        "Raw VGA fullscreen image (6-bit palette)"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["pal"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 64000 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        vga_raw_open(stream, supps, PaletteDepth::Six)
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 64000)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, with_extension(filename, "pal"));
        supps
    }
}

impl ImageFormat for VgaRaw8Format {
    fn code(&self) -> &'static str {
        "img-vga-raw8"
    }

    fn friendly_name(&self) -> &'static str {
        "Raw VGA fullscreen image (24-bit palette)"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["pal"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        VgaRawFormat.probe(stream)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        vga_raw_open(stream, supps, PaletteDepth::Eight)
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 64000)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        VgaRawFormat.required_supps(filename)
    }
}

/// Mode-X planar VGA fullscreen image.
pub struct ModeXRawFormat;
/// As `ModeXRawFormat` with an 8-bit companion palette.
pub struct ModeXRaw8Format;

fn mode_x_open(
    stream: StreamRef,
    supps: &SuppData,
    depth: PaletteDepth,
) -> Result<Box<dyn Image>> {
    let pal = load_supp_palette(supps, depth)?;
    Ok(Box::new(CodecImage::new(
        stream,
        0,
        FULLSCREEN,
        Codec::ModeX,
        ColourDepth::Vga,
        pal,
    )))
}

impl ImageFormat for ModeXRawFormat {
    fn code(&self) -> &'static str {
        "img-vga-planar"
    }

    fn friendly_name(&self) -> &'static str {
        "Planar VGA fullscreen image (6-bit palette)"
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 64000 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        mode_x_open(stream, supps, PaletteDepth::Six)
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 64000)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, with_extension(filename, "pal"));
        supps
    }
}

impl ImageFormat for ModeXRaw8Format {
    fn code(&self) -> &'static str {
        "img-vga-planar8"
    }

    fn friendly_name(&self) -> &'static str {
        "Planar VGA fullscreen image (24-bit palette)"
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        ModeXRawFormat.probe(stream)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        mode_x_open(stream, supps, PaletteDepth::Eight)
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 64000)?;
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        ModeXRawFormat.required_supps(filename)
    }
}

/// Raw planar EGA fullscreen image, BGRI plane order.
pub struct EgaRawPlanarFormat;

impl ImageFormat for EgaRawPlanarFormat {
    fn code(&self) -> &'static str {
        "img-ega-raw-planar-bgri"
    }

    fn friendly_name(&self) -> &'static str {
        "Raw planar EGA fullscreen image (BGRI)"
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 32000 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            FULLSCREEN,
            Codec::Planar(bgri()),
            ColourDepth::Ega,
            Some(Palette::default_ega()),
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 32000)?;
        self.open(stream, supps)
    }
}

/// Raw monochrome fullscreen image: one plane of 8000 bytes.
pub struct MonoRawFormat;

impl ImageFormat for MonoRawFormat {
    fn code(&self) -> &'static str {
        "img-mono-raw"
    }

    fn friendly_name(&self) -> &'static str {
        "Raw monochrome fullscreen image"
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 8000 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            FULLSCREEN,
            Codec::Planar(vec![PlanePurpose::Intensity1]),
            ColourDepth::Mono,
            Some(Palette::default_mono()),
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 8000)?;
        self.open(stream, supps)
    }
}

/// Raw CGA fullscreen image: 2bpp row-linear, 16000 bytes.
pub struct CgaRawLinearFormat;

impl ImageFormat for CgaRawLinearFormat {
    fn code(&self) -> &'static str {
        "img-cga-raw-linear"
    }

    fn friendly_name(&self) -> &'static str {
        "Raw CGA fullscreen image"
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == 16000 {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            FULLSCREEN,
            Codec::RowLinear(ega::cga_layout()),
            ColourDepth::Cga,
            Some(Palette::default_cga(CgaPalette::CyanMagentaWhite)),
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 16000)?;
        self.open(stream, supps)
    }
}

/// Terminal Velocity fog map: a 256x16 VGA image whose first row is the
/// identity ramp.
pub struct TvFogFormat;

const TV_FOG_DIMS: Point = Point::new(256, 16);

impl ImageFormat for TvFogFormat {
    fn code(&self) -> &'static str {
        "img-tv-fog"
    }

    fn friendly_name(&self) -> &'static str {
        "Terminal Velocity fog map"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["fog"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Terminal Velocity"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        if stream.len() != TV_FOG_DIMS.area() {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut start = [0u8; 256];
        stream.read_at(0, &mut start)?;
        for (i, &b) in start.iter().enumerate() {
            if b != i as u8 {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let pal = load_supp_palette(supps, PaletteDepth::Six)?;
        Ok(Box::new(CodecImage::new(
            stream,
            0,
            TV_FOG_DIMS,
            Codec::Linear8,
            ColourDepth::Vga,
            pal,
        )))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        let ramp: Vec<u8> = (0..TV_FOG_DIMS.area()).map(|i| (i % 256) as u8).collect();
        {
            let mut s = stream.borrow_mut();
            s.truncate(ramp.len())?;
            s.write_at(0, &ramp)?;
        }
        self.open(stream, supps)
    }

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, with_extension(filename, "act"));
        supps
    }
}

/// A palette file presented through the Image interface: its "pixels"
/// are the identity ramp, its palette is the file content.
pub struct PaletteImage {
    stream: StreamRef,
    pal: Palette,
}

impl PaletteImage {
    pub fn open(stream: StreamRef, depth: PaletteDepth) -> Result<Self> {
        let data = stream.borrow().read_all()?;
        let pal = Palette::from_bytes(&data, depth)?;
        Ok(Self { stream, pal })
    }
}

impl Image for PaletteImage {
    fn caps(&self) -> ImageCaps {
        ImageCaps::HAS_PALETTE | ImageCaps::SET_PALETTE
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Vga
    }

    fn dimensions(&self) -> Point {
        Point::new(self.pal.len() as i32, 1)
    }

    fn palette(&self) -> Option<Palette> {
        Some(self.pal.clone())
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        let bytes = pal.as_bytes();
        let mut s = self.stream.borrow_mut();
        s.truncate(bytes.len())?;
        s.write_at(0, &bytes)?;
        drop(s);
        self.pal = pal.clone();
        Ok(())
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        let mut buf = PixelBuffer::new(self.dimensions());
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = i as u8;
        }
        Ok(buf)
    }

    fn from_pixels(&mut self, _buf: &PixelBuffer) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "palette files have no pixel data".into()
        ))
    }
}

/// Standard VGA palette file, 6-bit channels, 16 or 256 entries.
pub struct VgaPaletteFormat;
/// 24-bit RGB palette file, 256 entries.
pub struct VgaPalette8Format;

impl ImageFormat for VgaPaletteFormat {
    fn code(&self) -> &'static str {
        "pal-vga-raw"
    }

    fn friendly_name(&self) -> &'static str {
        "Standard VGA palette"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["pal"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        let len = stream.len();
        if len != 16 * 3 && len != 256 * 3 {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut data = vec![0u8; stream.len()];
        stream.read_at(0, &mut data)?;
        // Some palettes use 64 instead of the notional max of 63.
        if data.iter().any(|&b| b > 64) {
            return Ok(Certainty::DefinitelyNo);
        }
        Ok(if data[..3] == [0, 0, 0] {
            Certainty::DefinitelyYes
        } else {
            Certainty::PossiblyYes
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(PaletteImage::open(stream, PaletteDepth::Six)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 256 * 3)?;
        self.open(stream, supps)
    }
}

impl ImageFormat for VgaPalette8Format {
    fn code(&self) -> &'static str {
        "pal-vga-raw8"
    }

    fn friendly_name(&self) -> &'static str {
        "8-bit per channel (24-bit RGB) palette"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["pal"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        if stream.len() != 256 * 3 {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut first = [0u8; 3];
        stream.read_at(0, &mut first)?;
        Ok(if first == [0, 0, 0] {
            Certainty::DefinitelyYes
        } else {
            Certainty::PossiblyYes
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(PaletteImage::open(stream, PaletteDepth::Eight)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        blank_stream(&stream, 256 * 3)?;
        self.open(stream, supps)
    }
}

// Probe sanity for the fixed-size handlers lives here so every format
// registered by this crate gets at least a smoke test.
#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn fixed_size_probes_classify_by_length() -> Result<()> {
        let fs = MemStream::from(vec![0; 64000]);
        let small = MemStream::from(vec![0; 100]);
        assert_eq!(VgaRawFormat.probe(&fs)?, Certainty::PossiblyYes);
        assert_eq!(VgaRawFormat.probe(&small)?, Certainty::DefinitelyNo);
        assert_eq!(ModeXRawFormat.probe(&fs)?, Certainty::PossiblyYes);
        assert_eq!(
            EgaRawPlanarFormat.probe(&MemStream::from(vec![0; 32000]))?,
            Certainty::PossiblyYes
        );
        assert_eq!(
            MonoRawFormat.probe(&MemStream::from(vec![0; 8000]))?,
            Certainty::PossiblyYes
        );
        Ok(())
    }

    #[test]
    fn tv_fog_requires_the_identity_ramp() -> Result<()> {
        let mut good: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(
            TvFogFormat.probe(&MemStream::from(good.clone()))?,
            Certainty::DefinitelyYes
        );
        good[5] = 0;
        assert_eq!(
            TvFogFormat.probe(&MemStream::from(good))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn palette_probe_rejects_out_of_range_channels() -> Result<()> {
        let mut data = vec![0u8; 48];
        assert_eq!(
            VgaPaletteFormat.probe(&MemStream::from(data.clone()))?,
            Certainty::DefinitelyYes
        );
        data[10] = 65;
        assert_eq!(
            VgaPaletteFormat.probe(&MemStream::from(data))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn palette_image_round_trips_the_file() -> Result<()> {
        let bytes: Vec<u8> = (0..48u8).collect();
        let s = MemStream::wrap(bytes.clone());
        let mut img = VgaPaletteFormat.open(s.clone(), &SuppData::new())?;
        let pal = img.palette().unwrap();
        assert_eq!(pal.len(), 16);
        img.set_palette(&pal)?;
        assert_eq!(s.borrow().read_all()?, bytes);
        Ok(())
    }

    #[test]
    fn create_produces_an_openable_file() -> Result<()> {
        let s = MemStream::wrap(vec![]);
        let img = VgaRawFormat.create(s.clone(), &SuppData::new())?;
        assert_eq!(s.borrow().len(), 64000);
        assert_eq!(img.dimensions(), Point::new(320, 200));
        assert!(img.to_pixels()?.pixels.iter().all(|&p| p == 0));
        Ok(())
    }

    #[test]
    fn ensure_codes_are_unique_in_this_module() {
        let codes = [
            VgaRawFormat.code(),
            VgaRaw8Format.code(),
            ModeXRawFormat.code(),
            ModeXRaw8Format.code(),
            EgaRawPlanarFormat.code(),
            MonoRawFormat.code(),
            CgaRawLinearFormat.code(),
            TvFogFormat.code(),
            VgaPaletteFormat.code(),
            VgaPalette8Format.code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}
