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

use anyhow::{ensure, Result};
use image::{ImageBuffer, Rgba};
use lazy_static::lazy_static;

/// Channel width of the on-disk palette data. DAC-era files store six
/// bits per channel (0-63); later files store full bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PaletteDepth {
    Six,
    Eight,
}

/// The four fixed CGA palettes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CgaPalette {
    RedGreenBrown,
    CyanMagentaWhite,
    RedGreenBrownBright,
    CyanMagentaWhiteBright,
}

/// An ordered table of 1-256 RGBA colours plus the channel depth it was
/// read with, so a round-trip writes the same number of bits back out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<Rgba<u8>>,
    depth: PaletteDepth,
}

impl Palette {
    /// Decode R,G,B triplets. Six-bit channels are expanded with
    /// `v<<2 | v>>4` so pure white lands on 255; the occasional
    /// out-of-spec value of 64 is treated as 63.
    pub fn from_bytes(data: &[u8], depth: PaletteDepth) -> Result<Self> {
        ensure!(data.len() % 3 == 0, "expected data to divide cleanly by 3");
        let color_count = data.len() / 3;
        ensure!(color_count <= 256, "palette has {color_count} entries; max is 256");
        let mut entries = Vec::with_capacity(color_count);
        for rgb in data.chunks_exact(3) {
            let channel = |mut v: u8| match depth {
                PaletteDepth::Six => {
                    if v >= 0x40 {
                        v = 0x3F;
                    }
                    (v << 2) | (v >> 4)
                }
                PaletteDepth::Eight => v,
            };
            entries.push(Rgba([channel(rgb[0]), channel(rgb[1]), channel(rgb[2]), 255]));
        }
        Ok(Self { entries, depth })
    }

    pub fn from_entries(entries: Vec<Rgba<u8>>, depth: PaletteDepth) -> Result<Self> {
        ensure!(
            !entries.is_empty() && entries.len() <= 256,
            "palette needs 1-256 entries, got {}",
            entries.len()
        );
        Ok(Self { entries, depth })
    }

    /// Serialize back to R,G,B triplets at this palette's depth.
    pub fn as_bytes(&self) -> Vec<u8> {
        let shift = match self.depth {
            PaletteDepth::Six => 2,
            PaletteDepth::Eight => 0,
        };
        let mut out = Vec::with_capacity(self.entries.len() * 3);
        for entry in &self.entries {
            out.push(entry[0] >> shift);
            out.push(entry[1] >> shift);
            out.push(entry[2] >> shift);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> PaletteDepth {
        self.depth
    }

    pub fn iter(&self) -> std::slice::Iter<Rgba<u8>> {
        self.entries.iter()
    }

    #[inline]
    pub fn rgba(&self, index: usize) -> Rgba<u8> {
        self.entries[index]
    }

    pub fn rgb_bytes(&self, index: usize) -> [u8; 3] {
        let e = self.entries[index];
        [e[0], e[1], e[2]]
    }

    /// Mark `index` as the format's transparent colour (alpha zero).
    pub fn set_transparent(&mut self, index: usize) {
        self.entries[index][3] = 0;
    }

    pub fn is_transparent(&self, index: usize) -> bool {
        self.entries[index][3] == 0
    }

    /// The standard IBM 16-colour set.
    pub fn default_ega() -> Palette {
        DEFAULT_EGA.clone()
    }

    /// One of the four fixed CGA sets, index 0 black.
    pub fn default_cga(which: CgaPalette) -> Palette {
        let (a, b, c): ([u8; 3], [u8; 3], [u8; 3]) = match which {
            CgaPalette::RedGreenBrown => {
                ([0x00, 0xAA, 0x00], [0xAA, 0x00, 0x00], [0xAA, 0x55, 0x00])
            }
            CgaPalette::CyanMagentaWhite => {
                ([0x00, 0xAA, 0xAA], [0xAA, 0x00, 0xAA], [0xAA, 0xAA, 0xAA])
            }
            CgaPalette::RedGreenBrownBright => {
                ([0x55, 0xFF, 0x55], [0xFF, 0x55, 0x55], [0xFF, 0xFF, 0x55])
            }
            CgaPalette::CyanMagentaWhiteBright => {
                ([0x55, 0xFF, 0xFF], [0xFF, 0x55, 0xFF], [0xFF, 0xFF, 0xFF])
            }
        };
        Palette {
            entries: vec![
                Rgba([0, 0, 0, 255]),
                Rgba([a[0], a[1], a[2], 255]),
                Rgba([b[0], b[1], b[2], 255]),
                Rgba([c[0], c[1], c[2], 255]),
            ],
            depth: PaletteDepth::Eight,
        }
    }

    pub fn default_mono() -> Palette {
        Palette {
            entries: vec![Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255])],
            depth: PaletteDepth::Eight,
        }
    }

    /// Dump this palette to `path` in PNG format as a 16x16 grid of
    /// 32x32 swatches. Entries past the end render black.
    pub fn dump_png(&self, path: &str) -> Result<()> {
        const SIZE: u32 = 32;
        let mut buf = ImageBuffer::new(16 * SIZE, 16 * SIZE);
        for i in 0..16u32 {
            for j in 0..16u32 {
                let off = (j * 16 + i) as usize;
                let colour = if off < self.entries.len() {
                    self.entries[off]
                } else {
                    Rgba([0, 0, 0, 255])
                };
                for ip in 0..SIZE {
                    for jp in 0..SIZE {
                        buf.put_pixel(i * SIZE + ip, j * SIZE + jp, colour);
                    }
                }
            }
        }
        buf.save(path)?;
        Ok(())
    }
}

lazy_static! {
    static ref DEFAULT_EGA: Palette = {
        let mut entries = Vec::with_capacity(16);
        for i in 0..16u8 {
            let tint = if i & 8 != 0 { 0x55 } else { 0x00 };
            let r = tint + if i & 4 != 0 { 0xAA } else { 0x00 };
            let mut g = tint + if i & 2 != 0 { 0xAA } else { 0x00 };
            let b = tint + if i & 1 != 0 { 0xAA } else { 0x00 };
            // Colour 6 is brown, not dark yellow, on real hardware.
            if i == 6 {
                g = 0x55;
            }
            entries.push(Rgba([r, g, b, 255]));
        }
        Palette {
            entries,
            depth: PaletteDepth::Six,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_bit_channels_expand_to_full_range() -> Result<()> {
        let pal = Palette::from_bytes(&[0x00, 0x20, 0x3F], PaletteDepth::Six)?;
        assert_eq!(pal.rgba(0), Rgba([0x00, 0x82, 0xFF, 255]));
        Ok(())
    }

    #[test]
    fn out_of_spec_64_reads_as_63() -> Result<()> {
        let pal = Palette::from_bytes(&[0x40, 0x40, 0x40], PaletteDepth::Six)?;
        assert_eq!(pal.rgba(0), Rgba([0xFF, 0xFF, 0xFF, 255]));
        Ok(())
    }

    #[test]
    fn six_bit_survives_round_trip() -> Result<()> {
        let src: Vec<u8> = (0u8..0x40).flat_map(|v| [v, 0x3F - v, v]).collect();
        let pal = Palette::from_bytes(&src, PaletteDepth::Six)?;
        assert_eq!(pal.as_bytes(), src);
        Ok(())
    }

    #[test]
    fn eight_bit_is_preserved_exactly() -> Result<()> {
        let src = vec![1, 2, 3, 250, 251, 252];
        let pal = Palette::from_bytes(&src, PaletteDepth::Eight)?;
        assert_eq!(pal.as_bytes(), src);
        Ok(())
    }

    #[test]
    fn default_ega_has_brown() {
        let pal = Palette::default_ega();
        assert_eq!(pal.len(), 16);
        assert_eq!(pal.rgba(6), Rgba([0xAA, 0x55, 0x00, 255]));
        assert_eq!(pal.rgba(15), Rgba([0xFF, 0xFF, 0xFF, 255]));
    }

    #[test]
    fn transparent_index_is_recorded() -> Result<()> {
        let mut pal = Palette::from_bytes(&[0; 9], PaletteDepth::Six)?;
        pal.set_transparent(0);
        assert!(pal.is_transparent(0));
        assert!(!pal.is_transparent(1));
        Ok(())
    }

    #[test]
    fn oversized_palettes_are_rejected() {
        assert!(Palette::from_bytes(&[0; 257 * 3], PaletteDepth::Eight).is_err());
        assert!(Palette::from_bytes(&[0; 4], PaletteDepth::Eight).is_err());
    }
}
