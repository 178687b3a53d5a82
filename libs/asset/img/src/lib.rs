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

mod formats;
mod raw;
mod sub;

pub use formats::{
    CgaRawLinearFormat, EgaRawPlanarFormat, ModeXRaw8Format, ModeXRawFormat, MonoRawFormat,
    PaletteImage, TvFogFormat, VgaPalette8Format, VgaPaletteFormat, VgaRaw8Format, VgaRawFormat,
};
pub use raw::{Codec, CodecImage};
pub use sub::{CommitSink, SubImage};

use anyhow::{bail, Result};
use bitflags::bitflags;
use pal::Palette;
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::collections::HashMap;
use stream::{Stream, StreamRef};

bitflags! {
    /// What an image handler supports beyond plain pixel access.
    pub struct ImageCaps: u32 {
        const HAS_PALETTE = 0x01;
        const SET_PALETTE = 0x02;
        const SET_DIMENSIONS = 0x04;
        const HAS_HOTSPOT = 0x08;
        const HAS_HITRECT = 0x10;
    }
}

/// One image within a graphics file. Reads are lazy and cached; writes
/// go through the pixel codec straight into the underlying stream
/// region, which may change length.
pub trait Image {
    fn caps(&self) -> ImageCaps;
    fn depth(&self) -> ColourDepth;
    fn dimensions(&self) -> Point;

    /// Resize the image. Pixel data is undefined afterwards; callers
    /// that want to keep it must convert, resize, convert back.
    fn set_dimensions(&mut self, dims: Point) -> Result<()> {
        let _ = dims;
        bail!(GfxError::InvariantViolation(
            "this image is a fixed size".into()
        ))
    }

    fn palette(&self) -> Option<Palette> {
        None
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        let _ = pal;
        bail!(GfxError::InvariantViolation(
            "this image has no stored palette".into()
        ))
    }

    fn hotspot(&self) -> Option<Point> {
        None
    }

    fn set_hotspot(&mut self, p: Point) -> Result<()> {
        let _ = p;
        bail!(GfxError::InvariantViolation(
            "this image has no hotspot".into()
        ))
    }

    fn hitrect(&self) -> Option<Point> {
        None
    }

    fn set_hitrect(&mut self, p: Point) -> Result<()> {
        let _ = p;
        bail!(GfxError::InvariantViolation(
            "this image has no hit rectangle".into()
        ))
    }

    /// Decode to the canonical pixel/mask pair.
    fn to_pixels(&self) -> Result<PixelBuffer>;

    /// Encode the canonical pair back into the stream region.
    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()>;
}

/// Role tags for the extra streams a format needs alongside its main
/// file.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SuppItem {
    Palette,
    Fat,
    Extra1,
    Extra2,
    Extra3,
}

/// The supplementary streams handed to open/create, keyed by role.
pub type SuppData = HashMap<SuppItem, StreamRef>;

/// Default filenames for the supplementary streams, keyed by role.
pub type SuppFilenames = HashMap<SuppItem, String>;

/// A format handler for standalone image files.
pub trait ImageFormat {
    /// Stable identifier, e.g. `"img-ccomic"`.
    fn code(&self) -> &'static str;
    fn friendly_name(&self) -> &'static str;

    fn extensions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn games(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Classify how likely `stream` is to hold this format. Probes
    /// never fail on malformed content, only on real stream errors.
    fn probe(&self, stream: &dyn Stream) -> Result<Certainty>;

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>>;

    /// Initialise `stream` with a minimal valid file, then open it.
    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>>;

    fn required_supps(&self, filename: &str) -> SuppFilenames {
        let _ = filename;
        SuppFilenames::new()
    }
}

/// Look up a supp stream by role.
pub fn supp(supps: &SuppData, item: SuppItem) -> Option<StreamRef> {
    supps.get(&item).cloned()
}

/// Replace a filename's extension, keeping the stem.
pub fn with_extension(filename: &str, ext: &str) -> String {
    match filename.rfind('.') {
        Some(dot) => format!("{}.{ext}", &filename[..dot]),
        None => format!("{filename}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_swap_keeps_the_stem() {
        assert_eq!(with_extension("tiles.tls", "pal"), "tiles.pal");
        assert_eq!(with_extension("noext", "pal"), "noext.pal");
        assert_eq!(with_extension("a.b.c", "pal"), "a.b.pal");
    }
}
