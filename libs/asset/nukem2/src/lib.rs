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

// Duke Nukem II: fullscreen images with a trailing 16-colour palette,
// level backdrops, and the fixed-layout CZone container holding the
// solid and masked level tilesets.

use anyhow::{bail, ensure, Result};
use apogee::{EgaGridTileset, PlaneCount};
use ega::{PlaneLayout, PlanePurpose};
use img::{supp, Image, ImageCaps, ImageFormat, SuppData, SuppFilenames, SuppItem};
use log::warn;
use pal::{Palette, PaletteDepth};
use pix::{Certainty, ColourDepth, GfxError, PixelBuffer, Point};
use std::cell::RefCell;
use stream::{Stream, StreamRef, SubStream};
use tls::{
    EntryAttrs, FatEntry, ImageFromTileset, Tileset, TilesetCaps, TilesetFormat,
};

const SCREEN: Point = Point::new(320, 200);
const PIXEL_LEN: usize = 320 * 200 / 2;
const PAL_LEN: usize = 16 * 3;

fn bgri() -> PlaneLayout {
    vec![
        PlanePurpose::Blue1,
        PlanePurpose::Green1,
        PlanePurpose::Red1,
        PlanePurpose::Intensity1,
        PlanePurpose::Unused,
        PlanePurpose::Unused,
    ]
}

/// Fullscreen image: four EGA planes then a 16-entry 6-bit palette.
struct Nukem2Image {
    stream: StreamRef,
    pal: Palette,
    cache: RefCell<Option<PixelBuffer>>,
}

impl Nukem2Image {
    fn open(stream: StreamRef) -> Result<Self> {
        let mut pal_bytes = [0u8; PAL_LEN];
        let got = stream.borrow().read_at_most(PIXEL_LEN, &mut pal_bytes)?;
        if got < PAL_LEN {
            warn!("short palette in fullscreen image; missing entries stay black");
        }
        let pal = Palette::from_bytes(&pal_bytes, PaletteDepth::Six)?;
        Ok(Self {
            stream,
            pal,
            cache: RefCell::new(None),
        })
    }
}

impl Image for Nukem2Image {
    fn caps(&self) -> ImageCaps {
        ImageCaps::HAS_PALETTE | ImageCaps::SET_PALETTE
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn dimensions(&self) -> Point {
        SCREEN
    }

    fn palette(&self) -> Option<Palette> {
        Some(self.pal.clone())
    }

    fn set_palette(&mut self, pal: &Palette) -> Result<()> {
        ensure!(
            pal.len() <= 16,
            GfxError::InvariantViolation(
                "fullscreen images support 16 or fewer colours".into()
            )
        );
        self.pal = pal.clone();
        Ok(())
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let buf = ega::decode_planar(&*self.stream.borrow(), 0, SCREEN, &bgri())?;
        self.cache.replace(Some(buf.clone()));
        Ok(buf)
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        {
            let mut s = self.stream.borrow_mut();
            ega::encode_planar(&mut *s, 0, SCREEN, &bgri(), buf)?;
            // Re-append the palette behind the pixel data.
            let mut pal_bytes = self.pal.as_bytes();
            pal_bytes.resize(PAL_LEN, 0);
            s.truncate(PIXEL_LEN + PAL_LEN)?;
            s.write_at(PIXEL_LEN, &pal_bytes)?;
        }
        self.cache.replace(Some(buf.clone()));
        Ok(())
    }
}

pub struct Nukem2ImageFormat;

impl ImageFormat for Nukem2ImageFormat {
    fn code(&self) -> &'static str {
        "img-nukem2"
    }

    fn friendly_name(&self) -> &'static str {
        "Duke Nukem II full-screen image"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Duke Nukem II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        if stream.len() != PIXEL_LEN + PAL_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        let mut pal_bytes = [0u8; PAL_LEN];
        stream.read_at(PIXEL_LEN, &mut pal_bytes)?;
        if pal_bytes.iter().any(|&b| b > 0x40) {
            return Ok(Certainty::DefinitelyNo);
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        Ok(Box::new(Nukem2Image::open(stream)?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(PIXEL_LEN + PAL_LEN)?;
        }
        self.open(stream, supps)
    }
}

/// Level backdrop: a 40x25 grid of 8x8 solid tiles as one image.
pub struct Nukem2BackdropFormat;

const BACKDROP_LEN: usize = 40 * 25 * 32;

impl ImageFormat for Nukem2BackdropFormat {
    fn code(&self) -> &'static str {
        "img-nukem2-backdrop"
    }

    fn friendly_name(&self) -> &'static str {
        "Duke Nukem II level backdrop"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Duke Nukem II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == BACKDROP_LEN {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Image>> {
        let tiles = EgaGridTileset::open(stream, Point::new(8, 8), PlaneCount::Solid, 1, None)?;
        Ok(Box::new(ImageFromTileset::new(
            Box::new(tiles),
            0,
            40,
            Point::new(40, 25),
        )?))
    }

    fn create(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Image>> {
        {
            let mut s = stream.borrow_mut();
            s.truncate(0)?;
            s.truncate(BACKDROP_LEN)?;
        }
        self.open(stream, supps)
    }
}

//
// tls-nukem2-czone
//

const CZONE_LEN: usize = 42000;
const CZONE_ATTR_LEN: usize = 3600;
const CZONE_SOLID_LEN: usize = 32000;
const CZONE_MASKED_LEN: usize = 6400;

/// The CZone container: a fixed attribute block, then the solid tiles,
/// then the masked tiles. The sub-blocks open as tilesets.
struct CzoneTileset {
    stream: StreamRef,
    pal: Option<Palette>,
}

const CZONE_REGIONS: [(usize, usize, &str); 3] = [
    (0, CZONE_ATTR_LEN, "attrdata.mni"),
    (CZONE_ATTR_LEN, CZONE_SOLID_LEN, "solid.mni"),
    (CZONE_ATTR_LEN + CZONE_SOLID_LEN, CZONE_MASKED_LEN, "masked.mni"),
];

impl Tileset for CzoneTileset {
    fn caps(&self) -> TilesetCaps {
        // Carrying the palette here saves map loaders a walk through
        // every sub-tileset.
        TilesetCaps::HAS_PALETTE
    }

    fn depth(&self) -> ColourDepth {
        ColourDepth::Ega
    }

    fn layout_width(&self) -> u32 {
        1
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn files(&self) -> Vec<FatEntry> {
        CZONE_REGIONS
            .iter()
            .enumerate()
            .map(|(i, (offset, len, name))| FatEntry {
                id: i as u64,
                index: i,
                offset: *offset,
                stored_size: *len,
                real_size: *len,
                header_size: 0,
                attrs: if i == 0 {
                    // The attribute block is not openable here.
                    EntryAttrs::VACANT
                } else {
                    EntryAttrs::FOLDER
                },
                type_tag: name.to_string(),
                valid: true,
            })
            .collect()
    }

    fn open_image(&self, _index: usize) -> Result<Box<dyn Image>> {
        bail!(GfxError::InvariantViolation(
            "CZone entries are sub-tilesets, not images".into()
        ))
    }

    fn open_tileset(&self, index: usize) -> Result<Box<dyn Tileset>> {
        ensure!(
            index == 1 || index == 2,
            GfxError::InvariantViolation(format!("CZone entry {index} is not a sub-tileset"))
        );
        let (offset, len, _) = CZONE_REGIONS[index];
        let region = SubStream::wrap(self.stream.clone(), offset, len)?;
        Ok(Box::new(EgaGridTileset::open(
            region,
            Point::new(8, 8),
            if index == 2 {
                PlaneCount::Masked
            } else {
                PlaneCount::Solid
            },
            40,
            self.pal.clone(),
        )?))
    }

    fn insert(&mut self, _before: Option<usize>, _attrs: EntryAttrs) -> Result<FatEntry> {
        bail!(GfxError::InvariantViolation(
            "CZone files have a fixed layout".into()
        ))
    }

    fn remove(&mut self, _index: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "CZone files have a fixed layout".into()
        ))
    }

    fn resize(&mut self, _index: usize, _new_stored: usize, _new_real: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "CZone files have a fixed layout".into()
        ))
    }

    fn move_entry(&mut self, _from: usize, _before: Option<usize>) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "CZone files have a fixed layout".into()
        ))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct CzoneTilesetFormat;

impl TilesetFormat for CzoneTilesetFormat {
    fn code(&self) -> &'static str {
        "tls-nukem2-czone"
    }

    fn friendly_name(&self) -> &'static str {
        "Duke Nukem II CZone"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["mni"]
    }

    fn games(&self) -> Vec<&'static str> {
        vec!["Duke Nukem II"]
    }

    fn probe(&self, stream: &dyn Stream) -> Result<Certainty> {
        Ok(if stream.len() == CZONE_LEN {
            Certainty::PossiblyYes
        } else {
            Certainty::DefinitelyNo
        })
    }

    fn open(&self, stream: StreamRef, supps: &SuppData) -> Result<Box<dyn Tileset>> {
        ensure!(
            stream.borrow().len() == CZONE_LEN,
            GfxError::InvalidFormat(format!(
                "CZone files are {CZONE_LEN} bytes, not {}",
                stream.borrow().len()
            ))
        );
        let pal = match supp(supps, SuppItem::Palette) {
            Some(s) => {
                let data = s.borrow().read_all()?;
                Some(Palette::from_bytes(&data, PaletteDepth::Six)?)
            }
            None => None,
        };
        Ok(Box::new(CzoneTileset { stream, pal }))
    }

    fn create(&self, _stream: StreamRef, _supps: &SuppData) -> Result<Box<dyn Tileset>> {
        // The surrounding level data is not ours to invent.
        bail!(GfxError::InvariantViolation(
            "CZone files cannot be created from scratch".into()
        ))
    }

    fn required_supps(&self, _filename: &str) -> SuppFilenames {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Palette, "gamepal.pal".to_string());
        supps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn fullscreen_probe_validates_the_trailing_palette() -> Result<()> {
        let mut data = vec![0u8; PIXEL_LEN + PAL_LEN];
        assert_eq!(
            Nukem2ImageFormat.probe(&MemStream::from(data.clone()))?,
            Certainty::DefinitelyYes
        );
        data[PIXEL_LEN + 5] = 0x41;
        assert_eq!(
            Nukem2ImageFormat.probe(&MemStream::from(data))?,
            Certainty::DefinitelyNo
        );
        assert_eq!(
            Nukem2ImageFormat.probe(&MemStream::from(vec![0; PIXEL_LEN]))?,
            Certainty::DefinitelyNo
        );
        Ok(())
    }

    #[test]
    fn fullscreen_round_trip_keeps_pixels_and_palette() -> Result<()> {
        let stream = MemStream::wrap(vec![]);
        let mut img = Nukem2ImageFormat.create(stream.clone(), &SuppData::new())?;

        let pal_bytes: Vec<u8> = (0..48u8).collect();
        let pal = Palette::from_bytes(&pal_bytes, PaletteDepth::Six)?;
        img.set_palette(&pal)?;

        let mut buf = PixelBuffer::new(SCREEN);
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = ((i / 7) % 16) as u8;
        }
        img.from_pixels(&buf)?;

        assert_eq!(stream.borrow().len(), PIXEL_LEN + PAL_LEN);
        let reread = Nukem2ImageFormat.open(stream, &SuppData::new())?;
        assert_eq!(reread.to_pixels()?.pixels, buf.pixels);
        assert_eq!(reread.palette().unwrap().as_bytes(), pal_bytes);
        Ok(())
    }

    #[test]
    fn czone_exposes_its_three_regions() -> Result<()> {
        let stream = MemStream::wrap(vec![0u8; CZONE_LEN]);
        let ts = CzoneTilesetFormat.open(stream, &SuppData::new())?;
        let files = ts.files();
        assert_eq!(files.len(), 3);
        assert!(files[0].attrs.contains(EntryAttrs::VACANT));
        assert!(files[1].attrs.contains(EntryAttrs::FOLDER));

        let solid = ts.open_tileset(1)?;
        assert_eq!(solid.files().len(), 1000);
        let masked = ts.open_tileset(2)?;
        assert_eq!(masked.files().len(), 160);
        assert!(ts.open_tileset(0).is_err());
        Ok(())
    }

    #[test]
    fn czone_tile_edits_land_in_the_right_block() -> Result<()> {
        let stream = MemStream::wrap(vec![0u8; CZONE_LEN]);
        let ts = CzoneTilesetFormat.open(stream.clone(), &SuppData::new())?;
        let solid = ts.open_tileset(1)?;
        let mut tile = solid.open_image(2)?;
        let mut buf = PixelBuffer::new(Point::new(8, 8));
        buf.pixels[0] = 0x0F;
        tile.from_pixels(&buf)?;

        let raw = stream.borrow().read_all()?;
        let tile_base = CZONE_ATTR_LEN + 2 * 32;
        assert_eq!(&raw[tile_base..tile_base + 4], &[0x80, 0x80, 0x80, 0x80]);
        assert!(raw[..CZONE_ATTR_LEN].iter().all(|&b| b == 0));
        Ok(())
    }
}
