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

// The format roster. A Registry is a plain value the caller constructs
// and threads through; `Registry::new()` loads every built-in handler,
// and callers with special needs can assemble their own.

use anyhow::Result;
use img::ImageFormat;
use pix::Certainty;
use std::rc::Rc;
use stream::Stream;
use tls::TilesetFormat;

/// A handler of either kind, as returned by code lookup and probing.
#[derive(Clone)]
pub enum Handler {
    Image(Rc<dyn ImageFormat>),
    Tileset(Rc<dyn TilesetFormat>),
}

impl Handler {
    pub fn code(&self) -> &'static str {
        match self {
            Handler::Image(f) => f.code(),
            Handler::Tileset(f) => f.code(),
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            Handler::Image(f) => f.friendly_name(),
            Handler::Tileset(f) => f.friendly_name(),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    images: Vec<Rc<dyn ImageFormat>>,
    tilesets: Vec<Rc<dyn TilesetFormat>>,
}

impl Registry {
    /// Every built-in handler.
    pub fn new() -> Self {
        let mut r = Self::empty();

        r.register_tileset(Rc::new(cosmo::ActorInfoTilesetFormat));
        r.register_tileset(Rc::new(bash::BashBackgroundFormat));
        r.register_tileset(Rc::new(bash::BashForegroundFormat));
        r.register_tileset(Rc::new(bash::BashSpriteFormat));
        r.register_tileset(Rc::new(catacomb::CatacombCgaFormat));
        r.register_tileset(Rc::new(catacomb::CatacombEgaFormat));
        r.register_tileset(Rc::new(comic::ComicSpriteFormat));
        r.register_tileset(Rc::new(comic::ComicTilesetFormat));
        r.register_tileset(Rc::new(comic::Comic2TilesetFormat));
        r.register_tileset(Rc::new(cosmo::CosmoTilesetFormat));
        r.register_tileset(Rc::new(cosmo::CosmoMaskedTilesetFormat));
        r.register_tileset(Rc::new(nukem2::CzoneTilesetFormat));
        r.register_tileset(Rc::new(got::GotTilesetFormat));
        r.register_tileset(Rc::new(harry::HarryChrFormat));
        r.register_tileset(Rc::new(harry::HarryHsbFormat));
        r.register_tileset(Rc::new(stryker::StrykerTilesetFormat));
        r.register_tileset(Rc::new(stryker::StrykerMaskedTilesetFormat));
        r.register_tileset(Rc::new(vinyl::VinylTilesetFormat));
        r.register_tileset(Rc::new(zone66::Zone66TilesetFormat));
        r.register_tileset(Rc::new(zone66::Zone66MapTilesetFormat));

        r.register_image(Rc::new(comic::ComicImageFormat));
        r.register_image(Rc::new(cosmo::CosmoBackdropFormat));
        r.register_image(Rc::new(img::CgaRawLinearFormat));
        r.register_image(Rc::new(img::EgaRawPlanarFormat));
        r.register_image(Rc::new(img::MonoRawFormat));
        r.register_image(Rc::new(nukem2::Nukem2BackdropFormat));
        r.register_image(Rc::new(nukem2::Nukem2ImageFormat));
        r.register_image(Rc::new(raptor::RaptorPicFormat));
        r.register_image(Rc::new(sw93::Sw93BgFormat));
        r.register_image(Rc::new(sw93::Sw93BgPlanarFormat));
        r.register_image(Rc::new(sw93::Sw93PlanarFormat));
        r.register_image(Rc::new(sw93::Sw93WallFormat));
        r.register_image(Rc::new(img::TvFogFormat));
        r.register_image(Rc::new(img::VgaRawFormat));
        r.register_image(Rc::new(img::VgaRaw8Format));
        r.register_image(Rc::new(img::ModeXRawFormat));
        r.register_image(Rc::new(img::ModeXRaw8Format));
        r.register_image(Rc::new(vinyl::VinylScrFormat));
        r.register_image(Rc::new(zone66::Zone66TileImageFormat));

        r.register_image(Rc::new(harry::HarryGmfPaletteFormat));
        r.register_image(Rc::new(img::VgaPaletteFormat));
        r.register_image(Rc::new(img::VgaPalette8Format));

        r
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register_image(&mut self, format: Rc<dyn ImageFormat>) {
        self.images.push(format);
    }

    pub fn register_tileset(&mut self, format: Rc<dyn TilesetFormat>) {
        self.tilesets.push(format);
    }

    pub fn image_formats(&self) -> &[Rc<dyn ImageFormat>] {
        &self.images
    }

    pub fn tileset_formats(&self) -> &[Rc<dyn TilesetFormat>] {
        &self.tilesets
    }

    pub fn find_image(&self, code: &str) -> Option<Rc<dyn ImageFormat>> {
        self.images.iter().find(|f| f.code() == code).cloned()
    }

    pub fn find_tileset(&self, code: &str) -> Option<Rc<dyn TilesetFormat>> {
        self.tilesets.iter().find(|f| f.code() == code).cloned()
    }

    pub fn find_by_code(&self, code: &str) -> Option<Handler> {
        if let Some(f) = self.find_tileset(code) {
            return Some(Handler::Tileset(f));
        }
        self.find_image(code).map(Handler::Image)
    }

    /// Probe every handler, returning the candidates grouped by
    /// descending certainty (registry order within a group). Handlers
    /// that answer DefinitelyNo are omitted.
    pub fn identify(&self, stream: &dyn Stream) -> Result<Vec<(Handler, Certainty)>> {
        let mut found = Vec::new();
        for f in &self.tilesets {
            let c = f.probe(stream)?;
            if c > Certainty::DefinitelyNo {
                found.push((Handler::Tileset(f.clone()), c));
            }
        }
        for f in &self.images {
            let c = f.probe(stream)?;
            if c > Certainty::DefinitelyNo {
                found.push((Handler::Image(f.clone()), c));
            }
        }
        found.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    #[test]
    fn every_code_is_unique() {
        let r = Registry::new();
        let mut codes: Vec<&str> = r
            .image_formats()
            .iter()
            .map(|f| f.code())
            .chain(r.tileset_formats().iter().map(|f| f.code()))
            .collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total, "duplicate format codes registered");
    }

    #[test]
    fn the_roster_covers_both_kinds() {
        let r = Registry::new();
        assert!(r.tileset_formats().len() >= 20);
        assert!(r.image_formats().len() >= 19);
    }

    #[test]
    fn lookup_by_code_finds_either_kind() {
        let r = Registry::new();
        assert!(matches!(
            r.find_by_code("tls-cosmo"),
            Some(Handler::Tileset(_))
        ));
        assert!(matches!(
            r.find_by_code("img-ccomic"),
            Some(Handler::Image(_))
        ));
        assert!(r.find_by_code("tls-imaginary").is_none());
        assert_eq!(r.find_by_code("tls-vinyl").unwrap().code(), "tls-vinyl");
    }

    #[test]
    fn identify_ranks_definite_matches_first() -> Result<()> {
        // A Raptor PIC: its probe validates the header, so it should
        // outrank the merely-plausible fixed-size handlers.
        let mut data = vec![0u8; 20];
        data[12] = 100; // width 100
        data[16] = 2; // height 2
        data.extend(vec![0u8; 200]);
        let s = MemStream::from(data);
        let found = Registry::new().identify(&s)?;
        assert!(!found.is_empty());
        assert_eq!(found[0].0.code(), "img-pic-raptor");
        assert_eq!(found[0].1, Certainty::DefinitelyYes);
        Ok(())
    }

    #[test]
    fn identify_skips_definite_rejections() -> Result<()> {
        let s = MemStream::from(vec![0u8; 7]);
        let found = Registry::new().identify(&s)?;
        for (h, c) in &found {
            assert!(
                *c > Certainty::DefinitelyNo,
                "{} returned DefinitelyNo but was listed",
                h.code()
            );
        }
        Ok(())
    }
}
