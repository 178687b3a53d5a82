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

// A rectangular viewport into a larger image. The viewport shares the
// parent's canonical buffers; writing through it updates only the
// viewport region and then tells the parent's commit sink, which is
// responsible for eventually persisting the whole image.

use crate::{Image, ImageCaps};
use anyhow::{ensure, Result};
use pal::Palette;
use pix::{ColourDepth, GfxError, PixelBuffer, Point, Rect};
use std::{cell::RefCell, rc::Rc};

/// Where sub-image writes are reported. The parent image registers one
/// of these when it hands out a viewport.
pub trait CommitSink {
    fn commit(&mut self, changed: Rect) -> Result<()>;
}

pub struct SubImage {
    full: Rc<RefCell<PixelBuffer>>,
    viewport: Rect,
    depth: ColourDepth,
    pal: Option<Palette>,
    sink: Rc<RefCell<dyn CommitSink>>,
}

impl SubImage {
    pub fn new(
        full: Rc<RefCell<PixelBuffer>>,
        viewport: Rect,
        depth: ColourDepth,
        pal: Option<Palette>,
        sink: Rc<RefCell<dyn CommitSink>>,
    ) -> Result<Self> {
        {
            let dims = full.borrow().dims;
            ensure!(
                viewport.x >= 0
                    && viewport.y >= 0
                    && viewport.width > 0
                    && viewport.height > 0
                    && viewport.x + viewport.width <= dims.x
                    && viewport.y + viewport.height <= dims.y,
                GfxError::InvariantViolation(format!(
                    "viewport {}x{}+{}+{} outside parent {}x{}",
                    viewport.width, viewport.height, viewport.x, viewport.y, dims.x, dims.y
                ))
            );
        }
        Ok(Self {
            full,
            viewport,
            depth,
            pal,
            sink,
        })
    }

    fn extract(&self, source: &[u8]) -> Vec<u8> {
        let full_w = self.full.borrow().dims.x as usize;
        let vw = self.viewport.width as usize;
        let mut out = Vec::with_capacity(vw * self.viewport.height as usize);
        for y in 0..self.viewport.height as usize {
            let start = (self.viewport.y as usize + y) * full_w + self.viewport.x as usize;
            out.extend_from_slice(&source[start..start + vw]);
        }
        out
    }
}

impl Image for SubImage {
    fn caps(&self) -> ImageCaps {
        if self.pal.is_some() {
            ImageCaps::HAS_PALETTE
        } else {
            ImageCaps::empty()
        }
    }

    fn depth(&self) -> ColourDepth {
        self.depth
    }

    fn dimensions(&self) -> Point {
        self.viewport.dimensions()
    }

    fn palette(&self) -> Option<Palette> {
        self.pal.clone()
    }

    fn to_pixels(&self) -> Result<PixelBuffer> {
        let full = self.full.borrow();
        PixelBuffer::from_parts(
            self.viewport.dimensions(),
            self.extract(&full.pixels),
            self.extract(&full.mask),
        )
    }

    fn from_pixels(&mut self, buf: &PixelBuffer) -> Result<()> {
        ensure!(
            buf.dims == self.viewport.dimensions(),
            GfxError::InvariantViolation(format!(
                "buffer is {}x{}, viewport is {}x{}",
                buf.dims.x, buf.dims.y, self.viewport.width, self.viewport.height
            ))
        );
        {
            let mut full = self.full.borrow_mut();
            let full_w = full.dims.x as usize;
            let vw = self.viewport.width as usize;
            for y in 0..self.viewport.height as usize {
                let dst = (self.viewport.y as usize + y) * full_w + self.viewport.x as usize;
                let src = y * vw;
                full.pixels[dst..dst + vw].copy_from_slice(&buf.pixels[src..src + vw]);
                full.mask[dst..dst + vw].copy_from_slice(&buf.mask[src..src + vw]);
            }
        }
        self.sink.borrow_mut().commit(self.viewport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        committed: Vec<Rect>,
    }

    impl CommitSink for Recorder {
        fn commit(&mut self, changed: Rect) -> Result<()> {
            self.committed.push(changed);
            Ok(())
        }
    }

    fn parent_4x4() -> Rc<RefCell<PixelBuffer>> {
        let mut buf = PixelBuffer::new(Point::new(4, 4));
        for (i, p) in buf.pixels.iter_mut().enumerate() {
            *p = i as u8;
        }
        Rc::new(RefCell::new(buf))
    }

    #[test]
    fn viewport_reads_only_its_region() -> Result<()> {
        let full = parent_4x4();
        let sink = Rc::new(RefCell::new(Recorder { committed: vec![] }));
        let sub = SubImage::new(
            full,
            Rect::new(1, 1, 2, 2),
            ColourDepth::Vga,
            None,
            sink,
        )?;
        assert_eq!(sub.to_pixels()?.pixels, vec![5, 6, 9, 10]);
        Ok(())
    }

    #[test]
    fn writes_update_the_parent_and_fire_the_sink() -> Result<()> {
        let full = parent_4x4();
        let sink = Rc::new(RefCell::new(Recorder { committed: vec![] }));
        let mut sub = SubImage::new(
            full.clone(),
            Rect::new(2, 0, 2, 2),
            ColourDepth::Vga,
            None,
            sink.clone(),
        )?;
        let mut buf = PixelBuffer::new(Point::new(2, 2));
        buf.pixels.copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        sub.from_pixels(&buf)?;

        let parent = full.borrow();
        assert_eq!(parent.pixels[2], 0xAA);
        assert_eq!(parent.pixels[3], 0xBB);
        assert_eq!(parent.pixels[6], 0xCC);
        assert_eq!(parent.pixels[7], 0xDD);
        assert_eq!(parent.pixels[4], 4);
        assert_eq!(sink.borrow().committed, vec![Rect::new(2, 0, 2, 2)]);
        Ok(())
    }

    #[test]
    fn viewports_outside_the_parent_are_rejected() {
        let full = parent_4x4();
        let sink = Rc::new(RefCell::new(Recorder { committed: vec![] }));
        assert!(SubImage::new(
            full,
            Rect::new(3, 3, 2, 2),
            ColourDepth::Vga,
            None,
            sink
        )
        .is_err());
    }
}
