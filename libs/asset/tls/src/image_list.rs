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

// A virtual tileset synthesised from externally supplied images. Each
// source image is split into tiles one of three ways; the tiles are
// viewports into the source's canonical buffers, and flush() writes any
// modified source back through its own handler.

use crate::{EntryAttrs, FatEntry, Tileset, TilesetCaps};
use anyhow::{bail, ensure, Result};
use img::{CommitSink, Image, SubImage};
use pix::{ColourDepth, GfxError, PixelBuffer, Point, Rect};
use std::{cell::RefCell, rc::Rc};

/// How one source image becomes tiles.
pub enum SplitMode {
    /// The image is exactly one tile.
    SingleTile,
    /// Fixed-size subdivisions, row-major.
    UniformGrid(Point),
    /// Caller-supplied tile rectangles.
    ExplicitRects(Vec<Rect>),
}

pub struct ImageListItem {
    pub image: Box<dyn Image>,
    pub split: SplitMode,
}

struct ItemState {
    image: Box<dyn Image>,
    full: Option<Rc<RefCell<PixelBuffer>>>,
    changed: Rc<RefCell<bool>>,
}

struct ChangeFlag {
    changed: Rc<RefCell<bool>>,
}

impl CommitSink for ChangeFlag {
    fn commit(&mut self, _changed: Rect) -> Result<()> {
        self.changed.replace(true);
        Ok(())
    }
}

pub struct TilesetFromImageList {
    items: RefCell<Vec<ItemState>>,
    // (source item, viewport) per tile, in order.
    tiles: Vec<(usize, Rect)>,
    layout_width: u32,
    depth: ColourDepth,
}

impl TilesetFromImageList {
    pub fn new(list: Vec<ImageListItem>, layout_width: u32) -> Result<Self> {
        ensure!(
            !list.is_empty(),
            GfxError::InvariantViolation("image list must not be empty".into())
        );
        let depth = list[0].image.depth();
        let mut tiles = Vec::new();
        let mut items = Vec::new();
        for (src, item) in list.into_iter().enumerate() {
            let dims = item.image.dimensions();
            match &item.split {
                SplitMode::SingleTile => {
                    tiles.push((src, Rect::new(0, 0, dims.x, dims.y)));
                }
                SplitMode::UniformGrid(tile) => {
                    ensure!(
                        tile.x > 0
                            && tile.y > 0
                            && dims.x % tile.x == 0
                            && dims.y % tile.y == 0,
                        GfxError::InvariantViolation(format!(
                            "cannot split a {}x{} image into {}x{} tiles",
                            dims.x, dims.y, tile.x, tile.y
                        ))
                    );
                    for y in (0..dims.y).step_by(tile.y as usize) {
                        for x in (0..dims.x).step_by(tile.x as usize) {
                            tiles.push((src, Rect::new(x, y, tile.x, tile.y)));
                        }
                    }
                }
                SplitMode::ExplicitRects(rects) => {
                    for r in rects {
                        ensure!(
                            r.x >= 0
                                && r.y >= 0
                                && r.x + r.width <= dims.x
                                && r.y + r.height <= dims.y,
                            GfxError::InvariantViolation(format!(
                                "tile rect {}x{}+{}+{} outside {}x{} image",
                                r.width, r.height, r.x, r.y, dims.x, dims.y
                            ))
                        );
                        tiles.push((src, *r));
                    }
                }
            }
            items.push(ItemState {
                image: item.image,
                full: None,
                changed: Rc::new(RefCell::new(false)),
            });
        }
        Ok(Self {
            items: RefCell::new(items),
            tiles,
            layout_width,
            depth,
        })
    }
}

impl Tileset for TilesetFromImageList {
    fn caps(&self) -> TilesetCaps {
        TilesetCaps::empty()
    }

    fn depth(&self) -> ColourDepth {
        self.depth
    }

    fn tile_dimensions(&self) -> Point {
        // Uniform only if every tile agrees.
        let mut dims = Point::new(0, 0);
        for (_, r) in &self.tiles {
            let t = r.dimensions();
            if dims.is_zero() {
                dims = t;
            } else if dims != t {
                return Point::new(0, 0);
            }
        }
        dims
    }

    fn layout_width(&self) -> u32 {
        self.layout_width
    }

    fn files(&self) -> Vec<FatEntry> {
        self.tiles
            .iter()
            .enumerate()
            .map(|(i, (_, r))| FatEntry {
                id: i as u64,
                index: i,
                offset: i,
                stored_size: (r.width * r.height) as usize,
                real_size: (r.width * r.height) as usize,
                header_size: 0,
                attrs: EntryAttrs::empty(),
                type_tag: "tile/from-image-list".to_string(),
                valid: true,
            })
            .collect()
    }

    fn open_image(&self, index: usize) -> Result<Box<dyn Image>> {
        let (src, rect) = *self
            .tiles
            .get(index)
            .ok_or_else(|| GfxError::InvariantViolation(format!("no tile {index}")))?;
        let mut items = self.items.borrow_mut();
        let item = &mut items[src];
        if item.full.is_none() {
            item.full = Some(Rc::new(RefCell::new(item.image.to_pixels()?)));
        }
        let full = item.full.as_ref().unwrap().clone();
        let sink = Rc::new(RefCell::new(ChangeFlag {
            changed: item.changed.clone(),
        }));
        let pal = item.image.palette();
        Ok(Box::new(SubImage::new(
            full,
            rect,
            item.image.depth(),
            pal,
            sink,
        )?))
    }

    fn insert(&mut self, _before: Option<usize>, _attrs: EntryAttrs) -> Result<FatEntry> {
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are virtual and cannot be rearranged".into()
        ))
    }

    fn remove(&mut self, _index: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are virtual and cannot be rearranged".into()
        ))
    }

    fn resize(&mut self, _index: usize, _new_stored: usize, _new_real: usize) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are a fixed size".into()
        ))
    }

    fn move_entry(&mut self, _from: usize, _before: Option<usize>) -> Result<()> {
        bail!(GfxError::InvariantViolation(
            "tiles in this tileset are virtual and cannot be rearranged".into()
        ))
    }

    fn flush(&mut self) -> Result<()> {
        let mut items = self.items.borrow_mut();
        for item in items.iter_mut() {
            if *item.changed.borrow() {
                let full = item
                    .full
                    .as_ref()
                    .expect("changed flag set but image never loaded")
                    .borrow()
                    .clone();
                item.image.from_pixels(&full)?;
                item.changed.replace(false);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use img::{Codec, CodecImage};
    use stream::MemStream;

    fn vga_image(stream: stream::StreamRef, dims: Point) -> Box<dyn Image> {
        Box::new(CodecImage::new(
            stream,
            0,
            dims,
            Codec::Linear8,
            ColourDepth::Vga,
            None,
        ))
    }

    #[test]
    fn uniform_grid_splits_row_major() -> Result<()> {
        let stream = MemStream::wrap((0..128u8).collect());
        let ts = TilesetFromImageList::new(
            vec![ImageListItem {
                image: vga_image(stream, Point::new(16, 8)),
                split: SplitMode::UniformGrid(Point::new(8, 8)),
            }],
            2,
        )?;
        assert_eq!(ts.files().len(), 2);
        assert_eq!(ts.tile_dimensions(), Point::new(8, 8));
        let right = ts.open_image(1)?.to_pixels()?;
        // Second tile is the right half: rows start at 8, stride 16.
        assert_eq!(right.pixels[0], 8);
        assert_eq!(right.pixels[8], 24);
        Ok(())
    }

    #[test]
    fn tile_writes_reach_the_source_image_on_flush() -> Result<()> {
        let stream = MemStream::wrap(vec![0u8; 128]);
        let mut ts = TilesetFromImageList::new(
            vec![ImageListItem {
                image: vga_image(stream.clone(), Point::new(16, 8)),
                split: SplitMode::UniformGrid(Point::new(8, 8)),
            }],
            2,
        )?;
        {
            let mut tile = ts.open_image(1)?;
            let mut buf = PixelBuffer::new(Point::new(8, 8));
            buf.pixels.fill(0x55);
            tile.from_pixels(&buf)?;
        }
        // Nothing hits the stream until flush.
        assert!(stream.borrow().read_all()?.iter().all(|&b| b == 0));
        ts.flush()?;
        let raw = stream.borrow().read_all()?;
        assert_eq!(raw[0], 0);
        assert_eq!(raw[8], 0x55);
        assert_eq!(raw[15], 0x55);
        Ok(())
    }

    #[test]
    fn explicit_rects_and_single_tiles_mix() -> Result<()> {
        let a = MemStream::wrap(vec![1u8; 16]);
        let b = MemStream::wrap(vec![2u8; 64]);
        let ts = TilesetFromImageList::new(
            vec![
                ImageListItem {
                    image: vga_image(a, Point::new(4, 4)),
                    split: SplitMode::SingleTile,
                },
                ImageListItem {
                    image: vga_image(b, Point::new(8, 8)),
                    split: SplitMode::ExplicitRects(vec![
                        Rect::new(0, 0, 2, 2),
                        Rect::new(4, 4, 4, 4),
                    ]),
                },
            ],
            1,
        )?;
        assert_eq!(ts.files().len(), 3);
        // Mixed tile sizes means no uniform dimensions.
        assert_eq!(ts.tile_dimensions(), Point::new(0, 0));
        assert_eq!(ts.open_image(0)?.dimensions(), Point::new(4, 4));
        assert_eq!(ts.open_image(2)?.to_pixels()?.pixels, vec![2; 16]);
        Ok(())
    }

    #[test]
    fn rects_outside_the_source_are_rejected() {
        let a = MemStream::wrap(vec![0u8; 16]);
        assert!(TilesetFromImageList::new(
            vec![ImageListItem {
                image: vga_image(a, Point::new(4, 4)),
                split: SplitMode::ExplicitRects(vec![Rect::new(2, 2, 4, 4)]),
            }],
            1,
        )
        .is_err());
    }
}
