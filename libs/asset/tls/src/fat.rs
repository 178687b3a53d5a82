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

// The generic FAT container: an ordered run of sub-regions inside one
// stream. The core owns the generic bookkeeping (hole management,
// offset shifting, ordering invariants); a per-format hook object owns
// whatever the format stores on disk about its entries (count fields,
// offset tables, embedded per-entry headers).

use crate::{EntryAttrs, FatEntry};
use anyhow::{ensure, Result};
use log::warn;
use pix::GfxError;
use std::{cell::RefCell, rc::Rc};
use stream::{Stream, StreamRef};

/// Whether entries may change size.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntrySizing {
    /// Every non-folder entry stores exactly this many bytes.
    Fixed(usize),
    Variable,
}

/// Stream and entry table handed to hook callbacks. Hooks that grow or
/// shrink regions outside any entry (global FAT tables) must fix the
/// in-memory offsets themselves; `shift_from` does the arithmetic.
pub struct FatIo<'a> {
    pub stream: &'a mut dyn Stream,
    pub entries: &'a mut Vec<FatEntry>,
}

impl<'a> FatIo<'a> {
    /// Add `delta` to the offset of every entry at or past `offset`.
    pub fn shift_from(&mut self, offset: usize, delta: isize) {
        for e in self.entries.iter_mut() {
            if e.offset >= offset {
                e.offset = (e.offset as isize + delta) as usize;
            }
        }
    }
}

/// Per-format FAT maintenance. Every callback defaults to a no-op so
/// headerless grid formats need none of them.
pub trait FatHooks {
    /// Before the entry's hole is opened. May reserve an embedded
    /// header by setting `entry.header_size`, and may grow a global FAT
    /// table (shifting affected entries and `entry.offset` itself).
    fn pre_insert(&mut self, io: &mut FatIo, entry: &mut FatEntry) -> Result<()> {
        let _ = (io, entry);
        Ok(())
    }

    /// After the entry exists in the table and its hole is zero-filled.
    /// Writes count fields and default embedded-header content.
    fn post_insert(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        let _ = (io, index);
        Ok(())
    }

    /// After an entry's bytes and table slot are gone.
    fn post_remove(&mut self, io: &mut FatIo, removed: &FatEntry) -> Result<()> {
        let _ = (io, removed);
        Ok(())
    }

    /// Rewrite the on-disk size record for `index`, if the format keeps
    /// one.
    fn update_size(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        let _ = (io, index);
        Ok(())
    }

    /// Rewrite the on-disk offset record for `index`, if the format
    /// keeps one.
    fn update_offset(&mut self, io: &mut FatIo, index: usize) -> Result<()> {
        let _ = (io, index);
        Ok(())
    }

    /// Persist anything the format defers (dictionary compaction,
    /// attribute words).
    fn flush(&mut self, io: &mut FatIo) -> Result<()> {
        let _ = io;
        Ok(())
    }
}

/// Hook set for formats with no on-disk FAT records at all.
pub struct NoHooks;

impl FatHooks for NoHooks {}

pub struct FatCore {
    stream: StreamRef,
    entries: Vec<FatEntry>,
    hooks: Box<dyn FatHooks>,
    sizing: EntrySizing,
    first_entry_offset: usize,
    next_id: u64,
    dirty: bool,
}

impl FatCore {
    pub fn new(
        stream: StreamRef,
        sizing: EntrySizing,
        first_entry_offset: usize,
        hooks: Box<dyn FatHooks>,
    ) -> Self {
        Self {
            stream,
            entries: Vec::new(),
            hooks,
            sizing,
            first_entry_offset,
            next_id: 1,
            dirty: false,
        }
    }

    pub fn stream(&self) -> StreamRef {
        self.stream.clone()
    }

    pub fn sizing(&self) -> EntrySizing {
        self.sizing
    }

    pub fn set_sizing(&mut self, sizing: EntrySizing) {
        self.sizing = sizing;
    }

    pub fn entries(&self) -> &[FatEntry] {
        &self.entries
    }

    pub fn files_snapshot(&self) -> Vec<FatEntry> {
        self.entries.clone()
    }

    pub fn entry(&self, index: usize) -> Result<&FatEntry> {
        self.entries.get(index).ok_or_else(|| {
            GfxError::InvariantViolation(format!(
                "entry {index} out of range ({} entries)",
                self.entries.len()
            ))
            .into()
        })
    }

    pub fn entry_by_id(&self, id: u64) -> Option<&FatEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Register an entry while parsing an existing file. Does not touch
    /// the stream.
    pub fn push_entry(
        &mut self,
        offset: usize,
        stored_size: usize,
        header_size: usize,
        attrs: EntryAttrs,
        type_tag: &str,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(FatEntry {
            id,
            index: self.entries.len(),
            offset,
            stored_size,
            real_size: stored_size,
            header_size,
            attrs,
            type_tag: type_tag.to_string(),
            valid: true,
        });
        id
    }

    fn end_of_data(&self) -> usize {
        self.entries
            .last()
            .map(|e| e.end())
            .unwrap_or(self.first_entry_offset)
    }

    fn check_sizing(&self, stored_size: usize) -> Result<()> {
        if let EntrySizing::Fixed(len) = self.sizing {
            ensure!(
                stored_size == len,
                GfxError::InvariantViolation(format!(
                    "tiles in this tileset are a fixed size of {len} bytes, not {stored_size}"
                ))
            );
        }
        Ok(())
    }

    /// Check the structural invariants: strictly increasing offsets, no
    /// overlapping regions, nothing before the fixed header.
    pub fn validate(&self) -> Result<()> {
        let mut last_end = self.first_entry_offset;
        for e in &self.entries {
            ensure!(
                e.offset >= last_end,
                GfxError::InvariantViolation(format!(
                    "entry {} at {} overlaps the region ending at {last_end}",
                    e.index, e.offset
                ))
            );
            last_end = e.end();
        }
        Ok(())
    }

    pub fn insert(
        &mut self,
        before: Option<usize>,
        stored_size: usize,
        type_tag: &str,
        attrs: EntryAttrs,
    ) -> Result<FatEntry> {
        self.check_sizing(stored_size)?;
        let index = before.unwrap_or(self.entries.len());
        ensure!(
            index <= self.entries.len(),
            GfxError::InvariantViolation(format!("cannot insert before entry {index}"))
        );
        let offset = if index < self.entries.len() {
            self.entries[index].offset
        } else {
            self.end_of_data()
        };

        let id = self.next_id;
        self.next_id += 1;
        let mut entry = FatEntry {
            id,
            index,
            offset,
            stored_size,
            real_size: stored_size,
            header_size: 0,
            attrs,
            type_tag: type_tag.to_string(),
            valid: true,
        };

        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            self.hooks.pre_insert(&mut io, &mut entry)?;

            let hole = entry.header_size + entry.stored_size;
            io.stream.insert(entry.offset, hole)?;
            for e in io.entries.iter_mut().skip(index) {
                e.offset += hole;
            }

            io.entries.insert(index, entry.clone());
            for (i, e) in io.entries.iter_mut().enumerate() {
                e.index = i;
            }
            for i in index..io.entries.len() {
                self.hooks.update_offset(&mut io, i)?;
            }
            self.hooks.update_size(&mut io, index)?;
            self.hooks.post_insert(&mut io, index)?;
        }

        self.dirty = true;
        self.validate()?;
        Ok(self.entries[index].clone())
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        let removed = self.entry(index)?.clone();
        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            let hole = removed.header_size + removed.stored_size;
            io.stream.remove(removed.offset, hole)?;
            io.entries.remove(index);
            for e in io.entries.iter_mut().skip(index) {
                e.offset -= hole;
            }
            for (i, e) in io.entries.iter_mut().enumerate() {
                e.index = i;
            }
            self.hooks.post_remove(&mut io, &removed)?;
            for i in index..io.entries.len() {
                self.hooks.update_offset(&mut io, i)?;
            }
        }
        self.dirty = true;
        self.validate()
    }

    pub fn resize(&mut self, index: usize, new_stored: usize, new_real: usize) -> Result<()> {
        self.check_sizing(new_stored)?;
        let entry = self.entry(index)?.clone();
        if entry.stored_size == new_stored {
            let e = &mut self.entries[index];
            e.real_size = new_real;
            return Ok(());
        }
        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            let end = entry.end();
            if new_stored > entry.stored_size {
                let delta = new_stored - entry.stored_size;
                io.stream.insert(end, delta)?;
                for e in io.entries.iter_mut().skip(index + 1) {
                    e.offset += delta;
                }
            } else {
                let delta = entry.stored_size - new_stored;
                io.stream.remove(end - delta, delta)?;
                for e in io.entries.iter_mut().skip(index + 1) {
                    e.offset -= delta;
                }
            }
            io.entries[index].stored_size = new_stored;
            io.entries[index].real_size = new_real;
            self.hooks.update_size(&mut io, index)?;
            for i in index + 1..io.entries.len() {
                self.hooks.update_offset(&mut io, i)?;
            }
        }
        self.dirty = true;
        self.validate()
    }

    /// Grow an entry's region by `len` bytes at `rel_off` within it.
    pub fn region_insert(&mut self, id: u64, rel_off: usize, len: usize) -> Result<()> {
        let entry = self.entry_for_region(id)?;
        ensure!(
            rel_off <= entry.stored_size,
            GfxError::InvariantViolation(format!(
                "insert at {rel_off} outside entry of {} bytes",
                entry.stored_size
            ))
        );
        let new_stored = entry.stored_size + len;
        self.check_sizing(new_stored)?;
        let index = entry.index;
        let abs = entry.offset + entry.header_size + rel_off;
        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            io.stream.insert(abs, len)?;
            for e in io.entries.iter_mut().skip(index + 1) {
                e.offset += len;
            }
            io.entries[index].stored_size = new_stored;
            io.entries[index].real_size = new_stored;
            self.hooks.update_size(&mut io, index)?;
            for i in index + 1..io.entries.len() {
                self.hooks.update_offset(&mut io, i)?;
            }
        }
        self.dirty = true;
        self.validate()
    }

    /// Shrink an entry's region by `len` bytes at `rel_off` within it.
    pub fn region_remove(&mut self, id: u64, rel_off: usize, len: usize) -> Result<()> {
        let entry = self.entry_for_region(id)?;
        ensure!(
            rel_off + len <= entry.stored_size,
            GfxError::InvariantViolation(format!(
                "remove of {len} at {rel_off} outside entry of {} bytes",
                entry.stored_size
            ))
        );
        let new_stored = entry.stored_size - len;
        self.check_sizing(new_stored)?;
        let index = entry.index;
        let abs = entry.offset + entry.header_size + rel_off;
        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            io.stream.remove(abs, len)?;
            for e in io.entries.iter_mut().skip(index + 1) {
                e.offset -= len;
            }
            io.entries[index].stored_size = new_stored;
            io.entries[index].real_size = new_stored;
            self.hooks.update_size(&mut io, index)?;
            for i in index + 1..io.entries.len() {
                self.hooks.update_offset(&mut io, i)?;
            }
        }
        self.dirty = true;
        self.validate()
    }

    fn entry_for_region(&self, id: u64) -> Result<FatEntry> {
        self.entry_by_id(id)
            .cloned()
            .ok_or_else(|| GfxError::InvariantViolation("entry no longer exists".into()).into())
    }

    pub fn move_entry(&mut self, from: usize, before: Option<usize>) -> Result<()> {
        let count = self.entries.len();
        ensure!(
            from < count,
            GfxError::InvariantViolation(format!("cannot move entry {from} of {count}"))
        );
        if let Some(b) = before {
            ensure!(
                b <= count,
                GfxError::InvariantViolation(format!("cannot move before entry {b} of {count}"))
            );
            if b == from || b == from + 1 {
                return Ok(());
            }
        }

        let entry = self.entries[from].clone();
        let content = self.stream.borrow().read_vec(
            entry.offset + entry.header_size,
            entry.stored_size,
        )?;
        self.remove(from)?;

        let target = match before {
            None => None,
            Some(b) if b > from => Some(b - 1),
            Some(b) => Some(b),
        };
        let new_entry = self.insert(target, content.len(), &entry.type_tag, entry.attrs)?;
        self.stream
            .borrow_mut()
            .write_at(new_entry.offset + new_entry.header_size, &content)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        {
            let mut guard = self.stream.borrow_mut();
            let mut io = FatIo {
                stream: &mut *guard,
                entries: &mut self.entries,
            };
            self.hooks.flush(&mut io)?;
        }
        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Run a hook-visible operation outside the fixed mutation set.
    pub fn with_io<R>(&mut self, f: impl FnOnce(&mut FatIo) -> Result<R>) -> Result<R> {
        let mut guard = self.stream.borrow_mut();
        let mut io = FatIo {
            stream: &mut *guard,
            entries: &mut self.entries,
        };
        f(&mut io)
    }
}

impl Drop for FatCore {
    fn drop(&mut self) {
        if self.dirty {
            warn!("tileset dropped with unflushed changes; call flush() before dropping");
        }
    }
}

/// Shared handle to a FAT core.
pub type FatRef = Rc<RefCell<FatCore>>;

/// A resizable view over one entry's content region. Resizing goes
/// through the core so following entries shift and on-disk records stay
/// current.
pub struct EntryStream {
    core: FatRef,
    id: u64,
}

impl EntryStream {
    pub fn open(core: &FatRef, index: usize) -> Result<StreamRef> {
        let id = core.borrow().entry(index)?.id;
        Ok(Rc::new(RefCell::new(EntryStream {
            core: core.clone(),
            id,
        })))
    }

    fn with_entry<R>(&self, f: impl FnOnce(&FatEntry, &dyn Stream) -> Result<R>) -> Result<R> {
        let core = self.core.borrow();
        let entry = core
            .entry_by_id(self.id)
            .ok_or_else(|| GfxError::InvariantViolation("entry no longer exists".into()))?;
        let stream = core.stream();
        let r = {
            let s = stream.borrow();
            f(entry, &*s)
        };
        r
    }
}

impl Stream for EntryStream {
    fn len(&self) -> usize {
        self.core
            .borrow()
            .entry_by_id(self.id)
            .map(|e| e.stored_size)
            .unwrap_or(0)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.with_entry(|e, s| {
            ensure!(
                offset + buf.len() <= e.stored_size,
                GfxError::InvariantViolation(format!(
                    "read at {offset}+{} outside entry of {} bytes",
                    buf.len(),
                    e.stored_size
                ))
            );
            s.read_at(e.offset + e.header_size + offset, buf)
        })
    }

    fn read_at_most(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.with_entry(|e, s| {
            let avail = e.stored_size.saturating_sub(offset).min(buf.len());
            if avail > 0 {
                s.read_at(e.offset + e.header_size + offset, &mut buf[..avail])?;
            }
            buf[avail..].fill(0);
            Ok(avail)
        })
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let (abs, stored) = {
            let core = self.core.borrow();
            let e = core
                .entry_by_id(self.id)
                .ok_or_else(|| GfxError::InvariantViolation("entry no longer exists".into()))?;
            (e.offset + e.header_size, e.stored_size)
        };
        ensure!(
            offset + data.len() <= stored,
            GfxError::InvariantViolation(format!(
                "write at {offset}+{} outside entry of {stored} bytes",
                data.len()
            ))
        );
        let stream = self.core.borrow().stream();
        let result = stream.borrow_mut().write_at(abs + offset, data);
        self.core.borrow_mut().mark_dirty();
        result
    }

    fn insert(&mut self, offset: usize, len: usize) -> Result<()> {
        self.core.borrow_mut().region_insert(self.id, offset, len)
    }

    fn remove(&mut self, offset: usize, len: usize) -> Result<()> {
        self.core.borrow_mut().region_remove(self.id, offset, len)
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        let current = self.len();
        if len > current {
            self.insert(current, len - current)
        } else if len < current {
            self.remove(len, current - len)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::MemStream;

    fn grid_core(tile: usize, tiles: usize) -> FatRef {
        let stream = MemStream::wrap((0..tile * tiles).map(|i| i as u8).collect());
        let mut core = FatCore::new(
            stream,
            EntrySizing::Fixed(tile),
            0,
            Box::new(NoHooks),
        );
        for i in 0..tiles {
            core.push_entry(i * tile, tile, 0, EntryAttrs::empty(), "tile");
        }
        Rc::new(RefCell::new(core))
    }

    #[test]
    fn insert_then_remove_restores_the_stream() -> Result<()> {
        let core = grid_core(4, 3);
        let original = core.borrow().stream().borrow().read_all()?;

        core.borrow_mut()
            .insert(Some(1), 4, "tile", EntryAttrs::empty())?;
        assert_eq!(core.borrow().entries().len(), 4);
        assert_eq!(core.borrow().stream().borrow().len(), 16);
        // New slot is zero-filled at offset 4.
        assert_eq!(
            core.borrow().stream().borrow().read_vec(4, 4)?,
            vec![0, 0, 0, 0]
        );

        core.borrow_mut().remove(1)?;
        assert_eq!(core.borrow().stream().borrow().read_all()?, original);
        core.borrow_mut().flush()?;
        Ok(())
    }

    #[test]
    fn offsets_stay_strictly_ordered_after_mutations() -> Result<()> {
        let core = grid_core(4, 4);
        core.borrow_mut()
            .insert(Some(0), 4, "tile", EntryAttrs::empty())?;
        core.borrow_mut().remove(2)?;
        let entries = core.borrow().files_snapshot();
        for pair in entries.windows(2) {
            assert!(pair[0].end() <= pair[1].offset);
            assert!(pair[0].offset < pair[1].offset);
        }
        core.borrow_mut().flush()?;
        Ok(())
    }

    #[test]
    fn fixed_sizing_rejects_other_sizes() {
        let core = grid_core(4, 2);
        assert!(core
            .borrow_mut()
            .insert(None, 6, "tile", EntryAttrs::empty())
            .is_err());
        assert!(core.borrow_mut().resize(0, 6, 6).is_err());
        core.borrow_mut().flush().unwrap();
    }

    #[test]
    fn move_entry_permutes_content() -> Result<()> {
        let core = grid_core(2, 3);
        // Contents are [0,1], [2,3], [4,5].
        core.borrow_mut().move_entry(0, Some(3))?;
        let data = core.borrow().stream().borrow().read_all()?;
        assert_eq!(data, vec![2, 3, 4, 5, 0, 1]);
        core.borrow_mut().move_entry(2, Some(0))?;
        let data = core.borrow().stream().borrow().read_all()?;
        assert_eq!(data, vec![0, 1, 2, 3, 4, 5]);
        core.borrow_mut().flush()?;
        Ok(())
    }

    #[test]
    fn entry_streams_track_resizes() -> Result<()> {
        let stream = MemStream::wrap(vec![1, 2, 3, 4, 5, 6]);
        let mut core = FatCore::new(stream, EntrySizing::Variable, 0, Box::new(NoHooks));
        core.push_entry(0, 2, 0, EntryAttrs::empty(), "a");
        core.push_entry(2, 4, 0, EntryAttrs::empty(), "b");
        let core = Rc::new(RefCell::new(core));

        let first = EntryStream::open(&core, 0)?;
        first.borrow_mut().truncate(4)?;
        first.borrow_mut().write_at(2, &[9, 9])?;

        // Second entry shifted from 2 to 4.
        assert_eq!(core.borrow().entry(1)?.offset, 4);
        let second = EntryStream::open(&core, 1)?;
        let mut buf = [0u8; 4];
        second.borrow().read_at(0, &mut buf)?;
        assert_eq!(buf, [3, 4, 5, 6]);

        assert_eq!(
            core.borrow().stream().borrow().read_all()?,
            vec![1, 2, 9, 9, 3, 4, 5, 6]
        );
        core.borrow_mut().flush()?;
        Ok(())
    }

    #[test]
    fn entry_streams_survive_other_entries_being_removed() -> Result<()> {
        let core = grid_core(2, 3);
        let last = EntryStream::open(&core, 2)?;
        core.borrow_mut().remove(0)?;
        let mut buf = [0u8; 2];
        last.borrow().read_at(0, &mut buf)?;
        assert_eq!(buf, [4, 5]);
        core.borrow_mut().flush()?;
        Ok(())
    }
}
