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

// The stream capability the format layer is written against: a
// random-access byte container that supports insertion and removal in
// the middle, so FAT containers can open and close holes without
// copying the whole file themselves. Everything is single-threaded;
// shared handles are Rc<RefCell<..>>.

use anyhow::Result;
use std::{cell::RefCell, rc::Rc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream access at {offset}+{len} outside size {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

/// A random-access byte container. Offsets are absolute; there is no
/// cursor. All mutations take effect immediately.
pub trait Stream {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`. Fails if the range runs past the end.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Fill as much of `buf` as the stream can provide, zeroing the
    /// remainder. Returns the number of bytes actually read.
    fn read_at_most(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    /// Overwrite bytes at `offset`. Fails if the range runs past the end.
    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Open a hole of `len` zero bytes at `offset`, shifting the tail up.
    fn insert(&mut self, offset: usize, len: usize) -> Result<()>;

    /// Close the hole `[offset, offset+len)`, shifting the tail down.
    fn remove(&mut self, offset: usize, len: usize) -> Result<()>;

    /// Grow (zero-filled) or shrink the stream to exactly `len` bytes.
    fn truncate(&mut self, len: usize) -> Result<()>;
}

impl dyn Stream {
    pub fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read_vec(0, self.len())
    }
}

/// Shared handle to a stream. The whole library is single-threaded, so
/// plain reference counting is all the sharing we need.
pub type StreamRef = Rc<RefCell<dyn Stream>>;

/// Growable in-memory stream.
#[derive(Debug, Default, Clone)]
pub struct MemStream {
    data: Vec<u8>,
}

impl MemStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(data: Vec<u8>) -> StreamRef {
        Rc::new(RefCell::new(Self { data }))
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemStream {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Stream for MemStream {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len())
            .filter(|&e| e <= self.data.len())
            .ok_or(StreamError::OutOfBounds {
                offset,
                len: buf.len(),
                size: self.data.len(),
            })?;
        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    fn read_at_most(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let avail = self.data.len().saturating_sub(offset).min(buf.len());
        if avail > 0 {
            buf[..avail].copy_from_slice(&self.data[offset..offset + avail]);
        }
        buf[avail..].fill(0);
        Ok(avail)
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&e| e <= self.data.len())
            .ok_or(StreamError::OutOfBounds {
                offset,
                len: data.len(),
                size: self.data.len(),
            })?;
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn insert(&mut self, offset: usize, len: usize) -> Result<()> {
        anyhow::ensure!(
            offset <= self.data.len(),
            StreamError::OutOfBounds {
                offset,
                len,
                size: self.data.len()
            }
        );
        self.data.splice(offset..offset, std::iter::repeat(0).take(len));
        Ok(())
    }

    fn remove(&mut self, offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(StreamError::OutOfBounds {
                offset,
                len,
                size: self.data.len(),
            })?;
        self.data.drain(offset..end);
        Ok(())
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        self.data.resize(len, 0);
        Ok(())
    }
}

/// A resizable window into a parent stream. The window owns its region:
/// truncating it inserts or removes bytes in the parent, shifting
/// whatever follows. The child holds the only back-reference; parents
/// never point at children, so there are no cycles to leak.
pub struct SubStream {
    parent: StreamRef,
    start: usize,
    len: usize,
}

impl SubStream {
    pub fn new(parent: StreamRef, start: usize, len: usize) -> Result<Self> {
        let size = parent.borrow().len();
        anyhow::ensure!(
            start.checked_add(len).map(|e| e <= size).unwrap_or(false),
            StreamError::OutOfBounds { offset: start, len, size }
        );
        Ok(Self { parent, start, len })
    }

    pub fn wrap(parent: StreamRef, start: usize, len: usize) -> Result<StreamRef> {
        Ok(Rc::new(RefCell::new(Self::new(parent, start, len)?)))
    }
}

impl Stream for SubStream {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        anyhow::ensure!(
            offset
                .checked_add(buf.len())
                .map(|e| e <= self.len)
                .unwrap_or(false),
            StreamError::OutOfBounds {
                offset,
                len: buf.len(),
                size: self.len
            }
        );
        self.parent.borrow().read_at(self.start + offset, buf)
    }

    fn read_at_most(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let avail = self.len.saturating_sub(offset).min(buf.len());
        if avail > 0 {
            self.parent
                .borrow()
                .read_at(self.start + offset, &mut buf[..avail])?;
        }
        buf[avail..].fill(0);
        Ok(avail)
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        anyhow::ensure!(
            offset
                .checked_add(data.len())
                .map(|e| e <= self.len)
                .unwrap_or(false),
            StreamError::OutOfBounds {
                offset,
                len: data.len(),
                size: self.len
            }
        );
        self.parent.borrow_mut().write_at(self.start + offset, data)
    }

    fn insert(&mut self, offset: usize, len: usize) -> Result<()> {
        anyhow::ensure!(
            offset <= self.len,
            StreamError::OutOfBounds { offset, len, size: self.len }
        );
        self.parent.borrow_mut().insert(self.start + offset, len)?;
        self.len += len;
        Ok(())
    }

    fn remove(&mut self, offset: usize, len: usize) -> Result<()> {
        anyhow::ensure!(
            offset
                .checked_add(len)
                .map(|e| e <= self.len)
                .unwrap_or(false),
            StreamError::OutOfBounds { offset, len, size: self.len }
        );
        self.parent.borrow_mut().remove(self.start + offset, len)?;
        self.len -= len;
        Ok(())
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.len {
            self.insert(self.len, len - self.len)
        } else {
            self.remove(len, self.len - len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_insert_remove_round_trip() -> Result<()> {
        let mut s = MemStream::from(vec![1, 2, 3, 4]);
        s.insert(2, 3)?;
        assert_eq!(s.as_slice(), &[1, 2, 0, 0, 0, 3, 4]);
        s.remove(2, 3)?;
        assert_eq!(s.as_slice(), &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn mem_rejects_out_of_range_reads() {
        let s = MemStream::from(vec![0; 4]);
        let mut buf = [0; 2];
        assert!(s.read_at(3, &mut buf).is_err());
        assert!(s.read_at(usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn read_at_most_zero_fills_tail() -> Result<()> {
        let s = MemStream::from(vec![7, 8]);
        let mut buf = [0xAA; 4];
        assert_eq!(s.read_at_most(1, &mut buf)?, 1);
        assert_eq!(buf, [8, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn substream_resize_shifts_parent_tail() -> Result<()> {
        let parent = MemStream::wrap(vec![1, 2, 3, 4, 5, 6]);
        let mut sub = SubStream::new(parent.clone(), 2, 2)?;
        sub.write_at(0, &[0x33, 0x44])?;
        sub.truncate(4)?;
        sub.write_at(2, &[0xAA, 0xBB])?;
        assert_eq!(
            parent.borrow().read_all()?,
            vec![1, 2, 0x33, 0x44, 0xAA, 0xBB, 5, 6]
        );
        sub.truncate(1)?;
        assert_eq!(parent.borrow().read_all()?, vec![1, 2, 0x33, 5, 6]);
        Ok(())
    }

    #[test]
    fn substream_stays_inside_window() -> Result<()> {
        let parent = MemStream::wrap(vec![0; 8]);
        let mut sub = SubStream::new(parent, 2, 4)?;
        assert!(sub.write_at(3, &[0, 0]).is_err());
        let mut buf = [0; 5];
        assert!(sub.read_at(0, &mut buf).is_err());
        Ok(())
    }
}
