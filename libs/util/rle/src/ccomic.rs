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

// Captain Comic fullscreen RLE. The stream opens with one 16-bit
// little-endian plane length (always 8000) and then covers all four
// planes with two command forms: a byte with the high bit set repeats
// the following byte (count & 0x7F) times, anything else passes that
// many bytes through literally. No command runs across a plane
// boundary.

use crate::{ChunkFilter, PLANE_LEN};
use log::warn;

/// Largest count either command form can carry.
const MAX_RUN: usize = 0x7F;

/// Number of planes covered by the single plane-length prefix.
const PLANE_COUNT: usize = 4;

/// Decoder.
#[derive(Debug, Default)]
pub struct ComicUnrle {
    header: [u8; 2],
    header_have: usize,
    remaining: usize,
    repeat: usize,
    val: u8,
    literal: usize,
}

impl ComicUnrle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkFilter for ComicUnrle {
    fn reset(&mut self, _total_input_len: usize) {
        *self = Self::default();
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> (usize, usize) {
        let mut r = 0;
        let mut w = 0;

        while self.header_have < 2 && r < input.len() {
            self.header[self.header_have] = input[r];
            self.header_have += 1;
            r += 1;
            if self.header_have == 2 {
                let plane_len = u16::from_le_bytes(self.header) as usize;
                if plane_len != PLANE_LEN {
                    warn!("ccomic: plane length {plane_len} instead of {PLANE_LEN}");
                }
                self.remaining = plane_len * PLANE_COUNT;
            }
        }
        if self.header_have < 2 {
            return (r, w);
        }

        loop {
            while self.repeat > 0 && w < output.len() {
                output[w] = self.val;
                w += 1;
                self.repeat -= 1;
                self.remaining -= 1;
            }
            while self.literal > 0 && r < input.len() && w < output.len() {
                output[w] = input[r];
                r += 1;
                w += 1;
                self.literal -= 1;
                self.remaining -= 1;
            }
            // Stalled on input or output space; resume next call.
            if self.repeat > 0 || self.literal > 0 {
                break;
            }
            if self.remaining == 0 || r >= input.len() {
                break;
            }
            let code = input[r];
            if code & 0x80 != 0 {
                if r + 1 >= input.len() {
                    // The repeated value is in the next chunk.
                    break;
                }
                self.repeat = ((code & 0x7F) as usize).min(self.remaining);
                self.val = input[r + 1];
                r += 2;
            } else {
                self.literal = (code as usize).min(self.remaining);
                r += 1;
            }
        }

        (r, w)
    }
}

/// Encoder.
#[derive(Debug, Default)]
pub struct ComicRle {
    header_sent: bool,
    val: u8,
    count: usize,
    literal: Vec<u8>,
    col: usize,
}

impl ComicRle {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_literal(&mut self, output: &mut [u8], w: &mut usize) -> bool {
        while !self.literal.is_empty() {
            let room = PLANE_LEN - self.col % PLANE_LEN;
            let len = self.literal.len().min(MAX_RUN).min(room);
            if *w + 1 + len > output.len() {
                return false;
            }
            output[*w] = len as u8;
            *w += 1;
            output[*w..*w + len].copy_from_slice(&self.literal[..len]);
            *w += len;
            self.col += len;
            self.literal.drain(..len);
        }
        true
    }
}

impl ChunkFilter for ComicRle {
    fn reset(&mut self, _total_input_len: usize) {
        *self = Self::default();
    }

    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> (usize, usize) {
        let mut r = 0;
        let mut w = 0;

        if !self.header_sent {
            if output.len() < 2 {
                return (0, 0);
            }
            output[..2].copy_from_slice(&(PLANE_LEN as u16).to_le_bytes());
            w = 2;
            self.header_sent = true;
        }

        while w + 2 < output.len()
            && (r < input.len()
                || (input.is_empty() && (self.count > 0 || !self.literal.is_empty())))
        {
            if r < input.len() && input[r] == self.val && self.count < MAX_RUN {
                self.count += 1;
                r += 1;
                continue;
            }

            // Run broken, input exhausted, or the count is at max.
            if self.count >= 2 {
                if !self.write_literal(output, &mut w) {
                    break;
                }
                if output.len() - w < 2 {
                    break;
                }
                let room = PLANE_LEN - self.col % PLANE_LEN;
                let amt = self.count.min(MAX_RUN).min(room);
                output[w] = 0x80 | amt as u8;
                output[w + 1] = self.val;
                w += 2;
                self.col += amt;
                self.count -= amt;
                if self.count > 0 {
                    // Rest of a boundary-split run; it may yet grow.
                    continue;
                }
            } else if self.count == 1 {
                self.literal.push(self.val);
                self.count = 0;
            }

            if r < input.len() {
                self.val = input[r];
                self.count = 1;
                r += 1;
            } else {
                self.count = 0;
            }

            if input.is_empty() && !self.write_literal(output, &mut w) {
                break;
            }
        }

        (r, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_constant_row_with_plane_prefix() {
        // One 320-pixel row of a single plane is 40 bytes.
        let mut enc = ComicRle::new();
        let out = enc.apply_all(&[0xFF; 40]);
        assert_eq!(&out[..4], &[0x40, 0x1F, 0xA8, 0xFF]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn decodes_what_it_encoded() {
        let mut data = vec![0xAAu8; PLANE_LEN];
        data.extend((0..PLANE_LEN).map(|i| (i % 251) as u8));
        data.extend(vec![0x00u8; PLANE_LEN]);
        data.extend((0..PLANE_LEN).map(|i| if i % 9 < 6 { 0x42 } else { i as u8 }));

        let mut enc = ComicRle::new();
        let packed = enc.apply_all(&data);
        let mut dec = ComicUnrle::new();
        let unpacked = dec.apply_all(&packed);
        assert_eq!(unpacked, data);
    }

    #[test]
    fn runs_never_cross_the_plane_boundary() {
        // A run straddling the first plane boundary has to be split.
        let mut data = vec![0u8; PLANE_LEN - 3];
        data.extend(vec![0x77u8; 6]);
        data.resize(PLANE_LEN * 4, 0);

        let mut enc = ComicRle::new();
        let packed = enc.apply_all(&data);

        // Walk the commands and check none spans a multiple of 8000.
        let mut pos = 0usize;
        let mut i = 2;
        while i < packed.len() {
            let c = packed[i];
            let len = if c & 0x80 != 0 {
                i += 2;
                (c & 0x7F) as usize
            } else {
                i += 1 + c as usize;
                c as usize
            };
            let before = pos / PLANE_LEN;
            pos += len;
            let after = (pos - 1) / PLANE_LEN;
            assert_eq!(before, after, "command crosses plane boundary at {pos}");
        }
        assert_eq!(pos, PLANE_LEN * 4);

        let mut dec = ComicUnrle::new();
        assert_eq!(dec.apply_all(&packed), data);
    }

    #[test]
    fn survives_single_byte_output_buffers() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i / 7) as u8).collect();
        let mut enc = ComicRle::new();
        let packed = enc.apply_all(&data);

        let mut dec = ComicUnrle::new();
        let mut out = Vec::new();
        let mut pos = 0;
        let mut stall = 0;
        loop {
            let mut byte = [0u8; 1];
            let feed = (input_chunk(&packed, pos, 3)).min(packed.len() - pos);
            let (consumed, produced) = dec.transform(&packed[pos..pos + feed], &mut byte);
            pos += consumed;
            out.extend_from_slice(&byte[..produced]);
            if consumed == 0 && produced == 0 {
                stall += 1;
                if pos >= packed.len() || stall > 2 {
                    break;
                }
            } else {
                stall = 0;
            }
        }
        assert_eq!(out, data);
    }

    fn input_chunk(data: &[u8], pos: usize, want: usize) -> usize {
        want.min(data.len().saturating_sub(pos))
    }
}
