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

// The two Captain Comic run-length encodings. Both are push-style
// chunked filters: the caller hands in whatever input and output space
// it has, the filter consumes and produces what it can, and any
// half-finished run survives inside the filter until the next call.
// End of stream is signalled by calling transform with an empty input
// until it produces nothing.

mod ccomic;
mod ccomic2;

pub use ccomic::{ComicRle, ComicUnrle};
pub use ccomic2::{Comic2Rle, Comic2Unrle};

/// One plane of a 320x200 1bpp screen, in bytes. Both encoders split
/// any code that would run across this boundary.
pub const PLANE_LEN: usize = 8000;

/// Chunked filter interface shared by the encoders and decoders.
pub trait ChunkFilter {
    /// Restart the state machine for a fresh stream of `total_input_len`
    /// bytes.
    fn reset(&mut self, total_input_len: usize);

    /// Consume some of `input` and produce some of `output`, returning
    /// `(consumed, produced)`. Either side may be smaller than the
    /// filter would like; it picks up where it left off next call.
    fn transform(&mut self, input: &[u8], output: &mut [u8]) -> (usize, usize);

    /// Drive `transform` over all of `input` with a bounded scratch
    /// buffer, then flush. Stops once the filter goes quiet.
    fn apply_all(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        let mut pos = 0;
        loop {
            let (consumed, produced) = self.transform(&input[pos..], &mut buf);
            pos += consumed;
            out.extend_from_slice(&buf[..produced]);
            if consumed == 0 && produced == 0 {
                break;
            }
        }
        out
    }
}
