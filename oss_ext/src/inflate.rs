// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Streaming GZIP/ZLIB decoder that rolls across object boundaries.
//!
//! `flate2`'s high-level `GzDecoder`/`MultiGzDecoder` own their input
//! reader for the reader's whole lifetime, which does not fit the
//! demand-read shape needed here (`pull(upstream, dst)`, upstream supplied
//! per call, object rolled by the caller). Instead this drives
//! `flate2::Decompress` (the raw zlib/deflate binding) directly,
//! auto-detecting gzip vs. zlib framing by sniffing the leading magic
//! bytes the way a `MAX_WBITS + 32` window-bits setting would, and
//! stripping the gzip header by hand since raw `Decompress` only
//! understands zlib framing or
//! headerless deflate.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{InternalInvariantSnafu, Result};

/// Default chunk size for both the compressed-input and decompressed-output
/// staging buffers (`OSS_ZIP_DECOMPRESS_CHUNKSIZE`).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Supplies compressed bytes on demand and knows how to move to the next
/// object when the current one is exhausted. `AsyncReader`/`SyncReader`
/// implement this over an [`crate::object_client::ObjectClient`] plus the
/// [`crate::file_planner`]'s file queue; tests can implement it directly
/// over an in-memory byte list.
pub trait InflateUpstream {
    /// Read up to `dst.len()` compressed bytes from the current object.
    /// Returns the number of bytes actually read; `0` means the current
    /// object is exhausted (not necessarily the whole file set).
    fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Advance to the next object. `Ok(true)` if a next object exists and
    /// `read` may be called again; `Ok(false)` if the file set is exhausted
    /// (true EOF).
    fn advance(&mut self) -> Result<bool>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Framing {
    Gzip,
    Zlib,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Parse a gzip member header starting at `buf[0]`, return its length in
/// bytes, or `None` if `buf` does not (yet) contain a complete header.
fn gzip_header_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 10 || buf[0..2] != GZIP_MAGIC {
        return None;
    }
    let flg = buf[3];
    let mut pos = 10usize;

    const FEXTRA: u8 = 1 << 2;
    const FNAME: u8 = 1 << 3;
    const FCOMMENT: u8 = 1 << 4;
    const FHCRC: u8 = 1 << 1;

    if flg & FEXTRA != 0 {
        let xlen = *buf.get(pos)? as usize | ((*buf.get(pos + 1)? as usize) << 8);
        pos += 2 + xlen;
    }
    if flg & FNAME != 0 {
        pos += buf.get(pos..)?.iter().position(|&b| b == 0)? + 1;
    }
    if flg & FCOMMENT != 0 {
        pos += buf.get(pos..)?.iter().position(|&b| b == 0)? + 1;
    }
    if flg & FHCRC != 0 {
        pos += 2;
    }
    if pos > buf.len() {
        return None;
    }
    Some(pos)
}

pub struct InflateDecoder {
    in_chunk: Vec<u8>,
    out_chunk: Vec<u8>,
    /// Bytes in `out_chunk[out_cursor..out_len]` are unread.
    out_cursor: usize,
    out_len: usize,
    stream: Decompress,
    chunk_size: usize,
    framing: Option<Framing>,
    /// Input bytes read from upstream but not yet fed to `stream` (either
    /// because they were the not-yet-stripped gzip header, or because the
    /// previous `decompress()` call did not consume the whole chunk).
    pending_input: Vec<u8>,
}

impl InflateDecoder {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            in_chunk: vec![0; chunk_size],
            out_chunk: vec![0; chunk_size],
            out_cursor: 0,
            out_len: 0,
            stream: Decompress::new(false),
            chunk_size,
            framing: None,
            pending_input: Vec::new(),
        }
    }

    /// Reset all per-object state. Called at every object boundary: each
    /// object is an independently self-framed stream, so the inflate state
    /// must restart from scratch rather than carry over dictionary/CRC
    /// state from the previous one.
    fn reset(&mut self) {
        self.out_cursor = 0;
        self.out_len = 0;
        self.framing = None;
        self.pending_input.clear();
    }

    /// `pull(upstream, dst) -> bytes_written`.
    pub fn pull(&mut self, upstream: &mut dyn InflateUpstream, dst: &mut [u8]) -> Result<usize> {
        loop {
            // Step 1: serve buffered output first.
            if self.out_cursor < self.out_len {
                let n = (self.out_len - self.out_cursor).min(dst.len());
                dst[..n].copy_from_slice(&self.out_chunk[self.out_cursor..self.out_cursor + n]);
                self.out_cursor += n;
                return Ok(n);
            }

            // Step 2: top up pending_input by demand-reading from upstream
            // if we don't already have unconsumed bytes left over.
            if self.pending_input.is_empty() {
                let in_len = upstream.read(&mut self.in_chunk[..self.chunk_size])?;
                if in_len == 0 {
                    if upstream.advance()? {
                        self.reset();
                        continue;
                    }
                    return Ok(0);
                }
                self.pending_input.extend_from_slice(&self.in_chunk[..in_len]);
            }

            // Detect framing and strip the gzip header on the first chunk
            // of a new object-stream.
            if self.framing.is_none() {
                if self.pending_input.len() >= 2 && self.pending_input[0..2] == GZIP_MAGIC {
                    match gzip_header_len(&self.pending_input) {
                        Some(header_len) => {
                            self.pending_input.drain(0..header_len);
                            self.framing = Some(Framing::Gzip);
                            self.stream = Decompress::new(false);
                        }
                        None => {
                            return Err(InternalInvariantSnafu {
                                message: "gzip header split across an unexpectedly small read"
                                    .to_string(),
                            }
                            .build());
                        }
                    }
                } else {
                    self.framing = Some(Framing::Zlib);
                    self.stream = Decompress::new(true);
                }
            }

            // Step 3: one inflate step.
            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .decompress(
                    &self.pending_input,
                    &mut self.out_chunk[..self.chunk_size],
                    FlushDecompress::None,
                )
                .map_err(|e| {
                    InternalInvariantSnafu {
                        message: format!("inflate failed: {e}"),
                    }
                    .build()
                })?;
            let consumed = (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;
            self.pending_input.drain(0..consumed);
            self.out_cursor = 0;
            self.out_len = produced;

            match status {
                Status::Ok | Status::BufError => {
                    if produced == 0 {
                        // No output yet (e.g. only header/dictionary bytes
                        // consumed so far); go around for more input.
                        continue;
                    }
                }
                Status::StreamEnd => {
                    // Z_STREAM_END ends only this object's stream; any
                    // gzip trailer bytes left in pending_input are the
                    // member's CRC/size footer and are not re-fed to
                    // `stream`. Looping back re-enters step 1/2: the next
                    // upstream.read() for this object should return 0,
                    // rolling to the next object.
                    self.pending_input.clear();
                    if produced == 0 {
                        continue;
                    }
                }
            }
        }
    }
}

impl Default for InflateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Feeds a fixed list of already-gzipped objects to the decoder one
    /// "object" at a time, in caller-chosen read sizes.
    struct ListUpstream {
        objects: Vec<Vec<u8>>,
        idx: usize,
        pos: usize,
    }

    impl InflateUpstream for ListUpstream {
        fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
            if self.idx >= self.objects.len() {
                return Ok(0);
            }
            let obj = &self.objects[self.idx];
            if self.pos >= obj.len() {
                return Ok(0);
            }
            let n = (obj.len() - self.pos).min(dst.len());
            dst[..n].copy_from_slice(&obj[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn advance(&mut self) -> Result<bool> {
            self.idx += 1;
            self.pos = 0;
            Ok(self.idx < self.objects.len())
        }
    }

    fn pull_all(decoder: &mut InflateDecoder, upstream: &mut dyn InflateUpstream, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = decoder.pull(upstream, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_round_trip_single_object() {
        let mut upstream = ListUpstream {
            objects: vec![gzip(b"hello world")],
            idx: 0,
            pos: 0,
        };
        let mut decoder = InflateDecoder::new();
        let out = pull_all(&mut decoder, &mut upstream, 4096);
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_rolls_across_object_boundary() {
        // Two independent gzip streams, one per object, read in small
        // chunks, should concatenate to "helloworld".
        let mut upstream = ListUpstream {
            objects: vec![gzip(b"hello"), gzip(b"world")],
            idx: 0,
            pos: 0,
        };
        let mut decoder = InflateDecoder::new();
        let out = pull_all(&mut decoder, &mut upstream, 3);
        assert_eq!(out, b"helloworld");
    }

    #[test]
    fn test_round_trip_large_payload_across_chunk_boundary() {
        // Boundary behaviors: object payload straddles C-1, C, C+1.
        let data: Vec<u8> = (0..(DEFAULT_CHUNK_SIZE + 1) as u32)
            .map(|i| (i % 251) as u8)
            .collect();
        let mut upstream = ListUpstream {
            objects: vec![gzip(&data)],
            idx: 0,
            pos: 0,
        };
        let mut decoder = InflateDecoder::new();
        let out = pull_all(&mut decoder, &mut upstream, 65536);
        assert_eq!(out.len(), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_three_objects_many_small_reads() {
        let parts = ["alpha", "beta", "gamma"];
        let mut upstream = ListUpstream {
            objects: parts.iter().map(|p| gzip(p.as_bytes())).collect(),
            idx: 0,
            pos: 0,
        };
        let mut decoder = InflateDecoder::new();
        let out = pull_all(&mut decoder, &mut upstream, 1);
        assert_eq!(out, b"alphabetagamma");
    }
}
