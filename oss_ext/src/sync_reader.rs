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

//! The zero-thread reader variant: every consumer read is serviced
//! directly, with no background producer or ring buffer.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    config::CompressionType,
    data::ObjectRef,
    error::Result,
    inflate::InflateDecoder,
    object_client::ObjectClient,
    object_source::ObjectSource,
};

pub struct SyncReader {
    source: ObjectSource,
    decoder: Option<InflateDecoder>,
}

impl SyncReader {
    pub fn open(client: Arc<ObjectClient>, files: VecDeque<ObjectRef>, compression: CompressionType) -> Self {
        Self {
            source: ObjectSource::new(client, files),
            decoder: match compression {
                CompressionType::Gzip => Some(InflateDecoder::new()),
                CompressionType::Text => None,
            },
        }
    }

    /// Direct `get_range`/`pull` calls, advancing to the next file when the
    /// current one is exhausted, until `dst` is full or the file set is
    /// truly exhausted. Returns `< dst.len()` only at true end-of-input, so
    /// a single caller read can span several input objects.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        match &mut self.decoder {
            None => {
                while copied < dst.len() {
                    if self.source.current().is_none() {
                        break;
                    }
                    if self.source.remaining() == 0 {
                        if !self.source.advance_object() {
                            break;
                        }
                        continue;
                    }
                    let bytes = self.source.get_range((dst.len() - copied) as u64)?;
                    if bytes.is_empty() {
                        continue;
                    }
                    dst[copied..copied + bytes.len()].copy_from_slice(&bytes);
                    copied += bytes.len();
                }
            }
            Some(dec) => {
                while copied < dst.len() {
                    let n = dec.pull(&mut self.source, &mut dst[copied..])?;
                    if n == 0 {
                        break;
                    }
                    copied += n;
                }
            }
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    #[test]
    fn test_uncompressed_sync_reads_across_sequenced_files() {
        // filepath=p, server has p (100 bytes) and p.1 (50 bytes). A single
        // 4096-byte consumer read should return 150 bytes then EOF.
        let mem = MemoryTransport::new();
        mem.put_object("b", "p", vec![1u8; 100]);
        mem.put_object("b", "p.1", vec![2u8; 50]);
        let client = mem.into_client();
        let files = VecDeque::from([
            ObjectRef::with_length("b", "p", 100),
            ObjectRef::with_length("b", "p.1", 50),
        ]);
        let mut reader = SyncReader::open(client, files, CompressionType::Text);

        let mut buf = [0u8; 4096];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 150);
        assert_eq!(&buf[..100], &[1u8; 100][..]);
        assert_eq!(&buf[100..150], &[2u8; 50][..]);

        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_empty_file_set_is_immediate_eof() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let mut reader = SyncReader::open(client, VecDeque::new(), CompressionType::Text);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
