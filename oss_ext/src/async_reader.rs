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

//! The background-thread reader core: one producer thread per active import
//! instance keeps a [`RingBuffer`] full by driving either
//! `ObjectClient.get_range` directly or `InflateDecoder.pull`.
//!
//! The producer fetches with the ring's mutex held for the duration of the
//! fetch (`RingBuffer::write_with`), not released around the network call:
//! holding it for the whole fetch keeps the index bookkeeping in one place,
//! the same single-critical-section-per-chunk shape as
//! `analytic_engine::sst::parquet::async_reader`'s prefetch-and-handoff.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use runtime::BackgroundTask;

use crate::{
    config::CompressionType,
    data::ObjectRef,
    error::{Error, Result},
    inflate::InflateDecoder,
    object_client::ObjectClient,
    object_source::ObjectSource,
    ring_buffer::{RingBuffer, READ_UNIT_SIZE, SPIN_SLEEP_MSEC},
};

pub struct AsyncReader {
    ring: Arc<RingBuffer>,
    cancel: Arc<AtomicBool>,
    task: Option<BackgroundTask>,
}

impl AsyncReader {
    pub fn open(client: Arc<ObjectClient>, files: VecDeque<ObjectRef>, compression: CompressionType) -> Self {
        let ring = Arc::new(RingBuffer::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let producer_ring = ring.clone();
        let producer_cancel = cancel.clone();
        let task = BackgroundTask::spawn("oss-ext-reader", move || {
            run_producer(client, files, compression, producer_ring, producer_cancel);
        });

        Self {
            ring,
            cancel,
            task: Some(task),
        }
    }

    /// Consumer-side read: `read(dst, n)`.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.ring.read(dst).map_err(|message| {
            crate::error::InternalInvariantSnafu { message }.build()
        })
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(mut task) = self.task.take() {
            task.join();
        }
    }
}

fn run_producer(
    client: Arc<ObjectClient>,
    files: VecDeque<ObjectRef>,
    compression: CompressionType,
    ring: Arc<RingBuffer>,
    cancel: Arc<AtomicBool>,
) {
    let mut source = ObjectSource::new(client, files);
    let mut decoder = match compression {
        CompressionType::Gzip => Some(InflateDecoder::new()),
        CompressionType::Text => None,
    };

    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        if source.current().is_none() {
            ring.set_eof();
            return;
        }

        let Some(span) = ring.reserve_write_span() else {
            std::thread::sleep(Duration::from_millis(SPIN_SLEEP_MSEC));
            continue;
        };

        match &mut decoder {
            None => {
                if source.remaining() == 0 {
                    if !source.advance_object() {
                        ring.set_eof();
                        return;
                    }
                    continue;
                }
                let fetch_len = span.min(READ_UNIT_SIZE).min(source.remaining() as usize);
                let result: Result<usize> = ring.write_with(fetch_len, |buf| {
                    let bytes = source.get_range(fetch_len as u64)?;
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok::<usize, Error>(bytes.len())
                });
                match result {
                    Ok(_) => {}
                    Err(e) => {
                        logger::warn!("async reader producer failed: {e}");
                        ring.set_error(e.to_string());
                        return;
                    }
                }
            }
            Some(dec) => {
                let fetch_len = span.min(READ_UNIT_SIZE);
                let result: Result<usize> = ring.write_with(fetch_len, |buf| dec.pull(&mut source, buf));
                match result {
                    Ok(0) => {
                        ring.set_eof();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logger::warn!("async reader producer failed: {e}");
                        ring.set_error(e.to_string());
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    #[test]
    fn test_uncompressed_async_reads_single_segment_only() {
        // dir=d/, two 2 MiB objects, seg_count=2 seg_index=0: expect exactly
        // d/a's bytes, in order.
        const TWO_MIB: usize = 2 * 1024 * 1024;
        let mem = MemoryTransport::new();
        let a: Vec<u8> = (0..TWO_MIB).map(|i| (i % 251) as u8).collect();
        let b: Vec<u8> = (0..TWO_MIB).map(|i| ((i + 7) % 251) as u8).collect();
        mem.put_object("b", "d/a", a.clone());
        mem.put_object("b", "d/b", b);
        let client = mem.into_client();

        let files = VecDeque::from([ObjectRef::with_length("b", "d/a", TWO_MIB as u64)]);
        let reader = AsyncReader::open(client, files, CompressionType::Text);

        let mut out = Vec::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, a);
    }

    #[test]
    fn test_gzip_async_rolls_across_objects() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write as _;

        fn gzip(data: &[u8]) -> Vec<u8> {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }

        let mem = MemoryTransport::new();
        let g1 = gzip(b"hello");
        let g2 = gzip(b"world");
        mem.put_object("b", "p/1.gz", g1.clone());
        mem.put_object("b", "p/2.gz", g2.clone());
        let client = mem.into_client();

        let files = VecDeque::from([
            ObjectRef::with_length("b", "p/1.gz", g1.len() as u64),
            ObjectRef::with_length("b", "p/2.gz", g2.len() as u64),
        ]);
        let reader = AsyncReader::open(client, files, CompressionType::Gzip);

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"helloworld");
    }
}
