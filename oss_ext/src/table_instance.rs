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

//! The per-session resource owner.
//!
//! `TableInstance` is a tagged union over the four reader/writer variants
//! rather than a trait object or function-pointer table, following the same
//! `InnerIterator::{Blocking, Async}` pattern used around
//! `wal::manager::error`: dispatch is an explicit match, never a vtable
//! call through an opaque context.

use std::sync::Arc;

use crate::{
    async_reader::AsyncReader,
    config::{CompressionType, ExternalTableOptions, Mode},
    data::WorkerIdentity,
    error::{InternalInvariantSnafu, Result},
    file_planner::FilePlanner,
    object_client::ObjectClient,
    sync_reader::SyncReader,
    writer::{compress::CompressWriter, plain::PlainWriter},
};

enum Reader {
    Async(AsyncReader),
    Sync(SyncReader),
}

enum Writer {
    Plain(PlainWriter),
    Compress(CompressWriter),
}

enum Body {
    Import(Reader),
    Export(Writer),
}

/// Running totals surfaced to the engine for progress reporting; not part
/// of any correctness path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub rows: u64,
    pub bytes: u64,
}

/// Everything one segment worker's import or export session owns:
/// optionally a background thread (`AsyncReader`) or a subprocess
/// (`CompressWriter`), always torn down by `close` or, failing that, `Drop`.
pub struct TableInstance {
    identity: WorkerIdentity,
    stats: Stats,
    body: Body,
}

impl TableInstance {
    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Build an import instance: plan this worker's file shard, then wrap
    /// it in the async or sync reader the options call for.
    pub fn open_import(
        client: Arc<ObjectClient>,
        options: &ExternalTableOptions,
        identity: WorkerIdentity,
    ) -> Result<Self> {
        debug_assert_eq!(options.mode, Mode::Import);
        let planner = FilePlanner::new(client.clone(), options.bucket.clone(), identity);
        let files = planner.plan_import(&options.source)?;

        let reader = if options.r#async {
            Reader::Async(AsyncReader::open(client, files, options.compression))
        } else {
            Reader::Sync(SyncReader::open(client, files, options.compression))
        };

        Ok(Self {
            identity,
            stats: Stats::default(),
            body: Body::Import(reader),
        })
    }

    /// Build an export instance: open the plain or compressed writer the
    /// options call for. `relname` and `start_time_us` are engine-supplied
    /// facts outside this core's scope, threaded through from the adapter.
    pub fn open_export(
        client: Arc<ObjectClient>,
        options: &ExternalTableOptions,
        identity: WorkerIdentity,
        relname: impl Into<String>,
        start_time_us: u64,
    ) -> Result<Self> {
        debug_assert_eq!(options.mode, Mode::Export);
        let planner = FilePlanner::new(client.clone(), options.bucket.clone(), identity);
        let prefix = match &options.source {
            crate::config::FileSource::Prefix(p) => p.clone(),
            other => {
                return Err(InternalInvariantSnafu {
                    message: format!("export options carry a non-prefix file source: {other:?}"),
                }
                .build())
            }
        };
        let relname = relname.into();

        let writer = match options.compression {
            CompressionType::Text => Writer::Plain(PlainWriter::open(
                client,
                planner,
                prefix,
                relname,
                start_time_us,
                options.export.flush_block_bytes as usize,
                options.export.file_max_bytes,
            )?),
            CompressionType::Gzip => Writer::Compress(CompressWriter::open(
                client,
                planner,
                prefix,
                relname,
                start_time_us,
                options.export.file_max_bytes,
                options.export.clone(),
            )?),
        };

        Ok(Self {
            identity,
            stats: Stats::default(),
            body: Body::Export(writer),
        })
    }

    /// Consumer-side read for an import instance: `read(dst, n)`.
    /// `InternalInvariant` if called on an export instance.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let n = match &mut self.body {
            Body::Import(Reader::Async(r)) => r.read(dst)?,
            Body::Import(Reader::Sync(r)) => r.read(dst)?,
            Body::Export(_) => {
                return Err(InternalInvariantSnafu {
                    message: "read called on an export TableInstance".to_string(),
                }
                .build())
            }
        };
        self.stats.bytes += n as u64;
        Ok(n)
    }

    /// Producer-side write for an export instance. `InternalInvariant` if
    /// called on an import instance.
    pub fn write_row(&mut self, row: &[u8]) -> Result<()> {
        match &mut self.body {
            Body::Export(Writer::Plain(w)) => w.write(row)?,
            Body::Export(Writer::Compress(w)) => w.write(row)?,
            Body::Import(_) => {
                return Err(InternalInvariantSnafu {
                    message: "write_row called on an import TableInstance".to_string(),
                }
                .build())
            }
        }
        self.stats.rows += 1;
        self.stats.bytes += row.len() as u64;
        Ok(())
    }

    /// Orderly teardown: flushes and closes an export writer (joining its
    /// uploader thread and reaping the compressor subprocess); an import
    /// reader's background thread, if any, is joined by its own `Drop`
    /// once this instance is dropped.
    pub fn close(self) -> Result<()> {
        match self.body {
            Body::Import(_) => Ok(()),
            Body::Export(Writer::Plain(w)) => w.close(),
            Body::Export(Writer::Compress(w)) => w.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FileSource, testing::MemoryTransport};

    fn options(mode: Mode, source: FileSource, compression: CompressionType) -> ExternalTableOptions {
        ExternalTableOptions {
            endpoint: "ep".to_string(),
            id: "ak".to_string(),
            key: "sk".to_string(),
            bucket: "b".to_string(),
            source,
            compression,
            r#async: true,
            mode,
            request: crate::config::RequestTuning::default(),
            export: crate::config::ExportTuning::default(),
        }
    }

    #[test]
    fn test_import_read_accumulates_byte_stats() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "d/f", vec![9u8; 10]);
        let client = mem.into_client();
        let opts = options(Mode::Import, FileSource::Dir("d/".to_string()), CompressionType::Text);
        let identity = WorkerIdentity::new(0, 1);
        let mut instance = TableInstance::open_import(client, &opts, identity).unwrap();

        let mut buf = [0u8; 32];
        let n = instance.read(&mut buf).unwrap();
        assert_eq!(n, 10);
        assert_eq!(instance.stats().bytes, 10);
        assert_eq!(instance.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_row_on_import_instance_is_rejected() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let opts = options(Mode::Import, FileSource::Dir("d/".to_string()), CompressionType::Text);
        let mut instance = TableInstance::open_import(client, &opts, WorkerIdentity::new(0, 1)).unwrap();
        let err = instance.write_row(b"row").unwrap_err();
        assert!(matches!(err, crate::error::Error::InternalInvariant { .. }));
    }

    #[test]
    fn test_export_write_and_close_accumulates_row_stats() {
        let mem = MemoryTransport::new();
        let client = mem.clone().into_client();
        let opts = options(Mode::Export, FileSource::Prefix("out/".to_string()), CompressionType::Text);
        let mut instance =
            TableInstance::open_export(client, &opts, WorkerIdentity::new(0, 1), "tbl", 42).unwrap();
        instance.write_row(b"hello").unwrap();
        instance.write_row(b"world").unwrap();
        assert_eq!(instance.stats().rows, 2);
        instance.close().unwrap();
        assert!(mem.object_exists("b", "out/tbl_42"));
    }

    #[test]
    fn test_read_on_export_instance_is_rejected() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let opts = options(Mode::Export, FileSource::Prefix("out/".to_string()), CompressionType::Text);
        let mut instance =
            TableInstance::open_export(client, &opts, WorkerIdentity::new(0, 1), "tbl", 1).unwrap();
        let mut buf = [0u8; 8];
        let err = instance.read(&mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::InternalInvariant { .. }));
        instance.close().unwrap();
    }

    #[test]
    fn test_open_import_with_empty_files_reads_immediate_eof() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let opts = options(Mode::Import, FileSource::Dir("empty/".to_string()), CompressionType::Text);
        let mut instance =
            TableInstance::open_import(client, &opts, WorkerIdentity::new(0, 1)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(instance.read(&mut buf).unwrap(), 0);
    }
}
