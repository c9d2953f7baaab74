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

//! Buffered appender with rollover.

use std::sync::Arc;

use crate::{
    data::ObjectRef,
    error::{OversizeRowSnafu, Result},
    file_planner::FilePlanner,
    object_client::ObjectClient,
};

pub struct PlainWriter {
    client: Arc<ObjectClient>,
    planner: FilePlanner,
    prefix: String,
    relname: String,
    start_time_us: u64,
    next_fileindex: u64,

    current: ObjectRef,
    file_offset: u64,
    file_max_bytes: u64,

    buf: Vec<u8>,
    buf_used: usize,
    flush_block_bytes: usize,
}

impl PlainWriter {
    pub fn open(
        client: Arc<ObjectClient>,
        planner: FilePlanner,
        prefix: impl Into<String>,
        relname: impl Into<String>,
        start_time_us: u64,
        flush_block_bytes: usize,
        file_max_bytes: u64,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let relname = relname.into();
        let current = planner.plan_export_name(&prefix, &relname, 0, start_time_us)?;
        Ok(Self {
            client,
            planner,
            prefix,
            relname,
            start_time_us,
            next_fileindex: 1,
            current,
            file_offset: 0,
            file_max_bytes,
            buf: vec![0; flush_block_bytes],
            buf_used: 0,
            flush_block_bytes,
        })
    }

    pub fn write(&mut self, row: &[u8]) -> Result<()> {
        if row.len() > self.flush_block_bytes {
            return Err(OversizeRowSnafu {
                row_len: row.len(),
                limit: self.flush_block_bytes,
            }
            .build());
        }
        if self.buf_used + row.len() > self.flush_block_bytes {
            self.flush()?;
        }
        self.buf[self.buf_used..self.buf_used + row.len()].copy_from_slice(row);
        self.buf_used += row.len();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buf_used == 0 {
            return Ok(());
        }
        if self.file_offset + self.buf_used as u64 > self.file_max_bytes {
            self.rollover()?;
        }
        self.client
            .append(&self.current.bucket, &self.current.key, self.file_offset, &self.buf[..self.buf_used])?;
        self.file_offset += self.buf_used as u64;
        self.buf_used = 0;
        Ok(())
    }

    fn rollover(&mut self) -> Result<()> {
        self.current =
            self.planner
                .plan_export_name(&self.prefix, &self.relname, self.next_fileindex, self.start_time_us)?;
        self.next_fileindex += 1;
        self.file_offset = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    #[cfg(test)]
    pub(crate) fn current_key(&self) -> &str {
        &self.current.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::WorkerIdentity, testing::MemoryTransport};

    #[test]
    fn test_rollover_bound_and_total_bytes() {
        // 3 rows of 4 MiB, flush_block=5 MiB, file_max=8 MiB -> two objects
        // of 8 MiB and 4 MiB.
        const MIB: usize = 1024 * 1024;
        let mem = MemoryTransport::new();
        let client = mem.clone().into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let mut writer = PlainWriter::open(
            client.clone(),
            planner,
            "out/",
            "tbl",
            1000,
            5 * MIB,
            8 * MIB as u64,
        )
        .unwrap();

        let row = vec![7u8; 4 * MIB];
        writer.write(&row).unwrap();
        writer.write(&row).unwrap();
        writer.write(&row).unwrap();
        writer.close().unwrap();

        let obj0 = mem.object_bytes("b", "out/tbl_1000").unwrap();
        let obj1 = mem.object_bytes("b", "out/tbl_1000.1").unwrap();
        assert_eq!(obj0.len(), 8 * MIB);
        assert_eq!(obj1.len(), 4 * MIB);
        assert_eq!(obj0.len() + obj1.len(), 3 * 4 * MIB);
    }

    #[test]
    fn test_oversize_row_rejected() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let mut writer = PlainWriter::open(client.clone(), planner, "out/", "tbl", 1, 16, 1024).unwrap();
        let err = writer.write(&vec![0u8; 17]).unwrap_err();
        assert!(matches!(err, crate::error::Error::OversizeRow { .. }));
    }

    #[test]
    fn test_single_segment_produces_one_object() {
        let mem = MemoryTransport::new();
        let client = mem.clone().into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let mut writer = PlainWriter::open(client.clone(), planner, "out/", "tbl", 1, 64, 1024).unwrap();
        writer.write(b"hello").unwrap();
        writer.close().unwrap();
        assert!(mem.object_exists("b", "out/tbl_1"));
        assert!(!mem.object_exists("b", "out/tbl_1.1"));
    }
}
