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

//! Sharded file planning: deterministic per-worker import object lists, and
//! deterministic per-worker output naming for export. The naming scheme
//! matches the reference OSS external-table driver's `oss_write_next_file`.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    config::FileSource,
    data::{ObjectRef, WorkerIdentity},
    error::{ProtocolViolationSnafu, Result},
    object_client::ObjectClient,
};

#[derive(Clone)]
pub struct FilePlanner {
    client: Arc<ObjectClient>,
    bucket: String,
    identity: WorkerIdentity,
}

impl FilePlanner {
    pub fn new(client: Arc<ObjectClient>, bucket: impl Into<String>, identity: WorkerIdentity) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            identity,
        }
    }

    /// Compute this worker's disjoint subset of input objects. Entries with
    /// an unknown length are `head`-ed so the uncompressed reader's
    /// byte-accurate range loop always has a length.
    pub fn plan_import(&self, source: &FileSource) -> Result<VecDeque<ObjectRef>> {
        let ordered = self.list_ordered(source)?;

        let mut assigned = VecDeque::new();
        for (i, obj) in ordered.into_iter().enumerate() {
            if self.identity.owns_index(i) {
                assigned.push_back(obj);
            }
        }

        let mut filled = VecDeque::with_capacity(assigned.len());
        for mut obj in assigned {
            if obj.length.is_none() {
                let head = self.client.head(&obj.bucket, &obj.key)?;
                obj.length = Some(head.length);
            }
            filled.push_back(obj);
        }
        Ok(filled)
    }

    /// The full, globally-ordered file list before sharding.
    fn list_ordered(&self, source: &FileSource) -> Result<Vec<ObjectRef>> {
        match source {
            FileSource::Dir(dir) => self.client.list(&self.bucket, dir, Some("/")),
            FileSource::Prefix(prefix) => self.client.list(&self.bucket, prefix, None),
            FileSource::Path(path) => {
                let mut objects = vec![ObjectRef::new(self.bucket.clone(), path.clone())];
                let mut n = 1u32;
                loop {
                    let candidate = format!("{path}.{n}");
                    match self.client.head(&self.bucket, &candidate) {
                        Ok(head) => {
                            objects.push(ObjectRef::with_length(
                                self.bucket.clone(),
                                candidate,
                                head.length,
                            ));
                            n += 1;
                        }
                        Err(e) if e.is_not_found() => break,
                        Err(e) => return Err(e),
                    }
                }
                Ok(objects)
            }
        }
    }

    /// Compute the next export object name for `(relname, fileindex)` and
    /// verify it does not already exist. `start_time_us` is the query's
    /// start timestamp in microseconds since epoch, supplied by the adapter
    /// at `TableInstance` construction.
    pub fn plan_export_name(
        &self,
        prefix: &str,
        relname: &str,
        fileindex: u64,
        start_time_us: u64,
    ) -> Result<ObjectRef> {
        let key = if self.identity.seg_index == 0 && fileindex == 0 {
            format!("{prefix}{relname}_{start_time_us}")
        } else {
            let interleaved = fileindex * self.identity.seg_count as u64 + self.identity.seg_index as u64;
            format!("{prefix}{relname}_{start_time_us}.{interleaved}")
        };

        match self.client.head(&self.bucket, &key) {
            Ok(_) => Err(ProtocolViolationSnafu {
                message: format!("export target object already exists: {}/{}", self.bucket, key),
            }
            .build()),
            Err(e) if e.is_not_found() => Ok(ObjectRef::new(self.bucket.clone(), key)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    fn identity(i: u32, n: u32) -> WorkerIdentity {
        WorkerIdentity::new(i, n)
    }

    #[test]
    fn test_planner_partition_covers_and_partitions_list() {
        let mem = MemoryTransport::new();
        for i in 0..7 {
            mem.put_object("b", &format!("d/f{i}"), vec![0u8; i + 1]);
        }
        let client = mem.into_client();

        let mut union = Vec::new();
        for seg_index in 0..3 {
            let planner = FilePlanner::new(client.clone(), "b", identity(seg_index, 3));
            let assigned = planner.plan_import(&FileSource::Dir("d/".to_string())).unwrap();
            union.extend(assigned.into_iter().map(|o| o.key));
        }
        union.sort();
        let expected: Vec<String> = (0..7).map(|i| format!("d/f{i}")).collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_planner_skips_directory_style_entries() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "d/sub/", Vec::new());
        mem.put_object("b", "d/file", b"hi".to_vec());
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", identity(0, 1));
        let assigned = planner.plan_import(&FileSource::Dir("d/".to_string())).unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].key, "d/file");
    }

    #[test]
    fn test_planner_path_probe_sequence() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "p", vec![0u8; 100]);
        mem.put_object("b", "p.1", vec![0u8; 50]);
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", identity(0, 1));
        let assigned = planner.plan_import(&FileSource::Path("p".to_string())).unwrap();
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0].length, Some(100));
        assert_eq!(assigned[1].length, Some(50));
    }

    #[test]
    fn test_export_naming_scheme() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let planner0 = FilePlanner::new(client.clone(), "b", identity(0, 2));
        let name0 = planner0.plan_export_name("out/", "tbl", 0, 1000).unwrap();
        assert_eq!(name0.key, "out/tbl_1000");

        let planner1 = FilePlanner::new(client.clone(), "b", identity(1, 2));
        let name1 = planner1.plan_export_name("out/", "tbl", 0, 1000).unwrap();
        assert_eq!(name1.key, "out/tbl_1000.1");

        let name2 = planner0.plan_export_name("out/", "tbl", 1, 1000).unwrap();
        assert_eq!(name2.key, "out/tbl_1000.2");
    }

    #[test]
    fn test_export_aborts_if_target_exists() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "out/tbl_1000", b"pre-existing".to_vec());
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", identity(0, 1));
        let err = planner.plan_export_name("out/", "tbl", 0, 1000).unwrap_err();
        assert!(matches!(err, crate::error::Error::ProtocolViolation { .. }));
    }
}
