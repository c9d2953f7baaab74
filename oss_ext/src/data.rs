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

//! Plain data types shared across every component.

use std::fmt;

/// A reference to one OSS object. Immutable once fully populated: `length`
/// starts as `None` until a `head`/`list` call reports the server size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub length: Option<u64>,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            length: None,
        }
    }

    pub fn with_length(bucket: impl Into<String>, key: impl Into<String>, length: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            length: Some(length),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oss://{}/{}", self.bucket, self.key)
    }
}

/// Identity of one of the `seg_count` parallel segment workers. Supplied by
/// the engine at session start; constant for the instance's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub seg_index: u32,
    pub seg_count: u32,
}

impl WorkerIdentity {
    pub fn new(seg_index: u32, seg_count: u32) -> Self {
        assert!(seg_count >= 1, "seg_count must be >= 1");
        assert!(
            seg_index < seg_count,
            "seg_index must be < seg_count, seg_index:{seg_index}, seg_count:{seg_count}"
        );
        Self {
            seg_index,
            seg_count,
        }
    }

    /// Whether list index `i` is assigned to this worker (see `FilePlanner`).
    pub fn owns_index(&self, i: usize) -> bool {
        (i % self.seg_count as usize) == self.seg_index as usize
    }
}
