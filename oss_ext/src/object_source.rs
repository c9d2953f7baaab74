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

//! The "current object + cursor" cursor shared by [`crate::async_reader`] and
//! [`crate::sync_reader`]: a byte-accurate `get_range` driver over a
//! per-worker file queue that also implements [`crate::inflate::InflateUpstream`]
//! so the same queue feeds either the raw reader or the decompressor.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;

use crate::{
    data::ObjectRef,
    error::Result,
    inflate::InflateUpstream,
    object_client::ObjectClient,
};

pub(crate) struct ObjectSource {
    client: Arc<ObjectClient>,
    files: VecDeque<ObjectRef>,
    current: Option<ObjectRef>,
    cursor: u64,
}

impl ObjectSource {
    pub fn new(client: Arc<ObjectClient>, mut files: VecDeque<ObjectRef>) -> Self {
        let current = files.pop_front();
        Self {
            client,
            files,
            current,
            cursor: 0,
        }
    }

    pub fn current(&self) -> Option<&ObjectRef> {
        self.current.as_ref()
    }

    /// Bytes left in the current object, per the length the planner
    /// populated at construction time.
    pub fn remaining(&self) -> u64 {
        match &self.current {
            Some(o) => o.length.unwrap_or(0).saturating_sub(self.cursor),
            None => 0,
        }
    }

    /// A direct ranged read of up to `max_len` bytes from the current
    /// object, advancing the cursor by the number of bytes returned.
    pub fn get_range(&mut self, max_len: u64) -> Result<Bytes> {
        let current = self
            .current
            .as_ref()
            .expect("get_range called with no current object");
        let len = max_len.min(self.remaining());
        let bytes = self
            .client
            .get_range(&current.bucket, &current.key, self.cursor, len)?;
        self.cursor += bytes.len() as u64;
        Ok(bytes)
    }

    /// Move to the next queued object. `true` if one was available.
    pub fn advance_object(&mut self) -> bool {
        self.current = self.files.pop_front();
        self.cursor = 0;
        self.current.is_some()
    }
}

impl InflateUpstream for ObjectSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if self.current.is_none() {
            return Ok(0);
        }
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let want = (dst.len() as u64).min(remaining);
        let bytes = self.get_range(want)?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn advance(&mut self) -> Result<bool> {
        Ok(self.advance_object())
    }
}
