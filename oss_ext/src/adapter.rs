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

//! The engine-facing glue: a callback ABI with an opaque user context.
//! `ExternalTableAdapter`'s only job is to pack and unpack a
//! [`TableInstance`] behind an opaque [`TableHandle`] the engine carries in
//! its own per-session user context; the core never sees the engine's
//! types. The registry shape below is grounded on `table_engine::engine`'s
//! `HashMap<TableId, ...>` table registry and `wal::manager`'s
//! own-and-join-on-teardown unit lifecycle.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    config::{self, Mode},
    data::WorkerIdentity,
    error::{InternalInvariantSnafu, Result},
    object_client::ObjectClient,
    table_instance::TableInstance,
};

/// An opaque reference to a live [`TableInstance`], the only thing that
/// crosses the adapter boundary in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle(u64);

/// Owns every `TableInstance` live in the current engine session and hands
/// callers an opaque handle instead of a reference, so the engine never
/// touches this crate's types directly.
pub struct ExternalTableAdapter {
    next_handle: AtomicU64,
    instances: Mutex<HashMap<u64, TableInstance>>,
}

impl Default for ExternalTableAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalTableAdapter {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Parse `url`, build a client, and open an import instance. Returns
    /// the handle the engine should present to every later call.
    pub fn open_import(&self, url: &str, identity: WorkerIdentity) -> Result<TableHandle> {
        let options = config::parse(url, Mode::Import)?;
        let client = Arc::new(ObjectClient::new(&options.endpoint, &options.id, &options.key, options.request.clone())?);
        let instance = TableInstance::open_import(client, &options, identity)?;
        Ok(self.insert(instance))
    }

    /// Parse `url`, build a client, and open an export instance.
    /// `relname`/`start_time_us` are engine-supplied session facts outside
    /// this core's scope.
    pub fn open_export(
        &self,
        url: &str,
        identity: WorkerIdentity,
        relname: impl Into<String>,
        start_time_us: u64,
    ) -> Result<TableHandle> {
        let options = config::parse(url, Mode::Export)?;
        let client = Arc::new(ObjectClient::new(&options.endpoint, &options.id, &options.key, options.request.clone())?);
        let instance = TableInstance::open_export(client, &options, identity, relname, start_time_us)?;
        Ok(self.insert(instance))
    }

    fn insert(&self, instance: TableInstance) -> TableHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.instances.lock().expect("adapter registry mutex poisoned").insert(id, instance);
        TableHandle(id)
    }

    fn with_instance<T>(&self, handle: TableHandle, f: impl FnOnce(&mut TableInstance) -> Result<T>) -> Result<T> {
        let mut instances = self.instances.lock().expect("adapter registry mutex poisoned");
        let instance = instances.get_mut(&handle.0).ok_or_else(|| {
            InternalInvariantSnafu {
                message: format!("unknown or already-closed table handle: {}", handle.0),
            }
            .build()
        })?;
        f(instance)
    }

    pub fn read(&self, handle: TableHandle, dst: &mut [u8]) -> Result<usize> {
        self.with_instance(handle, |instance| instance.read(dst))
    }

    pub fn write_row(&self, handle: TableHandle, row: &[u8]) -> Result<()> {
        self.with_instance(handle, |instance| instance.write_row(row))
    }

    /// Orderly close: removes the instance from the registry and runs its
    /// teardown. The handle is invalid for any further call afterwards.
    pub fn close(&self, handle: TableHandle) -> Result<()> {
        let instance = self
            .instances
            .lock()
            .expect("adapter registry mutex poisoned")
            .remove(&handle.0)
            .ok_or_else(|| {
                InternalInvariantSnafu {
                    message: format!("unknown or already-closed table handle: {}", handle.0),
                }
                .build()
            })?;
        instance.close()
    }

    /// Transaction-abort path: drop every live instance without running
    /// their happy-path `close`. Dropping a `TableInstance`
    /// still joins its reader's background thread; a `CompressWriter`'s
    /// uploader thread and compressor subprocess are reaped by their own
    /// `Drop` impls rather than flushed, since the transaction is being
    /// discarded, not completed.
    pub fn abort_all(&self) {
        self.instances.lock().expect("adapter registry mutex poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    // `ObjectClient::new` resolves a real endpoint, so these tests exercise
    // only the handle-registry bookkeeping, not end-to-end OSS traffic
    // (covered by the reader/writer unit tests instead).
    #[test]
    fn test_unknown_handle_is_rejected() {
        let adapter = ExternalTableAdapter::new();
        let mut buf = [0u8; 8];
        let err = adapter.read(TableHandle(7), &mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::InternalInvariant { .. }));
    }

    #[test]
    fn test_close_invalidates_handle() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "d/f", vec![1u8; 4]);
        let client = mem.into_client();
        let options = crate::config::ExternalTableOptions {
            endpoint: "ep".to_string(),
            id: "ak".to_string(),
            key: "sk".to_string(),
            bucket: "b".to_string(),
            source: crate::config::FileSource::Dir("d/".to_string()),
            compression: crate::config::CompressionType::Text,
            r#async: true,
            mode: crate::config::Mode::Import,
            request: crate::config::RequestTuning::default(),
            export: crate::config::ExportTuning::default(),
        };
        let instance = crate::table_instance::TableInstance::open_import(client, &options, WorkerIdentity::new(0, 1)).unwrap();

        let adapter = ExternalTableAdapter::new();
        let handle = adapter.insert(instance);
        adapter.close(handle).unwrap();

        let mut buf = [0u8; 8];
        let err = adapter.read(handle, &mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::InternalInvariant { .. }));
    }

    #[test]
    fn test_abort_all_clears_registry() {
        let mem = MemoryTransport::new();
        mem.put_object("b", "d/f", vec![1u8; 4]);
        let client = mem.into_client();
        let options = crate::config::ExternalTableOptions {
            endpoint: "ep".to_string(),
            id: "ak".to_string(),
            key: "sk".to_string(),
            bucket: "b".to_string(),
            source: crate::config::FileSource::Dir("d/".to_string()),
            compression: crate::config::CompressionType::Text,
            r#async: true,
            mode: crate::config::Mode::Import,
            request: crate::config::RequestTuning::default(),
            export: crate::config::ExportTuning::default(),
        };
        let instance = crate::table_instance::TableInstance::open_import(client, &options, WorkerIdentity::new(0, 1)).unwrap();

        let adapter = ExternalTableAdapter::new();
        let handle = adapter.insert(instance);
        adapter.abort_all();

        let mut buf = [0u8; 8];
        let err = adapter.read(handle, &mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::InternalInvariant { .. }));
    }
}
