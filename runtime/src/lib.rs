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

//! A small stand-in for a tokio-executor `runtime` crate.
//!
//! A full `runtime` crate wraps a tokio multi-threaded executor for async
//! I/O (WAL replay, SST prefetch). This core's background workers are
//! plain OS threads doing blocking network/pipe I/O and polling a mutex, so
//! there is no executor to wrap; instead this crate gives every background
//! worker the same owned-`JoinHandle` lifecycle that
//! `wal::table_kv_impl::table_unit`'s background flusher and
//! `analytic_engine::sst::parquet::async_reader::ThreadedReader` both use:
//! the spawning side keeps the handle and always joins it on teardown, the
//! thread itself only ever holds a non-owning reference back.

use std::thread::{self, JoinHandle};

use logger::{debug, warn};

/// A named background thread whose `JoinHandle` is owned by whoever spawned
/// it. Dropping a `BackgroundTask` without calling [`BackgroundTask::join`]
/// first still joins it (best-effort), but callers should join explicitly
/// so join errors can be surfaced.
pub struct BackgroundTask {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `f` on a new OS thread named `name` (shows up in panics/`top`).
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .unwrap_or_else(|e| panic!("failed to spawn background thread {name}: {e}"));
        debug!("spawned background thread, name:{}", name);
        Self {
            name,
            handle: Some(handle),
        }
    }

    /// Block until the thread exits. Idempotent: a second call is a no-op.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!(
                    "background thread panicked, name:{}, panic:{:?}",
                    self.name, e
                );
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_join_runs_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let mut task = BackgroundTask::spawn("test-task", move || {
            ran2.store(true, Ordering::SeqCst);
        });
        task.join();
        task.join();
        assert!(ran.load(Ordering::SeqCst));
    }
}
