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

//! In-process `ObjectClient` test double.
//!
//! Modeled on `object_store::mem_cache::MemCache`, which wraps an
//! `Arc<dyn ObjectStore>`-style seam with an in-memory table instead of a
//! real backend. Here the seam is `object_client::Transport`;
//! `MemoryTransport` keeps an in-process table of `Bytes` and honors the
//! same head/list/get_range/append contract real OSS would, including the
//! `Appendable`-object-type gate and the position-must-equal-current-end
//! invariant.
//!
//! Always compiled (not `#[cfg(test)]`-gated) so it is usable both from
//! `#[cfg(test)]` unit tests colocated with implementation and from the
//! crate's `tests/` integration tests, mirroring the standalone
//! (non test-only) `components/test_util` crate.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::Bytes;

use crate::{
    data::ObjectRef,
    error::{FatalSnafu, NotFoundSnafu, ProtocolViolationSnafu, Result},
    object_client::{AppendResult, HeadResult, ObjectClient, ObjectType, Transport},
};

#[derive(Default, Clone)]
struct Entry {
    bytes: Vec<u8>,
    appendable: bool,
}

/// An in-memory stand-in for an OSS bucket. Thread-safe so it can be shared
/// between a test's producer and the `AsyncReader`/`CompressWriter`
/// background thread under test.
#[derive(Default, Clone)]
pub struct MemoryTransport {
    objects: Arc<Mutex<HashMap<(String, String), Entry>>>,
    /// Forces the next N matching `get_range` calls for a key to fail with
    /// `Transient`, to exercise retry behavior deterministically.
    inject_transient: Arc<Mutex<HashMap<(String, String), u32>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a plain (non-appendable) object, as if written by some other
    /// process before this test run started.
    pub fn put_object(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            Entry {
                bytes: bytes.into(),
                appendable: false,
            },
        );
    }

    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|e| e.bytes.clone())
    }

    pub fn object_exists(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn inject_transient_failures(&self, bucket: &str, key: &str, times: u32) {
        self.inject_transient
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), times);
    }

    fn take_injected_failure(&self, bucket: &str, key: &str) -> bool {
        let mut guard = self.inject_transient.lock().unwrap();
        if let Some(n) = guard.get_mut(&(bucket.to_string(), key.to_string())) {
            if *n > 0 {
                *n -= 1;
                return true;
            }
        }
        false
    }

    /// Build an [`ObjectClient`] backed by this in-memory table.
    pub fn into_client(self) -> Arc<ObjectClient> {
        Arc::new(ObjectClient::from_transport(Box::new(self)))
    }
}

impl Transport for MemoryTransport {
    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult> {
        if self.take_injected_failure(bucket, key) {
            return Err(crate::error::TransientSnafu {
                op: "head",
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: None,
                message: "injected".to_string(),
                request_id: None,
            }
            .build());
        }
        let objects = self.objects.lock().unwrap();
        let entry = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                NotFoundSnafu {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
                .build()
            })?;
        Ok(HeadResult {
            length: entry.bytes.len() as u64,
            object_type: if entry.appendable {
                ObjectType::Appendable
            } else {
                ObjectType::Normal
            },
            next_append_pos: entry.bytes.len() as u64,
        })
    }

    fn list(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> Result<Vec<ObjectRef>> {
        let objects = self.objects.lock().unwrap();
        let mut refs: Vec<ObjectRef> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| match delimiter {
                Some(d) => !k[prefix.len()..].contains(d),
                None => true,
            })
            .map(|((b, k), e)| ObjectRef::with_length(b.clone(), k.clone(), e.bytes.len() as u64))
            .collect();
        refs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(refs)
    }

    fn get_range(&self, bucket: &str, key: &str, offset: u64, length: u64) -> Result<Bytes> {
        if self.take_injected_failure(bucket, key) {
            return Err(crate::error::TransientSnafu {
                op: "get_range",
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: None,
                message: "injected".to_string(),
                request_id: None,
            }
            .build());
        }
        let objects = self.objects.lock().unwrap();
        let entry = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                NotFoundSnafu {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
                .build()
            })?;
        let start = offset as usize;
        let end = ((offset + length) as usize).min(entry.bytes.len());
        if start > entry.bytes.len() {
            return Err(FatalSnafu {
                op: "get_range",
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: None,
                message: "range out of bounds".to_string(),
                request_id: None,
            }
            .build());
        }
        Ok(Bytes::copy_from_slice(&entry.bytes[start..end]))
    }

    fn append(&self, bucket: &str, key: &str, position: u64, bytes: &[u8]) -> Result<AppendResult> {
        let mut objects = self.objects.lock().unwrap();
        let entry_key = (bucket.to_string(), key.to_string());
        match objects.get_mut(&entry_key) {
            None => {
                if position != 0 {
                    return Err(ProtocolViolationSnafu {
                        message: format!(
                            "append position {position} on missing object {bucket}/{key}, expected 0"
                        ),
                    }
                    .build());
                }
                let mut entry = Entry {
                    bytes: Vec::new(),
                    appendable: true,
                };
                entry.bytes.extend_from_slice(bytes);
                let new_position = entry.bytes.len() as u64;
                objects.insert(entry_key, entry);
                Ok(AppendResult { new_position })
            }
            Some(entry) => {
                if !entry.appendable {
                    return Err(ProtocolViolationSnafu {
                        message: format!("object {bucket}/{key} is not Appendable"),
                    }
                    .build());
                }
                if position as usize != entry.bytes.len() {
                    return Err(ProtocolViolationSnafu {
                        message: format!(
                            "append position {} does not match current end {}",
                            position,
                            entry.bytes.len()
                        ),
                    }
                    .build());
                }
                entry.bytes.extend_from_slice(bytes);
                Ok(AppendResult {
                    new_position: entry.bytes.len() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_position_invariant() {
        let mem = MemoryTransport::new();
        let client = mem.clone().into_client();
        let r1 = client.append("b", "k", 0, b"hello").unwrap();
        assert_eq!(r1.new_position, 5);
        let r2 = client.append("b", "k", 5, b" world").unwrap();
        assert_eq!(r2.new_position, 11);
        assert_eq!(mem.object_bytes("b", "k").unwrap(), b"hello world");
    }

    #[test]
    fn test_append_rejects_wrong_position() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        client.append("b", "k", 0, b"hello").unwrap();
        let err = client.append("b", "k", 999, b"x").unwrap_err();
        assert!(matches!(err, crate::error::Error::ProtocolViolation { .. }));
    }

    #[test]
    fn test_head_not_found() {
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let err = client.head("b", "missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
