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

//! Request-level driver over the OSS REST API.
//!
//! `ObjectClient` is a concrete struct, not a trait object: there is only
//! one backend to support. Internally it dispatches through a private
//! [`Transport`] seam so tests can swap the real `reqwest`-backed
//! transport for an in-process double, the way
//! `object_store::mem_cache::MemCache` wraps an `Arc<dyn ObjectStore>`.

mod http_transport;

use std::time::Duration;

use bytes::Bytes;

use crate::{
    config::RequestTuning,
    data::ObjectRef,
    error::{Error, Result},
};

pub(crate) use http_transport::HttpTransport;

/// Every operation that returns `Transient` is retried up to this many
/// times before being surfaced as fatal.
pub const OSS_RETRY_COUNT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Appendable,
    Normal,
}

#[derive(Debug, Clone)]
pub struct HeadResult {
    pub length: u64,
    pub object_type: ObjectType,
    pub next_append_pos: u64,
}

#[derive(Debug, Clone)]
pub struct AppendResult {
    pub new_position: u64,
}

/// What a single attempt at a transport call can report. `Transport`
/// implementations raise `Error::Transient`/`Error::NotFound`/other directly;
/// `ObjectClient` is the layer that interprets `Transient` as retryable.
pub(crate) trait Transport: Send + Sync {
    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult>;
    fn list(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> Result<Vec<ObjectRef>>;
    fn get_range(&self, bucket: &str, key: &str, offset: u64, length: u64) -> Result<Bytes>;
    fn append(&self, bucket: &str, key: &str, position: u64, bytes: &[u8]) -> Result<AppendResult>;
}

pub struct ObjectClient {
    transport: Box<dyn Transport>,
}

impl ObjectClient {
    /// Build a client talking to the real OSS endpoint.
    pub fn new(endpoint: &str, id: &str, key: &str, tuning: RequestTuning) -> Result<Self> {
        Ok(Self {
            transport: Box::new(HttpTransport::new(endpoint, id, key, tuning)?),
        })
    }

    pub(crate) fn from_transport(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Retry `f` up to [`OSS_RETRY_COUNT`] times while it returns
    /// `Error::Transient`; any other error (including the final exhausted
    /// `Transient`) is returned as-is. At least one scheduler yield happens
    /// between attempts.
    fn with_retry<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e @ Error::Transient { .. }) => {
                    attempt += 1;
                    if attempt >= OSS_RETRY_COUNT {
                        return Err(e);
                    }
                    logger::warn!("retrying OSS request, attempt:{}/{}", attempt, OSS_RETRY_COUNT);
                    std::thread::yield_now();
                    std::thread::sleep(Duration::from_millis(0));
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn head(&self, bucket: &str, key: &str) -> Result<HeadResult> {
        self.with_retry(|| self.transport.head(bucket, key))
    }

    /// Paginate by marker until the server reports no truncation.
    /// Directory-style entries (key ends with `/`) are skipped.
    pub fn list(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> Result<Vec<ObjectRef>> {
        let mut refs = self.with_retry(|| self.transport.list(bucket, prefix, delimiter))?;
        refs.retain(|o| !o.key.ends_with('/'));
        Ok(refs)
    }

    /// Exactly `length` bytes unless the object ends earlier.
    pub fn get_range(&self, bucket: &str, key: &str, offset: u64, length: u64) -> Result<Bytes> {
        self.with_retry(|| self.transport.get_range(bucket, key, offset, length))
    }

    /// If `position == 0` and the object is missing, the server creates an
    /// Appendable object; otherwise `position` must equal the current end.
    pub fn append(&self, bucket: &str, key: &str, position: u64, bytes: &[u8]) -> Result<AppendResult> {
        self.with_retry(|| self.transport.append(bucket, key, position, bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    use super::*;
    use crate::error::TransientSnafu;

    struct FlakyTransport {
        fail_times: AtomicU32,
        calls: AtomicU32,
        payload: Mutex<Bytes>,
    }

    impl Transport for FlakyTransport {
        fn head(&self, _bucket: &str, _key: &str) -> Result<HeadResult> {
            unimplemented!()
        }

        fn list(&self, _bucket: &str, _prefix: &str, _delimiter: Option<&str>) -> Result<Vec<ObjectRef>> {
            unimplemented!()
        }

        fn get_range(&self, bucket: &str, key: &str, offset: u64, length: u64) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_times.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok() {
                return Err(TransientSnafu {
                    op: "get_range",
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    code: None,
                    message: "flaky".to_string(),
                    request_id: None,
                }
                .build());
            }
            let buf = self.payload.lock().unwrap();
            Ok(buf.slice(offset as usize..(offset + length) as usize))
        }

        fn append(&self, _bucket: &str, _key: &str, _position: u64, _bytes: &[u8]) -> Result<AppendResult> {
            unimplemented!()
        }
    }

    #[test]
    fn test_retry_idempotence() {
        // A Transient error followed by a successful retry yields the same
        // bytes as a single successful call.
        let transport = FlakyTransport {
            fail_times: AtomicU32::new(2),
            calls: AtomicU32::new(0),
            payload: Mutex::new(Bytes::from_static(b"hello world")),
        };
        let client = ObjectClient::from_transport(Box::new(transport));
        let got = client.get_range("b", "k", 0, 5).unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let transport = FlakyTransport {
            fail_times: AtomicU32::new(OSS_RETRY_COUNT + 5),
            calls: AtomicU32::new(0),
            payload: Mutex::new(Bytes::from_static(b"hello world")),
        };
        let client = ObjectClient::from_transport(Box::new(transport));
        let err = client.get_range("b", "k", 0, 5).unwrap_err();
        assert!(matches!(err, Error::Transient { .. }));
    }
}
