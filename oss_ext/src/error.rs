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

//! The error taxonomy shared by every module in this crate.
//!
//! `Transient`, `NotFound`, `InvalidConfig`, `ProtocolViolation`,
//! `OversizeRow`, `ChildProcessFailure`, and `InternalInvariant` map 1:1
//! onto the variants below, following the same convention as
//! `server::mysql::error::Error`: one crate-wide `Error` enum that embeds
//! sources from submodules rather than a chain of per-module enums with
//! manual `From` glue.

use std::io;

use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A retryable network/server condition; surfaced only once the retry
    /// budget (`OSS_RETRY_COUNT` = 30, see `object_client`) is exhausted.
    #[snafu(display(
        "OSS request failed after exhausting retries, op:{}, bucket:{}, key:{}, code:{:?}, message:{}, request_id:{:?}.\nBacktrace:\n{}",
        op,
        bucket,
        key,
        code,
        message,
        request_id,
        backtrace
    ))]
    Transient {
        op: &'static str,
        bucket: String,
        key: String,
        code: Option<String>,
        message: String,
        request_id: Option<String>,
        backtrace: Backtrace,
    },

    /// Mirrors a `404` from the object store. A valid, non-fatal result for
    /// `head`/`list`/the `path.N` probe sequence; callers that require
    /// existence convert it into a fatal error of their own.
    #[snafu(display("Object not found, bucket:{}, key:{}.\nBacktrace:\n{}", bucket, key, backtrace))]
    NotFound {
        bucket: String,
        key: String,
        backtrace: Backtrace,
    },

    /// A non-retryable OSS error (anything other than a transient status or
    /// 404), or a fatal local condition wrapping one (e.g. append to a
    /// stale position).
    #[snafu(display(
        "OSS request failed fatally, op:{}, bucket:{}, key:{}, code:{:?}, message:{}, request_id:{:?}.\nBacktrace:\n{}",
        op,
        bucket,
        key,
        code,
        message,
        request_id,
        backtrace
    ))]
    Fatal {
        op: &'static str,
        bucket: String,
        key: String,
        code: Option<String>,
        message: String,
        request_id: Option<String>,
        backtrace: Backtrace,
    },

    /// URL/option parsing, mutually-exclusive options, out-of-bounds
    /// tuning values. Raised before any network I/O.
    #[snafu(display("Invalid external table configuration, message:{}.\nBacktrace:\n{}", message, backtrace))]
    InvalidConfig { message: String, backtrace: Backtrace },

    /// E.g. appending to an object whose type is not `Appendable`, or the
    /// target export object already exists.
    #[snafu(display("Protocol violation, message:{}.\nBacktrace:\n{}", message, backtrace))]
    ProtocolViolation { message: String, backtrace: Backtrace },

    /// A single engine row exceeds the configured block/pipe-block size.
    #[snafu(display(
        "Row too large, row_len:{}, limit:{}.\nBacktrace:\n{}",
        row_len,
        limit,
        backtrace
    ))]
    OversizeRow {
        row_len: usize,
        limit: usize,
        backtrace: Backtrace,
    },

    /// The compressor subprocess exited non-zero or was killed.
    #[snafu(display(
        "Compressor subprocess failed, status:{:?}, stderr:{:?}.\nBacktrace:\n{}",
        status,
        stderr,
        backtrace
    ))]
    ChildProcessFailure {
        status: Option<i32>,
        stderr: String,
        backtrace: Backtrace,
    },

    /// Unexpected buffer-length or position mismatch: a bug, not a
    /// transport/config problem.
    #[snafu(display("Internal invariant violated, message:{}.\nBacktrace:\n{}", message, backtrace))]
    InternalInvariant { message: String, backtrace: Backtrace },

    #[snafu(display("I/O error, message:{}, err:{}.\nBacktrace:\n{}", message, source, backtrace))]
    Io {
        message: String,
        source: io::Error,
        backtrace: Backtrace,
    },
}

macros::define_result!(Error);

impl Error {
    /// True for errors that this taxonomy allows a caller to retry
    /// at a higher level (currently none: `Transient` here already means
    /// "retries exhausted"). Kept as a seam for future partial-retry
    /// policies instead of matching on the enum directly at call sites.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
