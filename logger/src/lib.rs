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

//! Thin logging facade re-exporting [`log`]'s macros.
//!
//! A host database normally owns a cluster-wide structured sink (wiring
//! `slog` through `slog-global`, as `components/logger` does). This core
//! has no such host to integrate with, so it initializes a plain
//! `env_logger` sink instead and re-exports the standard level macros so
//! call sites look the same either way.

pub use log::{debug, error, info, trace, warn};

/// Initialize the process-wide logger. Idempotent: safe to call from every
/// `ExternalTableAdapter` entry point, only the first call has effect.
pub fn init() {
    let _ = env_logger::try_init();
}
