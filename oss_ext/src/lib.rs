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

//! An OSS (S3-compatible object store) storage bridge for external tables:
//! stream rows in from existing objects, or stream rows out to new ones,
//! without going through the engine's native on-disk format.
//!
//! Start at [`adapter::ExternalTableAdapter`] for the engine-facing entry
//! point, or [`table_instance::TableInstance`] to drive import/export
//! sessions directly.

pub mod adapter;
pub mod async_reader;
pub mod config;
pub mod data;
pub mod error;
pub mod file_planner;
pub mod inflate;
pub mod object_client;
pub(crate) mod object_source;
pub mod ring_buffer;
pub mod sync_reader;
pub mod table_instance;
pub mod writer;

pub mod testing;

pub use adapter::{ExternalTableAdapter, TableHandle};
pub use data::{ObjectRef, WorkerIdentity};
pub use error::{Error, Result};
pub use table_instance::TableInstance;
