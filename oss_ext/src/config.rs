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

//! `oss://<endpoint> key=value key=value ...` option parsing.
//!
//! Follows the same convention as `message_queue::kafka::config::Config`:
//! nested, `Default`-able, `serde`-derived sub-structs with doc-commented
//! field defaults, assembled by a single validating parser that never
//! touches the network.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{InvalidConfigSnafu, Result};

const MIB: u64 = 1024 * 1024;

/// Bounds passed through to [`crate::object_client::ObjectClient`]'s
/// transport layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTuning {
    /// Dead-man timer: abort a request transferring slower than this for
    /// longer than `min_speed_secs`. `0` disables the check.
    pub min_speed_bps: u64,
    pub min_speed_secs: u64,
    pub dns_cache_ttl_s: u64,
    pub connect_timeout_s: u64,
}

impl Default for RequestTuning {
    fn default() -> Self {
        Self {
            min_speed_bps: 0,
            min_speed_secs: 0,
            dns_cache_ttl_s: 60,
            connect_timeout_s: 10,
        }
    }
}

/// Export-side tuning. Invariant: `flush_block_bytes <= file_max_bytes`,
/// checked in [`parse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportTuning {
    pub flush_block_bytes: u64,
    pub file_max_bytes: u64,
    pub compress_threads: u32,
    pub pipe_block_bytes: u64,
    pub compression_level: u32,
    /// Path (or bare name, resolved through `$PATH`) of the `pigz`-compatible
    /// parallel-gzip compressor invoked by `CompressWriter`.
    pub compressor_path: PathBuf,
}

impl Default for ExportTuning {
    fn default() -> Self {
        Self {
            flush_block_bytes: 8 * MIB,
            file_max_bytes: 256 * MIB,
            compress_threads: 4,
            pipe_block_bytes: 1024 * 1024,
            compression_level: 6,
            compressor_path: PathBuf::from("pigz"),
        }
    }
}

/// Where the import/export file set comes from (exactly one of the three).
#[derive(Clone, Debug, PartialEq)]
pub enum FileSource {
    /// Import every non-directory key directly under this folder.
    Dir(String),
    /// Recursive import of every key starting with this prefix; also the
    /// normalized form `dir` takes for export (a writable table only ever
    /// uses a prefix, never a delimiter-bounded listing).
    Prefix(String),
    /// Exactly-one-file import, followed by the sequenced `.1`, `.2`, ...
    /// probe.
    Path(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    Text,
    Gzip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Import,
    Export,
}

/// A fully parsed and validated `oss://` external table URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalTableOptions {
    pub endpoint: String,
    pub id: String,
    pub key: String,
    pub bucket: String,
    pub source: FileSource,
    pub compression: CompressionType,
    pub r#async: bool,
    pub mode: Mode,
    pub request: RequestTuning,
    pub export: ExportTuning,
}

/// Split `"oss://<endpoint> k=v k=v ..."` on whitespace (space/tab/CR/LF)
/// into `(endpoint, [(key, value)])`. Grammar only; semantic validation is
/// [`parse`]'s job.
fn tokenize(url: &str) -> Result<(String, Vec<(String, String)>)> {
    let rest = url.strip_prefix("oss://").ok_or_else(|| {
        InvalidConfigSnafu {
            message: format!("external table URL must start with oss://, got:{url}"),
        }
        .build()
    })?;

    let mut tokens = rest.split(|c: char| c.is_whitespace()).filter(|s| !s.is_empty());
    let endpoint = tokens
        .next()
        .ok_or_else(|| {
            InvalidConfigSnafu {
                message: "external table URL is missing an endpoint".to_string(),
            }
            .build()
        })?
        .to_string();

    let mut opts = Vec::new();
    for tok in tokens {
        let (k, v) = tok.split_once('=').ok_or_else(|| {
            InvalidConfigSnafu {
                message: format!("malformed option (expected key=value): {tok}"),
            }
            .build()
        })?;
        opts.push((k.to_string(), v.to_string()));
    }
    Ok((endpoint, opts))
}

fn parse_u64(opts: &[(String, String)], key: &str) -> Result<Option<u64>> {
    match opts.iter().find(|(k, _)| k == key) {
        None => Ok(None),
        Some((_, v)) => v.parse::<u64>().map(Some).map_err(|_| {
            InvalidConfigSnafu {
                message: format!("option {key} must be an integer, got:{v}"),
            }
            .build()
        }),
    }
}

fn find<'a>(opts: &'a [(String, String)], key: &str) -> Option<&'a str> {
    opts.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Parse and validate a full `oss://` table URL. Performs no network I/O:
/// `InvalidConfig` is always raised before any request goes out.
pub fn parse(url: &str, mode: Mode) -> Result<ExternalTableOptions> {
    let (endpoint, opts) = tokenize(url)?;

    let id = find(&opts, "id")
        .ok_or_else(|| InvalidConfigSnafu { message: "missing required option: id".to_string() }.build())?
        .to_string();
    let key = find(&opts, "key")
        .ok_or_else(|| InvalidConfigSnafu { message: "missing required option: key".to_string() }.build())?
        .to_string();
    let bucket = find(&opts, "bucket")
        .ok_or_else(|| {
            InvalidConfigSnafu { message: "missing required option: bucket".to_string() }.build()
        })?
        .to_string();

    let filepath = find(&opts, "filepath");
    let dir = find(&opts, "dir");
    let prefix = find(&opts, "prefix");
    let set_count = [filepath.is_some(), dir.is_some(), prefix.is_some()]
        .iter()
        .filter(|b| **b)
        .count();
    ensure!(
        set_count == 1,
        InvalidConfigSnafu {
            message: "exactly one of filepath|dir|prefix must be set".to_string(),
        }
    );

    if mode == Mode::Export {
        ensure!(
            filepath.is_none(),
            InvalidConfigSnafu {
                message: "writable external tables require dir or prefix, not filepath".to_string(),
            }
        );
        match find(&opts, "mode") {
            Some("append") => {}
            other => {
                return Err(InvalidConfigSnafu {
                    message: format!("export tables require mode=append, got:{other:?}"),
                }
                .build())
            }
        }
    }

    // A `dir` value is normalized to a prefix: import keeps the
    // delimiter-bounded listing semantics via `FileSource::Dir`, export only
    // ever uses a flat recursive prefix.
    let source = if let Some(path) = filepath {
        FileSource::Path(path.to_string())
    } else if let Some(dir) = dir {
        ensure!(
            dir.ends_with('/'),
            InvalidConfigSnafu {
                message: format!("dir option must end with '/', got:{dir}"),
            }
        );
        if mode == Mode::Export {
            FileSource::Prefix(dir.to_string())
        } else {
            FileSource::Dir(dir.to_string())
        }
    } else {
        FileSource::Prefix(prefix.expect("set_count == 1 guarantees prefix is Some here").to_string())
    };

    let compression = match find(&opts, "compressiontype") {
        None | Some("text") => CompressionType::Text,
        Some("gzip") => CompressionType::Gzip,
        Some(other) => {
            return Err(InvalidConfigSnafu {
                message: format!("unknown compressiontype:{other}"),
            }
            .build())
        }
    };

    let is_async = match find(&opts, "async") {
        None => true,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(InvalidConfigSnafu {
                message: format!("async must be true or false, got:{other}"),
            }
            .build())
        }
    };

    let mut request = RequestTuning::default();
    if let Some(v) = parse_u64(&opts, "oss_speed_limit")? {
        request.min_speed_bps = v;
    }
    // `oss_speed_time` is a distinct key from `oss_speed_limit` (a URL
    // reusing the same key for both fields would leave speed_time
    // unsettable).
    if let Some(v) = parse_u64(&opts, "oss_speed_time")? {
        request.min_speed_secs = v;
    }
    if let Some(v) = parse_u64(&opts, "oss_dns_cache_timeout")? {
        request.dns_cache_ttl_s = v;
    }
    if let Some(v) = parse_u64(&opts, "oss_connect_timeout")? {
        request.connect_timeout_s = v;
    }

    let mut export = ExportTuning::default();
    if let Some(v) = parse_u64(&opts, "oss_flush_block_size")? {
        export.flush_block_bytes = v * MIB;
    }
    if let Some(v) = parse_u64(&opts, "oss_file_max_size")? {
        export.file_max_bytes = v * MIB;
    }
    if let Some(v) = parse_u64(&opts, "num_parallel_worker")? {
        export.compress_threads = v as u32;
    }
    if let Some(v) = parse_u64(&opts, "pipe_block_size")? {
        export.pipe_block_bytes = v;
    }
    if let Some(v) = parse_u64(&opts, "compressionlevel")? {
        export.compression_level = v as u32;
    }

    ensure!(
        (MIB..=128 * MIB).contains(&export.flush_block_bytes),
        InvalidConfigSnafu {
            message: format!(
                "oss_flush_block_size out of range [1, 128] MiB, got bytes:{}",
                export.flush_block_bytes
            ),
        }
    );
    ensure!(
        (8 * MIB..=4000 * MIB).contains(&export.file_max_bytes),
        InvalidConfigSnafu {
            message: format!(
                "oss_file_max_size out of range [8, 4000] MiB, got bytes:{}",
                export.file_max_bytes
            ),
        }
    );
    ensure!(
        (1..=8).contains(&export.compress_threads),
        InvalidConfigSnafu {
            message: format!("num_parallel_worker out of range [1, 8], got:{}", export.compress_threads),
        }
    );
    ensure!(
        (8 * 1024..=8 * MIB).contains(&export.pipe_block_bytes),
        InvalidConfigSnafu {
            message: format!(
                "pipe_block_size out of range [8KiB, 8MiB], got:{}",
                export.pipe_block_bytes
            ),
        }
    );
    ensure!(
        (1..=9).contains(&export.compression_level),
        InvalidConfigSnafu {
            message: format!("compressionlevel out of range [1, 9], got:{}", export.compression_level),
        }
    );
    ensure!(
        export.flush_block_bytes <= export.file_max_bytes,
        InvalidConfigSnafu {
            message: format!(
                "flush_block_bytes ({}) must be <= file_max_bytes ({})",
                export.flush_block_bytes, export.file_max_bytes
            ),
        }
    );

    Ok(ExternalTableOptions {
        endpoint,
        id,
        key,
        bucket,
        source,
        compression,
        r#async: is_async,
        mode,
        request,
        export,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_import() {
        let opts = parse(
            "oss://oss-cn-hangzhou.aliyuncs.com id=ak key=sk bucket=b filepath=p/data",
            Mode::Import,
        )
        .unwrap();
        assert_eq!(opts.endpoint, "oss-cn-hangzhou.aliyuncs.com");
        assert_eq!(opts.source, FileSource::Path("p/data".to_string()));
        assert!(opts.r#async);
        assert_eq!(opts.compression, CompressionType::Text);
    }

    #[test]
    fn test_parse_rejects_multiple_sources() {
        let err = parse(
            "oss://ep id=a key=b bucket=c dir=d/ prefix=p",
            Mode::Import,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_parse_export_requires_mode_append() {
        let err = parse("oss://ep id=a key=b bucket=c prefix=p/", Mode::Export).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidConfig { .. }));

        let opts = parse(
            "oss://ep id=a key=b bucket=c prefix=p/ mode=append",
            Mode::Export,
        )
        .unwrap();
        assert_eq!(opts.mode, Mode::Export);
    }

    #[test]
    fn test_parse_export_rejects_filepath() {
        let err = parse(
            "oss://ep id=a key=b bucket=c filepath=p mode=append",
            Mode::Export,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_speed_limit_and_speed_time_are_distinct_keys() {
        let opts = parse(
            "oss://ep id=a key=b bucket=c filepath=p oss_speed_limit=1000 oss_speed_time=30",
            Mode::Import,
        )
        .unwrap();
        assert_eq!(opts.request.min_speed_bps, 1000);
        assert_eq!(opts.request.min_speed_secs, 30);
    }

    #[test]
    fn test_export_tuning_bounds() {
        let err = parse(
            "oss://ep id=a key=b bucket=c prefix=p/ mode=append oss_flush_block_size=200 oss_file_max_size=300",
            Mode::Export,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_flush_block_must_not_exceed_file_max() {
        let err = parse(
            "oss://ep id=a key=b bucket=c prefix=p/ mode=append oss_flush_block_size=64 oss_file_max_size=16",
            Mode::Export,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidConfig { .. }));
    }
}
