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

//! The export pipeline: producer -> OS pipe -> compressor subprocess -> OS
//! pipe -> uploader thread -> append-only object store.
//!
//! The compressor is `pigz` (parallel gzip). Unlike reference external-table
//! drivers that fall back to an in-process thread on platforms without
//! `fork`, this core requires a genuine child process on every platform: no
//! `cfg`-gated in-process variant exists.

use std::{
    io::{Read, Write},
    process::{Child, ChildStderr, ChildStdin, Command, Stdio},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use runtime::BackgroundTask;

use crate::{
    config::ExportTuning,
    data::ObjectRef,
    error::{ChildProcessFailureSnafu, IoSnafu, OversizeRowSnafu, ProtocolViolationSnafu, Result},
    file_planner::FilePlanner,
    object_client::ObjectClient,
};

/// Cap on how much of the compressor's stderr is read back on failure.
const STDERR_READ_CAP: usize = 1024;

struct UploaderState {
    ready: bool,
    errored: bool,
    err_msg: Option<String>,
}

struct UploaderSignal {
    state: Mutex<UploaderState>,
    cond: Condvar,
}

/// Exactly one pipeline per active `CompressWriter`; reset only across
/// rollover boundaries.
struct CompressPipeline {
    child: Child,
    stdin: ChildStdin,
    stderr: ChildStderr,
    uploader: BackgroundTask,
    signal: Arc<UploaderSignal>,
    /// Set once the child has been `wait()`-ed on, whether that happened via
    /// a pipe-write failure or the normal `close()` path. `Child::wait`
    /// itself is safe to call again (the exit status is cached after the
    /// first reap), but `stderr` is a pipe: a second read after the child
    /// has exited just returns EOF, so this flag is what keeps `close()`
    /// from trying to re-diagnose a failure `write_stdin` already reported.
    reaped: bool,
}

impl CompressPipeline {
    fn open(client: Arc<ObjectClient>, current: ObjectRef, tuning: &ExportTuning) -> Result<Self> {
        let mut child = Command::new(&tuning.compressor_path)
            .arg("-p")
            .arg(tuning.compress_threads.to_string())
            .arg(format!("-{}", tuning.compression_level))
            .arg("-f")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ChildProcessFailureSnafu {
                    status: None,
                    stderr: format!("failed to spawn compressor {:?}: {e}", tuning.compressor_path),
                }
                .build()
            })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let signal = Arc::new(UploaderSignal {
            state: Mutex::new(UploaderState {
                ready: false,
                errored: false,
                err_msg: None,
            }),
            cond: Condvar::new(),
        });

        let uploader_signal = signal.clone();
        let flush_block_bytes = tuning.flush_block_bytes as usize;
        let uploader = BackgroundTask::spawn("oss-ext-uploader", move || {
            run_uploader(client, current, stdout, flush_block_bytes, uploader_signal);
        });

        {
            let mut state = signal.state.lock().unwrap();
            while !state.ready && !state.errored {
                state = signal.cond.wait(state).unwrap();
            }
        }

        Ok(Self {
            child,
            stdin,
            stderr,
            uploader,
            signal,
            reaped: false,
        })
    }

    fn writer_errored(&self) -> Option<String> {
        let state = self.signal.state.lock().unwrap();
        if state.errored {
            Some(state.err_msg.clone().unwrap_or_default())
        } else {
            None
        }
    }

    /// Reap the child after a pipe I/O error and decide what actually failed.
    /// A compressor killed mid-export breaks the pipe before it ever calls
    /// `wait()` itself, so without this the broken-pipe `Error::Io` from the
    /// write would be the only thing the caller ever sees — never the
    /// child's real exit code or stderr.
    fn reap_after_io_error(&mut self, io_err: std::io::Error) -> crate::error::Error {
        if self.reaped {
            return IoSnafu {
                message: "write to compressor stdin failed".to_string(),
                source: io_err,
            }
            .build();
        }
        self.reaped = true;

        match self.child.wait() {
            Ok(status) if !status.success() => {
                let mut buf = vec![0u8; STDERR_READ_CAP];
                let n = self.stderr.read(&mut buf).unwrap_or(0);
                let stderr = String::from_utf8_lossy(&buf[..n]).to_string();
                ChildProcessFailureSnafu {
                    status: status.code(),
                    stderr,
                }
                .build()
            }
            // The child is still alive/exited cleanly; the broken pipe must
            // have some other cause, so report the original I/O error.
            _ => IoSnafu {
                message: "write to compressor stdin failed".to_string(),
                source: io_err,
            }
            .build(),
        }
    }

    fn write_stdin(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin
            .write_all(bytes)
            .map_err(|e| self.reap_after_io_error(e))
    }

    /// Close protocol: close stdin, wait for the child, surface a non-zero
    /// exit with captured stderr, join the uploader.
    fn close(mut self) -> Result<()> {
        drop(self.stdin);

        if self.reaped {
            // A prior `write_stdin` already reaped the child and reported
            // its failure; nothing further to diagnose here.
            self.uploader.join();
            return Ok(());
        }

        let status = self.child.wait().map_err(|e| {
            IoSnafu {
                message: "waiting for compressor subprocess failed".to_string(),
                source: e,
            }
            .build()
        })?;

        if !status.success() {
            let mut buf = vec![0u8; STDERR_READ_CAP];
            let n = self.stderr.read(&mut buf).unwrap_or(0);
            let stderr = String::from_utf8_lossy(&buf[..n]).to_string();
            return Err(ChildProcessFailureSnafu {
                status: status.code(),
                stderr,
            }
            .build());
        }

        self.uploader.join();
        if let Some(msg) = self.writer_errored() {
            return Err(ProtocolViolationSnafu {
                message: format!("uploader failed during shutdown: {msg}"),
            }
            .build());
        }
        Ok(())
    }
}

fn run_uploader(
    client: Arc<ObjectClient>,
    current: ObjectRef,
    mut stdout: impl Read,
    flush_block_bytes: usize,
    signal: Arc<UploaderSignal>,
) {
    {
        let mut state = signal.state.lock().unwrap();
        state.ready = true;
        signal.cond.notify_all();
    }

    let mut acc = Vec::with_capacity(flush_block_bytes);
    let mut scratch = vec![0u8; flush_block_bytes];
    let mut file_offset: u64 = 0;

    let flush_acc = |acc: &mut Vec<u8>, file_offset: &mut u64| -> Result<()> {
        if acc.is_empty() {
            return Ok(());
        }
        client.append(&current.bucket, &current.key, *file_offset, acc)?;
        *file_offset += acc.len() as u64;
        acc.clear();
        Ok(())
    };

    loop {
        let n = match stdout.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let mut state = signal.state.lock().unwrap();
                state.errored = true;
                state.err_msg = Some(format!("uploader read from compressor stdout failed: {e}"));
                return;
            }
        };

        if acc.len() + n > flush_block_bytes {
            if let Err(e) = flush_acc(&mut acc, &mut file_offset) {
                let mut state = signal.state.lock().unwrap();
                state.errored = true;
                state.err_msg = Some(e.to_string());
                return;
            }
        }
        acc.extend_from_slice(&scratch[..n]);
    }

    if let Err(e) = flush_acc(&mut acc, &mut file_offset) {
        let mut state = signal.state.lock().unwrap();
        state.errored = true;
        state.err_msg = Some(e.to_string());
    }
}

/// The export pipeline writer.
pub struct CompressWriter {
    client: Arc<ObjectClient>,
    planner: FilePlanner,
    tuning: ExportTuning,
    prefix: String,
    relname: String,
    start_time_us: u64,
    next_fileindex: u64,

    current: ObjectRef,
    file_flush_offset: u64,
    file_max_bytes: u64,

    block: Vec<u8>,
    block_used: usize,

    pipeline: Option<CompressPipeline>,
}

impl CompressWriter {
    pub fn open(
        client: Arc<ObjectClient>,
        planner: FilePlanner,
        prefix: impl Into<String>,
        relname: impl Into<String>,
        start_time_us: u64,
        file_max_bytes: u64,
        tuning: ExportTuning,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let relname = relname.into();
        let current = planner.plan_export_name(&prefix, &relname, 0, start_time_us)?;
        let pipeline = CompressPipeline::open(client.clone(), current.clone(), &tuning)?;

        Ok(Self {
            client,
            planner,
            tuning: tuning.clone(),
            prefix,
            relname,
            start_time_us,
            next_fileindex: 1,
            current,
            file_flush_offset: 0,
            file_max_bytes,
            block: vec![0; tuning.pipe_block_bytes as usize],
            block_used: 0,
            pipeline: Some(pipeline),
        })
    }

    fn pipeline(&self) -> &CompressPipeline {
        self.pipeline.as_ref().expect("pipeline is only None mid-rollover")
    }

    fn pipeline_mut(&mut self) -> &mut CompressPipeline {
        self.pipeline.as_mut().expect("pipeline is only None mid-rollover")
    }

    fn check_errored(&self) -> Result<()> {
        if let Some(msg) = self.pipeline().writer_errored() {
            return Err(ProtocolViolationSnafu {
                message: format!("uploader reported an error: {msg}"),
            }
            .build());
        }
        Ok(())
    }

    pub fn write(&mut self, row: &[u8]) -> Result<()> {
        self.check_errored()?;

        let pipe_block_bytes = self.tuning.pipe_block_bytes as usize;
        if row.len() > pipe_block_bytes {
            return Err(OversizeRowSnafu {
                row_len: row.len(),
                limit: pipe_block_bytes,
            }
            .build());
        }

        if self.file_flush_offset + row.len() as u64 > self.file_max_bytes {
            self.rollover()?;
        }

        if self.block_used + row.len() > pipe_block_bytes {
            self.pipeline_mut().write_stdin(&self.block[..self.block_used])?;
            self.block_used = 0;
        }

        self.block[self.block_used..self.block_used + row.len()].copy_from_slice(row);
        self.block_used += row.len();
        self.file_flush_offset += row.len() as u64;
        Ok(())
    }

    fn rollover(&mut self) -> Result<()> {
        self.drain_block()?;
        let old_pipeline = self.pipeline.take().expect("pipeline is only None mid-rollover");
        old_pipeline.close()?;

        self.current =
            self.planner
                .plan_export_name(&self.prefix, &self.relname, self.next_fileindex, self.start_time_us)?;
        self.next_fileindex += 1;
        self.file_flush_offset = 0;
        self.pipeline = Some(CompressPipeline::open(
            self.client.clone(),
            self.current.clone(),
            &self.tuning,
        )?);
        Ok(())
    }

    fn drain_block(&mut self) -> Result<()> {
        if self.block_used > 0 {
            self.pipeline_mut().write_stdin(&self.block[..self.block_used])?;
            self.block_used = 0;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.drain_block()?;
        self.pipeline.take().expect("pipeline is only None mid-rollover").close()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Write as _,
        os::unix::fs::PermissionsExt,
    };

    use super::*;
    use crate::{data::WorkerIdentity, file_planner::FilePlanner, testing::MemoryTransport};

    /// A stand-in compressor: ignores pigz-style flags and copies stdin to
    /// stdout verbatim, so the pipeline's accumulate/flush/rollover logic
    /// can be exercised without a real `pigz` binary.
    fn fake_compressor(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("fake-compressor.sh");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tuning_with(compressor_path: std::path::PathBuf) -> ExportTuning {
        ExportTuning {
            compressor_path,
            ..ExportTuning::default()
        }
    }

    #[test]
    fn test_write_and_close_roundtrips_through_compressor() {
        let dir = tempfile::tempdir().unwrap();
        let compressor = fake_compressor(&dir, "cat");
        let mem = MemoryTransport::new();
        let client = mem.clone().into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let mut tuning = tuning_with(compressor);
        tuning.pipe_block_bytes = 8;
        let mut writer =
            CompressWriter::open(client.clone(), planner, "out/", "tbl", 1, 1024, tuning).unwrap();

        writer.write(b"hello").unwrap();
        writer.write(b"world").unwrap();
        writer.close().unwrap();

        let written = mem.object_bytes("b", "out/tbl_1").unwrap();
        assert_eq!(written, b"helloworld");
    }

    #[test]
    fn test_child_process_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let compressor = fake_compressor(&dir, "cat >/dev/null; echo boom >&2; exit 1");
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let tuning = tuning_with(compressor);
        let mut writer =
            CompressWriter::open(client.clone(), planner, "out/", "tbl", 1, 1024, tuning).unwrap();
        writer.write(b"row").unwrap();
        let err = writer.close().unwrap_err();
        match err {
            crate::error::Error::ChildProcessFailure { stderr, .. } => assert!(stderr.contains("boom")),
            other => panic!("expected ChildProcessFailure, got {other:?}"),
        }
    }

    /// Unlike `test_child_process_failure_surfaces_stderr`, this compressor
    /// never reads stdin, so it is gone before the writer's second flush —
    /// exercising the broken-pipe-mid-write path rather than the
    /// clean-shutdown one.
    #[test]
    fn test_compressor_killed_mid_write_surfaces_child_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let compressor = fake_compressor(&dir, "echo 'died before reading stdin' >&2; exit 1");
        let mem = MemoryTransport::new();
        let client = mem.into_client();
        let planner = FilePlanner::new(client.clone(), "b", WorkerIdentity::new(0, 1));
        let mut tuning = tuning_with(compressor);
        tuning.pipe_block_bytes = 8;
        let mut writer =
            CompressWriter::open(client.clone(), planner, "out/", "tbl", 1, 1024, tuning).unwrap();

        // First write only buffers locally (8 <= pipe_block_bytes, no flush
        // yet). Give the child time to exit before the second write forces a
        // flush, so that flush hits a genuinely broken pipe.
        writer.write(b"12345678").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        let err = writer.write(b"more").unwrap_err();
        match err {
            crate::error::Error::ChildProcessFailure { stderr, .. } => {
                assert!(stderr.contains("died before reading stdin"));
            }
            other => panic!("expected ChildProcessFailure, got {other:?}"),
        }
    }
}
