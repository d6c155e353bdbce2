//! Pseudo-terminal process adapter.
//!
//! Wraps `portable-pty`: one call opens the PTY, spawns the shell and starts
//! a dedicated writer thread. The returned [`PtyOutput`] is consumed by the
//! session's reader thread; [`PtyProcess`] keeps the control side.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    path::Path,
    sync::mpsc::{self, Receiver, SyncSender},
};

use anyhow::Context;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{error, info, warn};

use crate::error::{TerminalError, TerminalResult};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
pub const PTY_READ_BUFFER_SIZE: usize = 4096;
const PTY_WRITE_CHUNK_SIZE: usize = 512;
const PTY_INPUT_CHANNEL_SIZE: usize = 1024;

pub struct PtySpawn<'a> {
    pub shell: &'a str,
    pub args: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

/// Control half of a running PTY child.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input_tx: SyncSender<Vec<u8>>,
    pid: Option<u32>,
}

/// Output half: the PTY reader and the child to reap once output ends.
pub struct PtyOutput {
    pub reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
}

pub fn spawn(label: &str, request: &PtySpawn<'_>) -> TerminalResult<(PtyProcess, PtyOutput)> {
    open_and_spawn(label, request).map_err(|e| TerminalError::SpawnFailed(format!("{e:#}")))
}

fn open_and_spawn(label: &str, request: &PtySpawn<'_>) -> anyhow::Result<(PtyProcess, PtyOutput)> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: request.rows,
            cols: request.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("openpty")?;

    let mut cmd = CommandBuilder::new(request.shell);
    cmd.args(request.args);
    cmd.cwd(request.cwd);
    cmd.env_clear();
    for (key, value) in request.env {
        cmd.env(key, value);
    }
    cmd.env("SHELL", request.shell);

    let child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("spawn {}", request.shell))?;
    // The reader only sees EOF once every slave handle is closed.
    drop(pair.slave);

    let pid = child.process_id();
    let killer = child.clone_killer();
    let reader = pair.master.try_clone_reader().context("clone PTY reader")?;
    let writer = pair.master.take_writer().context("take PTY writer")?;

    let (input_tx, input_rx) = mpsc::sync_channel(PTY_INPUT_CHANNEL_SIZE);
    spawn_writer_thread(label.to_string(), writer, input_rx)?;

    Ok((
        PtyProcess {
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            input_tx,
            pid,
        },
        PtyOutput { reader, child },
    ))
}

impl PtyProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue input for the writer thread. Blocks only when the bounded
    /// queue is full. Fails once the writer thread has stopped.
    pub fn write(&self, data: &[u8]) -> Result<(), mpsc::SendError<Vec<u8>>> {
        self.input_tx.send(data.to_vec())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")
    }

    pub fn kill(&self) {
        if let Err(e) = self.killer.lock().kill() {
            // Already exited.
            warn!("Failed to kill PTY process {:?}: {}", self.pid, e);
        }
    }
}

impl PtyOutput {
    /// Reap the child. Any termination, including signals and non-zero
    /// status, yields the same teardown; the code is informational.
    pub fn wait_exit(mut self) -> Option<u32> {
        match self.child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                warn!("Failed to wait for PTY child: {}", e);
                None
            }
        }
    }
}

/// Writes run on their own thread so input is applied in order and a slow
/// PTY never stalls the caller beyond the channel bound.
fn spawn_writer_thread(
    label: String,
    mut writer: Box<dyn Write + Send>,
    input_rx: Receiver<Vec<u8>>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-writer-{label}"))
        .spawn(move || {
            info!("[writer:{}] Writer thread started", label);
            let mut total_bytes_written: usize = 0;

            while let Ok(data) = input_rx.recv() {
                for chunk in data.chunks(PTY_WRITE_CHUNK_SIZE) {
                    if let Err(e) = writer.write_all(chunk).and_then(|_| writer.flush()) {
                        error!(
                            "[writer:{}] Write error: {} (errno: {:?})",
                            label,
                            e,
                            e.raw_os_error()
                        );
                        return;
                    }
                    std::thread::yield_now();
                }
                total_bytes_written += data.len();
            }

            info!(
                "[writer:{}] Writer thread finished. Total: {} bytes",
                label, total_bytes_written
            );
        })
        .context("spawn writer thread")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::sanitized_env;

    #[test]
    fn spawned_shell_echoes_and_exits() {
        let env = sanitized_env(std::env::vars());
        let args = Vec::new();
        let cwd = std::env::temp_dir();
        let (process, mut output) = spawn(
            "test",
            &PtySpawn {
                shell: "/bin/sh",
                args: &args,
                cwd: &cwd,
                env: &env,
                cols: DEFAULT_COLS,
                rows: DEFAULT_ROWS,
            },
        )
        .unwrap();

        assert!(process.pid().is_some());
        process.write(b"echo pty-ok; exit 3\n").unwrap();

        let mut seen = Vec::new();
        let mut buf = [0u8; PTY_READ_BUFFER_SIZE];
        loop {
            match output.reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        assert!(String::from_utf8_lossy(&seen).contains("pty-ok"));
        assert_eq!(output.wait_exit(), Some(3));
    }

    #[test]
    fn resize_and_kill_on_live_process() {
        let env = sanitized_env(std::env::vars());
        let args = Vec::new();
        let cwd = std::env::temp_dir();
        let (process, output) = spawn(
            "test",
            &PtySpawn {
                shell: "/bin/sh",
                args: &args,
                cwd: &cwd,
                env: &env,
                cols: DEFAULT_COLS,
                rows: DEFAULT_ROWS,
            },
        )
        .unwrap();

        process.resize(120, 40).unwrap();
        process.kill();
        output.wait_exit();
    }
}
