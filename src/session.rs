//! A live shell: its PTY, its geometry and the output every viewer shares.

use std::{
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::{
    error::{TerminalError, TerminalResult},
    listeners::{ListenerId, ListenerRegistry, SessionEvent, Subscriber},
    pty::{self, PtyOutput, PtyProcess, PtySpawn, PTY_READ_BUFFER_SIZE},
    scrollback::Scrollback,
};

pub type SessionId = String;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner_key: String,
    pub shell: String,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
    pub created_at: f64,
    pub pid: Option<u32>,
    pub alive: bool,
    pub viewers: usize,
    pub scrollback_bytes: usize,
}

struct OutputState {
    scrollback: Scrollback,
    listeners: ListenerRegistry,
    alive: bool,
}

/// Scrollback and listeners behind one lock.
///
/// `publish` (append then broadcast) and `attach` (snapshot then register)
/// each run as a single critical section, so a viewer sees every chunk
/// exactly once: either inside its snapshot or as a live event.
pub struct SessionOutput {
    state: Mutex<OutputState>,
}

impl SessionOutput {
    pub fn new(scrollback_budget: usize) -> Self {
        Self {
            state: Mutex::new(OutputState {
                scrollback: Scrollback::new(scrollback_budget),
                listeners: ListenerRegistry::new(),
                alive: true,
            }),
        }
    }

    /// Returns false once the output has been closed.
    pub fn publish(&self, chunk: Bytes) -> bool {
        let mut state = self.state.lock();
        if !state.alive {
            return false;
        }
        state.scrollback.append(chunk.clone());
        state.listeners.broadcast(&SessionEvent::Output(chunk));
        true
    }

    /// Register `subscriber` and return the scrollback it should replay
    /// first, or `None` when the session already ended.
    pub fn attach(&self, subscriber: Subscriber) -> Option<(ListenerId, Bytes)> {
        let mut state = self.state.lock();
        if !state.alive {
            return None;
        }
        let snapshot = state.scrollback.snapshot();
        let id = state.listeners.attach(subscriber);
        Some((id, snapshot))
    }

    pub fn detach(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.detach(id)
    }

    /// End every viewer's stream. Only the first call has any effect.
    pub fn close(&self, exit_code: Option<u32>) -> bool {
        let mut state = self.state.lock();
        if !state.alive {
            return false;
        }
        state.alive = false;
        state.listeners.close(&SessionEvent::Exit { exit_code });
        true
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    pub fn snapshot(&self) -> Bytes {
        self.state.lock().scrollback.snapshot()
    }

    pub fn scrollback_bytes(&self) -> usize {
        self.state.lock().scrollback.len_bytes()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

pub struct SessionOptions<'a> {
    pub owner_key: &'a str,
    pub cwd: &'a Path,
    pub shell: &'a str,
    pub shell_args: &'a [String],
    pub env: &'a std::collections::BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub scrollback_bytes: usize,
}

pub struct Session {
    id: SessionId,
    owner_key: String,
    cwd: PathBuf,
    shell: String,
    created_at: f64,
    geometry: Mutex<(u16, u16)>,
    process: PtyProcess,
    output: SessionOutput,
}

impl Session {
    /// Spawn the shell. The caller starts the reader with the returned
    /// [`PtyOutput`] once the session is registered.
    pub fn spawn(id: SessionId, opts: &SessionOptions<'_>) -> TerminalResult<(Arc<Self>, PtyOutput)> {
        let (process, output) = pty::spawn(
            &id,
            &PtySpawn {
                shell: opts.shell,
                args: opts.shell_args,
                cwd: opts.cwd,
                env: opts.env,
                cols: opts.cols,
                rows: opts.rows,
            },
        )?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let session = Arc::new(Session {
            id,
            owner_key: opts.owner_key.to_string(),
            cwd: opts.cwd.to_path_buf(),
            shell: opts.shell.to_string(),
            created_at,
            geometry: Mutex::new((opts.cols, opts.rows)),
            process,
            output: SessionOutput::new(opts.scrollback_bytes),
        });
        Ok((session, output))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn output(&self) -> &SessionOutput {
        &self.output
    }

    pub fn is_alive(&self) -> bool {
        self.output.is_alive()
    }

    pub fn write_input(&self, data: &[u8]) -> TerminalResult<()> {
        if !self.is_alive() {
            return Err(TerminalError::SessionNotFound(self.id.clone()));
        }
        if data.len() > 100 {
            info!("[session:{}] Queueing large input: {} bytes", self.id, data.len());
        }
        self.process.write(data).map_err(|_| {
            error!("[session:{}] Input channel closed", self.id);
            TerminalError::SessionNotFound(self.id.clone())
        })
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        *self.geometry.lock() = (cols, rows);
        if let Err(e) = self.process.resize(cols, rows) {
            error!("[session:{}] {:#}", self.id, e);
        }
    }

    /// End every viewer stream, then kill the child. Closing first makes the
    /// reader's own close after reaping a no-op, so a kill always reports no
    /// exit code.
    pub fn terminate(&self) {
        self.output.close(None);
        self.process.kill();
    }

    pub fn to_info(&self) -> SessionInfo {
        let (cols, rows) = *self.geometry.lock();
        SessionInfo {
            id: self.id.clone(),
            owner_key: self.owner_key.clone(),
            shell: self.shell.clone(),
            cwd: self.cwd.display().to_string(),
            cols,
            rows,
            created_at: self.created_at,
            pid: self.process.pid(),
            alive: self.is_alive(),
            viewers: self.output.listener_count(),
            scrollback_bytes: self.output.scrollback_bytes(),
        }
    }

    /// Start the per-session reader thread. `on_exit` runs after the child
    /// is reaped and before viewers are told the session ended.
    pub fn spawn_reader<F>(self: &Arc<Self>, output: PtyOutput, on_exit: F) -> TerminalResult<()>
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        let session = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", self.id))
            .spawn(move || session.read_until_exit(output, on_exit))
            .map(|_| ())
            .map_err(|e| TerminalError::SpawnFailed(format!("reader thread: {e}")))
    }

    fn read_until_exit<F>(&self, mut output: PtyOutput, on_exit: F)
    where
        F: FnOnce(&Session),
    {
        let mut buf = [0u8; PTY_READ_BUFFER_SIZE];
        let mut total_bytes_read: usize = 0;
        let mut read_count: usize = 0;

        info!("[reader:{}] Reader thread started", self.id);

        loop {
            match output.reader.read(&mut buf) {
                Ok(0) => {
                    info!("[reader:{}] EOF received", self.id);
                    break;
                }
                Ok(n) => {
                    read_count += 1;
                    total_bytes_read += n;
                    self.output.publish(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO on the master once the child is gone.
                    info!("[reader:{}] Read ended: {} (kind: {:?})", self.id, e, e.kind());
                    break;
                }
            }
        }

        let exit_code = output.wait_exit();
        info!(
            "[reader:{}] Process exited with code {:?}. Total: {} reads, {} bytes",
            self.id, exit_code, read_count, total_bytes_read
        );

        on_exit(self);
        self.output.close(exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn chunk(data: &'static str) -> Bytes {
        Bytes::from_static(data.as_bytes())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn late_viewer_gets_snapshot_then_live() {
        let output = SessionOutput::new(1024);

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (_, snapshot_a) = output.attach(tx_a).unwrap();
        assert!(snapshot_a.is_empty());

        output.publish(chunk("hello"));

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (_, snapshot_b) = output.attach(tx_b).unwrap();
        assert_eq!(&snapshot_b[..], b"hello");

        output.publish(chunk("world"));

        assert_eq!(
            drain(&mut rx_a),
            vec![
                SessionEvent::Output(chunk("hello")),
                SessionEvent::Output(chunk("world"))
            ]
        );
        assert_eq!(drain(&mut rx_b), vec![SessionEvent::Output(chunk("world"))]);
    }

    #[test]
    fn close_is_terminal_and_happens_once() {
        let output = SessionOutput::new(1024);
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        output.attach(tx_a).unwrap();
        output.attach(tx_b).unwrap();

        assert!(output.close(Some(0)));
        assert!(!output.close(Some(1)));
        assert!(!output.publish(chunk("late")));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                drain(rx),
                vec![SessionEvent::Exit { exit_code: Some(0) }]
            );
            assert!(matches!(
                rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            ));
        }

        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        assert!(output.attach(tx_c).is_none());
    }

    #[test]
    fn detached_viewer_stops_receiving() {
        let output = SessionOutput::new(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = output.attach(tx).unwrap();

        output.publish(chunk("one"));
        assert!(output.detach(id));
        assert!(!output.detach(id));
        output.publish(chunk("two"));

        assert_eq!(drain(&mut rx), vec![SessionEvent::Output(chunk("one"))]);
        assert_eq!(output.listener_count(), 0);
    }

    #[test]
    fn concurrent_attach_sees_every_chunk_exactly_once() {
        const CHUNKS: usize = 2000;
        let output = Arc::new(SessionOutput::new(usize::MAX));

        let producer = {
            let output = Arc::clone(&output);
            std::thread::spawn(move || {
                for i in 0..CHUNKS {
                    output.publish(Bytes::from(format!("{i};")));
                }
            })
        };

        let mut viewers = Vec::new();
        for _ in 0..8 {
            let (tx, rx) = mpsc::unbounded_channel();
            let (_, snapshot) = output.attach(tx).unwrap();
            viewers.push((snapshot, rx));
            std::thread::yield_now();
        }
        producer.join().unwrap();

        let expected: String = (0..CHUNKS).map(|i| format!("{i};")).collect();
        for (snapshot, mut rx) in viewers {
            let mut seen = snapshot.to_vec();
            for event in drain(&mut rx) {
                if let SessionEvent::Output(data) = event {
                    seen.extend_from_slice(&data);
                }
            }
            assert_eq!(String::from_utf8(seen).unwrap(), expected);
        }
    }
}
