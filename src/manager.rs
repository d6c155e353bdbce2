//! Owns every session and the owner index used to reuse them.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    env::{resolve_shell, sanitized_env},
    error::{TerminalError, TerminalResult},
    listeners::{ListenerId, Subscriber},
    pty::{DEFAULT_COLS, DEFAULT_ROWS},
    scrollback::DEFAULT_SCROLLBACK_BYTES,
    session::{Session, SessionId, SessionInfo, SessionOptions},
};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Overrides `$SHELL` when set.
    pub shell: Option<String>,
    pub shell_args: Vec<String>,
    pub scrollback_bytes: usize,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: vec!["-l".to_string()],
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<SessionId, Arc<Session>>,
    by_owner: HashMap<String, SessionId>,
}

impl Indexes {
    fn live(&self, id: &str) -> Option<Arc<Session>> {
        self.by_id.get(id).filter(|s| s.is_alive()).cloned()
    }

    fn live_for_owner(&self, owner_key: &str) -> Option<SessionId> {
        let id = self.by_owner.get(owner_key)?;
        self.live(id).map(|s| s.id().to_string())
    }

    fn insert(&mut self, session: Arc<Session>) {
        self.by_owner
            .insert(session.owner_key().to_string(), session.id().to_string());
        self.by_id.insert(session.id().to_string(), session);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Session>> {
        let session = self.by_id.remove(id)?;
        if self.by_owner.get(session.owner_key()).map(String::as_str) == Some(id) {
            self.by_owner.remove(session.owner_key());
        }
        Some(session)
    }
}

struct ManagerInner {
    config: ManagerConfig,
    indexes: Mutex<Indexes>,
}

impl ManagerInner {
    fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut indexes = self.indexes.lock();
        let removed = indexes.remove(id);
        if removed.is_some() {
            info!(
                "[manager] Session {} removed. Remaining sessions: {}",
                id,
                indexes.by_id.len()
            );
        }
        removed
    }
}

/// Directory of live terminal sessions.
///
/// Cloning is cheap and every clone refers to the same sessions. The index
/// lock is held only while the maps change; process spawn and teardown
/// happen outside it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                indexes: Mutex::new(Indexes::default()),
            }),
        }
    }

    /// Return the live session for `owner_key`, spawning one in `cwd` if
    /// there is none.
    pub fn get_or_create(&self, owner_key: &str, cwd: &Path) -> TerminalResult<SessionId> {
        if let Some(id) = self.find_by_owner(owner_key) {
            return Ok(id);
        }

        let usable = std::fs::metadata(cwd).map(|m| m.is_dir()).unwrap_or(false);
        if !usable {
            return Err(TerminalError::DirectoryInvalid(cwd.to_path_buf()));
        }

        let config = &self.inner.config;
        let env = process_env();
        let shell = resolve_shell(config.shell.as_deref(), &env);
        let id = Uuid::new_v4().to_string();

        info!(
            "[manager] Creating session {} for owner {} (shell={}, cwd={})",
            id,
            owner_key,
            shell,
            cwd.display()
        );

        let (session, output) = Session::spawn(
            id.clone(),
            &SessionOptions {
                owner_key,
                cwd,
                shell: &shell,
                shell_args: &config.shell_args,
                env: &env,
                cols: config.cols,
                rows: config.rows,
                scrollback_bytes: config.scrollback_bytes,
            },
        )?;

        let existing = {
            let mut indexes = self.inner.indexes.lock();
            let existing = indexes.live_for_owner(owner_key);
            if existing.is_none() {
                indexes.insert(Arc::clone(&session));
            }
            existing
        };

        if let Some(existing) = existing {
            warn!(
                "[manager] Owner {} gained session {} while spawning; discarding {}",
                owner_key, existing, id
            );
            session.terminate();
            // Reap the discarded child.
            session.spawn_reader(output, |_| {})?;
            return Ok(existing);
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let started = session.spawn_reader(output, move |exited| {
            if let Some(inner) = weak.upgrade() {
                inner.remove(exited.id());
            }
        });
        if let Err(e) = started {
            self.inner.remove(&id);
            session.terminate();
            return Err(e);
        }

        info!("[manager] Session created: {} (pid: {:?})", id, session.to_info().pid);
        Ok(id)
    }

    /// Queue input for the session's shell.
    pub fn write(&self, session_id: &str, data: &[u8]) -> TerminalResult<()> {
        self.get(session_id)
            .ok_or_else(|| TerminalError::SessionNotFound(session_id.to_string()))?
            .write_input(data)
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        if let Some(session) = self.get(session_id) {
            info!("[session:{}] Resize: {}x{}", session_id, cols, rows);
            session.resize(cols, rows);
        }
    }

    pub fn kill(&self, session_id: &str) {
        if let Some(session) = self.inner.remove(session_id) {
            info!("[session:{}] Killing", session_id);
            session.terminate();
        }
    }

    pub fn find_by_owner(&self, owner_key: &str) -> Option<SessionId> {
        self.inner.indexes.lock().live_for_owner(owner_key)
    }

    /// Snapshot the scrollback and register `subscriber` as one step.
    pub fn attach_listener(
        &self,
        session_id: &str,
        subscriber: Subscriber,
    ) -> TerminalResult<(ListenerId, Bytes)> {
        self.get(session_id)
            .and_then(|session| session.output().attach(subscriber))
            .ok_or_else(|| TerminalError::SessionNotFound(session_id.to_string()))
    }

    pub fn detach_listener(&self, session_id: &str, listener: ListenerId) {
        if let Some(session) = self.get(session_id) {
            session.output().detach(listener);
        }
    }

    pub fn scrollback(&self, session_id: &str) -> Option<Bytes> {
        self.get(session_id).map(|s| s.output().snapshot())
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).map(|s| s.to_info())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.inner.indexes.lock().by_id.values().cloned().collect();
        let mut infos: Vec<_> = sessions.iter().map(|s| s.to_info()).collect();
        infos.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        infos
    }

    pub fn session_count(&self) -> usize {
        self.inner.indexes.lock().by_id.len()
    }

    /// Kill every session.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut indexes = self.inner.indexes.lock();
            indexes.by_owner.clear();
            indexes.by_id.drain().map(|(_, s)| s).collect()
        };
        info!("[manager] Shutting down {} sessions", sessions.len());
        for session in sessions {
            session.terminate();
        }
    }

    fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.indexes.lock().live(session_id)
    }
}

fn process_env() -> BTreeMap<String, String> {
    sanitized_env(std::env::vars_os().filter_map(|(k, v)| {
        match (k.into_string(), v.into_string()) {
            (Ok(k), Ok(v)) => Some((k, v)),
            (Ok(k), Err(_)) => {
                debug!("[manager] Skipping {} from the shell env: value is not UTF-8", k);
                None
            }
            (Err(k), _) => {
                debug!("[manager] Skipping {:?} from the shell env: name is not UTF-8", k);
                None
            }
        }
    }))
}
