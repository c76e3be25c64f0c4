//! # Session Persistence
//!
//! Optional durable storage for session records: when `TUNNEL_STORAGE_DIR`
//! is set, every create/update/delete is
//! mirrored to a JSON file named after the session id, and `load_all` restores
//! them into a fresh [`SessionRegistry`] at startup. Absence of the directory,
//! or of any file in it, is never an error — the feature degrades to
//! in-memory-only operation, matching the teacher's "best-effort, non-fatal"
//! treatment of optional I/O elsewhere in `main.rs`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::session::{Session, SessionRegistry};

#[derive(Clone)]
pub struct PersistenceStore {
    dir: PathBuf,
}

impl PersistenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Creates the storage directory if missing. Logs and gives up silently
    /// on failure; callers keep running without persistence.
    pub async fn ensure_dir(&self) {
        if let Err(err) = fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), %err, "could not create session storage directory, persistence disabled");
        }
    }

    pub async fn save(&self, session: &Session) {
        let path = self.path_for(&session.id);
        match serde_json::to_vec_pretty(session) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&path, bytes).await {
                    warn!(session_id = %session.id, %err, "failed to persist session");
                }
            }
            Err(err) => warn!(session_id = %session.id, %err, "failed to serialize session"),
        }
    }

    pub async fn delete(&self, session_id: &str) {
        let path = self.path_for(session_id);
        if let Err(err) = fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(session_id, %err, "failed to remove persisted session file");
            }
        }
    }

    /// Reads every `*.json` file in the storage directory and restores it
    /// into `registry`. A missing directory is not an error: it means
    /// persistence has never been used yet.
    pub async fn load_all(&self, registry: &SessionRegistry) {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                warn!(dir = %self.dir.display(), %err, "failed to read session storage directory");
                return;
            }
        };

        let mut restored = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_json_file(&path) {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                    Ok(session) => {
                        registry.restore(session);
                        restored += 1;
                    }
                    Err(err) => warn!(path = %path.display(), %err, "skipping malformed session file"),
                },
                Err(err) => warn!(path = %path.display(), %err, "failed to read session file"),
            }
        }
        if restored > 0 {
            tracing::info!(restored, "restored persisted sessions");
        }
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}
