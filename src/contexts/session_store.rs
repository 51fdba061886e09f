use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tracing::debug;

use crate::data::{ErrorContext, Session};

/// Append-only history of debugging sessions.
///
/// Owned by one framework instance and shared between concurrent runs;
/// appends are serialized by the internal lock. The history lives until the
/// store is dropped or `clear` is called.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<Vec<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, session: Session) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        debug!(id = %session.id, status = %session.status, "session recorded");
        sessions.push(session);
    }

    /// Snapshot of all sessions in append order
    pub fn history(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Short identifier derived from the captured context
pub fn session_id(ctx: &ErrorContext) -> String {
    let composite = format!(
        "{}:{}:{}:{}",
        ctx.kind,
        ctx.message,
        ctx.line_number,
        ctx.timestamp.timestamp_nanos_opt().unwrap_or_default()
    );
    let mut hasher = Sha256::new();
    hasher.update(composite.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}
