use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::events::SessionId;
use super::formatter::FormattedMessage;

/// Ordered record of every message accepted since process start.
///
/// All access goes through one mutex, which doubles as the session's
/// sequencing point: [`append_then`](Self::append_then) and
/// [`snapshot_then`](Self::snapshot_then) run their follow-up work while still
/// holding it, so fan-out order always equals history order and a replay can
/// never overlap with a concurrent append.
#[derive(Debug)]
pub struct HistoryLog {
    session_id: SessionId,
    entries: Mutex<VecDeque<FormattedMessage>>,
    /// Oldest-first eviction threshold. Zero keeps everything.
    max_entries: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    /// Unbounded history with a freshly generated session id.
    pub fn new() -> Self {
        Self::with_max_entries(0)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn append(&self, message: FormattedMessage) {
        self.append_then(message, |_| ());
    }

    /// Append `message`, then run `publish` on it before any other append or
    /// snapshot can proceed.
    pub fn append_then<R>(
        &self,
        message: FormattedMessage,
        publish: impl FnOnce(&FormattedMessage) -> R,
    ) -> R {
        let mut entries = self.lock();
        if self.max_entries > 0 && entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(message.clone());
        publish(&message)
    }

    /// Point-in-time copy of the full history, oldest first.
    pub fn snapshot(&self) -> Vec<FormattedMessage> {
        self.snapshot_then(|history| history)
    }

    /// Take a snapshot and hand it to `deliver` while appends are held off.
    pub fn snapshot_then<R>(&self, deliver: impl FnOnce(Vec<FormattedMessage>) -> R) -> R {
        let entries = self.lock();
        let history = entries.iter().cloned().collect();
        deliver(history)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FormattedMessage>> {
        // Entries are only ever pushed or popped whole, so a poisoned lock
        // still guards a consistent sequence.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
