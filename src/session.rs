//! Process-wide tracking of in-flight scrape sessions.
//!
//! The [`SessionTracker`] is the one piece of mutable shared state between
//! concurrent runners, the status-polling endpoint, and the cancellation
//! endpoint. Sessions move through a monotonic phase machine:
//!
//! ```text
//! queued → fetching → extracting → persisting → {completed | failed | cancelled}
//! ```
//!
//! Cancellation is cooperative: [`SessionTracker::cancel`] sets a per-session
//! atomic flag that the runner polls between items; nothing in-flight is
//! forcibly stopped. Terminal sessions stay queryable for a retention window
//! to serve late status polls, then [`SessionTracker::evict_expired`] drops
//! them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{RunCounts, Website};

/// How long finished sessions remain queryable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Current phase of a scrape session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Fetching,
    Extracting,
    Persisting,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// Position in the phase machine; transitions never go backward.
    fn rank(self) -> u8 {
        match self {
            Phase::Queued => 0,
            Phase::Fetching => 1,
            Phase::Extracting => 2,
            Phase::Persisting => 3,
            Phase::Completed | Phase::Failed | Phase::Cancelled => 4,
        }
    }
}

/// Terminal outcome handed to [`SessionTracker::finish`].
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Read-only view of one session, served to status polls.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub website_id: u64,
    pub website_name: String,
    pub phase: Phase,
    pub counts: RunCounts,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

struct SessionEntry {
    website_id: u64,
    website_name: String,
    phase: Phase,
    counts: RunCounts,
    cancel: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
    error: Option<String>,
    finished_at: Option<Instant>,
}

impl SessionEntry {
    fn snapshot(&self, id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            id,
            website_id: self.website_id,
            website_name: self.website_name.clone(),
            phase: self.phase,
            counts: self.counts,
            cancel_requested: self.cancel.load(Ordering::Acquire),
            started_at: self.started_at,
            error: self.error.clone(),
        }
    }
}

/// Shared progress store for all in-flight sessions.
pub struct SessionTracker {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    retention: Duration,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl SessionTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Allocate a new session in phase `queued` and return its identifier.
    /// Safe to call concurrently for different websites.
    pub fn start(&self, website: &Website) -> Uuid {
        let id = Uuid::new_v4();
        let entry = SessionEntry {
            website_id: website.id,
            website_name: website.name.clone(),
            phase: Phase::Queued,
            counts: RunCounts::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
            error: None,
            finished_at: None,
        };
        let mut sessions = self.sessions.lock().expect("tracker lock poisoned");
        sessions.insert(id, entry);
        debug!(session = %id, website = %website.name, "session registered");
        id
    }

    /// The session's cancellation flag, pollable without the tracker lock.
    pub fn cancel_flag(&self, id: Uuid) -> Option<Arc<AtomicBool>> {
        let sessions = self.sessions.lock().expect("tracker lock poisoned");
        sessions.get(&id).map(|e| Arc::clone(&e.cancel))
    }

    /// Advance the session's progress snapshot. Returns `false` (a no-op)
    /// when the session is missing, already terminal, or the transition
    /// would go backward.
    pub fn update(&self, id: Uuid, phase: Phase, counts: RunCounts) -> bool {
        let mut sessions = self.sessions.lock().expect("tracker lock poisoned");
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        if entry.phase.is_terminal() || phase.rank() < entry.phase.rank() {
            return false;
        }
        entry.phase = phase;
        entry.counts = counts;
        true
    }

    /// Request cooperative cancellation. Idempotent; returns whether the
    /// request was newly made.
    pub fn cancel(&self, id: Uuid) -> bool {
        let sessions = self.sessions.lock().expect("tracker lock poisoned");
        let Some(entry) = sessions.get(&id) else {
            return false;
        };
        if entry.phase.is_terminal() {
            return false;
        }
        let newly = !entry.cancel.swap(true, Ordering::AcqRel);
        if newly {
            info!(session = %id, website = %entry.website_name, "cancellation requested");
        }
        newly
    }

    /// Read-only snapshot for status polling.
    pub fn get(&self, id: Uuid) -> Option<SessionSnapshot> {
        let sessions = self.sessions.lock().expect("tracker lock poisoned");
        sessions.get(&id).map(|e| e.snapshot(id))
    }

    /// Snapshots of every non-terminal session.
    pub fn active(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().expect("tracker lock poisoned");
        sessions
            .iter()
            .filter(|(_, e)| !e.phase.is_terminal())
            .map(|(id, e)| e.snapshot(*id))
            .collect()
    }

    /// Transition the session to its terminal phase. The entry remains
    /// queryable for the retention window, then is evicted.
    pub fn finish(&self, id: Uuid, outcome: SessionOutcome) {
        let mut sessions = self.sessions.lock().expect("tracker lock poisoned");
        let Some(entry) = sessions.get_mut(&id) else {
            warn!(session = %id, "finish on unknown session");
            return;
        };
        if entry.phase.is_terminal() {
            return;
        }
        entry.phase = match outcome {
            SessionOutcome::Completed => Phase::Completed,
            SessionOutcome::Failed(message) => {
                entry.error = Some(message);
                Phase::Failed
            }
            SessionOutcome::Cancelled => Phase::Cancelled,
        };
        entry.finished_at = Some(Instant::now());
        debug!(session = %id, phase = ?entry.phase, "session finished");
    }

    /// Drop terminal sessions older than the retention window.
    pub fn evict_expired(&self) {
        let mut sessions = self.sessions.lock().expect("tracker lock poisoned");
        let retention = self.retention;
        let before = sessions.len();
        sessions.retain(|_, e| match e.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted finished sessions");
        }
    }
}
