// src/controller/outbox.rs

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::AnswerRecord;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbox file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Exponential retry schedule for undelivered submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn jittered_delay(&self, rng: &mut impl RngCore, attempt: u32) -> Duration {
        jittered_backoff(rng, self.delay(attempt))
    }
}

/// "Equal jitter": the delay lands in `[backoff/2, backoff]`.
pub(crate) fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

/// A frozen attempt waiting to be accepted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub session_id: Uuid,
    pub registration_number: String,
    pub exam_id: String,
    pub answers: Vec<AnswerRecord>,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Write-ahead queue of submissions.
///
/// Entries are written before the first delivery attempt and removed only
/// once the backend has returned a score, so a completed attempt survives
/// crashes, restarts and network loss.
#[derive(Debug)]
pub struct SubmissionOutbox {
    path: Option<PathBuf>,
    entries: Vec<PendingSubmission>,
}

impl SubmissionOutbox {
    /// Opens (or starts) the queue stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !entries.is_empty() {
            tracing::info!(pending = entries.len(), path = %path.display(), "outbox has undelivered submissions");
        }
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// A queue that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
        }
    }

    pub fn pending(&self) -> &[PendingSubmission] {
        &self.entries
    }

    pub fn get(&self, session_id: Uuid) -> Option<&PendingSubmission> {
        self.entries.iter().find(|e| e.session_id == session_id)
    }

    /// Adds `pending`, replacing any entry for the same session.
    pub fn enqueue(&mut self, pending: PendingSubmission) -> Result<(), OutboxError> {
        match self.entries.iter_mut().find(|e| e.session_id == pending.session_id) {
            Some(existing) => *existing = pending,
            None => self.entries.push(pending),
        }
        self.persist()
    }

    pub fn record_attempt(&mut self, session_id: Uuid) -> Result<u32, OutboxError> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.session_id == session_id) else {
            return Ok(0);
        };
        entry.attempts += 1;
        let attempts = entry.attempts;
        self.persist()?;
        Ok(attempts)
    }

    pub fn remove(&mut self, session_id: Uuid) -> Result<Option<PendingSubmission>, OutboxError> {
        let Some(index) = self.entries.iter().position(|e| e.session_id == session_id) else {
            return Ok(None);
        };
        let removed = self.entries.remove(index);
        self.persist()?;
        Ok(Some(removed))
    }

    fn persist(&self) -> Result<(), OutboxError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
