//! Single-timer refresh scheduling.
//!
//! The scheduler owns at most one pending timer. Arming always aborts the
//! previous timer by its handle first, so two timers can never both fire for
//! one session. When a timer fires, its task detaches itself from the
//! scheduler ([`RefreshScheduler::begin_refresh`]) before doing any work; a
//! later re-arm from inside the refresh therefore never aborts the task that
//! is performing it.

use std::future::Future;
use std::time::Duration;

use strum::Display;
use tokio::task::JoinHandle;
use tracing::debug;

use super::token::TokenSet;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshState {
    /// Nothing scheduled.
    #[default]
    Idle,
    /// One timer is pending and fires at `fire_at` (unix seconds).
    Scheduled { fire_at: i64 },
    /// A timer fired and its refresh is in flight.
    Refreshing,
}

struct PendingRefresh {
    id: u64,
    fire_at: i64,
    handle: JoinHandle<()>,
}

/// Owner of the one pending refresh timer.
pub struct RefreshScheduler {
    buffer_secs: u64,
    next_id: u64,
    pending: Option<PendingRefresh>,
    refreshing: Option<u64>,
}

impl RefreshScheduler {
    pub fn new(buffer_secs: u64) -> Self {
        Self {
            buffer_secs,
            next_id: 0,
            pending: None,
            refreshing: None,
        }
    }

    pub fn buffer_secs(&self) -> u64 {
        self.buffer_secs
    }

    pub fn state(&self) -> RefreshState {
        if let Some(pending) = &self.pending {
            RefreshState::Scheduled {
                fire_at: pending.fire_at,
            }
        } else if self.refreshing.is_some() {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Unix second at which `tokens` should be refreshed.
    pub fn fire_at(&self, tokens: &TokenSet) -> i64 {
        tokens.refresh_due_at(self.buffer_secs)
    }

    /// Cancel whatever is pending, then arm one timer for `tokens`.
    ///
    /// `on_fire` receives the timer id and runs on the timer's task once the
    /// delay elapses. Returns the new timer id.
    pub fn arm<F, Fut>(&mut self, tokens: &TokenSet, now: i64, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let fire_at = self.fire_at(tokens);
        let delay = Duration::from_secs(u64::try_from(fire_at.saturating_sub(now)).unwrap_or(0));
        debug!(timer = id, fire_at, delay_secs = delay.as_secs(), "arming token refresh");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(id).await;
        });
        self.pending = Some(PendingRefresh {
            id,
            fire_at,
            handle,
        });
        id
    }

    /// Abort the pending timer and forget any in-flight refresh.
    ///
    /// Returns `true` if a timer was pending.
    pub fn cancel(&mut self) -> bool {
        self.refreshing = None;
        match self.pending.take() {
            Some(pending) => {
                debug!(timer = pending.id, "cancelling token refresh");
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a fired timer. Detaches the timer and moves to
    /// [`RefreshState::Refreshing`] if `id` is still the pending timer.
    pub fn begin_refresh(&mut self, id: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.id == id => {
                self.pending = None;
                self.refreshing = Some(id);
                true
            }
            _ => false,
        }
    }

    /// Called when the refresh started by timer `id` is done.
    pub fn finish_refresh(&mut self, id: u64) {
        if self.refreshing == Some(id) {
            self.refreshing = None;
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
