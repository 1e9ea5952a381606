//! Temporal classification of challenges.
//!
//! All functions take the current time explicitly; the service gets it from
//! an injected [`Clock`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::config::{CompletionWindow, Cutoff, LifecyclePolicy};
use crate::error::{ApiError, ApiResult};
use crate::types::Challenge;

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// PURE PREDICATES
// ============================================================================

pub fn is_challenge_over(end_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= end_at
}

pub fn is_start_before_end(start_at: Option<DateTime<Utc>>, end_at: DateTime<Utc>) -> bool {
    match start_at {
        Some(start) => start < end_at,
        None => true,
    }
}

/// A challenge without `startAt` never counts as started.
pub fn has_challenge_started(start_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match start_at {
        Some(start) => start < now,
        None => false,
    }
}

pub fn is_challenge_running(
    start_at: Option<DateTime<Utc>>,
    end_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match start_at {
        Some(start) => start < now && now < end_at,
        None => false,
    }
}

// ============================================================================
// DERIVED STATE
// ============================================================================

/// Challenge state derived from timestamps. Ordered: a challenge only ever
/// moves forward through these as time passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChallengeState {
    /// Created; invitations can still be answered
    PendingStart,
    Running,
    Over,
    ResultsReleased,
}

impl ChallengeState {
    pub fn derive(challenge: &Challenge, now: DateTime<Utc>) -> Self {
        if is_challenge_over(challenge.end_at, now) {
            if challenge.has_released_result {
                ChallengeState::ResultsReleased
            } else {
                ChallengeState::Over
            }
        } else if has_challenge_started(challenge.start_at, now) {
            ChallengeState::Running
        } else {
            ChallengeState::PendingStart
        }
    }
}

// ============================================================================
// POLICY GATES
// ============================================================================

impl Cutoff {
    fn check(self, challenge: &Challenge, now: DateTime<Utc>) -> ApiResult<()> {
        if is_challenge_over(challenge.end_at, now) {
            return Err(ApiError::ChallengeOver);
        }
        if self == Cutoff::Started && has_challenge_started(challenge.start_at, now) {
            return Err(ApiError::ChallengeStarted);
        }
        Ok(())
    }
}

impl LifecyclePolicy {
    pub fn check_update(&self, challenge: &Challenge, now: DateTime<Utc>) -> ApiResult<()> {
        self.update_cutoff.check(challenge, now)
    }

    pub fn check_delete(&self, challenge: &Challenge, now: DateTime<Utc>) -> ApiResult<()> {
        self.delete_cutoff.check(challenge, now)
    }

    pub fn check_accept(&self, challenge: &Challenge, now: DateTime<Utc>) -> ApiResult<()> {
        self.accept_cutoff.check(challenge, now)
    }

    pub fn check_complete(&self, challenge: &Challenge, now: DateTime<Utc>) -> ApiResult<()> {
        match self.completion_window {
            CompletionWindow::UntilOver => {
                if is_challenge_over(challenge.end_at, now) {
                    Err(ApiError::ChallengeOver)
                } else {
                    Ok(())
                }
            }
            CompletionWindow::WhileRunning => {
                if is_challenge_running(challenge.start_at, challenge.end_at, now) {
                    Ok(())
                } else {
                    Err(ApiError::ChallengeNotRunning)
                }
            }
        }
    }
}
