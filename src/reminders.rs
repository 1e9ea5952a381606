//! Deadline Reminder Monitor
//!
//! Background service that pushes a reminder to participants who still have
//! to complete a challenge that is about to end.
//!
//! Flow:
//! 1. Every `poll_interval_secs`, select challenges ending within the next
//!    `window_minutes` that were never reminded
//! 2. For each one, mark it reminded, then push to accepted participants
//!    that have not completed and opted in to deadline reminders

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::ReminderConfig;
use crate::notify::{dispatch, Notifier, PushMessage};
use crate::storage::{ChallengeStore, StoreResult, WriteBatch, WriteOp};
use crate::time_policy::Clock;
use crate::types::{Challenge, User, UserId};

pub struct ReminderMonitor {
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: ReminderConfig,
}

impl ReminderMonitor {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            config,
        }
    }

    /// Start the monitor (runs forever)
    pub async fn run(&self) {
        info!(
            "Reminder monitor started (poll={}s, window={}min)",
            self.config.poll_interval_secs, self.config.window_minutes
        );

        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));

        loop {
            ticker.tick().await;

            if let Err(e) = self.remind_due().await {
                error!("Error sending deadline reminders: {}", e);
            }
        }
    }

    /// One polling pass. Returns how many challenges were marked reminded.
    pub async fn remind_due(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let until = now + ChronoDuration::minutes(self.config.window_minutes);
        let due = self.store.challenges_ending_between(now, until).await?;
        if due.is_empty() {
            debug!("No challenges due for a reminder");
            return Ok(0);
        }

        for challenge in &due {
            let tokens = self.reminder_tokens(challenge).await?;

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::MarkReminded {
                challenge_id: challenge.id,
                at: now,
            });
            self.store.commit(batch).await?;

            info!(
                "Reminding {} participant(s) of challenge {}",
                tokens.len(),
                challenge.id
            );
            dispatch(
                self.notifier.clone(),
                PushMessage::deadline_reminder(&challenge.title, tokens),
            );
        }

        Ok(due.len())
    }

    async fn reminder_tokens(&self, challenge: &Challenge) -> StoreResult<Vec<String>> {
        let waiting: Vec<UserId> = self
            .store
            .participants(challenge.id)
            .await?
            .into_iter()
            .filter(|p| p.has_accepted() && !p.has_completed())
            .map(|p| p.user_id)
            .collect();

        let users: HashMap<UserId, User> = self
            .store
            .users(&waiting)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(waiting
            .iter()
            .filter_map(|id| users.get(id)?.reminder_token().map(str::to_string))
            .collect())
    }
}

/// Spawn the reminder monitor as a background task
pub fn spawn_reminder_monitor(
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: ReminderConfig,
) {
    if !config.enabled {
        info!("Deadline reminders disabled");
        return;
    }

    tokio::spawn(async move {
        let monitor = ReminderMonitor::new(store, clock, notifier, config);
        monitor.run().await;
    });
}
