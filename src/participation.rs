//! Participation Ledger
//!
//! Owns the lifecycle of one participant row per (challenge, user):
//! invited -> accepted -> completed -> vetoed.
//!
//! Invite, accept and reject only produce [`WriteOp`]s so the caller can
//! commit them together with other changes. The remaining operations commit
//! on their own.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::storage::{ChallengeStore, StoreError, WriteBatch, WriteOp};
use crate::types::{ChallengeId, Participant, UserId};

pub struct ParticipationLedger {
    store: Arc<dyn ChallengeStore>,
}

impl ParticipationLedger {
    pub fn new(store: Arc<dyn ChallengeStore>) -> Self {
        Self { store }
    }

    /// Rows for the invited users plus the owner, who joins immediately.
    /// Duplicate ids collapse into one row.
    pub fn invite(
        challenge_id: ChallengeId,
        user_ids: &[UserId],
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> Vec<WriteOp> {
        let mut seen = HashSet::new();
        let mut ops = Vec::with_capacity(user_ids.len() + 1);

        seen.insert(owner_id);
        let mut owner = Participant::invited(challenge_id, owner_id);
        owner.joined_at = Some(now);
        ops.push(WriteOp::InsertParticipant(owner));

        for &user_id in user_ids {
            if seen.insert(user_id) {
                ops.push(WriteOp::InsertParticipant(Participant::invited(
                    challenge_id,
                    user_id,
                )));
            }
        }
        ops
    }

    /// Sets `joined_at`; creates the row for link-based joins
    pub fn accept(challenge_id: ChallengeId, user_id: UserId, now: DateTime<Utc>) -> WriteOp {
        WriteOp::UpsertJoin {
            challenge_id,
            user_id,
            joined_at: now,
        }
    }

    /// Deleting an absent row is not an error
    pub fn reject(challenge_id: ChallengeId, user_id: UserId) -> WriteOp {
        WriteOp::DeleteParticipant {
            challenge_id,
            user_id,
        }
    }

    pub async fn complete(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        if self.store.participant(challenge_id, user_id).await?.is_none() {
            return Err(ApiError::not_participant());
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::SetCompleted {
            challenge_id,
            user_id,
            completed_at: now,
        });
        self.commit_on_row(batch).await?;

        debug!("User {} completed challenge {}", user_id, challenge_id);
        Ok(())
    }

    /// Sets or clears the evidence link on an existing row
    pub async fn set_proof(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        link: Option<String>,
    ) -> ApiResult<()> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::SetEvidence {
            challenge_id,
            user_id,
            link,
        });
        self.commit_on_row(batch).await
    }

    /// Flags the requested victims that joined, completed and are initiated,
    /// and releases the challenge result in the same transaction.
    ///
    /// The caller checks that the challenge is over. Returns the ids flagged.
    pub async fn record_veto(
        &self,
        challenge_id: ChallengeId,
        victims: &[UserId],
    ) -> ApiResult<Vec<UserId>> {
        let requested: HashSet<UserId> = victims.iter().copied().collect();

        let candidates: Vec<UserId> = self
            .store
            .participants(challenge_id)
            .await?
            .into_iter()
            .filter(|p| requested.contains(&p.user_id))
            .filter(|p| p.has_accepted() && p.has_completed())
            .map(|p| p.user_id)
            .collect();

        let mut flagged: Vec<UserId> = self
            .store
            .users(&candidates)
            .await?
            .into_iter()
            .filter(|u| u.is_initiated())
            .map(|u| u.id)
            .collect();
        flagged.sort();

        // The store re-checks joined and completed on commit; a row changed
        // since the read above is skipped rather than flagged.
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::FlagVetoed {
            challenge_id,
            user_ids: flagged.clone(),
        });
        batch.push(WriteOp::ReleaseResult(challenge_id));
        self.store.commit(batch).await?;

        info!(
            "Released results for challenge {} ({} of {} requested vetoed)",
            challenge_id,
            flagged.len(),
            requested.len()
        );
        Ok(flagged)
    }

    /// Commits a batch whose ops require the participant row to exist
    async fn commit_on_row(&self, batch: WriteBatch) -> ApiResult<()> {
        match self.store.commit(batch).await {
            Ok(()) => Ok(()),
            Err(StoreError::RowMissing) => Err(ApiError::not_participant()),
            Err(e) => Err(e.into()),
        }
    }
}
