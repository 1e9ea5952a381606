//! Vote & Veto Tallying
//!
//! Once a challenge is over, accepted participants may accuse each other of
//! not really completing it. The owner reads the tally before releasing the
//! veto result through the lifecycle manager.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::storage::ChallengeStore;
use crate::time_policy::{is_challenge_over, Clock};
use crate::types::{ChallengeId, UserId, Vote};
use crate::views::VoteSummary;

pub struct VoteTally {
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
}

impl VoteTally {
    pub fn new(store: Arc<dyn ChallengeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records an accusation. Re-submitting the same vote succeeds without
    /// storing a second row.
    pub async fn submit_vote(
        &self,
        challenge_id: ChallengeId,
        accuser_id: UserId,
        victim_id: UserId,
    ) -> ApiResult<()> {
        if accuser_id == victim_id {
            return Err(ApiError::InvalidRequest(
                "Cannot vote for yourself.".to_string(),
            ));
        }

        let challenge = self
            .store
            .challenge(challenge_id)
            .await?
            .ok_or_else(ApiError::challenge_not_found)?;

        for user_id in [accuser_id, victim_id] {
            let accepted = self
                .store
                .participant(challenge_id, user_id)
                .await?
                .is_some_and(|p| p.has_accepted());
            if !accepted {
                return Err(ApiError::InvalidRequest("Invalid userIds.".to_string()));
            }
        }

        let now = self.clock.now();
        if !is_challenge_over(challenge.end_at, now) {
            return Err(ApiError::ChallengeNotOver);
        }

        let stored = self
            .store
            .insert_vote(&Vote {
                challenge_id,
                accuser_id,
                victim_id,
                created_at: now,
            })
            .await?;
        debug!(
            "Vote {} -> {} on {} ({})",
            accuser_id,
            victim_id,
            challenge_id,
            if stored { "new" } else { "duplicate" }
        );
        Ok(())
    }

    /// Accusations per accepted, initiated participant, ordered by username
    pub async fn tally(&self, challenge_id: ChallengeId) -> ApiResult<Vec<VoteSummary>> {
        let accepted: Vec<_> = self
            .store
            .participants(challenge_id)
            .await?
            .into_iter()
            .filter(|p| p.has_accepted())
            .collect();

        let ids: Vec<UserId> = accepted.iter().map(|p| p.user_id).collect();
        let users: HashMap<UserId, _> = self
            .store
            .users(&ids)
            .await?
            .into_iter()
            .filter_map(|u| u.initiated().map(|i| (u.id, i)))
            .collect();

        let mut accusers: HashMap<UserId, Vec<UserId>> = HashMap::new();
        for vote in self.store.votes(challenge_id).await? {
            accusers.entry(vote.victim_id).or_default().push(vote.accuser_id);
        }

        let mut summaries: Vec<VoteSummary> = accepted
            .into_iter()
            .filter_map(|p| {
                let user = users.get(&p.user_id)?;
                let mut by = accusers.remove(&p.user_id).unwrap_or_default();
                by.sort();
                Some(VoteSummary {
                    user_id: p.user_id,
                    username: user.username().to_string(),
                    name: user.name().to_string(),
                    avatar: user.avatar().clone(),
                    evidence_link: p.evidence_link,
                    accusation_count: by.len(),
                    accusers: by,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(summaries)
    }

    /// Tally visible to participants of the challenge only
    pub async fn show_votes(
        &self,
        challenge_id: ChallengeId,
        caller_id: UserId,
    ) -> ApiResult<Vec<VoteSummary>> {
        if self.store.challenge(challenge_id).await?.is_none() {
            return Err(ApiError::challenge_not_found());
        }
        if self
            .store
            .participant(challenge_id, caller_id)
            .await?
            .is_none()
        {
            return Err(ApiError::Forbidden(
                "Only participants can view votes.".to_string(),
            ));
        }
        self.tally(challenge_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::participation::ParticipationLedger;
    use crate::storage::{MemoryStore, WriteBatch, WriteOp};
    use crate::time_policy::FixedClock;
    use crate::types::{AvatarAnimal, AvatarColor, Challenge, ChallengeType, User};
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Setup {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        tally: VoteTally,
        challenge_id: ChallengeId,
        owner: UserId,
        a: UserId,
        b: UserId,
        pending: UserId,
    }

    async fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(t0()));

        let mut ids = Vec::new();
        for handle in ["olga", "anna", "bea", "pia"] {
            let mut user = User::new(format!("{}@example.com", handle), t0());
            user.username = Some(handle.to_string());
            user.name = Some(handle.to_string());
            user.avatar_animal = Some(AvatarAnimal::Rabbit);
            user.avatar_color = Some(AvatarColor::Primary);
            user.avatar_bg = Some("#abcdef".to_string());
            store.create_user(&user).await.unwrap();
            ids.push(user.id);
        }
        let (owner, a, b, pending) = (ids[0], ids[1], ids[2], ids[3]);

        let challenge = Challenge {
            id: Uuid::new_v4(),
            title: "No sugar".to_string(),
            description: None,
            start_at: None,
            end_at: t0() + Duration::hours(1),
            challenge_type: ChallengeType::NotCompleted,
            owner_id: owner,
            has_released_result: false,
            reminder_sent_at: None,
            created_at: t0(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertChallenge(challenge.clone()));
        batch.extend(ParticipationLedger::invite(
            challenge.id,
            &[a, b, pending],
            owner,
            t0(),
        ));
        batch.push(ParticipationLedger::accept(challenge.id, a, t0()));
        batch.push(ParticipationLedger::accept(challenge.id, b, t0()));
        batch.push(WriteOp::SetEvidence {
            challenge_id: challenge.id,
            user_id: b,
            link: Some("https://media.test/b.png".to_string()),
        });
        store.commit(batch).await.unwrap();

        Setup {
            tally: VoteTally::new(store.clone(), clock.clone()),
            store,
            clock,
            challenge_id: challenge.id,
            owner,
            a,
            b,
            pending,
        }
    }

    #[tokio::test]
    async fn test_vote_preconditions() {
        let s = setup().await;

        let err = s.tally.submit_vote(s.challenge_id, s.a, s.a).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let err = s.tally.submit_vote(s.challenge_id, s.a, s.b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeNotOver);

        s.clock.advance(Duration::hours(2));

        let err = s
            .tally
            .submit_vote(s.challenge_id, s.a, s.pending)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let err = s
            .tally
            .submit_vote(Uuid::new_v4(), s.a, s.b)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_vote_counts_once() {
        let s = setup().await;
        s.clock.advance(Duration::hours(2));

        s.tally.submit_vote(s.challenge_id, s.a, s.b).await.unwrap();
        s.tally.submit_vote(s.challenge_id, s.a, s.b).await.unwrap();
        s.tally.submit_vote(s.challenge_id, s.owner, s.b).await.unwrap();

        assert_eq!(s.store.votes(s.challenge_id).await.unwrap().len(), 2);

        let summaries = s.tally.tally(s.challenge_id).await.unwrap();
        let names: Vec<&str> = summaries.iter().map(|v| v.username.as_str()).collect();
        assert_eq!(names, vec!["anna", "bea", "olga"]);

        let bea = &summaries[1];
        assert_eq!(bea.accusation_count, 2);
        let mut expected = vec![s.a, s.owner];
        expected.sort();
        assert_eq!(bea.accusers, expected);
        assert_eq!(bea.evidence_link.as_deref(), Some("https://media.test/b.png"));
        assert_eq!(summaries[0].accusation_count, 0);
    }

    #[tokio::test]
    async fn test_show_votes_requires_participation() {
        let s = setup().await;
        let outsider = Uuid::new_v4();

        let err = s
            .tally
            .show_votes(s.challenge_id, outsider)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        // pending invitees can look
        let votes = s.tally.show_votes(s.challenge_id, s.pending).await.unwrap();
        assert_eq!(votes.len(), 3);
    }
}
