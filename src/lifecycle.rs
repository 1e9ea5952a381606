//! Challenge Lifecycle Manager
//!
//! Orchestrates every challenge operation:
//! - Ownership and temporal gating (see [`LifecyclePolicy`])
//! - Participant and contact side effects, committed in one batch
//! - Invitation pushes, dispatched only after the batch committed
//!
//! Challenge state is never stored; it is derived from `start_at`, `end_at`
//! and the current time on every call.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LifecyclePolicy;
use crate::contacts::ContactGraph;
use crate::error::{ApiError, ApiResult};
use crate::notify::{dispatch, Notifier, PushMessage};
use crate::participation::ParticipationLedger;
use crate::storage::{ChallengeStore, WriteBatch, WriteOp};
use crate::time_policy::{
    has_challenge_started, is_challenge_over, is_start_before_end, Clock,
};
use crate::types::{Challenge, ChallengeId, ChallengeType, Participant, User, UserId};
use crate::upload::EvidenceStore;
use crate::views::{ChallengeData, ChallengeList};

/// Input for [`ChallengeLifecycle::create`]
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub title: String,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    pub challenge_type: ChallengeType,
    pub participants: Vec<UserId>,
    pub notification_message: Option<String>,
}

/// Input for [`ChallengeLifecycle::update`]; `None` keeps the stored value.
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ChallengePatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start_at: Option<Option<DateTime<Utc>>>,
    pub end_at: Option<DateTime<Utc>>,
    pub challenge_type: Option<ChallengeType>,
    /// Full replacement list of invitees, owner excluded
    pub participants: Option<Vec<UserId>>,
}

/// Where a participation shows up in a user's challenge list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    History,
    Ongoing,
    PendingStart,
    PendingResponse,
    /// Invitation that can no longer be accepted; not listed
    Lapsed,
}

impl Bucket {
    /// Unanswered invitations stay listed for as long as `policy` lets them be accepted
    pub fn classify(
        challenge: &Challenge,
        participant: &Participant,
        now: DateTime<Utc>,
        policy: &LifecyclePolicy,
    ) -> Self {
        let accepted = participant.has_accepted();
        let started = has_challenge_started(challenge.start_at, now);

        if is_challenge_over(challenge.end_at, now) {
            if accepted {
                Bucket::History
            } else {
                Bucket::Lapsed
            }
        } else if accepted {
            if started {
                Bucket::Ongoing
            } else {
                Bucket::PendingStart
            }
        } else if policy.check_accept(challenge, now).is_ok() {
            Bucket::PendingResponse
        } else {
            Bucket::Lapsed
        }
    }
}

pub struct ChallengeLifecycle {
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    evidence: Arc<dyn EvidenceStore>,
    policy: LifecyclePolicy,
    ledger: ParticipationLedger,
    contacts: ContactGraph,
}

impl ChallengeLifecycle {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        evidence: Arc<dyn EvidenceStore>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            ledger: ParticipationLedger::new(store.clone()),
            contacts: ContactGraph::new(store.clone()),
            store,
            clock,
            notifier,
            evidence,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    // ========================================================================
    // OWNER OPERATIONS
    // ========================================================================

    pub async fn create(&self, owner_id: UserId, input: NewChallenge) -> ApiResult<ChallengeId> {
        let now = self.clock.now();

        let title = validate_title(&input.title)?;
        validate_dates(input.start_at, input.end_at, now)?;

        let owner = self
            .store
            .user(owner_id)
            .await?
            .ok_or_else(|| ApiError::NonExistentAccount("User does not exist.".to_string()))?;
        let owner_profile = owner.initiated().ok_or_else(|| {
            ApiError::UserNotInit("Complete your profile before creating a challenge.".to_string())
        })?;

        let invitees = self.eligible_invitees(owner_id, &input.participants).await?;

        let challenge = Challenge {
            id: uuid::Uuid::new_v4(),
            title,
            description: input.description,
            start_at: input.start_at,
            end_at: input.end_at,
            challenge_type: input.challenge_type,
            owner_id,
            has_released_result: false,
            reminder_sent_at: None,
            created_at: now,
        };
        let invitee_ids: Vec<UserId> = invitees.iter().map(|u| u.id).collect();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertChallenge(challenge.clone()));
        batch.extend(ParticipationLedger::invite(
            challenge.id,
            &invitee_ids,
            owner_id,
            now,
        ));
        batch.extend(
            self.contacts
                .grow_from_challenge_create(owner_id, &invitee_ids, now)
                .await?,
        );
        self.store.commit(batch).await?;

        info!(
            "User {} created challenge {} with {} invitees",
            owner_id,
            challenge.id,
            invitee_ids.len()
        );

        self.notify_invited(
            &challenge,
            &invitees,
            input.notification_message.as_deref(),
            owner_profile.name(),
        );
        Ok(challenge.id)
    }

    pub async fn update(
        &self,
        challenge_id: ChallengeId,
        caller_id: UserId,
        patch: ChallengePatch,
    ) -> ApiResult<()> {
        let now = self.clock.now();
        let challenge = self.load_owned(challenge_id, caller_id).await?;
        self.policy.check_update(&challenge, now)?;

        let mut updated = challenge.clone();
        if let Some(title) = &patch.title {
            updated.title = validate_title(title)?;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(start_at) = patch.start_at {
            updated.start_at = start_at;
        }
        if let Some(end_at) = patch.end_at {
            updated.end_at = end_at;
        }
        if let Some(challenge_type) = patch.challenge_type {
            updated.challenge_type = challenge_type;
        }
        if !is_start_before_end(updated.start_at, updated.end_at) {
            return Err(ApiError::InvalidRequest(
                "Start date must be before end date.".to_string(),
            ));
        }
        if patch.end_at.is_some() && is_challenge_over(updated.end_at, now) {
            return Err(ApiError::InvalidRequest(
                "End date must be in the future.".to_string(),
            ));
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateChallenge(updated.clone()));

        let mut added = Vec::new();
        if let Some(requested) = &patch.participants {
            let current: HashSet<UserId> = self
                .store
                .participants(challenge_id)
                .await?
                .into_iter()
                .map(|p| p.user_id)
                .collect();
            let requested_set: HashSet<UserId> = requested.iter().copied().collect();

            added = self
                .eligible_invitees(challenge.owner_id, requested)
                .await?
                .into_iter()
                .filter(|u| !current.contains(&u.id))
                .collect();
            let added_ids: Vec<UserId> = added.iter().map(|u| u.id).collect();

            let mut removed: Vec<UserId> = current
                .into_iter()
                .filter(|id| *id != challenge.owner_id && !requested_set.contains(id))
                .collect();
            removed.sort();

            for &user_id in &added_ids {
                batch.push(WriteOp::InsertParticipant(Participant::invited(
                    challenge_id,
                    user_id,
                )));
            }
            for &user_id in &removed {
                batch.push(ParticipationLedger::reject(challenge_id, user_id));
            }
            batch.extend(
                self.contacts
                    .grow_from_challenge_create(challenge.owner_id, &added_ids, now)
                    .await?,
            );

            debug!(
                "Challenge {} participants: +{} -{}",
                challenge_id,
                added_ids.len(),
                removed.len()
            );
        }

        self.store.commit(batch).await?;
        info!("Challenge {} updated by owner", challenge_id);

        if !added.is_empty() {
            let owner = self.store.user(challenge.owner_id).await?;
            let owner_name = owner.as_ref().map(display_name).unwrap_or("Someone");
            self.notify_invited(&updated, &added, None, owner_name);
        }
        Ok(())
    }

    pub async fn remove(&self, challenge_id: ChallengeId, caller_id: UserId) -> ApiResult<()> {
        let challenge = self.load_owned(challenge_id, caller_id).await?;
        self.policy.check_delete(&challenge, self.clock.now())?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteParticipants(challenge_id));
        batch.push(WriteOp::DeleteChallenge(challenge_id));
        self.store.commit(batch).await?;

        info!("Challenge {} deleted by owner", challenge_id);
        Ok(())
    }

    /// Flags vetoed participants and publishes the result
    pub async fn release_veto(
        &self,
        challenge_id: ChallengeId,
        caller_id: UserId,
        vetoed: &[UserId],
    ) -> ApiResult<Vec<UserId>> {
        let challenge = self.load_owned(challenge_id, caller_id).await?;
        if !is_challenge_over(challenge.end_at, self.clock.now()) {
            return Err(ApiError::ChallengeNotOver);
        }
        self.ledger.record_veto(challenge_id, vetoed).await
    }

    // ========================================================================
    // PARTICIPANT OPERATIONS
    // ========================================================================

    pub async fn accept(&self, challenge_id: ChallengeId, user_id: UserId) -> ApiResult<()> {
        let now = self.clock.now();
        let challenge = self.load(challenge_id).await?;
        self.policy.check_accept(&challenge, now)?;

        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| ApiError::NonExistentAccount("User does not exist.".to_string()))?;
        if !user.is_initiated() {
            return Err(ApiError::UserNotInit(
                "Complete your profile before joining a challenge.".to_string(),
            ));
        }

        let mut batch = WriteBatch::new();
        batch.push(ParticipationLedger::accept(challenge_id, user_id, now));
        batch.extend(
            self.contacts
                .grow_from_challenge_accept(user_id, challenge.owner_id, now)
                .await?,
        );
        self.store.commit(batch).await?;

        debug!("User {} accepted challenge {}", user_id, challenge_id);
        Ok(())
    }

    /// Leaves a challenge. Missing challenges and rows are not errors.
    pub async fn reject(&self, challenge_id: ChallengeId, user_id: UserId) -> ApiResult<()> {
        let Some(challenge) = self.store.challenge(challenge_id).await? else {
            return Ok(());
        };
        if self.store.participant(challenge_id, user_id).await?.is_none() {
            return Ok(());
        }
        if challenge.owner_id == user_id {
            return Err(ApiError::InvalidRequest(
                "Owner cannot leave their own challenge.".to_string(),
            ));
        }
        if is_challenge_over(challenge.end_at, self.clock.now()) {
            return Err(ApiError::ChallengeOver);
        }

        let mut batch = WriteBatch::new();
        batch.push(ParticipationLedger::reject(challenge_id, user_id));
        self.store.commit(batch).await?;

        debug!("User {} left challenge {}", user_id, challenge_id);
        Ok(())
    }

    pub async fn complete(&self, challenge_id: ChallengeId, user_id: UserId) -> ApiResult<()> {
        let now = self.clock.now();
        let challenge = self.load(challenge_id).await?;
        self.policy.check_complete(&challenge, now)?;
        self.ledger.complete(challenge_id, user_id, now).await
    }

    /// Uploads the proof and links it to the caller's accepted row.
    /// Uploads follow the completion window.
    pub async fn submit_proof(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ApiResult<String> {
        let challenge = self.load(challenge_id).await?;
        let joined = self
            .store
            .participant(challenge_id, user_id)
            .await?
            .is_some_and(|p| p.has_accepted());
        if !joined {
            return Err(ApiError::not_participant());
        }
        self.policy.check_complete(&challenge, self.clock.now())?;

        let url = self
            .evidence
            .store(bytes, content_type)
            .await
            .map_err(|e| ApiError::Internal(format!("evidence upload failed: {}", e)))?;
        self.ledger
            .set_proof(challenge_id, user_id, Some(url.clone()))
            .await?;

        debug!("User {} submitted proof for {}", user_id, challenge_id);
        Ok(url)
    }

    pub async fn clear_proof(&self, challenge_id: ChallengeId, user_id: UserId) -> ApiResult<()> {
        self.load(challenge_id).await?;
        self.ledger.set_proof(challenge_id, user_id, None).await
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Every challenge the user takes part in, partitioned by status
    pub async fn list_for_user(&self, user_id: UserId) -> ApiResult<ChallengeList> {
        let now = self.clock.now();
        let mine = self.store.challenges_of(user_id).await?;

        let ids: Vec<ChallengeId> = mine.iter().map(|(c, _)| c.id).collect();
        let mut rows_by_challenge: HashMap<ChallengeId, Vec<Participant>> = HashMap::new();
        for row in self.store.participants_of_challenges(&ids).await? {
            rows_by_challenge.entry(row.challenge_id).or_default().push(row);
        }

        let mut user_ids: Vec<UserId> = rows_by_challenge
            .values()
            .flatten()
            .map(|p| p.user_id)
            .chain(mine.iter().map(|(c, _)| c.owner_id))
            .collect();
        user_ids.sort();
        user_ids.dedup();
        let users = self.user_map(&user_ids).await?;

        let mut list = ChallengeList::default();
        for (challenge, own_row) in &mine {
            let bucket = match Bucket::classify(challenge, own_row, now, &self.policy) {
                Bucket::History => &mut list.history,
                Bucket::Ongoing => &mut list.ongoing,
                Bucket::PendingStart => &mut list.pending_start,
                Bucket::PendingResponse => &mut list.pending_response,
                Bucket::Lapsed => continue,
            };
            let Some(owner) = users.get(&challenge.owner_id) else {
                continue;
            };
            let rows = rows_by_challenge
                .get(&challenge.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            bucket.push(ChallengeData::build(challenge, owner, rows, &users));
        }

        list.history.sort_by(|a, b| b.end_at.cmp(&a.end_at));
        for bucket in [
            &mut list.ongoing,
            &mut list.pending_start,
            &mut list.pending_response,
        ] {
            bucket.sort_by(|a, b| a.end_at.cmp(&b.end_at));
        }
        Ok(list)
    }

    /// Public detail view; knowing the id is enough
    pub async fn show(&self, challenge_id: ChallengeId) -> ApiResult<ChallengeData> {
        let challenge = self.load(challenge_id).await?;
        let rows = self.store.participants(challenge_id).await?;

        let mut user_ids: Vec<UserId> = rows.iter().map(|p| p.user_id).collect();
        user_ids.push(challenge.owner_id);
        let users = self.user_map(&user_ids).await?;

        let owner = users
            .get(&challenge.owner_id)
            .ok_or_else(|| ApiError::Internal(format!("owner of {} missing", challenge_id)))?;
        Ok(ChallengeData::build(&challenge, owner, &rows, &users))
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn load(&self, challenge_id: ChallengeId) -> ApiResult<Challenge> {
        self.store
            .challenge(challenge_id)
            .await?
            .ok_or_else(ApiError::challenge_not_found)
    }

    async fn load_owned(&self, challenge_id: ChallengeId, caller_id: UserId) -> ApiResult<Challenge> {
        let challenge = self.load(challenge_id).await?;
        if challenge.owner_id != caller_id {
            return Err(ApiError::Forbidden(
                "Only the owner can manage this challenge.".to_string(),
            ));
        }
        Ok(challenge)
    }

    async fn user_map(&self, ids: &[UserId]) -> ApiResult<HashMap<UserId, User>> {
        Ok(self
            .store
            .users(ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect())
    }

    /// Existing, initiated users other than the owner, in request order
    async fn eligible_invitees(&self, owner_id: UserId, requested: &[UserId]) -> ApiResult<Vec<User>> {
        let mut seen = HashSet::from([owner_id]);
        let ids: Vec<UserId> = requested
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let mut found = self.user_map(&ids).await?;
        Ok(ids
            .iter()
            .filter_map(|id| found.remove(id))
            .filter(|u| u.is_initiated())
            .collect())
    }

    fn notify_invited(
        &self,
        challenge: &Challenge,
        invitees: &[User],
        custom_message: Option<&str>,
        owner_name: &str,
    ) {
        let tokens: Vec<String> = invitees
            .iter()
            .filter_map(|u| u.invitation_token())
            .map(str::to_string)
            .collect();
        dispatch(
            self.notifier.clone(),
            PushMessage::invitation(&challenge.title, custom_message, owner_name, tokens),
        );
    }
}

fn validate_title(title: &str) -> ApiResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidRequest("Title is required.".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_dates(
    start_at: Option<DateTime<Utc>>,
    end_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    if !is_start_before_end(start_at, end_at) {
        return Err(ApiError::InvalidRequest(
            "Start date must be before end date.".to_string(),
        ));
    }
    if is_challenge_over(end_at, now) {
        return Err(ApiError::InvalidRequest(
            "End date must be in the future.".to_string(),
        ));
    }
    Ok(())
}

fn display_name(user: &User) -> &str {
    user.name
        .as_deref()
        .or(user.username.as_deref())
        .unwrap_or("Someone")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cutoff;
    use crate::error::ErrorCode;
    use crate::notify::testing::RecordingNotifier;
    use crate::storage::MemoryStore;
    use crate::time_policy::FixedClock;
    use crate::types::{AvatarAnimal, AvatarColor};
    use async_trait::async_trait;
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    struct StaticEvidence;

    #[async_trait]
    impl EvidenceStore for StaticEvidence {
        async fn store(&self, _bytes: Vec<u8>, _content_type: Option<&str>) -> anyhow::Result<String> {
            Ok("https://media.test/proofs/1.png".to_string())
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        notifier: Arc<RecordingNotifier>,
        lifecycle: ChallengeLifecycle,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_policy(LifecyclePolicy::default())
        }

        fn with_policy(policy: LifecyclePolicy) -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(FixedClock::new(t0()));
            let notifier = Arc::new(RecordingNotifier::default());
            let lifecycle = ChallengeLifecycle::new(
                store.clone(),
                clock.clone(),
                notifier.clone(),
                Arc::new(StaticEvidence),
                policy,
            );
            Self {
                store,
                clock,
                notifier,
                lifecycle,
            }
        }

        async fn member(&self, handle: &str) -> User {
            let mut user = User::new(format!("{}@example.com", handle), t0());
            user.username = Some(handle.to_string());
            user.name = Some(handle.to_uppercase());
            user.avatar_animal = Some(AvatarAnimal::Cat);
            user.avatar_color = Some(AvatarColor::Primary);
            user.avatar_bg = Some("#f0f0f0".to_string());
            user.messaging_token = Some(format!("token-{}", handle));
            self.store.create_user(&user).await.unwrap();
            user
        }

        async fn newcomer(&self, handle: &str) -> User {
            let user = User::new(format!("{}@example.com", handle), t0());
            self.store.create_user(&user).await.unwrap();
            user
        }

        async fn challenge(&self, owner: &User, invitees: &[UserId], start_h: i64, end_h: i64) -> ChallengeId {
            self.lifecycle
                .create(
                    owner.id,
                    NewChallenge {
                        title: "Morning run".to_string(),
                        description: Some("5k before work".to_string()),
                        start_at: Some(t0() + Duration::hours(start_h)),
                        end_at: t0() + Duration::hours(end_h),
                        challenge_type: ChallengeType::NotCompleted,
                        participants: invitees.to_vec(),
                        notification_message: None,
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_filters_invitees_and_joins_owner() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let b = h.newcomer("bert").await;

        let id = h
            .challenge(&owner, &[a.id, b.id, owner.id, a.id, Uuid::new_v4()], 1, 24 * 7)
            .await;

        let rows = h.store.participants(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        let owner_row = rows.iter().find(|p| p.user_id == owner.id).unwrap();
        assert_eq!(owner_row.joined_at, Some(t0()));
        let a_row = rows.iter().find(|p| p.user_id == a.id).unwrap();
        assert_eq!(a_row.joined_at, None);
        assert!(rows.iter().all(|p| p.user_id != b.id));

        let contacts = h.store.contacts(owner.id).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].pers2_id, a.id);

        let sent = h.notifier.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tokens, vec!["token-anna".to_string()]);
        assert_eq!(sent[0].body, "OLGA invited you to a challenge!");
    }

    #[tokio::test]
    async fn test_create_skips_opted_out_invitees_for_push() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let quiet = h.member("quiet").await;
        h.store
            .update_user(
                quiet.id,
                &crate::storage::UserUpdate {
                    settings: Some(crate::types::NotificationSettings {
                        deadline_reminder: true,
                        invitations: false,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.challenge(&owner, &[quiet.id], 1, 5).await;
        tokio::task::yield_now().await;
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let fresh = h.newcomer("fresh").await;

        let input = NewChallenge {
            title: "Swim".to_string(),
            description: None,
            start_at: Some(t0() + Duration::hours(5)),
            end_at: t0() + Duration::hours(5),
            challenge_type: ChallengeType::LastToComplete,
            participants: vec![],
            notification_message: None,
        };
        let err = h.lifecycle.create(owner.id, input.clone()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let no_start = NewChallenge {
            start_at: None,
            ..input.clone()
        };
        let err = h.lifecycle.create(fresh.id, no_start.clone()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotInit);

        let past = NewChallenge {
            end_at: t0() - Duration::hours(1),
            ..no_start.clone()
        };
        let err = h.lifecycle.create(owner.id, past).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let blank = NewChallenge {
            title: "   ".to_string(),
            ..no_start
        };
        let err = h.lifecycle.create(owner.id, blank).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_update_is_owner_only_and_gated_by_start() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 2, 10).await;

        let patch = ChallengePatch {
            title: Some("Evening run".to_string()),
            ..Default::default()
        };
        let err = h.lifecycle.update(id, a.id, patch.clone()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        h.lifecycle.update(id, owner.id, patch.clone()).await.unwrap();
        assert_eq!(h.store.challenge(id).await.unwrap().unwrap().title, "Evening run");

        let bad_range = ChallengePatch {
            start_at: Some(Some(t0() + Duration::hours(11))),
            ..Default::default()
        };
        let err = h.lifecycle.update(id, owner.id, bad_range).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        h.clock.advance(Duration::hours(3));
        let err = h.lifecycle.update(id, owner.id, patch).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeStarted);
    }

    #[tokio::test]
    async fn test_update_clears_optional_fields() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let id = h.challenge(&owner, &[], 2, 10).await;

        let keep = ChallengePatch {
            title: Some("Evening run".to_string()),
            ..Default::default()
        };
        h.lifecycle.update(id, owner.id, keep).await.unwrap();
        let stored = h.store.challenge(id).await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("5k before work"));
        assert_eq!(stored.start_at, Some(t0() + Duration::hours(2)));

        let clear = ChallengePatch {
            description: Some(None),
            start_at: Some(None),
            ..Default::default()
        };
        h.lifecycle.update(id, owner.id, clear).await.unwrap();
        let stored = h.store.challenge(id).await.unwrap().unwrap();
        assert_eq!(stored.description, None);
        assert_eq!(stored.start_at, None);

        // the old start no longer gates updates
        h.clock.advance(Duration::hours(3));
        let patch = ChallengePatch {
            title: Some("Still open".to_string()),
            ..Default::default()
        };
        h.lifecycle.update(id, owner.id, patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_diffs_participants() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let b = h.member("bea").await;
        let c = h.member("cleo").await;
        let id = h.challenge(&owner, &[a.id, b.id], 2, 10).await;
        h.notifier.wait_for(1).await;

        let patch = ChallengePatch {
            participants: Some(vec![b.id, c.id]),
            ..Default::default()
        };
        h.lifecycle.update(id, owner.id, patch).await.unwrap();

        let mut ids: Vec<UserId> = h
            .store
            .participants(id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        ids.sort();
        let mut expected = vec![owner.id, b.id, c.id];
        expected.sort();
        assert_eq!(ids, expected);

        let sent = h.notifier.wait_for(2).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].tokens, vec!["token-cleo".to_string()]);

        let contacts: Vec<UserId> = h
            .store
            .contacts(owner.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.pers2_id)
            .collect();
        assert_eq!(contacts.len(), 3);
        assert!(contacts.contains(&c.id));
    }

    #[tokio::test]
    async fn test_remove_cascades_until_over() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 1, 10).await;

        let err = h.lifecycle.remove(id, a.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        // running challenges can still be deleted
        h.clock.advance(Duration::hours(2));
        h.lifecycle.remove(id, owner.id).await.unwrap();
        assert!(h.store.challenge(id).await.unwrap().is_none());
        assert!(h.store.participants(id).await.unwrap().is_empty());

        let other = h.challenge(&owner, &[], 1, 5).await;
        h.clock.advance(Duration::hours(10));
        let err = h.lifecycle.remove(other, owner.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeOver);
    }

    #[tokio::test]
    async fn test_accept_twice_keeps_one_row() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 2, 10).await;

        h.lifecycle.accept(id, a.id).await.unwrap();
        h.clock.advance(Duration::minutes(30));
        h.lifecycle.accept(id, a.id).await.unwrap();

        let rows = h.store.participants(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        let row = h.store.participant(id, a.id).await.unwrap().unwrap();
        assert_eq!(row.joined_at, Some(t0() + Duration::minutes(30)));

        let back = h.store.contacts(a.id).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].pers2_id, owner.id);
    }

    #[tokio::test]
    async fn test_accept_via_link_and_gating() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let stranger = h.member("sid").await;
        let fresh = h.newcomer("fresh").await;
        let id = h.challenge(&owner, &[], 2, 10).await;

        let err = h.lifecycle.accept(id, fresh.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotInit);

        h.lifecycle.accept(id, stranger.id).await.unwrap();
        assert!(h
            .store
            .participant(id, stranger.id)
            .await
            .unwrap()
            .unwrap()
            .has_accepted());

        let err = h.lifecycle.accept(Uuid::new_v4(), stranger.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        h.clock.advance(Duration::hours(3));
        let err = h.lifecycle.accept(id, stranger.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeStarted);

        h.clock.advance(Duration::hours(10));
        let err = h.lifecycle.accept(id, stranger.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeOver);
    }

    #[tokio::test]
    async fn test_reject_is_idempotent() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 2, 10).await;

        h.lifecycle.reject(id, a.id).await.unwrap();
        h.lifecycle.reject(id, a.id).await.unwrap();
        h.lifecycle.reject(Uuid::new_v4(), a.id).await.unwrap();
        assert!(h.store.participant(id, a.id).await.unwrap().is_none());

        let err = h.lifecycle.reject(id, owner.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_reject_absent_after_over_is_ok() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let stranger = h.member("sid").await;
        let id = h.challenge(&owner, &[a.id], 1, 2).await;

        h.clock.advance(Duration::hours(3));
        h.lifecycle.reject(id, stranger.id).await.unwrap();

        let err = h.lifecycle.reject(id, a.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeOver);
        assert!(h.store.participant(id, a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_window() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[], 1, 10).await;

        let err = h.lifecycle.complete(id, a.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        h.clock.advance(Duration::hours(2));
        h.lifecycle.complete(id, owner.id).await.unwrap();
        assert!(h
            .store
            .participant(id, owner.id)
            .await
            .unwrap()
            .unwrap()
            .has_completed());

        h.clock.advance(Duration::hours(10));
        let err = h.lifecycle.complete(id, owner.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeOver);
    }

    #[tokio::test]
    async fn test_proof_submit_and_clear() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[], 1, 10).await;

        let err = h
            .lifecycle
            .submit_proof(id, a.id, vec![1, 2], Some("image/png"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let url = h
            .lifecycle
            .submit_proof(id, owner.id, vec![1, 2], Some("image/png"))
            .await
            .unwrap();
        assert_eq!(url, "https://media.test/proofs/1.png");
        let row = h.store.participant(id, owner.id).await.unwrap().unwrap();
        assert_eq!(row.evidence_link.as_deref(), Some(url.as_str()));

        h.lifecycle.clear_proof(id, owner.id).await.unwrap();
        let row = h.store.participant(id, owner.id).await.unwrap().unwrap();
        assert_eq!(row.evidence_link, None);
    }

    #[tokio::test]
    async fn test_proof_requires_acceptance_before_end() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 1, 10).await;

        let err = h
            .lifecycle
            .submit_proof(id, a.id, vec![1, 2], Some("image/png"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let row = h.store.participant(id, a.id).await.unwrap().unwrap();
        assert_eq!(row.evidence_link, None);

        h.lifecycle.accept(id, a.id).await.unwrap();
        h.lifecycle
            .submit_proof(id, a.id, vec![1, 2], Some("image/png"))
            .await
            .unwrap();

        h.clock.advance(Duration::hours(11));
        let err = h
            .lifecycle
            .submit_proof(id, owner.id, vec![1, 2], Some("image/png"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeOver);
        let row = h.store.participant(id, owner.id).await.unwrap().unwrap();
        assert_eq!(row.evidence_link, None);
    }

    #[tokio::test]
    async fn test_list_partitions_and_history_order() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let me = h.member("mia").await;

        let ended_first = h.challenge(&owner, &[me.id], 1, 3).await;
        let ended_last = h.challenge(&owner, &[me.id], 1, 5).await;
        let ended_mid = h.challenge(&owner, &[me.id], 1, 4).await;
        let ignored = h.challenge(&owner, &[me.id], 1, 6).await;
        for id in [ended_first, ended_last, ended_mid] {
            h.lifecycle.accept(id, me.id).await.unwrap();
        }
        let running = h.challenge(&owner, &[me.id], 2, 100).await;
        h.lifecycle.accept(running, me.id).await.unwrap();
        let later = h.challenge(&owner, &[me.id], 50, 100).await;
        h.lifecycle.accept(later, me.id).await.unwrap();
        let invited = h.challenge(&owner, &[me.id], 50, 100).await;

        h.clock.advance(Duration::hours(7));
        let list = h.lifecycle.list_for_user(me.id).await.unwrap();

        let history: Vec<ChallengeId> = list.history.iter().map(|c| c.challenge_id).collect();
        assert_eq!(history, vec![ended_last, ended_mid, ended_first]);
        assert_eq!(list.ongoing.len(), 1);
        assert_eq!(list.ongoing[0].challenge_id, running);
        assert_eq!(list.pending_start.len(), 1);
        assert_eq!(list.pending_start[0].challenge_id, later);
        assert_eq!(list.pending_response.len(), 1);
        assert_eq!(list.pending_response[0].challenge_id, invited);

        let listed = list.history.len()
            + list.ongoing.len()
            + list.pending_start.len()
            + list.pending_response.len();
        assert_eq!(listed, 6);
        assert!(list
            .history
            .iter()
            .all(|c| c.challenge_id != ignored));
    }

    #[tokio::test]
    async fn test_list_keeps_invites_open_while_acceptable() {
        let h = Harness::with_policy(LifecyclePolicy {
            accept_cutoff: Cutoff::Over,
            ..Default::default()
        });
        let owner = h.member("olga").await;
        let me = h.member("mia").await;
        let id = h.challenge(&owner, &[me.id], 1, 10).await;

        h.clock.advance(Duration::hours(2));
        let list = h.lifecycle.list_for_user(me.id).await.unwrap();
        assert_eq!(list.pending_response.len(), 1);
        assert_eq!(list.pending_response[0].challenge_id, id);

        h.lifecycle.accept(id, me.id).await.unwrap();
        let list = h.lifecycle.list_for_user(me.id).await.unwrap();
        assert!(list.pending_response.is_empty());
        assert_eq!(list.ongoing.len(), 1);
    }

    #[tokio::test]
    async fn test_show_counts_every_row() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 1, 10).await;

        // a participant that later never finished onboarding
        let ghost = h.newcomer("ghost").await;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertParticipant(Participant::invited(id, ghost.id)));
        h.store.commit(batch).await.unwrap();

        let data = h.lifecycle.show(id).await.unwrap();
        assert_eq!(data.participant_count, 3);
        assert_eq!(data.participants.pending.len(), 1);
        assert_eq!(data.participants.accepted.not_completed.len(), 1);
        assert_eq!(data.owner.username.as_deref(), Some("olga"));

        let err = h.lifecycle.show(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_veto_after_completion_and_end() {
        let h = Harness::new();
        let owner = h.member("olga").await;
        let a = h.member("anna").await;
        let id = h.challenge(&owner, &[a.id], 1, 10).await;
        h.lifecycle.accept(id, a.id).await.unwrap();

        h.clock.advance(Duration::hours(2));
        h.lifecycle.complete(id, a.id).await.unwrap();

        let err = h.lifecycle.release_veto(id, owner.id, &[a.id]).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChallengeNotOver);

        h.clock.advance(Duration::hours(10));
        let err = h.lifecycle.release_veto(id, a.id, &[a.id]).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let flagged = h.lifecycle.release_veto(id, owner.id, &[a.id]).await.unwrap();
        assert_eq!(flagged, vec![a.id]);
        assert!(h.store.participant(id, a.id).await.unwrap().unwrap().has_been_vetoed);
        assert!(h.store.challenge(id).await.unwrap().unwrap().has_released_result);
    }

    fn challenge_at(start: Option<i64>, end: i64) -> Challenge {
        Challenge {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            description: None,
            start_at: start.map(|m| t0() + Duration::minutes(m)),
            end_at: t0() + Duration::minutes(end),
            challenge_type: ChallengeType::NotCompleted,
            owner_id: Uuid::new_v4(),
            has_released_result: false,
            reminder_sent_at: None,
            created_at: t0(),
        }
    }

    proptest! {
        #[test]
        fn prop_listed_buckets_match_their_definition(
            start in proptest::option::of(-300i64..300),
            length in 1i64..300,
            now in -600i64..600,
            accepted in any::<bool>(),
            accept_until_over in any::<bool>(),
        ) {
            let c = challenge_at(start, start.unwrap_or(0) + length);
            let mut p = Participant::invited(c.id, Uuid::new_v4());
            if accepted {
                p.joined_at = Some(t0());
            }
            let policy = LifecyclePolicy {
                accept_cutoff: if accept_until_over { Cutoff::Over } else { Cutoff::Started },
                ..Default::default()
            };
            let now = t0() + Duration::minutes(now);
            let over = is_challenge_over(c.end_at, now);
            let started = has_challenge_started(c.start_at, now);
            let acceptable = policy.check_accept(&c, now).is_ok();

            let expected = match (over, accepted, started) {
                (true, true, _) => Bucket::History,
                (false, true, true) => Bucket::Ongoing,
                (false, true, false) => Bucket::PendingStart,
                (false, false, _) if acceptable => Bucket::PendingResponse,
                _ => Bucket::Lapsed,
            };
            let bucket = Bucket::classify(&c, &p, now, &policy);
            prop_assert_eq!(bucket, expected);
            if accept_until_over && !accepted && !over {
                prop_assert_eq!(bucket, Bucket::PendingResponse);
            }
        }
    }
}
