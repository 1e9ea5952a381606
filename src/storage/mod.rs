//! Data persistence layer.
//!
//! Reads are individual queries. Every mutation is expressed as a
//! [`WriteBatch`] and handed to [`ChallengeStore::commit`], which applies the
//! whole batch in one transaction or not at all.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    AvatarAnimal, AvatarColor, Challenge, ChallengeId, Contact, NotificationSettings, Participant,
    User, UserId, Vote,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Row not found")]
    RowMissing,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Constraint names shared by every backend
pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const USERS_USERNAME_KEY: &str = "users_username_key";

// ============================================================================
// WRITES
// ============================================================================

/// One mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertChallenge(Challenge),
    /// Replaces title, description, dates and type
    UpdateChallenge(Challenge),
    /// Removes the challenge together with its participants and votes
    DeleteChallenge(ChallengeId),
    /// Skipped when the row already exists
    InsertParticipant(Participant),
    /// Sets `joined_at`, creating the row if the user was never invited
    UpsertJoin {
        challenge_id: ChallengeId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    },
    /// No-op when the row is absent
    DeleteParticipant {
        challenge_id: ChallengeId,
        user_id: UserId,
    },
    DeleteParticipants(ChallengeId),
    /// Fails with [`StoreError::RowMissing`] when the row is absent
    SetCompleted {
        challenge_id: ChallengeId,
        user_id: UserId,
        completed_at: DateTime<Utc>,
    },
    /// Fails with [`StoreError::RowMissing`] when the row is absent
    SetEvidence {
        challenge_id: ChallengeId,
        user_id: UserId,
        link: Option<String>,
    },
    /// Only rows that joined and completed are flagged
    FlagVetoed {
        challenge_id: ChallengeId,
        user_ids: Vec<UserId>,
    },
    ReleaseResult(ChallengeId),
    /// Skipped when the edge already exists
    InsertContact(Contact),
    MarkReminded {
        challenge_id: ChallengeId,
        at: DateTime<Utc>,
    },
}

/// Ordered list of mutations committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl Extend<WriteOp> for WriteBatch {
    fn extend<I: IntoIterator<Item = WriteOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

/// Profile fields to overwrite; `None` leaves the stored value alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar_animal: Option<AvatarAnimal>,
    pub avatar_color: Option<AvatarColor>,
    pub avatar_bg: Option<String>,
    pub settings: Option<NotificationSettings>,
    pub messaging_token: Option<String>,
}

impl UserUpdate {
    pub fn apply(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = Some(username.clone());
        }
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(animal) = self.avatar_animal {
            user.avatar_animal = Some(animal);
        }
        if let Some(color) = self.avatar_color {
            user.avatar_color = Some(color);
        }
        if let Some(bg) = &self.avatar_bg {
            user.avatar_bg = Some(bg.clone());
        }
        if let Some(settings) = self.settings {
            user.settings = settings;
        }
        if let Some(token) = &self.messaging_token {
            user.messaging_token = Some(token.clone());
        }
    }
}

// ============================================================================
// READS
// ============================================================================

/// A participant row joined with its challenge's deadline
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipationRecord {
    pub participant: Participant,
    pub end_at: DateTime<Utc>,
}

/// Storage collaborator used by every service
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Users with the given ids; unknown ids are skipped
    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>>;

    async fn create_user(&self, user: &User) -> StoreResult<()>;

    /// Returns the updated record, or [`StoreError::RowMissing`]
    async fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<User>;

    /// Users whose username or name contains `query`, ordered by username
    async fn search_users(&self, query: &str) -> StoreResult<Vec<User>>;

    /// Every user with a complete profile
    async fn initiated_users(&self) -> StoreResult<Vec<User>>;

    async fn challenge(&self, id: ChallengeId) -> StoreResult<Option<Challenge>>;

    async fn participants(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Participant>>;

    async fn participant(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> StoreResult<Option<Participant>>;

    async fn participants_of_challenges(
        &self,
        challenge_ids: &[ChallengeId],
    ) -> StoreResult<Vec<Participant>>;

    /// Every challenge the user has a participant row in, with that row
    async fn challenges_of(&self, user_id: UserId) -> StoreResult<Vec<(Challenge, Participant)>>;

    async fn participation_records(
        &self,
        user_ids: &[UserId],
    ) -> StoreResult<Vec<ParticipationRecord>>;

    /// Challenges with `from < end_at <= to` not yet reminded
    async fn challenges_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Challenge>>;

    /// Outgoing contact edges of `user_id`
    async fn contacts(&self, user_id: UserId) -> StoreResult<Vec<Contact>>;

    async fn votes(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Vote>>;

    /// Returns `false` when the identical vote already exists
    async fn insert_vote(&self, vote: &Vote) -> StoreResult<bool>;

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_update_only_touches_given_fields() {
        let mut user = User::new("kai@example.com", Utc::now());
        user.name = Some("Kai".to_string());

        let update = UserUpdate {
            username: Some("kai".to_string()),
            avatar_animal: Some(AvatarAnimal::Dog),
            ..UserUpdate::default()
        };
        update.apply(&mut user);

        assert_eq!(user.username.as_deref(), Some("kai"));
        assert_eq!(user.name.as_deref(), Some("Kai"));
        assert_eq!(user.avatar_animal, Some(AvatarAnimal::Dog));
        assert_eq!(user.avatar_color, None);
        assert_eq!(user.settings, NotificationSettings::default());
    }

    #[test]
    fn test_batch_keeps_order() {
        let id = uuid::Uuid::new_v4();
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.push(WriteOp::DeleteParticipants(id));
        batch.extend([WriteOp::DeleteChallenge(id)]);

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.into_ops(),
            vec![WriteOp::DeleteParticipants(id), WriteOp::DeleteChallenge(id)]
        );
    }
}
