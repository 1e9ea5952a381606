//! In-memory storage.
//!
//! Used for tests and for running the server without a database. A single
//! lock guards all tables; a batch is applied to a staged copy that replaces
//! the live tables only when every op succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{
    ChallengeStore, ParticipationRecord, StoreError, StoreResult, UserUpdate, WriteBatch, WriteOp,
    USERS_EMAIL_KEY, USERS_USERNAME_KEY,
};
use crate::types::{Challenge, ChallengeId, Contact, Participant, User, UserId, Vote};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    challenges: HashMap<ChallengeId, Challenge>,
    participants: BTreeMap<(ChallengeId, UserId), Participant>,
    contacts: BTreeMap<(UserId, UserId), Contact>,
    votes: BTreeMap<(ChallengeId, UserId, UserId), Vote>,
}

impl Tables {
    fn check_user_unique(&self, user: &User) -> StoreResult<()> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(unique(USERS_EMAIL_KEY));
            }
            if user.username.is_some() && other.username == user.username {
                return Err(unique(USERS_USERNAME_KEY));
            }
        }
        Ok(())
    }

    fn participant_mut(
        &mut self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> StoreResult<&mut Participant> {
        self.participants
            .get_mut(&(challenge_id, user_id))
            .ok_or(StoreError::RowMissing)
    }

    fn require_refs(&self, challenge_id: ChallengeId, user_id: UserId) -> StoreResult<()> {
        if !self.challenges.contains_key(&challenge_id) {
            return Err(foreign_key("participants_challenge_id_fkey"));
        }
        if !self.users.contains_key(&user_id) {
            return Err(foreign_key("participants_user_id_fkey"));
        }
        Ok(())
    }

    fn apply(&mut self, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::InsertChallenge(challenge) => {
                if self.challenges.contains_key(&challenge.id) {
                    return Err(unique("challenges_pkey"));
                }
                if !self.users.contains_key(&challenge.owner_id) {
                    return Err(foreign_key("challenges_owner_id_fkey"));
                }
                self.challenges.insert(challenge.id, challenge);
            }
            WriteOp::UpdateChallenge(challenge) => {
                let stored = self
                    .challenges
                    .get_mut(&challenge.id)
                    .ok_or(StoreError::RowMissing)?;
                stored.title = challenge.title;
                stored.description = challenge.description;
                stored.start_at = challenge.start_at;
                stored.end_at = challenge.end_at;
                stored.challenge_type = challenge.challenge_type;
            }
            WriteOp::DeleteChallenge(id) => {
                self.challenges.remove(&id).ok_or(StoreError::RowMissing)?;
                self.participants.retain(|(cid, _), _| *cid != id);
                self.votes.retain(|(cid, _, _), _| *cid != id);
            }
            WriteOp::InsertParticipant(participant) => {
                let key = (participant.challenge_id, participant.user_id);
                if !self.participants.contains_key(&key) {
                    self.require_refs(key.0, key.1)?;
                    self.participants.insert(key, participant);
                }
            }
            WriteOp::UpsertJoin {
                challenge_id,
                user_id,
                joined_at,
            } => match self.participants.get_mut(&(challenge_id, user_id)) {
                Some(row) => row.joined_at = Some(joined_at),
                None => {
                    self.require_refs(challenge_id, user_id)?;
                    let mut row = Participant::invited(challenge_id, user_id);
                    row.joined_at = Some(joined_at);
                    self.participants.insert((challenge_id, user_id), row);
                }
            },
            WriteOp::DeleteParticipant {
                challenge_id,
                user_id,
            } => {
                self.participants.remove(&(challenge_id, user_id));
            }
            WriteOp::DeleteParticipants(id) => {
                self.participants.retain(|(cid, _), _| *cid != id);
            }
            WriteOp::SetCompleted {
                challenge_id,
                user_id,
                completed_at,
            } => {
                self.participant_mut(challenge_id, user_id)?.completed_at = Some(completed_at);
            }
            WriteOp::SetEvidence {
                challenge_id,
                user_id,
                link,
            } => {
                self.participant_mut(challenge_id, user_id)?.evidence_link = link;
            }
            WriteOp::FlagVetoed {
                challenge_id,
                user_ids,
            } => {
                for user_id in user_ids {
                    if let Some(row) = self.participants.get_mut(&(challenge_id, user_id)) {
                        if row.has_accepted() && row.has_completed() {
                            row.has_been_vetoed = true;
                        }
                    }
                }
            }
            WriteOp::ReleaseResult(id) => {
                self.challenges
                    .get_mut(&id)
                    .ok_or(StoreError::RowMissing)?
                    .has_released_result = true;
            }
            WriteOp::InsertContact(contact) => {
                self.contacts
                    .entry((contact.pers1_id, contact.pers2_id))
                    .or_insert(contact);
            }
            WriteOp::MarkReminded { challenge_id, at } => {
                if let Some(challenge) = self.challenges.get_mut(&challenge_id) {
                    challenge.reminder_sent_at = Some(at);
                }
            }
        }
        Ok(())
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key(constraint: &str) -> StoreError {
    StoreError::Backend(format!("foreign key violation: {}", constraint))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock();
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id).cloned())
            .collect())
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if tables.users.contains_key(&user.id) {
            return Err(unique("users_pkey"));
        }
        tables.check_user_unique(user)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<User> {
        let mut tables = self.tables.lock();
        let mut user = tables.users.get(&id).cloned().ok_or(StoreError::RowMissing)?;
        update.apply(&mut user);
        tables.check_user_unique(&user)?;
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn search_users(&self, query: &str) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock();
        let contains = |field: &Option<String>| field.as_deref().is_some_and(|v| v.contains(query));
        let mut found: Vec<User> = tables
            .users
            .values()
            .filter(|u| contains(&u.username) || contains(&u.name))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found)
    }

    async fn initiated_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock();
        Ok(tables
            .users
            .values()
            .filter(|u| u.is_initiated())
            .cloned()
            .collect())
    }

    async fn challenge(&self, id: ChallengeId) -> StoreResult<Option<Challenge>> {
        Ok(self.tables.lock().challenges.get(&id).cloned())
    }

    async fn participants(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Participant>> {
        let tables = self.tables.lock();
        Ok(tables
            .participants
            .values()
            .filter(|p| p.challenge_id == challenge_id)
            .cloned()
            .collect())
    }

    async fn participant(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> StoreResult<Option<Participant>> {
        let tables = self.tables.lock();
        Ok(tables.participants.get(&(challenge_id, user_id)).cloned())
    }

    async fn participants_of_challenges(
        &self,
        challenge_ids: &[ChallengeId],
    ) -> StoreResult<Vec<Participant>> {
        let tables = self.tables.lock();
        Ok(tables
            .participants
            .values()
            .filter(|p| challenge_ids.contains(&p.challenge_id))
            .cloned()
            .collect())
    }

    async fn challenges_of(&self, user_id: UserId) -> StoreResult<Vec<(Challenge, Participant)>> {
        let tables = self.tables.lock();
        Ok(tables
            .participants
            .values()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| {
                tables
                    .challenges
                    .get(&p.challenge_id)
                    .map(|c| (c.clone(), p.clone()))
            })
            .collect())
    }

    async fn participation_records(
        &self,
        user_ids: &[UserId],
    ) -> StoreResult<Vec<ParticipationRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .participants
            .values()
            .filter(|p| user_ids.contains(&p.user_id))
            .filter_map(|p| {
                tables
                    .challenges
                    .get(&p.challenge_id)
                    .map(|c| ParticipationRecord {
                        participant: p.clone(),
                        end_at: c.end_at,
                    })
            })
            .collect())
    }

    async fn challenges_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Challenge>> {
        let tables = self.tables.lock();
        Ok(tables
            .challenges
            .values()
            .filter(|c| c.end_at > from && c.end_at <= to && c.reminder_sent_at.is_none())
            .cloned()
            .collect())
    }

    async fn contacts(&self, user_id: UserId) -> StoreResult<Vec<Contact>> {
        let tables = self.tables.lock();
        Ok(tables
            .contacts
            .values()
            .filter(|c| c.pers1_id == user_id)
            .cloned()
            .collect())
    }

    async fn votes(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Vote>> {
        let tables = self.tables.lock();
        Ok(tables
            .votes
            .values()
            .filter(|v| v.challenge_id == challenge_id)
            .cloned()
            .collect())
    }

    async fn insert_vote(&self, vote: &Vote) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let key = (vote.challenge_id, vote.accuser_id, vote.victim_id);
        if tables.votes.contains_key(&key) {
            return Ok(false);
        }
        if !tables.challenges.contains_key(&vote.challenge_id) {
            return Err(foreign_key("votes_challenge_id_fkey"));
        }
        tables.votes.insert(key, vote.clone());
        Ok(true)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        for op in batch.into_ops() {
            staged.apply(op)?;
        }
        *tables = staged;
        Ok(())
    }
}
