//! PostgreSQL Storage
//!
//! Schema is created on start-up. Batches run inside a single transaction;
//! uniqueness and referential integrity are enforced by the database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, PoolError, Runtime, Transaction};
use tokio_postgres::{error::SqlState, NoTls, Row};
use tracing::{debug, info};

use super::{
    ChallengeStore, ParticipationRecord, StoreError, StoreResult, UserUpdate, WriteBatch, WriteOp,
};
use crate::types::{
    AvatarAnimal, AvatarColor, Challenge, ChallengeId, ChallengeType, Contact,
    NotificationSettings, Participant, User, UserId, Vote,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL,
    username TEXT,
    name TEXT,
    avatar_animal TEXT,
    avatar_color TEXT,
    avatar_bg TEXT,
    deadline_reminder BOOLEAN NOT NULL DEFAULT TRUE,
    invitations BOOLEAN NOT NULL DEFAULT TRUE,
    messaging_token TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT users_email_key UNIQUE (email),
    CONSTRAINT users_username_key UNIQUE (username)
);

CREATE TABLE IF NOT EXISTS challenges (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    start_at TIMESTAMPTZ,
    end_at TIMESTAMPTZ NOT NULL,
    challenge_type TEXT NOT NULL,
    owner_id UUID NOT NULL REFERENCES users(id),
    has_released_result BOOLEAN NOT NULL DEFAULT FALSE,
    reminder_sent_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (start_at IS NULL OR start_at < end_at)
);

CREATE INDEX IF NOT EXISTS idx_challenges_end ON challenges(end_at);

-- One row per (challenge, user); joined_at NULL means the invitation is pending
CREATE TABLE IF NOT EXISTS participants (
    challenge_id UUID NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    user_id UUID NOT NULL REFERENCES users(id),
    joined_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    evidence_link TEXT,
    has_been_vetoed BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (challenge_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

-- Directed "has interacted with" edges, never deleted
CREATE TABLE IF NOT EXISTS contacts (
    pers1_id UUID NOT NULL REFERENCES users(id),
    pers2_id UUID NOT NULL REFERENCES users(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (pers1_id, pers2_id)
);

CREATE TABLE IF NOT EXISTS votes (
    challenge_id UUID NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    accuser_id UUID NOT NULL REFERENCES users(id),
    victim_id UUID NOT NULL REFERENCES users(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (challenge_id, accuser_id, victim_id),
    CHECK (accuser_id <> victim_id)
);
"#;

const USER_COLUMNS: &str = "id, email, username, name, avatar_animal, avatar_color, avatar_bg, \
     deadline_reminder, invitations, messaging_token, created_at";

const CHALLENGE_COLUMNS: &str = "c.id, c.title, c.description, c.start_at, c.end_at, \
     c.challenge_type, c.owner_id, c.has_released_result, c.reminder_sent_at, c.created_at";

const PARTICIPANT_COLUMNS: &str =
    "p.challenge_id, p.user_id, p.joined_at, p.completed_at, p.evidence_link, p.has_been_vetoed";

/// Number of columns in [`CHALLENGE_COLUMNS`]
const CHALLENGE_WIDTH: usize = 10;

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            if db.code() == &SqlState::UNIQUE_VIOLATION {
                return StoreError::UniqueViolation {
                    constraint: db.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        StoreError::Backend(err.to_string())
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn user_from_row(r: &Row) -> User {
    let animal: Option<String> = r.get(4);
    let color: Option<String> = r.get(5);
    User {
        id: r.get(0),
        email: r.get(1),
        username: r.get(2),
        name: r.get(3),
        avatar_animal: animal.as_deref().and_then(AvatarAnimal::parse),
        avatar_color: color.as_deref().and_then(AvatarColor::parse),
        avatar_bg: r.get(6),
        settings: NotificationSettings {
            deadline_reminder: r.get(7),
            invitations: r.get(8),
        },
        messaging_token: r.get(9),
        created_at: r.get(10),
    }
}

fn challenge_from_row(r: &Row) -> StoreResult<Challenge> {
    let kind: String = r.get(5);
    let challenge_type = ChallengeType::parse(&kind)
        .ok_or_else(|| StoreError::Backend(format!("unknown challenge type '{}'", kind)))?;
    Ok(Challenge {
        id: r.get(0),
        title: r.get(1),
        description: r.get(2),
        start_at: r.get(3),
        end_at: r.get(4),
        challenge_type,
        owner_id: r.get(6),
        has_released_result: r.get(7),
        reminder_sent_at: r.get(8),
        created_at: r.get(9),
    })
}

/// Maps participant columns starting at `offset`
fn participant_from_row(r: &Row, offset: usize) -> Participant {
    Participant {
        challenge_id: r.get(offset),
        user_id: r.get(offset + 1),
        joined_at: r.get(offset + 2),
        completed_at: r.get(offset + 3),
        evidence_link: r.get(offset + 4),
        has_been_vetoed: r.get(offset + 5),
    }
}

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect and make sure the schema exists
    pub async fn new(database_url: &str) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let client = pool.get().await?;
        info!("Connected to PostgreSQL database");

        client.batch_execute(SCHEMA).await?;
        info!("Database schema initialized");

        Ok(Self { pool })
    }

    async fn apply(tx: &Transaction<'_>, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::InsertChallenge(c) => {
                tx.execute(
                    "INSERT INTO challenges (id, title, description, start_at, end_at, challenge_type, owner_id, has_released_result, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    &[
                        &c.id, &c.title, &c.description, &c.start_at, &c.end_at,
                        &c.challenge_type.as_str(), &c.owner_id, &c.has_released_result, &c.created_at,
                    ],
                )
                .await?;
            }
            WriteOp::UpdateChallenge(c) => {
                let updated = tx
                    .execute(
                        "UPDATE challenges SET title = $2, description = $3, start_at = $4, end_at = $5, challenge_type = $6
                         WHERE id = $1",
                        &[
                            &c.id, &c.title, &c.description, &c.start_at, &c.end_at,
                            &c.challenge_type.as_str(),
                        ],
                    )
                    .await?;
                require_row(updated)?;
            }
            WriteOp::DeleteChallenge(id) => {
                let deleted = tx
                    .execute("DELETE FROM challenges WHERE id = $1", &[&id])
                    .await?;
                require_row(deleted)?;
            }
            WriteOp::InsertParticipant(p) => {
                tx.execute(
                    "INSERT INTO participants (challenge_id, user_id, joined_at, completed_at, evidence_link, has_been_vetoed)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (challenge_id, user_id) DO NOTHING",
                    &[
                        &p.challenge_id, &p.user_id, &p.joined_at, &p.completed_at,
                        &p.evidence_link, &p.has_been_vetoed,
                    ],
                )
                .await?;
            }
            WriteOp::UpsertJoin {
                challenge_id,
                user_id,
                joined_at,
            } => {
                tx.execute(
                    "INSERT INTO participants (challenge_id, user_id, joined_at)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (challenge_id, user_id) DO UPDATE SET joined_at = EXCLUDED.joined_at",
                    &[&challenge_id, &user_id, &joined_at],
                )
                .await?;
            }
            WriteOp::DeleteParticipant {
                challenge_id,
                user_id,
            } => {
                tx.execute(
                    "DELETE FROM participants WHERE challenge_id = $1 AND user_id = $2",
                    &[&challenge_id, &user_id],
                )
                .await?;
            }
            WriteOp::DeleteParticipants(id) => {
                tx.execute("DELETE FROM participants WHERE challenge_id = $1", &[&id])
                    .await?;
            }
            WriteOp::SetCompleted {
                challenge_id,
                user_id,
                completed_at,
            } => {
                let updated = tx
                    .execute(
                        "UPDATE participants SET completed_at = $3 WHERE challenge_id = $1 AND user_id = $2",
                        &[&challenge_id, &user_id, &completed_at],
                    )
                    .await?;
                require_row(updated)?;
            }
            WriteOp::SetEvidence {
                challenge_id,
                user_id,
                link,
            } => {
                let updated = tx
                    .execute(
                        "UPDATE participants SET evidence_link = $3 WHERE challenge_id = $1 AND user_id = $2",
                        &[&challenge_id, &user_id, &link],
                    )
                    .await?;
                require_row(updated)?;
            }
            WriteOp::FlagVetoed {
                challenge_id,
                user_ids,
            } => {
                tx.execute(
                    "UPDATE participants SET has_been_vetoed = TRUE \
                     WHERE challenge_id = $1 AND user_id = ANY($2) \
                     AND joined_at IS NOT NULL AND completed_at IS NOT NULL",
                    &[&challenge_id, &user_ids],
                )
                .await?;
            }
            WriteOp::ReleaseResult(id) => {
                let updated = tx
                    .execute(
                        "UPDATE challenges SET has_released_result = TRUE WHERE id = $1",
                        &[&id],
                    )
                    .await?;
                require_row(updated)?;
            }
            WriteOp::InsertContact(contact) => {
                tx.execute(
                    "INSERT INTO contacts (pers1_id, pers2_id, created_at) VALUES ($1, $2, $3)
                     ON CONFLICT (pers1_id, pers2_id) DO NOTHING",
                    &[&contact.pers1_id, &contact.pers2_id, &contact.created_at],
                )
                .await?;
            }
            WriteOp::MarkReminded { challenge_id, at } => {
                tx.execute(
                    "UPDATE challenges SET reminder_sent_at = $2 WHERE id = $1",
                    &[&challenge_id, &at],
                )
                .await?;
            }
        }
        Ok(())
    }
}

fn require_row(affected: u64) -> StoreResult<()> {
    if affected == 0 {
        Err(StoreError::RowMissing)
    } else {
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    // ========================================================================
    // USERS
    // ========================================================================

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS),
                &[&email],
            )
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {} FROM users WHERE id = ANY($1)", USER_COLUMNS),
                &[&ids],
            )
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO users (id, email, username, name, avatar_animal, avatar_color, avatar_bg, deadline_reminder, invitations, messaging_token, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &user.id, &user.email, &user.username, &user.name,
                    &user.avatar_animal.map(|a| a.as_str()),
                    &user.avatar_color.map(|c| c.as_str()),
                    &user.avatar_bg, &user.settings.deadline_reminder, &user.settings.invitations,
                    &user.messaging_token, &user.created_at,
                ],
            )
            .await?;
        debug!("Created user {}", user.id);
        Ok(())
    }

    async fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<User> {
        let client = self.pool.get().await?;
        let settings = update.settings;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE users SET
                        username = COALESCE($2, username),
                        name = COALESCE($3, name),
                        avatar_animal = COALESCE($4, avatar_animal),
                        avatar_color = COALESCE($5, avatar_color),
                        avatar_bg = COALESCE($6, avatar_bg),
                        deadline_reminder = COALESCE($7, deadline_reminder),
                        invitations = COALESCE($8, invitations),
                        messaging_token = COALESCE($9, messaging_token)
                     WHERE id = $1
                     RETURNING {}",
                    USER_COLUMNS
                ),
                &[
                    &id, &update.username, &update.name,
                    &update.avatar_animal.map(|a| a.as_str()),
                    &update.avatar_color.map(|c| c.as_str()),
                    &update.avatar_bg,
                    &settings.map(|s| s.deadline_reminder),
                    &settings.map(|s| s.invitations),
                    &update.messaging_token,
                ],
            )
            .await?;
        row.as_ref().map(user_from_row).ok_or(StoreError::RowMissing)
    }

    async fn search_users(&self, query: &str) -> StoreResult<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM users
                     WHERE strpos(username, $1) > 0 OR strpos(name, $1) > 0
                     ORDER BY username ASC",
                    USER_COLUMNS
                ),
                &[&query],
            )
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn initiated_users(&self) -> StoreResult<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM users
                     WHERE username <> '' AND name <> '' AND avatar_animal IS NOT NULL
                       AND avatar_color IS NOT NULL AND avatar_bg <> ''",
                    USER_COLUMNS
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    // ========================================================================
    // CHALLENGES & PARTICIPANTS
    // ========================================================================

    async fn challenge(&self, id: ChallengeId) -> StoreResult<Option<Challenge>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM challenges c WHERE c.id = $1", CHALLENGE_COLUMNS),
                &[&id],
            )
            .await?;
        row.as_ref().map(challenge_from_row).transpose()
    }

    async fn participants(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Participant>> {
        self.participants_of_challenges(&[challenge_id]).await
    }

    async fn participant(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> StoreResult<Option<Participant>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM participants p WHERE p.challenge_id = $1 AND p.user_id = $2",
                    PARTICIPANT_COLUMNS
                ),
                &[&challenge_id, &user_id],
            )
            .await?;
        Ok(row.as_ref().map(|r| participant_from_row(r, 0)))
    }

    async fn participants_of_challenges(
        &self,
        challenge_ids: &[ChallengeId],
    ) -> StoreResult<Vec<Participant>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM participants p WHERE p.challenge_id = ANY($1)",
                    PARTICIPANT_COLUMNS
                ),
                &[&challenge_ids],
            )
            .await?;
        Ok(rows.iter().map(|r| participant_from_row(r, 0)).collect())
    }

    async fn challenges_of(&self, user_id: UserId) -> StoreResult<Vec<(Challenge, Participant)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {}, {} FROM participants p
                     JOIN challenges c ON c.id = p.challenge_id
                     WHERE p.user_id = $1",
                    CHALLENGE_COLUMNS, PARTICIPANT_COLUMNS
                ),
                &[&user_id],
            )
            .await?;
        rows.iter()
            .map(|r| Ok((challenge_from_row(r)?, participant_from_row(r, CHALLENGE_WIDTH))))
            .collect()
    }

    async fn participation_records(
        &self,
        user_ids: &[UserId],
    ) -> StoreResult<Vec<ParticipationRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {}, c.end_at FROM participants p
                     JOIN challenges c ON c.id = p.challenge_id
                     WHERE p.user_id = ANY($1)",
                    PARTICIPANT_COLUMNS
                ),
                &[&user_ids],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| ParticipationRecord {
                participant: participant_from_row(r, 0),
                end_at: r.get(6),
            })
            .collect())
    }

    async fn challenges_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Challenge>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM challenges c
                     WHERE c.end_at > $1 AND c.end_at <= $2 AND c.reminder_sent_at IS NULL",
                    CHALLENGE_COLUMNS
                ),
                &[&from, &to],
            )
            .await?;
        rows.iter().map(challenge_from_row).collect()
    }

    // ========================================================================
    // CONTACTS & VOTES
    // ========================================================================

    async fn contacts(&self, user_id: UserId) -> StoreResult<Vec<Contact>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT pers1_id, pers2_id, created_at FROM contacts WHERE pers1_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Contact {
                pers1_id: r.get(0),
                pers2_id: r.get(1),
                created_at: r.get(2),
            })
            .collect())
    }

    async fn votes(&self, challenge_id: ChallengeId) -> StoreResult<Vec<Vote>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT challenge_id, accuser_id, victim_id, created_at FROM votes WHERE challenge_id = $1",
                &[&challenge_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Vote {
                challenge_id: r.get(0),
                accuser_id: r.get(1),
                victim_id: r.get(2),
                created_at: r.get(3),
            })
            .collect())
    }

    async fn insert_vote(&self, vote: &Vote) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                "INSERT INTO votes (challenge_id, accuser_id, victim_id, created_at) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (challenge_id, accuser_id, victim_id) DO NOTHING",
                &[&vote.challenge_id, &vote.accuser_id, &vote.victim_id, &vote.created_at],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let ops = batch.len();
        for op in batch.into_ops() {
            Self::apply(&tx, op).await?;
        }
        tx.commit().await?;
        debug!("Committed batch of {} ops", ops);
        Ok(())
    }
}
