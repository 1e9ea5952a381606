//! JSON shapes returned by the API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::storage::ParticipationRecord;
use crate::time_policy::is_challenge_over;
use crate::types::{
    Avatar, AvatarAnimal, AvatarColor, Challenge, ChallengeId, ChallengeType, InitiatedUser,
    NotificationSettings, Participant, User, UserId,
};

// ============================================================================
// CHALLENGES
// ============================================================================

/// Initiated participant as listed inside a challenge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMini {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub avatar: Avatar,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_link: Option<String>,
    pub has_been_vetoed: bool,
}

impl UserMini {
    pub fn new(user: &InitiatedUser, participant: &Participant) -> Self {
        Self {
            user_id: user.id(),
            username: user.username().to_string(),
            name: user.name().to_string(),
            avatar: user.avatar().clone(),
            completed_at: participant.completed_at,
            evidence_link: participant.evidence_link.clone(),
            has_been_vetoed: participant.has_been_vetoed,
        }
    }
}

/// Avatar of a user that may not have finished onboarding
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialAvatar {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animal: Option<AvatarAnimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<AvatarColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl From<&User> for PartialAvatar {
    fn from(user: &User) -> Self {
        Self {
            animal: user.avatar_animal,
            color: user.avatar_color,
            background: user.avatar_bg.clone(),
        }
    }
}

/// Owners can create challenges before completing their profile
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerMini {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub avatar: PartialAvatar,
}

impl From<&User> for OwnerMini {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            avatar: PartialAvatar::from(user),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedLists {
    pub completed: Vec<UserMini>,
    pub not_completed: Vec<UserMini>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParticipantLists {
    pub accepted: AcceptedLists,
    pub pending: Vec<UserMini>,
}

impl ParticipantLists {
    /// Splits rows by status. Rows of users without a complete profile are
    /// left out; each list is ordered by username.
    pub fn build(participants: &[Participant], users: &HashMap<UserId, User>) -> Self {
        let mut lists = Self::default();
        for participant in participants {
            let Some(user) = users
                .get(&participant.user_id)
                .and_then(|u| u.initiated())
            else {
                continue;
            };
            let mini = UserMini::new(&user, participant);

            if !participant.has_accepted() {
                lists.pending.push(mini);
            } else if participant.has_completed() {
                lists.accepted.completed.push(mini);
            } else {
                lists.accepted.not_completed.push(mini);
            }
        }

        for list in [
            &mut lists.accepted.completed,
            &mut lists.accepted.not_completed,
            &mut lists.pending,
        ] {
            list.sort_by(|a, b| a.username.cmp(&b.username));
        }
        lists
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeData {
    pub challenge_id: ChallengeId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    /// Every participant row, initiated or not
    pub participant_count: usize,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub has_released_result: bool,
    pub owner: OwnerMini,
    pub participants: ParticipantLists,
}

impl ChallengeData {
    pub fn build(
        challenge: &Challenge,
        owner: &User,
        participants: &[Participant],
        users: &HashMap<UserId, User>,
    ) -> Self {
        Self {
            challenge_id: challenge.id,
            title: challenge.title.clone(),
            description: challenge.description.clone(),
            start_at: challenge.start_at,
            end_at: challenge.end_at,
            participant_count: participants.len(),
            challenge_type: challenge.challenge_type,
            has_released_result: challenge.has_released_result,
            owner: OwnerMini::from(owner),
            participants: ParticipantLists::build(participants, users),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeList {
    pub ongoing: Vec<ChallengeData>,
    pub pending_start: Vec<ChallengeData>,
    pub pending_response: Vec<ChallengeData>,
    pub history: Vec<ChallengeData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChallenge {
    pub challenge_id: ChallengeId,
}

// ============================================================================
// VOTES
// ============================================================================

/// Accusations against one accepted participant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub avatar: Avatar,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_link: Option<String>,
    pub accusation_count: usize,
    pub accusers: Vec<UserId>,
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationStats {
    pub completed_challenge_count: u32,
    pub failed_challenge_count: u32,
    pub vetoed_challenge_count: u32,
}

impl ParticipationStats {
    /// Counts challenges that are over and were accepted
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ParticipationRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();
        for record in records {
            let p = &record.participant;
            if !p.has_accepted() || !is_challenge_over(record.end_at, now) {
                continue;
            }
            match (p.has_completed(), p.has_been_vetoed) {
                (false, _) => stats.failed_challenge_count += 1,
                (true, true) => stats.vetoed_challenge_count += 1,
                (true, false) => stats.completed_challenge_count += 1,
            }
        }
        stats
    }

    /// Ranking key for walls
    pub fn wall_score(&self) -> u32 {
        self.failed_challenge_count + self.vetoed_challenge_count
    }
}

/// Public listing entry of an initiated user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub avatar: Avatar,
    #[serde(flatten)]
    pub stats: ParticipationStats,
}

impl UserList {
    pub fn new(user: &InitiatedUser, stats: ParticipationStats) -> Self {
        Self {
            user_id: user.id(),
            username: user.username().to_string(),
            name: user.name().to_string(),
            avatar: user.avatar().clone(),
            stats,
        }
    }
}

/// The caller's own profile
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: UserId,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub avatar: PartialAvatar,
    pub settings: NotificationSettings,
    /// Present once the profile is complete
    #[serde(flatten)]
    pub stats: Option<ParticipationStats>,
}

impl UserData {
    pub fn new(user: &User, stats: Option<ParticipationStats>) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            avatar: PartialAvatar::from(user),
            settings: user.settings,
            stats,
        }
    }
}
