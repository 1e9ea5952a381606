//! Core domain types: users, challenges, participants, contacts and votes.
//!
//! Challenge and participant status is never stored. It is derived from the
//! timestamps held here (see `time_policy`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ChallengeId = Uuid;

// ============================================================================
// AVATAR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvatarAnimal {
    Cat,
    Dog,
    Rabbit,
}

impl AvatarAnimal {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarAnimal::Cat => "CAT",
            AvatarAnimal::Dog => "DOG",
            AvatarAnimal::Rabbit => "RABBIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CAT" => Some(AvatarAnimal::Cat),
            "DOG" => Some(AvatarAnimal::Dog),
            "RABBIT" => Some(AvatarAnimal::Rabbit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvatarColor {
    Primary,
    Secondary,
    Tertiary,
}

impl AvatarColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarColor::Primary => "PRIMARY",
            AvatarColor::Secondary => "SECONDARY",
            AvatarColor::Tertiary => "TERTIARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRIMARY" => Some(AvatarColor::Primary),
            "SECONDARY" => Some(AvatarColor::Secondary),
            "TERTIARY" => Some(AvatarColor::Tertiary),
            _ => None,
        }
    }
}

/// Complete avatar, as shown for initiated users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub animal: AvatarAnimal,
    pub color: AvatarColor,
    pub background: String,
}

// ============================================================================
// USERS
// ============================================================================

/// Per-user push notification preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub deadline_reminder: bool,
    pub invitations: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            deadline_reminder: true,
            invitations: true,
        }
    }
}

/// Identity record. Profile fields stay optional until the user completes
/// onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar_animal: Option<AvatarAnimal>,
    pub avatar_color: Option<AvatarColor>,
    pub avatar_bg: Option<String>,
    pub settings: NotificationSettings,
    pub messaging_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: None,
            name: None,
            avatar_animal: None,
            avatar_color: None,
            avatar_bg: None,
            settings: NotificationSettings::default(),
            messaging_token: None,
            created_at: now,
        }
    }

    /// Returns the validated view of this user if the profile is complete.
    pub fn initiated(&self) -> Option<InitiatedUser> {
        let username = self.username.as_deref().filter(|s| !s.is_empty())?;
        let name = self.name.as_deref().filter(|s| !s.is_empty())?;
        let background = self.avatar_bg.as_deref().filter(|s| !s.is_empty())?;

        Some(InitiatedUser {
            id: self.id,
            username: username.to_string(),
            name: name.to_string(),
            avatar: Avatar {
                animal: self.avatar_animal?,
                color: self.avatar_color?,
                background: background.to_string(),
            },
        })
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated().is_some()
    }

    /// Push token, if the user wants invitation notifications
    pub fn invitation_token(&self) -> Option<&str> {
        if self.settings.invitations {
            self.messaging_token.as_deref()
        } else {
            None
        }
    }

    /// Push token, if the user wants deadline reminders
    pub fn reminder_token(&self) -> Option<&str> {
        if self.settings.deadline_reminder {
            self.messaging_token.as_deref()
        } else {
            None
        }
    }
}

/// A user whose username, name and avatar are all present.
///
/// Only constructed through [`User::initiated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedUser {
    id: UserId,
    username: String,
    name: String,
    avatar: Avatar,
}

impl InitiatedUser {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn avatar(&self) -> &Avatar {
        &self.avatar
    }
}

// ============================================================================
// CHALLENGES
// ============================================================================

/// Only affects how clients present results, not the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    LastToComplete,
    NotCompleted,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::LastToComplete => "LAST_TO_COMPLETE",
            ChallengeType::NotCompleted => "NOT_COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LAST_TO_COMPLETE" => Some(ChallengeType::LastToComplete),
            "NOT_COMPLETED" => Some(ChallengeType::NotCompleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: ChallengeId,
    pub title: String,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    pub challenge_type: ChallengeType,
    pub owner_id: UserId,
    pub has_released_result: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Join record between one challenge and one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    /// `None` while the invitation is pending
    pub joined_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub evidence_link: Option<String>,
    pub has_been_vetoed: bool,
}

impl Participant {
    pub fn invited(challenge_id: ChallengeId, user_id: UserId) -> Self {
        Self {
            challenge_id,
            user_id,
            joined_at: None,
            completed_at: None,
            evidence_link: None,
            has_been_vetoed: false,
        }
    }

    pub fn has_accepted(&self) -> bool {
        self.joined_at.is_some()
    }

    pub fn has_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Directed "has interacted with" edge: `pers1_id` -> `pers2_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub pers1_id: UserId,
    pub pers2_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Peer accusation cast after a challenge is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub challenge_id: ChallengeId,
    pub accuser_id: UserId,
    pub victim_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_user() -> User {
        let mut user = User::new("yazmin63@example.com", Utc::now());
        user.username = Some("yazmin63".to_string());
        user.name = Some("Yazmin".to_string());
        user.avatar_animal = Some(AvatarAnimal::Cat);
        user.avatar_color = Some(AvatarColor::Primary);
        user.avatar_bg = Some("#cbe8e0".to_string());
        user
    }

    #[test]
    fn test_initiated_requires_every_profile_field() {
        let user = complete_user();
        let initiated = user.initiated().unwrap();
        assert_eq!(initiated.username(), "yazmin63");
        assert_eq!(initiated.avatar().animal, AvatarAnimal::Cat);

        let mut missing_bg = complete_user();
        missing_bg.avatar_bg = None;
        assert!(!missing_bg.is_initiated());

        let mut empty_name = complete_user();
        empty_name.name = Some(String::new());
        assert!(!empty_name.is_initiated());

        let fresh = User::new("new@example.com", Utc::now());
        assert!(fresh.initiated().is_none());
    }

    #[test]
    fn test_notification_tokens_follow_settings() {
        let mut user = complete_user();
        assert_eq!(user.invitation_token(), None);

        user.messaging_token = Some("tok".to_string());
        assert_eq!(user.invitation_token(), Some("tok"));
        assert_eq!(user.reminder_token(), Some("tok"));

        user.settings.invitations = false;
        assert_eq!(user.invitation_token(), None);
        assert_eq!(user.reminder_token(), Some("tok"));
    }

    #[test]
    fn test_enum_string_forms() {
        for animal in [AvatarAnimal::Cat, AvatarAnimal::Dog, AvatarAnimal::Rabbit] {
            assert_eq!(AvatarAnimal::parse(animal.as_str()), Some(animal));
        }
        assert_eq!(
            serde_json::to_string(&ChallengeType::LastToComplete).unwrap(),
            "\"LAST_TO_COMPLETE\""
        );
        assert_eq!(AvatarColor::parse("purple"), None);
    }
}
