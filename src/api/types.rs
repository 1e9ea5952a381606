//! Request bodies and extractors.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::lifecycle::{ChallengePatch, NewChallenge};
use crate::types::{ChallengeType, UserId};

/// `Json` whose rejection is reported as `INVALID_REQUEST`
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!("Rejected request body: {}", rejection);
                Err(ApiError::InvalidRequest(
                    "Request body is malformed.".to_string(),
                ))
            }
        }
    }
}

/// Parses a path id; a malformed id cannot name an existing record
pub fn parse_id(raw: &str, not_found: impl FnOnce() -> ApiError) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| not_found())
}

/// Tells an explicit `null` (`Some(None)`) apart from an absent field (`None`)
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Ids that do not parse are dropped, like ids of unknown users
fn parse_ids(raw: &[String]) -> Vec<UserId> {
    raw.iter()
        .filter_map(|id| Uuid::parse_str(id).ok())
        .collect()
}

// ============================================================================
// CHALLENGES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePost {
    pub title: String,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub notification_message: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
}

impl From<ChallengePost> for NewChallenge {
    fn from(body: ChallengePost) -> Self {
        Self {
            participants: parse_ids(&body.participants),
            title: body.title,
            description: body.description,
            start_at: body.start_at,
            end_at: body.end_at,
            challenge_type: body.challenge_type,
            notification_message: body.notification_message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePatchBody {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_at: Option<Option<DateTime<Utc>>>,
    pub end_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub challenge_type: Option<ChallengeType>,
    pub participants: Option<Vec<String>>,
}

impl From<ChallengePatchBody> for ChallengePatch {
    fn from(body: ChallengePatchBody) -> Self {
        Self {
            participants: body.participants.as_deref().map(parse_ids),
            title: body.title,
            description: body.description,
            start_at: body.start_at,
            end_at: body.end_at,
            challenge_type: body.challenge_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VetoPost {
    pub vetoed_participants: Vec<String>,
}

impl VetoPost {
    pub fn user_ids(&self) -> Vec<UserId> {
        parse_ids(&self.vetoed_participants)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePost {
    pub victim_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub proof_path: String,
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginPost {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

/// Empty JSON object returned by mutations without a payload
#[derive(Debug, Default, Serialize)]
pub struct Empty {}
