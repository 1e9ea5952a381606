//! Users, recents and walls.
//!
//! A wall ranks initiated users by how many challenges they failed or were
//! vetoed in, over everyone or over one user's contacts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{IdentityVerifier, TokenSigner};
use crate::error::{ApiError, ApiResult};
use crate::storage::{ChallengeStore, StoreError, UserUpdate};
use crate::time_policy::Clock;
use crate::types::{Avatar, User, UserId};
use crate::views::{ParticipationStats, UserData, UserList};

/// Maximum number of entries on a wall
pub const WALL_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub deadline_reminder: Option<bool>,
    pub invitations: Option<bool>,
}

/// Self-service profile update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<Avatar>,
    pub settings: Option<SettingsPatch>,
    pub messaging_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserData,
}

pub struct UserService {
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    signer: Arc<TokenSigner>,
    identity: Arc<dyn IdentityVerifier>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        clock: Arc<dyn Clock>,
        signer: Arc<TokenSigner>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            clock,
            signer,
            identity,
        }
    }

    /// Exchanges a provider token for a bearer token, creating the account
    /// on first login.
    pub async fn login(&self, provider_token: &str) -> ApiResult<LoginResponse> {
        let email = self.identity.verify(provider_token).await.map_err(|e| {
            warn!("Login rejected: {}", e);
            ApiError::InvalidCredentials
        })?;

        let user = match self.store.user_by_email(&email).await? {
            Some(user) => user,
            None => self.register(&email).await?,
        };

        let token = self.signer.sign(user.id, self.clock.now())?;
        let data = self.user_data(&user).await?;
        Ok(LoginResponse { token, user: data })
    }

    async fn register(&self, email: &str) -> ApiResult<User> {
        let user = User::new(email, self.clock.now());
        match self.store.create_user(&user).await {
            Ok(()) => {
                info!("Registered user {}", user.id);
                Ok(user)
            }
            // concurrent first login with the same email
            Err(StoreError::UniqueViolation { .. }) => self
                .store
                .user_by_email(email)
                .await?
                .ok_or(ApiError::ExistingAccount),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn profile(&self, user_id: UserId) -> ApiResult<UserData> {
        let user = self.existing(user_id).await?;
        self.user_data(&user).await
    }

    pub async fn patch(&self, user_id: UserId, patch: ProfilePatch) -> ApiResult<()> {
        let current = self.existing(user_id).await?;

        let username = patch.username.map(|u| u.trim().to_string());
        if username.as_deref() == Some("") {
            return Err(ApiError::InvalidRequest(
                "Username cannot be empty.".to_string(),
            ));
        }
        let name = patch.name.map(|n| n.trim().to_string());
        if name.as_deref() == Some("") {
            return Err(ApiError::InvalidRequest("Name cannot be empty.".to_string()));
        }

        let settings = patch.settings.map(|s| {
            let mut merged = current.settings;
            if let Some(v) = s.deadline_reminder {
                merged.deadline_reminder = v;
            }
            if let Some(v) = s.invitations {
                merged.invitations = v;
            }
            merged
        });

        let update = UserUpdate {
            username,
            name,
            avatar_animal: patch.avatar.as_ref().map(|a| a.animal),
            avatar_color: patch.avatar.as_ref().map(|a| a.color),
            avatar_bg: patch.avatar.map(|a| a.background),
            settings,
            messaging_token: patch.messaging_token,
        };

        match self.store.update_user(user_id, &update).await {
            Ok(_) => Ok(()),
            Err(StoreError::RowMissing) => Err(no_account()),
            Err(e) => Err(e.into()),
        }
    }

    /// Users the caller has interacted with, most recent first
    pub async fn recents(&self, user_id: UserId) -> ApiResult<Vec<UserList>> {
        let mut contacts = self.store.contacts(user_id).await?;
        contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let ids: Vec<UserId> = contacts.iter().map(|c| c.pers2_id).collect();

        let mut found: HashMap<UserId, User> = self
            .store
            .users(&ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let ordered: Vec<User> = ids.iter().filter_map(|id| found.remove(id)).collect();
        self.listing(ordered).await
    }

    pub async fn search(&self, query: &str) -> ApiResult<Vec<UserList>> {
        let users = self.store.search_users(query.trim()).await?;
        self.listing(users).await
    }

    pub async fn public_profile(&self, user_id: UserId) -> ApiResult<UserList> {
        let not_found = || ApiError::NotFound("User was not found.".to_string());
        let user = self.store.user(user_id).await?.ok_or_else(not_found)?;
        self.listing(vec![user])
            .await?
            .pop()
            .ok_or_else(not_found)
    }

    pub async fn global_wall(&self) -> ApiResult<Vec<UserList>> {
        let users = self.store.initiated_users().await?;
        self.wall(users).await
    }

    /// Wall restricted to the caller's contacts
    pub async fn user_wall(&self, user_id: UserId) -> ApiResult<Vec<UserList>> {
        let ids: Vec<UserId> = self
            .store
            .contacts(user_id)
            .await?
            .into_iter()
            .map(|c| c.pers2_id)
            .collect();
        let users = self.store.users(&ids).await?;
        self.wall(users).await
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn existing(&self, user_id: UserId) -> ApiResult<User> {
        self.store.user(user_id).await?.ok_or_else(no_account)
    }

    async fn user_data(&self, user: &User) -> ApiResult<UserData> {
        let stats = if user.is_initiated() {
            self.stats_for(&[user.id]).await?.remove(&user.id)
        } else {
            None
        };
        Ok(UserData::new(user, stats))
    }

    async fn stats_for(&self, ids: &[UserId]) -> ApiResult<HashMap<UserId, ParticipationStats>> {
        let now = self.clock.now();
        let mut by_user: HashMap<UserId, Vec<_>> = HashMap::new();
        for record in self.store.participation_records(ids).await? {
            by_user
                .entry(record.participant.user_id)
                .or_default()
                .push(record);
        }
        Ok(ids
            .iter()
            .map(|id| {
                let records = by_user.get(id).map(Vec::as_slice).unwrap_or_default();
                (*id, ParticipationStats::from_records(records, now))
            })
            .collect())
    }

    /// Initiated users with stats, input order kept
    async fn listing(&self, users: Vec<User>) -> ApiResult<Vec<UserList>> {
        let initiated: Vec<_> = users.iter().filter_map(User::initiated).collect();
        let ids: Vec<UserId> = initiated.iter().map(|u| u.id()).collect();
        let stats = self.stats_for(&ids).await?;

        Ok(initiated
            .iter()
            .map(|u| UserList::new(u, stats.get(&u.id()).copied().unwrap_or_default()))
            .collect())
    }

    async fn wall(&self, users: Vec<User>) -> ApiResult<Vec<UserList>> {
        let mut ranked: Vec<UserList> = self
            .listing(users)
            .await?
            .into_iter()
            .filter(|u| u.stats.wall_score() > 0)
            .collect();
        ranked.sort_by(|a, b| {
            b.stats
                .wall_score()
                .cmp(&a.stats.wall_score())
                .then_with(|| a.username.cmp(&b.username))
        });
        ranked.truncate(WALL_LIMIT);
        Ok(ranked)
    }
}

fn no_account() -> ApiError {
    ApiError::NonExistentAccount("User does not exist.".to_string())
}
