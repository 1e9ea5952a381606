//! API state shared across all handlers.

use std::sync::Arc;

use crate::auth::{IdentityVerifier, TokenSigner};
use crate::config::AppConfig;
use crate::lifecycle::ChallengeLifecycle;
use crate::notify::Notifier;
use crate::storage::ChallengeStore;
use crate::time_policy::Clock;
use crate::upload::EvidenceStore;
use crate::users::UserService;
use crate::votes::VoteTally;

/// External handles built once in `main` and injected into every service
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ChallengeStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub identity: Arc<dyn IdentityVerifier>,
}

pub struct ApiState {
    pub lifecycle: ChallengeLifecycle,
    pub votes: VoteTally,
    pub users: UserService,
    pub signer: Arc<TokenSigner>,
    pub clock: Arc<dyn Clock>,
}

impl ApiState {
    pub fn new(collaborators: Collaborators, config: &AppConfig, jwt_secret: &str) -> Self {
        let Collaborators {
            store,
            clock,
            notifier,
            evidence,
            identity,
        } = collaborators;
        let signer = Arc::new(TokenSigner::new(jwt_secret, config.auth.token_ttl_secs));

        Self {
            lifecycle: ChallengeLifecycle::new(
                store.clone(),
                clock.clone(),
                notifier,
                evidence,
                config.policy,
            ),
            votes: VoteTally::new(store.clone(), clock.clone()),
            users: UserService::new(store, clock.clone(), signer.clone(), identity),
            signer,
            clock,
        }
    }
}
