//! API route handlers.
//!
//! Each submodule handles a specific group of endpoints:
//! - `auth`: Login with an identity provider token
//! - `challenges`: Challenge lifecycle and participation
//! - `proofs`: Completion evidence upload
//! - `votes`: Accusations and their tally
//! - `users`: Own profile, search, recents and walls

pub mod auth;
pub mod challenges;
pub mod proofs;
pub mod users;
pub mod votes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::ApiState;

/// Every endpoint below `/api/v1`
pub fn api_router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/auth", post(auth::login))
        .route(
            "/challenges",
            post(challenges::create_challenge).get(challenges::list_challenges),
        )
        .route(
            "/challenges/:challenge_id",
            get(challenges::show_challenge)
                .patch(challenges::update_challenge)
                .delete(challenges::delete_challenge),
        )
        .route(
            "/challenges/:challenge_id/accept",
            post(challenges::accept_challenge),
        )
        .route(
            "/challenges/:challenge_id/reject",
            post(challenges::reject_challenge),
        )
        .route(
            "/challenges/:challenge_id/complete",
            post(challenges::complete_challenge),
        )
        .route(
            "/challenges/:challenge_id/vetoResults",
            post(challenges::release_veto_results),
        )
        .route(
            "/challenges/:challenge_id/proofs",
            post(proofs::submit_proof)
                .patch(proofs::submit_proof)
                .delete(proofs::clear_proof),
        )
        .route(
            "/challenges/:challenge_id/votes",
            post(votes::submit_vote).get(votes::show_votes),
        )
        .route("/self", get(users::get_self).patch(users::patch_self))
        .route("/self/recents", get(users::get_recents))
        .route("/users", get(users::search_users))
        .route("/users/:user_id", get(users::get_user))
        .route("/walls/global", get(users::get_global_wall))
        .route("/walls/self", get(users::get_self_wall))
}
