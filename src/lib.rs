//! Challenge Tracker
//!
//! Time-boxed group commitments: an owner invites people to a challenge,
//! participants accept and mark it complete before the deadline, and once it
//! is over everyone may accuse others of not really completing it. The owner
//! then releases the result, vetoing some completions.
//!
//! ## Module Structure
//!
//! - `types`: Users, challenges, participants, contacts, votes
//! - `time_policy`: Clock and derived challenge state
//! - `storage/`: Storage trait, PostgreSQL and in-memory backends
//! - `participation`, `contacts`: Write-side helpers for the lifecycle
//! - `lifecycle`: Challenge operations
//! - `votes`: Accusations and tallies
//! - `users`: Login, profiles, recents and walls
//! - `notify`, `upload`, `auth`: External collaborators
//! - `reminders`: Deadline reminder worker
//! - `api/`, `server`: REST API

pub mod api;
pub mod auth;
pub mod config;
pub mod contacts;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod participation;
pub mod reminders;
pub mod server;
pub mod storage;
pub mod time_policy;
pub mod types;
pub mod upload;
pub mod users;
pub mod views;
pub mod votes;

pub use api::{ApiState, Collaborators};
pub use config::{AppConfig, CompletionWindow, Cutoff, LifecyclePolicy};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use lifecycle::{ChallengeLifecycle, ChallengePatch, NewChallenge};
pub use server::{build_router, run_server};
pub use storage::{ChallengeStore, MemoryStore, PgStore};
pub use time_policy::{Clock, FixedClock, SystemClock};
