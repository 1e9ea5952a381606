//! REST API implementation.

pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use middleware::AuthUser;
pub use state::{ApiState, Collaborators};
