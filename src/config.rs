//! Service Configuration
//!
//! Defines the tunable behaviour of the service:
//! - Lifecycle cutoffs (when edits, deletion, acceptance and completion stop)
//! - Bearer token lifetime
//! - Deadline reminder scheduling
//!
//! Every section has a `Default`, so an absent or partial TOML file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Temporal cutoffs for challenge operations
    pub policy: LifecyclePolicy,
    /// Token issuing
    pub auth: AuthConfig,
    /// Deadline reminder worker
    pub reminders: ReminderConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Point in a challenge's life after which an operation is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
    /// Refused once `startAt` has passed (and, always, once over)
    Started,
    /// Refused only once `endAt` has passed
    Over,
}

/// When a participant may mark themselves complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionWindow {
    /// Any time before `endAt`
    UntilOver,
    /// Only while `startAt < now < endAt`
    WhileRunning,
}

/// Lifecycle cutoffs. Historically these moved between "started" and
/// "over", so they are configuration rather than constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    pub update_cutoff: Cutoff,
    pub delete_cutoff: Cutoff,
    pub accept_cutoff: Cutoff,
    pub completion_window: CompletionWindow,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            update_cutoff: Cutoff::Started,
            delete_cutoff: Cutoff::Over,
            accept_cutoff: Cutoff::Started,
            completion_window: CompletionWindow::UntilOver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of issued bearer tokens
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 7 * 24 * 60 * 60, // 7 days
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// How often to look for challenges about to end
    pub poll_interval_secs: u64,
    /// Remind when a challenge ends within this many minutes
    pub window_minutes: i64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 300, // 5 minutes
            window_minutes: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = LifecyclePolicy::default();

        assert_eq!(policy.update_cutoff, Cutoff::Started);
        assert_eq!(policy.delete_cutoff, Cutoff::Over);
        assert_eq!(policy.accept_cutoff, Cutoff::Started);
        assert_eq!(policy.completion_window, CompletionWindow::UntilOver);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [policy]
            completion_window = "while_running"
            update_cutoff = "over"

            [reminders]
            window_minutes = 30
            "#,
        )
        .unwrap();

        assert_eq!(
            config.policy.completion_window,
            CompletionWindow::WhileRunning
        );
        assert_eq!(config.policy.update_cutoff, Cutoff::Over);
        assert_eq!(config.policy.accept_cutoff, Cutoff::Started);
        assert_eq!(config.reminders.window_minutes, 30);
        assert_eq!(config.reminders.poll_interval_secs, 300);
        assert_eq!(config.auth, AuthConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_unknown_cutoff_rejected() {
        assert!(AppConfig::from_toml("[policy]\naccept_cutoff = \"never\"").is_err());
    }
}
