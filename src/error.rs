//! Error types for progression processing.
//!
//! This module provides the error handling for the paddock progression engine.
//! All errors implement the `std::error::Error` trait and carry enough structured
//! context for callers to decide whether to retry, surface, or drop a request.
//!
//! ## Error Categories
//!
//! Every error belongs to one [`ErrorKind`]:
//!
//! - **Validation**: malformed or out-of-range input, rejected before any write
//! - **Conflict**: duplicate membership, duplicate result, full lobby, finalized race
//! - **Dangling Reference**: a referenced player, lobby or race does not exist
//! - **Concurrency Retry**: an optimistic write lost its race too many times
//! - **Transient Store**: the persistence boundary timed out or is unavailable
//! - **Configuration**: invalid or unreadable engine configuration
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use paddock::ProgressionError;
//! use std::time::Duration;
//!
//! let error = ProgressionError::Timeout { duration: Duration::from_secs(2) };
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{LobbyId, LobbyStatus, PlayerId, RaceId, RaceStatus};

/// Result type alias for progression operations.
pub type Result<T, E = ProgressionError> = std::result::Result<T, E>;

/// Error taxonomy used by callers to classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    DanglingReference,
    ConcurrencyRetry,
    TransientStore,
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DanglingReference => "dangling reference",
            ErrorKind::ConcurrencyRetry => "concurrency retry",
            ErrorKind::TransientStore => "transient store",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// One rejected result inside a failed batch submission.
#[derive(Debug)]
pub struct ResultFailure {
    pub player: PlayerId,
    pub error: ProgressionError,
}

impl fmt::Display for ResultFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}: {}", self.player, self.error)
    }
}

/// Main error type for progression operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Player {player} is banned")]
    PlayerBanned { player: PlayerId },

    #[error("Lobby {lobby} is full ({max_players} players)")]
    LobbyFull { lobby: LobbyId, max_players: u8 },

    #[error("Lobby {lobby} is {status} and no longer accepts players")]
    LobbyClosed { lobby: LobbyId, status: LobbyStatus },

    #[error("Player {player} is already in lobby {lobby}")]
    DuplicateMembership { lobby: LobbyId, player: PlayerId },

    #[error("Result for player {player} in race {race} was already recorded")]
    DuplicateResult { race: RaceId, player: PlayerId },

    #[error("Username '{username}' is already taken")]
    DuplicateUsername { username: String },

    #[error("Race {race} is already {status}")]
    RaceFinalized { race: RaceId, status: RaceStatus },

    #[error("Lobby {lobby} cannot move from {from} to {to}")]
    InvalidTransition { lobby: LobbyId, from: LobbyStatus, to: LobbyStatus },

    #[error("{entity} {id} does not exist")]
    DanglingReference { entity: &'static str, id: String },

    #[error("{entity} {id} changed since it was read")]
    VersionConflict { entity: &'static str, id: String },

    #[error("Gave up updating {entity} {id} after {attempts} conflicting attempts")]
    ConcurrencyRetry { entity: &'static str, id: String, attempts: u32 },

    #[error("Store operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Store unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Race {race}: {} result(s) rejected", failures.len())]
    BatchRejected { race: RaceId, failures: Vec<ResultFailure> },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },
}

impl ProgressionError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProgressionError::Validation { .. } => ErrorKind::Validation,
            ProgressionError::PlayerBanned { .. } => ErrorKind::Validation,
            ProgressionError::InvalidTransition { .. } => ErrorKind::Validation,
            ProgressionError::LobbyFull { .. } => ErrorKind::Conflict,
            ProgressionError::LobbyClosed { .. } => ErrorKind::Conflict,
            ProgressionError::DuplicateMembership { .. } => ErrorKind::Conflict,
            ProgressionError::DuplicateResult { .. } => ErrorKind::Conflict,
            ProgressionError::DuplicateUsername { .. } => ErrorKind::Conflict,
            ProgressionError::RaceFinalized { .. } => ErrorKind::Conflict,
            ProgressionError::DanglingReference { .. } => ErrorKind::DanglingReference,
            ProgressionError::VersionConflict { .. } => ErrorKind::ConcurrencyRetry,
            ProgressionError::ConcurrencyRetry { .. } => ErrorKind::ConcurrencyRetry,
            ProgressionError::Timeout { .. } => ErrorKind::TransientStore,
            ProgressionError::StoreUnavailable { .. } => ErrorKind::TransientStore,
            ProgressionError::BatchRejected { failures, .. } => failures
                .iter()
                .map(|failure| failure.error.kind())
                .find(|kind| *kind != ErrorKind::Validation)
                .unwrap_or(ErrorKind::Validation),
            ProgressionError::ConfigFile { .. } => ErrorKind::Configuration,
            ProgressionError::Config { .. } => ErrorKind::Configuration,
        }
    }

    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Re-submitting the same immutable race results is always safe: a result that
    /// did land is rejected as a duplicate instead of being counted twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProgressionError::BatchRejected { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|failure| failure.error.is_retryable())
            }
            other => {
                matches!(other.kind(), ErrorKind::ConcurrencyRetry | ErrorKind::TransientStore)
            }
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self.kind() {
            ErrorKind::Validation => vec![
                "Check the request payload against the documented limits",
                "Verify the player is allowed to take part",
            ],
            ErrorKind::Conflict => vec![
                "Treat duplicates as already applied",
                "Refresh lobby or race state before trying again",
            ],
            ErrorKind::DanglingReference => vec![
                "Verify the referenced player, lobby or race still exists",
                "Check whether the owning account was closed",
            ],
            ErrorKind::ConcurrencyRetry => vec![
                "Retry the same request",
                "Increase retry.max_attempts if contention is expected",
            ],
            ErrorKind::TransientStore => vec![
                "Retry the same request with backoff",
                "Check store availability and latency",
                "Increase store_timeout_ms if the store is slow",
            ],
            ErrorKind::Configuration => vec![
                "Check configuration file exists and is readable",
                "Verify configuration values are within documented ranges",
            ],
        }
    }

    /// Failures attached to a rejected batch, empty for every other error.
    pub fn failures(&self) -> &[ResultFailure] {
        match self {
            ProgressionError::BatchRejected { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Helper constructor for validation errors.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProgressionError::Validation { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for dangling references.
    pub fn dangling(entity: &'static str, id: impl ToString) -> Self {
        ProgressionError::DanglingReference { entity, id: id.to_string() }
    }

    /// Helper constructor for optimistic write conflicts.
    pub fn version_conflict(entity: &'static str, id: impl ToString) -> Self {
        ProgressionError::VersionConflict { entity, id: id.to_string() }
    }

    /// Helper constructor for store availability errors.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        ProgressionError::StoreUnavailable { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        ProgressionError::Config { context: context.into(), details: details.into() }
    }

    pub(crate) fn is_version_conflict(&self) -> bool {
        matches!(self, ProgressionError::VersionConflict { .. })
    }
}

impl From<serde_yaml_ng::Error> for ProgressionError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ProgressionError::Config { context: "YAML".to_string(), details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                field in "\\w+",
                reason in ".*",
                attempts in 1u32..100u32,
                duration_ms in 1u64..60000u64
            ) {
                let validation = ProgressionError::validation(field.clone(), reason.clone());
                let msg = validation.to_string();
                prop_assert!(msg.contains(&field));
                prop_assert!(msg.contains(&reason));

                let retry = ProgressionError::ConcurrencyRetry {
                    entity: "player",
                    id: field.clone(),
                    attempts,
                };
                prop_assert!(retry.to_string().contains(&attempts.to_string()));

                let timeout = ProgressionError::Timeout { duration: Duration::from_millis(duration_ms) };
                prop_assert!(!timeout.to_string().is_empty());
                prop_assert!(timeout.is_retryable());
            }
        }
    }

    #[test]
    fn kinds_follow_taxonomy() {
        let lobby = LobbyId::new();
        let player = PlayerId::new();
        let race = RaceId::new();

        assert_eq!(ProgressionError::validation("name", "empty").kind(), ErrorKind::Validation);
        assert_eq!(ProgressionError::PlayerBanned { player }.kind(), ErrorKind::Validation);
        assert_eq!(
            ProgressionError::LobbyFull { lobby, max_players: 4 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ProgressionError::DuplicateResult { race, player }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(ProgressionError::dangling("player", player).kind(), ErrorKind::DanglingReference);
        assert_eq!(
            ProgressionError::version_conflict("lobby", lobby).kind(),
            ErrorKind::ConcurrencyRetry
        );
        assert_eq!(ProgressionError::store_unavailable("down").kind(), ErrorKind::TransientStore);
        assert_eq!(ProgressionError::config("retry", "zero").kind(), ErrorKind::Configuration);
    }

    #[test]
    fn retry_classification() {
        let player = PlayerId::new();
        let race = RaceId::new();

        assert!(ProgressionError::store_unavailable("down").is_retryable());
        assert!(ProgressionError::version_conflict("player", player).is_retryable());
        assert!(!ProgressionError::DuplicateResult { race, player }.is_retryable());
        assert!(!ProgressionError::dangling("race", race).is_retryable());

        let transient_batch = ProgressionError::BatchRejected {
            race,
            failures: vec![ResultFailure {
                player,
                error: ProgressionError::store_unavailable("down"),
            }],
        };
        assert!(transient_batch.is_retryable());
        assert_eq!(transient_batch.kind(), ErrorKind::TransientStore);

        let mixed_batch = ProgressionError::BatchRejected {
            race,
            failures: vec![
                ResultFailure { player, error: ProgressionError::PlayerBanned { player } },
                ResultFailure {
                    player: PlayerId::new(),
                    error: ProgressionError::DuplicateResult { race, player },
                },
            ],
        };
        assert!(!mixed_batch.is_retryable());
        assert_eq!(mixed_batch.kind(), ErrorKind::Conflict);
        assert_eq!(mixed_batch.failures().len(), 2);
        assert!(mixed_batch.to_string().contains("2 result(s) rejected"));
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            ProgressionError::validation("name", "empty"),
            ProgressionError::dangling("player", PlayerId::new()),
            ProgressionError::Timeout { duration: Duration::from_millis(10) },
            ProgressionError::config("retry", "zero"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ProgressionError>();

        let error = ProgressionError::store_unavailable("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn yaml_errors_become_configuration_errors() {
        let err = serde_yaml_ng::from_str::<u32>("[not a number").unwrap_err();
        let converted: ProgressionError = err.into();
        assert_eq!(converted.kind(), ErrorKind::Configuration);
    }
}
