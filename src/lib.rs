//! Progression and ranking engine for multiplayer racing.
//!
//! Paddock turns finished races into durable player progression, keeps
//! per-track personal-best leaderboards, and tracks lobby occupancy under
//! concurrent joins and leaves.
//!
//! # Features
//!
//! - **No lost updates**: every write is a versioned transaction against a [`Store`]
//! - **All-or-nothing batches**: a race's results land together or not at all
//! - **Live ranking**: ranks are computed when read, never stored
//! - **Background submission**: [`SubmissionPipeline`] retries transient failures
//!
//! # Quick Start
//!
//! ```rust
//! use paddock::{Paddock, PlayerId, RaceResult, SeatSelection, NewLobby, GameMode, TrackId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> paddock::Result<()> {
//! let engine = Paddock::in_memory()?;
//!
//! let host = engine.register_player(PlayerId::new(), "host").await?;
//! let lobby = engine
//!     .create_lobby(NewLobby {
//!         name: "Friday night".to_string(),
//!         host: host.id,
//!         max_players: 4,
//!         track: TrackId::from("spa"),
//!         mode: GameMode::Race,
//!         is_private: false,
//!         settings: serde_json::Value::Null,
//!     })
//!     .await?;
//! engine.join(lobby.id, host.id, SeatSelection::default()).await?;
//!
//! let race = engine.start_race(lobby.id, 3, serde_json::Value::Null).await?;
//! let mut result = RaceResult::new(race.id, host.id);
//! result.position = Some(1);
//! result.finished = true;
//! result.experience_earned = 150;
//!
//! let ack = engine.submit_results(race.id, vec![result]).await?;
//! assert_eq!(ack.winner, Some(host.id));
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod level;
pub mod store;
pub mod stores;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Engine components
pub mod engine;
pub mod membership;
pub mod pipeline;
pub mod ranking;
pub mod stats;

// Core exports
pub use config::{EngineConfig, LobbyLimits, PipelineConfig, RetryPolicy};
pub use error::*;
pub use store::{Store, Transaction, Version, Versioned, Write};
pub use stores::MemoryStore;
pub use types::*;

// Main API exports
pub use engine::{PlayerProgress, ProgressionEngine, SubmissionAck};
pub use level::level;
pub use pipeline::{RaceCompletion, SubmissionOutcome, SubmissionPipeline};

use std::path::Path;
use std::sync::Arc;

/// Unified entry point for building a [`ProgressionEngine`].
///
/// # Examples
///
/// ## In-memory store
/// ```rust
/// let engine = paddock::Paddock::in_memory()?;
/// assert_eq!(engine.config().lobby.max_players, 8);
/// # Ok::<(), paddock::ProgressionError>(())
/// ```
///
/// ## Custom store and configuration
/// ```rust,no_run
/// use std::sync::Arc;
/// use paddock::{MemoryStore, Paddock};
///
/// let engine = Paddock::from_config_file(Arc::new(MemoryStore::new()), "paddock.yaml")?;
/// # Ok::<(), paddock::ProgressionError>(())
/// ```
pub struct Paddock;

impl Paddock {
    /// Engine over a fresh [`MemoryStore`] with default configuration.
    pub fn in_memory() -> Result<ProgressionEngine<MemoryStore>> {
        ProgressionEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    /// Engine over `store` with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn with_store<S: Store>(store: Arc<S>, config: EngineConfig) -> Result<ProgressionEngine<S>> {
        ProgressionEngine::new(store, config)
    }

    /// Engine over `store` configured from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist or is not readable
    /// - The file is not valid YAML for [`EngineConfig`]
    /// - A configured value is out of range
    pub fn from_config_file<S: Store, P: AsRef<Path>>(
        store: Arc<S>,
        path: P,
    ) -> Result<ProgressionEngine<S>> {
        ProgressionEngine::new(store, EngineConfig::from_path(path)?)
    }
}
