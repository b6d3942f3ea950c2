//! Public types for the sync engine coordinator.

use serde::{Deserialize, Serialize};

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Built, periodic tasks not scheduled yet
    Created,
    /// Periodic tasks scheduled
    Running,
    /// Graceful shutdown in progress or finished
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// What [`super::SyncEngine::clear_cache`] removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    /// Keys matching a glob (`*`, `?`)
    Pattern(String),
    /// Every key the engine owns
    All,
}

impl std::fmt::Display for ClearScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(p) => write!(f, "Pattern({})", p),
            Self::All => write!(f, "All"),
        }
    }
}
