//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can occur while assembling
//! and running a world, so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: realmclock_core::config::ConfigError,
    },

    /// World assembly or startup failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: realmclock_world::WorldError,
    },

    /// The autosave timer could not start.
    #[error("timer error: {source}")]
    Timer {
        /// The underlying timer error.
        #[from]
        source: realmclock_core::timer::TimerError,
    },
}
