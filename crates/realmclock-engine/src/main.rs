//! Engine binary for the Realmclock simulation.
//!
//! Loads configuration, assembles a world with its periods and realms,
//! starts the world clock, and runs until Ctrl-C or the configured
//! real-time bound.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `realmclock-config.yaml` (or `REALMCLOCK_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the message broker and log every message it carries
//! 4. Start the timer fault reporter
//! 5. Assemble the world from config
//! 6. Start the world clock
//! 7. Start autosave
//! 8. Run until Ctrl-C or the real-time bound
//! 9. Shut down and log the final world status

mod assembly;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use realmclock_core::autosave::Autosave;
use realmclock_core::broker::{EngineMessage, InMemoryBroker, MessageBroker as _, SharedBroker};
use realmclock_core::config::SimulationConfig;
use realmclock_core::timer::{TickResult, TimerFault};
use realmclock_world::World;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, world assembly, or startup fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = SimulationConfig::resolve_path();
    let loaded = load_config(&config_path)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str())),
        )
        .with_target(true)
        .init();

    info!("realmclock-engine starting");
    if found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        world_name = %config.world.name,
        hours_per_day = config.world.hours_per_day,
        game_day_to_real_hour_ratio = config.world.game_day_to_real_hour_ratio,
        periods = config.world.periods.len(),
        realms = config.world.realms.len(),
        "World configuration"
    );

    // 3. Create the broker and log every message.
    let broker: SharedBroker = Arc::new(InMemoryBroker::default());
    let messages = broker.subscribe(
        None,
        Box::new(|message: EngineMessage| log_message(&message)),
    );

    // 4. Report timer faults.
    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<TimerFault>();
    let fault_reporter = tokio::spawn(async move {
        while let Some(fault) = fault_rx.recv().await {
            error!(timer = %fault.timer, fire = fault.fire, error = %fault.error, "timer fault");
        }
    });

    // 5. Assemble the world.
    let world = assembly::assemble_world(&config.world, Arc::clone(&broker), fault_tx)?;

    // 6. Start the world clock.
    let period = if config.engine.start_from_wall_clock {
        world.start()?
    } else {
        world.start_at_first()?
    };
    info!(
        world = %world.name(),
        period = %period.name(),
        time = %period.start_time(),
        "World clock started"
    );

    // 7. Start autosave.
    let autosave = Autosave::new(world.clone(), save_snapshot)
        .with_frequency_minutes(config.autosave.frequency_minutes);
    if autosave.initialize().map_err(EngineError::from)? {
        info!(frequency_minutes = autosave.frequency_minutes(), "Autosave enabled");
    }

    // 8. Run until stopped.
    let max_real_time_seconds = config.engine.max_real_time_seconds;
    info!(max_real_time_seconds, "Entering run loop");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        },
        () = run_limit(max_real_time_seconds) => {
            info!(max_real_time_seconds, "Real-time limit reached, shutting down");
        }
    }

    // 9. Shut down.
    autosave.shutdown().await;
    world.shutdown().await;
    drop(messages);
    fault_reporter.abort();

    match serde_json::to_string(&world.status()) {
        Ok(status) => info!(%status, "Final world status"),
        Err(e) => warn!(error = %e, "failed to serialize final world status"),
    }
    info!("realmclock-engine shutdown complete");

    Ok(())
}

/// Load the simulation configuration from `path`.
///
/// Returns `None` when the file does not exist so the caller can fall
/// back to defaults.
fn load_config(path: &Path) -> Result<Option<SimulationConfig>, EngineError> {
    if path.exists() {
        Ok(Some(SimulationConfig::from_file(path)?))
    } else {
        Ok(None)
    }
}

/// Resolve after `seconds` real seconds, or never when `seconds` is zero.
async fn run_limit(seconds: u64) {
    if seconds == 0 {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }
}

fn log_message(message: &EngineMessage) {
    match serde_json::to_string(message) {
        Ok(json) => info!(kind = message.kind(), payload = %json, "engine message"),
        Err(e) => warn!(kind = message.kind(), error = %e, "failed to serialize engine message"),
    }
}

/// Autosave delegate: write a JSON snapshot of the world to the log.
async fn save_snapshot(world: Arc<World>) -> TickResult {
    let snapshot = serde_json::to_string(&world.status())?;
    info!(world = %world.name(), %snapshot, "world autosaved");
    Ok(())
}
