//! Builds a running-ready [`World`] from the `world` config section.

use realmclock_core::broker::SharedBroker;
use realmclock_core::config::WorldConfig;
use realmclock_core::timer::TimerFault;
use realmclock_world::{Realm, World};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::error::EngineError;

/// Build a world with every configured period and realm.
///
/// The world is not started. Realm offsets are applied after each realm
/// is attached, since an offset can only be set on an attached realm.
///
/// # Errors
///
/// Returns [`EngineError::World`] if the world, a period, or a realm is
/// rejected.
pub fn assemble_world(
    config: &WorldConfig,
    broker: SharedBroker,
    faults: UnboundedSender<TimerFault>,
) -> Result<World, EngineError> {
    let world = World::builder(config.name.as_str())
        .hours_per_day(config.hours_per_day)
        .game_day_to_real_hour_ratio(config.game_day_to_real_hour_ratio)
        .broker(broker)
        .fault_sink(faults)
        .build()?;

    for period in &config.periods {
        world.define_period(period.name.as_str(), period.hour, period.minute)?;
    }

    for entry in &config.realms {
        let realm = world.add_realm(Realm::new(entry.name.as_str())?)?;
        realm.apply_time_zone_offset(entry.offset_hour, entry.offset_minute)?;
    }

    info!(
        world = %world.name(),
        periods = config.periods.len(),
        realms = config.realms.len(),
        "world assembled"
    );
    Ok(world)
}
