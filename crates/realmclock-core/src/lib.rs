//! Scheduler, periods, and period resolution for the Realmclock simulation.
//!
//! This crate owns the machinery that makes in-game time pass: a
//! recurring-callback timer, the named periods of the day that each run
//! their own clock on it, and the resolver that maps a clock reading to
//! the period in effect.
//!
//! # Modules
//!
//! - [`autosave`] -- [`Autosave`], a periodic save delegate on the timer.
//! - [`broker`] -- [`MessageBroker`] trait and [`InMemoryBroker`] for
//!   lifecycle notifications.
//! - [`config`] -- Configuration loading from `realmclock-config.yaml` into
//!   strongly-typed structs.
//! - [`events`] -- [`EventHub`], in-process notifications with disposable
//!   subscriptions.
//! - [`period`] -- [`Period`], a named interval of the day with its own
//!   clock.
//! - [`resolver`] -- [`PeriodResolver`], circular active-period lookup.
//! - [`timer`] -- [`EngineTimer`], the cancelable recurring callback.
//!
//! [`Autosave`]: autosave::Autosave
//! [`MessageBroker`]: broker::MessageBroker
//! [`InMemoryBroker`]: broker::InMemoryBroker
//! [`EventHub`]: events::EventHub
//! [`Period`]: period::Period
//! [`PeriodResolver`]: resolver::PeriodResolver
//! [`EngineTimer`]: timer::EngineTimer

pub mod autosave;
pub mod broker;
pub mod config;
pub mod events;
pub mod period;
pub mod resolver;
pub mod timer;
