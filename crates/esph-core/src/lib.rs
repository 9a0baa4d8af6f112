//! Core runtime for the device automation framework
//!
//! This crate provides the cooperative runtime every other crate builds on:
//! a millisecond [`Clock`], the named-timer [`Scheduler`], the [`Component`]
//! lifecycle and the [`Application`] that drives it, observer lists, and the
//! `Sensor`/`BinarySensor` entities that publish state into automations.

mod application;
mod callback;
mod clock;
mod component;
pub mod entity;
pub mod helpers;
mod scheduler;

pub use application::Application;
pub use callback::CallbackManager;
pub use clock::{Clock, ManualClock, SystemClock};
pub use component::{setup_priority, Component, ComponentId};
pub use scheduler::{RetryResult, Scheduler, SCHEDULER_DONT_RUN};
