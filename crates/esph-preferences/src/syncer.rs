//! Periodic preference flushing

use crate::Preferences;
use esph_core::{setup_priority, Component, ComponentId, Scheduler};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Syncs a preference store on a fixed interval and on shutdown
///
/// `write_interval` of `None` disables periodic syncing; `Some(0)` syncs on
/// every tick.
pub struct IntervalSyncer {
    id: ComponentId,
    preferences: Rc<dyn Preferences>,
    write_interval: Option<u32>,
    scheduler: Scheduler,
}

impl IntervalSyncer {
    pub fn new(
        preferences: Rc<dyn Preferences>,
        write_interval: Option<u32>,
        scheduler: &Scheduler,
    ) -> Self {
        Self {
            id: ComponentId::next(),
            preferences,
            write_interval,
            scheduler: scheduler.clone(),
        }
    }

    pub fn write_interval(&self) -> Option<u32> {
        self.write_interval
    }
}

impl Component for IntervalSyncer {
    fn component_name(&self) -> &str {
        "preferences"
    }

    fn setup(&self) {
        let Some(interval) = self.write_interval else {
            return;
        };
        let preferences = self.preferences.clone();
        self.scheduler.set_interval(self.id, "sync", interval, move || {
            if !preferences.sync() {
                warn!("Periodic preference sync failed");
            }
        });
    }

    fn dump_config(&self) {
        info!("Preferences:");
        match self.write_interval {
            Some(ms) => info!("  Write Interval: {}ms", ms),
            None => info!("  Write Interval: never"),
        }
    }

    fn setup_priority(&self) -> f32 {
        setup_priority::BUS
    }

    fn on_shutdown(&self) {
        debug!("Flushing preferences before shutdown");
        if !self.preferences.sync() {
            warn!("Preference sync on shutdown failed");
        }
    }
}
