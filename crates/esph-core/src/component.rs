//! Component lifecycle

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Setup priorities, higher values run first
pub mod setup_priority {
    /// Buses that other components talk through
    pub const BUS: f32 = 1000.0;
    /// Plain I/O expanders and pins
    pub const IO: f32 = 900.0;
    /// Hardware drivers that only need a bus
    pub const HARDWARE: f32 = 800.0;
    /// Components that produce or restore data (sensors, preferences users)
    pub const DATA: f32 = 600.0;
    /// Components that consume data from other components
    pub const PROCESSOR: f32 = 400.0;
    pub const AFTER_CONNECTION: f32 = 100.0;
    /// Runs after everything else
    pub const LATE: f32 = -100.0;
}

static NEXT_COMPONENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a scheduler owner
///
/// Timeouts and intervals are keyed by `(ComponentId, name)`, so two owners
/// can use the same timer name without interfering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Allocate a fresh, process-unique id
    pub fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cooperatively scheduled unit of work
///
/// Every method takes `&self`: components are shared through `Rc` between the
/// application and whatever wires automations to them, and keep their mutable
/// state in cells.
pub trait Component {
    /// Human readable name used in log output
    fn component_name(&self) -> &str {
        "component"
    }

    /// One-time initialisation, called in descending [`setup_priority`] order
    fn setup(&self) {}

    /// Called once per application tick
    fn on_loop(&self) {}

    /// Log the component configuration
    fn dump_config(&self) {}

    fn setup_priority(&self) -> f32 {
        setup_priority::DATA
    }

    /// Called when the application shuts down
    fn on_shutdown(&self) {}
}
