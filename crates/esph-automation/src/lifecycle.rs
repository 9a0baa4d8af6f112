//! Triggers fired by the application lifecycle

use crate::Trigger;
use esph_core::{setup_priority, Component};

/// Fires once during setup
///
/// The setup priority decides which components are already set up when the
/// trigger fires.
pub struct StartupTrigger {
    trigger: Trigger<()>,
    priority: f32,
}

impl StartupTrigger {
    pub fn new(priority: f32) -> Self {
        Self {
            trigger: Trigger::new(),
            priority,
        }
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }
}

impl Component for StartupTrigger {
    fn component_name(&self) -> &str {
        "startup_trigger"
    }

    fn setup(&self) {
        self.trigger.trigger(());
    }

    fn setup_priority(&self) -> f32 {
        self.priority
    }
}

/// Fires when the application shuts down
pub struct ShutdownTrigger {
    trigger: Trigger<()>,
    priority: f32,
}

impl ShutdownTrigger {
    pub fn new(priority: f32) -> Self {
        Self {
            trigger: Trigger::new(),
            priority,
        }
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }
}

impl Component for ShutdownTrigger {
    fn component_name(&self) -> &str {
        "shutdown_trigger"
    }

    fn on_shutdown(&self) {
        self.trigger.trigger(());
    }

    fn setup_priority(&self) -> f32 {
        self.priority
    }
}

/// Fires on every application tick
#[derive(Default)]
pub struct LoopTrigger {
    trigger: Trigger<()>,
}

impl LoopTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }
}

impl Component for LoopTrigger {
    fn component_name(&self) -> &str {
        "loop_trigger"
    }

    fn on_loop(&self) {
        self.trigger.trigger(());
    }

    fn setup_priority(&self) -> f32 {
        setup_priority::DATA
    }
}
