//! Multi-click sequence matching

use esph_automation::Trigger;
use esph_core::entity::BinarySensor;
use esph_core::{Component, ComponentId, Scheduler};
use std::cell::Cell;
use std::rc::{Rc, Weak};
use tracing::{info, trace};

/// `max_length` of a step that may last arbitrarily long
pub const UNBOUNDED_LENGTH: u32 = u32::MAX - 1;

/// One step of a click sequence: hold `state` for `min_length` to
/// `max_length` milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiClickEvent {
    pub state: bool,
    pub min_length: u32,
    pub max_length: u32,
}

impl MultiClickEvent {
    pub fn new(state: bool, min_length: u32, max_length: u32) -> Self {
        Self {
            state,
            min_length,
            max_length,
        }
    }

    /// A step with no upper bound
    pub fn at_least(state: bool, min_length: u32) -> Self {
        Self::new(state, min_length, UNBOUNDED_LENGTH)
    }
}

/// Fires when the sensor follows a timed sequence of states
///
/// Each edge closes the current step and opens the next. An edge that comes
/// too early, or a step that runs past its maximum, puts the trigger into a
/// cooldown during which edges are ignored. The trigger fires on the edge
/// that ends the last step, or once the last step's minimum has elapsed when
/// that step is unbounded.
pub struct MultiClickTrigger {
    id: ComponentId,
    trigger: Trigger<()>,
    scheduler: Scheduler,
    timing: Vec<MultiClickEvent>,
    invalid_cooldown: u32,
    this: Weak<Self>,
    last_state: Cell<bool>,
    at_index: Cell<Option<usize>>,
    is_valid: Cell<bool>,
    in_cooldown: Cell<bool>,
}

impl MultiClickTrigger {
    /// Listen to `sensor` for the sequence `timing`; cooldown defaults to 1s
    pub fn new(
        sensor: &BinarySensor,
        scheduler: &Scheduler,
        timing: Vec<MultiClickEvent>,
    ) -> Rc<Self> {
        Self::with_cooldown(sensor, scheduler, timing, 1000)
    }

    pub fn with_cooldown(
        sensor: &BinarySensor,
        scheduler: &Scheduler,
        timing: Vec<MultiClickEvent>,
        invalid_cooldown: u32,
    ) -> Rc<Self> {
        let this = Rc::new_cyclic(|this| Self {
            id: ComponentId::next(),
            trigger: Trigger::new(),
            scheduler: scheduler.clone(),
            timing,
            invalid_cooldown,
            this: this.clone(),
            last_state: Cell::new(false),
            at_index: Cell::new(None),
            is_valid: Cell::new(false),
            in_cooldown: Cell::new(false),
        });
        let weak = Rc::downgrade(&this);
        sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                this.on_state(state);
            }
        });
        this
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }

    pub fn is_in_cooldown(&self) -> bool {
        self.in_cooldown.get()
    }

    /// Abort the sequence in progress and enter cooldown
    pub fn cancel(&self) {
        trace!("Multi click sequence cancelled");
        self.is_valid.set(false);
        self.schedule_cooldown();
    }

    fn on_state(&self, state: bool) {
        if state == self.last_state.get() {
            return;
        }
        self.last_state.set(state);

        if self.in_cooldown.get() {
            return;
        }

        let Some(index) = self.at_index.get() else {
            self.start(state);
            return;
        };

        if !self.is_valid.get() {
            self.schedule_cooldown();
            return;
        }

        let Some(event) = self.timing.get(index).copied() else {
            self.fire();
            return;
        };

        if event.max_length != UNBOUNDED_LENGTH {
            self.schedule_is_valid(event.min_length);
            self.schedule_is_not_valid(event.max_length);
        } else if index + 1 != self.timing.len() {
            self.scheduler.cancel_timeout(self.id, "is_not_valid");
            self.schedule_is_valid(event.min_length);
        } else {
            self.is_valid.set(false);
            self.scheduler.cancel_timeout(self.id, "is_not_valid");
            self.schedule_fire(event.min_length);
        }
        self.at_index.set(Some(index + 1));
    }

    fn start(&self, state: bool) {
        let Some(first) = self.timing.first().copied() else {
            return;
        };
        if first.state != state {
            trace!("Multi click not started, first step expects {}", first.state);
            return;
        }

        trace!("Multi click sequence started");
        self.at_index.set(Some(1));
        if self.timing.len() == 1 && first.max_length == UNBOUNDED_LENGTH {
            self.schedule_fire(first.min_length);
        } else {
            self.schedule_is_valid(first.min_length);
            self.schedule_is_not_valid(first.max_length);
        }
    }

    fn schedule_is_valid(&self, min_length: u32) {
        if min_length == 0 {
            self.is_valid.set(true);
            return;
        }
        self.is_valid.set(false);
        let weak = self.this.clone();
        self.scheduler.set_timeout(self.id, "is_valid", min_length, move || {
            if let Some(this) = weak.upgrade() {
                this.is_valid.set(true);
            }
        });
    }

    fn schedule_is_not_valid(&self, max_length: u32) {
        let weak = self.this.clone();
        self.scheduler.set_timeout(self.id, "is_not_valid", max_length, move || {
            if let Some(this) = weak.upgrade() {
                trace!("Multi click step exceeded its maximum length");
                this.is_valid.set(false);
                this.schedule_cooldown();
            }
        });
    }

    fn schedule_fire(&self, delay: u32) {
        let weak = self.this.clone();
        self.scheduler.set_timeout(self.id, "trigger", delay, move || {
            if let Some(this) = weak.upgrade() {
                this.fire();
            }
        });
    }

    fn schedule_cooldown(&self) {
        trace!(cooldown = self.invalid_cooldown, "Multi click entering cooldown");
        self.in_cooldown.set(true);
        let weak = self.this.clone();
        self.scheduler
            .set_timeout(self.id, "cooldown", self.invalid_cooldown, move || {
                if let Some(this) = weak.upgrade() {
                    this.in_cooldown.set(false);
                }
            });
        self.at_index.set(None);
        self.cancel_step_timers();
    }

    fn fire(&self) {
        trace!("Multi click sequence matched");
        self.at_index.set(None);
        self.cancel_step_timers();
        self.trigger.trigger(());
    }

    fn cancel_step_timers(&self) {
        self.scheduler.cancel_timeout(self.id, "trigger");
        self.scheduler.cancel_timeout(self.id, "is_valid");
        self.scheduler.cancel_timeout(self.id, "is_not_valid");
    }
}

impl Component for MultiClickTrigger {
    fn component_name(&self) -> &str {
        "multi_click"
    }

    fn dump_config(&self) {
        info!("Multi Click Trigger:");
        for (i, event) in self.timing.iter().enumerate() {
            if event.max_length == UNBOUNDED_LENGTH {
                info!(
                    "  {}: {} for at least {}ms",
                    i,
                    if event.state { "ON" } else { "OFF" },
                    event.min_length
                );
            } else {
                info!(
                    "  {}: {} for {}ms to {}ms",
                    i,
                    if event.state { "ON" } else { "OFF" },
                    event.min_length,
                    event.max_length
                );
            }
        }
        info!("  Invalid Cooldown: {}ms", self.invalid_cooldown);
    }
}
