//! Edge triggers for binary sensors

use esph_automation::Trigger;
use esph_core::entity::BinarySensor;
use esph_core::Clock;
use std::cell::Cell;
use std::rc::Rc;
use tracing::trace;

/// Fires when the sensor turns on
pub struct PressTrigger {
    trigger: Trigger<()>,
}

impl PressTrigger {
    pub fn new(sensor: &BinarySensor) -> Rc<Self> {
        let this = Rc::new(Self {
            trigger: Trigger::new(),
        });
        let weak = Rc::downgrade(&this);
        sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                if state {
                    this.trigger.trigger(());
                }
            }
        });
        this
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }
}

/// Fires when the sensor turns off
pub struct ReleaseTrigger {
    trigger: Trigger<()>,
}

impl ReleaseTrigger {
    pub fn new(sensor: &BinarySensor) -> Rc<Self> {
        let this = Rc::new(Self {
            trigger: Trigger::new(),
        });
        let weak = Rc::downgrade(&this);
        sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                if !state {
                    this.trigger.trigger(());
                }
            }
        });
        this
    }

    pub fn as_trigger(&self) -> &Trigger<()> {
        &self.trigger
    }
}

/// Fires with every new state
pub struct StateTrigger {
    trigger: Trigger<bool>,
}

impl StateTrigger {
    pub fn new(sensor: &BinarySensor) -> Rc<Self> {
        let this = Rc::new(Self {
            trigger: Trigger::new(),
        });
        let weak = Rc::downgrade(&this);
        sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                this.trigger.trigger(state);
            }
        });
        this
    }

    pub fn as_trigger(&self) -> &Trigger<bool> {
        &self.trigger
    }
}

/// Fires on release when the press lasted between `min_length` and
/// `max_length` milliseconds
pub struct ClickTrigger {
    trigger: Trigger<()>,
    clock: Rc<dyn Clock>,
    min_length: u32,
    max_length: u32,
    last_on: Cell<Option<u64>>,
}

impl ClickTrigger {
    pub fn new(
        sensor: &BinarySensor,
        clock: Rc<dyn Clock>,
        min_length: u32,
        max_length: u32,
    ) -> Rc<Self> {
        let this = Rc::new(Self {
            trigger: Trigger::new(),
            clock,
            min_length,
            max_length,
            last_on: Cell::new(None),
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

    fn on_state(&self, state: bool) {
        let now = self.clock.millis();
        if state {
            self.last_on.set(Some(now));
            return;
        }
        let Some(on) = self.last_on.take() else {
            return;
        };
        let length = now - on;
        if (u64::from(self.min_length)..=u64::from(self.max_length)).contains(&length) {
            self.trigger.trigger(());
        } else {
            trace!(length, "Press length outside click window");
        }
    }
}

/// Fires when two clicks follow each other
///
/// Both presses must last between `min_length` and `max_length`
/// milliseconds, and the second must start no later than `max_length` after
/// the first release.
pub struct DoubleClickTrigger {
    trigger: Trigger<()>,
    clock: Rc<dyn Clock>,
    min_length: u32,
    max_length: u32,
    last_on: Cell<Option<u64>>,
    /// Release time of a valid first click
    first_click_end: Cell<Option<u64>>,
}

impl DoubleClickTrigger {
    pub fn new(
        sensor: &BinarySensor,
        clock: Rc<dyn Clock>,
        min_length: u32,
        max_length: u32,
    ) -> Rc<Self> {
        let this = Rc::new(Self {
            trigger: Trigger::new(),
            clock,
            min_length,
            max_length,
            last_on: Cell::new(None),
            first_click_end: Cell::new(None),
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

    fn in_window(&self, length: u64) -> bool {
        (u64::from(self.min_length)..=u64::from(self.max_length)).contains(&length)
    }

    fn on_state(&self, state: bool) {
        let now = self.clock.millis();
        if state {
            if let Some(end) = self.first_click_end.get() {
                if now - end > u64::from(self.max_length) {
                    self.first_click_end.set(None);
                }
            }
            self.last_on.set(Some(now));
            return;
        }

        let Some(on) = self.last_on.take() else {
            return;
        };
        if !self.in_window(now - on) {
            self.first_click_end.set(None);
            return;
        }
        if self.first_click_end.take().is_some() {
            self.trigger.trigger(());
        } else {
            self.first_click_end.set(Some(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esph_automation::actions::LambdaAction;
    use esph_automation::Automation;
    use esph_core::ManualClock;

    fn counter<A: Clone + 'static>(trigger: &Trigger<A>) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let automation = Automation::new(trigger).unwrap();
        let c = count.clone();
        automation.add_action(LambdaAction::new(move |_: &A| c.set(c.get() + 1)));
        count
    }

    #[test]
    fn test_press_release_and_state() {
        let sensor = BinarySensor::new("button");
        let press = PressTrigger::new(&sensor);
        let release = ReleaseTrigger::new(&sensor);
        let state = StateTrigger::new(&sensor);
        let presses = counter(press.as_trigger());
        let releases = counter(release.as_trigger());
        let states = counter(state.as_trigger());

        sensor.publish_state(true);
        sensor.publish_state(true);
        sensor.publish_state(false);

        assert_eq!(presses.get(), 1);
        assert_eq!(releases.get(), 1);
        assert_eq!(states.get(), 2);
    }

    #[test]
    fn test_click_window() {
        let clock = ManualClock::new();
        let sensor = BinarySensor::new("button");
        let click = ClickTrigger::new(&sensor, Rc::new(clock.clone()), 50, 350);
        let clicks = counter(click.as_trigger());

        sensor.publish_state(true);
        clock.advance(100);
        sensor.publish_state(false);
        assert_eq!(clicks.get(), 1);

        sensor.publish_state(true);
        clock.advance(20);
        sensor.publish_state(false);
        sensor.publish_state(true);
        clock.advance(500);
        sensor.publish_state(false);
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn test_double_click() {
        let clock = ManualClock::new();
        let sensor = BinarySensor::new("button");
        let double = DoubleClickTrigger::new(&sensor, Rc::new(clock.clone()), 50, 350);
        let fired = counter(double.as_trigger());

        let click = |hold: u64, gap: u64| {
            sensor.publish_state(true);
            clock.advance(hold);
            sensor.publish_state(false);
            clock.advance(gap);
        };

        click(100, 100);
        assert_eq!(fired.get(), 0);
        click(100, 1000);
        assert_eq!(fired.get(), 1);

        // second press starts too late
        click(100, 500);
        click(100, 100);
        assert_eq!(fired.get(), 1);
        click(100, 100);
        assert_eq!(fired.get(), 2);
    }
}
