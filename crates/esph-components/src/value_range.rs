//! Threshold crossing trigger for numeric sensors

use esph_automation::{TemplatableValue, Trigger};
use esph_core::entity::Sensor;
use esph_core::{setup_priority, Component};
use esph_preferences::{PreferenceObject, Preferences, PreferencesExt};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, info};

/// Fires with the sensor value each time it enters `[min, max]`
///
/// A bound that evaluates to NaN is open. The in-range flag is persisted so
/// a value that was already in range before a restart does not fire again.
pub struct ValueRangeTrigger {
    this: Weak<Self>,
    trigger: Trigger<f32>,
    sensor: Rc<Sensor>,
    preferences: Rc<dyn Preferences>,
    min: RefCell<TemplatableValue<f32, f32>>,
    max: RefCell<TemplatableValue<f32, f32>>,
    previous_in_range: Cell<bool>,
    rtc: RefCell<PreferenceObject>,
}

impl ValueRangeTrigger {
    pub fn new(sensor: Rc<Sensor>, preferences: Rc<dyn Preferences>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            trigger: Trigger::new(),
            sensor,
            preferences,
            min: RefCell::new(TemplatableValue::None),
            max: RefCell::new(TemplatableValue::None),
            previous_in_range: Cell::new(false),
            rtc: RefCell::new(PreferenceObject::invalid()),
        })
    }

    pub fn set_min(&self, min: impl Into<TemplatableValue<f32, f32>>) {
        *self.min.borrow_mut() = min.into();
    }

    pub fn set_max(&self, max: impl Into<TemplatableValue<f32, f32>>) {
        *self.max.borrow_mut() = max.into();
    }

    pub fn as_trigger(&self) -> &Trigger<f32> {
        &self.trigger
    }

    pub fn in_range(&self) -> bool {
        self.previous_in_range.get()
    }

    fn on_state(&self, state: f32) {
        if state.is_nan() {
            return;
        }
        let min = self.min.borrow().value_or(&state, f32::NAN);
        let max = self.max.borrow().value_or(&state, f32::NAN);

        let in_range = match (min.is_nan(), max.is_nan()) {
            (true, true) => self.previous_in_range.get(),
            (true, false) => state <= max,
            (false, true) => state >= min,
            (false, false) => min <= state && state <= max,
        };

        let entered = in_range && !self.previous_in_range.get();
        self.previous_in_range.set(in_range);
        self.rtc.borrow().save(&u8::from(in_range));
        if entered {
            debug!(value = state, "Value entered range");
            self.trigger.trigger(state);
        }
    }
}

impl Component for ValueRangeTrigger {
    fn component_name(&self) -> &str {
        "value_range"
    }

    fn setup(&self) {
        let rtc = self
            .preferences
            .make_preference::<u8>(self.sensor.object_id_hash());
        let mut stored = 0u8;
        if rtc.load(&mut stored) {
            self.previous_in_range.set(stored != 0);
        }
        *self.rtc.borrow_mut() = rtc;

        let weak = self.this.clone();
        self.sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                this.on_state(state);
            }
        });
    }

    fn dump_config(&self) {
        info!("Value Range Trigger for '{}'", self.sensor.name());
    }

    fn setup_priority(&self) -> f32 {
        setup_priority::HARDWARE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esph_automation::actions::LambdaAction;
    use esph_automation::Automation;
    use esph_preferences::MemoryPreferences;

    type Fixture = (Rc<Sensor>, Rc<ValueRangeTrigger>, Rc<RefCell<Vec<f32>>>);

    fn setup(prefs: &MemoryPreferences) -> Fixture {
        let sensor = Sensor::new("Tank Level");
        let trigger = ValueRangeTrigger::new(sensor.clone(), Rc::new(prefs.clone()));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        Automation::new(trigger.as_trigger())
            .unwrap()
            .add_action(LambdaAction::new(move |v: &f32| s.borrow_mut().push(*v)));
        (sensor, trigger, seen)
    }

    #[test]
    fn test_fires_on_entering_range() {
        let prefs = MemoryPreferences::new();
        let (sensor, trigger, seen) = setup(&prefs);
        trigger.set_min(10.0);
        trigger.set_max(20.0);
        trigger.setup();

        for v in [5.0, 12.0, 15.0, 25.0, 18.0, f32::NAN, 19.0] {
            sensor.publish_state(v);
        }
        assert_eq!(*seen.borrow(), vec![12.0, 18.0]);
    }

    #[test]
    fn test_open_bounds() {
        let prefs = MemoryPreferences::new();
        let (sensor, trigger, seen) = setup(&prefs);
        trigger.set_max(0.0);
        trigger.setup();

        sensor.publish_state(3.0);
        sensor.publish_state(-1.0);
        sensor.publish_state(-5.0);
        assert_eq!(*seen.borrow(), vec![-1.0]);
    }

    #[test]
    fn test_lambda_bound_sees_value() {
        let prefs = MemoryPreferences::new();
        let (sensor, trigger, seen) = setup(&prefs);
        trigger.set_min(TemplatableValue::from_fn(|_: &f32| 50.0));
        trigger.setup();

        sensor.publish_state(49.0);
        sensor.publish_state(51.0);
        assert_eq!(*seen.borrow(), vec![51.0]);
    }

    #[test]
    fn test_in_range_flag_survives_restart() {
        let prefs = MemoryPreferences::new();
        {
            let (sensor, trigger, _seen) = setup(&prefs);
            trigger.set_min(10.0);
            trigger.setup();
            sensor.publish_state(12.0);
            assert!(trigger.in_range());
        }

        let (sensor, trigger, seen) = setup(&prefs);
        trigger.set_min(10.0);
        trigger.setup();
        assert!(trigger.in_range());
        sensor.publish_state(13.0);
        assert!(seen.borrow().is_empty());
    }
}
