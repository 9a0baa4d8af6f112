use crate::helpers::{fnv1_hash, object_id};
use crate::CallbackManager;
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

/// A numeric sensor
///
/// Unlike [`BinarySensor`](super::BinarySensor), every publish reaches the
/// callbacks, including repeats of the same value.
#[derive(Debug)]
pub struct Sensor {
    name: String,
    object_id: String,
    unit_of_measurement: Option<String>,
    state: Cell<f32>,
    raw_state: Cell<f32>,
    has_state: Cell<bool>,
    state_callback: CallbackManager<f32>,
    raw_callback: CallbackManager<f32>,
}

impl Sensor {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        Rc::new(Self {
            object_id: object_id(&name),
            name,
            unit_of_measurement: None,
            state: Cell::new(f32::NAN),
            raw_state: Cell::new(f32::NAN),
            has_state: Cell::new(false),
            state_callback: CallbackManager::new(),
            raw_callback: CallbackManager::new(),
        })
    }

    pub fn with_unit(name: impl Into<String>, unit: impl Into<String>) -> Rc<Self> {
        let mut sensor = Self::new(name);
        if let Some(s) = Rc::get_mut(&mut sensor) {
            s.unit_of_measurement = Some(unit.into());
        }
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Stable hash of the object id, used as a preference key
    pub fn object_id_hash(&self) -> u32 {
        fnv1_hash(&self.object_id)
    }

    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.unit_of_measurement.as_deref()
    }

    /// Last published value, NaN before the first publish
    pub fn state(&self) -> f32 {
        self.state.get()
    }

    pub fn raw_state(&self) -> f32 {
        self.raw_state.get()
    }

    pub fn has_state(&self) -> bool {
        self.has_state.get()
    }

    pub fn publish_state(&self, value: f32) {
        self.raw_state.set(value);
        self.raw_callback.call(value);

        debug!(
            "'{}': Sending state {:.2} {}",
            self.name,
            value,
            self.unit_of_measurement.as_deref().unwrap_or("")
        );
        self.state.set(value);
        self.has_state.set(true);
        self.state_callback.call(value);
    }

    pub fn add_on_state_callback(&self, callback: impl Fn(f32) + 'static) {
        self.state_callback.add(callback);
    }

    pub fn add_on_raw_state_callback(&self, callback: impl Fn(f32) + 'static) {
        self.raw_callback.add(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_publish_reaches_callbacks_without_dedup() {
        let sensor = Sensor::with_unit("Outside Temperature", "°C");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let raw = Rc::new(Cell::new(0));

        let s = seen.clone();
        sensor.add_on_state_callback(move |v| s.borrow_mut().push(v));
        let r = raw.clone();
        sensor.add_on_raw_state_callback(move |_| r.set(r.get() + 1));

        assert!(!sensor.has_state());
        assert!(sensor.state().is_nan());

        sensor.publish_state(21.5);
        sensor.publish_state(21.5);

        assert_eq!(*seen.borrow(), vec![21.5, 21.5]);
        assert_eq!(raw.get(), 2);
        assert!(sensor.has_state());
        assert_eq!(sensor.state(), 21.5);
        assert_eq!(sensor.unit_of_measurement(), Some("°C"));
    }

    #[test]
    fn test_object_id_hash_is_stable() {
        let a = Sensor::new("Outside Temperature");
        let b = Sensor::new("Outside Temperature");
        assert_eq!(a.object_id(), "outside_temperature");
        assert_eq!(a.object_id_hash(), b.object_id_hash());
        assert_eq!(a.object_id_hash(), fnv1_hash("outside_temperature"));
    }
}
