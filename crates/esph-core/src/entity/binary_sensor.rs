use super::filter::BinarySensorFilter;
use crate::helpers::{fnv1_hash, object_id, Deduplicator};
use crate::CallbackManager;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

struct FilterStage {
    filter: Box<dyn BinarySensorFilter>,
    dedup: Deduplicator<bool>,
}

/// A two-state sensor with an optional filter chain
///
/// Published values flow through the filters in the order they were added.
/// Each filter drops outputs equal to its previous output, and the sensor
/// itself only notifies callbacks when the filtered state changes.
pub struct BinarySensor {
    name: String,
    object_id: String,
    state: Cell<bool>,
    has_state: Cell<bool>,
    publish_initial_state: Cell<bool>,
    filters: RefCell<Vec<Rc<FilterStage>>>,
    state_callback: CallbackManager<bool>,
    weak_self: Weak<BinarySensor>,
}

impl BinarySensor {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        Rc::new_cyclic(|weak_self| Self {
            object_id: object_id(&name),
            name,
            state: Cell::new(false),
            has_state: Cell::new(false),
            publish_initial_state: Cell::new(false),
            filters: RefCell::new(Vec::new()),
            state_callback: CallbackManager::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn object_id_hash(&self) -> u32 {
        fnv1_hash(&self.object_id)
    }

    pub fn state(&self) -> bool {
        self.state.get()
    }

    pub fn has_state(&self) -> bool {
        self.has_state.get()
    }

    /// Whether [`publish_initial_state`](Self::publish_initial_state) notifies callbacks
    pub fn set_publish_initial_state(&self, publish: bool) {
        self.publish_initial_state.set(publish);
    }

    /// Append a filter to the end of the chain
    pub fn add_filter(&self, filter: impl BinarySensorFilter + 'static) {
        self.filters.borrow_mut().push(Rc::new(FilterStage {
            filter: Box::new(filter),
            dedup: Deduplicator::new(),
        }));
    }

    pub fn add_on_state_callback(&self, callback: impl Fn(bool) + 'static) {
        self.state_callback.add(callback);
    }

    /// Publish a new raw state
    pub fn publish_state(&self, state: bool) {
        self.filter_input(0, state, false);
    }

    /// Publish the state read at boot
    ///
    /// The value is stored but callbacks only run when the sensor was
    /// configured with `set_publish_initial_state(true)`.
    pub fn publish_initial_state(&self, state: bool) {
        self.filter_input(0, state, true);
    }

    fn filter_input(&self, index: usize, value: bool, is_initial: bool) {
        let stage = self.filters.borrow().get(index).cloned();
        let Some(stage) = stage else {
            self.send_state_internal(value, is_initial);
            return;
        };

        let output = FilterOutput {
            sensor: self.weak_self.clone(),
            index,
        };
        if let Some(out) = stage.filter.new_value(value, is_initial, &output) {
            output.emit(out, is_initial);
        }
    }

    fn filter_output(&self, index: usize, value: bool, is_initial: bool) {
        let stage = self.filters.borrow().get(index).cloned();
        if let Some(stage) = stage {
            if !stage.dedup.next(value) {
                return;
            }
        }
        self.filter_input(index + 1, value, is_initial);
    }

    fn send_state_internal(&self, state: bool, is_initial: bool) {
        if self.has_state.get() && self.state.get() == state {
            return;
        }
        self.has_state.set(true);
        self.state.set(state);

        if is_initial {
            debug!("'{}': Sending initial state {}", self.name, on_off(state));
            if !self.publish_initial_state.get() {
                return;
            }
        } else {
            debug!("'{}': Sending state {}", self.name, on_off(state));
        }
        self.state_callback.call(state);
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

/// Where a filter sends its output
///
/// Timer-based filters keep a clone and emit when their timer fires.
#[derive(Clone)]
pub struct FilterOutput {
    sensor: Weak<BinarySensor>,
    index: usize,
}

impl FilterOutput {
    /// Pass `value` to the next filter, or to the sensor after the last one
    pub fn emit(&self, value: bool, is_initial: bool) {
        if let Some(sensor) = self.sensor.upgrade() {
            sensor.filter_output(self.index, value, is_initial);
        }
    }
}
