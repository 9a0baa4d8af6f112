//! Binary sensor filters
//!
//! Timer-based filters register named timeouts under their own
//! [`ComponentId`], so a new edge re-arms or cancels the pending one.

use super::FilterOutput;
use crate::{ComponentId, Scheduler};
use std::cell::Cell;
use std::rc::Rc;

/// One stage of a binary sensor's filter chain
pub trait BinarySensorFilter {
    /// Handle a new input value
    ///
    /// Returning `Some` forwards the value immediately. Filters that answer
    /// later keep a clone of `output` and call [`FilterOutput::emit`].
    fn new_value(&self, value: bool, is_initial: bool, output: &FilterOutput) -> Option<bool>;
}

/// Inverts every value
#[derive(Debug, Clone, Copy, Default)]
pub struct InvertFilter;

impl BinarySensorFilter for InvertFilter {
    fn new_value(&self, value: bool, _is_initial: bool, _output: &FilterOutput) -> Option<bool> {
        Some(!value)
    }
}

/// Maps or drops values through a closure
pub struct LambdaFilter {
    f: Box<dyn Fn(bool) -> Option<bool>>,
}

impl LambdaFilter {
    pub fn new(f: impl Fn(bool) -> Option<bool> + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl BinarySensorFilter for LambdaFilter {
    fn new_value(&self, value: bool, _is_initial: bool, _output: &FilterOutput) -> Option<bool> {
        (self.f)(value)
    }
}

/// Delays ON edges; OFF passes through and cancels a pending ON
pub struct DelayedOnFilter {
    scheduler: Scheduler,
    id: ComponentId,
    delay: u32,
}

impl DelayedOnFilter {
    pub fn new(scheduler: &Scheduler, delay: u32) -> Self {
        Self {
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            delay,
        }
    }
}

impl BinarySensorFilter for DelayedOnFilter {
    fn new_value(&self, value: bool, is_initial: bool, output: &FilterOutput) -> Option<bool> {
        if value {
            let output = output.clone();
            self.scheduler
                .set_timeout(self.id, "ON", self.delay, move || output.emit(true, is_initial));
            None
        } else {
            self.scheduler.cancel_timeout(self.id, "ON");
            Some(false)
        }
    }
}

/// Delays OFF edges; ON passes through and cancels a pending OFF
pub struct DelayedOffFilter {
    scheduler: Scheduler,
    id: ComponentId,
    delay: u32,
}

impl DelayedOffFilter {
    pub fn new(scheduler: &Scheduler, delay: u32) -> Self {
        Self {
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            delay,
        }
    }
}

impl BinarySensorFilter for DelayedOffFilter {
    fn new_value(&self, value: bool, is_initial: bool, output: &FilterOutput) -> Option<bool> {
        if value {
            self.scheduler.cancel_timeout(self.id, "OFF");
            Some(true)
        } else {
            let output = output.clone();
            self.scheduler
                .set_timeout(self.id, "OFF", self.delay, move || output.emit(false, is_initial));
            None
        }
    }
}

/// Delays both edges, each with its own delay
pub struct DelayedOnOffFilter {
    scheduler: Scheduler,
    id: ComponentId,
    on_delay: u32,
    off_delay: u32,
}

impl DelayedOnOffFilter {
    pub fn new(scheduler: &Scheduler, on_delay: u32, off_delay: u32) -> Self {
        Self {
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            on_delay,
            off_delay,
        }
    }
}

impl BinarySensorFilter for DelayedOnOffFilter {
    fn new_value(&self, value: bool, is_initial: bool, output: &FilterOutput) -> Option<bool> {
        let delay = if value { self.on_delay } else { self.off_delay };
        let output = output.clone();
        self.scheduler
            .set_timeout(self.id, "ON_OFF", delay, move || output.emit(value, is_initial));
        None
    }
}

/// Passes the first edge immediately, then waits for the input to settle
///
/// After an edge is forwarded, further edges are held until the input has
/// been stable for `delay` milliseconds; the value at that point is emitted.
pub struct SettleFilter {
    scheduler: Scheduler,
    id: ComponentId,
    delay: u32,
    steady: Rc<Cell<bool>>,
}

impl SettleFilter {
    pub fn new(scheduler: &Scheduler, delay: u32) -> Self {
        Self {
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            delay,
            steady: Rc::new(Cell::new(true)),
        }
    }
}

impl BinarySensorFilter for SettleFilter {
    fn new_value(&self, value: bool, is_initial: bool, output: &FilterOutput) -> Option<bool> {
        let steady = self.steady.clone();
        if self.steady.get() {
            self.steady.set(false);
            self.scheduler
                .set_timeout(self.id, "SETTLE", self.delay, move || steady.set(true));
            Some(value)
        } else {
            let output = output.clone();
            self.scheduler.set_timeout(self.id, "SETTLE", self.delay, move || {
                steady.set(true);
                output.emit(value, is_initial);
            });
            None
        }
    }
}
