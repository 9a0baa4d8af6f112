//! Timing behaviour of binary sensor filters

use esph_core::entity::filter::{
    DelayedOffFilter, DelayedOnFilter, DelayedOnOffFilter, InvertFilter, SettleFilter,
};
use esph_core::entity::BinarySensor;
use esph_core::{ManualClock, Scheduler};
use std::cell::RefCell;
use std::rc::Rc;

struct Harness {
    clock: ManualClock,
    scheduler: Scheduler,
    sensor: Rc<BinarySensor>,
    seen: Rc<RefCell<Vec<bool>>>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new();
        let scheduler = Scheduler::new(Rc::new(clock.clone()));
        let sensor = BinarySensor::new("Test Input");
        let seen = Rc::new(RefCell::new(Vec::new()));
        Self {
            clock,
            scheduler,
            sensor,
            seen,
        }
    }

    fn listen(&self) {
        let s = self.seen.clone();
        self.sensor.add_on_state_callback(move |v| s.borrow_mut().push(v));
    }

    fn advance(&self, ms: u64) {
        self.clock.advance(ms);
        self.scheduler.call();
    }
}

#[test]
fn test_delayed_on_filters_short_pulses() {
    let h = Harness::new();
    h.sensor.add_filter(DelayedOnFilter::new(&h.scheduler, 100));
    h.listen();

    h.sensor.publish_state(true);
    h.advance(50);
    h.sensor.publish_state(false);
    h.advance(100);
    // Never reached the sensor as ON; OFF is the first real state
    assert_eq!(*h.seen.borrow(), vec![false]);

    h.sensor.publish_state(true);
    h.advance(99);
    assert_eq!(*h.seen.borrow(), vec![false]);
    h.advance(1);
    assert_eq!(*h.seen.borrow(), vec![false, true]);
}

#[test]
fn test_delayed_off_holds_on_state() {
    let h = Harness::new();
    h.sensor.add_filter(DelayedOffFilter::new(&h.scheduler, 200));
    h.listen();

    h.sensor.publish_state(true);
    h.sensor.publish_state(false);
    h.advance(150);
    h.sensor.publish_state(true);
    h.advance(500);
    assert_eq!(*h.seen.borrow(), vec![true]);

    h.sensor.publish_state(false);
    h.advance(200);
    assert_eq!(*h.seen.borrow(), vec![true, false]);
}

#[test]
fn test_delayed_on_off_uses_separate_delays() {
    let h = Harness::new();
    h.sensor.add_filter(DelayedOnOffFilter::new(&h.scheduler, 10, 300));
    h.listen();

    h.sensor.publish_state(true);
    h.advance(10);
    assert_eq!(*h.seen.borrow(), vec![true]);

    h.sensor.publish_state(false);
    h.advance(299);
    assert_eq!(*h.seen.borrow(), vec![true]);
    h.advance(1);
    assert_eq!(*h.seen.borrow(), vec![true, false]);
}

#[test]
fn test_settle_forwards_first_edge_then_waits() {
    let h = Harness::new();
    h.sensor.add_filter(SettleFilter::new(&h.scheduler, 50));
    h.listen();

    h.sensor.publish_state(true);
    assert_eq!(*h.seen.borrow(), vec![true]);

    // Bounce while settling
    h.advance(10);
    h.sensor.publish_state(false);
    h.advance(10);
    h.sensor.publish_state(true);
    h.advance(10);
    h.sensor.publish_state(false);
    assert_eq!(*h.seen.borrow(), vec![true]);

    h.advance(50);
    assert_eq!(*h.seen.borrow(), vec![true, false]);
}

#[test]
fn test_filters_chain_with_timers() {
    let h = Harness::new();
    h.sensor.add_filter(InvertFilter);
    h.sensor.add_filter(DelayedOnFilter::new(&h.scheduler, 20));
    h.listen();

    h.sensor.publish_state(false);
    assert!(h.seen.borrow().is_empty());
    h.advance(20);
    assert_eq!(*h.seen.borrow(), vec![true]);
    assert!(h.sensor.state());
}
