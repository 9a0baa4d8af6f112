//! Conditions
//!
//! A condition is a synchronous predicate over the arguments an automation
//! was triggered with.

use crate::TemplatableValue;
use esph_core::{ComponentId, Scheduler};
use std::cell::Cell;
use std::rc::Rc;

/// Predicate evaluated against trigger arguments
pub trait Condition<A> {
    fn check(&self, args: &A) -> bool;
}

impl<A, C: Condition<A> + ?Sized> Condition<A> for Rc<C> {
    fn check(&self, args: &A) -> bool {
        (**self).check(args)
    }
}

impl<A, C: Condition<A> + ?Sized> Condition<A> for Box<C> {
    fn check(&self, args: &A) -> bool {
        (**self).check(args)
    }
}

/// True when every sub-condition is true; stops at the first false one
pub struct AndCondition<A> {
    conditions: Vec<Box<dyn Condition<A>>>,
}

impl<A> AndCondition<A> {
    pub fn new(conditions: Vec<Box<dyn Condition<A>>>) -> Self {
        Self { conditions }
    }
}

impl<A> Condition<A> for AndCondition<A> {
    fn check(&self, args: &A) -> bool {
        self.conditions.iter().all(|c| c.check(args))
    }
}

/// True when any sub-condition is true; stops at the first true one
pub struct OrCondition<A> {
    conditions: Vec<Box<dyn Condition<A>>>,
}

impl<A> OrCondition<A> {
    pub fn new(conditions: Vec<Box<dyn Condition<A>>>) -> Self {
        Self { conditions }
    }
}

impl<A> Condition<A> for OrCondition<A> {
    fn check(&self, args: &A) -> bool {
        self.conditions.iter().any(|c| c.check(args))
    }
}

/// True when exactly one sub-condition is true
///
/// Every sub-condition is evaluated.
pub struct XorCondition<A> {
    conditions: Vec<Box<dyn Condition<A>>>,
}

impl<A> XorCondition<A> {
    pub fn new(conditions: Vec<Box<dyn Condition<A>>>) -> Self {
        Self { conditions }
    }
}

impl<A> Condition<A> for XorCondition<A> {
    fn check(&self, args: &A) -> bool {
        self.conditions.iter().filter(|c| c.check(args)).count() == 1
    }
}

pub struct NotCondition<A> {
    condition: Box<dyn Condition<A>>,
}

impl<A> NotCondition<A> {
    pub fn new(condition: impl Condition<A> + 'static) -> Self {
        Self {
            condition: Box::new(condition),
        }
    }
}

impl<A> Condition<A> for NotCondition<A> {
    fn check(&self, args: &A) -> bool {
        !self.condition.check(args)
    }
}

pub struct LambdaCondition<A> {
    f: Box<dyn Fn(&A) -> bool>,
}

impl<A> LambdaCondition<A> {
    pub fn new(f: impl Fn(&A) -> bool + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl<A> Condition<A> for LambdaCondition<A> {
    fn check(&self, args: &A) -> bool {
        (self.f)(args)
    }
}

struct ForState {
    condition: Box<dyn Condition<()>>,
    last_inactive: Cell<u64>,
    scheduler: Scheduler,
}

impl ForState {
    fn check_internal(&self) -> bool {
        let active = self.condition.check(&());
        if !active {
            self.last_inactive.set(self.scheduler.millis());
        }
        active
    }
}

/// True once the inner condition has held continuously for `time` ms
///
/// The inner condition is polled on every scheduler tick, not just when
/// someone calls [`check`](Condition::check), so the time it last failed
/// stays accurate. The poll is cancelled when the condition is dropped.
pub struct ForCondition<A> {
    state: Rc<ForState>,
    time: TemplatableValue<u32, A>,
    id: ComponentId,
}

impl<A> ForCondition<A> {
    pub fn new(
        scheduler: &Scheduler,
        condition: impl Condition<()> + 'static,
        time: impl Into<TemplatableValue<u32, A>>,
    ) -> Self {
        let id = ComponentId::next();
        let state = Rc::new(ForState {
            condition: Box::new(condition),
            last_inactive: Cell::new(scheduler.millis()),
            scheduler: scheduler.clone(),
        });

        let weak = Rc::downgrade(&state);
        scheduler.set_interval(id, "for", 0, move || {
            if let Some(state) = weak.upgrade() {
                state.check_internal();
            }
        });

        Self {
            state,
            time: time.into(),
            id,
        }
    }
}

impl<A> Condition<A> for ForCondition<A> {
    fn check(&self, args: &A) -> bool {
        if !self.state.check_internal() {
            return false;
        }
        let held = self.state.scheduler.millis() - self.state.last_inactive.get();
        held >= u64::from(self.time.value(args))
    }
}

impl<A> Drop for ForCondition<A> {
    fn drop(&mut self) {
        self.state.scheduler.cancel_interval(self.id, "for");
    }
}
