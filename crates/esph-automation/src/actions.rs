//! Built-in actions
//!
//! Branching and looping actions own nested [`ActionList`]s. Each execution
//! carries its own arguments through loop bodies and waits, so later steps
//! see the arguments that execution was started with even when executions
//! overlap.

use crate::{Action, ActionList, Condition, Next, TemplatableValue};
use esph_core::{ComponentId, Scheduler};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

// ============================================================================
// Lambda
// ============================================================================

/// Runs a closure synchronously
pub struct LambdaAction<A> {
    f: Box<dyn Fn(&A)>,
}

impl<A> LambdaAction<A> {
    pub fn new(f: impl Fn(&A) + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl<A: Clone + 'static> Action<A> for LambdaAction<A> {
    fn play(&self, args: &A) {
        (self.f)(args);
    }
}

// ============================================================================
// Delay
// ============================================================================

/// Waits before continuing
///
/// Every execution gets its own timer, so overlapping executions each wait
/// their full delay. Stopping cancels all of them.
pub struct DelayAction<A> {
    delay: TemplatableValue<u32, A>,
    scheduler: Scheduler,
    id: ComponentId,
    pending: Rc<RefCell<BTreeSet<u64>>>,
    next_seq: Cell<u64>,
}

impl<A> DelayAction<A> {
    pub fn new(scheduler: &Scheduler, delay: impl Into<TemplatableValue<u32, A>>) -> Self {
        Self {
            delay: delay.into(),
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            pending: Rc::new(RefCell::new(BTreeSet::new())),
            next_seq: Cell::new(0),
        }
    }

    /// Timers currently waiting to fire
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }
}

fn delay_name(seq: u64) -> String {
    format!("delay#{seq}")
}

impl<A: Clone + 'static> Action<A> for DelayAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        let delay = self.delay.value(&args);
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.pending.borrow_mut().insert(seq);
        trace!(component = %self.id, delay, "Delaying execution");

        let pending = self.pending.clone();
        let next = next.clone();
        self.scheduler
            .set_timeout(self.id, &delay_name(seq), delay, move || {
                pending.borrow_mut().remove(&seq);
                next.resume(args);
            });
    }

    fn stop(&self) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for seq in pending {
            self.scheduler.cancel_timeout(self.id, &delay_name(seq));
        }
    }
}

// ============================================================================
// If
// ============================================================================

/// Plays `then` or `else` depending on a condition, then continues
///
/// An empty branch continues directly with the next action.
pub struct IfAction<A: Clone + 'static> {
    condition: Box<dyn Condition<A>>,
    then_actions: ActionList<A>,
    else_actions: ActionList<A>,
}

impl<A: Clone + 'static> IfAction<A> {
    pub fn new(condition: impl Condition<A> + 'static) -> Self {
        Self {
            condition: Box::new(condition),
            then_actions: ActionList::new(),
            else_actions: ActionList::new(),
        }
    }

    pub fn add_then(&self, action: impl Action<A> + 'static) {
        self.then_actions.add_action(action);
    }

    pub fn add_else(&self, action: impl Action<A> + 'static) {
        self.else_actions.add_action(action);
    }

    pub fn then_actions(&self) -> &ActionList<A> {
        &self.then_actions
    }

    pub fn else_actions(&self) -> &ActionList<A> {
        &self.else_actions
    }
}

impl<A: Clone + 'static> Action<A> for IfAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        let branch = if self.condition.check(&args) {
            &self.then_actions
        } else {
            &self.else_actions
        };
        if branch.is_empty() {
            next.resume(args);
            return;
        }

        let next = next.clone();
        branch.set_tail(move |args| next.resume(args));
        branch.play(args);
    }

    fn stop(&self) {
        self.then_actions.stop();
        self.else_actions.stop();
    }
}

// ============================================================================
// While
// ============================================================================

/// Continuation of the node a loop was entered from
struct LoopState<A: Clone + 'static> {
    next: RefCell<Option<Next<A>>>,
}

impl<A: Clone + 'static> LoopState<A> {
    fn new() -> Self {
        Self {
            next: RefCell::new(None),
        }
    }

    fn enter(&self, next: &Next<A>) {
        *self.next.borrow_mut() = Some(next.clone());
    }

    fn next(&self) -> Option<Next<A>> {
        self.next.borrow().clone()
    }
}

struct WhileInner<A: Clone + 'static> {
    condition: Box<dyn Condition<A>>,
    body: ActionList<A>,
    state: LoopState<A>,
}

impl<A: Clone + 'static> WhileInner<A> {
    fn body_finished(&self, args: A) {
        let Some(next) = self.state.next() else {
            return;
        };
        if next.is_live() && self.condition.check(&args) {
            self.body.play(args);
        } else {
            next.resume(args);
        }
    }
}

/// Repeats its body while a condition holds
///
/// The condition is checked with the execution's own arguments, before the
/// first iteration and after each one. Entering while the condition is false
/// stops a body that is still running from an earlier entry.
pub struct WhileAction<A: Clone + 'static> {
    inner: Rc<WhileInner<A>>,
}

impl<A: Clone + 'static> WhileAction<A> {
    pub fn new(condition: impl Condition<A> + 'static) -> Self {
        let inner = Rc::new(WhileInner {
            condition: Box::new(condition),
            body: ActionList::new(),
            state: LoopState::new(),
        });
        let weak: Weak<WhileInner<A>> = Rc::downgrade(&inner);
        inner.body.set_tail(move |args| {
            if let Some(inner) = weak.upgrade() {
                inner.body_finished(args);
            }
        });
        Self { inner }
    }

    pub fn add_then(&self, action: impl Action<A> + 'static) {
        self.inner.body.add_action(action);
    }
}

impl<A: Clone + 'static> Action<A> for WhileAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        self.inner.state.enter(next);

        if !self.inner.condition.check(&args) {
            self.inner.body.stop();
            next.resume(args);
            return;
        }
        if self.inner.body.is_empty() {
            warn!("While loop has no actions, skipping");
            next.resume(args);
            return;
        }
        self.inner.body.play(args);
    }

    fn stop(&self) {
        self.inner.body.stop();
    }
}

// ============================================================================
// Repeat
// ============================================================================

struct RepeatInner<A: Clone + 'static> {
    count: TemplatableValue<u32, A>,
    body: ActionList<(u32, A)>,
    state: LoopState<A>,
}

impl<A: Clone + 'static> RepeatInner<A> {
    fn iteration_finished(&self, iteration: u32, args: A) {
        let Some(next) = self.state.next() else {
            return;
        };
        if !next.is_live() {
            return;
        }
        let iteration = iteration + 1;
        if iteration >= self.count.value(&args) {
            next.resume(args);
        } else {
            self.body.play((iteration, args));
        }
    }
}

/// Plays its body `count` times
///
/// Body actions receive the zero-based iteration index alongside the
/// trigger arguments.
pub struct RepeatAction<A: Clone + 'static> {
    inner: Rc<RepeatInner<A>>,
}

impl<A: Clone + 'static> RepeatAction<A> {
    pub fn new(count: impl Into<TemplatableValue<u32, A>>) -> Self {
        let inner = Rc::new(RepeatInner {
            count: count.into(),
            body: ActionList::new(),
            state: LoopState::new(),
        });
        let weak: Weak<RepeatInner<A>> = Rc::downgrade(&inner);
        inner.body.set_tail(move |(iteration, args)| {
            if let Some(inner) = weak.upgrade() {
                inner.iteration_finished(iteration, args);
            }
        });
        Self { inner }
    }

    pub fn add_then(&self, action: impl Action<(u32, A)> + 'static) {
        self.inner.body.add_action(action);
    }
}

impl<A: Clone + 'static> Action<A> for RepeatAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        self.inner.state.enter(next);
        if self.inner.count.value(&args) > 0 {
            self.inner.body.play((0, args));
        } else {
            next.resume(args);
        }
    }

    fn stop(&self) {
        self.inner.body.stop();
    }
}

// ============================================================================
// Wait until
// ============================================================================

struct Waiter<A: Clone + 'static> {
    seq: u64,
    args: A,
    next: Next<A>,
}

struct WaitUntilInner<A: Clone + 'static> {
    condition: Box<dyn Condition<A>>,
    timeout: RefCell<TemplatableValue<u32, A>>,
    scheduler: Scheduler,
    id: ComponentId,
    waiters: RefCell<Vec<Waiter<A>>>,
    next_seq: Cell<u64>,
    polling: Cell<bool>,
}

fn timeout_name(seq: u64) -> String {
    format!("timeout#{seq}")
}

impl<A: Clone + 'static> WaitUntilInner<A> {
    fn poll(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for waiter in waiters {
            if !waiter.next.is_live() {
                self.scheduler.cancel_timeout(self.id, &timeout_name(waiter.seq));
            } else if self.condition.check(&waiter.args) {
                ready.push(waiter);
            } else {
                pending.push(waiter);
            }
        }
        {
            let mut waiters = self.waiters.borrow_mut();
            pending.append(&mut waiters);
            *waiters = pending;
        }

        for waiter in ready {
            debug!(component = %self.id, "Wait condition met, continuing");
            self.scheduler.cancel_timeout(self.id, &timeout_name(waiter.seq));
            waiter.next.resume(waiter.args);
        }
        self.stop_polling_if_idle();
    }

    fn timed_out(&self, seq: u64) {
        let waiter = {
            let mut waiters = self.waiters.borrow_mut();
            let index = waiters.iter().position(|w| w.seq == seq);
            index.map(|index| waiters.remove(index))
        };
        if let Some(waiter) = waiter {
            debug!(component = %self.id, "Wait timed out, continuing");
            waiter.next.resume(waiter.args);
        }
        self.stop_polling_if_idle();
    }

    fn stop_polling_if_idle(&self) {
        if self.waiters.borrow().is_empty() && self.polling.replace(false) {
            self.scheduler.cancel_interval(self.id, "wait_until");
        }
    }

    fn finish(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            self.scheduler.cancel_timeout(self.id, &timeout_name(waiter.seq));
        }
        self.polling.set(false);
        self.scheduler.cancel_interval(self.id, "wait_until");
    }
}

/// Suspends the chain until a condition holds
///
/// Continues immediately when the condition is already true. Otherwise the
/// condition is re-checked on every scheduler tick against each waiting
/// execution's own arguments. An optional timeout continues an execution
/// even if the condition never becomes true for it.
pub struct WaitUntilAction<A: Clone + 'static> {
    inner: Rc<WaitUntilInner<A>>,
}

impl<A: Clone + 'static> WaitUntilAction<A> {
    pub fn new(scheduler: &Scheduler, condition: impl Condition<A> + 'static) -> Self {
        Self {
            inner: Rc::new(WaitUntilInner {
                condition: Box::new(condition),
                timeout: RefCell::new(TemplatableValue::None),
                scheduler: scheduler.clone(),
                id: ComponentId::next(),
                waiters: RefCell::new(Vec::new()),
                next_seq: Cell::new(0),
                polling: Cell::new(false),
            }),
        }
    }

    /// Give up waiting after `timeout` milliseconds
    pub fn set_timeout(&self, timeout: impl Into<TemplatableValue<u32, A>>) {
        *self.inner.timeout.borrow_mut() = timeout.into();
    }

    /// Whether an execution is currently suspended here
    pub fn is_waiting(&self) -> bool {
        !self.inner.waiters.borrow().is_empty()
    }
}

impl<A: Clone + 'static> Action<A> for WaitUntilAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        if self.inner.condition.check(&args) {
            next.resume(args);
            return;
        }

        let inner = &self.inner;
        let seq = inner.next_seq.get();
        inner.next_seq.set(seq + 1);

        let timeout = inner.timeout.borrow().optional_value(&args);
        if let Some(timeout) = timeout {
            let weak = Rc::downgrade(inner);
            inner
                .scheduler
                .set_timeout(inner.id, &timeout_name(seq), timeout, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.timed_out(seq);
                    }
                });
        }

        inner.waiters.borrow_mut().push(Waiter {
            seq,
            args,
            next: next.clone(),
        });
        if !inner.polling.replace(true) {
            let weak = Rc::downgrade(inner);
            inner.scheduler.set_interval(inner.id, "wait_until", 0, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.poll();
                }
            });
        }
    }

    fn stop(&self) {
        self.inner.finish();
    }
}
