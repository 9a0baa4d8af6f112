//! Cooperative timer service
//!
//! The scheduler owns every pending timeout and interval. Timers are keyed by
//! `(ComponentId, name)`: registering a timer under a name that is already in
//! use for the same owner replaces the earlier registration. An empty name
//! registers an anonymous timer that cannot be cancelled.
//!
//! Nothing runs on its own. [`Scheduler::call`] executes every timer whose
//! deadline has passed and is expected to be invoked once per application
//! tick. Timers registered while `call()` is running are picked up on the next
//! tick, so a zero-delay interval behaves as a once-per-tick poll.

use crate::{Clock, ComponentId};
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Delay value that registers nothing
pub const SCHEDULER_DONT_RUN: u32 = u32::MAX;

/// Outcome of one retry attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryResult {
    Done,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Timeout,
    Interval,
}

struct SchedulerItem {
    owner: ComponentId,
    name: String,
    kind: ItemKind,
    interval: u32,
    removed: Cell<bool>,
    callback: RefCell<Box<dyn FnMut()>>,
}

impl SchedulerItem {
    fn matches(&self, owner: ComponentId, name: &str, kind: ItemKind) -> bool {
        !self.removed.get()
            && !self.name.is_empty()
            && self.owner == owner
            && self.kind == kind
            && self.name == name
    }
}

struct Entry {
    at: u64,
    seq: u64,
    item: Rc<SchedulerItem>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct SchedulerInner {
    clock: Rc<dyn Clock>,
    items: RefCell<BinaryHeap<Reverse<Entry>>>,
    to_add: RefCell<Vec<Entry>>,
    current: RefCell<Option<Rc<SchedulerItem>>>,
    next_seq: Cell<u64>,
}

/// Handle to the shared timer service
///
/// Cloning is cheap; all clones refer to the same set of timers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler driven by `clock`
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                clock,
                items: RefCell::new(BinaryHeap::new()),
                to_add: RefCell::new(Vec::new()),
                current: RefCell::new(None),
                next_seq: Cell::new(0),
            }),
        }
    }

    /// Current time according to the scheduler's clock
    pub fn millis(&self) -> u64 {
        self.inner.clock.millis()
    }

    /// Run `f` once after `delay` milliseconds
    pub fn set_timeout(
        &self,
        owner: ComponentId,
        name: &str,
        delay: u32,
        f: impl FnOnce() + 'static,
    ) {
        let mut f = Some(f);
        self.set_timer_common(
            owner,
            ItemKind::Timeout,
            name,
            delay,
            Box::new(move || {
                if let Some(f) = f.take() {
                    f();
                }
            }),
        );
    }

    /// Run `f` every `interval` milliseconds until cancelled
    pub fn set_interval(
        &self,
        owner: ComponentId,
        name: &str,
        interval: u32,
        f: impl FnMut() + 'static,
    ) {
        self.set_timer_common(owner, ItemKind::Interval, name, interval, Box::new(f));
    }

    /// Run `f` on the next tick
    pub fn defer(&self, owner: ComponentId, name: &str, f: impl FnOnce() + 'static) {
        self.set_timeout(owner, name, 0, f);
    }

    /// Cancel a pending timeout, returning whether one was found
    pub fn cancel_timeout(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_item(owner, name, ItemKind::Timeout)
    }

    /// Cancel an interval, returning whether one was found
    pub fn cancel_interval(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_item(owner, name, ItemKind::Interval)
    }

    pub fn cancel_defer(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_timeout(owner, name)
    }

    /// Call `f` until it reports [`RetryResult::Done`] or `max_attempts` runs out
    ///
    /// The first attempt runs on the next tick, the second after
    /// `initial_wait_time` milliseconds, and every later wait is the previous
    /// one multiplied by `backoff_increase_factor`. `f` receives the number of
    /// attempts left after the current one.
    pub fn set_retry(
        &self,
        owner: ComponentId,
        name: &str,
        initial_wait_time: u32,
        max_attempts: u8,
        f: impl FnMut(u8) -> RetryResult + 'static,
        backoff_increase_factor: f32,
    ) {
        let retry_name = retry_name(name);
        self.cancel_timeout(owner, &retry_name);
        if initial_wait_time == SCHEDULER_DONT_RUN || max_attempts == 0 {
            return;
        }

        debug!(
            component = %owner,
            name,
            initial_wait_time,
            max_attempts,
            backoff_increase_factor,
            "Scheduling retry"
        );

        let state = Rc::new(RefCell::new(RetryState {
            owner,
            name: retry_name.clone(),
            current_interval: initial_wait_time,
            remaining: max_attempts,
            backoff_increase_factor,
            func: Box::new(f),
        }));
        let weak = Rc::downgrade(&self.inner);
        self.set_timeout(owner, &retry_name, 0, move || retry_step(weak, state));
    }

    pub fn cancel_retry(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_timeout(owner, &retry_name(name))
    }

    /// Execute every timer whose deadline has passed
    ///
    /// Must not be called from inside a timer callback.
    pub fn call(&self) {
        let now = self.millis();
        self.process_to_add();

        loop {
            let entry = {
                let mut items = self.inner.items.borrow_mut();
                match items.peek() {
                    Some(Reverse(top)) if top.at <= now => items.pop().map(|Reverse(e)| e),
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                break;
            };

            let item = entry.item;
            if item.removed.get() {
                continue;
            }
            if item.kind == ItemKind::Timeout {
                item.removed.set(true);
            }

            trace!(
                component = %item.owner,
                name = %item.name,
                kind = ?item.kind,
                "Running scheduled item"
            );

            *self.inner.current.borrow_mut() = Some(item.clone());
            {
                let mut callback = item.callback.borrow_mut();
                (&mut *callback)();
            }
            *self.inner.current.borrow_mut() = None;

            if item.kind == ItemKind::Interval && !item.removed.get() {
                let at = now + u64::from(item.interval);
                self.push(at, item);
            }
        }
    }

    /// Milliseconds until the earliest pending item, `None` if nothing is pending
    pub fn next_schedule_in(&self) -> Option<u64> {
        let now = self.millis();
        let items = self.inner.items.borrow();
        let to_add = self.inner.to_add.borrow();
        items
            .iter()
            .map(|Reverse(e)| e)
            .chain(to_add.iter())
            .filter(|e| !e.item.removed.get())
            .map(|e| e.at)
            .min()
            .map(|at| at.saturating_sub(now))
    }

    /// Number of registered items that have not been cancelled or run
    pub fn pending(&self) -> usize {
        let items = self.inner.items.borrow();
        let to_add = self.inner.to_add.borrow();
        items
            .iter()
            .map(|Reverse(e)| e)
            .chain(to_add.iter())
            .filter(|e| !e.item.removed.get())
            .count()
    }

    fn set_timer_common(
        &self,
        owner: ComponentId,
        kind: ItemKind,
        name: &str,
        delay: u32,
        callback: Box<dyn FnMut()>,
    ) {
        if !name.is_empty() {
            self.cancel_item(owner, name, kind);
        }
        if delay == SCHEDULER_DONT_RUN {
            return;
        }

        trace!(component = %owner, name, delay, kind = ?kind, "Registering scheduled item");

        let item = Rc::new(SchedulerItem {
            owner,
            name: name.to_string(),
            kind,
            interval: delay,
            removed: Cell::new(false),
            callback: RefCell::new(callback),
        });
        let at = self.millis() + u64::from(delay);
        self.push(at, item);
    }

    fn push(&self, at: u64, item: Rc<SchedulerItem>) {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        self.inner.to_add.borrow_mut().push(Entry { at, seq, item });
    }

    fn process_to_add(&self) {
        let added: Vec<Entry> = self.inner.to_add.borrow_mut().drain(..).collect();
        let mut items = self.inner.items.borrow_mut();
        for entry in added {
            if !entry.item.removed.get() {
                items.push(Reverse(entry));
            }
        }
    }

    fn cancel_item(&self, owner: ComponentId, name: &str, kind: ItemKind) -> bool {
        let mut found = false;
        let mut mark = |item: &SchedulerItem| {
            if item.matches(owner, name, kind) {
                item.removed.set(true);
                found = true;
            }
        };

        for Reverse(entry) in self.inner.items.borrow().iter() {
            mark(&entry.item);
        }
        for entry in self.inner.to_add.borrow().iter() {
            mark(&entry.item);
        }
        if let Some(current) = self.inner.current.borrow().as_ref() {
            mark(current);
        }

        if found {
            trace!(component = %owner, name, kind = ?kind, "Cancelled scheduled item");
        }
        found
    }
}

fn retry_name(name: &str) -> String {
    format!("retry${name}")
}

struct RetryState {
    owner: ComponentId,
    name: String,
    current_interval: u32,
    remaining: u8,
    backoff_increase_factor: f32,
    func: Box<dyn FnMut(u8) -> RetryResult>,
}

fn retry_step(scheduler: Weak<SchedulerInner>, state: Rc<RefCell<RetryState>>) {
    let (result, remaining) = {
        let mut s = state.borrow_mut();
        s.remaining = s.remaining.saturating_sub(1);
        let remaining = s.remaining;
        ((s.func)(remaining), remaining)
    };
    if result == RetryResult::Done || remaining == 0 {
        return;
    }
    let Some(inner) = scheduler.upgrade() else {
        return;
    };

    let (owner, name, wait) = {
        let mut s = state.borrow_mut();
        let wait = s.current_interval;
        s.current_interval = (s.current_interval as f32 * s.backoff_increase_factor) as u32;
        (s.owner, s.name.clone(), wait)
    };
    let weak = Rc::downgrade(&inner);
    Scheduler { inner }.set_timeout(owner, &name, wait, move || retry_step(weak, state));
}
