//! Execution behaviour of action chains driven by a manual clock

use esph_automation::actions::{
    DelayAction, IfAction, LambdaAction, RepeatAction, WaitUntilAction, WhileAction,
};
use esph_automation::condition::LambdaCondition;
use esph_automation::{Automation, Trigger};
use esph_core::{ManualClock, Scheduler};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

struct Harness {
    clock: ManualClock,
    scheduler: Scheduler,
    trigger: Trigger<(u32,)>,
    log: Log,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new();
        let scheduler = Scheduler::new(Rc::new(clock.clone()));
        Self {
            clock,
            scheduler,
            trigger: Trigger::new(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn record(&self, label: &'static str) -> LambdaAction<(u32,)> {
        let log = self.log.clone();
        LambdaAction::new(move |(v,): &(u32,)| log.borrow_mut().push(format!("{label}:{v}")))
    }

    fn advance(&self, ms: u64) {
        self.clock.advance(ms);
        self.scheduler.call();
    }

    fn entries(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

// ============================================================================
// Delay
// ============================================================================

#[test]
fn test_delay_counts_overlapping_executions() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    automation.add_action(h.record("start"));
    automation.add_action(DelayAction::new(&h.scheduler, 100));
    automation.add_action(h.record("end"));

    h.trigger.trigger((1,));
    h.advance(30);
    h.trigger.trigger((2,));
    h.advance(30);
    h.trigger.trigger((3,));
    assert_eq!(automation.num_running(), 3);

    h.advance(40);
    assert_eq!(automation.num_running(), 2);
    h.advance(30);
    assert_eq!(automation.num_running(), 1);
    h.advance(30);
    assert_eq!(automation.num_running(), 0);
    assert!(!automation.is_running());

    assert_eq!(
        h.entries(),
        vec!["start:1", "start:2", "start:3", "end:1", "end:2", "end:3"]
    );
}

#[test]
fn test_delay_uses_templated_value() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    automation.add_action(DelayAction::new(
        &h.scheduler,
        esph_automation::TemplatableValue::from_fn(|(v,): &(u32,)| v * 10),
    ));
    automation.add_action(h.record("done"));

    h.trigger.trigger((5,));
    h.advance(49);
    assert!(h.entries().is_empty());
    h.advance(1);
    assert_eq!(h.entries(), vec!["done:5"]);
}

#[test]
fn test_stop_cancels_pending_delays() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    automation.add_action(DelayAction::new(&h.scheduler, 100));
    automation.add_action(h.record("end"));

    h.trigger.trigger((1,));
    h.trigger.trigger((2,));
    assert_eq!(h.scheduler.pending(), 2);

    automation.stop();
    assert_eq!(automation.num_running(), 0);
    assert_eq!(h.scheduler.pending(), 0);

    h.advance(1_000);
    assert!(h.entries().is_empty());

    // The chain is usable again after a stop
    h.trigger.trigger((3,));
    h.advance(100);
    assert_eq!(h.entries(), vec!["end:3"]);
}

// ============================================================================
// If
// ============================================================================

#[test]
fn test_if_plays_exactly_one_path() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();

    let branch = IfAction::new(LambdaCondition::new(|(v,): &(u32,)| v % 2 == 0));
    branch.add_then(h.record("even"));
    branch.add_else(h.record("odd"));
    automation.add_action(branch);
    automation.add_action(h.record("next"));

    h.trigger.trigger((2,));
    h.trigger.trigger((3,));
    assert_eq!(h.entries(), vec!["even:2", "next:2", "odd:3", "next:3"]);
    assert!(!automation.is_running());
}

#[test]
fn test_if_with_empty_branch_falls_through() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();

    let branch = IfAction::new(LambdaCondition::new(|(v,): &(u32,)| *v > 10));
    branch.add_then(h.record("big"));
    automation.add_action(branch);
    automation.add_action(h.record("next"));

    h.trigger.trigger((1,));
    assert_eq!(h.entries(), vec!["next:1"]);
}

#[test]
fn test_if_branch_with_delay_holds_execution() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();

    let branch = IfAction::new(LambdaCondition::new(|_: &(u32,)| true));
    branch.add_then(DelayAction::new(&h.scheduler, 50));
    automation.add_action(branch);
    automation.add_action(h.record("next"));

    h.trigger.trigger((4,));
    assert!(automation.is_running());
    assert_eq!(automation.num_running(), 1);

    h.advance(50);
    assert_eq!(h.entries(), vec!["next:4"]);
    assert!(!automation.is_running());
}

#[test]
fn test_stop_propagates_into_branches() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();

    let branch = IfAction::new(LambdaCondition::new(|_: &(u32,)| true));
    branch.add_then(DelayAction::new(&h.scheduler, 50));
    automation.add_action(branch);
    automation.add_action(h.record("next"));

    h.trigger.trigger((4,));
    automation.stop();
    assert_eq!(h.scheduler.pending(), 0);

    h.advance(100);
    assert!(h.entries().is_empty());
}

// ============================================================================
// While / Repeat
// ============================================================================

#[test]
fn test_while_runs_body_k_times() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let remaining = Rc::new(Cell::new(3));

    let r = remaining.clone();
    let looped = WhileAction::new(LambdaCondition::new(move |_: &(u32,)| {
        if r.get() == 0 {
            return false;
        }
        r.set(r.get() - 1);
        true
    }));
    looped.add_then(h.record("body"));
    automation.add_action(looped);
    automation.add_action(h.record("after"));

    h.trigger.trigger((9,));
    assert_eq!(h.entries(), vec!["body:9", "body:9", "body:9", "after:9"]);
    assert!(!automation.is_running());
}

#[test]
fn test_while_with_async_body_replays_captured_arguments() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let iterations = Rc::new(Cell::new(0));

    let i = iterations.clone();
    let looped = WhileAction::new(LambdaCondition::new(move |_: &(u32,)| i.get() < 2));
    let i = iterations.clone();
    looped.add_then(LambdaAction::new(move |_: &(u32,)| i.set(i.get() + 1)));
    looped.add_then(DelayAction::new(&h.scheduler, 10));
    looped.add_then(h.record("body"));
    automation.add_action(looped);
    automation.add_action(h.record("after"));

    h.trigger.trigger((7,));
    h.advance(10);
    h.advance(10);
    assert_eq!(h.entries(), vec!["body:7", "body:7", "after:7"]);
}

#[test]
fn test_while_false_on_entry_falls_through() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let looped = WhileAction::new(LambdaCondition::new(|_: &(u32,)| false));
    looped.add_then(h.record("body"));
    automation.add_action(looped);
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    assert_eq!(h.entries(), vec!["after:1"]);
}

#[test]
fn test_repeat_passes_iteration_index() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let repeat = RepeatAction::new(3);
    let log = h.log.clone();
    repeat.add_then(LambdaAction::new(move |(i, (v,)): &(u32, (u32,))| {
        log.borrow_mut().push(format!("iter{i}:{v}"))
    }));
    automation.add_action(repeat);
    automation.add_action(h.record("after"));

    h.trigger.trigger((5,));
    assert_eq!(h.entries(), vec!["iter0:5", "iter1:5", "iter2:5", "after:5"]);
}

#[test]
fn test_repeat_zero_times() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let repeat = RepeatAction::new(esph_automation::TemplatableValue::from_fn(
        |(v,): &(u32,)| *v,
    ));
    let log = h.log.clone();
    repeat.add_then(LambdaAction::new(move |_: &(u32, (u32,))| {
        log.borrow_mut().push("body".to_string())
    }));
    automation.add_action(repeat);
    automation.add_action(h.record("after"));

    h.trigger.trigger((0,));
    assert_eq!(h.entries(), vec!["after:0"]);
}

#[test]
fn test_overlapping_repeats_keep_their_own_arguments() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let repeat = RepeatAction::new(1);
    repeat.add_then(DelayAction::new(&h.scheduler, 100));
    automation.add_action(repeat);
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    h.advance(50);
    h.trigger.trigger((2,));
    h.advance(50);
    assert_eq!(h.entries(), vec!["after:1"]);
    h.advance(50);
    assert_eq!(h.entries(), vec!["after:1", "after:2"]);
    assert!(!automation.is_running());
}

#[test]
fn test_overlapping_whiles_keep_their_own_arguments() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let rounds = Rc::new(RefCell::new(std::collections::HashMap::new()));
    let r = rounds.clone();
    let looped = WhileAction::new(LambdaCondition::new(move |(v,): &(u32,)| {
        let mut rounds = r.borrow_mut();
        let round = rounds.entry(*v).or_insert(0u32);
        *round += 1;
        *round <= 1
    }));
    looped.add_then(DelayAction::new(&h.scheduler, 100));
    automation.add_action(looped);
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    h.advance(50);
    h.trigger.trigger((2,));
    h.advance(50);
    assert_eq!(h.entries(), vec!["after:1"]);
    h.advance(50);
    assert_eq!(h.entries(), vec!["after:1", "after:2"]);
}

// ============================================================================
// Wait until
// ============================================================================

#[test]
fn test_wait_until_passes_through_when_condition_holds() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    automation.add_action(WaitUntilAction::new(
        &h.scheduler,
        LambdaCondition::new(|_: &(u32,)| true),
    ));
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    assert_eq!(h.entries(), vec!["after:1"]);
    assert_eq!(h.scheduler.pending(), 0);
}

#[test]
fn test_wait_until_polls_each_tick() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let ready = Rc::new(Cell::new(false));
    let r = ready.clone();
    automation.add_action(WaitUntilAction::new(
        &h.scheduler,
        LambdaCondition::new(move |_: &(u32,)| r.get()),
    ));
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    h.advance(0);
    h.advance(0);
    assert!(automation.is_running());
    assert!(h.entries().is_empty());

    ready.set(true);
    h.advance(0);
    assert_eq!(h.entries(), vec!["after:1"]);
    assert!(!automation.is_running());

    // Poll is torn down once nothing waits
    h.advance(0);
    assert_eq!(h.scheduler.pending(), 0);
}

#[test]
fn test_wait_until_timeout_continues() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let wait = WaitUntilAction::new(&h.scheduler, LambdaCondition::new(|_: &(u32,)| false));
    wait.set_timeout(500);
    automation.add_action(wait);
    automation.add_action(h.record("after"));

    h.trigger.trigger((2,));
    h.advance(499);
    assert!(h.entries().is_empty());
    h.advance(1);
    assert_eq!(h.entries(), vec!["after:2"]);
    assert!(!automation.is_running());
}

#[test]
fn test_stop_halts_wait_until() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let ready = Rc::new(Cell::new(false));
    let r = ready.clone();
    automation.add_action(WaitUntilAction::new(
        &h.scheduler,
        LambdaCondition::new(move |_: &(u32,)| r.get()),
    ));
    automation.add_action(h.record("after"));

    h.trigger.trigger((1,));
    h.advance(0);
    automation.stop();
    assert_eq!(h.scheduler.pending(), 0);

    ready.set(true);
    h.advance(0);
    assert!(h.entries().is_empty());
}

#[test]
fn test_overlapping_waits_resume_with_their_own_arguments() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let level = Rc::new(Cell::new(0));
    let l = level.clone();
    automation.add_action(WaitUntilAction::new(
        &h.scheduler,
        LambdaCondition::new(move |(v,): &(u32,)| *v <= l.get()),
    ));
    automation.add_action(h.record("after"));

    h.trigger.trigger((2,));
    h.trigger.trigger((1,));
    h.advance(0);
    assert!(h.entries().is_empty());

    level.set(1);
    h.advance(0);
    assert_eq!(h.entries(), vec!["after:1"]);
    assert_eq!(automation.num_running(), 1);

    level.set(2);
    h.advance(0);
    assert_eq!(h.entries(), vec!["after:1", "after:2"]);
    assert!(!automation.is_running());
}

#[test]
fn test_overlapping_wait_timeouts_are_independent() {
    let h = Harness::new();
    let automation = Automation::new(&h.trigger).unwrap();
    let wait = WaitUntilAction::new(&h.scheduler, LambdaCondition::new(|_: &(u32,)| false));
    wait.set_timeout(esph_automation::TemplatableValue::from_fn(
        |(v,): &(u32,)| v * 100,
    ));
    automation.add_action(wait);
    automation.add_action(h.record("after"));

    h.trigger.trigger((3,));
    h.trigger.trigger((1,));
    h.advance(100);
    assert_eq!(h.entries(), vec!["after:1"]);
    h.advance(200);
    assert_eq!(h.entries(), vec!["after:1", "after:3"]);
    assert!(!automation.is_running());
    assert_eq!(h.scheduler.pending(), 0);
}
