//! Scripts
//!
//! A Script is a named action list that other automations start, stop and
//! wait for. Its run mode decides what happens when it is started while a
//! previous run is still in flight.

use crate::actions::WaitUntilAction;
use crate::condition::NotCondition;
use crate::{Action, ActionList, Condition, Next, Trigger};
use esph_core::{ComponentId, Scheduler};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Script execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptMode {
    /// Default - ignore new calls while running
    #[default]
    Single,

    /// Stop the running instance and start over
    Restart,

    /// Queue calls and run them one after another
    ///
    /// `max_runs` counts the running instance plus the queued ones; 0 means
    /// unlimited.
    Queued { max_runs: usize },

    /// Run all calls simultaneously, up to `max_runs` (0 = unlimited)
    Parallel { max_runs: usize },
}

/// Type-erased control surface of a script
pub trait ScriptControl {
    fn name(&self) -> &str;
    fn is_running(&self) -> bool;
    fn stop(&self);
}

/// A named action list with a run mode
pub struct Script<A: Clone + 'static> {
    name: String,
    mode: ScriptMode,
    trigger: Trigger<A>,
    actions: ActionList<A>,
    queue: RefCell<VecDeque<A>>,
    scheduler: Scheduler,
    id: ComponentId,
    weak_self: Weak<Script<A>>,
}

impl<A: Clone + 'static> Script<A> {
    pub fn new(name: impl Into<String>, mode: ScriptMode, scheduler: &Scheduler) -> Rc<Self> {
        let actions = ActionList::new();
        let trigger = Trigger::new();
        let bound = trigger.bind(actions.clone());
        debug_assert!(bound, "a new trigger has no actions bound");
        Rc::new_cyclic(|weak_self| Self {
            name: name.into(),
            mode,
            trigger,
            actions,
            queue: RefCell::new(VecDeque::new()),
            scheduler: scheduler.clone(),
            id: ComponentId::next(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn mode(&self) -> ScriptMode {
        self.mode
    }

    pub fn add_action(&self, action: impl Action<A> + 'static) {
        self.actions.add_action(action);
    }

    /// Start the script according to its run mode
    pub fn execute(&self, args: A) {
        match self.mode {
            ScriptMode::Single => {
                if self.is_running() {
                    warn!("Script '{}' is already running! (mode: single)", self.name);
                    return;
                }
                self.trigger.trigger(args);
            }
            ScriptMode::Restart => {
                if self.is_running() {
                    debug!("Script '{}' restarting (mode: restart)", self.name);
                    self.trigger.stop_action();
                }
                self.trigger.trigger(args);
            }
            ScriptMode::Queued { max_runs } => {
                let queued = self.queue.borrow().len();
                if self.is_running() || queued > 0 {
                    if max_runs != 0 && queued + 1 >= max_runs {
                        warn!(
                            "Script '{}' maximum number of queued runs exceeded!",
                            self.name
                        );
                        return;
                    }
                    debug!("Script '{}' queueing new instance (mode: queued)", self.name);
                    self.queue.borrow_mut().push_back(args);
                    self.schedule_drain();
                    return;
                }
                self.trigger.trigger(args);
            }
            ScriptMode::Parallel { max_runs } => {
                if max_runs != 0 && self.num_running() as usize >= max_runs {
                    warn!(
                        "Script '{}' maximum number of parallel runs exceeded!",
                        self.name
                    );
                    return;
                }
                self.trigger.trigger(args);
            }
        }
    }

    /// Executions currently in flight, not counting queued calls
    pub fn num_running(&self) -> u32 {
        self.actions.num_running()
    }

    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    fn schedule_drain(&self) {
        let weak = self.weak_self.clone();
        self.scheduler.set_interval(self.id, "queue", 0, move || {
            if let Some(script) = weak.upgrade() {
                script.drain_queue();
            }
        });
    }

    fn drain_queue(&self) {
        if !self.trigger.is_action_running() {
            let next = self.queue.borrow_mut().pop_front();
            if let Some(args) = next {
                debug!("Script '{}' starting queued instance", self.name);
                self.trigger.trigger(args);
            }
        }
        if self.queue.borrow().is_empty() {
            self.scheduler.cancel_interval(self.id, "queue");
        }
    }
}

impl<A: Clone + 'static> ScriptControl for Script<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.trigger.is_action_running()
    }

    /// Stop every running instance and drop queued calls
    fn stop(&self) {
        self.queue.borrow_mut().clear();
        self.scheduler.cancel_interval(self.id, "queue");
        self.trigger.stop_action();
    }
}

// ============================================================================
// Script actions and conditions
// ============================================================================

/// Starts a script, mapping the current arguments to the script's arguments
pub struct ScriptExecuteAction<A, B: Clone + 'static> {
    script: Rc<Script<B>>,
    args: Box<dyn Fn(&A) -> B>,
}

impl<A, B: Clone + 'static> ScriptExecuteAction<A, B> {
    pub fn new(script: Rc<Script<B>>, args: impl Fn(&A) -> B + 'static) -> Self {
        Self {
            script,
            args: Box::new(args),
        }
    }
}

impl<A> ScriptExecuteAction<A, ()> {
    /// Start a script that takes no arguments
    pub fn without_args(script: Rc<Script<()>>) -> Self {
        Self::new(script, |_| ())
    }
}

impl<A: Clone + 'static, B: Clone + 'static> Action<A> for ScriptExecuteAction<A, B> {
    fn play(&self, args: &A) {
        self.script.execute((self.args)(args));
    }
}

/// Stops a script
pub struct ScriptStopAction<A> {
    script: Rc<dyn ScriptControl>,
    _args: PhantomData<fn(A)>,
}

impl<A> ScriptStopAction<A> {
    pub fn new(script: Rc<dyn ScriptControl>) -> Self {
        Self {
            script,
            _args: PhantomData,
        }
    }
}

impl<A: Clone + 'static> Action<A> for ScriptStopAction<A> {
    fn play(&self, _args: &A) {
        self.script.stop();
    }
}

/// True while a script has an instance running
pub struct IsRunningCondition {
    script: Rc<dyn ScriptControl>,
}

impl IsRunningCondition {
    pub fn new(script: Rc<dyn ScriptControl>) -> Self {
        Self { script }
    }
}

impl<A> Condition<A> for IsRunningCondition {
    fn check(&self, _args: &A) -> bool {
        self.script.is_running()
    }
}

/// Suspends the chain until a script is no longer running
pub struct ScriptWaitAction<A: Clone + 'static> {
    wait: WaitUntilAction<A>,
}

impl<A: Clone + 'static> ScriptWaitAction<A> {
    pub fn new(scheduler: &Scheduler, script: Rc<dyn ScriptControl>) -> Self {
        Self {
            wait: WaitUntilAction::new(
                scheduler,
                NotCondition::new(IsRunningCondition::new(script)),
            ),
        }
    }
}

impl<A: Clone + 'static> Action<A> for ScriptWaitAction<A> {
    fn play_complex(&self, args: A, next: &Next<A>) {
        self.wait.play_complex(args, next);
    }

    fn stop(&self) {
        self.wait.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::LambdaAction;
    use esph_core::ManualClock;
    use std::cell::Cell;

    #[test]
    fn test_script_owns_its_trigger() {
        let scheduler = Scheduler::new(Rc::new(ManualClock::new()));
        let script = Script::new("count", ScriptMode::Single, &scheduler);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        script.add_action(LambdaAction::new(move |_: &()| r.set(r.get() + 1)));

        assert!(!script.trigger.bind(ActionList::new()));
        script.execute(());
        assert_eq!(runs.get(), 1);
    }
}
