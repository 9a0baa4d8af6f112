//! Triggers

use crate::ActionList;
use std::cell::OnceCell;
use std::fmt;

/// An event source
///
/// A trigger is bound to at most one [`Automation`](crate::Automation), once,
/// for its whole lifetime. Firing an unbound trigger does nothing, so
/// components can fire their triggers without checking whether anything is
/// listening.
pub struct Trigger<A: Clone + 'static> {
    actions: OnceCell<ActionList<A>>,
}

impl<A: Clone + 'static> Trigger<A> {
    pub fn new() -> Self {
        Self {
            actions: OnceCell::new(),
        }
    }

    /// Bind the action list to run on every firing; fails if already bound
    pub(crate) fn bind(&self, actions: ActionList<A>) -> bool {
        self.actions.set(actions).is_ok()
    }

    /// Fire the trigger, starting a new execution of the bound actions
    pub fn trigger(&self, args: A) {
        if let Some(actions) = self.actions.get() {
            actions.play(args);
        }
    }

    /// Stop every in-flight execution of the bound actions
    pub fn stop_action(&self) {
        if let Some(actions) = self.actions.get() {
            actions.stop();
        }
    }

    pub fn is_action_running(&self) -> bool {
        self.actions.get().is_some_and(|a| a.is_running())
    }

    pub fn has_automation(&self) -> bool {
        self.actions.get().is_some()
    }
}

impl<A: Clone + 'static> Default for Trigger<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + 'static> fmt::Debug for Trigger<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("bound", &self.has_automation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_trigger_is_inert() {
        let trigger: Trigger<(u32,)> = Trigger::new();
        trigger.trigger((1,));
        trigger.stop_action();
        assert!(!trigger.is_action_running());
        assert!(!trigger.has_automation());
    }

    #[test]
    fn test_bind_only_once() {
        let trigger: Trigger<()> = Trigger::new();
        assert!(trigger.bind(ActionList::new()));
        assert!(!trigger.bind(ActionList::new()));
        assert!(trigger.has_automation());
    }
}
