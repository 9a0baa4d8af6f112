//! Automation definition
//!
//! An Automation binds one trigger to one action list.

use crate::{Action, ActionList, Trigger};
use thiserror::Error;
use tracing::debug;

/// Automation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Trigger is already bound to an automation")]
    TriggerAlreadyBound,
}

/// Result type for automation operations
pub type AutomationResult<T> = Result<T, AutomationError>;

/// Binds a trigger to an ordered list of actions
///
/// The binding is permanent: every later firing of the trigger plays the
/// actions, even after the `Automation` value itself is dropped.
pub struct Automation<A: Clone + 'static> {
    actions: ActionList<A>,
}

impl<A: Clone + 'static> Automation<A> {
    /// Bind a new, empty action list to `trigger`
    pub fn new(trigger: &Trigger<A>) -> AutomationResult<Self> {
        let actions = ActionList::new();
        if !trigger.bind(actions.clone()) {
            return Err(AutomationError::TriggerAlreadyBound);
        }
        debug!("Bound automation to trigger");
        Ok(Self { actions })
    }

    pub fn add_action(&self, action: impl Action<A> + 'static) {
        self.actions.add_action(action);
    }

    pub fn add_actions(&self, actions: impl IntoIterator<Item = Box<dyn Action<A>>>) {
        self.actions.add_actions(actions);
    }

    /// Play the actions with `args`, alongside any execution already in flight
    pub fn trigger(&self, args: A) {
        self.actions.play(args);
    }

    pub fn stop(&self) {
        self.actions.stop();
    }

    pub fn is_running(&self) -> bool {
        self.actions.is_running()
    }

    pub fn num_running(&self) -> u32 {
        self.actions.num_running()
    }

    pub fn actions(&self) -> &ActionList<A> {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::LambdaAction;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_trigger_plays_actions() {
        let trigger = Trigger::new();
        let automation = Automation::new(&trigger).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        automation.add_action(LambdaAction::new(move |(v,): &(bool,)| s.borrow_mut().push(*v)));

        trigger.trigger((true,));
        automation.trigger((false,));
        assert_eq!(*seen.borrow(), vec![true, false]);
        assert!(!automation.is_running());
        assert_eq!(automation.num_running(), 0);
    }

    #[test]
    fn test_second_automation_is_rejected() {
        let trigger: Trigger<()> = Trigger::new();
        let _first = Automation::new(&trigger).unwrap();
        assert_eq!(
            Automation::new(&trigger).err(),
            Some(AutomationError::TriggerAlreadyBound)
        );
    }
}
