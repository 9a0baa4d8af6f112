//! Automation Engine
//!
//! Automations bind an event source to an ordered list of actions:
//!
//! ```text
//! AUTOMATION = TRIGGER → ACTION LIST (actions may consult CONDITIONS)
//! ```
//!
//! Every piece is generic over an argument type `A` (usually a tuple such as
//! `()`, `(f32,)` or `(bool,)`) that a trigger fires with and that flows
//! unchanged through each action of the chain.
//!
//! # Key Types
//!
//! - [`TemplatableValue`] - Literal or closure parameter, resolved at run time
//! - [`Trigger`] - Event source fired by entities and components
//! - [`Condition`] - Predicate over the trigger arguments
//! - [`Action`] / [`ActionList`] - Reentrant, stoppable chain of steps
//! - [`Automation`] - Binds one trigger to one action list
//! - [`Script`] - Named action list with a run mode

pub mod action;
pub mod actions;
pub mod automation;
pub mod condition;
pub mod lifecycle;
pub mod script;
pub mod templatable;
pub mod trigger;

pub use action::{Action, ActionList, Next};
pub use automation::{Automation, AutomationError, AutomationResult};
pub use condition::Condition;
pub use script::{Script, ScriptMode};
pub use templatable::TemplatableValue;
pub use trigger::Trigger;
