//! Components built on the automation core
//!
//! Each type here listens to an entity, keeps a small state machine and
//! fires [`Trigger`](esph_automation::Trigger)s that automations bind to.

pub mod binary_sensor;
pub mod hygrostat;
mod multi_click;
mod value_range;

pub use binary_sensor::{
    ClickTrigger, DoubleClickTrigger, PressTrigger, ReleaseTrigger, StateTrigger,
};
pub use hygrostat::{HumidifierAction, HumidifierMode, HygrostatHumidifier};
pub use multi_click::{MultiClickEvent, MultiClickTrigger, UNBOUNDED_LENGTH};
pub use value_range::ValueRangeTrigger;
