//! Entities that publish state to automations
//!
//! Drivers call `publish_state` once per observed value; automations hook in
//! through `add_on_state_callback`.

mod binary_sensor;
pub mod filter;
mod sensor;

pub use binary_sensor::{BinarySensor, FilterOutput};
pub use filter::BinarySensorFilter;
pub use sensor::Sensor;
