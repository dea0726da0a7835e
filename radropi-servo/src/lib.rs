//! radropi-servo: steering for the radropi dish
//!
//! Converts the primary track's offset from frame center into bounded,
//! rate-limited pan/tilt moves, parks all four servos when the sky has been
//! quiet for long enough, and talks to the driver board through a pluggable
//! [`Actuator`].

pub mod actuator;
pub mod config;
pub mod controller;
pub mod error;

pub use actuator::{Actuator, MockActuator, MockHandle};
#[cfg(feature = "serial")]
pub use actuator::SerialActuator;
pub use config::{Axis, AxisConfig, ServoConfig};
pub use controller::{ServoController, ServoOutcome, ServoStats};
pub use error::ServoError;
