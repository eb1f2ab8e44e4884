// Motion control for the Gizmo stepper base
//
// Provides:
// - Follower wire protocol (motion intent -> 6 bytes)
// - I2C bus access, opened per transaction
// - Emergency interrupt line with rising-edge dispatch
// - Motion controller tying the three together

pub mod bus;
pub mod clock;
mod controller;
pub mod interrupt;
pub mod protocol;

pub use bus::{BusError, EmbeddedHalBus, I2cBus, LinuxI2cBus, LoggingBus};
pub use clock::{Clock, MonotonicClock};
pub use controller::{
    ControllerConfig, ControllerState, DriverError, InterruptOutcome, MotionController,
};
pub use interrupt::{InterruptError, InterruptSource, SoftInterruptLine, SysfsEdgeLine};
pub use protocol::{Direction, EncodedMessage, MotionCommand, RangeError};
