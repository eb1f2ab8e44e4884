// Motion controller for the Gizmo stepper base
//
// Owns the follower address, the bus and the emergency interrupt line.
// Normal moves run on the caller's thread. The interrupt handler runs on the
// line's dispatch thread and replaces any further motion with an escape turn.

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::bus::{BusError, I2cBus, write_message};
use super::clock::Clock;
use super::interrupt::{EdgeHandler, InterruptError, InterruptSource};
use super::protocol::{Direction, MotionCommand, RangeError, decode, encode};
use crate::config::{DEBOUNCE_WINDOW_US, EMERGENCY_ANGLE, EMERGENCY_DISTANCE, FOLLOWER_ADDRESS};

/// Error types for the motion controller
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Command rejected: {0}")]
    Range(#[from] RangeError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Interrupt setup failed: {0}")]
    Interrupt(#[from] InterruptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub address: u8,
    pub debounce_window_us: u64,
    pub emergency_distance: u32,
    /// Magnitude of the escape turn; the sign is picked per interrupt
    pub emergency_angle: i32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: FOLLOWER_ADDRESS,
            debounce_window_us: DEBOUNCE_WINDOW_US,
            emergency_distance: EMERGENCY_DISTANCE,
            emergency_angle: EMERGENCY_ANGLE,
        }
    }
}

/// Timing and masking state, as a copied snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    pub last_execution_time_us: u64,
    pub last_interrupt_time_us: u64,
    pub interrupts_enabled: bool,
}

/// What the interrupt handler did with an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Edge arrived while a previous one was still being handled
    Masked,
    /// Too soon after the last command or interrupt
    DebounceSuppressed,
    Emergency { angle: i32, delivered: bool },
}

struct Shared<B, S, C, R> {
    config: ControllerConfig,
    bus: Mutex<B>,
    state: Mutex<ControllerState>,
    source: Arc<S>,
    clock: C,
    rng: Mutex<R>,
}

/// Driver for the follower board.
///
/// Bus access and controller state each sit behind their own lock and are
/// never held together. A command holds the bus lock for its whole six-byte
/// transaction, so emergency and normal bytes cannot interleave.
pub struct MotionController<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    shared: Arc<Shared<B, S, C, R>>,
}

impl<B, S, C, R> MotionController<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    /// Create the controller and arm the emergency line (rising edge)
    pub fn new(
        bus: B,
        source: Arc<S>,
        clock: C,
        rng: R,
        config: ControllerConfig,
    ) -> Result<Self, DriverError> {
        let now = clock.now_us();
        let shared = Arc::new(Shared {
            config,
            bus: Mutex::new(bus),
            state: Mutex::new(ControllerState {
                last_execution_time_us: now,
                last_interrupt_time_us: now,
                interrupts_enabled: true,
            }),
            source,
            clock,
            rng: Mutex::new(rng),
        });

        // Weak, since the line keeps the handler alive
        let weak = Arc::downgrade(&shared);
        let handler: EdgeHandler = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_interrupt();
            }
        });
        shared.source.register_rising_edge(handler)?;
        shared.source.enable();

        info!(
            "Motion controller ready: follower 0x{:02X}, {}ms debounce",
            config.address,
            config.debounce_window_us / 1000
        );
        Ok(Self { shared })
    }

    /// Move the base. Blocks until all six bytes are written or one fails.
    ///
    /// # Arguments
    /// * `distance` - Steps
    /// * `direction` - Movement type
    /// * `angle` - Turn angle in degrees, [-90, 90]; ignored by the follower
    ///   for straight moves but always transmitted
    pub fn move_steps(
        &self,
        distance: u32,
        direction: Direction,
        angle: i32,
    ) -> Result<(), DriverError> {
        self.execute(MotionCommand::new(direction, distance, angle))
    }

    /// Send a prepared command, same contract as [`Self::move_steps`]
    pub fn execute(&self, cmd: MotionCommand) -> Result<(), DriverError> {
        debug!("Moving: {:?}", cmd);

        self.shared.transmit(&cmd)?;

        // An emergency may have landed since the write; never step back
        let now = self.shared.clock.now_us();
        let mut state = self.shared.state.lock();
        state.last_execution_time_us = state.last_execution_time_us.max(now);
        Ok(())
    }

    pub fn forward(&self, distance: u32) -> Result<(), DriverError> {
        self.move_steps(distance, Direction::Forward, 0)
    }

    pub fn backward(&self, distance: u32) -> Result<(), DriverError> {
        self.move_steps(distance, Direction::Backward, 0)
    }

    pub fn turn_forward(&self, distance: u32, angle: i32) -> Result<(), DriverError> {
        self.move_steps(distance, Direction::TurnForward, angle)
    }

    pub fn turn_backward(&self, distance: u32, angle: i32) -> Result<(), DriverError> {
        self.move_steps(distance, Direction::TurnBackward, angle)
    }

    pub fn state(&self) -> ControllerState {
        *self.shared.state.lock()
    }
}

impl<B, S, C, R> Shared<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    /// Encode, then write as one exclusive bus transaction
    fn transmit(&self, cmd: &MotionCommand) -> Result<(), DriverError> {
        let msg = encode(cmd)?;
        let mut bus = self.bus.lock();
        write_message(&mut *bus, self.config.address, msg.as_bytes())?;
        if let Ok(sent) = decode(*msg.as_bytes()) {
            debug!("Sent {:02X?} ({:?})", msg.as_bytes(), sent);
        }
        Ok(())
    }

    fn on_interrupt(&self) -> InterruptOutcome {
        {
            let mut state = self.state.lock();
            if !state.interrupts_enabled {
                return InterruptOutcome::Masked;
            }
            self.source.disable();
            state.interrupts_enabled = false;
        }

        let outcome = self.handle_edge();

        // Re-arm whatever happened above
        let mut state = self.state.lock();
        state.interrupts_enabled = true;
        self.source.enable();

        outcome
    }

    fn handle_edge(&self) -> InterruptOutcome {
        let now = self.clock.now_us();
        {
            let mut state = self.state.lock();
            let elapsed = now.saturating_sub(state.last_execution_time_us);
            if elapsed < self.config.debounce_window_us {
                debug!("Interrupt suppressed, {}us since last execution", elapsed);
                return InterruptOutcome::DebounceSuppressed;
            }
            state.last_execution_time_us = now;
            state.last_interrupt_time_us = now;
        }

        let angle = if self.rng.lock().random_bool(0.5) {
            -self.config.emergency_angle
        } else {
            self.config.emergency_angle
        };
        warn!("Emergency interrupt, escaping backward at {} degrees", angle);

        let cmd = MotionCommand::new(
            Direction::TurnBackward,
            self.config.emergency_distance,
            angle,
        );
        let delivered = match self.transmit(&cmd) {
            Ok(()) => true,
            Err(e) => {
                error!("Emergency command not delivered: {}", e);
                false
            }
        };

        InterruptOutcome::Emergency { angle, delivered }
    }
}

impl<B, S, C, R> Drop for MotionController<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    fn drop(&mut self) {
        self.shared.source.disable();
        info!("Motion controller released, emergency line disarmed");
    }
}
