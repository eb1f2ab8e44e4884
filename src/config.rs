// Bus, interrupt line, timing, topics
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::motor::ControllerConfig;

// I2C character device the follower board is wired to
pub const I2C_BUS_PATH: &str = "/dev/i2c-1";

// Follower (ESP32 stepper board) address
pub const FOLLOWER_ADDRESS: u8 = 0x23;

// Exported sysfs value file of the emergency input pin
pub const INTERRUPT_GPIO_VALUE: &str = "/sys/class/gpio/gpio29/value";

// How often the edge watcher samples the pin
pub const EDGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

// Interrupts closer than this to the last command or interrupt are ignored
pub const DEBOUNCE_WINDOW_US: u64 = 3_000_000;

// Emergency escape: turn backward this far, to a randomly chosen side
pub const EMERGENCY_DISTANCE: u32 = 6000;
pub const EMERGENCY_ANGLE: i32 = 70;

// Health publish frequency
pub const HEALTH_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_CMD_MOVE: &str = "gizmo/cmd/move"; // move requests
pub const TOPIC_IRQ_TRIGGER: &str = "gizmo/irq/trigger"; // dry-run interrupt line
pub const TOPIC_HEALTH: &str = "gizmo/state/health"; // driver health

// Demo sequence
pub const DEMO_DISTANCE: u32 = 3500;
pub const DEMO_PAUSE: Duration = Duration::from_millis(300);

/// Command-line overrides for the constants above
#[derive(Debug, Clone, Parser)]
#[command(name = "gizmo-motion-driver", about = "I2C motion driver for the Gizmo stepper base")]
pub struct Options {
    /// I2C character device
    #[arg(long, default_value = I2C_BUS_PATH)]
    pub bus: PathBuf,

    /// Follower address, decimal or 0x-prefixed hex
    #[arg(long, default_value_t = FOLLOWER_ADDRESS, value_parser = parse_address)]
    pub address: u8,

    /// Sysfs value file of the emergency input pin
    #[arg(long, default_value = INTERRUPT_GPIO_VALUE)]
    pub gpio: PathBuf,

    /// Log bus bytes instead of writing them; the interrupt line is driven
    /// from the trigger topic
    #[arg(long)]
    pub dry_run: bool,

    /// Run the forward/backward demo sequence and exit
    #[arg(long)]
    pub demo: bool,
}

impl Options {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            address: self.address,
            ..ControllerConfig::default()
        }
    }
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    let address = parsed.map_err(|e| format!("invalid address {s:?}: {e}"))?;
    // 7-bit addressing
    if address > 0x7F {
        return Err(format!("address 0x{address:02X} is not a 7-bit address"));
    }
    Ok(address)
}
