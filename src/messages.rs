// Message types exchanged with the commander over zenoh

use serde::{Deserialize, Serialize};

use crate::motor::{ControllerState, Direction, MotionCommand};

// Move request from the commander -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub direction: Direction,
    pub distance: u32,
    // Only meaningful for turns, defaults to straight
    #[serde(default)]
    pub angle: i32,
}

impl From<&MoveRequest> for MotionCommand {
    fn from(req: &MoveRequest) -> Self {
        MotionCommand::new(req.direction, req.distance, req.angle)
    }
}

/// Driver status published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Ok,
    CommandFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverHealth {
    pub status: DriverStatus,
    pub last_execution_time_us: u64,
    pub last_interrupt_time_us: u64,
    pub interrupts_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DriverHealth {
    pub fn new(state: &ControllerState, last_error: Option<String>) -> Self {
        let status = if last_error.is_some() {
            DriverStatus::CommandFailed
        } else {
            DriverStatus::Ok
        };
        Self {
            status,
            last_execution_time_us: state.last_execution_time_us,
            last_interrupt_time_us: state.last_interrupt_time_us,
            interrupts_enabled: state.interrupts_enabled,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_request_angle_defaults_to_zero() {
        let req: MoveRequest =
            serde_json::from_str(r#"{"direction":"forward","distance":3500}"#).unwrap();
        assert_eq!(req.direction, Direction::Forward);
        assert_eq!(req.angle, 0);
        assert_eq!(
            MotionCommand::from(&req),
            MotionCommand::new(Direction::Forward, 3500, 0)
        );
    }

    #[test]
    fn test_move_request_turn() {
        let req: MoveRequest = serde_json::from_str(
            r#"{"direction":"turn_backward","distance":6000,"angle":-70}"#,
        )
        .unwrap();
        assert_eq!(req.direction, Direction::TurnBackward);
        assert_eq!(req.angle, -70);
    }

    #[test]
    fn test_move_request_rejects_unknown_direction() {
        let res = serde_json::from_str::<MoveRequest>(r#"{"direction":"sideways","distance":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_health_reports_failure() {
        let state = ControllerState {
            last_execution_time_us: 10,
            last_interrupt_time_us: 5,
            interrupts_enabled: true,
        };

        let ok = DriverHealth::new(&state, None);
        assert_eq!(ok.status, DriverStatus::Ok);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("last_error").is_none());

        let failed = DriverHealth::new(&state, Some("nack".into()));
        assert_eq!(failed.status, DriverStatus::CommandFailed);
        assert_eq!(serde_json::to_value(&failed).unwrap()["status"], "command_failed");
    }
}
