// Follower wire protocol for the stepper base
//
// Every motion command is six bytes, written one byte per bus transfer:
// [direction, dist0, dist1, dist2, dist3, angle]
// Distance is little-endian (lowest-order byte first), the angle is a
// two's-complement signed byte.

use serde::{Deserialize, Serialize};

/// Length of one encoded command on the wire
pub const MESSAGE_LEN: usize = 6;

/// Largest distance the follower accepts (steps)
pub const MAX_DISTANCE: i64 = 0xFFFF_FFFF;

/// Turn angle limits in degrees
pub const MIN_ANGLE: i32 = -90;
pub const MAX_ANGLE: i32 = 90;

/// Direction codes understood by the follower firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Backward = 0x00, // flipped in the follower firmware
    Forward = 0x01,
    TurnForward = 0x02,
    TurnBackward = 0x03,
}

impl Direction {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(Direction::Backward),
            0x01 => Ok(Direction::Forward),
            0x02 => Ok(Direction::TurnForward),
            0x03 => Ok(Direction::TurnBackward),
            other => Err(DecodeError::UnknownDirection(other)),
        }
    }
}

/// Value outside the range the protocol can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("distance {0} is out of range [0, 0xFFFFFFFF]")]
    Distance(i64),

    #[error("angle {0} is out of range [-90, 90]")]
    Angle(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown direction code 0x{0:02X}")]
    UnknownDirection(u8),
}

/// A single motion intent. Not validated until encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub direction: Direction,
    pub distance: u32,
    pub angle: i32,
}

impl MotionCommand {
    pub fn new(direction: Direction, distance: u32, angle: i32) -> Self {
        Self {
            direction,
            distance,
            angle,
        }
    }
}

/// Six bytes ready for the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedMessage([u8; MESSAGE_LEN]);

impl EncodedMessage {
    pub fn as_bytes(&self) -> &[u8; MESSAGE_LEN] {
        &self.0
    }
}

/// Encode a distance in steps as four bytes, lowest-order first
pub fn encode_distance(steps: i64) -> Result<[u8; 4], RangeError> {
    if !(0..=MAX_DISTANCE).contains(&steps) {
        return Err(RangeError::Distance(steps));
    }
    Ok((steps as u32).to_le_bytes())
}

pub fn decode_distance(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Encode a signed angle as a two's-complement byte
pub fn encode_angle(degrees: i32) -> Result<u8, RangeError> {
    if !(MIN_ANGLE..=MAX_ANGLE).contains(&degrees) {
        return Err(RangeError::Angle(degrees));
    }
    Ok((degrees & 0xFF) as u8)
}

pub fn decode_angle(byte: u8) -> i8 {
    byte as i8
}

/// Build the wire message for a command.
///
/// Range checks run before anything is produced, so an invalid command never
/// reaches the bus even partially.
pub fn encode(cmd: &MotionCommand) -> Result<EncodedMessage, RangeError> {
    let distance = encode_distance(i64::from(cmd.distance))?;
    let angle = encode_angle(cmd.angle)?;

    let mut bytes = [0u8; MESSAGE_LEN];
    bytes[0] = cmd.direction.code();
    bytes[1..5].copy_from_slice(&distance);
    bytes[5] = angle;

    Ok(EncodedMessage(bytes))
}

/// Parse six wire bytes back into a command
pub fn decode(bytes: [u8; MESSAGE_LEN]) -> Result<MotionCommand, DecodeError> {
    let direction = Direction::try_from(bytes[0])?;
    let distance = decode_distance([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let angle = i32::from(decode_angle(bytes[5]));

    Ok(MotionCommand::new(direction, distance, angle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_3500_layout() {
        let msg = encode(&MotionCommand::new(Direction::Forward, 3500, 0)).unwrap();
        // 3500 = 0x00000DAC
        assert_eq!(msg.as_bytes(), &[0x01, 0xAC, 0x0D, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_distance_byte_order() {
        for n in [0u32, 1, 0xFF, 0x100, 3500, 6000, 0x1234_5678, 0xDEAD_BEEF, u32::MAX] {
            let bytes = encode_distance(i64::from(n)).unwrap();
            assert_eq!(bytes[0], (n & 0xFF) as u8, "low byte of {n:#x}");
            assert_eq!(bytes[3], ((n >> 24) & 0xFF) as u8, "high byte of {n:#x}");
            assert_eq!(decode_distance(bytes), n);
        }
    }

    #[test]
    fn test_distance_out_of_range() {
        assert_eq!(encode_distance(-1), Err(RangeError::Distance(-1)));
        assert_eq!(
            encode_distance(0x1_0000_0000),
            Err(RangeError::Distance(0x1_0000_0000))
        );
        assert!(encode_distance(MAX_DISTANCE).is_ok());
    }

    #[test]
    fn test_angle_full_domain() {
        for deg in MIN_ANGLE..=MAX_ANGLE {
            let byte = encode_angle(deg).unwrap();
            assert_eq!(i32::from(decode_angle(byte)), deg);
        }
        assert_eq!(encode_angle(-70), Ok(0xBA));
        assert_eq!(encode_angle(70), Ok(0x46));
        assert_eq!(encode_angle(-90), Ok(0xA6));
    }

    #[test]
    fn test_angle_out_of_range() {
        assert_eq!(encode_angle(-91), Err(RangeError::Angle(-91)));
        assert_eq!(encode_angle(91), Err(RangeError::Angle(91)));
    }

    #[test]
    fn test_encode_rejects_bad_angle() {
        let cmd = MotionCommand::new(Direction::TurnForward, 100, 120);
        assert_eq!(encode(&cmd), Err(RangeError::Angle(120)));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let cmd = MotionCommand::new(Direction::TurnBackward, 6000, -70);
        assert_eq!(encode(&cmd).unwrap(), encode(&cmd).unwrap());
    }

    #[test]
    fn test_decode_emergency_turn() {
        let cmd = decode([0x03, 0x70, 0x17, 0x00, 0x00, 0xBA]).unwrap();
        assert_eq!(cmd, MotionCommand::new(Direction::TurnBackward, 6000, -70));
    }

    #[test]
    fn test_decode_unknown_direction() {
        assert_eq!(
            decode([0x07, 0, 0, 0, 0, 0]),
            Err(DecodeError::UnknownDirection(0x07))
        );
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::Forward.code(), 0x01);
        assert_eq!(Direction::Backward.code(), 0x00);
        assert_eq!(Direction::TurnForward.code(), 0x02);
        assert_eq!(Direction::TurnBackward.code(), 0x03);
    }
}
