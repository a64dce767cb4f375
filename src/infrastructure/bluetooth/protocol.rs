//! Gear VR Controller Protocol
//!
//! This module contains the protocol definitions for communicating with
//! the Gear VR Controller: GATT identifiers, setup commands and the
//! telemetry packet layout.

use crate::domain::models::{Buttons, ControllerState, Vector3};
use uuid::Uuid;

/// Gear VR Controller BLE Service UUID
/// Decoded: "OculusThreemote" in ASCII (4F 63 75 6C 75 73 20 54 68 72 65 65 6D 6F 74 65)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4f63756c_7573_2054_6872_65656d6f7465);

/// Data Receive Characteristic UUID - where sensor data is received
pub const DATA_CHAR_UUID: Uuid = Uuid::from_u128(0xc8c51726_81bc_483b_a052_f7a14ea3d281);

/// Command Send Characteristic UUID - where commands are sent
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0xc8c51726_81bc_483b_a052_f7a14ea3d282);

/// Controller initialization and control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Turn all modes off and stop sending data
    Off,
    /// Sensor mode - touchpad and buttons at lower rate
    SensorMode,
    /// Initiate firmware upgrade sequence (use with caution)
    FirmwareUpgrade,
    /// Calibration mode
    Calibration,
    /// Keep-alive command
    KeepAlive,
    /// Setting mode
    SettingMode,
    /// Low Power Mode Enable
    LpmEnable,
    /// Low Power Mode Disable
    LpmDisable,
    /// VR Mode Enable - high frequency data updates
    VrModeEnable,
    /// Optimize connection parameters
    OptimizeConnection,
}

impl ControllerCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Off => &[0x00, 0x00],
            Self::SensorMode => &[0x01, 0x00],
            Self::FirmwareUpgrade => &[0x02, 0x00],
            Self::Calibration => &[0x03, 0x00],
            Self::KeepAlive => &[0x04, 0x00],
            Self::SettingMode => &[0x05, 0x00],
            Self::LpmEnable => &[0x06, 0x00],
            Self::LpmDisable => &[0x07, 0x00],
            Self::VrModeEnable => &[0x08, 0x00],
            Self::OptimizeConnection => &[0x0A, 0x02],
        }
    }
}

/// Mode setup written after discovery, in order, with repeat counts
pub const INIT_SEQUENCE: &[(ControllerCommand, u32)] = &[
    (ControllerCommand::SensorMode, 3),
    (ControllerCommand::LpmEnable, 1),
    (ControllerCommand::LpmDisable, 1),
    (ControllerCommand::VrModeEnable, 3),
];

/// Written once the mode setup succeeded
pub const FINAL_COMMAND: ControllerCommand = ControllerCommand::OptimizeConnection;

/// Every setup write in the order it goes out
pub fn setup_commands() -> impl Iterator<Item = ControllerCommand> {
    INIT_SEQUENCE
        .iter()
        .flat_map(|&(command, repeat)| std::iter::repeat(command).take(repeat as usize))
        .chain(std::iter::once(FINAL_COMMAND))
}

/// Telemetry notifications are always exactly this long
pub const PACKET_LEN: usize = 60;

/// Byte offsets inside a telemetry packet
pub mod offsets {
    pub const ACCEL_X: usize = 4;
    pub const ACCEL_Y: usize = 6;
    pub const ACCEL_Z: usize = 8;
    pub const GYRO_X: usize = 10;
    pub const GYRO_Y: usize = 12;
    pub const GYRO_Z: usize = 14;
    /// X high nibble (low 4 bits)
    pub const TOUCH_X_HIGH: usize = 54;
    /// X low 6 bits (top of byte) and Y high 2 bits (bottom of byte)
    pub const TOUCH_MIXED: usize = 55;
    /// Y low 8 bits
    pub const TOUCH_Y_LOW: usize = 56;
    pub const BUTTONS: usize = 58;
}

/// Bits of the button byte
pub mod button_bits {
    pub const TRIGGER: u8 = 1 << 0;
    pub const HOME: u8 = 1 << 1;
    pub const BACK: u8 = 1 << 2;
    pub const TOUCHPAD: u8 = 1 << 3;
    pub const VOLUME_UP: u8 = 1 << 4;
    pub const VOLUME_DOWN: u8 = 1 << 5;
    pub const NO_BUTTON: u8 = 1 << 6;
}

/// Raw sensor to physical unit scaling. The operation order is part of the
/// contract: consumers compare against values computed exactly this way.
pub mod imu_scale {
    /// Accelerometer raw count to milli-g style units
    pub fn accel(raw: i16) -> f64 {
        raw as f64 * 10000.0 * 9.80665 / 2048.0
    }

    /// Gyroscope raw count to milli-degrees per second style units
    pub fn gyro(raw: i16) -> f64 {
        raw as f64 * 10000.0 * 0.017453292 / 14.285
    }
}

const AXIS_MASK: u16 = 0x03FF;

/// Raw touch coordinates at or below this count on both axes mean "resting"
pub const DEFAULT_TOUCH_THRESHOLD: u16 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid packet size: {0} (expected 60)")]
    WrongLength(usize),
}

/// Stateless packet decoder with a tunable touch threshold
#[derive(Debug, Clone, Copy)]
pub struct PacketDecoder {
    pub touch_threshold: u16,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self {
            touch_threshold: DEFAULT_TOUCH_THRESHOLD,
        }
    }
}

impl PacketDecoder {
    pub fn new(touch_threshold: u16) -> Self {
        Self { touch_threshold }
    }

    /// Parse a 60-byte data packet from the controller
    ///
    /// # Data Packet Structure (60 bytes)
    ///
    /// ```text
    /// [4-9]   : Accel X, Y, Z (i16 big-endian)
    /// [10-15] : Gyro X, Y, Z (i16 big-endian)
    /// [54]    : low nibble = touch X bits 9..6
    /// [55]    : bits 7..2 = touch X bits 5..0, bits 1..0 = touch Y bits 9..8
    /// [56]    : touch Y bits 7..0
    /// [58]    : Button state byte
    ///           bit 0: Trigger
    ///           bit 1: Home
    ///           bit 2: Back
    ///           bit 3: Touchpad pressed
    ///           bit 4: Volume Up
    ///           bit 5: Volume Down
    ///           bit 6: No button
    /// ```
    ///
    /// `captured_at` is the host receive time; the device clock is not used.
    pub fn decode(&self, bytes: &[u8], captured_at: i64) -> Result<ControllerState, DecodeError> {
        if bytes.len() != PACKET_LEN {
            return Err(DecodeError::WrongLength(bytes.len()));
        }

        let (axis_x, axis_y) = touch_axes(bytes);

        let button_byte = bytes[offsets::BUTTONS];
        let buttons = Buttons {
            trigger: button_byte & button_bits::TRIGGER != 0,
            home: button_byte & button_bits::HOME != 0,
            back: button_byte & button_bits::BACK != 0,
            touchpad_click: button_byte & button_bits::TOUCHPAD != 0,
            volume_up: button_byte & button_bits::VOLUME_UP != 0,
            volume_down: button_byte & button_bits::VOLUME_DOWN != 0,
            no_button: button_byte & button_bits::NO_BUTTON != 0,
        };

        let touchpad_touched = buttons.touchpad_click
            || axis_x > self.touch_threshold
            || axis_y > self.touch_threshold;

        Ok(ControllerState {
            axis_x,
            axis_y,
            accel: Vector3 {
                x: imu_scale::accel(sensor(bytes, offsets::ACCEL_X)),
                y: imu_scale::accel(sensor(bytes, offsets::ACCEL_Y)),
                z: imu_scale::accel(sensor(bytes, offsets::ACCEL_Z)),
            },
            gyro: Vector3 {
                x: imu_scale::gyro(sensor(bytes, offsets::GYRO_X)),
                y: imu_scale::gyro(sensor(bytes, offsets::GYRO_Y)),
                z: imu_scale::gyro(sensor(bytes, offsets::GYRO_Z)),
            },
            buttons,
            touchpad_touched,
            timestamp: captured_at,
        })
    }
}

/// Decode with the default touch threshold
pub fn decode(bytes: &[u8], captured_at: i64) -> Result<ControllerState, DecodeError> {
    PacketDecoder::default().decode(bytes, captured_at)
}

fn touch_axes(bytes: &[u8]) -> (u16, u16) {
    let high = bytes[offsets::TOUCH_X_HIGH] as u16;
    let mixed = bytes[offsets::TOUCH_MIXED] as u16;
    let low = bytes[offsets::TOUCH_Y_LOW] as u16;

    let x = (((high & 0x0F) << 6) | ((mixed & 0xFC) >> 2)) & AXIS_MASK;
    let y = (((mixed & 0x03) << 8) | low) & AXIS_MASK;
    (x, y)
}

fn sensor(bytes: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// Parse a Bluetooth address written as `AA:BB:CC:DD:EE:FF`, `0xAABBCCDDEEFF`
/// or plain hex
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits: String = if text.contains(':') || text.contains('-') {
        let parts: Vec<&str> = text.split([':', '-']).collect();
        if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
            return None;
        }
        parts.concat()
    } else {
        text.trim_start_matches("0x")
            .trim_start_matches("0X")
            .to_string()
    };
    if digits.is_empty() || digits.len() > 12 {
        return None;
    }
    u64::from_str_radix(&digits, 16).ok()
}

/// Format an address as colon separated hex
pub fn format_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_touch(x: u16, y: u16) -> [u8; PACKET_LEN] {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[offsets::TOUCH_X_HIGH] = (x >> 6) as u8 & 0x0F;
        bytes[offsets::TOUCH_MIXED] = (((x & 0x3F) << 2) as u8) | ((y >> 8) as u8 & 0x03);
        bytes[offsets::TOUCH_Y_LOW] = (y & 0xFF) as u8;
        bytes
    }

    #[test]
    fn test_service_uuid_text() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "4f63756c-7573-2054-6872-65656d6f7465"
        );
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "c8c51726-81bc-483b-a052-f7a14ea3d282"
        );
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(ControllerCommand::Off.as_bytes(), &[0x00, 0x00]);
        assert_eq!(ControllerCommand::VrModeEnable.as_bytes(), &[0x08, 0x00]);
        assert_eq!(ControllerCommand::OptimizeConnection.as_bytes(), &[0x0A, 0x02]);
    }

    #[test]
    fn test_setup_order() {
        let commands: Vec<_> = setup_commands().collect();
        assert_eq!(commands.len(), 9);
        assert_eq!(commands[0], ControllerCommand::SensorMode);
        assert_eq!(commands[3], ControllerCommand::LpmEnable);
        assert_eq!(commands[5], ControllerCommand::VrModeEnable);
        assert_eq!(commands[8], ControllerCommand::OptimizeConnection);
    }

    #[test]
    fn test_touch_bit_layout() {
        let bytes = packet_with_touch(500, 300);
        assert_eq!(bytes[54], 0x07);
        assert_eq!(bytes[55], 0xD1);
        assert_eq!(bytes[56], 0x2C);
        let state = decode(&bytes, 0).unwrap();
        assert_eq!((state.axis_x, state.axis_y), (500, 300));
        assert!(state.touchpad_touched);
    }

    #[test]
    fn test_touch_extremes() {
        for (x, y) in [(0, 0), (1023, 1023), (1023, 0), (0, 1023), (341, 682)] {
            let state = decode(&packet_with_touch(x, y), 0).unwrap();
            assert_eq!((state.axis_x, state.axis_y), (x, y));
        }
    }

    #[test]
    fn test_unused_high_bits_ignored() {
        let mut bytes = packet_with_touch(500, 300);
        bytes[54] |= 0xF0;
        let state = decode(&bytes, 0).unwrap();
        assert_eq!(state.axis_x, 500);
    }

    #[test]
    fn test_wrong_length_rejected() {
        for len in [0usize, 2, 20, 59, 61, 120] {
            let bytes = vec![0xFFu8; len];
            assert_eq!(decode(&bytes, 0), Err(DecodeError::WrongLength(len)));
        }
    }

    #[test]
    fn test_any_pattern_decodes() {
        for fill in [0x00u8, 0xFF, 0x55, 0xAA, 0x80, 0x7F] {
            let bytes = [fill; PACKET_LEN];
            let state = decode(&bytes, 7).unwrap();
            assert!(state.axis_x <= 1023 && state.axis_y <= 1023);
            assert!(state.accel.x.is_finite() && state.gyro.z.is_finite());
            assert_eq!(state.timestamp, 7);
        }
        // Walking byte pattern covers every position with varied values
        let bytes: Vec<u8> = (0..PACKET_LEN).map(|i| (i * 37 + 11) as u8).collect();
        assert_eq!(decode(&bytes, 1), decode(&bytes, 1));
    }

    #[test]
    fn test_buttons() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[offsets::BUTTONS] = button_bits::TRIGGER | button_bits::BACK | button_bits::VOLUME_DOWN;
        let buttons = decode(&bytes, 0).unwrap().buttons;
        assert!(buttons.trigger && buttons.back && buttons.volume_down);
        assert!(!buttons.home && !buttons.touchpad_click && !buttons.volume_up && !buttons.no_button);

        bytes[offsets::BUTTONS] = button_bits::NO_BUTTON;
        assert!(decode(&bytes, 0).unwrap().buttons.no_button);
    }

    #[test]
    fn test_touch_detection() {
        let resting = decode(&packet_with_touch(3, 10), 0).unwrap();
        assert!(!resting.touchpad_touched);

        let moved = decode(&packet_with_touch(11, 0), 0).unwrap();
        assert!(moved.touchpad_touched);

        let mut clicked = [0u8; PACKET_LEN];
        clicked[offsets::BUTTONS] = button_bits::TOUCHPAD;
        assert!(decode(&clicked, 0).unwrap().touchpad_touched);

        let strict = PacketDecoder::new(50);
        assert!(!strict.decode(&packet_with_touch(40, 40), 0).unwrap().touchpad_touched);
    }

    #[test]
    fn test_imu_big_endian_scaling() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[offsets::ACCEL_X] = 0x08; // 2048
        bytes[offsets::ACCEL_X + 1] = 0x00;
        bytes[offsets::GYRO_Z] = 0xFF; // -1
        bytes[offsets::GYRO_Z + 1] = 0xFF;
        let state = decode(&bytes, 0).unwrap();
        assert_eq!(state.accel.x, 2048.0 * 10000.0 * 9.80665 / 2048.0);
        assert_eq!(state.gyro.z, -1.0 * 10000.0 * 0.017453292 / 14.285);
        assert_eq!(state.accel.y, 0.0);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("AA:BB:CC:DD:EE:FF"), Some(0xAABBCCDDEEFF));
        assert_eq!(parse_address("0x2C8A72E1D4"), Some(0x2C8A72E1D4));
        assert_eq!(parse_address("2c8a72e1d4"), Some(0x2C8A72E1D4));
        assert_eq!(parse_address("AA:BB"), None);
        assert_eq!(parse_address("zz"), None);
        assert_eq!(format_address(0xAABBCCDDEEFF), "AA:BB:CC:DD:EE:FF");
    }
}
