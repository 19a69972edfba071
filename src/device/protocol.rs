// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! ASCII frame dialect of the temperature controller
//!
//! ### Command frame (16 bytes)
//!
//! ```text
//! *  A A  C C  D D D D D D D D  S S  \r
//! ```
//!
//! `AA` is the device address, `CC` the command code, `DDDDDDDD` the payload as
//! 8 lowercase hex digits (two's complement over 32 bits) and `SS` the low byte
//! of the sum of the ASCII codes of the 12 preceding characters, as 2 lowercase
//! hex digits.
//!
//! ### Reply frame (12 bytes)
//!
//! ```text
//! *  D D D D D D D D  S S  ^
//! ```
//!
//! The reply checksum covers the 8 payload characters only. A payload of
//! `XXXXXXXX` is how the controller rejects a command it did not understand.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

pub const FRAME_START: u8 = b'*';
pub const FRAME_END: u8 = b'\r';
pub const REPLY_START: u8 = b'*';
pub const REPLY_END: u8 = b'^';

pub const COMMAND_FRAME_LEN: usize = 16;
pub const REPLY_FRAME_LEN: usize = 12;
pub const PAYLOAD_LEN: usize = 8;

const REJECTION_PAYLOAD: &[u8; PAYLOAD_LEN] = b"XXXXXXXX";

/// Command codes understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Input 1 (control sensor) temperature, hundredths of °C
    ReadInput1 = 0x01,
    /// Power output, -511..=511 for -100 %..=100 %
    ReadPowerOutput = 0x02,
    /// Set value currently used by the control loop, hundredths of °C
    ReadDesiredControlValue = 0x03,
    /// Alarm status bitmask
    ReadAlarmStatus = 0x05,
    /// Input 2 temperature, hundredths of °C
    ReadInput2 = 0x06,
    /// Output current in A/D counts
    ReadOutputCurrentCounts = 0x07,
    /// Write the fixed set value, hundredths of °C
    WriteFixedSetValue = 0x1c,
    WriteAlarmType = 0x28,
    WriteSetTypeDefine = 0x29,
    WriteSensorType = 0x2a,
    WriteControlType = 0x2b,
    ReadAlarmType = 0x41,
    ReadSetTypeDefine = 0x42,
    ReadSensorType = 0x43,
    ReadControlType = 0x44,
    /// Fixed set value saved in the controller, hundredths of °C
    ReadFixedSetValue = 0x50,
}

impl CommandCode {
    const ALL: [CommandCode; 16] = [
        CommandCode::ReadInput1,
        CommandCode::ReadPowerOutput,
        CommandCode::ReadDesiredControlValue,
        CommandCode::ReadAlarmStatus,
        CommandCode::ReadInput2,
        CommandCode::ReadOutputCurrentCounts,
        CommandCode::WriteFixedSetValue,
        CommandCode::WriteAlarmType,
        CommandCode::WriteSetTypeDefine,
        CommandCode::WriteSensorType,
        CommandCode::WriteControlType,
        CommandCode::ReadAlarmType,
        CommandCode::ReadSetTypeDefine,
        CommandCode::ReadSensorType,
        CommandCode::ReadControlType,
        CommandCode::ReadFixedSetValue,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Whether the payload of this command carries data for the controller
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CommandCode::WriteFixedSetValue
                | CommandCode::WriteAlarmType
                | CommandCode::WriteSetTypeDefine
                | CommandCode::WriteSensorType
                | CommandCode::WriteControlType
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.code())
    }
}

/// A command frame as seen by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub address: [u8; 2],
    /// Raw command code, which may not be one the controller knows
    pub code: u8,
    pub payload: i32,
}

/// Two lowercase hex characters of the low byte of the ASCII sum of `fields`
pub fn checksum(fields: &[u8]) -> [u8; 2] {
    let sum = fields.iter().fold(0u32, |acc, &b| acc + u32::from(b));
    hex_byte((sum & 0xFF) as u8)
}

/// 8 lowercase hex digits of the two's-complement representation of `value`
pub fn encode_payload(value: i32) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(format!("{:08x}", value as u32).as_bytes());
    payload
}

/// Decode 8 hex digits as a signed 32-bit integer
///
/// Digits are read most significant first; lowercase `a`-`f` and `0`-`9` are the
/// only digits the controller emits and the only ones accepted. An accumulated
/// magnitude above `i32::MAX` wraps to the negative range.
pub fn decode_payload(digits: &[u8]) -> BridgeResult<i32> {
    if digits.len() != PAYLOAD_LEN {
        return Err(BridgeError::frame(format!(
            "payload has {} characters, expected {}",
            digits.len(),
            PAYLOAD_LEN
        )));
    }
    if digits == REJECTION_PAYLOAD {
        return Err(BridgeError::frame("controller rejected the command"));
    }

    let mut magnitude: i64 = 0;
    for &digit in digits {
        let value = match digit {
            b'0'..=b'9' => digit - b'0',
            b'a'..=b'f' => digit - b'a' + 10,
            other => {
                return Err(BridgeError::frame(format!(
                    "invalid hex digit {:?} in payload",
                    other as char
                )))
            }
        };
        magnitude = magnitude * 16 + i64::from(value);
    }
    if magnitude > i64::from(i32::MAX) {
        magnitude -= 1i64 << 32;
    }
    Ok(magnitude as i32)
}

/// Build a command frame for `address`
pub fn build_command(
    address: &str,
    code: CommandCode,
    payload: i32,
) -> BridgeResult<[u8; COMMAND_FRAME_LEN]> {
    let address = address_bytes(address)?;
    let code = hex_byte(code.code());
    let payload = encode_payload(payload);

    let mut fields = [0u8; 12];
    fields[0..2].copy_from_slice(&address);
    fields[2..4].copy_from_slice(&code);
    fields[4..12].copy_from_slice(&payload);

    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[0] = FRAME_START;
    frame[1..13].copy_from_slice(&fields);
    frame[13..15].copy_from_slice(&checksum(&fields));
    frame[15] = FRAME_END;
    Ok(frame)
}

/// Parse and verify a command frame
pub fn parse_command(frame: &[u8]) -> BridgeResult<CommandFrame> {
    if frame.len() != COMMAND_FRAME_LEN {
        return Err(BridgeError::frame(format!(
            "command frame has {} bytes, expected {}",
            frame.len(),
            COMMAND_FRAME_LEN
        )));
    }
    if frame[0] != FRAME_START || frame[15] != FRAME_END {
        return Err(BridgeError::frame("command frame markers missing"));
    }
    let fields = &frame[1..13];
    if checksum(fields) != frame[13..15] {
        return Err(BridgeError::frame("command checksum mismatch"));
    }

    let code_digits = std::str::from_utf8(&frame[3..5])
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| BridgeError::frame("command code is not hexadecimal"))?;

    Ok(CommandFrame {
        address: [frame[1], frame[2]],
        code: code_digits,
        payload: decode_payload(&frame[5..13])?,
    })
}

/// Build a reply frame carrying `payload`
pub fn build_reply(payload: i32) -> [u8; REPLY_FRAME_LEN] {
    reply_with(&encode_payload(payload))
}

/// Reply sent by the controller for a command it does not understand
pub fn build_rejection() -> [u8; REPLY_FRAME_LEN] {
    reply_with(REJECTION_PAYLOAD)
}

/// Parse a reply frame and return its signed payload
pub fn parse_reply(reply: &[u8], verify_checksum: bool) -> BridgeResult<i32> {
    if reply.len() != REPLY_FRAME_LEN {
        return Err(BridgeError::frame(format!(
            "reply has {} bytes, expected {}",
            reply.len(),
            REPLY_FRAME_LEN
        )));
    }
    if reply[0] != REPLY_START || reply[11] != REPLY_END {
        return Err(BridgeError::frame(format!(
            "reply markers missing in {:?}",
            String::from_utf8_lossy(reply)
        )));
    }
    let payload = &reply[1..9];
    if verify_checksum && payload != REJECTION_PAYLOAD && checksum(payload) != reply[9..11] {
        return Err(BridgeError::frame(format!(
            "reply checksum mismatch in {:?}",
            String::from_utf8_lossy(reply)
        )));
    }
    decode_payload(payload)
}

/// Payload of a set-point write: hundredths of °C, ties rounded to even
pub fn setpoint_payload(temperature: f32) -> BridgeResult<i32> {
    let hundredths = (f64::from(temperature) * 100.0).round_ties_even();
    if !hundredths.is_finite()
        || hundredths < f64::from(i32::MIN)
        || hundredths > f64::from(i32::MAX)
    {
        return Err(BridgeError::encoding(
            f64::from(temperature),
            "set point does not fit the controller payload",
        ));
    }
    Ok(hundredths as i32)
}

/// Hundredths of °C to °C
pub fn hundredths_to_celsius(raw: i32) -> f32 {
    (f64::from(raw) / 100.0) as f32
}

fn reply_with(payload: &[u8; PAYLOAD_LEN]) -> [u8; REPLY_FRAME_LEN] {
    let mut reply = [0u8; REPLY_FRAME_LEN];
    reply[0] = REPLY_START;
    reply[1..9].copy_from_slice(payload);
    reply[9..11].copy_from_slice(&checksum(payload));
    reply[11] = REPLY_END;
    reply
}

fn address_bytes(address: &str) -> BridgeResult<[u8; 2]> {
    match address.as_bytes() {
        [a, b] if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() => Ok([*a, *b]),
        _ => Err(BridgeError::frame(format!(
            "device address {:?} must be 2 alphanumeric characters",
            address
        ))),
    }
}

fn hex_byte(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0F) as usize]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_temperature_frame() {
        let frame = build_command("02", CommandCode::ReadInput1, 0).unwrap();
        assert_eq!(&frame, b"*02010000000043\r");
    }

    #[test]
    fn test_checksum_changes_with_any_field() {
        let base = checksum(b"020100000000");
        assert_eq!(base, checksum(b"020100000000"));
        assert_ne!(base, checksum(b"030100000000"));
        assert_ne!(base, checksum(b"020500000000"));
        assert_ne!(base, checksum(b"020100000001"));
    }

    #[test]
    fn test_setpoint_write_frame() {
        let payload = setpoint_payload(23.5).unwrap();
        assert_eq!(payload, 2350);
        let frame = build_command("02", CommandCode::WriteFixedSetValue, payload).unwrap();
        assert_eq!(&frame, b"*021c0000092eb6\r");

        let parsed = parse_command(&frame).unwrap();
        assert_eq!(parsed.code, 0x1c);
        assert_eq!(hundredths_to_celsius(parsed.payload), 23.5);
    }

    #[test]
    fn test_negative_setpoint_is_twos_complement() {
        let payload = setpoint_payload(-5.25).unwrap();
        assert_eq!(payload, -525);
        assert_eq!(&encode_payload(payload), b"fffffdf3");
        assert_eq!(decode_payload(b"fffffdf3").unwrap(), -525);
        assert_eq!(decode_payload(b"80000000").unwrap(), i32::MIN);
        assert_eq!(decode_payload(b"7fffffff").unwrap(), i32::MAX);
    }

    #[test]
    fn test_setpoint_rounds_half_to_even() {
        assert_eq!(setpoint_payload(0.125).unwrap(), 12);
        assert_eq!(setpoint_payload(0.375).unwrap(), 38);
        assert!(matches!(
            setpoint_payload(f32::NAN),
            Err(BridgeError::Encoding { .. })
        ));
        assert!(matches!(
            setpoint_payload(3.0e7),
            Err(BridgeError::Encoding { .. })
        ));
    }

    #[test]
    fn test_parse_controller_replies() {
        // 10 °C and an alarm bitmask of 9 as sent by the controller
        assert_eq!(parse_reply(b"*000003e8c0^", true).unwrap(), 1000);
        assert_eq!(parse_reply(b"*0000000989^", true).unwrap(), 9);
        assert_eq!(&build_reply(9), b"*0000000989^");
    }

    #[test]
    fn test_malformed_replies() {
        for reply in [
            &b"*000003e8c0"[..],
            b"*000003e8c1^",
            b"#000003e8c0^",
            b"*000003E8a0^",
            b"*XXXXXXXXc0^",
        ] {
            assert!(
                matches!(parse_reply(reply, true), Err(BridgeError::ProtocolFrame { .. })),
                "reply {:?}",
                String::from_utf8_lossy(reply)
            );
        }
        // Checksum left unchecked when verification is off
        assert_eq!(parse_reply(b"*000003e8ff^", false).unwrap(), 1000);
        assert_eq!(&build_rejection(), b"*XXXXXXXXc0^");
    }

    #[test]
    fn test_command_code_table() {
        assert_eq!(CommandCode::from_code(0x50), Some(CommandCode::ReadFixedSetValue));
        assert_eq!(CommandCode::from_code(0x99), None);
        assert_eq!(CommandCode::WriteFixedSetValue.to_string(), "1c");
        assert!(CommandCode::WriteSensorType.is_write());
        assert!(!CommandCode::ReadSensorType.is_write());
    }

    #[test]
    fn test_invalid_address() {
        assert!(build_command("2", CommandCode::ReadInput1, 0).is_err());
        assert!(build_command("0*", CommandCode::ReadInput1, 0).is_err());
    }
}
