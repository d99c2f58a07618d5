//! Command frame encoder and report header decoder
//!
//! Command frames are `<length:u8><opcode:u8><args little-endian>` with
//! `length = 2 + sum of argument widths`. A future firmware may widen the
//! length field to `u16`; until a firmware version signals support, only
//! the one-byte form is emitted.
//!
//! Report headers are `<opcode:u8><fields little-endian>`; the opcode
//! byte is the first descriptor field (`report_code`).

use crate::descriptor::{CommandDescriptor, FieldWidth, ReportDescriptor};
use crate::error::{Error, Result};

/// Fixed part of the command length byte (opcode plus the reserved slot)
pub const FRAME_OVERHEAD: usize = 2;

/// Encode one command invocation into a wire frame.
///
/// `values` holds one value per descriptor field, in descriptor order.
/// Every value is checked against the field's width and its `min`/`max`
/// annotations before any byte is produced; a failed check leaves
/// nothing written.
pub fn encode_command(cmd: &CommandDescriptor, values: &[i128]) -> Result<Vec<u8>> {
    debug_assert_eq!(values.len(), cmd.fields.len());

    for (field, &value) in cmd.fields.iter().zip(values) {
        field.check(value)?;
    }

    let mut frame = Vec::with_capacity(2 + cmd.args_len());
    frame.push((FRAME_OVERHEAD + cmd.args_len()) as u8);
    frame.push(cmd.opcode);
    for (field, &value) in cmd.fields.iter().zip(values) {
        // Two's-complement truncation: the width check above guarantees
        // the value survives the round trip.
        let raw = value as u64;
        frame.extend_from_slice(&raw.to_le_bytes()[..field.width.bytes()]);
    }
    Ok(frame)
}

/// Decode a full report header into one value per descriptor field.
///
/// `bytes` must be exactly `desc.header_len()` long and start with the
/// opcode byte.
pub fn decode_header(desc: &ReportDescriptor, bytes: &[u8]) -> Result<Vec<i128>> {
    if bytes.len() != desc.header_len() {
        return Err(Error::TruncatedHeader {
            opcode: desc.opcode,
            got: bytes.len(),
            expected: desc.header_len(),
        });
    }

    let mut values = Vec::with_capacity(desc.fields.len());
    let mut at = 0;
    for field in &desc.fields {
        let width = field.width.bytes();
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&bytes[at..at + width]);
        let unsigned = u64::from_le_bytes(raw);
        let value = if field.signed {
            sign_extend(unsigned, field.width)
        } else {
            unsigned as i128
        };
        values.push(value);
        at += width;
    }
    Ok(values)
}

/// Decode the argument bytes of a received command frame (the bytes
/// after the length and opcode). The device side of [`encode_command`];
/// the virtual device uses it to act on host frames.
pub fn decode_args(cmd: &CommandDescriptor, bytes: &[u8]) -> Result<Vec<i128>> {
    if bytes.len() != cmd.args_len() {
        return Err(Error::TruncatedHeader {
            opcode: cmd.opcode,
            got: bytes.len(),
            expected: cmd.args_len(),
        });
    }

    let mut values = Vec::with_capacity(cmd.fields.len());
    let mut at = 0;
    for field in &cmd.fields {
        let width = field.width.bytes();
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&bytes[at..at + width]);
        let unsigned = u64::from_le_bytes(raw);
        values.push(if field.signed {
            sign_extend(unsigned, field.width)
        } else {
            unsigned as i128
        });
        at += width;
    }
    Ok(values)
}

/// Encode a report header from one value per descriptor field. The
/// device side of [`decode_header`].
pub fn encode_header(desc: &ReportDescriptor, values: &[i128]) -> Vec<u8> {
    debug_assert_eq!(values.len(), desc.fields.len());

    let mut bytes = Vec::with_capacity(desc.header_len());
    for (field, &value) in desc.fields.iter().zip(values) {
        let raw = value as u64;
        bytes.extend_from_slice(&raw.to_le_bytes()[..field.width.bytes()]);
    }
    bytes
}

fn sign_extend(raw: u64, width: FieldWidth) -> i128 {
    match width {
        FieldWidth::W8 => raw as u8 as i8 as i128,
        FieldWidth::W16 => raw as u16 as i16 as i128,
        FieldWidth::W32 => raw as u32 as i32 as i128,
        FieldWidth::W64 => raw as i64 as i128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldDescriptor;

    fn field(name: &str, signed: bool, width: FieldWidth) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            signed,
            width,
            min: None,
            max: None,
            default: None,
            comment: String::new(),
        }
    }

    fn gpio_out() -> CommandDescriptor {
        let mut gpio = field("gpio", false, FieldWidth::W8);
        gpio.min = Some(0);
        gpio.max = Some(29);
        let mut value = field("value", false, FieldWidth::W8);
        value.min = Some(0);
        value.max = Some(1);
        CommandDescriptor {
            name: "gpio_out".into(),
            opcode: 1,
            fields: vec![gpio, value],
        }
    }

    #[test]
    fn test_frame_layout() {
        // <2 + sum(widths)> <opcode> <fields LE>
        let cmd = CommandDescriptor {
            name: "mixed".into(),
            opcode: 7,
            fields: vec![
                field("a", false, FieldWidth::W8),
                field("b", false, FieldWidth::W16),
                field("c", false, FieldWidth::W32),
            ],
        };
        let frame = encode_command(&cmd, &[0x11, 0x2233, 0x4455_6677]).unwrap();
        assert_eq!(
            frame,
            [9, 7, 0x11, 0x33, 0x22, 0x77, 0x66, 0x55, 0x44]
        );
    }

    #[test]
    fn test_no_argument_frame() {
        let cmd = CommandDescriptor {
            name: "identify".into(),
            opcode: 0,
            fields: vec![],
        };
        assert_eq!(encode_command(&cmd, &[]).unwrap(), [2, 0]);
    }

    #[test]
    fn test_signed_argument_encoding() {
        let cmd = CommandDescriptor {
            name: "trig".into(),
            opcode: 3,
            fields: vec![field("level", true, FieldWidth::W16)],
        };
        let frame = encode_command(&cmd, &[-2]).unwrap();
        assert_eq!(frame, [4, 3, 0xFE, 0xFF]);
    }

    #[test]
    fn test_bounds_violation_names_field() {
        let err = encode_command(&gpio_out(), &[30, 0]).unwrap_err();
        assert_eq!(
            err,
            Error::AboveMaximum {
                field: "gpio".into(),
                value: 30,
                max: 29
            }
        );

        let err = encode_command(&gpio_out(), &[-1, 0]).unwrap_err();
        assert!(matches!(err, Error::WidthOverflow { .. }));
    }

    #[test]
    fn test_bounds_accept_inclusive_range() {
        assert!(encode_command(&gpio_out(), &[0, 0]).is_ok());
        assert!(encode_command(&gpio_out(), &[29, 1]).is_ok());
    }

    #[test]
    fn test_header_decode_round() {
        let desc = ReportDescriptor {
            name: "adc".into(),
            opcode: 6,
            fields: vec![
                field("report_code", false, FieldWidth::W8),
                field("count", false, FieldWidth::W16),
                field("level", true, FieldWidth::W16),
                field("stamp", false, FieldWidth::W64),
            ],
            has_payload: false,
        };
        let mut bytes = vec![6u8, 0xE8, 0x03, 0xFE, 0xFF];
        bytes.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());

        let values = decode_header(&desc, &bytes).unwrap();
        assert_eq!(values, [6, 1000, -2, 0x0102_0304_0506_0708]);
    }

    #[test]
    fn test_header_decode_rejects_wrong_length() {
        let desc = ReportDescriptor {
            name: "short".into(),
            opcode: 2,
            fields: vec![field("report_code", false, FieldWidth::W8)],
            has_payload: false,
        };
        let err = decode_header(&desc, &[2, 9]).unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader { opcode: 2, .. }));
    }

    #[test]
    fn test_command_args_round_trip() {
        let cmd = CommandDescriptor {
            name: "move".into(),
            opcode: 8,
            fields: vec![
                field("stepper", false, FieldWidth::W8),
                field("to", false, FieldWidth::W32),
                field("speed", true, FieldWidth::W16),
            ],
        };
        let values = [2i128, 0x8000_0000, -300];
        let frame = encode_command(&cmd, &values).unwrap();
        assert_eq!(decode_args(&cmd, &frame[2..]).unwrap(), values);
    }

    #[test]
    fn test_header_encode_matches_decode() {
        let desc = ReportDescriptor {
            name: "status".into(),
            opcode: 9,
            fields: vec![
                field("report_code", false, FieldWidth::W8),
                field("nanopos", false, FieldWidth::W32),
            ],
            has_payload: false,
        };
        let bytes = encode_header(&desc, &[9, 0x8000_0000]);
        assert_eq!(bytes, [9, 0x00, 0x00, 0x00, 0x80]);
        assert_eq!(decode_header(&desc, &bytes).unwrap(), [9, 0x8000_0000]);
    }

    #[test]
    fn test_u64_full_range_survives() {
        let desc = ReportDescriptor {
            name: "wide".into(),
            opcode: 0,
            fields: vec![
                field("report_code", false, FieldWidth::W8),
                field("big", false, FieldWidth::W64),
            ],
            has_payload: false,
        };
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let values = decode_header(&desc, &bytes).unwrap();
        assert_eq!(values[1], u64::MAX as i128);
    }
}
