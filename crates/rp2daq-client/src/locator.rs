//! Device locator: find and identity-check an rp2daq endpoint
//!
//! Enumerates serial endpoints advertising the Pico's USB CDC IDs,
//! probes each with a hard-coded identify frame (the receive threads do
//! not exist yet at this point) and validates the 34-byte response. The
//! winning endpoint's path is returned, not a held handle; the runtime
//! re-opens it for normal operation.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPortType;

use crate::error::{Error, Result};

/// Raspberry Pi vendor ID of the Pico CDC interface
pub const USB_VID: u16 = 0x2E8A;
/// Product ID of the Pico CDC interface
pub const USB_PID: u16 = 0x000A;

/// Hard-coded probe frame for opcode 0
pub const PROBE_FRAME: [u8; 2] = [0x01, 0x00];

/// Identity string length: `rp2daq_` + YYMMDD + `_` + 16 hex digits
pub const IDENTITY_LEN: usize = 30;
/// Full identify response: 4-byte report header plus the identity
pub const RESPONSE_LEN: usize = 34;

/// Round-trip allowance for the probe exchange
const PROBE_SETTLE: Duration = Duration::from_millis(250);

/// Parsed identify response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Firmware date stamp, e.g. `240715`
    pub version: u32,
    /// 16 uppercase hex digits of the flash chip's unique ID
    pub unique_id: String,
}

/// Parse the 30-byte identity tail: `rp2daq_<YYMMDD>_<16 hex>`
pub fn parse_identity(tail: &[u8]) -> Result<DeviceIdentity> {
    if tail.len() != IDENTITY_LEN {
        return Err(Error::BadIdentity(format!(
            "identity is {} bytes, expected {}",
            tail.len(),
            IDENTITY_LEN
        )));
    }
    if &tail[..6] != b"rp2daq" {
        return Err(Error::BadIdentity(format!(
            "bad magic {:?}",
            String::from_utf8_lossy(&tail[..6])
        )));
    }

    let date = &tail[7..13];
    if !date.iter().all(u8::is_ascii_digit) {
        return Err(Error::BadIdentity("non-numeric firmware date".into()));
    }
    let version = std::str::from_utf8(date).unwrap().parse().unwrap();

    let id = &tail[14..IDENTITY_LEN];
    if !id
        .iter()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    {
        return Err(Error::BadIdentity("malformed unique ID".into()));
    }

    Ok(DeviceIdentity {
        version,
        unique_id: std::str::from_utf8(id).unwrap().to_string(),
    })
}

/// Parse a full 34-byte identify response (report header skipped)
pub fn parse_response(frame: &[u8]) -> Result<DeviceIdentity> {
    if frame.len() != RESPONSE_LEN {
        return Err(Error::BadIdentity(format!(
            "response is {} bytes, expected {}",
            frame.len(),
            RESPONSE_LEN
        )));
    }
    parse_identity(&frame[RESPONSE_LEN - IDENTITY_LEN..])
}

/// Canonical serial-number form: uppercase, colons stripped
pub fn normalize_serial(serial: &str) -> String {
    serial.replace(':', "").to_ascii_uppercase()
}

/// Enumerate endpoints advertising the device's USB IDs, with their
/// serial numbers; no probing is done
pub fn list_candidates() -> Result<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    for port in serialport::available_ports()? {
        if let SerialPortType::UsbPort(info) = &port.port_type {
            if info.vid == USB_VID && info.pid == USB_PID {
                out.push((port.port_name, info.serial_number.clone()));
            }
        }
    }
    Ok(out)
}

/// Find a matching device and return its endpoint path.
///
/// Candidates are filtered by USB IDs and, when given, by serial
/// number. The first endpoint whose identity parses, matches the serial
/// filter and carries exactly `required_version` wins. A device whose
/// version differs surfaces as [`Error::IncompatibleFirmware`] when no
/// better candidate exists.
pub fn locate(required_version: u32, require_serial: Option<&str>) -> Result<String> {
    let wanted = require_serial.map(normalize_serial);
    let mut incompatible: Option<u32> = None;

    for port in serialport::available_ports()? {
        let usb = match &port.port_type {
            SerialPortType::UsbPort(info) if info.vid == USB_VID && info.pid == USB_PID => info,
            _ => continue,
        };
        if let (Some(wanted), Some(serial)) = (&wanted, &usb.serial_number) {
            if &normalize_serial(serial) != wanted {
                continue;
            }
        }

        log::debug!("probing {}", port.port_name);
        let identity = match probe(&port.port_name) {
            Ok(identity) => identity,
            Err(e) => {
                log::info!("{}: {}", port.port_name, e);
                continue;
            }
        };
        if let Some(wanted) = &wanted {
            if &identity.unique_id != wanted {
                log::info!(
                    "{}: device ID {} does not match required {}",
                    port.port_name,
                    identity.unique_id,
                    wanted
                );
                continue;
            }
        }
        if identity.version != required_version {
            log::warn!(
                "{}: firmware version {} does not match descriptor version {}",
                port.port_name,
                identity.version,
                required_version
            );
            incompatible = Some(identity.version);
            continue;
        }

        log::info!(
            "connected to rp2daq {} (firmware {}) on {}",
            identity.unique_id,
            identity.version,
            port.port_name
        );
        return Ok(port.port_name);
    }

    match incompatible {
        Some(found) => Err(Error::IncompatibleFirmware {
            found,
            required: required_version,
        }),
        None => Err(Error::DeviceNotFound),
    }
}

/// Raw identify exchange on a not-yet-attached endpoint
fn probe(path: &str) -> Result<DeviceIdentity> {
    let mut port = serialport::new(path, 115_200)
        .timeout(Duration::from_millis(500))
        .open()?;

    port.write_all(&PROBE_FRAME)?;
    port.flush()?;
    std::thread::sleep(PROBE_SETTLE);

    let mut response = [0u8; RESPONSE_LEN];
    port.read_exact(&mut response)?;
    parse_response(&response)
}
