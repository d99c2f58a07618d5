//! Sample payload bit-packing
//!
//! Streaming reports carry `data_count` samples compressed to
//! `data_bitwidth` bits each. The firmware supports 8, 12 and 16-bit
//! samples; 12-bit is the ADC's native resolution and packs two samples
//! into three bytes:
//!
//! ```text
//! bytes (a, b, c)  ->  v1 = a | ((b & 0xF0) << 4)
//!                      v2 = ((c & 0xF0) >> 4) | ((b & 0x0F) << 4) | ((c & 0x0F) << 8)
//! ```
//!
//! An odd sample count ends with a two-byte remainder decoded with the
//! `v1` formula. [`pack_samples`] is the exact inverse, used by the
//! virtual device and by round-trip tests.

use crate::error::{Error, Result};

/// Payload length in bytes for `count` samples of `bitwidth` bits.
///
/// Defined for any width so the receive pipeline can skip past a report
/// whose encoding it cannot expand.
pub fn payload_len(count: usize, bitwidth: u8) -> usize {
    (count * bitwidth as usize).div_ceil(8)
}

/// Expand a packed payload into `count` sample values
pub fn unpack_samples(bytes: &[u8], count: usize, bitwidth: u8) -> Result<Vec<u16>> {
    debug_assert_eq!(bytes.len(), payload_len(count, bitwidth));

    match bitwidth {
        8 => Ok(bytes.iter().map(|&b| b as u16).collect()),
        12 => {
            let mut samples = Vec::with_capacity(count);
            let pairs = count / 2;
            for triplet in bytes[..pairs * 3].chunks_exact(3) {
                let (a, b, c) = (triplet[0] as u16, triplet[1] as u16, triplet[2] as u16);
                samples.push(a | ((b & 0xF0) << 4));
                samples.push(((c & 0xF0) >> 4) | ((b & 0x0F) << 4) | ((c & 0x0F) << 8));
            }
            if count % 2 == 1 {
                let (a, b) = (bytes[pairs * 3] as u16, bytes[pairs * 3 + 1] as u16);
                samples.push(a | ((b & 0xF0) << 4));
            }
            Ok(samples)
        }
        16 => Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()),
        other => Err(Error::UnsupportedEncoding { bitwidth: other }),
    }
}

/// Compress samples into the firmware's packed payload form.
///
/// Samples wider than `bitwidth` are truncated, matching the firmware
/// compressor.
pub fn pack_samples(samples: &[u16], bitwidth: u8) -> Result<Vec<u8>> {
    match bitwidth {
        8 => Ok(samples.iter().map(|&v| v as u8).collect()),
        12 => {
            let mut bytes = Vec::with_capacity(payload_len(samples.len(), 12));
            for pair in samples.chunks_exact(2) {
                let (v1, v2) = (pair[0] & 0x0FFF, pair[1] & 0x0FFF);
                bytes.push((v1 & 0xFF) as u8);
                bytes.push((((v1 >> 8) << 4) | ((v2 >> 4) & 0x0F)) as u8);
                bytes.push((((v2 & 0x0F) << 4) | (v2 >> 8)) as u8);
            }
            if samples.len() % 2 == 1 {
                let v = samples[samples.len() - 1] & 0x0FFF;
                bytes.push((v & 0xFF) as u8);
                bytes.push(((v >> 8) << 4) as u8);
            }
            Ok(bytes)
        }
        16 => {
            let mut bytes = Vec::with_capacity(samples.len() * 2);
            for &v in samples {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            Ok(bytes)
        }
        other => Err(Error::UnsupportedEncoding { bitwidth: other }),
    }
}
