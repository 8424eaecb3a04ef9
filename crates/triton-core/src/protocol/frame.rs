//! Configuration frame encoding
//!
//! Frame format (20 bytes, sent as 40 lowercase hex characters):
//! - 1 byte: Header `'$'`
//! - 6 bytes: Year offset from 2000, month, day, hour, minute, second
//! - 8 bytes: supStart, supStop, exhStart, exhStop (u16, big-endian)
//! - 1 byte: lcdMode (high nibble) | logMode (low nibble)
//! - 1 byte: diveCount (low byte only)
//! - 1 byte: pressureThreshold (low byte only)
//! - 1 byte: Checksum (8-bit sum of all preceding bytes)
//! - 1 byte: Footer `';'`

use byteorder::{BigEndian, ByteOrder};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt::{self, Write};

use super::ProtocolError;
use crate::params::ParameterSet;

/// Frame start marker
pub const FRAME_HEADER: u8 = b'$';

/// Frame end marker
pub const FRAME_FOOTER: u8 = b';';

/// Total encoded frame size
pub const FRAME_LEN: usize = 20;

const CHECKSUM_INDEX: usize = FRAME_LEN - 2;

/// An encoded configuration frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Encode a parameter set stamped with `now`.
    ///
    /// Parameters are clamped to their declared ranges first. `diveCount`
    /// and `pressureThreshold` accept up to 1023 but the device reads a
    /// single byte, so only their low 8 bits are sent.
    pub fn encode(params: &ParameterSet, now: &NaiveDateTime) -> Self {
        let p = params.clamped();
        let mut bytes = [0u8; FRAME_LEN];

        bytes[0] = FRAME_HEADER;
        bytes[1] = (now.year() - 2000) as u8;
        bytes[2] = now.month() as u8;
        bytes[3] = now.day() as u8;
        bytes[4] = now.hour() as u8;
        bytes[5] = now.minute() as u8;
        bytes[6] = now.second() as u8;

        BigEndian::write_u16(&mut bytes[7..9], p.sup_start);
        BigEndian::write_u16(&mut bytes[9..11], p.sup_stop);
        BigEndian::write_u16(&mut bytes[11..13], p.exh_start);
        BigEndian::write_u16(&mut bytes[13..15], p.exh_stop);

        bytes[15] = (((p.lcd_mode & 0x0f) << 4) | (p.log_mode & 0x0f)) as u8;
        bytes[16] = (p.dive_count & 0xff) as u8;
        bytes[17] = (p.pressure_threshold & 0xff) as u8;

        bytes[CHECKSUM_INDEX] = checksum(&bytes[..CHECKSUM_INDEX]);
        bytes[FRAME_LEN - 1] = FRAME_FOOTER;

        Self { bytes }
    }

    /// Validate and wrap a received frame
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        if data[0] != FRAME_HEADER {
            return Err(ProtocolError::InvalidDelimiter {
                index: 0,
                found: data[0],
            });
        }
        if data[FRAME_LEN - 1] != FRAME_FOOTER {
            return Err(ProtocolError::InvalidDelimiter {
                index: FRAME_LEN - 1,
                found: data[FRAME_LEN - 1],
            });
        }

        let expected = checksum(&data[..CHECKSUM_INDEX]);
        let actual = data[CHECKSUM_INDEX];
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(data);
        Ok(Self { bytes })
    }

    /// Validate and wrap a frame received as hex text
    pub fn from_hex(text: &str) -> Result<Self, ProtocolError> {
        Self::from_bytes(&decode_hex(text.trim())?)
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The checksum byte
    pub fn checksum(&self) -> u8 {
        self.bytes[CHECKSUM_INDEX]
    }

    /// Lowercase hex text, two digits per byte, no separators
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(FRAME_LEN * 2);
        for b in &self.bytes {
            // Writing into a String cannot fail
            let _ = write!(out, "{:02x}", b);
        }
        out
    }

    /// Decode the parameter fields carried by this frame
    pub fn parameters(&self) -> ParameterSet {
        let b = &self.bytes;
        ParameterSet {
            sup_start: BigEndian::read_u16(&b[7..9]),
            sup_stop: BigEndian::read_u16(&b[9..11]),
            exh_start: BigEndian::read_u16(&b[11..13]),
            exh_stop: BigEndian::read_u16(&b[13..15]),
            lcd_mode: (b[15] >> 4) as u16,
            log_mode: (b[15] & 0x0f) as u16,
            dive_count: b[16] as u16,
            pressure_threshold: b[17] as u16,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Unsigned 8-bit sum of `bytes`, modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn decode_hex(text: &str) -> Result<Vec<u8>, ProtocolError> {
    if text.len() % 2 != 0 {
        return Err(ProtocolError::InvalidHex(format!(
            "odd number of digits ({})",
            text.len()
        )));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    ProtocolError::InvalidHex(String::from_utf8_lossy(pair).into_owned())
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameter;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_frame_structure() {
        let frame = Frame::encode(&ParameterSet::default(), &at(2025, 12, 31, 23, 59, 59));
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(bytes[0], 0x24);
        assert_eq!(bytes[19], 0x3b);
        assert_eq!(bytes[18], checksum(&bytes[..18]));
        assert_eq!(&bytes[1..7], &[25, 12, 31, 23, 59, 59]);
    }

    #[test]
    fn test_big_endian_fields() {
        let params = ParameterSet::default()
            .with(Parameter::SupStart, 0x1234)
            .with(Parameter::ExhStop, 0xabcd);
        let frame = Frame::encode(&params, &at(2024, 1, 1, 0, 0, 0));

        assert_eq!(&frame.as_bytes()[7..9], &[0x12, 0x34]);
        assert_eq!(&frame.as_bytes()[13..15], &[0xab, 0xcd]);
    }

    #[test]
    fn test_mode_nibbles() {
        let params = ParameterSet::default()
            .with(Parameter::LcdMode, 15)
            .with(Parameter::LogMode, 1);
        let frame = Frame::encode(&params, &at(2024, 1, 1, 0, 0, 0));
        assert_eq!(frame.as_bytes()[15], 0xf1);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xff, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_hex_is_lowercase_and_padded() {
        let frame = Frame::encode(&ParameterSet::default(), &at(2024, 1, 2, 3, 4, 5));
        let hex = frame.to_hex();

        assert_eq!(hex.len(), FRAME_LEN * 2);
        assert!(hex.starts_with("2418010203040500"));
        assert!(hex.ends_with("3b"));
        assert_eq!(hex, hex.to_lowercase());
    }

    #[test]
    fn test_from_bytes_rejects_corruption() {
        let frame = Frame::encode(&ParameterSet::default(), &at(2024, 6, 1, 8, 0, 0));
        let mut data = frame.as_bytes().to_vec();
        data[9] ^= 0x40;

        assert!(matches!(
            Frame::from_bytes(&data),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            Frame::from_bytes(&data[..10]),
            Err(ProtocolError::InvalidLength { actual: 10, .. })
        ));
    }

    #[test]
    fn test_from_hex_rejects_bad_digits() {
        assert!(matches!(
            Frame::from_hex("zz"),
            Err(ProtocolError::InvalidHex(_))
        ));
        assert!(matches!(
            Frame::from_hex("abc"),
            Err(ProtocolError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_parameters_survive_within_byte_width() {
        let params = ParameterSet::default()
            .with(Parameter::SupStop, 500)
            .with(Parameter::LcdMode, 4)
            .with(Parameter::DiveCount, 200);
        let frame = Frame::encode(&params, &at(2024, 6, 1, 8, 0, 0));
        assert_eq!(frame.parameters(), params);
    }
}
