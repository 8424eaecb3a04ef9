//! Device parameters
//!
//! The eight values that make up one TRITON-LITE configuration, their
//! declared ranges, and the coercion applied to free-text user input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One configurable device parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    /// Delay before inflating the balloon again (seconds)
    SupStart,
    /// Supply valve open time (milliseconds)
    SupStop,
    /// Delay before deflating the balloon (seconds)
    ExhStart,
    /// Exhaust valve open time (milliseconds)
    ExhStop,
    /// LCD display mode
    LcdMode,
    /// Logging mode
    LogMode,
    /// Number of dives, 0 means unlimited
    DiveCount,
    /// Internal pressure threshold
    PressureThreshold,
}

impl Parameter {
    /// All parameters in frame order
    pub const ALL: [Parameter; 8] = [
        Parameter::SupStart,
        Parameter::SupStop,
        Parameter::ExhStart,
        Parameter::ExhStop,
        Parameter::LcdMode,
        Parameter::LogMode,
        Parameter::DiveCount,
        Parameter::PressureThreshold,
    ];

    /// Largest accepted value
    pub fn max(self) -> u16 {
        match self {
            Parameter::SupStart | Parameter::SupStop | Parameter::ExhStart | Parameter::ExhStop => {
                u16::MAX
            }
            Parameter::LcdMode => 15,
            Parameter::LogMode => 3,
            Parameter::DiveCount | Parameter::PressureThreshold => 1023,
        }
    }

    /// Wire/serde name of the parameter
    pub fn name(self) -> &'static str {
        match self {
            Parameter::SupStart => "supStart",
            Parameter::SupStop => "supStop",
            Parameter::ExhStart => "exhStart",
            Parameter::ExhStop => "exhStop",
            Parameter::LcdMode => "lcdMode",
            Parameter::LogMode => "logMode",
            Parameter::DiveCount => "diveCount",
            Parameter::PressureThreshold => "pressureThreshold",
        }
    }

    /// Clamp a numeric value into this parameter's range
    pub fn clamp(self, value: i64) -> u16 {
        value.clamp(0, self.max() as i64) as u16
    }

    /// Coerce free-text input into this parameter's range.
    ///
    /// Empty or non-numeric text becomes 0, negative values become 0 and
    /// anything above the maximum becomes the maximum. Trailing garbage after
    /// the leading digits is ignored, so `"12abc"` reads as 12.
    pub fn coerce(self, raw: &str) -> u16 {
        let text = raw.trim();
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };

        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        let digits = &digits[..end];
        if digits.is_empty() || negative {
            return 0;
        }

        // Anything that overflows u64 is certainly over the maximum
        match digits.parse::<u64>() {
            Ok(value) => value.min(self.max() as u64) as u16,
            Err(_) => self.max(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterSet {
    /// Seconds between deflation and the next inflation
    pub sup_start: u16,
    /// Supply valve open time in milliseconds
    pub sup_stop: u16,
    /// Seconds between inflation and the next deflation
    pub exh_start: u16,
    /// Exhaust valve open time in milliseconds
    pub exh_stop: u16,
    /// LCD display mode (0-15)
    pub lcd_mode: u16,
    /// Logging mode (0-3)
    pub log_mode: u16,
    /// Dive count (0-1023, only the low byte is sent)
    pub dive_count: u16,
    /// Internal pressure threshold (0-1023, only the low byte is sent)
    pub pressure_threshold: u16,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            sup_start: 0,
            sup_stop: 0,
            exh_start: 0,
            exh_stop: 0,
            lcd_mode: 0,
            log_mode: 3,
            dive_count: 0,
            pressure_threshold: 100,
        }
    }
}

impl ParameterSet {
    /// Read a parameter value
    pub fn get(&self, param: Parameter) -> u16 {
        match param {
            Parameter::SupStart => self.sup_start,
            Parameter::SupStop => self.sup_stop,
            Parameter::ExhStart => self.exh_start,
            Parameter::ExhStop => self.exh_stop,
            Parameter::LcdMode => self.lcd_mode,
            Parameter::LogMode => self.log_mode,
            Parameter::DiveCount => self.dive_count,
            Parameter::PressureThreshold => self.pressure_threshold,
        }
    }

    fn slot(&mut self, param: Parameter) -> &mut u16 {
        match param {
            Parameter::SupStart => &mut self.sup_start,
            Parameter::SupStop => &mut self.sup_stop,
            Parameter::ExhStart => &mut self.exh_start,
            Parameter::ExhStop => &mut self.exh_stop,
            Parameter::LcdMode => &mut self.lcd_mode,
            Parameter::LogMode => &mut self.log_mode,
            Parameter::DiveCount => &mut self.dive_count,
            Parameter::PressureThreshold => &mut self.pressure_threshold,
        }
    }

    /// Set a parameter from a numeric value, clamping it into range
    pub fn set(&mut self, param: Parameter, value: i64) -> u16 {
        let value = param.clamp(value);
        *self.slot(param) = value;
        value
    }

    /// Set a parameter from free-text input (see [`Parameter::coerce`])
    pub fn set_from_str(&mut self, param: Parameter, raw: &str) -> u16 {
        let value = param.coerce(raw);
        *self.slot(param) = value;
        value
    }

    /// Builder-style variant of [`ParameterSet::set`]
    pub fn with(mut self, param: Parameter, value: i64) -> Self {
        self.set(param, value);
        self
    }

    /// Copy of this set with every field forced into its declared range.
    ///
    /// Fields can exceed their range when the struct is built directly or
    /// deserialized, so the encoder always goes through this first.
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for param in Parameter::ALL {
            let value = self.get(param) as i64;
            out.set(param, value);
        }
        out
    }
}

/// Supplies the parameters to encode at send time
pub trait ParameterSource: Send + Sync {
    /// Current (already clamped) parameter values
    fn current_parameters(&self) -> ParameterSet;
}

impl ParameterSource for ParameterSet {
    fn current_parameters(&self) -> ParameterSet {
        self.clamped()
    }
}
