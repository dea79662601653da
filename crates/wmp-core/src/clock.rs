//! Gateway clock
//!
//! Gateways keep a wall clock set through `CFG:DATETIME`. The date is always
//! written `DD/MM/YYYY HH:MM:SS`.

use crate::error::{ClockRangeError, FormatError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// `CFG:DATETIME` payload format
pub const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Whether the clock follows real time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Set time plus elapsed monotonic time
    #[default]
    Running,
    /// Only moves through [`GatewayClock::advance`]
    Frozen,
}

/// Wall clock of a gateway
#[derive(Debug, Clone)]
pub struct GatewayClock {
    base: NaiveDateTime,
    set_at: Instant,
    mode: ClockMode,
}

impl GatewayClock {
    pub fn new(mode: ClockMode) -> Self {
        Self::starting_at(epoch(), mode)
    }

    pub fn starting_at(base: NaiveDateTime, mode: ClockMode) -> Self {
        Self {
            base,
            set_at: Instant::now(),
            mode,
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Current gateway time
    pub fn now(&self) -> NaiveDateTime {
        match self.mode {
            ClockMode::Frozen => self.base,
            ClockMode::Running => {
                let elapsed = Duration::from_std(self.set_at.elapsed())
                    .unwrap_or_else(|_| Duration::zero());
                self.base
                    .checked_add_signed(elapsed)
                    .unwrap_or(NaiveDateTime::MAX)
            }
        }
    }

    pub fn set(&mut self, datetime: NaiveDateTime) {
        self.base = datetime;
        self.set_at = Instant::now();
    }

    /// Parse and set; the clock is untouched on error
    pub fn set_text(&mut self, text: &str) -> Result<(), FormatError> {
        let datetime = parse_datetime(text)?;
        self.set(datetime);
        Ok(())
    }

    /// Move the base time forward; the clock is untouched on overflow
    pub fn advance(&mut self, by: std::time::Duration) -> Result<(), ClockRangeError> {
        let base = Duration::from_std(by)
            .ok()
            .and_then(|delta| self.base.checked_add_signed(delta))
            .ok_or(ClockRangeError(by))?;
        self.base = base;
        Ok(())
    }

    /// Current time as written on the wire
    pub fn format(&self) -> String {
        format_datetime(&self.now())
    }
}

impl Default for GatewayClock {
    fn default() -> Self {
        Self::new(ClockMode::default())
    }
}

/// Power-on time of a gateway, 01/01/2001 00:00:00
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2001, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn format_datetime(datetime: &NaiveDateTime) -> String {
    datetime.format(DATETIME_FORMAT).to_string()
}

/// Strict `DD/MM/YYYY HH:MM:SS` parse
///
/// Every field must be zero padded to its full width and in range.
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, FormatError> {
    const SHAPE: &[u8] = b"dd/dd/dddd dd:dd:dd";

    let bytes = text.as_bytes();
    let shape_ok = bytes.len() == SHAPE.len()
        && bytes.iter().zip(SHAPE).all(|(b, s)| match s {
            b'd' => b.is_ascii_digit(),
            other => b == other,
        });
    if !shape_ok {
        return Err(FormatError::new(text, "expected DD/MM/YYYY HH:MM:SS"));
    }

    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .map_err(|e| FormatError::new(text, e.to_string()))
}
