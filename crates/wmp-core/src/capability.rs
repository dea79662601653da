//! Compact capability notation
//!
//! A function's value domain is described by a token `[A][X][S]`:
//!
//! | Token | Domain |
//! |-------|--------|
//! | `A7S` | `AUTO, 1..7, SWING` |
//! | `3S`  | `1..3, SWING` |
//! | `4`   | `1..4` |
//! | `A`   | `AUTO` |
//! | `N`, empty | disabled |
//!
//! Swing only exists for vanes; a fan-speed token carrying `S` is rejected.

use crate::error::CapabilityError;
use crate::types::{Function, Value};
use std::fmt;
use std::str::FromStr;

/// Highest discrete position
pub const MAX_POSITIONS: u8 = 9;

/// Value domain of a fan or vane function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySpec {
    pub supports_auto: bool,
    /// Discrete positions `1..=positions`, 0 when none
    pub positions: u8,
    pub supports_swing: bool,
    pub disabled: bool,
}

impl CapabilitySpec {
    /// The disabled domain (`N`)
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }

    pub fn new(supports_auto: bool, positions: u8, supports_swing: bool) -> Self {
        let spec = Self {
            supports_auto,
            positions: positions.min(MAX_POSITIONS),
            supports_swing,
            disabled: false,
        };
        if spec.is_empty() {
            Self::disabled()
        } else {
            spec
        }
    }

    /// Parse a compact token, swing allowed
    pub fn parse(token: &str) -> Result<Self, CapabilityError> {
        let token = token.trim().to_ascii_uppercase();
        if token.is_empty() || token == "N" {
            return Ok(Self::disabled());
        }

        let invalid = || CapabilityError::InvalidToken(token.clone());
        let mut rest = token.as_str();

        let supports_auto = match rest.strip_prefix('A') {
            Some(r) => {
                rest = r;
                true
            }
            None => false,
        };

        let mut positions = 0;
        if let Some(digit) = rest.chars().next().filter(|c| c.is_ascii_digit()) {
            positions = digit.to_digit(10).ok_or_else(invalid)? as u8;
            if positions == 0 {
                return Err(invalid());
            }
            rest = &rest[1..];
        }

        let supports_swing = match rest.strip_prefix('S') {
            Some(r) => {
                rest = r;
                true
            }
            None => false,
        };

        if !rest.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(supports_auto, positions, supports_swing))
    }

    /// Parse a token for a specific function, rejecting swing outside vanes
    pub fn parse_for(function: Function, token: &str) -> Result<Self, CapabilityError> {
        let spec = Self::parse(token)?;
        if spec.supports_swing && !function.is_vane() {
            return Err(CapabilityError::SwingNotAllowed(function));
        }
        Ok(spec)
    }

    /// Rebuild a domain from a `LIMITS` response
    pub fn from_values(values: &[Value]) -> Self {
        let supports_auto = values.contains(&Value::Auto);
        let supports_swing = values.contains(&Value::Swing);
        let positions = values
            .iter()
            .filter_map(Value::as_i32)
            .filter(|n| (1..=MAX_POSITIONS as i32).contains(n))
            .max()
            .unwrap_or(0) as u8;
        Self::new(supports_auto, positions, supports_swing)
    }

    fn is_empty(&self) -> bool {
        !self.supports_auto && self.positions == 0 && !self.supports_swing
    }

    /// Whether `value` lies in this domain
    pub fn validate(&self, value: &Value) -> bool {
        if self.disabled {
            return false;
        }
        match value {
            Value::Auto => self.supports_auto,
            Value::Swing => self.supports_swing,
            Value::Int(n) => *n >= 1 && *n <= self.positions as i32,
            Value::Word(_) => false,
        }
    }

    /// Every legal value, in gateway order
    pub fn enumerate(&self) -> Vec<Value> {
        if self.disabled {
            return Vec::new();
        }
        let mut values = Vec::with_capacity(self.positions as usize + 2);
        if self.supports_auto {
            values.push(Value::Auto);
        }
        values.extend((1..=self.positions as i32).map(Value::Int));
        if self.supports_swing {
            values.push(Value::Swing);
        }
        values
    }
}

impl FromStr for CapabilitySpec {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CapabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disabled {
            return f.write_str("N");
        }
        if self.supports_auto {
            f.write_str("A")?;
        }
        if self.positions > 0 {
            write!(f, "{}", self.positions)?;
        }
        if self.supports_swing {
            f.write_str("S")?;
        }
        Ok(())
    }
}
