//! Setpoint limits
//!
//! Setpoints are in tenths of a degree Celsius (`210` = 21.0 °C). A gateway
//! either reports fixed limits or limits that depend on the current mode.

use crate::types::{Mode, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Inclusive setpoint bounds in tenths of a degree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetpointLimits {
    pub min: i32,
    pub max: i32,
}

impl SetpointLimits {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, setpoint: i32) -> bool {
        setpoint >= self.min && setpoint <= self.max
    }

    pub fn clamp(&self, setpoint: i32) -> i32 {
        setpoint.clamp(self.min, self.max)
    }

    /// `[min, max]` as sent in a `LIMITS:SETPTEMP` response
    pub fn to_values(&self) -> Vec<Value> {
        vec![Value::Int(self.min), Value::Int(self.max)]
    }

    /// Read a `LIMITS:SETPTEMP` response
    pub fn from_values(values: &[Value]) -> Option<Self> {
        match values {
            [Value::Int(min), Value::Int(max)] if min <= max => Some(Self::new(*min, *max)),
            _ => None,
        }
    }
}

impl Default for SetpointLimits {
    fn default() -> Self {
        Self::new(180, 300)
    }
}

impl fmt::Display for SetpointLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.min, self.max)
    }
}

/// Per-mode limits table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeLimits {
    pub modes: HashMap<Mode, SetpointLimits>,
    /// Used for modes missing from the table
    pub fallback: SetpointLimits,
}

impl ModeLimits {
    pub fn for_mode(&self, mode: Mode) -> SetpointLimits {
        self.modes.get(&mode).copied().unwrap_or(self.fallback)
    }
}

impl Default for ModeLimits {
    fn default() -> Self {
        let modes = HashMap::from([
            (Mode::Auto, SetpointLimits::new(180, 300)),
            (Mode::Heat, SetpointLimits::new(200, 300)),
            (Mode::Cool, SetpointLimits::new(180, 250)),
            (Mode::Dry, SetpointLimits::new(180, 250)),
            (Mode::Fan, SetpointLimits::new(180, 300)),
        ]);
        Self {
            modes,
            fallback: SetpointLimits::default(),
        }
    }
}

/// How setpoint limits follow the mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetpointPolicy {
    /// Limits never change
    Static(SetpointLimits),
    /// Limits are recomputed from the table whenever MODE changes
    Dynamic(ModeLimits),
}

impl SetpointPolicy {
    /// Limits for the given mode, `None` meaning mode unknown
    pub fn limits_for(&self, mode: Option<Mode>) -> SetpointLimits {
        match self {
            SetpointPolicy::Static(limits) => *limits,
            SetpointPolicy::Dynamic(table) => match mode {
                Some(mode) => table.for_mode(mode),
                None => table.fallback,
            },
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, SetpointPolicy::Dynamic(_))
    }
}

impl Default for SetpointPolicy {
    fn default() -> Self {
        SetpointPolicy::Static(SetpointLimits::default())
    }
}
