//! Emulator configuration
//!
//! Every field has a default matching a factory-fresh IS-IR-WMP-1, so an
//! empty TOML document is a valid configuration:
//!
//! ```toml
//! fansp = "A4"
//! vaneud = "A5S"
//! vanelr = "N"
//! dynamic_setpoint = true
//!
//! [mode_limits]
//! cool = { min = 160, max = 260 }
//!
//! [[info]]
//! key = "RSSI"
//! value = "-44"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use wmp_core::{
    Capabilities, CapabilitySpec, ClockMode, DeviceState, Function, GatewayClock, Identity, Mode,
    ModeLimits, SetpointLimits, SetpointPolicy, ValidationError, Value,
};
use tracing::debug;

use crate::error::{EmulatorError, Result};

/// Emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Fan speed compact notation
    pub fansp: String,
    /// Vertical vane compact notation
    pub vaneud: String,
    /// Horizontal vane compact notation
    pub vanelr: String,
    /// Supported modes, in `LIMITS:MODE` order
    pub modes: Vec<Mode>,
    /// Recompute setpoint limits from `mode_limits` on every MODE change
    pub dynamic_setpoint: bool,
    /// Setpoint limits when `dynamic_setpoint` is off
    pub limits: SetpointLimits,
    pub mode_limits: ModeTable,
    pub identity: Identity,
    /// Answers to `INFO`
    pub info: Vec<InfoEntry>,
    /// Close sockets without traffic for this long (seconds, 0 disables)
    pub idle_timeout_secs: u64,
    /// Warn when a client reconnects faster than this (milliseconds)
    pub min_reconnect_interval_ms: u64,
    pub clock: ClockMode,
    pub initial: InitialValues,
    /// Pending change notifications per peer before the oldest are dropped
    pub broadcast_capacity: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            fansp: "A3".to_string(),
            vaneud: "A3".to_string(),
            vanelr: "A3".to_string(),
            modes: Mode::ALL.to_vec(),
            dynamic_setpoint: false,
            limits: SetpointLimits::default(),
            mode_limits: ModeTable::default(),
            identity: Identity::default(),
            info: Vec::new(),
            idle_timeout_secs: 60,
            min_reconnect_interval_ms: 1000,
            clock: ClockMode::Running,
            initial: InitialValues::default(),
            broadcast_capacity: 256,
        }
    }
}

impl EmulatorConfig {
    /// Check the configuration, initial values included
    pub fn validate(&self) -> Result<()> {
        self.build_state().map(drop)
    }

    fn check_tables(&self) -> Result<()> {
        self.capabilities()?;
        if self.broadcast_capacity == 0 {
            return Err(EmulatorError::Config(
                "broadcast_capacity must be at least 1".to_string(),
            ));
        }
        if self.modes.is_empty() {
            return Err(EmulatorError::Config("no modes configured".to_string()));
        }
        let tables = std::iter::once(("limits", self.limits))
            .chain(self.mode_limits.entries().map(|(mode, l)| (mode.as_str(), l)));
        for (name, limits) in tables {
            if limits.min > limits.max {
                return Err(EmulatorError::Config(format!(
                    "{}: min {} is above max {}",
                    name, limits.min, limits.max
                )));
            }
        }
        Ok(())
    }

    /// Parse the compact notations into a capability table
    pub fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities {
            fan_speed: CapabilitySpec::parse_for(Function::FanSpeed, &self.fansp)?,
            vane_up_down: CapabilitySpec::parse_for(Function::VaneUpDown, &self.vaneud)?,
            vane_left_right: CapabilitySpec::parse_for(Function::VaneLeftRight, &self.vanelr)?,
            modes: self.modes.clone(),
        })
    }

    pub fn policy(&self) -> SetpointPolicy {
        if self.dynamic_setpoint {
            SetpointPolicy::Dynamic(self.mode_limits.to_mode_limits(self.limits))
        } else {
            SetpointPolicy::Static(self.limits)
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_interval_ms)
    }

    /// Build the initial device state
    ///
    /// Writable initial values must lie in their domain; a disabled function
    /// holds no value. Under a dynamic policy the setpoint is checked against
    /// the limits of the initial mode.
    pub fn build_state(&self) -> Result<DeviceState> {
        self.check_tables()?;
        let mut state = DeviceState::new(self.capabilities()?, self.policy())
            .with_clock(GatewayClock::new(self.clock));
        state.recompute_limits();
        for (function, value) in self.initial.values() {
            if !function.is_writable() {
                state.sync(function, value);
                continue;
            }
            match state.set(function, value) {
                Ok(()) => {}
                Err(ValidationError::Disabled(function)) => {
                    debug!("{} is disabled, no initial value", function);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(state)
    }
}

/// One `INFO:<key>,<value>` answer line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoEntry {
    pub key: String,
    pub value: String,
}

/// Per-mode setpoint limits for the dynamic policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeTable {
    pub auto: SetpointLimits,
    pub heat: SetpointLimits,
    pub dry: SetpointLimits,
    pub fan: SetpointLimits,
    pub cool: SetpointLimits,
}

impl ModeTable {
    fn entries(&self) -> impl Iterator<Item = (Mode, SetpointLimits)> {
        [
            (Mode::Auto, self.auto),
            (Mode::Heat, self.heat),
            (Mode::Dry, self.dry),
            (Mode::Fan, self.fan),
            (Mode::Cool, self.cool),
        ]
        .into_iter()
    }

    pub fn to_mode_limits(&self, fallback: SetpointLimits) -> ModeLimits {
        ModeLimits {
            modes: self.entries().collect::<HashMap<_, _>>(),
            fallback,
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        let table = ModeLimits::default();
        Self {
            auto: table.for_mode(Mode::Auto),
            heat: table.for_mode(Mode::Heat),
            dry: table.for_mode(Mode::Dry),
            fan: table.for_mode(Mode::Fan),
            cool: table.for_mode(Mode::Cool),
        }
    }
}

/// Power-on values, written as on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialValues {
    pub onoff: String,
    pub mode: String,
    pub setptemp: i32,
    pub fansp: String,
    pub vaneud: String,
    pub vanelr: String,
    pub ambtemp: i32,
    pub errstatus: String,
    pub errcode: String,
}

impl InitialValues {
    /// Values in gateway dump order
    pub fn values(&self) -> Vec<(Function, Value)> {
        vec![
            (Function::OnOff, Value::parse(&self.onoff)),
            (Function::Mode, Value::parse(&self.mode)),
            (Function::Setpoint, Value::Int(self.setptemp)),
            (Function::FanSpeed, Value::parse(&self.fansp)),
            (Function::VaneUpDown, Value::parse(&self.vaneud)),
            (Function::VaneLeftRight, Value::parse(&self.vanelr)),
            (Function::AmbientTemp, Value::Int(self.ambtemp)),
            (Function::ErrorStatus, Value::parse(&self.errstatus)),
            (Function::ErrorCode, Value::parse(&self.errcode)),
        ]
    }
}

impl Default for InitialValues {
    fn default() -> Self {
        Self {
            onoff: "OFF".to_string(),
            mode: "AUTO".to_string(),
            setptemp: 210,
            fansp: "AUTO".to_string(),
            vaneud: "AUTO".to_string(),
            vanelr: "AUTO".to_string(),
            ambtemp: 180,
            errstatus: "OK".to_string(),
            errcode: String::new(),
        }
    }
}
