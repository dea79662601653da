//! Device state
//!
//! Canonical function values of one gateway together with the domain they
//! are validated against: capability table, setpoint limits and clock.

use crate::capability::CapabilitySpec;
use crate::clock::GatewayClock;
use crate::error::{FormatError, ValidationError};
use crate::limits::{SetpointLimits, SetpointPolicy};
use crate::types::{Function, Mode, Value};
use crate::SETPOINT_NULL;
use std::collections::HashMap;
use std::fmt;

/// Change listener, called with the function and its new value
pub type ChangeListener = Box<dyn Fn(Function, &Value) + Send + Sync>;

/// Value domains of the non-numeric functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub fan_speed: CapabilitySpec,
    pub vane_up_down: CapabilitySpec,
    pub vane_left_right: CapabilitySpec,
    /// Supported modes, in gateway order
    pub modes: Vec<Mode>,
}

impl Capabilities {
    /// Compact spec of a fan or vane function
    pub fn spec(&self, function: Function) -> Option<&CapabilitySpec> {
        match function {
            Function::FanSpeed => Some(&self.fan_speed),
            Function::VaneUpDown => Some(&self.vane_up_down),
            Function::VaneLeftRight => Some(&self.vane_left_right),
            _ => None,
        }
    }

    fn spec_mut(&mut self, function: Function) -> Option<&mut CapabilitySpec> {
        match function {
            Function::FanSpeed => Some(&mut self.fan_speed),
            Function::VaneUpDown => Some(&mut self.vane_up_down),
            Function::VaneLeftRight => Some(&mut self.vane_left_right),
            _ => None,
        }
    }

    pub fn supports_mode(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        let a3 = CapabilitySpec::new(true, 3, false);
        Self {
            fan_speed: a3,
            vane_up_down: a3,
            vane_left_right: a3,
            modes: Mode::ALL.to_vec(),
        }
    }
}

/// Canonical state of a gateway
///
/// Every value accepted through [`DeviceState::set`] lies in its function's
/// domain. [`DeviceState::sync`] is the authoritative path for values
/// reported by a gateway and skips validation.
pub struct DeviceState {
    values: HashMap<Function, Value>,
    capabilities: Capabilities,
    policy: SetpointPolicy,
    limits: SetpointLimits,
    clock: GatewayClock,
    listeners: Vec<ChangeListener>,
}

impl DeviceState {
    pub fn new(capabilities: Capabilities, policy: SetpointPolicy) -> Self {
        let limits = policy.limits_for(None);
        Self {
            values: HashMap::new(),
            capabilities,
            policy,
            limits,
            clock: GatewayClock::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: GatewayClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn get(&self, function: Function) -> Option<&Value> {
        self.values.get(&function)
    }

    /// Current mode, if one is stored and recognised
    pub fn mode(&self) -> Option<Mode> {
        self.get(Function::Mode).and_then(Mode::from_value)
    }

    /// Check a value against the function's domain
    pub fn validate(&self, function: Function, value: &Value) -> Result<(), ValidationError> {
        let out_of_domain = || ValidationError::OutOfDomain {
            function,
            value: value.clone(),
        };

        if !function.is_writable() {
            return Err(ValidationError::ReadOnly(function));
        }

        match function {
            Function::OnOff => match value.as_word() {
                Some("ON") | Some("OFF") => Ok(()),
                _ => Err(out_of_domain()),
            },
            Function::Mode => match Mode::from_value(value) {
                Some(mode) if self.capabilities.supports_mode(mode) => Ok(()),
                _ => Err(out_of_domain()),
            },
            Function::Setpoint => match value.as_i32() {
                Some(setpoint) if self.limits.contains(setpoint) => Ok(()),
                _ => Err(out_of_domain()),
            },
            _ => match self.capabilities.spec(function) {
                Some(spec) if spec.disabled => Err(ValidationError::Disabled(function)),
                Some(spec) if spec.validate(value) => Ok(()),
                _ => Err(out_of_domain()),
            },
        }
    }

    /// Validate and store a value
    ///
    /// On error the state is unchanged and no listener is called. A MODE
    /// change under a dynamic policy recomputes the setpoint limits.
    pub fn set(&mut self, function: Function, value: Value) -> Result<(), ValidationError> {
        self.validate(function, &value)?;
        self.store(function, value);
        Ok(())
    }

    /// Store a value reported by the gateway without validation
    pub fn sync(&mut self, function: Function, value: Value) {
        self.store(function, value);
    }

    fn store(&mut self, function: Function, value: Value) {
        self.notify(function, &value);
        self.values.insert(function, value);

        if function == Function::Mode && self.policy.is_dynamic() {
            self.recompute_limits();
        }
    }

    fn notify(&self, function: Function, value: &Value) {
        for listener in &self.listeners {
            listener(function, value);
        }
    }

    /// Register a listener for every stored change
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(Function, &Value) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Recompute setpoint limits from the policy and the current mode
    ///
    /// A stored setpoint outside the new range is clamped into it and
    /// reported to listeners.
    pub fn recompute_limits(&mut self) -> SetpointLimits {
        self.limits = self.policy.limits_for(self.mode());

        let setpoint = self.get(Function::Setpoint).and_then(Value::as_i32);
        if let Some(setpoint) = setpoint {
            if setpoint != SETPOINT_NULL && !self.limits.contains(setpoint) {
                let clamped = Value::Int(self.limits.clamp(setpoint));
                self.notify(Function::Setpoint, &clamped);
                self.values.insert(Function::Setpoint, clamped);
            }
        }

        self.limits
    }

    pub fn limits(&self) -> SetpointLimits {
        self.limits
    }

    /// Replace the current limits, e.g. from a `LIMITS:SETPTEMP` response
    ///
    /// Under a static policy the new limits also become the policy.
    pub fn set_limits(&mut self, limits: SetpointLimits) {
        if let SetpointPolicy::Static(current) = &mut self.policy {
            *current = limits;
        }
        self.limits = limits;
    }

    pub fn policy(&self) -> &SetpointPolicy {
        &self.policy
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Replace the domain of a fan or vane function; other functions are ignored
    pub fn set_capability(&mut self, function: Function, spec: CapabilitySpec) {
        if let Some(current) = self.capabilities.spec_mut(function) {
            *current = spec;
        }
    }

    pub fn set_modes(&mut self, modes: Vec<Mode>) {
        self.capabilities.modes = modes;
    }

    /// Current clock as `DD/MM/YYYY HH:MM:SS`
    pub fn datetime(&self) -> String {
        self.clock.format()
    }

    pub fn set_datetime(&mut self, text: &str) -> Result<(), FormatError> {
        self.clock.set_text(text)
    }

    pub fn clock(&self) -> &GatewayClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut GatewayClock {
        &mut self.clock
    }

    /// Every stored value in gateway dump order
    pub fn snapshot(&self) -> Vec<(Function, Value)> {
        Function::ALL
            .into_iter()
            .filter_map(|function| {
                self.values
                    .get(&function)
                    .map(|value| (function, value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(Capabilities::default(), SetpointPolicy::default())
    }
}

impl fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceState")
            .field("values", &self.values)
            .field("capabilities", &self.capabilities)
            .field("limits", &self.limits)
            .field("clock", &self.clock)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ModeLimits;
    use std::sync::{Arc, Mutex};

    fn dynamic_state() -> DeviceState {
        DeviceState::new(
            Capabilities::default(),
            SetpointPolicy::Dynamic(ModeLimits::default()),
        )
    }

    #[test]
    fn test_set_and_get() {
        let mut state = DeviceState::default();
        state.set(Function::OnOff, Value::word("ON")).unwrap();
        assert_eq!(state.get(Function::OnOff), Some(&Value::word("ON")));
    }

    #[test]
    fn test_read_only_rejected() {
        let mut state = DeviceState::default();
        assert_eq!(
            state.set(Function::AmbientTemp, Value::Int(200)),
            Err(ValidationError::ReadOnly(Function::AmbientTemp))
        );
        assert!(state.is_empty());
    }

    #[test]
    fn test_disabled_function() {
        let mut state = DeviceState::default();
        state.set_capability(Function::VaneLeftRight, CapabilitySpec::disabled());
        assert_eq!(
            state.set(Function::VaneLeftRight, Value::Auto),
            Err(ValidationError::Disabled(Function::VaneLeftRight))
        );
    }

    #[test]
    fn test_rejected_set_does_not_notify() {
        let mut state = DeviceState::default();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        state.on_change(move |_, _| *counter.lock().unwrap() += 1);

        assert!(state.set(Function::FanSpeed, Value::Int(4)).is_err());
        assert!(state.set(Function::FanSpeed, Value::Swing).is_err());
        assert_eq!(*calls.lock().unwrap(), 0);

        state.set(Function::FanSpeed, Value::Int(3)).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_mode_numeric_code() {
        let mut state = DeviceState::default();
        state.set(Function::Mode, Value::Int(1)).unwrap();
        assert_eq!(state.mode(), Some(Mode::Heat));
        assert!(state.set(Function::Mode, Value::Int(7)).is_err());
    }

    #[test]
    fn test_unsupported_mode() {
        let mut state = DeviceState::default();
        state.set_modes(vec![Mode::Cool, Mode::Fan]);
        assert!(state.set(Function::Mode, Value::word("HEAT")).is_err());
        assert!(state.set(Function::Mode, Value::word("COOL")).is_ok());
    }

    #[test]
    fn test_dynamic_limits_follow_mode() {
        let mut state = dynamic_state();
        state.set(Function::Mode, Value::word("COOL")).unwrap();
        assert_eq!(state.limits(), SetpointLimits::new(180, 250));
        state.set(Function::Mode, Value::word("HEAT")).unwrap();
        assert_eq!(state.limits(), SetpointLimits::new(200, 300));
    }

    #[test]
    fn test_static_limits_ignore_mode() {
        let mut state = DeviceState::default();
        state.set(Function::Mode, Value::word("COOL")).unwrap();
        assert_eq!(state.limits(), SetpointLimits::new(180, 300));
        assert!(state.set(Function::Setpoint, Value::Int(290)).is_ok());
    }

    #[test]
    fn test_setpoint_clamped_on_mode_change() {
        let mut state = dynamic_state();
        state.set(Function::Mode, Value::word("HEAT")).unwrap();
        state.set(Function::Setpoint, Value::Int(290)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        state.on_change(move |f, v| sink.lock().unwrap().push((f, v.clone())));

        state.set(Function::Mode, Value::word("COOL")).unwrap();
        assert_eq!(state.get(Function::Setpoint), Some(&Value::Int(250)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Function::Mode, Value::word("COOL")),
                (Function::Setpoint, Value::Int(250)),
            ]
        );
    }

    #[test]
    fn test_set_limits_replaces_static_policy() {
        let mut state = DeviceState::default();
        state.set_limits(SetpointLimits::new(160, 320));
        state.recompute_limits();
        assert_eq!(state.limits(), SetpointLimits::new(160, 320));
    }

    #[test]
    fn test_sync_skips_validation() {
        let mut state = DeviceState::default();
        state.sync(Function::AmbientTemp, Value::Int(235));
        state.sync(Function::FanSpeed, Value::Int(9));
        assert_eq!(state.get(Function::FanSpeed), Some(&Value::Int(9)));
    }

    #[test]
    fn test_snapshot_order() {
        let mut state = DeviceState::default();
        state.sync(Function::ErrorCode, Value::word(""));
        state.sync(Function::OnOff, Value::word("OFF"));
        state.sync(Function::Mode, Value::Auto);
        let functions: Vec<Function> = state.snapshot().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            functions,
            vec![Function::OnOff, Function::Mode, Function::ErrorCode]
        );
    }

    #[test]
    fn test_datetime() {
        let mut state = DeviceState::default()
            .with_clock(GatewayClock::new(crate::clock::ClockMode::Frozen));
        state.set_datetime("31/12/2025 23:59:50").unwrap();
        assert!(state.set_datetime("31/13/2025 10:00:00").is_err());
        assert_eq!(state.datetime(), "31/12/2025 23:59:50");
    }
}
