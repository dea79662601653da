//! Protocol types and message definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Gateway functions
///
/// The closed set of controllable and readable attributes of a WMP gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Function {
    #[serde(rename = "ONOFF")]
    OnOff,
    #[serde(rename = "MODE")]
    Mode,
    #[serde(rename = "SETPTEMP")]
    Setpoint,
    #[serde(rename = "FANSP")]
    FanSpeed,
    #[serde(rename = "VANEUD")]
    VaneUpDown,
    #[serde(rename = "VANELR")]
    VaneLeftRight,
    #[serde(rename = "AMBTEMP")]
    AmbientTemp,
    #[serde(rename = "ERRSTATUS")]
    ErrorStatus,
    #[serde(rename = "ERRCODE")]
    ErrorCode,
}

impl Function {
    /// Every function, in gateway dump order
    pub const ALL: [Function; 9] = [
        Function::OnOff,
        Function::Mode,
        Function::Setpoint,
        Function::FanSpeed,
        Function::VaneUpDown,
        Function::VaneLeftRight,
        Function::AmbientTemp,
        Function::ErrorStatus,
        Function::ErrorCode,
    ];

    /// Functions whose domain is given by compact notation
    pub const COMPACT: [Function; 3] = [
        Function::FanSpeed,
        Function::VaneUpDown,
        Function::VaneLeftRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Function::OnOff => "ONOFF",
            Function::Mode => "MODE",
            Function::Setpoint => "SETPTEMP",
            Function::FanSpeed => "FANSP",
            Function::VaneUpDown => "VANEUD",
            Function::VaneLeftRight => "VANELR",
            Function::AmbientTemp => "AMBTEMP",
            Function::ErrorStatus => "ERRSTATUS",
            Function::ErrorCode => "ERRCODE",
        }
    }

    /// Whether a controller may SET this function
    pub fn is_writable(&self) -> bool {
        !matches!(
            self,
            Function::AmbientTemp | Function::ErrorStatus | Function::ErrorCode
        )
    }

    /// Whether the function accepts the SWING sentinel
    pub fn is_vane(&self) -> bool {
        matches!(self, Function::VaneUpDown | Function::VaneLeftRight)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Function::ALL
            .into_iter()
            .find(|function| function.as_str() == s)
            .ok_or_else(|| Error::UnknownFunction(s.to_string()))
    }
}

/// Operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Auto,
    Heat,
    Dry,
    Fan,
    Cool,
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::Auto, Mode::Heat, Mode::Dry, Mode::Fan, Mode::Cool];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "AUTO",
            Mode::Heat => "HEAT",
            Mode::Dry => "DRY",
            Mode::Fan => "FAN",
            Mode::Cool => "COOL",
        }
    }

    /// Numeric gateway code
    pub fn code(&self) -> i32 {
        match self {
            Mode::Auto => 0,
            Mode::Heat => 1,
            Mode::Dry => 2,
            Mode::Fan => 3,
            Mode::Cool => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Mode::ALL.into_iter().find(|mode| mode.code() == code)
    }

    /// Interpret a MODE value, accepting both the mnemonic and the numeric code
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Auto => Some(Mode::Auto),
            Value::Int(code) => Mode::from_code(*code),
            Value::Word(word) => Mode::ALL.into_iter().find(|mode| mode.as_str() == word),
            Value::Swing => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Mode> for Value {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => Value::Auto,
            other => Value::Word(other.as_str().to_string()),
        }
    }
}

/// A wire value
///
/// A well-formed [`Value::Word`] is not an integer, not `AUTO`/`SWING`, and
/// contains none of `,`, `:`, `[`, `]`, CR or LF; such words survive an
/// encode/decode round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// `AUTO` sentinel
    Auto,
    /// `SWING` sentinel
    Swing,
    /// Positions, tenths of a degree, mode codes, signal strength
    Int(i32),
    /// Symbolic value such as `ON`, `COOL` or `OK`
    Word(String),
}

impl Value {
    /// Parse a single wire token
    pub fn parse(token: &str) -> Self {
        match token {
            "AUTO" => Value::Auto,
            "SWING" => Value::Swing,
            _ => match token.parse::<i32>() {
                Ok(n) if n.to_string() == token => Value::Int(n),
                _ => Value::Word(token.to_string()),
            },
        }
    }

    pub fn word(word: impl Into<String>) -> Self {
        Value::Word(word.into())
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            Value::Word(w) => Some(w),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Auto => f.write_str("AUTO"),
            Value::Swing => f.write_str("SWING"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Word(w) => f.write_str(w),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::parse(s)
    }
}

/// Gateway identity reported by the `ID` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub model: String,
    pub mac: String,
    pub ip: String,
    pub protocol: String,
    pub version: String,
    pub rssi: i32,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            model: "IS-IR-WMP-1".to_string(),
            mac: "001DC9A2C911".to_string(),
            ip: "192.168.100.246".to_string(),
            protocol: "ASCII".to_string(),
            version: "v0.0.1".to_string(),
            rssi: -44,
        }
    }
}

/// Target of a GET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetTarget {
    /// `*`: every function
    All,
    One(Function),
}

/// Configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgKey {
    DateTime,
}

impl CfgKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CfgKey::DateTime => "DATETIME",
        }
    }
}

impl FromStr for CfgKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DATETIME" => Ok(CfgKey::DateTime),
            other => Err(Error::InvalidValue {
                field: "cfg key",
                value: other.to_string(),
            }),
        }
    }
}

/// All WMP messages
///
/// `unit` is the air-conditioner number of the addressed form
/// (`SET,1:MODE,COOL`); `None` is the short form (`SET:MODE,COOL`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `ID`
    IdQuery,
    /// `ID:<model>,<mac>,<ip>,<protocol>,<version>,<rssi>`
    Id(Identity),
    /// `INFO`
    InfoQuery,
    /// `INFO:<key>,<value>`
    Info { key: String, value: String },
    /// `LIMITS:<function>`
    LimitsQuery(Function),
    /// `LIMITS:<function>,[v1,v2,...]`
    Limits { function: Function, values: Vec<Value> },
    /// `SET:<function>,<value>`
    Set {
        unit: Option<u8>,
        function: Function,
        value: Value,
    },
    /// `GET:<function>` or `GET:*`
    Get { unit: Option<u8>, target: GetTarget },
    /// `CHN,<function>,<value>`
    Chn {
        unit: Option<u8>,
        function: Function,
        value: Value,
    },
    /// `CFG:<key>`
    CfgQuery(CfgKey),
    /// `CFG:<key>,<text>`
    Cfg { key: CfgKey, value: String },
    /// `PING`
    Ping,
    /// `PONG:<rssi>`
    Pong(i32),
    /// `ACK`
    Ack,
    /// `ERR`
    Err,
}

impl Message {
    pub fn set(function: Function, value: impl Into<Value>) -> Self {
        Message::Set {
            unit: None,
            function,
            value: value.into(),
        }
    }

    pub fn get(function: Function) -> Self {
        Message::Get {
            unit: None,
            target: GetTarget::One(function),
        }
    }

    pub fn chn(function: Function, value: impl Into<Value>) -> Self {
        Message::Chn {
            unit: None,
            function,
            value: value.into(),
        }
    }

    /// Command keyword, as written on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Message::IdQuery | Message::Id(_) => "ID",
            Message::InfoQuery | Message::Info { .. } => "INFO",
            Message::LimitsQuery(_) | Message::Limits { .. } => "LIMITS",
            Message::Set { .. } => "SET",
            Message::Get { .. } => "GET",
            Message::Chn { .. } => "CHN",
            Message::CfgQuery(_) | Message::Cfg { .. } => "CFG",
            Message::Ping => "PING",
            Message::Pong(_) => "PONG",
            Message::Ack => "ACK",
            Message::Err => "ERR",
        }
    }

    /// Whether a controller sends this message to a gateway
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::IdQuery
                | Message::InfoQuery
                | Message::LimitsQuery(_)
                | Message::Set { .. }
                | Message::Get { .. }
                | Message::CfgQuery(_)
                | Message::Cfg { .. }
                | Message::Ping
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("AUTO"), Value::Auto);
        assert_eq!(Value::parse("SWING"), Value::Swing);
        assert_eq!(Value::parse("210"), Value::Int(210));
        assert_eq!(Value::parse("-44"), Value::Int(-44));
        assert_eq!(Value::parse("COOL"), Value::word("COOL"));
        assert_eq!(Value::parse("007"), Value::word("007"));
        assert_eq!(Value::parse(""), Value::word(""));
    }

    #[test]
    fn test_function_names() {
        for function in Function::ALL {
            assert_eq!(function.as_str().parse::<Function>().unwrap(), function);
        }
        assert!("FOO".parse::<Function>().is_err());
    }

    #[test]
    fn test_mode_from_value() {
        assert_eq!(Mode::from_value(&Value::word("COOL")), Some(Mode::Cool));
        assert_eq!(Mode::from_value(&Value::Auto), Some(Mode::Auto));
        assert_eq!(Mode::from_value(&Value::Int(1)), Some(Mode::Heat));
        assert_eq!(Mode::from_value(&Value::Int(9)), None);
        assert_eq!(Mode::from_value(&Value::word("TURBO")), None);
    }
}
