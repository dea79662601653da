//! WMP Line Codec
//!
//! Text encoding for all WMP messages. A message is one ASCII line; the
//! command keyword is separated from its payload by a colon, payload fields
//! by commas:
//!
//! ```text
//! ID:IS-IR-WMP-1,001DC9A2C911,192.168.100.246,ASCII,v0.0.1,-44
//! LIMITS:FANSP,[AUTO,1,2,3]
//! SET,1:MODE,COOL
//! CHN,1:SETPTEMP,210
//! CFG:DATETIME,31/12/2025 23:59:50
//! ```
//!
//! Decoding never consumes input: [`decode`] reports how many bytes a frame
//! occupied and the caller advances its own buffer.

use crate::frame::{find_line, LineBoundary};
use crate::types::*;
use crate::{Error, Result, LINE_TERMINATOR, MAX_LINE_LENGTH};
use bytes::Bytes;
use std::fmt;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Outcome of decoding the front of a receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A message and the number of bytes it occupied
    Frame { message: Message, len: usize },
    /// More bytes are needed; nothing may be consumed
    Incomplete,
    /// A bad frame; `len` bytes should be dropped
    Malformed { error: Error, len: usize },
}

/// Encode a message as a terminated line
pub fn encode(message: &Message) -> Bytes {
    Bytes::from(format!("{}{}", message, LINE_TERMINATOR))
}

/// Decode the first frame of `buf`
pub fn decode(buf: &[u8]) -> Decoded {
    match find_line(buf) {
        LineBoundary::Complete {
            skip,
            len,
            consumed,
        } => match decode_line(&buf[skip..skip + len]) {
            Ok(message) => Decoded::Frame {
                message,
                len: consumed,
            },
            Err(error) => Decoded::Malformed {
                error,
                len: consumed,
            },
        },
        LineBoundary::Incomplete => Decoded::Incomplete,
        LineBoundary::Overflow { length } => Decoded::Malformed {
            error: Error::LineTooLong {
                length,
                max: MAX_LINE_LENGTH,
            },
            len: buf.len(),
        },
    }
}

/// Decode one unterminated line
pub fn decode_line(line: &[u8]) -> Result<Message> {
    if !line.iter().all(|b| (0x20..0x7f).contains(b)) {
        return Err(Error::InvalidEncoding);
    }
    // Printable ASCII is valid UTF-8
    let text = std::str::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;
    parse_line(text)
}

/// Parse one line of text into a message
///
/// The line must already be stripped of its terminator. Whitespace is
/// significant: it belongs to the field it appears in.
pub fn parse_line(line: &str) -> Result<Message> {
    let keyword_end = line.find([':', ',']).unwrap_or(line.len());
    let (keyword, rest) = line.split_at(keyword_end);

    match keyword {
        "ID" => match payload(rest)? {
            None => Ok(Message::IdQuery),
            Some(body) => parse_identity(body).map(Message::Id),
        },
        "INFO" => match payload(rest)? {
            None => Ok(Message::InfoQuery),
            Some(body) => {
                let (key, value) = body.split_once(',').ok_or(Error::MissingField("info value"))?;
                Ok(Message::Info {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
        },
        "LIMITS" => {
            let body = payload(rest)?.ok_or(Error::MissingField("function"))?;
            match body.split_once(',') {
                None => Ok(Message::LimitsQuery(body.parse()?)),
                Some((function, list)) => Ok(Message::Limits {
                    function: function.parse()?,
                    values: parse_list(list)?,
                }),
            }
        }
        "SET" => {
            let (unit, body) = addressed(rest)?;
            let (function, value) = body.split_once(',').ok_or(Error::MissingField("value"))?;
            Ok(Message::Set {
                unit,
                function: function.parse()?,
                value: parse_value(value)?,
            })
        }
        "GET" => {
            let (unit, body) = addressed(rest)?;
            let target = match body {
                "*" => GetTarget::All,
                function => GetTarget::One(function.parse()?),
            };
            Ok(Message::Get { unit, target })
        }
        "CHN" => {
            let body = rest.strip_prefix(',').ok_or(Error::MissingField("function"))?;
            let (unit, body) = match body.split_once(':') {
                Some((unit, body)) if !unit.contains(',') => (Some(parse_unit(unit)?), body),
                _ => (None, body),
            };
            let (function, value) = body.split_once(',').ok_or(Error::MissingField("value"))?;
            Ok(Message::Chn {
                unit,
                function: function.parse()?,
                value: parse_value(value)?,
            })
        }
        "CFG" => {
            let body = payload(rest)?.ok_or(Error::MissingField("cfg key"))?;
            match body.split_once(',') {
                None => Ok(Message::CfgQuery(body.parse()?)),
                Some((key, value)) => Ok(Message::Cfg {
                    key: key.parse()?,
                    value: value.to_string(),
                }),
            }
        }
        "PING" if rest.is_empty() => Ok(Message::Ping),
        "PONG" => {
            let body = payload(rest)?.ok_or(Error::MissingField("rssi"))?;
            Ok(Message::Pong(parse_int("rssi", body)?))
        }
        "ACK" if rest.is_empty() => Ok(Message::Ack),
        "ERR" if rest.is_empty() => Ok(Message::Err),
        _ => Err(Error::UnknownCommand(line.to_string())),
    }
}

// ============================================================================
// ENCODING
// ============================================================================

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::IdQuery => f.write_str("ID"),
            Message::Id(id) => write!(
                f,
                "ID:{},{},{},{},{},{}",
                id.model, id.mac, id.ip, id.protocol, id.version, id.rssi
            ),
            Message::InfoQuery => f.write_str("INFO"),
            Message::Info { key, value } => write!(f, "INFO:{},{}", key, value),
            Message::LimitsQuery(function) => write!(f, "LIMITS:{}", function),
            Message::Limits { function, values } => {
                write!(f, "LIMITS:{},[", function)?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            Message::Set {
                unit,
                function,
                value,
            } => {
                write_addressed(f, "SET", *unit)?;
                write!(f, "{},{}", function, value)
            }
            Message::Get { unit, target } => {
                write_addressed(f, "GET", *unit)?;
                match target {
                    GetTarget::All => f.write_str("*"),
                    GetTarget::One(function) => write!(f, "{}", function),
                }
            }
            Message::Chn {
                unit,
                function,
                value,
            } => match unit {
                Some(unit) => write!(f, "CHN,{}:{},{}", unit, function, value),
                None => write!(f, "CHN,{},{}", function, value),
            },
            Message::CfgQuery(key) => write!(f, "CFG:{}", key.as_str()),
            Message::Cfg { key, value } => write!(f, "CFG:{},{}", key.as_str(), value),
            Message::Ping => f.write_str("PING"),
            Message::Pong(rssi) => write!(f, "PONG:{}", rssi),
            Message::Ack => f.write_str("ACK"),
            Message::Err => f.write_str("ERR"),
        }
    }
}

fn write_addressed(f: &mut fmt::Formatter<'_>, keyword: &str, unit: Option<u8>) -> fmt::Result {
    match unit {
        Some(unit) => write!(f, "{},{}:", keyword, unit),
        None => write!(f, "{}:", keyword),
    }
}

// ============================================================================
// DECODING HELPERS
// ============================================================================

/// Payload after `:`, `None` for a bare keyword
fn payload(rest: &str) -> Result<Option<&str>> {
    if rest.is_empty() {
        return Ok(None);
    }
    rest.strip_prefix(':')
        .map(Some)
        .ok_or_else(|| Error::UnknownCommand(rest.to_string()))
}

/// `:<body>` or `,<unit>:<body>`
fn addressed(rest: &str) -> Result<(Option<u8>, &str)> {
    if let Some(body) = rest.strip_prefix(':') {
        return Ok((None, body));
    }
    let rest = rest.strip_prefix(',').ok_or(Error::MissingField("function"))?;
    let (unit, body) = rest.split_once(':').ok_or(Error::MissingField("function"))?;
    Ok((Some(parse_unit(unit)?), body))
}

fn parse_unit(text: &str) -> Result<u8> {
    text.parse().map_err(|_| Error::InvalidValue {
        field: "unit",
        value: text.to_string(),
    })
}

fn parse_int(field: &'static str, text: &str) -> Result<i32> {
    text.parse().map_err(|_| Error::InvalidValue {
        field,
        value: text.to_string(),
    })
}

fn parse_value(text: &str) -> Result<Value> {
    if text.contains([',', ':', '[', ']']) {
        return Err(Error::InvalidValue {
            field: "value",
            value: text.to_string(),
        });
    }
    Ok(Value::parse(text))
}

fn parse_list(text: &str) -> Result<Vec<Value>> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| Error::InvalidValue {
            field: "limits",
            value: text.to_string(),
        })?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner.split(',').map(parse_value).collect()
}

fn parse_identity(body: &str) -> Result<Identity> {
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 6 {
        return Err(Error::MissingField("identity"));
    }
    Ok(Identity {
        model: fields[0].to_string(),
        mac: fields[1].to_string(),
        ip: fields[2].to_string(),
        protocol: fields[3].to_string(),
        version: fields[4].to_string(),
        rssi: parse_int("rssi", fields[5])?,
    })
}
