//! Codec tests for WMP core

use wmp_core::{
    codec, decode, encode, parse_line, CfgKey, Decoded, Error, Function, GetTarget, Identity,
    Message, Value,
};

fn roundtrip(msg: &Message) -> Message {
    let bytes = encode(msg);
    match decode(&bytes) {
        Decoded::Frame { message, len } => {
            assert_eq!(len, bytes.len(), "frame length for {}", msg);
            message
        }
        other => panic!("expected frame for {}, got {:?}", msg, other),
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_roundtrip_every_kind() {
    let messages = vec![
        Message::IdQuery,
        Message::Id(Identity::default()),
        Message::InfoQuery,
        Message::Info {
            key: "RUNVERSION".to_string(),
            value: "1.2.3".to_string(),
        },
        Message::LimitsQuery(Function::FanSpeed),
        Message::Limits {
            function: Function::VaneUpDown,
            values: vec![Value::Auto, Value::Int(1), Value::Int(2), Value::Swing],
        },
        Message::Limits {
            function: Function::Mode,
            values: vec![
                Value::Auto,
                Value::word("HEAT"),
                Value::word("DRY"),
                Value::word("COOL"),
                Value::word("FAN"),
            ],
        },
        Message::Limits {
            function: Function::Setpoint,
            values: vec![Value::Int(180), Value::Int(300)],
        },
        Message::set(Function::Mode, Value::word("COOL")),
        Message::Set {
            unit: Some(1),
            function: Function::Setpoint,
            value: Value::Int(215),
        },
        Message::get(Function::AmbientTemp),
        Message::Get {
            unit: Some(1),
            target: GetTarget::All,
        },
        Message::chn(Function::ErrorStatus, Value::word("OK")),
        Message::Chn {
            unit: Some(1),
            function: Function::VaneLeftRight,
            value: Value::Swing,
        },
        Message::chn(Function::ErrorCode, Value::word("")),
        Message::CfgQuery(CfgKey::DateTime),
        Message::Cfg {
            key: CfgKey::DateTime,
            value: "31/12/2025 23:59:50".to_string(),
        },
        Message::Ping,
        Message::Pong(-44),
        Message::Ack,
        Message::Err,
    ];

    for msg in &messages {
        assert_eq!(&roundtrip(msg), msg);
    }
}

#[test]
fn test_encode_wire_text() {
    assert_eq!(
        encode(&Message::set(Function::Mode, Value::Int(1))).as_ref(),
        b"SET:MODE,1\r\n"
    );
    assert_eq!(
        encode(&Message::chn(Function::Mode, Value::Int(1))).as_ref(),
        b"CHN,MODE,1\r\n"
    );
    assert_eq!(
        encode(&Message::Id(Identity::default())).as_ref(),
        b"ID:IS-IR-WMP-1,001DC9A2C911,192.168.100.246,ASCII,v0.0.1,-44\r\n"
    );
    assert_eq!(
        encode(&Message::Get {
            unit: None,
            target: GetTarget::All
        })
        .as_ref(),
        b"GET:*\r\n"
    );
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_decode_accepts_all_terminators() {
    for input in [&b"ACK\r"[..], b"ACK\n", b"ACK\r\n"] {
        match decode(input) {
            Decoded::Frame { message, len } => {
                assert_eq!(message, Message::Ack);
                assert_eq!(len, input.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_decode_skips_blank_lines() {
    match decode(b"\r\n\r\nPING\r\n") {
        Decoded::Frame { message, len } => {
            assert_eq!(message, Message::Ping);
            assert_eq!(len, 10);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_decode_non_ascii_is_line_error() {
    match decode("SET:MODE,CÖOL\r\nACK\r\n".as_bytes()) {
        Decoded::Malformed { error, len } => {
            assert_eq!(error, Error::InvalidEncoding);
            assert!(error.is_recoverable());
            assert_eq!(len, "SET:MODE,CÖOL\r\n".len());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_decode_overflow_is_fatal() {
    let line = vec![b'X'; wmp_core::MAX_LINE_LENGTH + 10];
    match decode(&line) {
        Decoded::Malformed { error, .. } => assert!(!error.is_recoverable()),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Parse errors
// ============================================================================

#[test]
fn test_parse_errors() {
    assert!(matches!(parse_line("HELLO"), Err(Error::UnknownCommand(_))));
    assert!(matches!(parse_line("SET:MODE"), Err(Error::MissingField(_))));
    assert!(matches!(parse_line("LIMITS:"), Err(Error::UnknownFunction(_))));
    assert!(matches!(
        parse_line("LIMITS:FANSP,AUTO,1"),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(parse_line("PONG:strong"), Err(Error::InvalidValue { .. })));
    assert!(matches!(parse_line("ID:IS-IR-WMP-1,001DC9A2C911"), Err(Error::MissingField(_))));
    assert!(matches!(parse_line("CFG:TIMEZONE"), Err(Error::InvalidValue { .. })));
    assert!(matches!(parse_line("ACKNOWLEDGE"), Err(Error::UnknownCommand(_))));
}

#[test]
fn test_parse_mode_code_and_mnemonic() {
    assert_eq!(
        parse_line("SET:MODE,1").unwrap(),
        Message::set(Function::Mode, Value::Int(1))
    );
    assert_eq!(
        parse_line("SET:MODE,HEAT").unwrap(),
        Message::set(Function::Mode, Value::word("HEAT"))
    );
}

#[test]
fn test_whitespace_is_significant() {
    assert!(matches!(
        parse_line("PING  "),
        Err(Error::UnknownCommand(_))
    ));

    let msg = Message::chn(Function::ErrorCode, Value::word("E1 "));
    assert_eq!(roundtrip(&msg), msg);
    assert_eq!(
        parse_line("CHN,ERRCODE,E1 ").unwrap(),
        Message::chn(Function::ErrorCode, Value::word("E1 "))
    );
}

#[test]
fn test_request_kinds() {
    assert!(parse_line("GET:*").unwrap().is_request());
    assert!(!parse_line("CHN,MODE,COOL").unwrap().is_request());
    assert_eq!(codec::parse_line("LIMITS:MODE").unwrap().kind(), "LIMITS");
}
