//! Protocol engine tests (wmp-client)
//!
//! Tests for the engine against the emulator and scripted gateways:
//! - Connection and synchronization
//! - Local validation and gateway rejection
//! - Request serialization, timeouts and cancellation
//! - Change pushes from other controllers
//! - Reconnection and availability

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wmp_client::{
    ClientError, ClockSync, ConnectionState, EngineBuilder, LimitsOutcome, ProtocolEngine,
};
use wmp_core::{Function, SetpointLimits, ValidationError, Value};
use wmp_emulator::EmulatorConfig;
use wmp_test_utils::{
    find_available_port, test_config, wait_for, ChangeCollector, TestEmulator,
    DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT,
};

fn builder_for(port: u16) -> EngineBuilder {
    ProtocolEngine::builder("127.0.0.1")
        .port(port)
        .name("test")
        .limits_window(Duration::from_millis(200))
        .response_timeout(Duration::from_secs(2))
        .backoff(Duration::from_millis(50), Duration::from_millis(200))
}

async fn connect(emulator: &TestEmulator) -> ProtocolEngine {
    builder_for(emulator.port())
        .connect()
        .await
        .expect("Connect failed")
}

/// Wait until the engine caches `value` for `function`
async fn wait_for_value(engine: &ProtocolEngine, function: Function, value: Value) -> bool {
    wait_for(
        || {
            let value = value.clone();
            async move { engine.value(function) == Some(value) }
        },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await
}

const ID_ANSWER: &str = "ID:IS-IR-WMP-1,001DC9A2C911,127.0.0.1,ASCII,v0.0.1,-50";

/// A gateway answering each line through `answer`; `None` leaves it unanswered
async fn scripted_gateway(answer: fn(&str) -> Option<&'static str>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(reply) = answer(line.trim()) {
                        let _ = writer.write_all(format!("{}\r\n", reply).as_bytes()).await;
                    }
                }
            });
        }
    });

    (port, handle)
}

/// A gateway that answers `ID` and nothing else
async fn silent_gateway() -> (u16, JoinHandle<()>) {
    scripted_gateway(|line| (line == "ID").then_some(ID_ANSWER)).await
}

/// A gateway that answers its first SET with ERR after `delay` and ACKs the rest
async fn late_answer_gateway(delay: Duration) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let sets = Arc::new(AtomicUsize::new(0));

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let sets = sets.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply = match line.trim() {
                        "ID" => ID_ANSWER,
                        request if request.starts_with("SET") => {
                            if sets.fetch_add(1, Ordering::SeqCst) == 0 {
                                tokio::time::sleep(delay).await;
                                "ERR"
                            } else {
                                "ACK"
                            }
                        }
                        _ => continue,
                    };
                    let _ = writer.write_all(format!("{}\r\n", reply).as_bytes()).await;
                }
            });
        }
    });

    (port, handle)
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connect_syncs_with_emulator() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;

    assert!(engine.is_ready());
    assert!(engine.is_available());
    assert_eq!(engine.config().name, "test");
    let identity = engine.identity().expect("No identity");
    assert_eq!(identity.model, "IS-IR-WMP-1");
    assert_eq!(identity.rssi, -44);

    assert_eq!(engine.setpoint_limits(), SetpointLimits::new(180, 300));
    assert_eq!(
        engine.limits_outcome(Function::FanSpeed),
        Some(LimitsOutcome::Supported(vec![
            Value::Auto,
            Value::Int(1),
            Value::Int(2),
            Value::Int(3)
        ]))
    );

    // The state dump follows the limits
    assert!(
        wait_for(
            || async { engine.snapshot().len() == Function::ALL.len() },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    );
    assert_eq!(engine.value(Function::Setpoint), Some(Value::Int(210)));
    assert_eq!(engine.value(Function::ErrorStatus), Some(Value::word("OK")));

    engine.stop().await;
    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_failure() {
    let port = find_available_port().await;
    let result = builder_for(port).connect().await;
    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_unavailable_after_threshold() {
    let port = find_available_port().await;
    let engine = builder_for(port).failure_threshold(2).start();

    let reported = wait_for(
        || async { !engine.is_available() },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(reported, "Engine still available");
    assert!(engine.last_error().is_some());

    // Requests fail fast instead of waiting for a gateway that is gone
    assert_eq!(
        engine.set(Function::OnOff, Value::word("ON")).await,
        Err(ClientError::NotConnected)
    );
    assert_eq!(
        engine.get(Function::Mode).await,
        Err(ClientError::NotConnected)
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_disabled_functions_marked() {
    let emulator = TestEmulator::start_with_config(EmulatorConfig {
        vanelr: "N".to_string(),
        vaneud: "A5S".to_string(),
        ..test_config()
    })
    .await;
    let engine = connect(&emulator).await;

    assert!(engine.is_disabled(Function::VaneLeftRight));
    assert!(!engine.is_disabled(Function::VaneUpDown));
    assert!(engine.capabilities().vane_up_down.supports_swing);

    let result = engine.set(Function::VaneLeftRight, 1).await;
    assert_eq!(
        result,
        Err(ClientError::Validation(ValidationError::Disabled(
            Function::VaneLeftRight
        )))
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_limits_err_fails_sync() {
    let (port, gateway) = scripted_gateway(|line| match line {
        "ID" => Some(ID_ANSWER),
        "LIMITS:FANSP" => Some("ERR"),
        _ => None,
    })
    .await;

    match builder_for(port).connect().await {
        Err(ClientError::ConnectionFailed(reason)) => {
            assert!(reason.contains("LIMITS:FANSP"), "reason: {}", reason)
        }
        other => panic!("expected ConnectionFailed, got {:?}", other.map(|_| ())),
    }

    // ERR is not the disabled signal
    let engine = builder_for(port).start();
    let failed = wait_for(
        || async { engine.last_error().is_some() },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(failed);
    assert_eq!(engine.limits_outcome(Function::FanSpeed), None);
    assert!(!engine.is_disabled(Function::FanSpeed));
    assert_ne!(engine.connection_state(), ConnectionState::Ready);

    engine.stop().await;
    gateway.abort();
}

#[tokio::test]
async fn test_dynamic_limits_learned() {
    let emulator = TestEmulator::start_with_config(EmulatorConfig {
        dynamic_setpoint: true,
        ..test_config()
    })
    .await;
    let engine = connect(&emulator).await;

    engine.set(Function::Mode, Value::word("COOL")).await.unwrap();
    assert_eq!(emulator.device().limits(), SetpointLimits::new(180, 250));

    // A MODE change refreshes the setpoint limits
    let learned = wait_for(
        || async { engine.setpoint_limits() == SetpointLimits::new(180, 250) },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(learned);
    let result = engine.set(Function::Setpoint, 280).await;
    assert!(matches!(result, Err(ClientError::Validation(_))));

    engine.stop().await;
}

// ============================================================================
// Request Tests
// ============================================================================

#[tokio::test]
async fn test_set_updates_gateway_and_cache() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;

    engine.set(Function::Mode, Value::word("COOL")).await.unwrap();
    engine.set(Function::OnOff, Value::word("ON")).await.unwrap();
    engine.set(Function::Setpoint, 225).await.unwrap();

    let device = emulator.device();
    assert_eq!(device.value(Function::Mode), Some(Value::word("COOL")));
    assert_eq!(device.value(Function::OnOff), Some(Value::word("ON")));
    assert_eq!(device.value(Function::Setpoint), Some(Value::Int(225)));
    assert_eq!(engine.value(Function::Setpoint), Some(Value::Int(225)));

    engine.stop().await;
}

#[tokio::test]
async fn test_get_value() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;

    assert_eq!(engine.get(Function::Setpoint).await, Ok(Value::Int(210)));
    assert_eq!(engine.get(Function::AmbientTemp).await, Ok(Value::Int(180)));

    engine.stop().await;
}

#[tokio::test]
async fn test_local_validation_sends_nothing() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;
    let mut changes = emulator.device().subscribe();

    let result = engine.set(Function::Setpoint, 400).await;
    assert!(matches!(
        result,
        Err(ClientError::Validation(ValidationError::OutOfDomain { .. }))
    ));
    let result = engine.set(Function::AmbientTemp, 200).await;
    assert_eq!(
        result,
        Err(ClientError::Validation(ValidationError::ReadOnly(
            Function::AmbientTemp
        )))
    );
    let result = engine.set(Function::FanSpeed, Value::Swing).await;
    assert!(matches!(result, Err(ClientError::Validation(_))));

    assert!(changes.try_recv().is_err());
    assert_eq!(
        emulator.device().value(Function::Setpoint),
        Some(Value::Int(210))
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_gateway_rejection() {
    let emulator = TestEmulator::start().await;
    // The emulator only answers unit 1
    let engine = builder_for(emulator.port())
        .unit(Some(2))
        .connect()
        .await
        .unwrap();

    let result = engine.set(Function::OnOff, Value::word("ON")).await;
    assert_eq!(result, Err(ClientError::Rejected));
    assert_eq!(
        emulator.device().value(Function::OnOff),
        Some(Value::word("OFF"))
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_concurrent_sets_serialized() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;

    let (a, b, c, d) = tokio::join!(
        engine.set(Function::Setpoint, 200),
        engine.set(Function::FanSpeed, 2),
        engine.set(Function::Setpoint, 240),
        engine.set(Function::VaneUpDown, Value::Auto),
    );
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(c, Ok(()));
    assert_eq!(d, Ok(()));

    // FIFO order: the last queued setpoint wins
    let device = emulator.device();
    assert_eq!(device.value(Function::Setpoint), Some(Value::Int(240)));
    assert_eq!(device.value(Function::FanSpeed), Some(Value::Int(2)));
    assert!(wait_for_value(&engine, Function::Setpoint, Value::Int(240)).await);

    engine.stop().await;
}

#[tokio::test]
async fn test_datetime_roundtrip() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;

    assert_eq!(
        engine.query_datetime().await,
        Ok("01/01/2001 00:00:00".to_string())
    );
    engine.set_datetime("31/12/2025 23:59:50").await.unwrap();
    assert_eq!(
        engine.query_datetime().await,
        Ok("31/12/2025 23:59:50".to_string())
    );

    let result = engine.set_datetime("31/13/2025 10:00:00").await;
    assert!(matches!(result, Err(ClientError::Format(_))));
    assert_eq!(emulator.device().datetime(), "31/12/2025 23:59:50");

    engine.stop().await;
}

#[tokio::test]
async fn test_clock_sync_on_connect() {
    let emulator = TestEmulator::start().await;
    let engine = builder_for(emulator.port())
        .clock_sync(ClockSync::Utc)
        .connect()
        .await
        .unwrap();

    assert_ne!(emulator.device().datetime(), "01/01/2001 00:00:00");

    engine.stop().await;
}

// ============================================================================
// Push Tests
// ============================================================================

#[tokio::test]
async fn test_pushes_from_other_clients_applied() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;
    let collector = ChangeCollector::new();
    engine.on_change(collector.callback());

    let mut other = emulator.line_client().await;
    other.exchange("SET:ONOFF,ON", "ACK").await;

    assert!(
        collector
            .wait_for_value(Function::OnOff, &Value::word("ON"), DEFAULT_TIMEOUT)
            .await
    );
    assert_eq!(engine.value(Function::OnOff), Some(Value::word("ON")));

    emulator.device().update(Function::AmbientTemp, 235);
    assert!(wait_for_value(&engine, Function::AmbientTemp, Value::Int(235)).await);
    assert!(collector.wait_for_count(2, DEFAULT_TIMEOUT).await);

    engine.stop().await;
}

#[tokio::test]
async fn test_unchanged_push_not_renotified() {
    let emulator = TestEmulator::start().await;
    let engine = connect(&emulator).await;
    assert!(wait_for_value(&engine, Function::ErrorCode, Value::word("")).await);

    let collector = ChangeCollector::new();
    engine.on_change(collector.callback());

    // ACK applies the value, the following CHN repeats it
    engine.set(Function::FanSpeed, 3).await.unwrap();
    engine.get(Function::FanSpeed).await.unwrap();
    assert_eq!(collector.values_for(Function::FanSpeed), vec![Value::Int(3)]);
    assert_eq!(collector.count(), 1);

    engine.stop().await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_reconnect_after_emulator_restart() {
    let emulator = TestEmulator::start().await;
    let port = emulator.port();
    let engine = connect(&emulator).await;

    drop(emulator);
    engine
        .wait_for_state(ConnectionState::Reconnecting, DEFAULT_TIMEOUT)
        .await
        .unwrap();

    let emulator = TestEmulator::start_on_port(port, test_config()).await;
    engine
        .wait_for_state(ConnectionState::Ready, DEFAULT_TIMEOUT)
        .await
        .unwrap();

    engine.set(Function::OnOff, Value::word("ON")).await.unwrap();
    assert_eq!(
        emulator.device().value(Function::OnOff),
        Some(Value::word("ON"))
    );
    assert!(engine.is_available());

    engine.stop().await;
}

#[tokio::test]
async fn test_request_timeout() {
    let (port, gateway) = silent_gateway().await;
    let engine = builder_for(port)
        .response_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    assert!(engine.is_disabled(Function::FanSpeed));
    let result = engine.set(Function::OnOff, Value::word("ON")).await;
    assert_eq!(result, Err(ClientError::Timeout));

    // The connection is dropped and synchronized again
    let reconnected = wait_for(
        || async { engine.last_error().as_deref() == Some("response timeout") },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(reconnected);
    engine
        .wait_for_state(ConnectionState::Ready, DEFAULT_TIMEOUT)
        .await
        .unwrap();

    engine.stop().await;
    gateway.abort();
}

#[tokio::test]
async fn test_late_answer_not_taken_for_next_request() {
    let (port, gateway) = late_answer_gateway(Duration::from_millis(400)).await;
    let engine = builder_for(port)
        .response_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        engine.set(Function::OnOff, Value::word("ON")),
        engine.set(Function::OnOff, Value::word("OFF")),
    );
    assert_eq!(first, Err(ClientError::Timeout));
    assert_eq!(second, Ok(()));
    assert_eq!(engine.value(Function::OnOff), Some(Value::word("OFF")));

    engine.stop().await;
    gateway.abort();
}

#[tokio::test]
async fn test_stop_cancels_queued_requests() {
    let (port, gateway) = silent_gateway().await;
    let engine = Arc::new(
        builder_for(port)
            .response_timeout(Duration::from_secs(30))
            .connect()
            .await
            .unwrap(),
    );

    let mut pending = Vec::new();
    for value in ["ON", "OFF", "ON"] {
        let engine = engine.clone();
        pending.push(tokio::spawn(async move {
            engine.set(Function::OnOff, Value::word(value)).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.stop().await;
    for handle in pending {
        assert_eq!(handle.await.unwrap(), Err(ClientError::Cancelled));
    }

    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        engine.set(Function::OnOff, Value::word("ON")).await,
        Err(ClientError::Cancelled)
    );
    gateway.abort();
}

#[tokio::test]
async fn test_keepalive_detects_dead_gateway() {
    let (port, gateway) = silent_gateway().await;
    let engine = builder_for(port)
        .ping_interval(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();

    engine
        .wait_for_state(ConnectionState::Reconnecting, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        engine.last_error().as_deref(),
        Some("keep-alive unanswered")
    );

    engine.stop().await;
    gateway.abort();
}

#[tokio::test]
async fn test_keepalive_with_emulator_stays_ready() {
    let emulator = TestEmulator::start().await;
    let engine = builder_for(emulator.port())
        .ping_interval(Duration::from_millis(50))
        .connect()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(engine.is_ready());
    assert_eq!(engine.get(Function::Mode).await, Ok(Value::Auto));

    engine.stop().await;
}
