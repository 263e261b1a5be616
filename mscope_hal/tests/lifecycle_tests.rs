//! StageCore lifecycle tests.
//!
//! Runs the real tick thread against the scripted controller: init frames,
//! wake/idle gating, reset rules, producer backpressure and stall reporting.

mod common;

use common::{wait_until, BusLog, ScriptedBus};
use mscope_common::consts::DEFAULT_Z_BUS_ID;
use mscope_common::stage::bus::BusError;
use mscope_common::stage::config::{NegotiationMode, StageConfig};
use mscope_common::stage::types::{Axis, IdMode};
use mscope_hal::core::StageCore;
use mscope_hal::error::StageError;
use mscope_hal::transport_registry::TransportRegistry;
use mscope_hal::watchdog::SchedulerHealth;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config(id_mode: IdMode) -> StageConfig {
    let mut config = StageConfig::default();
    config.stage.tick_us = 200;
    config.stage.id_mode = id_mode;
    config
}

fn started(config: StageConfig) -> (StageCore, BusLog) {
    let (bus, log) = ScriptedBus::new();
    let mut core = StageCore::new(config).expect("valid config");
    core.init_with_transport(Box::new(bus)).expect("init");
    (core, log)
}

#[test]
fn test_end_to_end_xy_move() {
    let (mut core, log) = started(config(IdMode::LineNumbers));

    let id = core.queue_stage_cmd([10.0, 20.0, -1.0], 100.0, false, Some(1));
    assert_eq!(id, 1);
    core.wake_up();

    assert!(wait_until(WAIT, || {
        core.get_current_line_number() == 1 && core.queue_len() == 0
    }));
    assert_eq!(
        log.payloads(),
        ["xm1", "ym1", "Xt", "XJ00000a", "Yt", "YJ000014"]
    );
    assert!(log.sent().iter().all(|f| f.id != DEFAULT_Z_BUS_ID));

    core.shutdown().expect("shutdown");
    assert!(log.0.lock().closed);
}

#[test]
fn test_init_sends_motion_defaults() {
    let mut config = config(IdMode::Counter);
    config.motion.acceleration = Some(2000);
    config.motion.velocity = Some(25);
    let (_core, log) = started(config);

    assert_eq!(
        log.payloads(),
        ["xm1", "ym1", "XA07d0", "XV19", "YA07d0", "YV19", "ZA07d0", "ZV19"]
    );
    let z_frames: Vec<_> = log.sent().into_iter().filter(|f| f.id == DEFAULT_Z_BUS_ID).collect();
    assert_eq!(z_frames.len(), 2);
}

#[test]
fn test_init_twice_is_rejected() {
    let (mut core, _log) = started(config(IdMode::Counter));
    let (bus, _) = ScriptedBus::new();
    assert!(matches!(
        core.init_with_transport(Box::new(bus)),
        Err(StageError::AlreadyRunning)
    ));
}

#[test]
fn test_open_is_retried() {
    let (bus, log) = ScriptedBus::new();
    log.0.lock().fail_opens = 2;
    let mut core = StageCore::new(config(IdMode::Counter)).unwrap();
    core.init_with_transport(Box::new(bus)).expect("third attempt succeeds");
    assert_eq!(log.0.lock().opens, 3);
}

#[test]
fn test_open_gives_up() {
    let (bus, log) = ScriptedBus::new();
    log.0.lock().fail_opens = 10;
    let mut config = config(IdMode::Counter);
    config.stage.open_retries = 2;
    let mut core = StageCore::new(config).unwrap();

    let err = core.init_with_transport(Box::new(bus)).unwrap_err();
    assert!(matches!(err, StageError::Bus(BusError::InitFailed(_))));
    assert_eq!(log.0.lock().opens, 2);
    assert!(log.sent().is_empty());
}

#[test]
fn test_idle_scheduler_sends_nothing() {
    let (core, log) = started(config(IdMode::Counter));
    core.queue_stage_cmd([1.0, 2.0, 3.0], 1.0, false, None);
    thread::sleep(Duration::from_millis(30));

    assert_eq!(log.traffic().len(), 0);
    assert_eq!(core.queue_len(), 1);
    assert!(core.tick_now().is_none());
}

#[test]
fn test_reset_while_awake_is_rejected() {
    let (core, log) = started(config(IdMode::Counter));
    log.silence(Axis::X);
    core.queue_stage_cmd([1.0, -1.0, -1.0], 1.0, false, None);
    core.wake_up();

    assert!(matches!(core.reset(), Err(StageError::NotIdle)));
    assert_eq!(core.queue_len(), 1);
}

#[test]
fn test_reset_discards_queue_and_keeps_last_id() {
    let (core, _log) = started(config(IdMode::Counter));

    assert_eq!(core.queue_stage_cmd([1.0, -1.0, -1.0], 1.0, false, None), 0);
    assert_eq!(core.queue_stage_cmd([2.0, -1.0, -1.0], 1.0, false, None), 1);
    core.wake_up();
    assert!(wait_until(WAIT, || core.session().retired_total() == 2));
    core.go_idle();

    for expected in 2..5 {
        assert_eq!(core.queue_stage_cmd([1.0, 2.0, 3.0], 1.0, false, None), expected);
    }
    assert_eq!(core.reset().expect("idle reset"), 3);

    assert_eq!(core.queue_len(), 0);
    assert_eq!(core.get_current_line_number(), 1);
    assert_eq!(core.session().issued_since_reset(), 0);
    assert_eq!(core.queue_stage_cmd([1.0, 2.0, 3.0], 1.0, false, None), 0);
}

#[test]
fn test_line_number_mode_reports_last_retired_line() {
    let (core, _log) = started(config(IdMode::LineNumbers));
    core.queue_stage_cmd([1.0, -1.0, -1.0], 1.0, false, Some(40));
    core.queue_stage_cmd([2.0, -1.0, -1.0], 1.0, false, Some(41));
    core.wake_up();

    assert!(wait_until(WAIT, || core.session().retired_total() == 2));
    assert_eq!(core.get_current_line_number(), 41);
}

#[test]
fn test_full_queue_blocks_producer_until_wake() {
    let (core, log) = started(config(IdMode::Counter));
    let capacity = core.queue_capacity();
    for _ in 0..capacity {
        core.queue_stage_cmd([1.0, -1.0, -1.0], 1.0, false, None);
    }

    thread::scope(|s| {
        let producer = s.spawn(|| core.queue_stage_cmd([9.0, -1.0, -1.0], 1.0, false, None));
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(core.queue_len(), capacity);

        core.wake_up();
        let id = producer.join().expect("producer thread");
        assert_eq!(id, capacity as i32);
    });

    assert!(wait_until(WAIT, || core.session().retired_total() == capacity as u64 + 1));
    assert_eq!(log.count("XJ000009"), 1);
    assert_eq!(log.traffic().last().map(String::as_str), Some("XJ000009"));
}

#[test]
fn test_float_targets_truncate() {
    let (core, log) = started(config(IdMode::Counter));
    core.queue_stage_cmd([10.9, 20.2, -1.0], 1.0, true, None);
    core.wake_up();

    assert!(wait_until(WAIT, || core.session().retired_total() == 1));
    assert_eq!(log.traffic(), ["Xt", "XJ00000a", "Yt", "YJ000014"]);
}

#[test]
fn test_silent_axis_is_reported_as_stall() {
    let mut config = config(IdMode::Counter);
    config.stage.stall_threshold_ms = 20;
    let (mut core, log) = started(config);
    log.silence(Axis::Z);

    core.queue_stage_cmd([-1.0, -1.0, 5.0], 1.0, false, None);
    core.wake_up();

    assert!(wait_until(WAIT, || core.health().is_stalled()));
    match core.health() {
        SchedulerHealth::Stalled { axis, waited } => {
            assert_eq!(axis, Axis::Z);
            assert!(waited >= Duration::from_millis(20));
        }
        SchedulerHealth::Healthy => panic!("expected stall"),
    }

    // Shutdown aborts the blocking wait.
    core.shutdown().expect("shutdown");
    assert_eq!(core.session().retired_total(), 0);
}

#[test]
fn test_deferred_stall_keeps_ticking() {
    let mut config = config(IdMode::Counter);
    config.stage.stall_threshold_ms = 20;
    config.stage.negotiation = NegotiationMode::Deferred;
    let (core, log) = started(config);
    log.silence(Axis::Z);

    core.queue_stage_cmd([-1.0, -1.0, 5.0], 1.0, false, None);
    core.wake_up();

    assert!(wait_until(WAIT, || core.health().is_stalled()));
    let ticks = core.stats().cycle_count;
    assert!(wait_until(WAIT, || core.stats().cycle_count > ticks + 5));
    assert_eq!(log.count("Zt"), 1);

    // Idle and reset are possible while the query is outstanding.
    core.go_idle();
    assert_eq!(core.reset().expect("reset"), 1);
    assert!(!core.health().is_stalled());
}

#[test]
fn test_reset_during_blocking_stall_is_refused() {
    let mut config = config(IdMode::Counter);
    config.stage.stall_threshold_ms = 20;
    let (mut core, log) = started(config);
    log.silence(Axis::X);

    core.queue_stage_cmd([5.0, -1.0, -1.0], 1.0, false, None);
    core.wake_up();
    assert!(wait_until(WAIT, || core.health().is_stalled()));

    core.go_idle();
    assert!(core.health().is_stalled());

    let shared = &core;
    let result = thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        s.spawn(move || {
            let _ = tx.send(shared.reset());
        });
        let result = rx.recv_timeout(WAIT);
        if result.is_err() {
            // Let the scope join instead of hanging the test run.
            shared.shutdown_flag().store(true, Ordering::SeqCst);
        }
        result
    });
    assert!(matches!(result, Ok(Err(StageError::TickInProgress))));
    assert_eq!(core.queue_len(), 1);

    // Once the answer arrives the tick finishes and reset goes through.
    log.answer_late(Axis::X, "ff");
    assert!(wait_until(WAIT, || !core.health().is_stalled()));
    assert_eq!(core.reset().expect("reset"), 1);
    assert_eq!(log.count("XJ000005"), 0);

    core.shutdown().expect("shutdown");
}

#[test]
fn test_halted_deferred_query_is_not_a_stall() {
    let mut config = config(IdMode::Counter);
    config.stage.stall_threshold_ms = 20;
    config.stage.negotiation = NegotiationMode::Deferred;
    let (core, log) = started(config);
    log.silence(Axis::Z);

    core.queue_stage_cmd([-1.0, -1.0, 5.0], 1.0, false, None);
    core.wake_up();
    assert!(wait_until(WAIT, || core.health().is_stalled()));

    core.go_idle();
    thread::sleep(Duration::from_millis(40));
    assert_eq!(core.health(), SchedulerHealth::Healthy);

    // The same query is still outstanding once woken again.
    core.wake_up();
    assert!(wait_until(WAIT, || core.health().is_stalled()));
    assert_eq!(log.count("Zt"), 1);
}

#[test]
fn test_simulation_transport_runs_moves() {
    let mut config = config(IdMode::LineNumbers);
    config.simulation.busy_polls = 3;
    let mut core = StageCore::new(config).unwrap();
    core.init(&TransportRegistry::with_builtin()).expect("init");

    for line in 1..=4 {
        let t = f64::from(line) * 100.0;
        core.queue_stage_cmd([t, t, t], 50.0, false, Some(line));
    }
    core.wake_up();

    assert!(wait_until(WAIT, || core.get_current_line_number() == 4));
    core.go_idle();
    let mut diag = None;
    assert!(wait_until(WAIT, || {
        diag = core.transport_diagnostics();
        diag.is_some()
    }));
    let diag = diag.expect("diagnostics");
    assert!(diag.frames_sent > 4 * 6);
    assert!(diag.custom.expect("axis state").contains("\"position\":400"));
}
