// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the reconciliation loop
//!
//! Every test runs the loop against the simulated controller and a register
//! image, checking how operator, network and device changes propagate.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use rust_cooler_shaker::config::{DeviceConfig, ReconciliationConfig};
use rust_cooler_shaker::device::simulator::{spawn_simulated_link, Fault, SimulatorHandle};
use rust_cooler_shaker::modbus::float_codec;
use rust_cooler_shaker::modbus::register_map::{lock_image, RegisterImage, SharedRegisterImage};
use rust_cooler_shaker::motor::{MotorControl, MotorProfile};
use rust_cooler_shaker::reconciliation::{ChangeOrigin, ReconciliationLoop};
use rust_cooler_shaker::state::{BridgeEvent, ProcessVariable, SharedProcessState, SourceTag};
use rust_cooler_shaker::BridgeError;

/// Motor collaborator remembering every command
#[derive(Default)]
struct RecordingMotor {
    commands: Mutex<Vec<(bool, MotorProfile)>>,
}

impl RecordingMotor {
    fn commands(&self) -> Vec<(bool, MotorProfile)> {
        self.commands.lock().unwrap().clone()
    }
}

impl MotorControl for RecordingMotor {
    fn set_running(&self, running: bool, profile: &MotorProfile) {
        self.commands.lock().unwrap().push((running, *profile));
    }
}

struct Bench {
    state: SharedProcessState,
    registers: SharedRegisterImage,
    simulator: SimulatorHandle,
    motor: Arc<RecordingMotor>,
    reconciliation: ReconciliationLoop,
    _controller: JoinHandle<std::io::Result<()>>,
}

impl Bench {
    fn write_network_float(&self, variable: ProcessVariable, value: f32) {
        lock_image(&self.registers)
            .write_float(variable, value)
            .unwrap();
    }

    fn register_float(&self, variable: ProcessVariable) -> f32 {
        lock_image(&self.registers).read_float(variable)
    }
}

/// Initialized loop talking to a simulated controller with a frozen temperature
async fn bench() -> Bench {
    let device_config = DeviceConfig {
        read_timeout_ms: 100,
        ..DeviceConfig::default()
    };
    let (link, simulator, controller) = spawn_simulated_link(&device_config);
    simulator.set_approach_step(0);

    let state = SharedProcessState::new();
    let registers = RegisterImage::new().shared();
    let motor = Arc::new(RecordingMotor::default());
    let mut reconciliation = ReconciliationLoop::new(
        state.clone(),
        registers.clone(),
        Arc::new(link),
        motor.clone(),
        ReconciliationConfig {
            period_ms: 20,
            settle_ms: 0,
        },
    );
    reconciliation.initialize(&MotorProfile::default()).await;

    Bench {
        state,
        registers,
        simulator,
        motor,
        reconciliation,
        _controller: controller,
    }
}

#[tokio::test]
async fn test_initialize_seeds_state_and_registers() {
    let bench = bench().await;

    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(
        bench.state.source(ProcessVariable::SetTemperature),
        SourceTag::Device
    );
    assert_eq!(bench.register_float(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(bench.register_float(ProcessVariable::MotorSpeed), 90.0);
    assert_eq!(
        bench.register_float(ProcessVariable::MotorRotationDegrees),
        360.0
    );
    assert_eq!(bench.register_float(ProcessVariable::MotorDwellSeconds), 0.5);
    assert_eq!(bench.state.current_temperature(), None);
    assert!(!lock_image(&bench.registers).motor_enabled());
}

#[tokio::test]
async fn test_temperature_published_when_changed() {
    let mut bench = bench().await;

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.temperature, Some(25.0));
    assert_eq!(bench.state.current_temperature(), Some(25.0));
    assert_eq!(bench.register_float(ProcessVariable::CurrentTemperature), 25.0);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.temperature, None);
    assert!(report.is_quiet());

    bench.simulator.set_temperature(24.5);
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.temperature, Some(24.5));
    assert_eq!(bench.register_float(ProcessVariable::CurrentTemperature), 24.5);
}

#[tokio::test]
async fn test_operator_setpoint_reaches_registers_and_device() {
    let mut bench = bench().await;
    bench
        .state
        .set_operator(ProcessVariable::SetTemperature, -5.25)
        .unwrap();

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Operator);
    assert_eq!(report.changed, vec![ProcessVariable::SetTemperature]);
    assert_eq!(report.setpoint_written, Some(-5.25));
    assert_eq!(bench.simulator.written_setpoints(), vec![-525]);
    assert_eq!(
        lock_image(&bench.registers).float_words(ProcessVariable::SetTemperature),
        (0xC0A8, 0x0000)
    );

    // Nothing left to propagate
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Unchanged);
    assert_eq!(bench.simulator.written_setpoints(), vec![-525]);
}

#[tokio::test]
async fn test_network_setpoint_adopted() {
    let mut bench = bench().await;
    let mut events = bench.state.subscribe();
    bench.write_network_float(ProcessVariable::SetTemperature, 12.5);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Network);
    assert_eq!(report.changed, vec![ProcessVariable::SetTemperature]);
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 12.5);
    assert_eq!(
        bench.state.source(ProcessVariable::SetTemperature),
        SourceTag::Network
    );
    assert_eq!(bench.simulator.written_setpoints(), vec![1250]);

    let mut saw_change = false;
    while let Ok(event) = events.try_recv() {
        if let BridgeEvent::VariableChanged {
            variable: ProcessVariable::SetTemperature,
            value,
            source,
            ..
        } = event
        {
            assert_eq!(value, 12.5);
            assert_eq!(source, SourceTag::Network);
            saw_change = true;
        }
    }
    assert!(saw_change);
}

#[tokio::test]
async fn test_operator_wins_conflicting_writes() {
    let mut bench = bench().await;
    bench
        .state
        .set_operator(ProcessVariable::SetTemperature, 10.0)
        .unwrap();
    bench.write_network_float(ProcessVariable::SetTemperature, 30.0);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Operator);
    assert_eq!(report.conflicts, vec![ProcessVariable::SetTemperature]);
    assert_eq!(bench.register_float(ProcessVariable::SetTemperature), 10.0);
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 10.0);
    assert_eq!(bench.simulator.written_setpoints(), vec![1000]);
}

#[tokio::test]
async fn test_operator_change_defers_network_changes() {
    let mut bench = bench().await;
    bench
        .state
        .set_operator(ProcessVariable::MotorDwellSeconds, 2.0)
        .unwrap();
    bench.write_network_float(ProcessVariable::SetTemperature, 30.0);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.changed, vec![ProcessVariable::MotorDwellSeconds]);
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 20.0);

    // The network write is still in the registers and is adopted next cycle
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Network);
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 30.0);
    assert_eq!(bench.simulator.written_setpoints(), vec![3000]);
}

#[tokio::test]
async fn test_short_reply_keeps_previous_temperature() {
    let mut bench = bench().await;
    bench.reconciliation.run_cycle().await;

    bench.simulator.set_temperature(30.0);
    bench.simulator.inject_fault(Fault::ShortReply(5));
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.temperature, None);
    assert!(matches!(
        report.device_errors.as_slice(),
        [BridgeError::DeviceCommunication { .. }]
    ));
    assert_eq!(bench.state.current_temperature(), Some(25.0));
    assert_eq!(bench.register_float(ProcessVariable::CurrentTemperature), 25.0);

    let report = bench.reconciliation.run_cycle().await;
    assert!(report.device_errors.is_empty());
    assert_eq!(report.temperature, Some(30.0));
}

#[tokio::test]
async fn test_failed_setpoint_write_retried() {
    let mut bench = bench().await;
    bench
        .state
        .set_operator(ProcessVariable::SetTemperature, 15.0)
        .unwrap();
    bench.simulator.inject_fault(Fault::NoReply);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.setpoint_written, None);
    assert_eq!(report.device_errors.len(), 1);
    assert_eq!(bench.reconciliation.pending_setpoint(), Some(15.0));

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.setpoint_written, Some(15.0));
    assert_eq!(bench.reconciliation.pending_setpoint(), None);
    assert_eq!(bench.simulator.setpoint(), 1500);
}

#[tokio::test]
async fn test_alarm_transitions_on_discrete_inputs() {
    let mut bench = bench().await;
    let mut events = bench.state.subscribe();
    bench.simulator.set_alarm_bits(9);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.alarm_transition, Some(true));
    assert_eq!(bench.state.alarms().digits(), "0001001");
    let inputs = lock_image(&bench.registers)
        .read_bits(
            rust_cooler_shaker::modbus::RegisterClass::DiscreteInput,
            0,
            5,
        )
        .unwrap();
    assert_eq!(inputs, vec![false, false, true, false, true]);

    let mut raised = false;
    while let Ok(event) = events.try_recv() {
        if let BridgeEvent::AlarmStateChanged { active, .. } = event {
            assert!(active);
            raised = true;
        }
    }
    assert!(raised);

    // Same alarms: no transition
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.alarm_transition, None);

    bench.simulator.set_alarm_bits(0);
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.alarm_transition, Some(false));
    assert!(!bench.state.alarms().any_active());
}

#[tokio::test]
async fn test_network_coil_starts_motor() {
    let mut bench = bench().await;
    lock_image(&bench.registers).set_motor_enabled(true);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.motor_command, Some((true, SourceTag::Network)));
    assert!(bench.state.motor().running);
    assert_eq!(
        bench.motor.commands(),
        vec![(true, MotorProfile::default())]
    );

    // Already running: nothing new is commanded
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.motor_command, None);
    assert_eq!(bench.motor.commands().len(), 1);
}

#[tokio::test]
async fn test_operator_motor_action_wins_over_coil() {
    let mut bench = bench().await;
    bench.state.set_motor_running(true);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.motor_command, Some((true, SourceTag::Operator)));
    assert!(lock_image(&bench.registers).motor_enabled());

    bench.state.set_motor_running(false);
    lock_image(&bench.registers).set_motor_enabled(true);
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.motor_command, Some((false, SourceTag::Operator)));
    assert!(!lock_image(&bench.registers).motor_enabled());
    assert!(!bench.state.motor().running);
}

#[tokio::test]
async fn test_profile_change_restarts_running_motor() {
    let mut bench = bench().await;
    bench.state.set_motor_running(true);
    bench.reconciliation.run_cycle().await;

    bench.write_network_float(ProcessVariable::MotorSpeed, 45.0);
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.motor_command, Some((true, SourceTag::Network)));

    let commands = bench.motor.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1].1.speed_deg_per_s, 45.0);
}

#[tokio::test]
async fn test_non_finite_network_value_rejected() {
    let mut bench = bench().await;
    lock_image(&bench.registers).store_float_words(ProcessVariable::MotorSpeed, (0x7FC0, 0x0000));

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.rejected, vec![ProcessVariable::MotorSpeed]);
    assert!(report.changed.is_empty());
    assert_eq!(bench.state.get(ProcessVariable::MotorSpeed), 90.0);
    assert_eq!(
        lock_image(&bench.registers).float_words(ProcessVariable::MotorSpeed),
        float_codec::encode(90.0).unwrap()
    );
}

#[tokio::test]
async fn test_unsendable_network_setpoint_rejected() {
    let mut bench = bench().await;
    // A valid float, but 3e9 hundredths do not fit the controller payload
    bench.write_network_float(ProcessVariable::SetTemperature, 3.0e7);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.rejected, vec![ProcessVariable::SetTemperature]);
    assert!(report.changed.is_empty());
    assert!(report.device_errors.is_empty());
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(bench.register_float(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(bench.reconciliation.pending_setpoint(), None);
    assert!(bench.simulator.written_setpoints().is_empty());

    // Nothing left over for the next cycle
    let report = bench.reconciliation.run_cycle().await;
    assert!(report.rejected.is_empty());
    assert_eq!(report.origin, ChangeOrigin::Unchanged);
}

#[tokio::test]
async fn test_unsendable_operator_setpoint_refused() {
    let mut bench = bench().await;
    let result = bench
        .state
        .set_operator(ProcessVariable::SetTemperature, -4.0e7);
    assert!(matches!(result, Err(BridgeError::Encoding { .. })));

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.origin, ChangeOrigin::Unchanged);
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(bench.register_float(ProcessVariable::SetTemperature), 20.0);
    assert_eq!(bench.reconciliation.pending_setpoint(), None);
    assert!(bench.simulator.written_setpoints().is_empty());
}

#[tokio::test]
async fn test_half_written_setpoint_waits_for_second_word() {
    let mut bench = bench().await;
    let (high, low) = float_codec::encode(12.3).unwrap();
    assert_ne!(low, 0);

    lock_image(&bench.registers)
        .write_holding_registers(0, &[high])
        .unwrap();
    let report = bench.reconciliation.run_cycle().await;
    assert!(report.changed.is_empty());
    assert_eq!(bench.state.get(ProcessVariable::SetTemperature), 20.0);
    assert!(bench.simulator.written_setpoints().is_empty());

    lock_image(&bench.registers)
        .write_holding_registers(1, &[low])
        .unwrap();
    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.changed, vec![ProcessVariable::SetTemperature]);
    assert_eq!(
        bench.state.get(ProcessVariable::SetTemperature),
        float_codec::decode(high, low)
    );
    assert_eq!(bench.simulator.written_setpoints(), vec![1230]);
}

#[tokio::test]
async fn test_single_word_write_adopted_after_one_cycle() {
    let mut bench = bench().await;
    // 45.0 shares the zero low word of the default 90.0
    let (high, _) = float_codec::encode(45.0).unwrap();
    lock_image(&bench.registers)
        .write_holding_registers(2, &[high])
        .unwrap();

    let report = bench.reconciliation.run_cycle().await;
    assert!(report.changed.is_empty());
    assert_eq!(bench.state.get(ProcessVariable::MotorSpeed), 90.0);

    let report = bench.reconciliation.run_cycle().await;
    assert_eq!(report.changed, vec![ProcessVariable::MotorSpeed]);
    assert_eq!(bench.state.get(ProcessVariable::MotorSpeed), 45.0);
}

#[tokio::test]
async fn test_shutdown_waits_for_exchange_in_flight() {
    let bench = bench().await;
    bench.simulator.inject_fault(Fault::NoReply);
    let (stop, shutdown) = watch::channel(false);

    let started = Instant::now();
    let handle = tokio::spawn(bench.reconciliation.run(shutdown));
    // The first cycle starts at once and waits for the missing temperature reply
    time::sleep(Duration::from_millis(20)).await;
    stop.send_replace(true);

    let reconciliation = time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(reconciliation.cycles(), 1);
    let report = reconciliation.last_report().expect("no cycle completed");
    assert!(matches!(
        report.device_errors.as_slice(),
        [BridgeError::DeviceCommunication { .. }]
    ));
    assert_eq!(report.temperature, None);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let bench = bench().await;
    let (stop, shutdown) = watch::channel(false);
    let state = bench.state.clone();
    let handle = tokio::spawn(bench.reconciliation.run(shutdown));

    time::sleep(Duration::from_millis(100)).await;
    stop.send_replace(true);
    time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert_eq!(state.current_temperature(), Some(25.0));
}
