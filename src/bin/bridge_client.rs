// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus client for the cooler-shaker bridge
//!
//! Reads the whole register map, decodes the float pairs and the alarm
//! discrete inputs, and optionally writes the set temperature, the motor
//! profile or the motor enabled coil.
//!
//! ```bash
//! bridge_client --port 5020 --write-set-temperature -5.25 --motor on
//! ```

use std::{error::Error, net::SocketAddr};

use clap::{Parser, ValueEnum};
use rust_cooler_shaker::modbus::float_codec;
use rust_cooler_shaker::modbus::register_map::{
    DISCRETE_INPUT_ALARMS, DISCRETE_INPUT_COUNT, HOLDING_REGISTER_COUNT, INPUT_REGISTER_COUNT,
    MOTOR_ENABLED_COIL,
};
use rust_cooler_shaker::state::ProcessVariable;
use tokio_modbus::client::{tcp::connect, Reader, Writer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MotorSwitch {
    On,
    Off,
}

/// Modbus client reading and writing the cooler-shaker process variables
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "5020")]
    port: u16,

    /// New set temperature in °C
    #[clap(long, allow_hyphen_values = true)]
    write_set_temperature: Option<f32>,

    /// New motor speed in degrees per second
    #[clap(long)]
    write_motor_speed: Option<f32>,

    /// New motor sweep amplitude in degrees
    #[clap(long)]
    write_motor_rotation: Option<f32>,

    /// New motor dwell in seconds
    #[clap(long)]
    write_motor_dwell: Option<f32>,

    /// Switch the motor on or off
    #[clap(long, value_enum)]
    motor: Option<MotorSwitch>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    // Parse command line arguments
    let args = Args::parse();

    // Format server address
    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    println!("Connecting to Modbus server at {}", socket_addr);
    let mut ctx = connect(socket_addr).await?;

    let writes = [
        (ProcessVariable::SetTemperature, args.write_set_temperature),
        (ProcessVariable::MotorSpeed, args.write_motor_speed),
        (ProcessVariable::MotorRotationDegrees, args.write_motor_rotation),
        (ProcessVariable::MotorDwellSeconds, args.write_motor_dwell),
    ];
    for (variable, value) in writes {
        let Some(value) = value else { continue };
        let (high, low) = float_codec::encode(value)?;
        let slot = variable.slot();
        ctx.write_multiple_registers(slot.address, &[high, low])
            .await??;
        println!("Wrote {} = {} ({:#06x} {:#06x})", variable, value, high, low);
    }

    if let Some(switch) = args.motor {
        let enabled = matches!(switch, MotorSwitch::On);
        ctx.write_single_coil(MOTOR_ENABLED_COIL, enabled).await??;
        println!("Wrote motor enabled = {}", enabled);
    }

    let holding = ctx
        .read_holding_registers(0, HOLDING_REGISTER_COUNT as u16)
        .await??;
    let input = ctx.read_input_registers(0, INPUT_REGISTER_COUNT as u16).await??;
    let coils = ctx.read_coils(MOTOR_ENABLED_COIL, 1).await??;
    let alarms = ctx
        .read_discrete_inputs(0, DISCRETE_INPUT_COUNT as u16)
        .await??;

    println!("Raw holding registers: {:?}", holding);
    println!("Raw input registers: {:?}", input);

    for variable in ProcessVariable::ALL {
        let slot = variable.slot();
        let words = if variable.is_writable() { &holding } else { &input };
        let index = usize::from(slot.address);
        if let Some(&[high, low]) = words.get(index..index + 2) {
            println!("{:>20}: {}", variable.name(), float_codec::decode(high, low));
        }
    }
    println!(
        "{:>20}: {}",
        "motor enabled",
        coils.first().copied().unwrap_or_default()
    );
    for (condition, active) in DISCRETE_INPUT_ALARMS.iter().zip(alarms) {
        println!(
            "{:>20}: {}",
            condition.description(),
            if active { "ALARM" } else { "ok" }
        );
    }

    Ok(())
}
