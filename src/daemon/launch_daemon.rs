// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module provides functionality for running and managing the background
//! tasks of the bridge. It handles the lifecycle of:
//!
//! - the Modbus TCP server exposing the register image
//! - the link to the temperature controller (serial or simulated)
//! - the reconciliation loop
//! - the event logger
//! - system health monitoring (heartbeat)
//!
//! ## Architecture
//!
//! Each service runs as an independent Tokio task. They share the process state
//! and the register image, and all of them watch the same shutdown channel.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_cooler_shaker::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     // Create and launch daemon with all enabled services
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!
//!     // Wait for all tasks to complete
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;

use super::wait_for_shutdown;
use crate::config::Config;
use crate::device::link::DeviceLink;
use crate::device::serial::open_serial;
use crate::device::simulator::{spawn_simulated_link, SimulatorHandle};
use crate::modbus::modbus_server;
use crate::modbus::{RegisterImage, SharedRegisterImage};
use crate::motor::{LoggingMotor, MotorControl};
use crate::reconciliation::ReconciliationLoop;
use crate::state::{BridgeEvent, SharedProcessState};

/// Interval between two heartbeat messages
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Time each task gets to finish once shutdown is requested
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a daemon task manager that coordinates the bridge services
///
/// # Fields
///
/// * `tasks` - Collection of handles to running tasks for management and cleanup
/// * `shutdown` - Shutdown flag broadcast to every task
/// * `state` - Process state shared with the presentation layer
/// * `registers` - Register image served over Modbus
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    shutdown: watch::Sender<bool>,
    state: SharedProcessState,
    registers: SharedRegisterImage,
    motor: Arc<dyn MotorControl>,
    modbus_address: Option<SocketAddr>,
    simulator: Option<SimulatorHandle>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance driving a [`LoggingMotor`]
    ///
    /// ```
    /// use rust_cooler_shaker::daemon::launch_daemon::Daemon;
    ///
    /// let daemon = Daemon::new();
    /// // Daemon is now ready to launch tasks
    /// ```
    pub fn new() -> Self {
        Self::with_motor(Arc::new(LoggingMotor))
    }

    /// Create a new daemon instance driving `motor`
    pub fn with_motor(motor: Arc<dyn MotorControl>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Daemon {
            tasks: Vec::new(),
            shutdown,
            state: SharedProcessState::new(),
            registers: RegisterImage::new().shared(),
            motor,
            modbus_address: None,
            simulator: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// The Modbus server is bound before the reconciliation loop starts, so a
    /// port already in use fails the launch.
    ///
    /// # Errors
    ///
    /// This function can fail if:
    /// * The Modbus server cannot bind its address
    /// * The serial port of the controller cannot be opened
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        if config.modbus.enabled {
            self.start_modbus_server(config).await?;
        } else {
            info!("Modbus server disabled");
        }

        let device = self.start_device_link(config)?;
        self.start_reconciliation(config, device).await?;
        self.start_event_logger()?;

        // Start heartbeat task for monitoring
        self.start_heartbeat()?;

        Ok(())
    }

    /// Bind the Modbus server and spawn its task
    async fn start_modbus_server(&mut self, config: &Config) -> Result<()> {
        let address = tokio::net::lookup_host((config.modbus.address.as_str(), config.modbus.port))
            .await
            .with_context(|| format!("Cannot resolve Modbus address {}", config.modbus.address))?
            .next()
            .with_context(|| format!("No socket address for {}", config.modbus.address))?;

        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Cannot bind Modbus server to {}", address))?;
        let local = listener.local_addr()?;
        info!("Starting Modbus server on {}", local);
        self.modbus_address = Some(local);

        let registers = self.registers.clone();
        let shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let result = modbus_server::serve(listener, registers, shutdown).await;
            if let Err(e) = &result {
                error!("Modbus server failed: {:#}", e);
            }
            result
        });
        self.tasks.push(task);
        Ok(())
    }

    /// Open the link to the temperature controller
    ///
    /// A simulated controller runs as its own task; it stops once the link is dropped.
    fn start_device_link(&mut self, config: &Config) -> Result<Arc<DeviceLink>> {
        if config.device.simulated {
            let (link, handle, simulator) = spawn_simulated_link(&config.device);
            self.simulator = Some(handle);
            self.tasks.push(tokio::spawn(async move {
                simulator
                    .await
                    .context("Simulated controller task failed")?
                    .context("Simulated controller stream failed")
            }));
            return Ok(Arc::new(link));
        }

        let stream = open_serial(&config.device)?;
        Ok(Arc::new(DeviceLink::with_config(stream, &config.device)))
    }

    /// Seed the process state from the controller and spawn the reconciliation loop
    async fn start_reconciliation(&mut self, config: &Config, device: Arc<DeviceLink>) -> Result<()> {
        let mut reconciliation = ReconciliationLoop::new(
            self.state.clone(),
            self.registers.clone(),
            device,
            self.motor.clone(),
            config.reconciliation.clone(),
        );
        reconciliation.initialize(&config.motor).await;

        let shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            reconciliation.run(shutdown).await;
            Ok(())
        }));
        Ok(())
    }

    /// Log every bridge event as JSON
    fn start_event_logger(&mut self) -> Result<()> {
        let mut events = self.state.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    event = events.recv() => match event {
                        Ok(event) => log_event(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Event logger missed {} events", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            Ok(())
        }));
        Ok(())
    }

    /// Start a heartbeat task that logs the process state periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        info!("Starting heartbeat monitor");

        let state = self.state.clone();
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(HEARTBEAT_PERIOD);
            loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = interval.tick() => {
                        let snapshot = state.snapshot();
                        debug!(
                            "Daemon heartbeat: running, temperature {:?}, alarms {}, motor running {}",
                            state.current_temperature(),
                            snapshot.alarms,
                            snapshot.motor.running
                        );
                    }
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Process state shared with the presentation layer
    pub fn state(&self) -> SharedProcessState {
        self.state.clone()
    }

    /// Register image served over Modbus
    pub fn registers(&self) -> SharedRegisterImage {
        self.registers.clone()
    }

    /// Address the Modbus server is bound to, once launched
    pub fn modbus_address(&self) -> Option<SocketAddr> {
        self.modbus_address
    }

    /// Handle on the simulated controller, when one is used
    pub fn simulator(&self) -> Option<SimulatorHandle> {
        self.simulator.clone()
    }

    /// Signal all tasks to stop
    ///
    /// The reconciliation loop finishes its current cycle first.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.shutdown.send_replace(true);
    }

    /// Wait for all tasks to complete
    ///
    /// Consumes the daemon and waits for all spawned tasks to finish execution.
    /// This method should be called after `shutdown()` to ensure a clean application exit.
    ///
    /// Task failures and panics are logged; a task still running after the
    /// timeout is left behind with a warning.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {:#}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => {
                    // Task didn't complete within timeout
                    warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(())
    }
}

fn log_event(event: &BridgeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!("Bridge event: {}", json),
        Err(e) => warn!("Cannot serialize bridge event {:?}: {}", event, e),
    }
}
