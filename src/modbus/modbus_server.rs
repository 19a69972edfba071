// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server implementation for the cooler-shaker bridge
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! The Modbus master is the device that requests data, while the Modbus slave is the device
//! that provides data. In other words, the Modbus master is here the client (a supervisory
//! system) and the Modbus slave is here the server (this bridge).
//!
//! Every request is served synchronously against the shared [`RegisterImage`]; the
//! reconciliation loop reads and writes the same image between requests. See
//! [`crate::modbus::register_map`] for the address map.

use std::{future, net::SocketAddr};

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use crate::daemon::wait_for_shutdown;
use crate::modbus::register_map::{lock_image, RegisterClass, RegisterImage, SharedRegisterImage};

/// A Modbus TCP server exposing the cooler-shaker process variables
///
/// Supported function codes:
/// - 0x01 Read Coils, 0x05 Write Single Coil, 0x0F Write Multiple Coils
/// - 0x02 Read Discrete Inputs
/// - 0x03 Read Holding Registers, 0x06 Write Single Register, 0x10 Write Multiple Registers
/// - 0x04 Read Input Registers
///
/// Discrete inputs and input registers are device-origin and cannot be written
/// from the network.
#[derive(Clone)]
pub struct CoolerShakerModbusServer {
    registers: SharedRegisterImage,
}

impl tokio_modbus::server::Service for CoolerShakerModbusServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Process a Modbus request and provide a response
    ///
    /// Any function code not listed on the type returns an IllegalFunction exception,
    /// any access past the end of a register class returns IllegalDataAddress.
    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = {
            let mut image = lock_image(&self.registers);
            handle_request(&mut image, req)
        };

        if let Err(e) = &res {
            error!("Modbus request error: {:?}", e);
        }

        future::ready(res)
    }
}

impl Default for CoolerShakerModbusServer {
    fn default() -> Self {
        Self::new(RegisterImage::new().shared())
    }
}

impl CoolerShakerModbusServer {
    /// Create a server backed by the given shared register image
    pub fn new(registers: SharedRegisterImage) -> Self {
        Self { registers }
    }

    /// Shared register image served by this instance
    pub fn registers(&self) -> SharedRegisterImage {
        self.registers.clone()
    }
}

fn handle_request(
    image: &mut RegisterImage,
    req: Request<'static>,
) -> Result<Response, ExceptionCode> {
    match req {
        Request::ReadCoils(addr, cnt) => {
            debug!("Reading {} coils starting from address {}", cnt, addr);
            image
                .read_bits(RegisterClass::Coil, addr, cnt)
                .map(Response::ReadCoils)
        }
        Request::ReadDiscreteInputs(addr, cnt) => {
            debug!(
                "Reading {} discrete inputs starting from address {}",
                cnt, addr
            );
            image
                .read_bits(RegisterClass::DiscreteInput, addr, cnt)
                .map(Response::ReadDiscreteInputs)
        }
        Request::ReadHoldingRegisters(addr, cnt) => {
            debug!(
                "Reading {} holding registers starting from address {}",
                cnt, addr
            );
            image
                .read_words(RegisterClass::HoldingRegister, addr, cnt)
                .map(Response::ReadHoldingRegisters)
        }
        Request::ReadInputRegisters(addr, cnt) => {
            debug!(
                "Reading {} input registers starting from address {}",
                cnt, addr
            );
            image
                .read_words(RegisterClass::InputRegister, addr, cnt)
                .map(Response::ReadInputRegisters)
        }
        Request::WriteSingleCoil(addr, value) => {
            debug!("Writing value {} to coil {}", value, addr);
            image
                .write_coils(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleCoil(addr, value))
        }
        Request::WriteMultipleCoils(addr, values) => {
            debug!(
                "Writing {} values to coils starting from address {}",
                values.len(),
                addr
            );
            image
                .write_coils(addr, &values)
                .map(|_| Response::WriteMultipleCoils(addr, values.len() as u16))
        }
        Request::WriteSingleRegister(addr, value) => {
            debug!("Writing value {} to holding register {}", value, addr);
            image
                .write_holding_registers(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value))
        }
        Request::WriteMultipleRegisters(addr, values) => {
            debug!(
                "Writing {} values to holding registers starting from address {}",
                values.len(),
                addr
            );
            image
                .write_holding_registers(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
        }
        _ => {
            error!("Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
            Err(ExceptionCode::IllegalFunction)
        }
    }
}

/// Serve the register image on an already bound listener until `shutdown` flips to `true`
///
/// All connections share the same register image.
pub async fn serve(
    listener: TcpListener,
    registers: SharedRegisterImage,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = listener
        .local_addr()
        .context("Modbus listener has no local address")?;
    info!("Modbus server listening on {}", local);

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr: SocketAddr| {
        let service = CoolerShakerModbusServer::new(registers.clone());
        async move {
            debug!("Modbus client connected from {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(service.clone()))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus server error: {err}");
    };

    tokio::select! {
        result = server.serve(&on_connected, on_process_error) => {
            result.context("Modbus server stopped")?;
        }
        _ = wait_for_shutdown(&mut shutdown) => {
            info!("Shutting down Modbus server...");
        }
    }
    Ok(())
}

/// Bind `address` and serve the register image on it
pub async fn bind_and_serve(
    address: SocketAddr,
    registers: SharedRegisterImage,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Cannot bind Modbus server to {}", address))?;
    serve(listener, registers, shutdown).await
}
