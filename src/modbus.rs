//! Modbus TCP surface over the [`RegisterMap`].
//!
//! Holding registers (FC 3, 6, 16) and input registers (FC 4) are the same map:
//! reading either returns the radar blocks, writes go to the calibration fields.
//! Register errors are answered with `IllegalDataAddress`, quantities outside the
//! protocol limits with `IllegalDataValue` and unsupported function codes with
//! `IllegalFunction`. Only the configured unit id and the TCP "unit not used"
//! id 255 are answered; requests for any other unit get no response.

use crate::error::RegisterError;
use crate::fleet::Fleet;
use crate::registers::RegisterMap;
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{debug, error, info, warn};

/// Most registers one read request may ask for (FC 3 and FC 4).
pub const MAX_READ_REGISTERS: u16 = 125;
/// Most registers one FC 16 request may carry.
pub const MAX_WRITE_REGISTERS: u16 = 123;
/// Unit id a Modbus TCP client sends when the unit is not significant.
pub const UNIT_ID_NOT_USED: u8 = 255;

/// Per-connection Modbus service. Cheap to create; all state lives in the fleet.
#[derive(Debug, Clone)]
pub struct RadarModbusService {
    fleet: Arc<Fleet>,
    map: RegisterMap,
    unit_id: u8,
}

impl RadarModbusService {
    pub fn new(fleet: Arc<Fleet>, map: RegisterMap, unit_id: u8) -> Self {
        Self { fleet, map, unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn serves(&self, slave: SlaveId) -> bool {
        slave == self.unit_id || slave == UNIT_ID_NOT_USED
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        if !(1..=MAX_READ_REGISTERS).contains(&count) {
            warn!("Rejected read of {} registers at {}", count, address);
            return Err(ExceptionCode::IllegalDataValue);
        }
        Ok(self.map.read(&self.fleet, address, count))
    }

    fn write(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.map.write(&self.fleet, address, values).map_err(|e| {
            warn!("Rejected write of {} registers at {}: {}", values.len(), address, e);
            exception_for(&e)
        })
    }

    fn handle(&self, request: Request<'static>) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadHoldingRegisters(addr, cnt) => self.read(addr, cnt).map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, cnt) => self.read(addr, cnt).map(Response::ReadInputRegisters),
            Request::WriteSingleRegister(addr, value) => self
                .write(addr, std::slice::from_ref(&value))
                .map(|()| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => {
                let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
                if !(1..=MAX_WRITE_REGISTERS).contains(&count) {
                    warn!("Rejected write of {} registers at {}", values.len(), addr);
                    return Err(ExceptionCode::IllegalDataValue);
                }
                self.write(addr, &values)
                    .map(|()| Response::WriteMultipleRegisters(addr, count))
            }
            other => {
                warn!("Unsupported Modbus function in request: {:?}", other);
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

pub fn exception_for(error: &RegisterError) -> ExceptionCode {
    match error {
        RegisterError::Address { .. }
        | RegisterError::ReadOnlyViolation { .. }
        | RegisterError::PartialWrite { .. }
        | RegisterError::UnknownRadar(_) => ExceptionCode::IllegalDataAddress,
    }
}

impl tokio_modbus::server::Service for RadarModbusService {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        if !self.serves(slave) {
            debug!("Ignoring request for unit {} (serving unit {})", slave, self.unit_id);
            return future::ready(Ok(None));
        }

        debug!("Modbus request for unit {}: {:?}", slave, request);
        future::ready(self.handle(request).map(Some))
    }
}

/// Serve the fleet's registers for `unit_id` on `listener` until the listener fails.
pub async fn serve(listener: TcpListener, fleet: Arc<Fleet>, map: RegisterMap, unit_id: u8) -> std::io::Result<()> {
    info!(
        "Modbus server listening on {} (unit {}, {} radars from register {}, {} registers each)",
        listener.local_addr()?,
        unit_id,
        fleet.len(),
        map.base(),
        map.registers_per_tank()
    );

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr: SocketAddr| {
        let fleet = Arc::clone(&fleet);
        async move {
            info!("Modbus client connected: {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(RadarModbusService::new(Arc::clone(&fleet), map, unit_id)))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus connection error: {}", err);
    };

    server.serve(&on_connected, on_process_error).await
}
