//! In-memory device for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use fieldlink_modbus::{
    Connector, DeviceEndpoint, ModbusError, ModbusResult, RegisterClient, UnitSelector,
};
use parking_lot::Mutex;

#[derive(Default)]
struct FakeState {
    registers: HashMap<u16, u16>,
    read_errors: HashMap<u16, ModbusError>,
    short_reads: HashMap<u16, usize>,
    write_errors: HashMap<u16, ModbusError>,
    read_only: HashSet<u16>,
    refuse_connect: bool,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, u16)>,
    opened: usize,
    closed: usize,
}

/// Scriptable device; also acts as its own [`Connector`]
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_registers(&self, start: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(start + offset as u16, *value);
        }
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().registers.get(&address).copied().unwrap_or(0)
    }

    pub fn fail_read(&self, start: u16, error: ModbusError) {
        self.state.lock().read_errors.insert(start, error);
    }

    /// Answer reads at `start` with only `len` registers
    pub fn short_read(&self, start: u16, len: usize) {
        self.state.lock().short_reads.insert(start, len);
    }

    pub fn fail_write(&self, address: u16, error: ModbusError) {
        self.state.lock().write_errors.insert(address, error);
    }

    /// Acknowledge writes to `address` without storing them
    pub fn make_read_only(&self, address: u16) {
        self.state.lock().read_only.insert(address);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.state.lock().reads.clone()
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().writes.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

#[async_trait]
impl Connector for FakeDevice {
    async fn connect(&self, endpoint: &DeviceEndpoint) -> ModbusResult<Box<dyn RegisterClient>> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(ModbusError::connection(format!(
                "Failed to connect to {}",
                endpoint.address()
            )));
        }
        state.opened += 1;
        Ok(Box::new(FakeClient {
            device: self.clone(),
        }))
    }
}

/// Client that only accepts the named device-id convention
struct FakeClient {
    device: FakeDevice,
}

fn check_selector(selector: UnitSelector) -> ModbusResult<()> {
    match selector {
        UnitSelector::DeviceId(_) => Ok(()),
        other => Err(ModbusError::unsupported(format!("rejects {}", other))),
    }
}

#[async_trait]
impl RegisterClient for FakeClient {
    async fn read_holding_registers(
        &mut self,
        selector: UnitSelector,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        check_selector(selector)?;
        let mut state = self.device.state.lock();
        state.reads.push((address, count));

        if let Some(error) = state.read_errors.get(&address) {
            return Err(error.clone());
        }
        let len = state
            .short_reads
            .get(&address)
            .copied()
            .unwrap_or(count as usize);
        Ok((0..len)
            .map(|offset| {
                let addr = address + offset as u16;
                state.registers.get(&addr).copied().unwrap_or(0)
            })
            .collect())
    }

    async fn write_single_register(
        &mut self,
        selector: UnitSelector,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        check_selector(selector)?;
        let mut state = self.device.state.lock();
        state.writes.push((address, value));

        if let Some(error) = state.write_errors.get(&address) {
            return Err(error.clone());
        }
        if !state.read_only.contains(&address) {
            state.registers.insert(address, value);
        }
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.device.state.lock().closed += 1;
        Ok(())
    }
}
