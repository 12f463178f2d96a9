// Licensed under the Apache-2.0 license

//! Simulated bus hardware for host-side tests.
//!
//! [`SimHardware`] models a bus with a few register-file targets: the first
//! byte written after a write address sets the register pointer, further
//! bytes are stored at the pointer, and reads return bytes from the pointer.
//! The pointer auto-increments. Each primitive raises the simulated interrupt
//! unless the bus is stalled; [`pump`] delivers pending interrupts to a bus.

use core::cell::Cell;
use core::fmt;

use heapless::Vec;

use crate::common::{LogLevel, Logger};
use crate::i2c::bus::I2cBus;
use crate::i2c::common::{BusConfig, Error, I2cSpeed};
use crate::i2c::traits::{BusHardwareCore, ByteLevelMaster, TickInstant, TickSource};

/// Number of bus events remembered by [`SimHardware`].
pub const SIM_LOG: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Start,
    RepeatedStart,
    Stop,
    Tx(u8),
    Rx(u8),
    Ack,
    Nack,
    Reset,
}

pub struct SimDevice {
    /// 7-bit address.
    pub address: u8,
    pub registers: [u8; 256],
    /// NACK every data byte written to this device.
    pub nack_data: bool,
    pointer: u8,
}

impl SimDevice {
    #[must_use]
    pub fn new(address: u8) -> Self {
        Self {
            address,
            registers: [0; 256],
            nack_data: false,
            pointer: 0,
        }
    }

    #[must_use]
    pub fn with_registers(mut self, start: u8, values: &[u8]) -> Self {
        let mut reg = start;
        for value in values {
            if let Some(slot) = self.registers.get_mut(usize::from(reg)) {
                *slot = *value;
            }
            reg = reg.wrapping_add(1);
        }
        self
    }

    #[must_use]
    pub fn register(&self, reg: u8) -> u8 {
        self.registers.get(usize::from(reg)).copied().unwrap_or(0)
    }
}

pub struct SimHardware<const D: usize = 4> {
    devices: Vec<SimDevice, D>,
    selected: Option<usize>,
    expect_address: bool,
    pointer_set: bool,
    last_ack: bool,
    rx_byte: u8,
    irq: bool,
    stalled: bool,
    stuck: bool,
    recoverable: bool,
    interrupts_enabled: bool,
    events: Vec<SimEvent, SIM_LOG>,
    resets: u32,
    recoveries: u32,
}

impl<const D: usize> Default for SimHardware<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> SimHardware<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            expect_address: false,
            pointer_set: false,
            last_ack: false,
            rx_byte: 0,
            irq: false,
            stalled: false,
            stuck: false,
            recoverable: true,
            interrupts_enabled: false,
            events: Vec::new(),
            resets: 0,
            recoveries: 0,
        }
    }

    /// Adds a target. Devices beyond `D` are ignored.
    #[must_use]
    pub fn with_device(mut self, device: SimDevice) -> Self {
        let _ = self.devices.push(device);
        self
    }

    pub fn device(&self, address: u8) -> Option<&SimDevice> {
        self.devices.iter().find(|d| d.address == address)
    }

    pub fn device_mut(&mut self, address: u8) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.address == address)
    }

    /// While stalled, primitives never complete.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Holds the bus low until a recovery frees it.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// When false, recovery attempts fail and leave the bus stuck.
    pub fn set_recoverable(&mut self, recoverable: bool) {
        self.recoverable = recoverable;
    }

    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    #[must_use]
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn resets(&self) -> u32 {
        self.resets
    }

    #[must_use]
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    fn complete(&mut self, event: SimEvent) {
        let _ = self.events.push(event);
        if !self.stalled {
            self.irq = true;
        }
    }

    fn selected_device(&mut self) -> Option<&mut SimDevice> {
        self.selected.and_then(|i| self.devices.get_mut(i))
    }
}

impl<const D: usize> BusHardwareCore for SimHardware<D> {
    type Error = Error;

    fn init(&mut self, _config: &BusConfig) {
        self.selected = None;
        self.irq = false;
    }

    fn configure_timing(&mut self, speed: I2cSpeed) -> Result<u32, Error> {
        Ok(speed.hz())
    }

    fn set_interrupt_enabled(&mut self, enabled: bool) {
        self.interrupts_enabled = enabled;
    }

    fn clear_interrupt(&mut self) {
        self.irq = false;
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.selected = None;
        self.irq = false;
        let _ = self.events.push(SimEvent::Reset);
    }

    fn recover_bus(&mut self) -> Result<(), Error> {
        self.recoveries += 1;
        if !self.recoverable {
            return Err(Error::Hardware);
        }
        self.stuck = false;
        Ok(())
    }

    fn bus_stuck(&self) -> bool {
        self.stuck
    }
}

impl<const D: usize> ByteLevelMaster for SimHardware<D> {
    fn start(&mut self) {
        self.expect_address = true;
        self.complete(SimEvent::Start);
    }

    fn repeated_start(&mut self) {
        self.expect_address = true;
        self.complete(SimEvent::RepeatedStart);
    }

    fn stop(&mut self) {
        self.selected = None;
        self.expect_address = false;
        self.complete(SimEvent::Stop);
    }

    fn transmit(&mut self, byte: u8) {
        if self.expect_address {
            self.expect_address = false;
            self.selected = self.devices.iter().position(|d| d.address == byte >> 1);
            self.last_ack = self.selected.is_some();
            if byte & 0x01 == 0 {
                self.pointer_set = false;
            }
        } else {
            let first = !self.pointer_set;
            self.pointer_set = true;
            self.last_ack = match self.selected_device() {
                Some(dev) if dev.nack_data => false,
                Some(dev) => {
                    if first {
                        dev.pointer = byte;
                    } else {
                        if let Some(slot) = dev.registers.get_mut(usize::from(dev.pointer)) {
                            *slot = byte;
                        }
                        dev.pointer = dev.pointer.wrapping_add(1);
                    }
                    true
                }
                None => false,
            };
        }
        self.complete(SimEvent::Tx(byte));
    }

    fn acknowledged(&self) -> bool {
        self.last_ack
    }

    fn receive(&mut self) {
        let byte = match self.selected_device() {
            Some(dev) => {
                let byte = dev.register(dev.pointer);
                dev.pointer = dev.pointer.wrapping_add(1);
                byte
            }
            None => 0xFF,
        };
        self.rx_byte = byte;
        self.complete(SimEvent::Rx(byte));
    }

    fn received_byte(&mut self) -> u8 {
        self.rx_byte
    }

    fn acknowledge(&mut self, ack: bool) {
        self.complete(if ack { SimEvent::Ack } else { SimEvent::Nack });
    }
}

/// Delivers pending simulated interrupts until the hardware is quiet.
pub fn pump<T, L, const D: usize>(bus: &mut I2cBus<'_, SimHardware<D>, T, L>)
where
    T: TickSource,
    L: Logger,
{
    while bus.hardware().irq_pending() {
        bus.on_interrupt();
    }
}

/// Manually advanced millisecond clock.
#[derive(Default)]
pub struct MockTicks {
    now: Cell<u32>,
}

impl MockTicks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock at `ms`, to exercise counter wrap-around.
    #[must_use]
    pub fn starting_at(ms: u32) -> Self {
        Self { now: Cell::new(ms) }
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl TickSource for MockTicks {
    fn now(&self) -> TickInstant {
        TickInstant::from_ticks(self.now.get())
    }
}

/// Logger that counts records per level.
#[derive(Default, Debug)]
pub struct LogCounter {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub debugs: usize,
}

impl Logger for LogCounter {
    fn log(&mut self, level: LogLevel, _args: fmt::Arguments<'_>) {
        match level {
            LogLevel::Error => self.errors += 1,
            LogLevel::Warn => self.warnings += 1,
            LogLevel::Info => self.infos += 1,
            LogLevel::Debug => self.debugs += 1,
        }
    }
}
