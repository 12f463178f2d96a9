// Licensed under the Apache-2.0 license

//! # Board Bus Profiles
//!
//! Boards differ in how many I2C buses they expose, how large each bus's
//! queues are and how fast each bus may be clocked (the slowest device on a
//! bus sets its limit). A [`BoardProfile`] captures this as data, resolved
//! once at startup, so the same firmware image logic can serve several boards.
//!
//! ```rust,ignore
//! let profile = &board::NZ_DEFAULT;
//! let cfg = profile.config(1)?;
//! let bus = I2cBus::new(port1, ticks, cfg, &mut TX1, &mut RX1);
//! ```
//!
//! [`BusArray`] groups the [`SharedBus`] instances of a board so they can be
//! looked up by bus number and serviced together from the main loop.

use crate::common::Logger;
use crate::i2c::common::{BusConfig, BusConfigBuilder, Error, I2cSpeed, DEFAULT_TIMEOUT_MS};
use crate::i2c::shared::SharedBus;
use crate::i2c::traits::{ByteLevelMaster, TickSource};
use fugit::ExtU32;

/// Static description of one bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusProfile {
    /// Board-level bus number, starting at 1.
    pub bus_number: u8,
    pub speed: I2cSpeed,
    /// Transmit queue storage length in bytes.
    pub tx_len: usize,
    /// Receive queue storage length in bytes.
    pub rx_len: usize,
    pub timeout_ms: u32,
    /// Interrupt priority, 0 disables the bus.
    pub irq_priority: u8,
}

impl BusProfile {
    #[must_use]
    pub fn config(&self) -> BusConfig {
        BusConfigBuilder::new()
            .bus_number(self.bus_number)
            .speed(self.speed)
            .timeout(self.timeout_ms.millis())
            .build()
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.irq_priority != 0
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BoardProfile<'p> {
    pub name: &'p str,
    pub buses: &'p [BusProfile],
}

impl<'p> BoardProfile<'p> {
    /// Looks up a bus by number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBus`] if the board has no such bus.
    pub fn bus(&self, bus_number: u8) -> Result<&'p BusProfile, Error> {
        self.buses
            .iter()
            .find(|b| b.bus_number == bus_number)
            .ok_or(Error::InvalidBus)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidBus`] if the board has no such bus.
    pub fn config(&self, bus_number: u8) -> Result<BusConfig, Error> {
        self.bus(bus_number).map(BusProfile::config)
    }

    pub fn enabled_buses(&self) -> impl Iterator<Item = &'p BusProfile> {
        self.buses.iter().filter(|b| b.enabled())
    }

    /// Queue storage needed by all enabled buses.
    #[must_use]
    pub fn queue_bytes(&self) -> usize {
        self.enabled_buses().map(|b| b.tx_len + b.rx_len).sum()
    }
}

const NZ_DEFAULT_BUSES: [BusProfile; 3] = [
    BusProfile {
        bus_number: 1,
        speed: I2cSpeed::Standard,
        tx_len: 256,
        rx_len: 64,
        timeout_ms: DEFAULT_TIMEOUT_MS,
        irq_priority: 3,
    },
    BusProfile {
        bus_number: 2,
        speed: I2cSpeed::Standard,
        tx_len: 32,
        rx_len: 32,
        timeout_ms: DEFAULT_TIMEOUT_MS,
        irq_priority: 0,
    },
    BusProfile {
        bus_number: 3,
        speed: I2cSpeed::Standard,
        tx_len: 32,
        rx_len: 32,
        timeout_ms: DEFAULT_TIMEOUT_MS,
        irq_priority: 0,
    },
];

/// Default layout: bus 1 enabled with large queues, buses 2 and 3 present
/// but disabled.
pub const NZ_DEFAULT: BoardProfile<'static> = BoardProfile {
    name: "nz-default",
    buses: &NZ_DEFAULT_BUSES,
};

/// The shared buses of a board, in profile order.
pub struct BusArray<'s, 'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    profile: BoardProfile<'s>,
    buses: &'s [SharedBus<'a, H, T, L>],
}

impl<'s, 'a, H, T, L> BusArray<'s, 'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    /// `buses[i]` must be the bus described by `profile.buses[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBus`] if the counts differ.
    pub fn new(profile: BoardProfile<'s>, buses: &'s [SharedBus<'a, H, T, L>]) -> Result<Self, Error> {
        if profile.buses.len() != buses.len() {
            return Err(Error::InvalidBus);
        }
        Ok(Self { profile, buses })
    }

    #[must_use]
    pub fn profile(&self) -> &BoardProfile<'s> {
        &self.profile
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidBus`] if the board has no such bus.
    pub fn get(&self, bus_number: u8) -> Result<&'s SharedBus<'a, H, T, L>, Error> {
        let index = self
            .profile
            .buses
            .iter()
            .position(|b| b.bus_number == bus_number)
            .ok_or(Error::InvalidBus)?;
        self.buses.get(index).ok_or(Error::InvalidBus)
    }

    /// Runs the task hook of every enabled bus.
    pub fn service_all(&self) {
        for (profile, bus) in self.profile.buses.iter().zip(self.buses) {
            if profile.enabled() {
                bus.service();
            }
        }
    }

    /// True if any bus is executing a transaction.
    #[must_use]
    pub fn any_busy(&self) -> bool {
        self.buses.iter().any(SharedBus::is_busy)
    }
}
