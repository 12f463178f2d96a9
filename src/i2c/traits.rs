// Licensed under the Apache-2.0 license

//! # Bus Hardware Abstraction Traits
//!
//! The queued engine never touches registers. It drives the peripheral through
//! two small traits that a board crate implements for its controller:
//!
//! ```text
//! BusHardwareCore (setup, interrupt control, recovery)
//!     └── ByteLevelMaster (one bus primitive per interrupt)
//! ```
//!
//! Every primitive of [`ByteLevelMaster`] starts one bus operation and returns
//! immediately. The peripheral raises its interrupt when the operation has
//! completed, and the interrupt handler calls back into the engine, which
//! issues the next primitive.
//!
//! Two collaborators complete the picture: a [`TickSource`] used for
//! transaction deadlines and [`ByteSink`], the destination of received bytes.

use crate::i2c::common::{BusConfig, I2cSpeed};

/// Millisecond timestamp used for transaction deadlines.
pub type TickInstant = fugit::TimerInstantU32<1000>;

/// Core hardware interface: setup, interrupt control and recovery.
///
/// # Examples
///
/// ```rust,ignore
/// use serbus_i2c::i2c::{BusConfig, BusHardwareCore, I2cSpeed};
///
/// fn setup<T: BusHardwareCore>(hw: &mut T, config: &BusConfig) -> Result<(), T::Error> {
///     hw.init(config);
///     let hz = hw.configure_timing(I2cSpeed::Fast)?;
///     hw.set_interrupt_enabled(true);
///     Ok(())
/// }
/// ```
pub trait BusHardwareCore {
    /// Hardware-specific error type that implements embedded-hal error traits
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// Bring the peripheral into master mode with the given configuration.
    fn init(&mut self, config: &BusConfig);

    /// Program the bus clock.
    ///
    /// # Returns
    ///
    /// The clock frequency actually achieved, in Hz.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested speed cannot be generated.
    fn configure_timing(&mut self, speed: I2cSpeed) -> Result<u32, Self::Error>;

    fn set_interrupt_enabled(&mut self, enabled: bool);

    /// Acknowledge the pending bus interrupt.
    fn clear_interrupt(&mut self);

    /// Abort whatever the peripheral is doing and return it to an idle master.
    fn reset(&mut self);

    /// Free a bus held low by a target, typically by clocking SCL until SDA
    /// is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus stays stuck.
    fn recover_bus(&mut self) -> Result<(), Self::Error>;

    /// True while a target holds SDA or SCL low with no transaction running.
    ///
    /// Checked before every idle-time transaction start. Controllers that
    /// cannot sense the lines keep the default.
    fn bus_stuck(&self) -> bool {
        false
    }
}

/// Byte-granular master primitives, each completed by one interrupt.
pub trait ByteLevelMaster: BusHardwareCore {
    /// Put a START condition on the bus.
    ///
    /// May be called while a STOP issued after a failed transaction is still
    /// completing. The adapter must hold the START back until the STOP is on
    /// the wire, and must not report the STOP completion as the START's.
    fn start(&mut self);

    /// Put a repeated START condition on the bus.
    fn repeated_start(&mut self);

    /// Put a STOP condition on the bus.
    fn stop(&mut self);

    /// Shift out one address or data byte.
    fn transmit(&mut self, byte: u8);

    /// Whether the target acknowledged the last transmitted byte.
    fn acknowledged(&self) -> bool;

    /// Clock in one byte from the target.
    fn receive(&mut self);

    /// The byte clocked in by the last [`ByteLevelMaster::receive`].
    fn received_byte(&mut self) -> u8;

    /// Drive the acknowledge bit for the byte just received. `false` sends a
    /// NACK, which tells the target that the read is over.
    fn acknowledge(&mut self, ack: bool);
}

/// Free-running millisecond tick.
pub trait TickSource {
    fn now(&self) -> TickInstant;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now(&self) -> TickInstant {
        (**self).now()
    }
}

/// Destination for received bytes.
///
/// Sinks are shared between interrupt and foreground code, so both methods
/// take `&self` and implementations guard their state internally.
pub trait ByteSink: Sync {
    /// Stores one byte, returning `false` if there is no room.
    fn put(&self, byte: u8) -> bool;

    /// Number of bytes that can still be stored.
    fn remaining(&self) -> usize;
}
