// Licensed under the Apache-2.0 license

//! Common types shared by the queued I2C engine.
//!
//! This module provides bus configuration, the stable transaction outcome
//! codes reported through the status cache, and the driver error type.

use core::fmt;
use fugit::ExtU32;

/// Default deadline for one transaction, measured from its START.
pub const DEFAULT_TIMEOUT_MS: u32 = 200;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub const fn hz(self) -> u32 {
        self as u32
    }
}

/// Outcome of one queued transaction, as recorded in the status cache.
///
/// The numeric values are stable and match the codes carried by
/// [`TxionStatus::code`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TxionStatus {
    Ok = 0,
    /// Committed to the transmit queue but not executed yet.
    AddedToQueue = 1,
    Error = 4,
    NoSpace = 5,
    AddrNoAck = 6,
    DataNoAck = 7,
    BufferFormat = 8,
    Timeout = 9,
    /// Nothing recorded, or the entry was already consumed.
    NotAvailable = 0xFF,
}

impl TxionStatus {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::AddedToQueue),
            4 => Some(Self::Error),
            5 => Some(Self::NoSpace),
            6 => Some(Self::AddrNoAck),
            7 => Some(Self::DataNoAck),
            8 => Some(Self::BufferFormat),
            9 => Some(Self::Timeout),
            0xFF => Some(Self::NotAvailable),
            _ => None,
        }
    }

    /// True for outcomes that describe a failed transaction.
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Ok | Self::AddedToQueue | Self::NotAvailable)
    }

    /// Converts the outcome into a non-blocking result.
    ///
    /// `AddedToQueue` maps to [`nb::Error::WouldBlock`]. `NotAvailable` is
    /// final and maps to [`Error::NoStatus`].
    ///
    /// # Errors
    ///
    /// Returns the [`Error`] corresponding to a failed outcome.
    pub fn into_result(self) -> nb::Result<(), Error> {
        match self {
            Self::Ok => Ok(()),
            Self::AddedToQueue => Err(nb::Error::WouldBlock),
            Self::NotAvailable => Err(nb::Error::Other(Error::NoStatus)),
            Self::Error => Err(nb::Error::Other(Error::Hardware)),
            Self::NoSpace => Err(nb::Error::Other(Error::NoSpace)),
            Self::AddrNoAck => Err(nb::Error::Other(Error::AddressNack)),
            Self::DataNoAck => Err(nb::Error::Other(Error::DataNack)),
            Self::BufferFormat => Err(nb::Error::Other(Error::BufferFormat)),
            Self::Timeout => Err(nb::Error::Other(Error::Timeout)),
        }
    }
}

/// Driver error type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The transmit queue cannot hold the fragment.
    NoSpace,
    /// The target did not acknowledge its address.
    AddressNack,
    /// The target did not acknowledge a data byte.
    DataNack,
    /// The queued transaction is malformed.
    BufferFormat,
    /// The transaction did not reach STOP before its deadline.
    Timeout,
    /// No bus with the requested number exists on this board.
    InvalidBus,
    ListenerTableFull,
    DestinationTableFull,
    /// A single read or message exceeds what the encoding can express.
    TooLong,
    /// Malformed ASCII authoring input.
    AsciiFormat,
    /// The peripheral reported a fault.
    Hardware,
    /// No outcome is recorded for the queried address.
    NoStatus,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSpace => "transmit queue full",
            Error::AddressNack => "address not acknowledged",
            Error::DataNack => "data not acknowledged",
            Error::BufferFormat => "malformed transaction in queue",
            Error::Timeout => "transaction timed out",
            Error::InvalidBus => "no such bus",
            Error::ListenerTableFull => "listener table full",
            Error::DestinationTableFull => "read destination table full",
            Error::TooLong => "transfer too long",
            Error::AsciiFormat => "malformed ASCII message",
            Error::Hardware => "bus hardware fault",
            Error::NoStatus => "no outcome recorded",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            Error::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::NoSpace => ErrorKind::Overrun,
            Error::Hardware => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            Error::NoSpace => ErrorKind::OutOfMemory,
            Error::TooLong => ErrorKind::InvalidInput,
            Error::AsciiFormat | Error::BufferFormat => ErrorKind::InvalidData,
            Error::Timeout => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        }
    }
}

impl From<Error> for TxionStatus {
    fn from(err: Error) -> Self {
        match err {
            Error::NoSpace => TxionStatus::NoSpace,
            Error::AddressNack => TxionStatus::AddrNoAck,
            Error::DataNack => TxionStatus::DataNoAck,
            Error::BufferFormat | Error::AsciiFormat => TxionStatus::BufferFormat,
            Error::Timeout => TxionStatus::Timeout,
            Error::NoStatus => TxionStatus::NotAvailable,
            _ => TxionStatus::Error,
        }
    }
}

/// Per-bus configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub speed: I2cSpeed,
    pub timeout: fugit::MillisDurationU32,
    /// Board-level bus number, starting at 1.
    pub bus_number: u8,
    /// Run the stuck-bus recovery sequence during `init`.
    pub recover_on_init: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfigBuilder::new().build()
    }
}

pub struct BusConfigBuilder {
    speed: I2cSpeed,
    timeout: fugit::MillisDurationU32,
    bus_number: u8,
    recover_on_init: bool,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            speed: I2cSpeed::Standard,
            timeout: DEFAULT_TIMEOUT_MS.millis(),
            bus_number: 1,
            recover_on_init: true,
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn timeout(mut self, timeout: fugit::MillisDurationU32) -> Self {
        self.timeout = timeout;
        self
    }
    #[must_use]
    pub fn bus_number(mut self, bus_number: u8) -> Self {
        self.bus_number = bus_number;
        self
    }
    #[must_use]
    pub fn recover_on_init(mut self, enabled: bool) -> Self {
        self.recover_on_init = enabled;
        self
    }
    #[must_use]
    pub fn build(self) -> BusConfig {
        BusConfig {
            speed: self.speed,
            timeout: self.timeout,
            bus_number: self.bus_number,
            recover_on_init: self.recover_on_init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error as _, ErrorKind, NoAcknowledgeSource};

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(TxionStatus::Ok.code(), 0);
        assert_eq!(TxionStatus::AddedToQueue.code(), 1);
        assert_eq!(TxionStatus::NoSpace.code(), 5);
        assert_eq!(TxionStatus::AddrNoAck.code(), 6);
        assert_eq!(TxionStatus::DataNoAck.code(), 7);
        assert_eq!(TxionStatus::BufferFormat.code(), 8);
        assert_eq!(TxionStatus::Timeout.code(), 9);
        assert_eq!(TxionStatus::NotAvailable.code(), 0xFF);
        assert_eq!(TxionStatus::from_code(6), Some(TxionStatus::AddrNoAck));
        assert_eq!(TxionStatus::from_code(2), None);
    }

    #[test]
    fn test_into_result_blocks_only_while_queued() {
        assert_eq!(TxionStatus::Ok.into_result(), Ok(()));
        assert_eq!(
            TxionStatus::AddedToQueue.into_result(),
            Err(nb::Error::WouldBlock)
        );
        assert_eq!(
            TxionStatus::NotAvailable.into_result(),
            Err(nb::Error::Other(Error::NoStatus))
        );
        assert_eq!(TxionStatus::from(Error::NoStatus), TxionStatus::NotAvailable);
        assert_eq!(
            TxionStatus::Timeout.into_result(),
            Err(nb::Error::Other(Error::Timeout))
        );
    }

    #[test]
    fn test_nack_errors_report_their_source() {
        assert_eq!(
            Error::AddressNack.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        assert_eq!(
            Error::DataNack.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
        assert_eq!(TxionStatus::from(Error::DataNack), TxionStatus::DataNoAck);
        assert!(TxionStatus::from(Error::InvalidBus).is_error());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.speed, I2cSpeed::Standard);
        assert_eq!(config.timeout.ticks(), DEFAULT_TIMEOUT_MS);
        assert_eq!(config.bus_number, 1);

        let config = BusConfigBuilder::new()
            .speed(I2cSpeed::Fast)
            .timeout(50.millis())
            .bus_number(3)
            .recover_on_init(false)
            .build();
        assert_eq!(config.speed.hz(), 400_000);
        assert_eq!(config.timeout.ticks(), 50);
        assert!(!config.recover_on_init);
    }
}
