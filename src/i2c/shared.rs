// Licensed under the Apache-2.0 license

//! Bus handle shared between foreground code and the interrupt handler.
//!
//! The bus lives in a `critical_section::Mutex`, typically inside a `static`.
//! Every call masks interrupts for exactly one engine call and releases the
//! mask on return, so foreground reads of engine-owned state never tear and
//! the interrupt handler never sees a half-updated queue.
//!
//! ```rust,ignore
//! static BUS1: SharedBus<'static, Port1, SysTick> = /* ... */;
//!
//! #[interrupt]
//! fn I2C1() {
//!     BUS1.on_interrupt();
//! }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;

use crate::common::{Logger, NoOpLogger};
use crate::i2c::bus::I2cBus;
use crate::i2c::common::{Error, TxionStatus};
use crate::i2c::traits::{ByteLevelMaster, ByteSink, TickSource};

pub struct SharedBus<'a, H, T, L = NoOpLogger>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    inner: Mutex<RefCell<I2cBus<'a, H, T, L>>>,
}

impl<'a, H, T, L> SharedBus<'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    pub const fn new(bus: I2cBus<'a, H, T, L>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(bus)),
        }
    }

    /// Runs `f` on the bus with interrupts masked.
    ///
    /// Compose whole messages inside one call so that they are never
    /// interleaved with another caller's fragments.
    pub fn with<R>(&self, f: impl FnOnce(&mut I2cBus<'a, H, T, L>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Entry point for the bus interrupt vector.
    pub fn on_interrupt(&self) {
        self.with(I2cBus::on_interrupt);
    }

    /// Foreground task hook, see [`I2cBus::service`].
    pub fn service(&self) {
        self.with(I2cBus::service);
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.with(|bus| bus.is_busy())
    }

    pub fn get_status(&self, address: u8) -> TxionStatus {
        self.with(|bus| bus.get_status(address))
    }

    /// Spins until the bus has drained its queue, then queries the status.
    ///
    /// `idle` runs with interrupts enabled between service passes; use it to
    /// run other cooperative tasks or to sleep until the next interrupt.
    pub fn get_status_wait(&self, address: u8, mut idle: impl FnMut()) -> TxionStatus {
        loop {
            let done = self.with(|bus| {
                bus.service();
                !bus.is_busy() && !bus.has_pending()
            });
            if done {
                break;
            }
            idle();
        }
        self.get_status(address)
    }

    /// # Errors
    ///
    /// See [`I2cBus::poll`].
    pub fn poll(&self, address: u8) -> nb::Result<(), Error> {
        self.with(|bus| bus.poll(address))
    }

    /// # Errors
    ///
    /// See [`I2cBus::write_message`].
    pub fn write_message(&self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        self.with(|bus| bus.write_message(address, bytes))
    }

    /// # Errors
    ///
    /// See [`I2cBus::read_slave_register`].
    pub fn read_slave_register(
        &self,
        address: u8,
        register: u8,
        sink: &'a dyn ByteSink,
        count: u8,
    ) -> Result<(), Error> {
        self.with(|bus| bus.read_slave_register(address, register, sink, count))
    }

    /// Moves bytes from the receive queue into `out`.
    pub fn receive(&self, out: &mut [u8]) -> usize {
        self.with(|bus| bus.receive(out))
    }

    #[must_use]
    pub fn transaction_count(&self) -> u32 {
        self.with(|bus| bus.transaction_count())
    }
}
