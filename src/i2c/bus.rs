// Licensed under the Apache-2.0 license

//! Per-bus context and the foreground transaction API.
//!
//! Foreground code composes a message with [`I2cBus::begin`], the write and
//! read methods, and [`I2cBus::end`]. Nothing reaches the bus until `end`
//! commits the message; the interrupt handler ([`I2cBus::on_interrupt`]) then
//! executes it one bus primitive at a time and records the outcome in the
//! status cache.
//!
//! ```rust,ignore
//! bus.begin(0x50)?;
//! bus.write(0xD0)?;
//! bus.read(2)?;
//! bus.end()?;
//! let status = bus.get_status_wait(0, |_| {});
//! ```
//!
//! Composition is not serialized: two callers interleaving `begin`..`end`
//! sequences on the same bus corrupt each other's messages. Callers must
//! complete a message without yielding in between.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::ascii::{self, AsciiTokens};
use crate::i2c::codec::{self, Control, Token, START};
use crate::i2c::common::{BusConfig, Error, TxionStatus};
use crate::i2c::listener::{same_sink, ListenerId, ListenerSet, ListenerTable};
use crate::i2c::queue::ByteRing;
use crate::i2c::status::StatusCache;
use crate::i2c::traits::{ByteLevelMaster, ByteSink, TickInstant, TickSource};

/// Number of direct read destinations a bus can bind.
pub const MAX_DIRECT: usize = 4;

/// Interrupt-time state of a bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusState {
    Idle,
    /// START issued, the address byte goes out next.
    AwaitStart,
    /// Address transmitted, waiting for its acknowledge.
    AddrPhase,
    /// Data byte transmitted, waiting for its acknowledge.
    WritePhase,
    ReadPhase,
    /// Repeated START issued, the read address goes out next.
    RepeatedStartPending,
    /// STOP issued, the outcome is recorded when it completes.
    StopPhase,
    /// A timed out transaction was aborted.
    ErrorRecover,
}

/// Where bytes of the active read go.
#[derive(Copy, Clone)]
pub(crate) enum Destination<'a> {
    ReceiveQueue,
    Direct(&'a dyn ByteSink),
    Listeners(ListenerSet),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReadStep {
    Receiving,
    Acknowledging { last: bool },
}

pub struct I2cBus<'a, H, T, L = NoOpLogger>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    pub(crate) hw: H,
    pub(crate) ticks: T,
    pub(crate) logger: L,
    pub(crate) config: BusConfig,
    pub(crate) tx: ByteRing<'a>,
    pub(crate) rx: ByteRing<'a>,
    pub(crate) listeners: Option<&'a ListenerTable<'a>>,
    pub(crate) direct: [Option<&'a dyn ByteSink>; MAX_DIRECT],
    pub(crate) status: StatusCache,

    // Interrupt-owned transaction state.
    pub(crate) state: BusState,
    pub(crate) address: u8,
    pub(crate) addr_just_sent: bool,
    pub(crate) read_pending: bool,
    pub(crate) read_step: ReadStep,
    pub(crate) to_read: u8,
    pub(crate) dest: Destination<'a>,
    pub(crate) deadline: Option<TickInstant>,
    pub(crate) txn_count: u32,

    // Foreground composition state.
    composing: bool,
    compose_address: u8,
    compose_error: Option<Error>,
    dest_overridden: bool,
}

impl<'a, H, T> I2cBus<'a, H, T, NoOpLogger>
where
    H: ByteLevelMaster,
    T: TickSource,
{
    /// Creates a bus over the given hardware, tick source and queue storage.
    ///
    /// `tx` holds encoded messages, `rx` holds bytes read into the default
    /// receive queue. Each can hold one byte less than its length.
    pub fn new(hw: H, ticks: T, config: BusConfig, tx: &'a mut [u8], rx: &'a mut [u8]) -> Self {
        Self {
            hw,
            ticks,
            logger: NoOpLogger,
            config,
            tx: ByteRing::new(tx),
            rx: ByteRing::new(rx),
            listeners: None,
            direct: [None; MAX_DIRECT],
            status: StatusCache::new(),
            state: BusState::Idle,
            address: 0,
            addr_just_sent: false,
            read_pending: false,
            read_step: ReadStep::Receiving,
            to_read: 0,
            dest: Destination::ReceiveQueue,
            deadline: None,
            txn_count: 0,
            composing: false,
            compose_address: 0,
            compose_error: None,
            dest_overridden: false,
        }
    }
}

impl<'a, H, T, L> I2cBus<'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    /// Replaces the logger.
    pub fn with_logger<L2: Logger>(self, logger: L2) -> I2cBus<'a, H, T, L2> {
        I2cBus {
            hw: self.hw,
            ticks: self.ticks,
            logger,
            config: self.config,
            tx: self.tx,
            rx: self.rx,
            listeners: self.listeners,
            direct: self.direct,
            status: self.status,
            state: self.state,
            address: self.address,
            addr_just_sent: self.addr_just_sent,
            read_pending: self.read_pending,
            read_step: self.read_step,
            to_read: self.to_read,
            dest: self.dest,
            deadline: self.deadline,
            txn_count: self.txn_count,
            composing: self.composing,
            compose_address: self.compose_address,
            compose_error: self.compose_error,
            dest_overridden: self.dest_overridden,
        }
    }

    /// Attaches the board-wide listener table used by listener reads.
    #[must_use]
    pub fn with_listeners(mut self, table: &'a ListenerTable<'a>) -> Self {
        self.listeners = Some(table);
        self
    }

    /// Initializes the peripheral and enables its interrupt.
    ///
    /// # Returns
    ///
    /// The bus clock frequency actually configured, in Hz.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hardware`] if bus recovery or clock setup fails.
    pub fn init(&mut self) -> Result<u32, Error> {
        self.hw.init(&self.config);
        if self.config.recover_on_init {
            self.hw.recover_bus().map_err(|e| {
                self.logger.error(format_args!(
                    "i2c{}: bus recovery failed: {:?}",
                    self.config.bus_number, e
                ));
                Error::Hardware
            })?;
        }
        let hz = self
            .hw
            .configure_timing(self.config.speed)
            .map_err(|_| Error::Hardware)?;
        self.hw.set_interrupt_enabled(true);
        self.logger.info(format_args!(
            "i2c{}: master ready at {} Hz",
            self.config.bus_number, hz
        ));
        Ok(hz)
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    #[must_use]
    pub fn state(&self) -> BusState {
        self.state
    }

    /// True whenever a transaction is executing.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != BusState::Idle
    }

    /// True while committed messages are still waiting to run.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Number of transactions completed so far, failed ones included.
    #[must_use]
    pub fn transaction_count(&self) -> u32 {
        self.txn_count
    }

    /// Free space in the transmit queue, in encoded bytes.
    #[must_use]
    pub fn tx_free(&self) -> usize {
        self.tx.free()
    }

    // ---------------------------------------------------------------------
    // Composition
    // ---------------------------------------------------------------------

    /// Runs one append. A failed append leaves the queue as it was and marks
    /// the message failed, so [`I2cBus::end`] discards it.
    fn append(
        &mut self,
        f: impl FnOnce(&mut ByteRing<'a>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if self.composing {
            if let Some(err) = self.compose_error {
                return Err(err);
            }
        }
        f(&mut self.tx).map_err(|err| {
            self.compose_error = Some(err);
            err
        })
    }

    /// Appends START and `address`.
    ///
    /// The first call opens a new message. A further call before [`end`]
    /// produces a repeated START towards the same target in read direction.
    ///
    /// [`end`]: I2cBus::end
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the queue cannot hold the sequence.
    pub fn begin(&mut self, address: u8) -> Result<(), Error> {
        if !self.composing {
            self.composing = true;
            self.compose_error = None;
            self.dest_overridden = false;
            self.compose_address = address;
        }
        self.append(|tx| codec::put_control(tx, Control::Start(address)))
    }

    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the byte does not fit.
    pub fn write(&mut self, byte: u8) -> Result<(), Error> {
        self.append(|tx| codec::put_byte(tx, byte))
    }

    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the bytes do not fit; none are queued.
    pub fn write_array(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.append(|tx| codec::put_array(tx, bytes))
    }

    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the text does not fit; none is queued.
    pub fn write_string(&mut self, text: &str) -> Result<(), Error> {
        self.append(|tx| codec::put_escaped_string(tx, text))
    }

    /// Reads `count` bytes into the bus receive queue. 255 reads until the
    /// queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the sequence does not fit.
    pub fn read(&mut self, count: u8) -> Result<(), Error> {
        let control = if self.dest_overridden {
            Control::ReadListeners {
                count,
                mask: ListenerSet::RECEIVE_QUEUE.bits(),
            }
        } else {
            Control::Read(count)
        };
        self.append(|tx| codec::put_control(tx, control))
    }

    /// Reads `count` bytes straight into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationTableFull`] if [`MAX_DIRECT`] other sinks
    /// are already bound to this bus, or [`Error::NoSpace`].
    pub fn read_into(&mut self, sink: &'a dyn ByteSink, count: u8) -> Result<(), Error> {
        if let Some(err) = self.compose_error.filter(|_| self.composing) {
            return Err(err);
        }
        let slot = self
            .bind_direct(sink)
            .inspect_err(|&err| self.compose_error = Some(err))?;
        self.dest_overridden = true;
        self.append(|tx| codec::put_control(tx, Control::ReadDirect { count, slot }))
    }

    /// Reads `count` bytes into every destination of `set`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the sequence does not fit.
    pub fn read_to_listeners(&mut self, set: ListenerSet, count: u8) -> Result<(), Error> {
        self.dest_overridden = true;
        self.append(|tx| {
            codec::put_control(
                tx,
                Control::ReadListeners {
                    count,
                    mask: set.bits(),
                },
            )
        })
    }

    /// Appends STOP and releases the message for execution.
    ///
    /// # Errors
    ///
    /// Returns the first composition error of the message, or
    /// [`Error::NoSpace`] if STOP itself does not fit. The whole message is
    /// discarded in both cases and the error is recorded as the outcome for
    /// its target.
    pub fn end(&mut self) -> Result<(), Error> {
        let result = self.append(|tx| codec::put_control(tx, Control::Stop));
        self.composing = false;
        self.compose_error = None;
        match result {
            Ok(()) => {
                self.tx.commit();
                self.service();
                Ok(())
            }
            Err(err) => {
                self.tx.rollback();
                self.status.record(self.compose_address, err.into());
                self.logger.warn(format_args!(
                    "i2c{}: message to {:#04x} dropped: {}",
                    self.config.bus_number, self.compose_address, err
                ));
                Err(err)
            }
        }
    }

    /// Queues a complete write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the message does not fit; nothing is
    /// queued.
    pub fn write_message(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        let composed = self
            .begin(address & 0xFE)
            .and_then(|()| self.write_array(bytes));
        let ended = self.end();
        composed.and(ended)
    }

    /// Queues a register read: write `register`, then read `count` bytes
    /// into `sink` after a repeated START.
    ///
    /// # Errors
    ///
    /// See [`I2cBus::read_into`] and [`I2cBus::end`].
    pub fn read_slave_register(
        &mut self,
        address: u8,
        register: u8,
        sink: &'a dyn ByteSink,
        count: u8,
    ) -> Result<(), Error> {
        let composed = self
            .begin(address & 0xFE)
            .and_then(|()| self.write(register))
            .and_then(|()| self.read_into(sink, count));
        let ended = self.end();
        composed.and(ended)
    }

    /// Decodes an ASCII message and queues it, all or nothing.
    ///
    /// The text must consist of whole transactions (`s` .. `p`), or be
    /// built with [`AsciiTokens::framed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AsciiFormat`] if the text is malformed or leaves a
    /// transaction open, [`Error::NoSpace`] if it does not fit, and
    /// [`Error::BufferFormat`] while a message is being composed. Nothing is
    /// queued in any of these cases.
    pub fn write_ascii(&mut self, tokens: AsciiTokens<'_>) -> Result<(), Error> {
        if self.composing || self.tx.staged_len() != 0 {
            // Never commit someone else's half-built message.
            return Err(Error::BufferFormat);
        }
        ascii::put_ascii(&mut self.tx, tokens)?;
        self.tx.commit();
        self.service();
        Ok(())
    }

    /// Registers `sink` in the attached listener table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerTableFull`] if the table is full or no table
    /// is attached.
    pub fn register_listener(&self, sink: &'a dyn ByteSink) -> Result<ListenerId, Error> {
        self.listeners
            .ok_or(Error::ListenerTableFull)?
            .register(sink)
    }

    /// Slot of `sink` in the direct destination table, binding it on first
    /// use. Bindings last for the life of the bus.
    fn bind_direct(&mut self, sink: &'a dyn ByteSink) -> Result<u8, Error> {
        let mut index = None;
        for (i, slot) in self.direct.iter_mut().enumerate() {
            match slot {
                Some(bound) if same_sink(*bound, sink) => {
                    index = Some(i);
                    break;
                }
                Some(_) => {}
                None => {
                    *slot = Some(sink);
                    index = Some(i);
                    break;
                }
            }
        }
        index
            .and_then(|i| u8::try_from(i).ok())
            .ok_or(Error::DestinationTableFull)
    }

    // ---------------------------------------------------------------------
    // Receive queue
    // ---------------------------------------------------------------------

    pub fn receive_byte(&mut self) -> Option<u8> {
        self.rx.pop()
    }

    /// Moves received bytes into `out`, returning how many were copied.
    pub fn receive(&mut self, out: &mut [u8]) -> usize {
        self.rx.read(out)
    }

    #[must_use]
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    /// Outcome query.
    ///
    /// `address == 0` returns the most recent outcome without consuming it:
    /// the composition error of the message being built if it already
    /// failed, `AddedToQueue` while messages are queued or running, else the
    /// last recorded outcome (`NotAvailable` before the first one). Messages
    /// rejected by [`I2cBus::end`] are recorded like finished transactions.
    ///
    /// Any other address consumes and returns the oldest unread outcome for
    /// that target, or `NotAvailable`.
    pub fn get_status(&mut self, address: u8) -> TxionStatus {
        if address == 0 {
            if let Some(err) = self.compose_error {
                return err.into();
            }
            if self.is_busy() || self.has_pending() {
                return TxionStatus::AddedToQueue;
            }
            return self
                .status
                .last()
                .map_or(TxionStatus::NotAvailable, |e| e.status);
        }

        if let Some(err) = self.compose_error {
            if (self.compose_address ^ address) & 0xFE == 0 {
                self.compose_error = None;
                return err.into();
            }
        }
        self.status.take(address)
    }

    /// Runs the bus until all queued work is done, then queries the status.
    ///
    /// `idle` is called between service passes so that other cooperative
    /// work keeps running.
    pub fn get_status_wait(&mut self, address: u8, mut idle: impl FnMut(&mut Self)) -> TxionStatus {
        loop {
            self.service();
            if !self.is_busy() && !self.has_pending() {
                break;
            }
            idle(self);
        }
        self.get_status(address)
    }

    /// Non-blocking form of [`I2cBus::get_status_wait`].
    ///
    /// # Errors
    ///
    /// `WouldBlock` while work is queued or running, otherwise the error the
    /// transaction ended with. Once the bus is idle an address with nothing
    /// recorded yields [`Error::NoStatus`].
    pub fn poll(&mut self, address: u8) -> nb::Result<(), Error> {
        self.service();
        if self.is_busy() || self.has_pending() {
            return Err(nb::Error::WouldBlock);
        }
        self.get_status(address).into_result()
    }

    // ---------------------------------------------------------------------
    // Task service
    // ---------------------------------------------------------------------

    /// Foreground task hook: detects timeouts and starts the next queued
    /// transaction when the bus is idle and free.
    pub fn service(&mut self) {
        match self.state {
            BusState::Idle => {}
            BusState::ErrorRecover => self.state = BusState::Idle,
            _ => {
                self.check_timeout();
                return;
            }
        }
        if self.check_bus() {
            self.kick();
        }
    }

    /// Frees a bus held low by a target. Returns false while it stays stuck.
    fn check_bus(&mut self) -> bool {
        if !self.hw.bus_stuck() {
            return true;
        }
        self.logger.warn(format_args!(
            "i2c{}: bus held low, recovering",
            self.config.bus_number
        ));
        if let Err(e) = self.hw.recover_bus() {
            self.logger.error(format_args!(
                "i2c{}: bus recovery failed: {:?}",
                self.config.bus_number, e
            ));
            return false;
        }
        !self.hw.bus_stuck()
    }

    fn check_timeout(&mut self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if self.ticks.now() < deadline {
            return;
        }
        self.logger.warn(format_args!(
            "i2c{}: transaction to {:#04x} timed out in {:?}",
            self.config.bus_number, self.address, self.state
        ));
        self.hw.reset();
        self.hw.stop();
        self.drain_transaction();
        self.finish(TxionStatus::Timeout);
        self.state = BusState::ErrorRecover;
    }

    /// Starts the next committed transaction if there is one.
    fn kick(&mut self) {
        let mut skipped = 0usize;
        loop {
            match codec::pop_token(&mut self.tx) {
                None => {
                    if skipped > 0 {
                        self.logger.warn(format_args!(
                            "i2c{}: discarded {} tokens outside a transaction",
                            self.config.bus_number, skipped
                        ));
                    }
                    return;
                }
                Some(Token::Control(START)) => break,
                Some(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            self.logger.warn(format_args!(
                "i2c{}: discarded {} tokens before START",
                self.config.bus_number, skipped
            ));
        }

        self.address = 0;
        self.addr_just_sent = false;
        self.read_pending = false;
        self.to_read = 0;
        self.dest = Destination::ReceiveQueue;
        self.deadline = Some(self.ticks.now() + self.config.timeout);
        self.state = BusState::AwaitStart;
        self.hw.start();
    }
}

impl<'a, H, T, L> embedded_io::ErrorType for I2cBus<'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    type Error = Error;
}

/// Appends data to the message being composed.
impl<'a, H, T, L> embedded_io::Write for I2cBus<'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.write_array(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
