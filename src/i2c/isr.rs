// Licensed under the Apache-2.0 license

//! Interrupt-time state machine.
//!
//! [`I2cBus::on_interrupt`] is called once per completed bus primitive. Each
//! call issues at most one new primitive, or finishes the transaction. NACKs
//! and malformed queue content end the transaction immediately: STOP is
//! forced, the rest of the transaction is skipped up to its `^p`, the outcome
//! is recorded and the bus is idle again before the handler returns.

use crate::common::Logger;
use crate::i2c::bus::{BusState, Destination, I2cBus, ReadStep};
use crate::i2c::codec::{self, Token, READ, READ_DIRECT, READ_LISTENERS, READ_UNTIL_FULL, START, STOP};
use crate::i2c::common::TxionStatus;
use crate::i2c::listener::ListenerSet;
use crate::i2c::traits::{ByteLevelMaster, TickSource};

impl<'a, H, T, L> I2cBus<'a, H, T, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    /// Bus interrupt handler.
    pub fn on_interrupt(&mut self) {
        self.hw.clear_interrupt();

        match self.state {
            BusState::Idle => {}
            BusState::ErrorRecover => self.state = BusState::Idle,
            BusState::AwaitStart => match self.param() {
                Some(address) => {
                    self.logger.debug(format_args!(
                        "i2c{}: start {:#04x}",
                        self.config.bus_number, address
                    ));
                    self.send_address(address);
                }
                _ => self.fail(TxionStatus::BufferFormat),
            },
            BusState::RepeatedStartPending => self.send_address(self.address | 0x01),
            BusState::AddrPhase => {
                if !self.hw.acknowledged() {
                    self.fail(TxionStatus::AddrNoAck);
                } else if self.read_pending {
                    self.read_pending = false;
                    self.receive_next();
                } else {
                    self.advance();
                }
            }
            BusState::WritePhase => {
                if self.hw.acknowledged() {
                    self.advance();
                } else {
                    self.fail(TxionStatus::DataNoAck);
                }
            }
            BusState::ReadPhase => self.on_read_event(),
            BusState::StopPhase => self.finish(TxionStatus::Ok),
        }
    }

    fn send_address(&mut self, address: u8) {
        self.address = address;
        self.addr_just_sent = true;
        self.state = BusState::AddrPhase;
        self.hw.transmit(address);
    }

    /// Executes the next queued element after an acknowledged byte or a
    /// completed read.
    fn advance(&mut self) {
        let Some(token) = codec::pop_token(&mut self.tx) else {
            self.fail(TxionStatus::BufferFormat);
            return;
        };
        let just_sent = core::mem::replace(&mut self.addr_just_sent, false);
        let reading = self.address & 0x01 != 0;

        match token {
            // Shorthand: a byte right after a read address is the read count.
            Token::Data(count) if just_sent && reading => {
                self.addr_just_sent = true;
                self.begin_read(count, self.dest);
            }
            Token::Data(_) if reading => self.fail(TxionStatus::BufferFormat),
            Token::Data(byte) => {
                self.state = BusState::WritePhase;
                self.hw.transmit(byte);
            }
            Token::Control(STOP) => {
                self.state = BusState::StopPhase;
                self.hw.stop();
            }
            Token::Control(START) => match self.param() {
                Some(address) if (address ^ self.address) & 0xFE == 0 => {
                    self.state = BusState::RepeatedStartPending;
                    self.hw.repeated_start();
                }
                _ => self.fail(TxionStatus::BufferFormat),
            },
            Token::Control(READ) => match self.param() {
                Some(count) => {
                    self.addr_just_sent = just_sent;
                    self.begin_read(count, self.dest);
                }
                None => self.fail(TxionStatus::BufferFormat),
            },
            Token::Control(READ_DIRECT) => {
                let sink = self
                    .param()
                    .zip(self.param())
                    .and_then(|(count, slot)| {
                        self.direct
                            .get(usize::from(slot))
                            .copied()
                            .flatten()
                            .map(|sink| (count, sink))
                    });
                match sink {
                    Some((count, sink)) => {
                        self.addr_just_sent = just_sent;
                        self.begin_read(count, Destination::Direct(sink));
                    }
                    None => self.fail(TxionStatus::BufferFormat),
                }
            }
            Token::Control(READ_LISTENERS) => match self.param().zip(self.param()) {
                Some((count, mask)) => {
                    self.addr_just_sent = just_sent;
                    self.begin_read(count, Destination::Listeners(ListenerSet::from_bits(mask)));
                }
                None => self.fail(TxionStatus::BufferFormat),
            },
            Token::Control(_) => self.fail(TxionStatus::BufferFormat),
        }
    }

    /// Takes the next data byte. A control element is left in the queue so
    /// that draining still finds the transaction's STOP.
    fn param(&mut self) -> Option<u8> {
        match codec::peek_token(&self.tx)? {
            Token::Data(byte) => {
                codec::pop_token(&mut self.tx);
                Some(byte)
            }
            Token::Control(_) => None,
        }
    }

    /// Starts a read of `count` bytes, or skips it when `count` is zero.
    ///
    /// Reads right after a read address start clocking immediately; anywhere
    /// else they need a repeated START with the read address first.
    fn begin_read(&mut self, count: u8, dest: Destination<'a>) {
        self.dest = dest;
        if count == 0 {
            self.advance();
            return;
        }
        self.to_read = count;
        if self.addr_just_sent && self.address & 0x01 != 0 {
            self.addr_just_sent = false;
            self.receive_next();
        } else {
            self.addr_just_sent = false;
            self.read_pending = true;
            self.state = BusState::RepeatedStartPending;
            self.hw.repeated_start();
        }
    }

    fn receive_next(&mut self) {
        self.state = BusState::ReadPhase;
        self.read_step = ReadStep::Receiving;
        self.hw.receive();
    }

    fn on_read_event(&mut self) {
        match self.read_step {
            ReadStep::Receiving => {
                let byte = self.hw.received_byte();
                if !self.deliver(byte) {
                    self.logger.warn(format_args!(
                        "i2c{}: read destination full, dropped {:#04x}",
                        self.config.bus_number, byte
                    ));
                }
                let last = if self.to_read == READ_UNTIL_FULL {
                    self.dest_remaining() == 0
                } else {
                    self.to_read -= 1;
                    self.to_read == 0
                };
                // The final byte is NACKed so the target releases SDA.
                self.read_step = ReadStep::Acknowledging { last };
                self.hw.acknowledge(!last);
            }
            ReadStep::Acknowledging { last: false } => self.receive_next(),
            ReadStep::Acknowledging { last: true } => {
                self.to_read = 0;
                self.advance();
            }
        }
    }

    fn deliver(&mut self, byte: u8) -> bool {
        match self.dest {
            Destination::ReceiveQueue => self.rx.push(byte).is_ok(),
            Destination::Direct(sink) => sink.put(byte),
            Destination::Listeners(set) => {
                let mut ok = true;
                if set.includes_receive_queue() {
                    ok = self.rx.push(byte).is_ok();
                }
                match self.listeners {
                    Some(table) => table.deliver(set, byte) && ok,
                    None => ok,
                }
            }
        }
    }

    fn dest_remaining(&self) -> usize {
        match self.dest {
            Destination::ReceiveQueue => self.rx.free(),
            Destination::Direct(sink) => sink.remaining(),
            Destination::Listeners(set) => {
                let queue = set.includes_receive_queue().then(|| self.rx.free());
                let listeners = self.listeners.and_then(|t| t.remaining(set));
                match (queue, listeners) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(a), None) | (None, Some(a)) => a,
                    (None, None) => 0,
                }
            }
        }
    }

    /// Aborts the running transaction with `status`.
    fn fail(&mut self, status: TxionStatus) {
        self.logger.warn(format_args!(
            "i2c{}: {:#04x} failed in {:?}: {:?}",
            self.config.bus_number, self.address, self.state, status
        ));
        // The bus goes idle while this STOP is still completing, so the next
        // `start` can race it. Adapters hold that START back until the
        // STOP is done (see `ByteLevelMaster::start`).
        self.hw.stop();
        self.drain_transaction();
        self.finish(status);
    }

    /// Skips queued elements up to and including the transaction's STOP.
    pub(crate) fn drain_transaction(&mut self) {
        while let Some(token) = codec::pop_token(&mut self.tx) {
            if token == Token::Control(STOP) {
                break;
            }
        }
    }

    /// Records the outcome and returns to idle.
    pub(crate) fn finish(&mut self, status: TxionStatus) {
        self.status.record(self.address, status);
        self.txn_count = self.txn_count.wrapping_add(1);
        self.deadline = None;
        self.read_pending = false;
        self.addr_just_sent = false;
        self.to_read = 0;
        self.state = BusState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use crate::i2c::ascii::AsciiTokens;
    use crate::i2c::bus::{BusState, I2cBus};
    use crate::i2c::codec::{self, Control};
    use crate::i2c::common::{BusConfig, TxionStatus};
    use crate::i2c::sim::{pump, LogCounter, MockTicks, SimDevice, SimEvent, SimHardware};

    fn target() -> SimHardware {
        SimHardware::new().with_device(SimDevice::new(0x28).with_registers(0x00, &[0xA0, 0xA1, 0xA2]))
    }

    #[test]
    fn test_read_address_then_count_reads_without_repeated_start() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.begin(0x51).unwrap();
        bus.write(2).unwrap();
        bus.end().unwrap();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        assert_eq!(
            bus.hardware().events(),
            &[
                SimEvent::Start,
                SimEvent::Tx(0x51),
                SimEvent::Rx(0xA0),
                SimEvent::Ack,
                SimEvent::Rx(0xA1),
                SimEvent::Nack,
                SimEvent::Stop,
            ]
        );
        assert_eq!(bus.rx_len(), 2);
    }

    #[test]
    fn test_read_after_write_address_switches_direction() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.begin(0x50).unwrap();
        bus.read(1).unwrap();
        bus.end().unwrap();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        assert_eq!(
            bus.hardware().events(),
            &[
                SimEvent::Start,
                SimEvent::Tx(0x50),
                SimEvent::RepeatedStart,
                SimEvent::Tx(0x51),
                SimEvent::Rx(0xA0),
                SimEvent::Nack,
                SimEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_explicit_repeated_start_matches_implicit_one() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.begin(0x50).unwrap();
        bus.write(0x01).unwrap();
        bus.begin(0x51).unwrap();
        bus.read(2).unwrap();
        bus.end().unwrap();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        let mut out = [0u8; 2];
        assert_eq!(bus.receive(&mut out), 2);
        assert_eq!(out, [0xA1, 0xA2]);
        let restarts = bus
            .hardware()
            .events()
            .iter()
            .filter(|e| **e == SimEvent::RepeatedStart)
            .count();
        assert_eq!(restarts, 1);
    }

    #[test]
    fn test_zero_length_read_is_skipped() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.write_ascii(AsciiTokens::new("s 51 r 00 p")).unwrap();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        assert_eq!(
            bus.hardware().events(),
            &[SimEvent::Start, SimEvent::Tx(0x51), SimEvent::Stop]
        );
    }

    #[test]
    fn test_malformed_transactions_fail_alone() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 64], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx)
            .with_logger(LogCounter::default());

        // Unknown control, data after a read, a mismatched restart and a
        // read with its count missing, each followed by a good message.
        for text in ["s 50 x p", "s 51 r 01 AA p", "s 50 00 s 60 p", "s 51 r p"] {
            bus.write_ascii(AsciiTokens::new(text)).unwrap();
            bus.write_message(0x50, &[0x05, 0x77]).unwrap();
        }
        assert_eq!(bus.get_status_wait(0, pump), TxionStatus::Ok);
        assert_eq!(bus.transaction_count(), 8);
        assert_eq!(bus.state(), BusState::Idle);
        assert_eq!(bus.get_status(0x50), TxionStatus::Ok);
        assert_eq!(bus.logger.warnings, 4);
        assert_eq!(bus.hardware().device(0x28).unwrap().register(0x05), 0x77);
    }

    #[test]
    fn test_malformed_transaction_reports_buffer_format() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let hw = target().with_device(SimDevice::new(0x29));
        let mut bus = I2cBus::new(hw, &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.write_ascii(AsciiTokens::new("s 52 q p")).unwrap();
        assert_eq!(bus.get_status_wait(0x52, pump), TxionStatus::BufferFormat);
    }

    #[test]
    fn test_bytes_before_start_are_discarded() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx)
            .with_logger(LogCounter::default());

        // Staged behind the composition API, which never produces this.
        codec::put_array(&mut bus.tx, &[0x01, 0x02]).unwrap();
        codec::put_control(&mut bus.tx, Control::Start(0x50)).unwrap();
        codec::put_control(&mut bus.tx, Control::Stop).unwrap();
        bus.tx.commit();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        assert_eq!(bus.logger.warnings, 1);
        assert_eq!(bus.hardware().events().first(), Some(&SimEvent::Start));
    }

    #[test]
    fn test_interrupt_while_idle_is_ignored() {
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 8], [0u8; 8]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx);

        bus.on_interrupt();
        assert_eq!(bus.state(), BusState::Idle);
        assert_eq!(bus.transaction_count(), 0);
        assert!(bus.hardware().events().is_empty());
    }

    #[test]
    fn test_full_receive_queue_drops_and_warns() {
        let ticks = MockTicks::new();
        // Room for two bytes.
        let (mut tx, mut rx) = ([0u8; 32], [0u8; 3]);
        let mut bus = I2cBus::new(target(), &ticks, BusConfig::default(), &mut tx, &mut rx)
            .with_logger(LogCounter::default());

        bus.begin(0x51).unwrap();
        bus.read(3).unwrap();
        bus.end().unwrap();
        assert_eq!(bus.get_status_wait(0x50, pump), TxionStatus::Ok);
        assert_eq!(bus.rx_len(), 2);
        assert_eq!(bus.logger.warnings, 1);
    }
}
