// Licensed under the Apache-2.0 license

//! Blocking `embedded-hal` I2C on top of the queued engine.
//!
//! [`I2cController`] lets existing `embedded-hal` device drivers run on a
//! [`SharedBus`]. Each call composes one queued message, waits for it with
//! [`SharedBus::get_status_wait`] (running the supplied idle hook between
//! passes), and copies read data out of a scratch [`ReadBuffer`].
//!
//! The queue encoding has no way to express a write after a read inside one
//! transaction, because every repeated START re-addresses the target for
//! reading. Such operation lists are split: everything up to the read runs as
//! one transaction, and the following write starts a new one.

use embedded_hal::i2c::{Operation, SevenBitAddress};

use crate::common::{Logger, NoOpLogger};
use crate::i2c::codec::MAX_READ;
use crate::i2c::common::Error;
use crate::i2c::queue::ReadBuffer;
use crate::i2c::shared::SharedBus;
use crate::i2c::traits::{ByteLevelMaster, ByteSink, TickSource};

pub struct I2cController<'a, H, T, F, const N: usize, L = NoOpLogger>
where
    H: ByteLevelMaster,
    T: TickSource,
    F: FnMut(),
    L: Logger,
{
    pub bus: &'a SharedBus<'a, H, T, L>,
    pub scratch: &'a ReadBuffer<N>,
    pub idle: F,
}

impl<'a, H, T, F, const N: usize, L> I2cController<'a, H, T, F, N, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    F: FnMut(),
    L: Logger,
{
    pub fn new(bus: &'a SharedBus<'a, H, T, L>, scratch: &'a ReadBuffer<N>, idle: F) -> Self {
        Self { bus, scratch, idle }
    }

    fn run_segment(&mut self, address: u8, ops: &mut [Operation<'_>]) -> Result<(), Error> {
        let mut total = 0usize;
        for op in ops.iter() {
            if let Operation::Read(buf) = op {
                total += buf.len();
            }
        }
        if total > N {
            return Err(Error::TooLong);
        }

        let write_addr = address << 1;
        let first_is_read = matches!(ops.first(), Some(Operation::Read(_)));
        let scratch: &'a dyn ByteSink = self.scratch;
        self.scratch.clear();

        self.bus.with(|bus| {
            let composed = (|| -> Result<(), Error> {
                bus.begin(if first_is_read { write_addr | 1 } else { write_addr })?;
                // Adjacent reads are merged so that no repeated START
                // separates them.
                let mut pending_read = 0usize;
                for op in ops.iter() {
                    match op {
                        Operation::Write(bytes) => {
                            flush_read(bus, scratch, &mut pending_read)?;
                            bus.write_array(bytes)?;
                        }
                        Operation::Read(buf) => pending_read += buf.len(),
                    }
                }
                flush_read(bus, scratch, &mut pending_read)
            })();
            let ended = bus.end();
            composed.and(ended)
        })?;

        self.bus
            .get_status_wait(write_addr, &mut self.idle)
            .into_result()
            .map_err(|e| match e {
                nb::Error::Other(err) => err,
                nb::Error::WouldBlock => Error::Hardware,
            })?;

        let mut collected = [0u8; N];
        let received = self.scratch.take_into(&mut collected);
        if received < total {
            return Err(Error::Hardware);
        }
        let mut offset = 0usize;
        for op in ops.iter_mut() {
            if let Operation::Read(buf) = op {
                let src = collected
                    .get(offset..offset + buf.len())
                    .ok_or(Error::Hardware)?;
                buf.copy_from_slice(src);
                offset += buf.len();
            }
        }
        Ok(())
    }
}

fn flush_read<'a, H, T, L>(
    bus: &mut crate::i2c::bus::I2cBus<'a, H, T, L>,
    scratch: &'a dyn ByteSink,
    pending: &mut usize,
) -> Result<(), Error>
where
    H: ByteLevelMaster,
    T: TickSource,
    L: Logger,
{
    if *pending == 0 {
        return Ok(());
    }
    let count = u8::try_from(*pending)
        .ok()
        .filter(|&c| c <= MAX_READ)
        .ok_or(Error::TooLong)?;
    *pending = 0;
    bus.read_into(scratch, count)
}

/// Index where the segment starting at `start` ends: the first write that
/// follows a read.
fn segment_end(ops: &[Operation<'_>], start: usize) -> usize {
    let mut seen_read = false;
    for (i, op) in ops.iter().enumerate().skip(start) {
        match op {
            Operation::Read(_) => seen_read = true,
            Operation::Write(_) if seen_read => return i,
            Operation::Write(_) => {}
        }
    }
    ops.len()
}

impl<H, T, F, const N: usize, L> embedded_hal::i2c::ErrorType for I2cController<'_, H, T, F, N, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    F: FnMut(),
    L: Logger,
{
    type Error = Error;
}

impl<H, T, F, const N: usize, L> embedded_hal::i2c::I2c for I2cController<'_, H, T, F, N, L>
where
    H: ByteLevelMaster,
    T: TickSource,
    F: FnMut(),
    L: Logger,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address > 0x7F {
            return Err(Error::BufferFormat);
        }
        let mut start = 0;
        loop {
            let end = segment_end(operations, start);
            let segment = operations.get_mut(start..end).ok_or(Error::BufferFormat)?;
            self.run_segment(address, segment)?;
            if end >= operations.len() {
                return Ok(());
            }
            start = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::bus::I2cBus;
    use crate::i2c::common::BusConfig;
    use crate::i2c::sim::{pump, MockTicks, SimDevice, SimHardware};
    use embedded_hal::i2c::I2c;

    fn eeprom() -> SimHardware {
        SimHardware::new().with_device(SimDevice::new(0x28).with_registers(0xD0, &[0x11, 0x22]))
    }

    #[test]
    fn test_blocking_write_and_read() {
        let scratch: ReadBuffer<16> = ReadBuffer::new();
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 64], [0u8; 8]);
        let shared = SharedBus::new(I2cBus::new(eeprom(), &ticks, BusConfig::default(), &mut tx, &mut rx));
        let mut i2c = I2cController::new(&shared, &scratch, || shared.with(pump));

        i2c.write(0x28, &[0x10, 0xAB]).unwrap();
        assert_eq!(
            shared.with(|b| b.hardware().device(0x28).map(|d| d.register(0x10))),
            Some(0xAB)
        );

        let mut buf = [0u8; 2];
        i2c.write_read(0x28, &[0xD0], &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22]);

        // A bare read continues from the device's register pointer.
        i2c.write(0x28, &[0xD0]).unwrap();
        i2c.read(0x28, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22]);
        assert_eq!(shared.transaction_count(), 4);
    }

    #[test]
    fn test_write_after_read_splits_transactions() {
        let scratch: ReadBuffer<16> = ReadBuffer::new();
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 64], [0u8; 8]);
        let shared = SharedBus::new(I2cBus::new(eeprom(), &ticks, BusConfig::default(), &mut tx, &mut rx));
        let mut i2c = I2cController::new(&shared, &scratch, || shared.with(pump));

        let mut first = [0u8; 1];
        let mut second = [0u8; 1];
        let mut ops = [
            Operation::Write(&[0xD0]),
            Operation::Read(&mut first),
            Operation::Read(&mut second),
            Operation::Write(&[0x20, 0x5A]),
        ];
        i2c.transaction(0x28, &mut ops).unwrap();
        assert_eq!(first, [0x11]);
        assert_eq!(second, [0x22]);
        assert_eq!(shared.transaction_count(), 2);
        assert_eq!(
            shared.with(|b| b.hardware().device(0x28).map(|d| d.register(0x20))),
            Some(0x5A)
        );
    }

    #[test]
    fn test_errors_map_to_embedded_hal() {
        let scratch: ReadBuffer<4> = ReadBuffer::new();
        let ticks = MockTicks::new();
        let (mut tx, mut rx) = ([0u8; 64], [0u8; 8]);
        let shared = SharedBus::new(I2cBus::new(eeprom(), &ticks, BusConfig::default(), &mut tx, &mut rx));
        let mut i2c = I2cController::new(&shared, &scratch, || shared.with(pump));

        assert_eq!(i2c.write(0x30, &[0x00]), Err(Error::AddressNack));
        assert_eq!(
            embedded_hal::i2c::Error::kind(&Error::AddressNack),
            embedded_hal::i2c::ErrorKind::NoAcknowledge(embedded_hal::i2c::NoAcknowledgeSource::Address)
        );
        let mut big = [0u8; 5];
        assert_eq!(i2c.read(0x28, &mut big), Err(Error::TooLong));
        assert_eq!(i2c.write(0x80, &[0x00]), Err(Error::BufferFormat));
        // Nothing was queued by the rejected calls.
        assert_eq!(shared.transaction_count(), 1);
    }
}
