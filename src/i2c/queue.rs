// Licensed under the Apache-2.0 license

//! Byte rings backing the transmit and receive streams of a bus.
//!
//! [`ByteRing`] is a single-producer/single-consumer ring over caller-owned
//! storage. One slot is kept free so that `put == get` always means empty,
//! which leaves `storage.len() - 1` usable bytes.
//!
//! Producers append to a *staging* offset that runs ahead of the committed
//! `put` offset. Staged bytes are invisible to the consumer until
//! [`ByteRing::commit`] publishes them, and [`ByteRing::rollback`] drops them.
//! Every append is all-or-nothing: on [`Error::NoSpace`] the ring is unchanged.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::i2c::common::Error;
use crate::i2c::traits::ByteSink;

pub struct ByteRing<'a> {
    buf: &'a mut [u8],
    get: usize,
    put: usize,
    staged: usize,
}

impl<'a> ByteRing<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            get: 0,
            put: 0,
            staged: 0,
        }
    }

    /// Number of bytes the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len().saturating_sub(1)
    }

    /// Committed bytes waiting for the consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.distance(self.get, self.put)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.get == self.put
    }

    /// Bytes appended since the last commit.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.distance(self.put, self.staged)
    }

    /// Space left for new appends, staged bytes included.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity()
            .saturating_sub(self.distance(self.get, self.staged))
    }

    /// Appends `len` bytes produced by `bytes`, or nothing at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if `len` bytes do not fit.
    pub fn stage_iter<I>(&mut self, len: usize, bytes: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = u8>,
    {
        if len > self.free() {
            return Err(Error::NoSpace);
        }
        for byte in bytes.into_iter().take(len) {
            if let Some(slot) = self.buf.get_mut(self.staged) {
                *slot = byte;
            }
            self.staged = self.advance(self.staged);
        }
        Ok(())
    }

    /// Appends a raw run of bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] if the run does not fit.
    pub fn stage(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stage_iter(bytes.len(), bytes.iter().copied())
    }

    /// Publishes staged bytes to the consumer.
    pub fn commit(&mut self) {
        self.put = self.staged;
    }

    /// Drops staged bytes.
    pub fn rollback(&mut self) {
        self.staged = self.put;
    }

    /// Appends and publishes one byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpace`] when the ring is full.
    pub fn push(&mut self, byte: u8) -> Result<(), Error> {
        self.stage_iter(1, [byte])?;
        self.commit();
        Ok(())
    }

    /// Removes the oldest committed byte.
    pub fn pop(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.get = self.advance(self.get);
        Some(byte)
    }

    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    /// Committed byte `offset` positions after the oldest one.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.len() {
            return None;
        }
        let mut idx = self.get + offset;
        if idx >= self.buf.len() {
            idx -= self.buf.len();
        }
        self.buf.get(idx).copied()
    }

    /// Moves committed bytes into `out`, returning how many were copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            match self.pop() {
                Some(byte) => *slot = byte,
                None => break,
            }
            count += 1;
        }
        count
    }

    /// Drops committed and staged content.
    pub fn clear(&mut self) {
        self.get = 0;
        self.put = 0;
        self.staged = 0;
    }

    fn advance(&self, idx: usize) -> usize {
        if idx + 1 >= self.buf.len() {
            0
        } else {
            idx + 1
        }
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        if to >= from {
            to - from
        } else {
            to + self.buf.len() - from
        }
    }
}

/// A [`ByteRing`] that several buses and the application can share.
///
/// Every access runs inside a critical section, so interrupt handlers may push
/// into it while foreground code drains it.
pub struct SharedQueue<'a> {
    inner: Mutex<RefCell<ByteRing<'a>>>,
}

impl<'a> SharedQueue<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ByteRing::new(buf))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ByteRing<'a>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|ring| ring.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.with(|ring| ring.is_empty())
    }

    pub fn pop(&self) -> Option<u8> {
        self.with(ByteRing::pop)
    }

    pub fn read(&self, out: &mut [u8]) -> usize {
        self.with(|ring| ring.read(out))
    }

    pub fn clear(&self) {
        self.with(ByteRing::clear);
    }
}

impl ByteSink for SharedQueue<'_> {
    fn put(&self, byte: u8) -> bool {
        self.with(|ring| ring.push(byte).is_ok())
    }

    fn remaining(&self) -> usize {
        self.with(|ring| ring.free())
    }
}

/// Fixed-size linear buffer used as a direct read destination.
pub struct ReadBuffer<const N: usize> {
    inner: Mutex<RefCell<heapless::Vec<u8, N>>>,
}

impl<const N: usize> Default for ReadBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReadBuffer<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the collected bytes into `out`, clears the buffer and returns the
    /// number of bytes copied.
    pub fn take_into(&self, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let mut data = self.inner.borrow_ref_mut(cs);
            let mut count = 0;
            for (dst, src) in out.iter_mut().zip(data.iter()) {
                *dst = *src;
                count += 1;
            }
            data.clear();
            count
        })
    }

    pub fn clear(&self) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).clear());
    }
}

impl<const N: usize> ByteSink for ReadBuffer<N> {
    fn put(&self, byte: u8) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).push(byte).is_ok())
    }

    fn remaining(&self) -> usize {
        critical_section::with(|cs| N - self.inner.borrow_ref(cs).len())
    }
}
