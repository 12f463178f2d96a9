// Licensed under the Apache-2.0 license

//! Registered secondary receive destinations.
//!
//! A [`ListenerTable`] is shared by all buses of a board. Each registered sink
//! gets a single-bit [`ListenerId`]; reads can then target any combination of
//! listeners, plus the bus receive queue, through a [`ListenerSet`].

use core::cell::RefCell;

use critical_section::Mutex;

use crate::i2c::common::Error;
use crate::i2c::traits::ByteSink;

/// Hard limit on registrations; bit 0 of a set is taken by the receive queue.
pub const MAX_LISTENERS: usize = 7;
pub const DEFAULT_LISTENERS: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ListenerId(u8);

impl ListenerId {
    fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index)
            .ok()
            .filter(|&i| usize::from(i) < MAX_LISTENERS)
            .map(|i| Self(0x02 << i))
    }

    #[must_use]
    pub const fn bit(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        self.0.trailing_zeros() as usize - 1
    }
}

/// A set of read destinations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerSet(u8);

impl ListenerSet {
    pub const EMPTY: Self = Self(0);
    /// Just the bus receive queue.
    pub const RECEIVE_QUEUE: Self = Self(0x01);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn with(self, id: ListenerId) -> Self {
        Self(self.0 | id.0)
    }

    #[must_use]
    pub const fn with_receive_queue(self) -> Self {
        Self(self.0 | Self::RECEIVE_QUEUE.0)
    }

    #[must_use]
    pub const fn contains(self, id: ListenerId) -> bool {
        self.0 & id.0 != 0
    }

    #[must_use]
    pub const fn includes_receive_queue(self) -> bool {
        self.0 & Self::RECEIVE_QUEUE.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn listeners(self) -> impl Iterator<Item = ListenerId> {
        (0..MAX_LISTENERS)
            .filter_map(ListenerId::from_index)
            .filter(move |id| self.contains(*id))
    }
}

impl From<ListenerId> for ListenerSet {
    fn from(id: ListenerId) -> Self {
        Self(id.0)
    }
}

/// Registration slots. Filled from index 0 and never vacated.
type Slots<'a> = [Option<&'a dyn ByteSink>; MAX_LISTENERS];

pub struct ListenerTable<'a> {
    limit: usize,
    sinks: Mutex<RefCell<Slots<'a>>>,
}

impl Default for ListenerTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ListenerTable<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_LISTENERS)
    }

    /// Table accepting up to `limit` registrations, capped at [`MAX_LISTENERS`].
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            limit: if limit > MAX_LISTENERS {
                MAX_LISTENERS
            } else {
                limit
            },
            sinks: Mutex::new(RefCell::new([None; MAX_LISTENERS])),
        }
    }

    /// Registers `sink`, returning its identifier.
    ///
    /// Registering the same sink again returns the identifier it already has.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerTableFull`] when every slot is taken.
    pub fn register(&self, sink: &'a dyn ByteSink) -> Result<ListenerId, Error> {
        critical_section::with(|cs| {
            let mut sinks = self.sinks.borrow_ref_mut(cs);
            let mut free = None;
            for (index, slot) in sinks.iter().enumerate().take(self.limit) {
                match slot {
                    Some(existing) if same_sink(*existing, sink) => {
                        return ListenerId::from_index(index).ok_or(Error::ListenerTableFull);
                    }
                    Some(_) => {}
                    None => {
                        free = Some(index);
                        break;
                    }
                }
            }
            let index = free.ok_or(Error::ListenerTableFull)?;
            let id = ListenerId::from_index(index).ok_or(Error::ListenerTableFull)?;
            let slot = sinks.get_mut(index).ok_or(Error::ListenerTableFull)?;
            *slot = Some(sink);
            Ok(id)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.sinks.borrow_ref(cs).iter().flatten().count())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, id: ListenerId) -> Option<&'a dyn ByteSink> {
        critical_section::with(|cs| self.sinks.borrow_ref(cs).get(id.index()).copied().flatten())
    }

    /// Copies `byte` to every registered listener in `set`.
    ///
    /// Returns `false` if any of them had no room. The receive-queue bit is
    /// ignored here.
    pub fn deliver(&self, set: ListenerSet, byte: u8) -> bool {
        set.listeners()
            .filter_map(|id| self.get(id))
            .fold(true, |ok, sink| sink.put(byte) && ok)
    }

    /// Smallest free space among the registered listeners in `set`, or `None`
    /// if `set` names no registered listener.
    #[must_use]
    pub fn remaining(&self, set: ListenerSet) -> Option<usize> {
        set.listeners()
            .filter_map(|id| self.get(id))
            .map(|sink| sink.remaining())
            .min()
    }
}

pub(crate) fn same_sink(a: &dyn ByteSink, b: &dyn ByteSink) -> bool {
    core::ptr::addr_eq(a as *const dyn ByteSink, b as *const dyn ByteSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::queue::{ReadBuffer, SharedQueue};

    #[test]
    fn test_ids_are_single_bits_from_0x02() {
        let a: ReadBuffer<4> = ReadBuffer::new();
        let b: ReadBuffer<4> = ReadBuffer::new();
        let table = ListenerTable::new();
        assert_eq!(table.register(&a).unwrap().bit(), 0x02);
        assert_eq!(table.register(&b).unwrap().bit(), 0x04);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_register_is_idempotent() {
        let a: ReadBuffer<4> = ReadBuffer::new();
        let table = ListenerTable::new();
        let first = table.register(&a).unwrap();
        let again = table.register(&a).unwrap();
        assert_eq!(first, again);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_full() {
        let sinks: [ReadBuffer<2>; 3] = [ReadBuffer::new(), ReadBuffer::new(), ReadBuffer::new()];
        let table = ListenerTable::with_limit(2);
        table.register(&sinks[0]).unwrap();
        table.register(&sinks[1]).unwrap();
        assert_eq!(table.register(&sinks[2]), Err(Error::ListenerTableFull));
        // Already registered sinks still resolve.
        assert!(table.register(&sinks[1]).is_ok());
    }

    #[test]
    fn test_limit_is_capped() {
        let sinks: [ReadBuffer<1>; 8] = Default::default();
        let table = ListenerTable::with_limit(20);
        for sink in &sinks[..MAX_LISTENERS] {
            table.register(sink).unwrap();
        }
        assert_eq!(table.register(&sinks[7]), Err(Error::ListenerTableFull));
    }

    #[test]
    fn test_deliver_fans_out_to_members_only() {
        let mut storage = [0u8; 8];
        let queue = SharedQueue::new(&mut storage);
        let a: ReadBuffer<4> = ReadBuffer::new();
        let b: ReadBuffer<4> = ReadBuffer::new();
        let table = ListenerTable::new();
        let qa = table.register(&queue).unwrap();
        let ia = table.register(&a).unwrap();
        let _ib = table.register(&b).unwrap();

        let set = ListenerSet::from(qa).with(ia).with_receive_queue();
        assert!(set.includes_receive_queue());
        assert!(table.deliver(set, 0x42));
        assert_eq!(queue.pop(), Some(0x42));
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert_eq!(table.remaining(set), Some(3));
        assert_eq!(table.remaining(ListenerSet::RECEIVE_QUEUE), None);
    }
}
