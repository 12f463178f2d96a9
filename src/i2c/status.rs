// Licensed under the Apache-2.0 license

//! Bounded history of transaction outcomes.
//!
//! Each completed transaction records `(address, outcome)` with the R/W bit of
//! the address cleared. Entry 0 is the newest. Recording an address that is
//! already present, or recording while a consumed slot exists, reuses that
//! slot; otherwise the oldest entry falls off the end.
//!
//! The most recent outcome is also kept outside the ring, so it survives any
//! number of later evictions and consumptions.

use crate::i2c::common::TxionStatus;

/// Default number of outcomes remembered per bus.
pub const STATUS_DEPTH: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub address: u8,
    pub status: TxionStatus,
}

impl StatusEntry {
    const EMPTY: Self = Self {
        address: 0,
        status: TxionStatus::NotAvailable,
    };

    fn is_consumed(&self) -> bool {
        self.status == TxionStatus::NotAvailable
    }
}

pub struct StatusCache<const N: usize = STATUS_DEPTH> {
    entries: [StatusEntry; N],
    last: Option<StatusEntry>,
}

impl<const N: usize> Default for StatusCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StatusCache<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [StatusEntry::EMPTY; N],
            last: None,
        }
    }

    /// Records the outcome of a finished transaction.
    pub fn record(&mut self, address: u8, status: TxionStatus) {
        let entry = StatusEntry {
            address: address & 0xFE,
            status,
        };
        self.last = Some(entry);

        let slot = self
            .entries
            .iter()
            .position(|e| e.address == entry.address || e.is_consumed())
            .unwrap_or(N.saturating_sub(1));
        if let Some(window) = self.entries.get_mut(..=slot) {
            window.rotate_right(1);
            if let Some(first) = window.first_mut() {
                *first = entry;
            }
        }
    }

    /// Removes and returns the outcome recorded for `address`.
    ///
    /// Returns [`TxionStatus::NotAvailable`] when nothing is pending for it.
    pub fn take(&mut self, address: u8) -> TxionStatus {
        let key = address & 0xFE;
        match self
            .entries
            .iter_mut()
            .find(|e| e.address == key && !e.is_consumed())
        {
            Some(entry) => core::mem::replace(&mut entry.status, TxionStatus::NotAvailable),
            None => TxionStatus::NotAvailable,
        }
    }

    /// Most recent outcome, never consumed.
    #[must_use]
    pub fn last(&self) -> Option<StatusEntry> {
        self.last
    }

    /// Outcomes still waiting to be taken, newest first.
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| !e.is_consumed())
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
