//! Ordered release of packets prepared concurrently.

use std::collections::BTreeMap;

/// A reserved transmission slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Releases items in the order their slots were reserved.
///
/// A slot is reserved before an item is prepared. Items completed out of
/// order wait until every earlier slot has been completed, then they are
/// released together. A slot completed with nothing to send is released
/// without output.
#[derive(Debug)]
pub struct TransmitQueue<T> {
    next_ticket: u64,
    /// Reserved slots, filled once their item is ready.
    slots: BTreeMap<u64, Option<Option<T>>>,
}

impl<T> TransmitQueue<T> {
    pub fn new() -> Self {
        Self {
            next_ticket: 0,
            slots: BTreeMap::new(),
        }
    }

    /// Reserve the next slot.
    pub fn reserve(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.slots.insert(ticket, None);
        Ticket(ticket)
    }

    /// Fill a slot and return every item now ready, oldest first.
    ///
    /// Completing an unknown or already completed ticket releases nothing.
    pub fn complete(&mut self, ticket: Ticket, item: Option<T>) -> Vec<T> {
        let Some(slot) = self.slots.get_mut(&ticket.0) else {
            return Vec::new();
        };
        if slot.is_some() {
            return Vec::new();
        }

        *slot = Some(item);
        self.collect_ready()
    }

    fn collect_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();

        while let Some(entry) = self.slots.first_entry() {
            if entry.get().is_none() {
                break;
            }
            if let Some(item) = entry.remove().flatten() {
                ready.push(item);
            }
        }

        ready
    }

    /// Slots reserved but not yet released.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Default for TransmitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
