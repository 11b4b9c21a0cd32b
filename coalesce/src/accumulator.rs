use std::mem;

use parking_lot::Mutex;

use crate::RawChange;

/// The pair of append-only buffers that absorb every raw change between
/// flushes.
///
/// Shared between the producers recording changes and the timer thread
/// detaching them.
#[derive(Debug)]
pub struct Accumulator<T>(Mutex<Buffers<T>>);

/// A detached buffer pair as returned by [`Accumulator::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffers<T> {
    /// Items added since the previous detach, in arrival order.
    pub added: Vec<T>,
    /// Items removed since the previous detach, in arrival order.
    pub removed: Vec<T>,
}

impl<T> Buffers<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for Buffers<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self(Mutex::new(Buffers::default()))
    }
}

impl<T> Accumulator<T> {
    /// Appends the change's items to the matching buffer(s).
    ///
    /// Empty item sets and [`RawChange::Cleared`] leave the buffers
    /// untouched. They still restart the quiet period, which is the
    /// scheduler's business, not ours.
    pub fn absorb(&self, change: RawChange<T>) {
        match change {
            RawChange::Added(items) if !items.is_empty() => self.0.lock().added.extend(items),
            RawChange::Removed(items) if !items.is_empty() => self.0.lock().removed.extend(items),
            RawChange::Replaced { old, new } => {
                let mut buffers = self.0.lock();
                buffers.added.push(new);
                buffers.removed.push(old);
            }
            RawChange::Added(_) | RawChange::Removed(_) | RawChange::Cleared => {}
        }
    }

    /// Swaps in two fresh buffers and returns the previous pair.
    ///
    /// Every change absorbed before this returns is contained in the returned
    /// pair; a change absorbed after it returns lands in the next pair. The
    /// buffers are replaced wholesale, never cleared in place, so the caller
    /// can iterate them without racing concurrent absorbs.
    pub fn detach(&self) -> Buffers<T> {
        mem::take(&mut *self.0.lock())
    }
}
