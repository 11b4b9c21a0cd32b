use std::{iter, mem, time::Duration};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedReceiver;

use lull_coalesce::{
    Batch, ChangeThrottle, DEFAULT_THROTTLE, Delivery, RawChange, SubscriptionId,
};

/// An ordered collection that coalesces its change notifications.
///
/// Mutations apply to the inner vector immediately, so reads are never stale.
/// Only notification delivery is debounced: subscribers see at most one added
/// and one removed batch per burst of mutations, once the burst has been
/// quiet for the configured throttle.
///
/// All operations take `&self`; the list can be shared between threads.
#[derive(Debug)]
pub struct ThrottledList<T> {
    items: Mutex<Vec<T>>,
    throttle: ChangeThrottle<T>,
}

impl<T: Clone + Send + 'static> Default for ThrottledList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> FromIterator<T> for ThrottledList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(items: I) -> Self {
        Self::with_items(items)
    }
}

impl<T: Clone + Send + 'static> ThrottledList<T> {
    pub fn new() -> Self {
        Self::with_throttle_and_items(DEFAULT_THROTTLE, iter::empty())
    }

    pub fn with_throttle(throttle: Duration) -> Self {
        Self::with_throttle_and_items(throttle, iter::empty())
    }

    pub fn with_items(items: impl IntoIterator<Item = T>) -> Self {
        Self::with_throttle_and_items(DEFAULT_THROTTLE, items)
    }

    /// Seed items do not produce change notifications.
    pub fn with_throttle_and_items(throttle: Duration, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
            throttle: ChangeThrottle::with_throttle(throttle),
        }
    }

    /// The number of items. Always the live count: debouncing delays
    /// notifications, never the data.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.lock().get(index).cloned()
    }

    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.items.lock().contains(item)
    }

    /// The index of the first occurrence of `item`.
    pub fn index_of(&self, item: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.items.lock().iter().position(|i| i == item)
    }

    /// A copy of the current items.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    /// Read access to the items, for iteration. Holds the lock for the
    /// guard's lifetime, deferring concurrent mutations.
    pub fn items(&self) -> MappedMutexGuard<'_, [T]> {
        MutexGuard::map(self.items.lock(), |items| items.as_mut_slice())
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push(item.clone());
        self.throttle.record(RawChange::Added(vec![item]));
    }

    /// Inserts `item` at `index`. Panics when `index > len`, like
    /// [`Vec::insert`].
    pub fn insert(&self, index: usize, item: T) {
        let mut items = self.items.lock();
        items.insert(index, item.clone());
        self.throttle.record(RawChange::Added(vec![item]));
    }

    /// Appends all of `new_items` as one discrete change: subscribers see
    /// them arrive in a single added batch entry, in iteration order.
    pub fn extend(&self, new_items: impl IntoIterator<Item = T>) {
        let new_items: Vec<T> = new_items.into_iter().collect();
        if new_items.is_empty() {
            return;
        }
        let mut items = self.items.lock();
        items.extend(new_items.iter().cloned());
        self.throttle.record(RawChange::Added(new_items));
    }

    /// Overwrites the item at `index` and returns the previous one. The
    /// displaced item is reported as removed, the new one as added, in the
    /// same flush. Panics when `index` is out of range.
    pub fn set(&self, index: usize, item: T) -> T {
        let mut items = self.items.lock();
        let old = mem::replace(&mut items[index], item.clone());
        self.throttle.record(RawChange::Replaced {
            old: old.clone(),
            new: item,
        });
        old
    }

    /// Removes and returns the item at `index`. Panics when `index` is out of
    /// range, like [`Vec::remove`].
    pub fn remove_at(&self, index: usize) -> T {
        let mut items = self.items.lock();
        let removed = items.remove(index);
        self.throttle
            .record(RawChange::Removed(vec![removed.clone()]));
        removed
    }

    /// Removes the first occurrence of `item`. Returns whether one was found.
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let mut items = self.items.lock();
        let Some(index) = items.iter().position(|i| i == item) else {
            return false;
        };
        let removed = items.remove(index);
        self.throttle.record(RawChange::Removed(vec![removed]));
        true
    }

    /// Removes all items. A clear accumulates no item payload; the flush it
    /// schedules still fires the count-changed signal.
    pub fn clear(&self) {
        let mut items = self.items.lock();
        items.clear();
        self.throttle.record(RawChange::Cleared);
    }

    /// Subscribes to the coalesced batch notifications.
    ///
    /// Handlers run on the engine's timer thread. Answering
    /// [`Delivery::Stop`] drops the subscription.
    pub fn subscribe_batches(
        &self,
        handler: impl FnMut(&Batch<T>) -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        self.throttle.subscribe_batches(handler)
    }

    pub fn unsubscribe_batches(&self, subscription: SubscriptionId) -> bool {
        self.throttle.unsubscribe_batches(subscription)
    }

    /// Subscribes to the count-changed signal, fired once per flush cycle.
    /// The current count is read from the list, which is always live.
    pub fn subscribe_count_changed(
        &self,
        handler: impl FnMut() -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        self.throttle.subscribe_count_changed(handler)
    }

    pub fn unsubscribe_count_changed(&self, subscription: SubscriptionId) -> bool {
        self.throttle.unsubscribe_count_changed(subscription)
    }

    /// A channel-shaped batch subscription. Dropping the receiver detaches it.
    pub fn batch_stream(&self) -> UnboundedReceiver<Batch<T>> {
        self.throttle.batch_stream()
    }

    /// A channel-shaped count-changed subscription.
    pub fn count_stream(&self) -> UnboundedReceiver<()> {
        self.throttle.count_stream()
    }
}
