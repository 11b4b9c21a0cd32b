use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
};

use log::error;
use parking_lot::Mutex;

use crate::{Batch, Buffers};

/// Identifies one subscription on a [`Publisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A handler's verdict about its own subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Keep the subscription.
    Continue,
    /// Drop the subscription. The handler is not invoked again.
    Stop,
}

pub type BatchHandler<T> = Box<dyn FnMut(&Batch<T>) -> Delivery + Send>;
pub type CountChangedHandler = Box<dyn FnMut() -> Delivery + Send>;

/// The subscriber registry and flush delivery.
///
/// Subscribers register explicitly and are identified by [`SubscriptionId`];
/// they can also drop out of the registry themselves by answering
/// [`Delivery::Stop`].
pub struct Publisher<T> {
    next_id: AtomicU64,
    batch_handlers: Mutex<Vec<(SubscriptionId, BatchHandler<T>)>>,
    count_handlers: Mutex<Vec<(SubscriptionId, CountChangedHandler)>>,
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("batch_handlers", &self.batch_handlers.lock().len())
            .field("count_handlers", &self.count_handlers.lock().len())
            .finish()
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            batch_handlers: Mutex::new(Vec::new()),
            count_handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Publisher<T> {
    pub fn subscribe_batches(
        &self,
        handler: impl FnMut(&Batch<T>) -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.batch_handlers.lock().push((id, Box::new(handler)));
        id
    }

    /// Removes a batch subscription. Returns whether it was still registered.
    pub fn unsubscribe_batches(&self, subscription: SubscriptionId) -> bool {
        let mut handlers = self.batch_handlers.lock();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription);
        handlers.len() != before
    }

    pub fn subscribe_count_changed(
        &self,
        handler: impl FnMut() -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.count_handlers.lock().push((id, Box::new(handler)));
        id
    }

    /// Removes a count-changed subscription. Returns whether it was still
    /// registered.
    pub fn unsubscribe_count_changed(&self, subscription: SubscriptionId) -> bool {
        let mut handlers = self.count_handlers.lock();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription);
        handlers.len() != before
    }

    /// Publishes one flush cycle.
    ///
    /// Only ever called from the timer thread, which serializes flushes: a
    /// flush, including every handler it invokes, completes before the next
    /// one begins.
    ///
    /// Empty buffers produce no batch, so subscribers can rely on every batch
    /// they see being non-empty. The count-changed signal fires
    /// unconditionally, once per cycle and after the batches, because the
    /// flush cycle itself is the trigger: a cleared list changes its count
    /// without accumulating a single item.
    pub fn publish(&self, buffers: Buffers<T>) {
        let Buffers { added, removed } = buffers;
        if !added.is_empty() {
            let batch = Batch::Added(added);
            deliver(&self.batch_handlers, |handler| handler(&batch), "Batch");
        }
        if !removed.is_empty() {
            let batch = Batch::Removed(removed);
            deliver(&self.batch_handlers, |handler| handler(&batch), "Batch");
        }
        deliver(&self.count_handlers, |handler| handler(), "Count");
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Invokes every handler, keeping only the ones that want to stay subscribed.
///
/// Each invocation is isolated: a panicking handler is logged and dropped
/// from the registry and never suppresses the handlers after it, nor the rest
/// of the flush cycle.
fn deliver<H>(
    handlers: &Mutex<Vec<(SubscriptionId, H)>>,
    mut invoke: impl FnMut(&mut H) -> Delivery,
    kind: &str,
) {
    handlers.lock().retain_mut(|(id, handler)| {
        match panic::catch_unwind(AssertUnwindSafe(|| invoke(handler))) {
            Ok(Delivery::Continue) => true,
            Ok(Delivery::Stop) => false,
            Err(_) => {
                error!("{kind} subscriber {id:?} panicked, unsubscribing it");
                false
            }
        }
    });
}
