use std::{
    mem,
    sync::{
        Arc,
        mpsc::{self, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::error;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::{Accumulator, Batch, Delivery, Publisher, RawChange, SubscriptionId, debounce};

/// The quiet period used by [`ChangeThrottle::new`].
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(50);

/// The coalescing engine: absorbs raw changes and delivers them as batches
/// once a quiet period passes without further changes.
///
/// Producers record changes from any thread. A dedicated timer thread owns
/// the quiet-period timer and the flush, so flushes never overlap and
/// subscribers see batches in flush order. Dropping the engine stops the
/// timer thread; changes that were still pending are discarded, the data they
/// described is untouched.
#[derive(Debug)]
pub struct ChangeThrottle<T> {
    accumulator: Arc<Accumulator<T>>,
    publisher: Arc<Publisher<T>>,
    /// One mark per raw change. Restarts the quiet period on the timer thread.
    marks: Sender<()>,
    timer_thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Default for ChangeThrottle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ChangeThrottle<T> {
    pub fn new() -> Self {
        Self::with_throttle(DEFAULT_THROTTLE)
    }

    /// Creates an engine that flushes after `throttle` of silence.
    pub fn with_throttle(throttle: Duration) -> Self {
        let accumulator = Arc::new(Accumulator::default());
        let publisher = Arc::new(Publisher::default());

        let (marks, mark_receiver) = mpsc::channel();

        let timer_thread = {
            let accumulator = accumulator.clone();
            let publisher = publisher.clone();
            thread::spawn(move || {
                debounce::run(mark_receiver, throttle, || {
                    publisher.publish(accumulator.detach())
                })
            })
        };

        Self {
            accumulator,
            publisher,
            marks,
            timer_thread: Some(timer_thread),
        }
    }

    /// Records one raw change: absorbs it and restarts the quiet period.
    ///
    /// Never blocks the caller beyond the short buffer lock. The mark is sent
    /// after the absorb, so the flush a mark leads to already contains the
    /// change it announced.
    pub fn record(&self, change: RawChange<T>) {
        self.accumulator.absorb(change);
        // The channel only closes when the engine drops, which also stops all
        // callers.
        let _ = self.marks.send(());
    }

    pub fn subscribe_batches(
        &self,
        handler: impl FnMut(&Batch<T>) -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        self.publisher.subscribe_batches(handler)
    }

    pub fn unsubscribe_batches(&self, subscription: SubscriptionId) -> bool {
        self.publisher.unsubscribe_batches(subscription)
    }

    pub fn subscribe_count_changed(
        &self,
        handler: impl FnMut() -> Delivery + Send + 'static,
    ) -> SubscriptionId {
        self.publisher.subscribe_count_changed(handler)
    }

    pub fn unsubscribe_count_changed(&self, subscription: SubscriptionId) -> bool {
        self.publisher.unsubscribe_count_changed(subscription)
    }

    /// A channel-shaped batch subscription.
    ///
    /// Dropping the receiver detaches the subscription on the next flush.
    pub fn batch_stream(&self) -> UnboundedReceiver<Batch<T>>
    where
        T: Clone,
    {
        let (sender, receiver) = unbounded_channel();
        self.subscribe_batches(move |batch| {
            if sender.send(batch.clone()).is_ok() {
                Delivery::Continue
            } else {
                Delivery::Stop
            }
        });
        receiver
    }

    /// A channel-shaped count-changed subscription.
    pub fn count_stream(&self) -> UnboundedReceiver<()> {
        let (sender, receiver) = unbounded_channel();
        self.subscribe_count_changed(move || {
            if sender.send(()).is_ok() {
                Delivery::Continue
            } else {
                Delivery::Stop
            }
        });
        receiver
    }
}

impl<T> Drop for ChangeThrottle<T> {
    fn drop(&mut self) {
        // Close the mark channel first so the timer thread exits its loop.
        mem::drop(mem::replace(&mut self.marks, mpsc::channel().0));

        if let Some(timer_thread) = self.timer_thread.take()
            && let Err(e) = timer_thread.join()
        {
            error!("Error joining change throttle timer thread: {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    use parking_lot::Mutex;

    use super::*;

    const THROTTLE: Duration = Duration::from_millis(50);

    fn collect_batches(throttle: &ChangeThrottle<String>) -> Arc<Mutex<Vec<Batch<String>>>> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        throttle.subscribe_batches(move |batch| {
            sink.lock().push(batch.clone());
            Delivery::Continue
        });
        collected
    }

    fn count_signals(throttle: &ChangeThrottle<String>) -> Arc<AtomicUsize> {
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = signals.clone();
        throttle.subscribe_count_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Delivery::Continue
        });
        signals
    }

    fn settle() {
        thread::sleep(THROTTLE * 4);
    }

    fn added(items: &[&str]) -> RawChange<String> {
        RawChange::Added(items.iter().map(|i| i.to_string()).collect())
    }

    fn removed(items: &[&str]) -> RawChange<String> {
        RawChange::Removed(items.iter().map(|i| i.to_string()).collect())
    }

    #[test]
    fn a_burst_coalesces_into_one_flush() {
        let throttle = ChangeThrottle::with_throttle(THROTTLE);
        let batches = collect_batches(&throttle);
        let signals = count_signals(&throttle);

        throttle.record(added(&["a"]));
        throttle.record(added(&["b"]));
        throttle.record(removed(&["a"]));
        settle();

        assert_eq!(
            *batches.lock(),
            [
                Batch::Added(vec!["a".into(), "b".into()]),
                Batch::Removed(vec!["a".into()]),
            ]
        );
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_single_add_produces_no_removed_batch() {
        let throttle = ChangeThrottle::with_throttle(THROTTLE);
        let batches = collect_batches(&throttle);
        let signals = count_signals(&throttle);

        let started = Instant::now();
        throttle.record(added(&["x"]));
        settle();

        assert_eq!(*batches.lock(), [Batch::Added(vec!["x".into()])]);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= THROTTLE);
    }

    #[test]
    fn separated_changes_flush_separately() {
        let throttle = ChangeThrottle::with_throttle(Duration::from_millis(20));
        let batches = collect_batches(&throttle);

        throttle.record(added(&["a"]));
        thread::sleep(Duration::from_millis(80));
        throttle.record(added(&["b"]));
        thread::sleep(Duration::from_millis(80));

        assert_eq!(
            *batches.lock(),
            [
                Batch::Added(vec!["a".into()]),
                Batch::Added(vec!["b".into()]),
            ]
        );
    }

    #[test]
    fn a_payloadless_change_still_signals_the_count() {
        let throttle = ChangeThrottle::with_throttle(THROTTLE);
        let batches = collect_batches(&throttle);
        let signals = count_signals(&throttle);

        throttle.record(RawChange::Cleared);
        settle();

        assert!(batches.lock().is_empty());
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_producers_lose_no_items_across_flushes() {
        const PRODUCERS: usize = 4;
        const ITEMS_PER_PRODUCER: usize = 200;

        let throttle = Arc::new(ChangeThrottle::<String>::with_throttle(
            Duration::from_millis(1),
        ));
        let batches = collect_batches(&throttle);

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let throttle = throttle.clone();
                thread::spawn(move || {
                    for i in 0..ITEMS_PER_PRODUCER {
                        throttle.record(RawChange::Added(vec![format!("{producer}-{i}")]));
                        if i % 50 == 0 {
                            // Pauses so that flushes interleave with production.
                            thread::sleep(Duration::from_millis(5));
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        let batches = batches.lock();
        assert!(batches.len() > 1, "expected the burst to flush in parts");
        let mut all: Vec<String> = batches.iter().flat_map(|b| b.items().to_vec()).collect();
        assert_eq!(all.len(), PRODUCERS * ITEMS_PER_PRODUCER);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), PRODUCERS * ITEMS_PER_PRODUCER);
    }

    #[test]
    fn intra_kind_order_is_preserved() {
        let throttle = ChangeThrottle::with_throttle(THROTTLE);
        let batches = collect_batches(&throttle);

        throttle.record(added(&["1"]));
        throttle.record(removed(&["x"]));
        throttle.record(added(&["2", "3"]));
        throttle.record(removed(&["y"]));
        settle();

        assert_eq!(
            *batches.lock(),
            [
                Batch::Added(vec!["1".into(), "2".into(), "3".into()]),
                Batch::Removed(vec!["x".into(), "y".into()]),
            ]
        );
    }

    #[test]
    fn dropping_the_engine_stops_the_timer_thread() {
        let throttle = ChangeThrottle::<String>::with_throttle(Duration::from_secs(60));
        let batches = collect_batches(&throttle);

        throttle.record(added(&["pending"]));
        drop(throttle);

        // The pending change is discarded, not flushed.
        assert!(batches.lock().is_empty());
    }

    #[tokio::test]
    async fn batch_stream_delivers_over_a_channel() {
        let throttle = ChangeThrottle::with_throttle(Duration::from_millis(10));
        let mut batches = throttle.batch_stream();
        let mut counts = throttle.count_stream();

        throttle.record(added(&["a"]));
        throttle.record(added(&["b"]));

        let batch = tokio::time::timeout(Duration::from_secs(5), batches.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, Batch::Added(vec!["a".into(), "b".into()]));

        tokio::time::timeout(Duration::from_secs(5), counts.recv())
            .await
            .unwrap()
            .unwrap();
    }
}
