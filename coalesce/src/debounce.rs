use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Duration,
};

/// The quiet-period timer loop, run on the engine's timer thread.
///
/// Two states: Idle, blocking on the first mark of a burst, and Pending, with
/// the quiet-period timer armed. Every further mark restarts the timer; only
/// after `throttle` elapses without a mark does `flush` run, exactly once per
/// burst. There is no maximum-wait cap: a continuous stream of marks defers
/// the flush indefinitely.
///
/// Returns when the mark sender disconnects. Marks that arrive while a flush
/// is running are picked up right after it and re-arm the timer, so flushes
/// never overlap.
pub(crate) fn run(marks: Receiver<()>, throttle: Duration, mut flush: impl FnMut()) {
    // Idle. The first mark of a burst arms the timer.
    while marks.recv().is_ok() {
        // Pending. Marks restart the timer, a timeout flushes.
        loop {
            match marks.recv_timeout(throttle) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    flush();
                    break;
                }
                // Shutdown. Whatever is pending is discarded with the engine.
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}
