//! The coalescing engine behind a debounced observable list.
//!
//! Raw per-mutation changes are absorbed into a pair of append-only buffers. A
//! trailing-edge debounce timer watches the change stream and, once a quiet
//! period passes without further changes, flushes the buffers as at most one
//! added and one removed batch, followed by a count-changed signal.
//!
//! The engine never delays or alters the data itself, only the delivery of
//! change notifications.

mod accumulator;
mod change;
mod debounce;
mod publisher;
mod throttle;

pub use accumulator::*;
pub use change::*;
pub use publisher::*;
pub use throttle::*;
