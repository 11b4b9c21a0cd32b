//! A mutable ordered collection that debounces its change notifications.
//!
//! Mutations apply immediately; subscribers receive them coalesced into
//! batches once a burst of activity quiesces.

mod throttled_list;

pub use throttled_list::*;

pub use lull_coalesce::{Batch, DEFAULT_THROTTLE, Delivery, RawChange, SubscriptionId};
