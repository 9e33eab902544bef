//! Filtered subscriptions to DLT record streams
//!
//! A subscription registers `(app_id, context_id)` filters with a transport,
//! buffers matching records from a background task, and lets the owner wait
//! for records satisfying a predicate.

mod stream;

pub use stream::{CloseHandle, StreamSubscription, SubscriptionError, WaitOptions};
