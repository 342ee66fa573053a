//! Helpers shared by the queue and the controller

mod backoff;

pub use backoff::RetryBackoff;
