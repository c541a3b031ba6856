/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Published metric cells.
//!
//! A [`Counter`] is a single integer written by the framer thread and read by
//! observers on other threads. Writers use release stores so that a reader
//! never observes a value newer than the state that produced it; readers on
//! the owning thread may use the cheaper relaxed load.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free published counter.
///
/// The engine exports three of these per connection: `bytes_in_buffer`
/// (current backlog of the active stream), `invalid_library_attempts`
/// (submissions dropped by the library-id gate), and the highest outbound
/// sequence number handed to the sender.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Publishes a new value with release ordering.
    #[inline]
    pub fn set_ordered(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Reads the value with acquire ordering. Safe from any thread.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Reads the value with relaxed ordering.
    ///
    /// Only meaningful on the thread that writes the counter, where it is
    /// trivially coherent with the last store.
    #[inline]
    #[must_use]
    pub fn get_weak(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Adds one to the counter.
    #[inline]
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }
}
