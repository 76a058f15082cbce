//! WebSocket connection handling.
//!
//! - [`session`]: one client from upgrade through disconnect
//! - [`ConnectionSlot`]: connection-count reservation held for the life of a
//!   socket

pub mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::gauge;

use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// A reserved connection slot. Released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    counter: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    /// Reserve a slot if fewer than `max` are held.
    pub fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Some(Self {
            counter: Arc::clone(counter),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.counter.fetch_sub(1, Ordering::SeqCst);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
