//! Concurrent-connection cap.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounds the number of concurrently accepted connections. Permits release
/// on drop, so a connection task that panics still frees its slot.
#[derive(Clone)]
pub struct ConnectionLimit {
    current: Arc<AtomicUsize>,
    max: usize,
}

/// RAII permit for one accepted connection.
pub struct ConnectionPermit {
    current: Arc<AtomicUsize>,
}

impl ConnectionLimit {
    /// Create a cap of `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Try to take a slot.
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            if current >= self.max {
                return None;
            }
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(ConnectionPermit {
                        current: Arc::clone(&self.current),
                    });
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Connections currently holding a permit.
    #[allow(dead_code)] // Available for observability surfaces
    pub fn in_use(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_is_enforced_and_permits_release() {
        let limit = ConnectionLimit::new(2);
        let a = limit.try_acquire().unwrap();
        let _b = limit.try_acquire().unwrap();
        assert!(limit.try_acquire().is_none());
        assert_eq!(limit.in_use(), 2);

        drop(a);
        assert_eq!(limit.in_use(), 1);
        assert!(limit.try_acquire().is_some());
    }
}
