//! Shutdown reference counting for the server.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Server shutdown state packed into one counter.
///
/// Bit 0 is set until shutdown is called. Every in-flight allocator request
/// adds 2, so the counter reaches 0 only after shutdown was called and the
/// last such request finished.
///
/// All operations are `SeqCst`: the shutdown check after a slot push pairs
/// with the flag flip before requests are killed.
#[derive(Debug)]
pub struct ShutdownRefs(AtomicUsize);

impl ShutdownRefs {
    pub fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Take a ref for an in-flight request.
    /// Returns false if shutdown had already been called.
    pub fn ref_on_request(&self) -> bool {
        let old = self.0.fetch_add(2, Ordering::SeqCst);
        old & 1 != 0
    }

    /// Drop a request ref. Returns true if this made shutdown ready.
    pub fn unref_on_request(&self) -> bool {
        self.0.fetch_sub(2, Ordering::SeqCst) == 2
    }

    /// Drop the initial ref. Must be called once, when shutdown commits.
    /// Returns true if no requests were in flight.
    pub fn unref_on_shutdown_call(&self) -> bool {
        self.0.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn shutdown_called(&self) -> bool {
        self.0.load(Ordering::SeqCst) & 1 == 0
    }

    pub fn shutdown_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst) == 0
    }
}

impl Default for ShutdownRefs {
    fn default() -> Self {
        Self::new()
    }
}
