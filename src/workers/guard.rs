use std::sync::atomic::{AtomicBool, Ordering};

/// Per-loop execution guard. At most one tick of the owning loop runs at a
/// time; a tick that finds the guard taken is dropped, not queued.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Held for the duration of a tick. Dropping it releases the guard, so early
/// returns, `?`, panics and task cancellation all release it.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    running: &'a AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { running: &self.running })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
