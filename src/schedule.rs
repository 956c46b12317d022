//! Bounded fan-out of per-item work.
//!
//! [`AdmissionGate`] is a counting semaphore: `acquire` blocks until a permit
//! is free and the returned [`Permit`] gives it back on drop. `drain` takes
//! every permit, which can only succeed once all admitted work has finished.
//! [`BoundedScheduler`] pairs a gate with scoped threads and a stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

pub struct AdmissionGate {
    capacity: usize,
    available: Mutex<usize>,
    freed: Condvar,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            available: Mutex::new(capacity),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.lock();
        while *available == 0 {
            available = self
                .freed
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        Permit { gate: self }
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        *self.lock()
    }

    /// Wait for all in-flight work by acquiring every permit, then release them.
    pub fn drain(&self) {
        let permits: Vec<Permit<'_>> = (0..self.capacity).map(|_| self.acquire()).collect();
        drop(permits);
    }

    fn release(&self) {
        *self.lock() += 1;
        self.freed.notify_one();
    }
}

/// An admission permit; released on drop.
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Runs one scoped thread per item, never more than `capacity` at once.
pub struct BoundedScheduler {
    gate: AdmissionGate,
    stopped: AtomicBool,
}

impl BoundedScheduler {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            gate: AdmissionGate::new(max_in_flight),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.gate.capacity()
    }

    /// Ask the dispatch loop to stop admitting new items. Work already
    /// admitted runs to completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Dispatch every item to `work` and return once all of them finished.
    /// Returns the number of items admitted.
    pub fn run<I, F>(&self, items: I, work: F) -> usize
    where
        I: IntoIterator,
        I::Item: Send,
        F: Fn(I::Item) + Sync,
    {
        let work = &work;
        let mut admitted = 0;
        thread::scope(|scope| {
            for item in items {
                let permit = self.gate.acquire();
                if self.is_stopped() {
                    log::debug!("Scheduler stopped after {} items", admitted);
                    break;
                }
                admitted += 1;
                scope.spawn(move || {
                    let _permit = permit;
                    work(item);
                });
            }
            self.gate.drain();
        });
        admitted
    }
}
