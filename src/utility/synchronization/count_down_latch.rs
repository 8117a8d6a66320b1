use std::sync::{Arc, Condvar, Mutex};

/// A reusable count-down latch split into two halves: counters that decrement
/// the latch, and waiters that block until every counter of the current
/// generation has counted down. After all waiters of a generation have
/// returned from [`LatchWaiter::wait()`], the latch automatically resets for
/// the next generation.
///
/// Cloning a counter or waiter inherits its state for the current generation:
/// a counter cloned after it has counted down is treated as if it had also
/// counted down in the current generation, and likewise for waiters that have
/// already waited. Dropping a half removes it from all future generations.
#[derive(Debug)]
pub struct LatchCounter {
    inner: Arc<LatchInner>,
    /// An ID for this counter's count-down round.
    generation: usize,
}

/// The waiting half of a count-down latch. See [`LatchCounter`].
#[derive(Debug)]
pub struct LatchWaiter {
    inner: Arc<LatchInner>,
    /// An ID for this waiter's count-down round.
    generation: usize,
}

#[derive(Debug)]
struct LatchInner {
    lock: Mutex<LatchState>,
    cond: Condvar,
}

#[derive(Debug)]
struct LatchState {
    /// The current latch "round".
    generation: usize,
    /// Counters that haven't yet counted down this generation.
    counters: usize,
    /// Waiters that haven't yet waited this generation.
    waiters: usize,
    /// Total number of counters.
    total_counters: usize,
    /// Total number of waiters.
    total_waiters: usize,
}

impl LatchState {
    fn advance_generation(&mut self) {
        debug_assert_eq!(self.counters, 0);
        debug_assert_eq!(self.waiters, 0);
        self.counters = self.total_counters;
        self.waiters = self.total_waiters;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Build a connected latch counter and waiter. Clone the halves to admit more
/// participants.
pub fn build_count_down_latch() -> (LatchCounter, LatchWaiter) {
    let inner = Arc::new(LatchInner {
        lock: Mutex::new(LatchState {
            generation: 0,
            counters: 1,
            waiters: 1,
            total_counters: 1,
            total_waiters: 1,
        }),
        cond: Condvar::new(),
    });

    let counter = LatchCounter {
        inner: Arc::clone(&inner),
        generation: 0,
    };

    let waiter = LatchWaiter {
        inner,
        generation: 0,
    };

    (counter, waiter)
}

impl LatchCounter {
    /// Decrement the latch count and wake the waiters if the count reaches 0.
    /// Must not be called again until all of the waiters have returned from
    /// their [`LatchWaiter::wait()`] calls for the current generation,
    /// otherwise it panics.
    pub fn count_down(&mut self) {
        let counters;
        {
            let mut lock = self.inner.lock.lock().unwrap();

            if self.generation != lock.generation {
                let latch_gen = lock.generation;
                std::mem::drop(lock);
                panic!(
                    "Counter generation does not match latch generation ({} != {})",
                    self.generation, latch_gen
                );
            }

            lock.counters = lock.counters.checked_sub(1).unwrap();
            counters = lock.counters;
        }

        // if this was the last counter, notify the waiters
        if counters == 0 {
            self.inner.cond.notify_all();
        }

        self.generation = self.generation.wrapping_add(1);
    }
}

impl LatchWaiter {
    /// Block until every counter of the current generation has counted down.
    /// Returns immediately if that already happened.
    pub fn wait(&mut self) {
        {
            let lock = self.inner.lock.lock().unwrap();

            let mut lock = self
                .inner
                .cond
                // wait until we're in the active generation and all counters have counted down
                .wait_while(lock, |x| self.generation != x.generation || x.counters > 0)
                .unwrap();

            lock.waiters = lock.waiters.checked_sub(1).unwrap();

            // the last waiter (there are no counters left either) resets the
            // latch for the next generation
            if lock.waiters == 0 {
                lock.advance_generation();
            }
        }

        self.generation = self.generation.wrapping_add(1);
    }
}

impl Clone for LatchCounter {
    fn clone(&self) -> Self {
        let mut lock = self.inner.lock.lock().unwrap();
        lock.total_counters = lock.total_counters.checked_add(1).unwrap();

        // if we haven't already counted down during the current generation
        if self.generation == lock.generation {
            lock.counters = lock.counters.checked_add(1).unwrap();
        }

        LatchCounter {
            inner: Arc::clone(&self.inner),
            generation: self.generation,
        }
    }
}

impl Clone for LatchWaiter {
    fn clone(&self) -> Self {
        let mut lock = self.inner.lock.lock().unwrap();
        lock.total_waiters = lock.total_waiters.checked_add(1).unwrap();

        // if we haven't already waited during the current generation
        if self.generation == lock.generation {
            lock.waiters = lock.waiters.checked_add(1).unwrap();
        }

        LatchWaiter {
            inner: Arc::clone(&self.inner),
            generation: self.generation,
        }
    }
}

impl std::ops::Drop for LatchCounter {
    fn drop(&mut self) {
        let mut lock = self.inner.lock.lock().unwrap();
        lock.total_counters = lock.total_counters.checked_sub(1).unwrap();

        // if we haven't already counted down during the current generation
        if self.generation == lock.generation {
            lock.counters = lock.counters.checked_sub(1).unwrap();
        }

        // if this was the last counter, notify the waiters
        if lock.counters == 0 {
            self.inner.cond.notify_all();
        }
    }
}

impl std::ops::Drop for LatchWaiter {
    fn drop(&mut self) {
        let mut lock = self.inner.lock.lock().unwrap();
        lock.total_waiters = lock.total_waiters.checked_sub(1).unwrap();

        // if we haven't already waited during the current generation
        if self.generation == lock.generation {
            lock.waiters = lock.waiters.checked_sub(1).unwrap();
        }

        // if this was the last waiter and there are no more counters, start
        // the next generation
        if lock.waiters == 0 && lock.counters == 0 {
            lock.advance_generation();
        }
    }
}
