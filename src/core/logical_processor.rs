use std::sync::Mutex;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;

use crate::utility::perf_timer::PerfTimer;

/// A set of `n` logical processors, the pool's units of parallelism. Each
/// processor tracks the workers that are ready to run on it and the workers
/// that finished their task on it, and optionally the OS processor it's
/// pinned to.
///
/// The ready and done queues are kept separate so that a running worker can
/// enqueue itself (or its successor) without racing with the end-of-round
/// rotation the coordinator performs in [`reset()`](Self::reset).
pub struct LogicalProcessors {
    lps: Vec<LogicalProcessor>,
}

impl LogicalProcessors {
    pub fn new(processors: &[Option<u32>], num_workers: usize) -> Self {
        assert!(!processors.is_empty());

        let mut lps = Vec::new();

        for cpu_id in processors {
            lps.push(LogicalProcessor {
                cpu_id: *cpu_id,
                // each queue must be large enough to store all the workers
                ready_workers: ArrayQueue::new(num_workers),
                done_workers: ArrayQueue::new(num_workers),
                // a processor is idle until a worker is started on it
                idle_timer: Mutex::new(PerfTimer::new_started()),
            });
        }

        Self { lps }
    }

    /// Add a worker id to be run on processor `lpi`.
    pub fn add_worker(&self, lpi: usize, worker: usize) {
        self.lps[lpi].ready_workers.push(worker).unwrap();
    }

    /// Get a worker id to run on processor `lpi`, and mark that worker as
    /// "done" on `lpi`. Prefers workers that last ran on `lpi`; if none are
    /// available, steals one from another processor in round-robin order
    /// (`lpi+1`, `lpi+2`, …, wrapping). Returns the worker and the processor
    /// it was taken from, or `None` if no workers are left to run anywhere.
    pub fn next_worker(&self, lpi: usize) -> Option<(usize, usize)> {
        for (from_lpi, from_lp) in self
            .lps
            .iter()
            .enumerate()
            .cycle()
            .skip(lpi)
            .take(self.lps.len())
        {
            if let Some(worker) = from_lp.ready_workers.pop() {
                // push the worker to `lpi`, not the processor that it was
                // stolen from
                self.lps[lpi].done_workers.push(worker).unwrap();

                return Some((worker, from_lpi));
            }
        }

        None
    }

    /// Call after finishing a task on all workers to mark all workers ready
    /// to run again. Must not be called while any worker is running.
    pub fn reset(&mut self) {
        for lp in &mut self.lps {
            assert!(lp.ready_workers.is_empty(), "Not all workers were used");
            std::mem::swap(&mut lp.ready_workers, &mut lp.done_workers);
        }
    }

    /// Stop the idle timer of processor `lpi`. Called when a worker is about
    /// to start running on a previously-idle processor. A no-op if the timer
    /// is already stopped (the shutdown path releases workers without a
    /// dispatch).
    pub fn idle_timer_stop(&self, lpi: usize) {
        let mut timer = self.lps[lpi].idle_timer.lock().unwrap();
        if timer.is_running() {
            timer.stop();
        }
    }

    /// Restart the idle timer of processor `lpi`. Called by the last worker
    /// to run on `lpi` when it finds no more workers to run. A no-op if the
    /// timer is already running.
    pub fn idle_timer_continue(&self, lpi: usize) {
        let mut timer = self.lps[lpi].idle_timer.lock().unwrap();
        if !timer.is_running() {
            timer.start();
        }
    }

    /// Total time processor `lpi` has spent with no worker running.
    pub fn idle_time(&self, lpi: usize) -> Duration {
        self.lps[lpi].idle_timer.lock().unwrap().elapsed()
    }

    /// Returns the OS processor that should be used with
    /// [`nix::sched::sched_setaffinity`] to run a thread on `lpi`. Returns
    /// `None` if no processor was assigned to `lpi`.
    pub fn cpu_id(&self, lpi: usize) -> Option<u32> {
        self.lps[lpi].cpu_id
    }

    /// Returns an iterator of logical processor indexes.
    pub fn iter(&self) -> impl std::iter::ExactSizeIterator<Item = usize> + Clone {
        0..self.lps.len()
    }
}

pub struct LogicalProcessor {
    cpu_id: Option<u32>,
    ready_workers: ArrayQueue<usize>,
    done_workers: ArrayQueue<usize>,
    idle_timer: Mutex<PerfTimer>,
}
