use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::core::logical_processor::LogicalProcessors;
use crate::core::support::simulation_time::{RawSimulationTime, SimulationTime, SIMTIME_MAX};
use crate::utility::synchronization::count_down_latch::{
    build_count_down_latch, LatchCounter, LatchWaiter,
};
use crate::utility::synchronization::semaphore::LibcSemaphore;

// If making substantial changes to this pool, you should verify the
// compilation error message for each compile_fail test at the end of this file
// to make sure that they correctly cause the expected compilation error. This
// pool unsafely transmutes the task closure lifetime, and the commented tests
// are meant to make sure that the pool does not allow unsound code to compile.
// Due to lifetime sub-typing/variance, rust will sometimes allow closures with
// shorter or longer lifetimes than we specify in the API, so the tests check
// to make sure the closures are invariant over the lifetime and that the usage
// is sound.

std::thread_local! {
    /// The logical processor that the current worker thread is running on.
    /// Updated by the pool each time the thread starts a task.
    static CURRENT_PROCESSOR: Cell<Option<usize>> = const { Cell::new(None) };

    /// The OS processor that the current worker thread is pinned to, if any.
    static CORE_AFFINITY: Cell<Option<u32>> = const { Cell::new(None) };
}

/// The logical processor index of the current worker thread, or `None` when
/// called from a thread not owned by a pool.
pub fn current_processor_idx() -> Option<usize> {
    CURRENT_PROCESSOR.with(|x| x.get())
}

/// The OS processor the current worker thread is pinned to. Will be `None` if
/// the pool is not using CPU pinning, or if called from a thread not owned by
/// a pool.
pub fn core_affinity() -> Option<u32> {
    CORE_AFFINITY.with(|x| x.get())
}

/// Per-processor minimums of the event times contributed during a round.
///
/// Each logical processor runs at most one worker at a time, so each slot has
/// at most one writer at any instant and the slots need no locking. The
/// values are published to the coordinator by the end-of-round latch.
pub struct MinEventTimes {
    slots: Vec<AtomicU64>,
}

impl MinEventTimes {
    fn new(num_processors: usize) -> Self {
        Self {
            slots: (0..num_processors)
                .map(|_| AtomicU64::new(SIMTIME_MAX))
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(num_processors: usize) -> Self {
        Self::new(num_processors)
    }

    /// Lower the minimum of the given processor's slot to `time`.
    pub fn update(&self, processor_idx: usize, time: SimulationTime) {
        self.slots[processor_idx].fetch_min(RawSimulationTime::from(time), Ordering::Relaxed);
    }

    /// The minimum time contributed across all processors since the last
    /// call, or [`SimulationTime::MAX`] if nothing was contributed. Resets
    /// every slot. Must only be called between rounds.
    pub fn take_global_min(&self) -> SimulationTime {
        let mut min = SIMTIME_MAX;
        for slot in &self.slots {
            min = std::cmp::min(min, slot.swap(SIMTIME_MAX, Ordering::Relaxed));
        }
        SimulationTime::from_raw(min).unwrap()
    }

    pub fn num_processors(&self) -> usize {
        self.slots.len()
    }
}

/// Context information provided to each task closure.
pub struct TaskData {
    pub thread_idx: usize,
    pub processor_idx: usize,
    pub cpu_id: Option<u32>,
}

/// A task that is run by the pool threads.
trait TaskFn: Fn(&TaskData) + Send + Sync {}
impl<T> TaskFn for T where T: Fn(&TaskData) + Send + Sync {}

/// A thread pool that runs a task on many threads. A task will run once on
/// each thread. Each logical processor runs its threads sequentially, meaning
/// that the pool's parallelism depends on the number of processors, not the
/// number of threads. Threads are assigned to logical processors, which can
/// be bound to operating system processors.
pub struct WorkerPool {
    /// Handles for joining threads when they've exited.
    thread_handles: Vec<std::thread::JoinHandle<()>>,
    /// State shared between all threads.
    shared_state: Arc<SharedState>,
    /// The coordinator uses this to wait for the threads to finish running
    /// the task.
    task_end_waiter: LatchWaiter,
    /// Set once the threads have been shut down and joined.
    joined: bool,
}

pub struct SharedState {
    /// The task to run during the next round. A `None` task is the shutdown
    /// sentinel.
    task: AtomicRefCell<Option<Box<dyn TaskFn>>>,
    /// Has a thread panicked?
    has_thread_panicked: AtomicBool,
    /// The logical processors.
    logical_processors: AtomicRefCell<LogicalProcessors>,
    /// The threads which run on logical processors.
    threads: Vec<ThreadScheduling>,
    /// Per-processor minimum event times, reduced between rounds.
    min_event_times: Arc<MinEventTimes>,
}

/// Scheduling state for a thread.
pub struct ThreadScheduling {
    /// Posted to release the thread when it has a new task.
    begin_sem: LibcSemaphore,
    /// The OS tid for this thread, for affinity syscalls made by other
    /// threads.
    tid: nix::unistd::Pid,
    /// The logical processor index that this thread is assigned to. Mutated
    /// only while the thread is suspended, by whichever thread starts it
    /// next.
    logical_processor_idx: AtomicUsize,
}

impl WorkerPool {
    /// A new pool with logical processors that are pinned to the provided OS
    /// processors. Each logical processor is assigned many threads. The
    /// number of logical processors will be `min(cpu_ids.len(),
    /// num_threads)`; both must be at least 1.
    pub fn new(cpu_ids: &[Option<u32>], num_threads: usize, thread_name: &str) -> Self {
        assert!(num_threads >= 1, "a pool needs at least one worker thread");
        assert!(
            !cpu_ids.is_empty(),
            "a pool needs at least one logical processor"
        );

        // we don't need more logical processors than threads
        let cpu_ids = &cpu_ids[..std::cmp::min(cpu_ids.len(), num_threads)];

        let logical_processors = LogicalProcessors::new(cpu_ids, num_threads);
        let min_event_times = Arc::new(MinEventTimes::new(cpu_ids.len()));

        let (task_end_counter, task_end_waiter) = build_count_down_latch();

        let mut thread_handles = Vec::new();
        let mut shared_state_senders = Vec::new();
        let mut tids = Vec::new();

        // start the threads
        for i in 0..num_threads {
            // the thread will send us the tid, then we'll later send the
            // shared state to the thread
            let (tid_send, tid_recv) = crossbeam::channel::bounded(1);
            let (shared_state_send, shared_state_recv) = crossbeam::channel::bounded(1);

            let task_end_counter_clone = task_end_counter.clone();

            let handle = std::thread::Builder::new()
                .name(thread_name.to_string())
                .spawn(move || work_loop(i, tid_send, shared_state_recv, task_end_counter_clone))
                .unwrap();

            thread_handles.push(handle);
            shared_state_senders.push(shared_state_send);
            tids.push(tid_recv.recv().unwrap());
        }

        // build the scheduling data for the threads; initial processor
        // assignment is round-robin
        let thread_data: Vec<ThreadScheduling> = logical_processors
            .iter()
            .cycle()
            .zip(&tids)
            .map(|(processor_idx, tid)| ThreadScheduling {
                begin_sem: LibcSemaphore::new(0),
                tid: *tid,
                logical_processor_idx: AtomicUsize::new(processor_idx),
            })
            .collect();

        // add each thread to its logical processor and apply the initial
        // affinity
        for (thread_idx, thread) in thread_data.iter().enumerate() {
            let logical_processor_idx = thread.logical_processor_idx.load(Ordering::Relaxed);
            logical_processors.add_worker(logical_processor_idx, thread_idx);
            set_thread_affinity(thread.tid, logical_processors.cpu_id(logical_processor_idx));
        }

        // state shared between all threads
        let shared_state = Arc::new(SharedState {
            task: AtomicRefCell::new(None),
            has_thread_panicked: AtomicBool::new(false),
            logical_processors: AtomicRefCell::new(logical_processors),
            threads: thread_data,
            min_event_times,
        });

        // send the shared state to each thread
        for s in shared_state_senders.into_iter() {
            s.send(Arc::clone(&shared_state)).unwrap();
        }

        Self {
            thread_handles,
            shared_state,
            task_end_waiter,
            joined: false,
        }
    }

    /// The total number of logical processors.
    pub fn num_processors(&self) -> usize {
        self.shared_state.logical_processors.borrow().iter().len()
    }

    /// The total number of threads.
    pub fn num_threads(&self) -> usize {
        self.thread_handles.len()
    }

    /// The per-processor minimum event times reduced by
    /// [`take_global_min_event_time`](Self::take_global_min_event_time).
    /// Worker threads contribute through this handle.
    pub fn min_event_times(&self) -> &Arc<MinEventTimes> {
        &self.shared_state.min_event_times
    }

    /// The minimum event time contributed by any worker since the last call,
    /// or [`SimulationTime::MAX`] if none was contributed. Must only be
    /// called between rounds.
    pub fn take_global_min_event_time(&self) -> SimulationTime {
        self.shared_state.min_event_times.take_global_min()
    }

    /// Stop and join the threads.
    pub fn join(mut self) {
        self.join_internal();
        // the drop handler runs next but sees `joined` set
    }

    fn join_internal(&mut self) {
        if self.joined {
            return;
        }
        self.joined = true;

        // a `None` task is the shutdown sentinel for the threads
        assert!(self.shared_state.task.borrow().is_none());

        // only check the thread join return value if no threads have yet
        // panicked
        let check_for_errors = !self
            .shared_state
            .has_thread_panicked
            .load(Ordering::Relaxed);

        // release every thread with the sentinel; we post all of the
        // semaphores directly instead of chaining through the logical
        // processors so that a previously-panicked thread can't break the
        // chain
        for thread in &self.shared_state.threads {
            thread.begin_sem.post();
        }

        for handle in self.thread_handles.drain(..) {
            let result = handle.join();
            if check_for_errors {
                result.expect("A worker thread panicked while stopping");
            }
        }

        let logical_processors = self.shared_state.logical_processors.borrow();
        for processor_idx in logical_processors.iter() {
            log::debug!(
                "Logical processor {processor_idx} was idle for {} seconds",
                logical_processors.idle_time(processor_idx).as_secs_f32()
            );
        }
    }

    /// Create a new scope for the pool. The scope will ensure that any task
    /// run on the pool within this scope has completed before leaving the
    /// scope.
    //
    // SAFETY: This works because:
    //
    // 1. WorkerScope<'scope> is covariant over 'scope.
    // 2. TaskRunner<'a, 'scope> is invariant over WorkerScope<'scope>, so
    //    TaskRunner<'a, 'scope> is invariant over 'scope.
    // 3. FnOnce(TaskRunner<'a, 'scope>) is contravariant over TaskRunner<'a,
    //    'scope>, so FnOnce(TaskRunner<'a, 'scope>) is invariant over 'scope.
    //
    // This means that the provided scope closure cannot take a TaskRunner<'a,
    // 'scope2> where 'scope2 is shorter than 'scope, and therefore 'scope must
    // be as long as this function call.
    //
    // If TaskRunner<'a, 'scope> was covariant over 'scope, then
    // FnOnce(TaskRunner<'a, 'scope>) would have been contravariant over
    // 'scope. This would have allowed the user to provide a scope closure that
    // could take a TaskRunner<'a, 'scope2> where 'scope2 is shorter than
    // 'scope. Then when TaskRunner<'a, 'scope2>::run(...) would eventually be
    // called, the run closure would capture data with a lifetime of only
    // 'scope2, which would be a shorter lifetime than the scope closure's
    // lifetime of 'scope. Then, any captured mutable references would be
    // accessible from both the run closure and the scope closure, leading to
    // mutable aliasing.
    pub fn scope<'scope>(
        &'scope mut self,
        f: impl for<'a> FnOnce(TaskRunner<'a, 'scope>) + 'scope,
    ) {
        assert!(
            !self
                .shared_state
                .has_thread_panicked
                .load(Ordering::Relaxed),
            "Attempting to use a pool that previously panicked"
        );

        // makes sure that the task is properly cleared even if 'f' panics
        let mut scope = WorkerScope::<'scope> {
            pool: self,
            _phantom: Default::default(),
        };

        let runner = TaskRunner { scope: &mut scope };

        f(runner);
    }
}

impl std::ops::Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_internal();
    }
}

struct WorkerScope<'scope> {
    pool: &'scope mut WorkerPool,
    // when we are dropped, it's like dropping the task
    _phantom: PhantomData<Box<dyn TaskFn + 'scope>>,
}

impl std::ops::Drop for WorkerScope<'_> {
    fn drop(&mut self) {
        // if the task was set (if `TaskRunner::run` was called)
        if self.pool.shared_state.task.borrow().is_some() {
            // wait for the task to complete
            self.pool.task_end_waiter.wait();

            // clear the task
            *self.pool.shared_state.task.borrow_mut() = None;

            // every thread was run, so rotate the logical processors' done
            // queues back into the ready queues
            self.pool
                .shared_state
                .logical_processors
                .borrow_mut()
                .reset();

            // generally following https://docs.rs/rayon/latest/rayon/fn.scope.html#panics
            if self
                .pool
                .shared_state
                .has_thread_panicked
                .load(Ordering::Relaxed)
            {
                // we could store the thread's panic message and propagate it,
                // but I don't think that's worth handling
                panic!("A worker thread panicked");
            }
        }
    }
}

/// Allows a single task to run per pool scope.
pub struct TaskRunner<'a, 'scope> {
    // SAFETY: Self must be invariant over 'scope, which is why we use &mut
    // here. See the documentation for scope() above for details.
    scope: &'a mut WorkerScope<'scope>,
}

impl<'scope> TaskRunner<'_, 'scope> {
    /// Run a task on the pool's threads.
    // unfortunately we need to use `Fn(&TaskData) + Send + Sync` and not
    // `TaskFn` here, otherwise rust's type inference doesn't work nicely in
    // the calling code
    pub fn run(self, f: impl Fn(&TaskData) + Send + Sync + 'scope) {
        let f = Box::new(f);

        // SAFETY: WorkerScope will drop this TaskFn before the end of 'scope
        let f = unsafe {
            std::mem::transmute::<Box<dyn TaskFn + 'scope>, Box<dyn TaskFn + 'static>>(f)
        };

        debug_assert!(self.scope.pool.shared_state.task.borrow().is_none());
        *self.scope.pool.shared_state.task.borrow_mut() = Some(f);

        let logical_processors = self.scope.pool.shared_state.logical_processors.borrow();

        // start the first thread for each logical processor; if the ready
        // queues ran out of threads there is nothing left to start anywhere
        // (the queue pop steals across processors), so stop early
        for processor_idx in logical_processors.iter() {
            if !start_next_worker(
                processor_idx,
                &self.scope.pool.shared_state,
                &logical_processors,
            ) {
                break;
            }
        }
    }
}

fn work_loop(
    thread_idx: usize,
    tid_send: crossbeam::channel::Sender<nix::unistd::Pid>,
    shared_state_recv: crossbeam::channel::Receiver<Arc<SharedState>>,
    mut end_counter: LatchCounter,
) {
    // we don't use `catch_unwind` here for two main reasons:
    //
    // 1. `catch_unwind` requires that the closure is `UnwindSafe`, which means
    // that `TaskFn` also needs to be `UnwindSafe`. This is a big restriction
    // on the types of tasks that we could run, since it requires that there's
    // no interior mutability in the closure. rayon seems to get around this by
    // wrapping the closure in `AssertUnwindSafe`, under the assumption that
    // the panic will be propagated later with `resume_unwinding`, but this is
    // a little more difficult to reason about compared to simply avoiding
    // `catch_unwind` altogether.
    // https://github.com/rayon-rs/rayon/blob/c571f8ffb4f74c8c09b4e1e6d9979b71b4414d07/rayon-core/src/unwind.rs#L9
    //
    // 2. There is a footgun with `catch_unwind` that could cause unexpected
    // behaviour. If the closure called `panic_any()` with a type that has a
    // Drop implementation, and that Drop implementation panics, it will cause
    // a panic that is not caught by the `catch_unwind`, causing the thread to
    // panic again with no chance to clean up properly. The pool would then
    // deadlock. Since we don't use `catch_unwind`, the thread will instead
    // "panic when panicking" and abort, which is a more ideal outcome.
    // https://github.com/rust-lang/rust/issues/86027

    // this will poison the pool when it's dropped
    struct PoisonWhenDropped<'a>(&'a SharedState);

    impl std::ops::Drop for PoisonWhenDropped<'_> {
        fn drop(&mut self) {
            // if we panicked, then inform other threads that we panicked and
            // allow them to exit gracefully
            self.0.has_thread_panicked.store(true, Ordering::Relaxed);
        }
    }

    // this will start the next worker on the processor when it's dropped
    struct StartNextWorkerOnDrop<'a> {
        shared_state: &'a SharedState,
        logical_processors: &'a LogicalProcessors,
        current_processor_idx: usize,
    }

    impl std::ops::Drop for StartNextWorkerOnDrop<'_> {
        fn drop(&mut self) {
            if !start_next_worker(
                self.current_processor_idx,
                self.shared_state,
                self.logical_processors,
            ) {
                // no worker is left to run anywhere; the processor is idle
                // until the next round
                self.logical_processors
                    .idle_timer_continue(self.current_processor_idx);
            }
        }
    }

    // send this thread's tid to the coordinator, which needs it for affinity
    // syscalls
    let tid = nix::unistd::gettid();
    tid_send.send(tid).unwrap();

    // get the shared state
    let shared_state = shared_state_recv.recv().unwrap();
    let shared_state = shared_state.as_ref();

    let poison_when_dropped = PoisonWhenDropped(shared_state);

    let thread_data = &shared_state.threads[thread_idx];

    loop {
        // wait for a new task
        thread_data.begin_sem.wait();

        // scope used to make sure we drop everything (including the task)
        // before counting down
        {
            let logical_processors = &shared_state.logical_processors.borrow();

            // the logical processor for this thread may have been changed by
            // the previous thread if this thread was stolen from another
            // logical processor
            let current_processor_idx = thread_data.logical_processor_idx.load(Ordering::Relaxed);

            // this will start the next worker even if the below task panics
            // or we break from the loop
            //
            // we must start the next worker before we count down, otherwise
            // we'll have runtime panics due to simultaneous exclusive and
            // shared borrows of `logical_processors`
            let _start_next_worker_when_dropped = StartNextWorkerOnDrop {
                shared_state,
                logical_processors,
                current_processor_idx,
            };

            let cpu_id = logical_processors.cpu_id(current_processor_idx);

            // make the scheduling state visible to code running on this
            // thread (for example the worker context)
            CURRENT_PROCESSOR.with(|x| x.set(Some(current_processor_idx)));
            CORE_AFFINITY.with(|x| x.set(cpu_id));

            // context information for the task
            let task_data = TaskData {
                thread_idx,
                processor_idx: current_processor_idx,
                cpu_id,
            };

            // run the task
            match shared_state.task.borrow().deref() {
                Some(task) => (task)(&task_data),
                None => {
                    // received the sentinel value
                    break;
                }
            };
        }

        // SAFETY: we do not hold any references/borrows to the task at this
        // time
        end_counter.count_down();
    }

    // didn't panic, so forget the poison handler and return normally
    std::mem::forget(poison_when_dropped);
}

/// Choose the next worker to run on the logical processor, and then start it.
/// Returns false if there was no worker left to start.
fn start_next_worker(
    processor_idx: usize,
    shared_state: &SharedState,
    logical_processors: &LogicalProcessors,
) -> bool {
    if let Some((next_thread_idx, from_processor_idx)) =
        logical_processors.next_worker(processor_idx)
    {
        let next_thread = &shared_state.threads[next_thread_idx];

        debug_assert_eq!(
            from_processor_idx,
            next_thread.logical_processor_idx.load(Ordering::Relaxed)
        );

        // if the next worker is assigned to a different processor
        if processor_idx != from_processor_idx {
            assign_to_processor(
                next_thread,
                processor_idx,
                from_processor_idx,
                logical_processors,
            );
        }

        // the processor stops being idle before the worker can observe it,
        // so the matching idle_timer_continue can't be reordered ahead of
        // this stop
        logical_processors.idle_timer_stop(processor_idx);

        // start the worker
        next_thread.begin_sem.post();

        return true;
    }

    false
}

/// Assigns the thread to the logical processor, migrating its OS affinity if
/// needed.
fn assign_to_processor(
    thread: &ThreadScheduling,
    processor_idx: usize,
    prev_processor_idx: usize,
    logical_processors: &LogicalProcessors,
) {
    let cpu_id = logical_processors.cpu_id(processor_idx);
    let prev_cpu_id = logical_processors.cpu_id(prev_processor_idx);

    // the affinity syscall is skipped when both processors are pinned to the
    // same OS processor, or when the new processor isn't pinned at all
    if cpu_id != prev_cpu_id {
        set_thread_affinity(thread.tid, cpu_id);
    }

    // set the thread's processor
    thread
        .logical_processor_idx
        .store(processor_idx, Ordering::Release);
}

/// Pin a thread to an OS processor. Pinning is advisory; on failure we log a
/// warning and keep running unpinned.
fn set_thread_affinity(tid: nix::unistd::Pid, cpu_id: Option<u32>) {
    if let Some(cpu_id) = cpu_id {
        let mut cpus = nix::sched::CpuSet::new();
        cpus.set(cpu_id as usize).unwrap();

        if let Err(e) = nix::sched::sched_setaffinity(tid, &cpus) {
            log::warn!("Failed to set affinity of worker thread {tid} to processor {cpu_id}: {e}");
        }
    }
}

#[cfg(any(test, doctest))]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32};

    use super::*;

    #[test]
    fn test_scope() {
        let mut pool = WorkerPool::new(&[None, None], 4, "worker");

        let mut counter = 0u32;
        for _ in 0..3 {
            pool.scope(|_| {
                counter += 1;
            });
        }

        assert_eq!(counter, 3);
    }

    #[test]
    fn test_run() {
        let mut pool = WorkerPool::new(&[None, None], 4, "worker");

        let counter = AtomicU32::new(0);
        for _ in 0..3 {
            pool.scope(|s| {
                s.run(|_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_pinning() {
        // pin both logical processors to CPU 0, which should exist everywhere
        let mut pool = WorkerPool::new(&[Some(0), Some(0)], 4, "worker");

        let counter = AtomicU32::new(0);
        for _ in 0..3 {
            pool.scope(|s| {
                s.run(|t| {
                    assert_eq!(t.cpu_id, Some(0));
                    assert_eq!(core_affinity(), Some(0));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_large_parallelism() {
        let mut pool = WorkerPool::new(&vec![None; 100], 4, "worker");

        // the processor count is bounded by the thread count
        assert_eq!(pool.num_processors(), 4);
        assert_eq!(pool.num_threads(), 4);

        let counter = AtomicU32::new(0);
        for _ in 0..3 {
            pool.scope(|s| {
                s.run(|_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_large_num_threads() {
        let mut pool = WorkerPool::new(&[None, None], 100, "worker");

        let counter = AtomicU32::new(0);
        for _ in 0..3 {
            pool.scope(|s| {
                s.run(|_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(counter.load(Ordering::SeqCst), 300);
    }

    #[test]
    fn test_single_worker_single_processor() {
        let mut pool = WorkerPool::new(&[None], 1, "worker");

        assert_eq!(pool.num_processors(), 1);
        assert_eq!(pool.num_threads(), 1);

        let counter = AtomicU32::new(0);
        pool.scope(|s| {
            s.run(|t| {
                assert_eq!(t.thread_idx, 0);
                assert_eq!(t.processor_idx, 0);
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic]
    fn test_zero_threads() {
        let _pool = WorkerPool::new(&[None], 0, "worker");
    }

    #[test]
    #[should_panic]
    fn test_zero_processors() {
        let _pool = WorkerPool::new(&[], 1, "worker");
    }

    #[test]
    fn test_all_threads_run_distinct() {
        // more threads than processors; the extra threads are pulled in by
        // the handoff when a processor frees up
        let num_threads = 4;
        let mut pool = WorkerPool::new(&[None, None], num_threads, "worker");

        let log = crossbeam::queue::SegQueue::new();
        pool.scope(|s| {
            s.run(|t| {
                log.push(t.thread_idx);
            });
        });

        let mut seen: Vec<_> = std::iter::from_fn(|| log.pop()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_processors_dispatch_concurrently() {
        // all three threads must run at the same time for the barrier to
        // clear; this deadlocks if the processors don't dispatch in parallel
        let mut pool = WorkerPool::new(&[None, None, None], 3, "worker");

        let barrier = std::sync::Barrier::new(3);
        pool.scope(|s| {
            s.run(|_| {
                barrier.wait();
            });
        });
    }

    #[test]
    fn test_min_event_time_reduction() {
        let mut pool = WorkerPool::new(&[None, None], 2, "worker");

        let min_event_times = Arc::clone(pool.min_event_times());
        pool.scope(|s| {
            s.run(|t| {
                let time = match t.thread_idx {
                    0 => SimulationTime::from_nanos(1000),
                    _ => SimulationTime::from_nanos(500),
                };
                min_event_times.update(t.processor_idx, time);
            });
        });

        assert_eq!(
            pool.take_global_min_event_time(),
            SimulationTime::from_nanos(500)
        );
        // the slots are reset by the take
        assert_eq!(pool.take_global_min_event_time(), SimulationTime::MAX);
    }

    #[test]
    fn test_workers_ready_between_rounds() {
        let num_threads = 4;
        let mut pool = WorkerPool::new(&[None, None], num_threads, "worker");

        pool.scope(|s| {
            s.run(|_| {});
        });

        // between rounds, every worker sits in exactly one ready queue (the
        // drain below sees each worker exactly once across all queues)
        {
            let logical_processors = pool.shared_state.logical_processors.borrow();
            let mut seen = Vec::new();
            while let Some((worker, _from_idx)) = logical_processors.next_worker(0) {
                seen.push(worker);
            }
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3]);
        }

        // undo the draining above so the pool can shut down normally
        pool.shared_state.logical_processors.borrow_mut().reset();

        pool.scope(|s| {
            s.run(|_| {});
        });
    }

    #[test]
    fn test_scope_runner_order() {
        let mut pool = WorkerPool::new(&[None], 1, "worker");

        let flag = AtomicBool::new(false);
        pool.scope(|s| {
            s.run(|_| {
                std::thread::sleep(std::time::Duration::from_millis(10));
                flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .unwrap();
            });
            assert!(!flag.load(Ordering::SeqCst));
        });

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_non_aliasing_borrows() {
        let mut pool = WorkerPool::new(&[None, None], 4, "worker");

        let mut counter = 0;
        pool.scope(|s| {
            counter += 1;
            s.run(|_| {
                let _x = counter;
            });
        });

        assert_eq!(counter, 1);
    }

    // should not compile: "cannot assign to `counter` because it is borrowed"
    /// ```compile_fail
    /// # use simnet::core::worker_pool::*;
    /// let mut pool = WorkerPool::new(&[None, None], 4, "worker");
    ///
    /// let mut counter = 0;
    /// pool.scope(|s| {
    ///     s.run(|_| {
    ///         let _x = counter;
    ///     });
    ///     counter += 1;
    /// });
    ///
    /// assert_eq!(counter, 1);
    /// ```
    fn _test_aliasing_borrows() {}

    #[test]
    #[should_panic]
    fn test_panic_all() {
        let mut pool = WorkerPool::new(&[None, None], 4, "worker");

        pool.scope(|s| {
            s.run(|t| {
                // all threads panic
                panic!("{}", t.thread_idx);
            });
        });
    }

    #[test]
    #[should_panic]
    fn test_panic_single() {
        let mut pool = WorkerPool::new(&[None, None], 4, "worker");

        pool.scope(|s| {
            s.run(|t| {
                // one thread panics
                if t.thread_idx == 2 {
                    panic!("{}", t.thread_idx);
                }
            });
        });
    }

    // should not compile: "`x` does not live long enough"
    /// ```compile_fail
    /// # use simnet::core::worker_pool::*;
    /// let mut pool = WorkerPool::new(&[None, None], 4, "worker");
    ///
    /// let x = 5;
    /// pool.scope(|s| {
    ///     s.run(|_| {
    ///         std::panic::panic_any(&x);
    ///     });
    /// });
    /// ```
    fn _test_panic_any() {}

    // should not compile: "closure may outlive the current function, but it
    // borrows `x`, which is owned by the current function"
    /// ```compile_fail
    /// # use simnet::core::worker_pool::*;
    /// let mut pool = WorkerPool::new(&[None, None], 4, "worker");
    ///
    /// pool.scope(|s| {
    ///     // 'x' will be dropped when the closure is dropped, but 's' lives
    ///     // longer than that
    ///     let x = 5;
    ///     s.run(|_| {
    ///         let _x = x;
    ///     });
    /// });
    /// ```
    fn _test_scope_lifetime() {}

    #[test]
    fn test_join_without_task() {
        let pool = WorkerPool::new(&[None, None], 4, "worker");
        pool.join();
    }

    #[test]
    fn test_drop_without_join() {
        let _pool = WorkerPool::new(&[None, None], 4, "worker");
    }

    #[test]
    fn test_queues() {
        let num_threads = 4;
        let mut pool = WorkerPool::new(&[None, None], num_threads, "worker");

        // a non-copy usize wrapper
        struct Wrapper(usize);

        let queues: Vec<_> = (0..num_threads)
            .map(|_| crossbeam::queue::SegQueue::<Wrapper>::new())
            .collect();

        // queues[0] has Wrapper(0), queues[1] has Wrapper(1), etc
        for (i, queue) in queues.iter().enumerate() {
            queue.push(Wrapper(i));
        }

        let num_iters = 3;
        for _ in 0..num_iters {
            pool.scope(|s| {
                s.run(|t| {
                    // take item from queue n and push it to queue n+1
                    let wrapper = queues[t.thread_idx].pop().unwrap();
                    queues[(t.thread_idx + 1) % num_threads].push(wrapper);
                });
            });
        }

        for (i, queue) in queues.iter().enumerate() {
            assert_eq!(
                queue.pop().unwrap().0,
                i.wrapping_sub(num_iters) % num_threads
            );
        }
    }
}
