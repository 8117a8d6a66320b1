use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use atomic_refcell::{AtomicRef, AtomicRefCell};
use crossbeam::atomic::AtomicCell;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::core::runahead::Runahead;
use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::event::Event;
use crate::core::work::event_queue::EventQueue;
use crate::core::work::task::TaskRef;
use crate::core::worker_pool::{self, MinEventTimes};
use crate::host::{Host, HostId};
use crate::network::dns::{Address, Dns};
use crate::network::graph::{IpAssignment, RoutingInfo};
use crate::network::packet::{Packet, PacketStatus};
use crate::utility::counter::Counter;

static USE_OBJECT_COUNTERS: AtomicBool = AtomicBool::new(false);

// global counters to be used when there is no worker active
static ALLOC_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));
static DEALLOC_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));
static SYSCALL_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));

// thread-local global state
std::thread_local! {
    // Initialized when the worker thread starts running. No shared ownership
    // or access from outside of the current thread.
    static WORKER: once_cell::unsync::OnceCell<RefCell<Worker>> = once_cell::unsync::OnceCell::new();
}

// shared global state
// Must not be mutably borrowed while the simulation is running. Worker
// threads access it through `Worker::shared`.
pub static WORKER_SHARED: Lazy<AtomicRefCell<Option<WorkerShared>>> =
    Lazy::new(|| AtomicRefCell::new(None));

#[derive(Copy, Clone, Debug)]
pub struct WorkerThreadID(pub u32);

/// Host bandwidth in bytes per second, in each direction.
#[derive(Debug, Clone, Copy)]
pub struct Bandwidth {
    pub up_bytes: u64,
    pub down_bytes: u64,
}

struct Clock {
    /// The simulated time of the event currently being executed, or `None`
    /// outside of an event.
    now: Option<EmulatedTime>,
    /// The time of the last event this worker executed. Monotonically
    /// non-decreasing within a worker.
    last: Option<EmulatedTime>,
    /// The exclusive upper bound for events executable this round.
    barrier: Option<EmulatedTime>,
}

/// Worker context, containing 'global' information for the current thread.
pub struct Worker {
    worker_id: WorkerThreadID,

    // A shared reference to the state in `WORKER_SHARED`.
    shared: AtomicRef<'static, WorkerShared>,

    // The host whose event is currently executing, when applicable. Also
    // made available to code that can't hold a host reference, such as log
    // filters.
    active_host: RefCell<Option<Box<Host>>>,

    clock: RefCell<Clock>,

    // Per-processor slots for the next-round minimum event time reduction.
    min_event_times: Arc<MinEventTimes>,

    // Not the minimum latency of the simulation, just a saved copy of this
    // worker's minimum, so repeated packets skip the shared update.
    min_latency_cache: Cell<Option<SimulationTime>>,

    // A counter for all syscalls made by processes freed by this worker.
    syscall_counter: RefCell<Counter>,
    // A counter for objects allocated by this worker.
    object_alloc_counter: RefCell<Counter>,
    // A counter for objects deallocated by this worker.
    object_dealloc_counter: RefCell<Counter>,
}

impl Worker {
    /// Create the worker context for this thread. Must be called at most once
    /// per thread, and only after [`WORKER_SHARED`] has been installed.
    pub fn new_for_this_thread(worker_id: WorkerThreadID, min_event_times: Arc<MinEventTimes>) {
        WORKER.with(|worker| {
            let res = worker.set(RefCell::new(Self {
                worker_id,
                shared: AtomicRef::map(WORKER_SHARED.borrow(), |x| x.as_ref().unwrap()),
                active_host: RefCell::new(None),
                clock: RefCell::new(Clock {
                    now: None,
                    last: None,
                    barrier: None,
                }),
                min_event_times,
                min_latency_cache: Cell::new(None),
                object_alloc_counter: RefCell::new(Counter::new()),
                object_dealloc_counter: RefCell::new(Counter::new()),
                syscall_counter: RefCell::new(Counter::new()),
            }));
            assert!(res.is_ok(), "Worker already initialized");
        });
    }

    // Runs `f` with a shared reference to the current thread's Worker.
    // Returns None if this thread has no Worker object.
    #[must_use]
    fn with<F, O>(f: F) -> Option<O>
    where
        F: FnOnce(&Worker) -> O,
    {
        WORKER
            .try_with(|w| w.get().map(|w| f(&w.borrow())))
            .ok()
            .flatten()
    }

    /// Whether currently running on a live Worker.
    pub fn is_alive() -> bool {
        Worker::with(|_| ()).is_some()
    }

    /// ID of this thread's Worker, if any.
    pub fn thread_id() -> Option<WorkerThreadID> {
        Worker::with(|w| w.worker_id)
    }

    /// The OS processor this worker is pinned to, if the pool uses pinning.
    pub fn affinity() -> Option<u32> {
        worker_pool::core_affinity()
    }

    /// Run `f` with a reference to the current Host, or return None if there
    /// is no current Host.
    #[must_use]
    pub fn with_active_host<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&Host) -> R,
    {
        Worker::with(|w| {
            let h = &*w.active_host.borrow();
            h.as_ref().map(|h| f(h))
        })
        .flatten()
    }

    /// Set the currently-active Host.
    pub fn set_active_host(host: Box<Host>) {
        let old = Worker::with(|w| w.active_host.borrow_mut().replace(host)).unwrap();
        debug_assert!(old.is_none());
    }

    /// Clear and return the currently-active Host.
    pub fn take_active_host() -> Box<Host> {
        Worker::with(|w| w.active_host.borrow_mut().take())
            .unwrap()
            .unwrap()
    }

    pub fn set_round_end_time(t: EmulatedTime) {
        Worker::with(|w| w.clock.borrow_mut().barrier.replace(t)).unwrap();
    }

    fn round_end_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.clock.borrow().barrier).flatten()
    }

    pub fn set_current_time(t: EmulatedTime) {
        Worker::with(|w| w.clock.borrow_mut().now.replace(t)).unwrap();
    }

    pub fn clear_current_time() {
        Worker::with(|w| w.clock.borrow_mut().now.take()).unwrap();
    }

    pub fn current_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.clock.borrow().now).flatten()
    }

    /// The time of the last event this worker executed.
    pub fn last_event_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.clock.borrow().last).flatten()
    }

    /// The current simulated time as the emulated wall clock.
    pub fn current_emulated_time() -> Option<EmulatedTime> {
        Worker::current_time()
    }

    /// Whether the simulation is still in its bootstrap phase, during which
    /// packets are never dropped.
    pub fn is_bootstrap_active() -> bool {
        Worker::with(|w| w.clock.borrow().now.unwrap() < w.shared.bootstrap_end_time).unwrap()
    }

    /// Whether the simulation has reached its configured end time.
    pub fn is_sim_complete() -> bool {
        Worker::with(|w| w.clock.borrow().now.unwrap() >= w.shared.sim_end_time).unwrap()
    }

    /// Execute an event on the active host, advancing this worker's clock to
    /// the event's time for the duration of the event.
    pub fn run_event(event: Event) {
        Worker::set_current_time(event.time());

        Worker::with_active_host(|host| event.execute(host)).unwrap();

        // the event time becomes the worker's last-event time, and we're no
        // longer inside an event
        Worker::with(|w| {
            let mut clock = w.clock.borrow_mut();
            debug_assert!(clock.last.is_none() || clock.last <= clock.now);
            clock.last = clock.now.take();
        })
        .unwrap();
    }

    /// Schedule a task to run on `host` after `delay` of simulated time.
    /// Returns false if the scheduler has stopped accepting new events.
    pub fn schedule_task_with_delay(task: TaskRef, host: &Host, delay: SimulationTime) -> bool {
        Worker::with(|w| {
            if !w.shared.scheduler_is_running() {
                return false;
            }

            let time = Worker::current_time().unwrap() + delay;
            let event = Event::new(task, time, host, host.id());
            w.shared.push_to_host(host.id(), event)
        })
        .unwrap()
    }

    /// Send a packet from a host into the network. The packet is scheduled
    /// for delivery at the destination host after the path latency, unless
    /// the path reliability drops it. Zero-payload (control) packets and
    /// packets sent during the bootstrap phase are never dropped.
    ///
    /// Panics if the source or destination address is not registered.
    pub fn send_packet(src_host: &Host, packet: &Arc<Packet>) {
        let current_time = Worker::current_time().unwrap();
        let round_end_time = Worker::round_end_time().unwrap();

        if Worker::is_sim_complete() {
            // the simulation is over, don't bother
            return;
        }

        let is_bootstrapping = Worker::is_bootstrap_active();

        let src_ip = *packet.src().ip();
        let dst_ip = *packet.dst().ip();

        let (dst_host_id, reliability, delay) = Worker::with(|w| {
            // unroutable packets are a configuration error, not a droppable
            // condition
            let src = w
                .shared
                .resolve_ip_to_address(src_ip)
                .unwrap_or_else(|| panic!("No host for source address {src_ip}"));
            let dst = w
                .shared
                .resolve_ip_to_address(dst_ip)
                .unwrap_or_else(|| panic!("No host for destination address {dst_ip}"));

            let src_ip = IpAddr::V4(src.addr());
            let dst_ip = IpAddr::V4(dst.addr());

            let reliability: f64 = w.shared.reliability(src_ip, dst_ip).unwrap().into();
            let delay = w.shared.latency(src_ip, dst_ip).unwrap();

            (dst.id(), reliability, delay)
        })
        .unwrap();

        // check if network reliability forces us to 'drop' the packet
        let chance: f64 = src_host.with_random_mut(|r| r.gen());

        // don't drop control packets with length 0, otherwise congestion
        // control has problems responding to packet loss
        if !is_bootstrapping && chance >= reliability && !packet.is_control() {
            packet.add_status(PacketStatus::INET_DROPPED);
            return;
        }

        let deliver_time = current_time + delay;

        Worker::update_lowest_used_latency(delay);
        Worker::with(|w| {
            w.shared
                .increment_packet_count(IpAddr::V4(src_ip), IpAddr::V4(dst_ip))
        })
        .unwrap();

        packet.add_status(PacketStatus::INET_SENT);

        // the delivery task co-owns the packet with the sender
        let packet = Arc::new(AtomicCell::new(Some(Arc::clone(packet))));

        let packet_task = TaskRef::new(move |host: &Host| {
            let packet = packet.take().expect("Packet delivery task ran twice");

            let became_nonempty = host.upstream_router().enqueue(packet);

            if became_nonempty {
                host.packets_are_available_to_receive();
            }
        });

        let mut packet_event = Event::new(packet_task, deliver_time, src_host, dst_host_id);

        // delay the packet until the next round
        if deliver_time < round_end_time {
            packet_event.set_time(round_end_time);
        }

        // we may have sent this packet after the destination host finished
        // running the current round and calculated its min event time, so we
        // put this in our min event time instead
        Worker::update_next_event_time(packet_event.time());

        debug_assert!(packet_event.time() >= round_end_time);
        assert!(
            Worker::with(|w| w.shared.push_to_host(dst_host_id, packet_event)).unwrap(),
            "No event queue for host {dst_host_id}"
        );
    }

    /// Boot each host in turn, charging the boot work to the host's
    /// execution timer. Returns the hosts in the order they were given.
    pub fn boot_hosts(hosts: impl IntoIterator<Item = Box<Host>>) -> Vec<Box<Host>> {
        hosts
            .into_iter()
            .map(|host| {
                Worker::set_active_host(host);
                Worker::with_active_host(|host| {
                    host.continue_execution_timer();
                    host.boot();
                    host.stop_execution_timer();
                })
                .unwrap();
                Worker::take_active_host()
            })
            .collect()
    }

    /// Tear down each host: free its applications and shut it down. Then hand
    /// this worker's alloc/dealloc/syscall counters off to the process-wide
    /// aggregates.
    pub fn finish_hosts(hosts: impl IntoIterator<Item = Box<Host>>) {
        for host in hosts {
            host.free_all_applications();
            host.shutdown();
            // the host is freed here
        }

        Worker::add_to_global_alloc_counters();
        Worker::add_to_global_syscall_counter();
    }

    /// The next event popped from the active round's window for `host`, if
    /// its time is before this worker's round end.
    pub fn next_event_for_host(host_id: HostId) -> Option<Event> {
        Worker::with(|w| {
            let round_end = w.clock.borrow().barrier.expect("No round is running");
            w.shared.pop_next_event_before(host_id, round_end)
        })
        .unwrap()
    }

    /// Record an event time for the next round's global minimum. Times
    /// earlier than this worker's round end are ignored: those events run in
    /// the current round and don't bound the next one.
    pub fn update_next_event_time(t: EmulatedTime) {
        Worker::with(|w| {
            if let Some(round_end) = w.clock.borrow().barrier {
                if t < round_end {
                    return;
                }
            }

            // each logical processor runs one worker at a time, so this slot
            // has no concurrent writers; threads outside a pool contribute
            // through the first slot
            let processor_idx = worker_pool::current_processor_idx().unwrap_or(0);
            w.min_event_times.update(processor_idx, t.to_abs_simtime());
        })
        .unwrap()
    }

    /// Report a used path latency, possibly shortening the next round.
    pub fn update_lowest_used_latency(t: SimulationTime) {
        assert!(t != SimulationTime::ZERO);

        Worker::with(|w| {
            let min_latency_cache = w.min_latency_cache.get();
            if min_latency_cache.is_none() || t < min_latency_cache.unwrap() {
                w.min_latency_cache.set(Some(t));
                w.shared.update_lowest_used_latency(t);
            }
        })
        .unwrap();
    }

    /// Whether a message at `level` should be filtered out under the active
    /// host's log level override.
    pub fn is_filtered(level: log::Level) -> bool {
        let host_level = Worker::with_active_host(|host| host.log_level()).flatten();
        match host_level {
            Some(filter) => level > filter,
            None => false,
        }
    }

    pub fn resolve_ip_to_address(ip: std::net::Ipv4Addr) -> Option<Arc<Address>> {
        Worker::with(|w| w.shared.resolve_ip_to_address(ip)).unwrap()
    }

    pub fn resolve_name_to_address(name: &str) -> Option<Arc<Address>> {
        Worker::with(|w| w.shared.resolve_name_to_address(name)).unwrap()
    }

    /// Latency of the path between two registered addresses.
    pub fn latency(src: IpAddr, dst: IpAddr) -> Option<SimulationTime> {
        Worker::with(|w| w.shared.latency(src, dst)).unwrap()
    }

    pub fn is_routable(src: IpAddr, dst: IpAddr) -> bool {
        Worker::with(|w| w.shared.is_routable(src, dst)).unwrap()
    }

    pub fn bandwidth_up_bytes(ip: IpAddr) -> Option<u64> {
        Worker::with(|w| w.shared.bandwidth(ip).map(|b| b.up_bytes)).unwrap()
    }

    pub fn bandwidth_down_bytes(ip: IpAddr) -> Option<u64> {
        Worker::with(|w| w.shared.bandwidth(ip).map(|b| b.down_bytes)).unwrap()
    }

    /// Count a plugin that exited with an error.
    pub fn increment_plugin_error_count() {
        Worker::with(|w| w.shared.increment_plugin_error_count()).unwrap()
    }

    pub fn increment_object_alloc_counter(s: &str) {
        if !USE_OBJECT_COUNTERS.load(Ordering::Relaxed) {
            return;
        }

        Worker::with(|w| {
            w.object_alloc_counter.borrow_mut().add_one(s);
        })
        .unwrap_or_else(|| {
            // no live worker; fall back to the shared counter
            ALLOC_COUNTER.lock().unwrap().add_one(s);
        });
    }

    pub fn increment_object_dealloc_counter(s: &str) {
        if !USE_OBJECT_COUNTERS.load(Ordering::Relaxed) {
            return;
        }

        Worker::with(|w| {
            w.object_dealloc_counter.borrow_mut().add_one(s);
        })
        .unwrap_or_else(|| {
            // no live worker; fall back to the shared counter
            DEALLOC_COUNTER.lock().unwrap().add_one(s);
        });
    }

    /// Aggregate the given syscall counts into this worker's syscall counter,
    /// or the process-wide counter if there is no live worker.
    pub fn add_syscall_counts(syscall_counts: &Counter) {
        Worker::with(|w| {
            w.syscall_counter.borrow_mut().add_counter(syscall_counts);
        })
        .unwrap_or_else(|| {
            // no live worker (e.g. during startup or teardown); fall back to
            // the shared counter
            SYSCALL_COUNTER.lock().unwrap().add_counter(syscall_counts);
        });
    }

    /// Move this worker's object counters into the process-wide counters,
    /// leaving the worker's counters empty.
    pub fn add_to_global_alloc_counters() {
        Worker::with(|w| {
            let mut global_alloc_counter = ALLOC_COUNTER.lock().unwrap();
            let mut global_dealloc_counter = DEALLOC_COUNTER.lock().unwrap();

            global_alloc_counter.add_counter(&w.object_alloc_counter.borrow());
            global_dealloc_counter.add_counter(&w.object_dealloc_counter.borrow());

            *w.object_alloc_counter.borrow_mut() = Counter::new();
            *w.object_dealloc_counter.borrow_mut() = Counter::new();
        })
        .unwrap()
    }

    /// Move this worker's syscall counter into the process-wide counter,
    /// leaving the worker's counter empty.
    pub fn add_to_global_syscall_counter() {
        Worker::with(|w| {
            let mut global_syscall_counter = SYSCALL_COUNTER.lock().unwrap();
            global_syscall_counter.add_counter(&w.syscall_counter.borrow());
            *w.syscall_counter.borrow_mut() = Counter::new();
        })
        .unwrap()
    }
}

/// State shared between all workers, installed into [`WORKER_SHARED`] before
/// the pool starts and read-only while the simulation runs.
#[derive(Debug)]
pub struct WorkerShared {
    pub ip_assignment: IpAssignment<u32>,
    pub routing_info: RoutingInfo<u32>,
    pub host_bandwidths: HashMap<IpAddr, Bandwidth>,
    pub dns: Dns,
    /// Number of plugins that failed with a non-zero exit code.
    pub num_plugin_errors: AtomicU32,
    /// Calculates the runahead for the next simulation round.
    pub runahead: Runahead,
    pub event_queues: HashMap<HostId, Arc<Mutex<EventQueue>>>,
    pub bootstrap_end_time: EmulatedTime,
    pub sim_end_time: EmulatedTime,
    /// Cleared when the scheduler stops accepting new events.
    scheduler_running: AtomicBool,
}

impl WorkerShared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ip_assignment: IpAssignment<u32>,
        routing_info: RoutingInfo<u32>,
        host_bandwidths: HashMap<IpAddr, Bandwidth>,
        dns: Dns,
        runahead: Runahead,
        event_queues: HashMap<HostId, Arc<Mutex<EventQueue>>>,
        bootstrap_end_time: EmulatedTime,
        sim_end_time: EmulatedTime,
    ) -> Self {
        Self {
            ip_assignment,
            routing_info,
            host_bandwidths,
            dns,
            num_plugin_errors: AtomicU32::new(0),
            runahead,
            event_queues,
            bootstrap_end_time,
            sim_end_time,
            scheduler_running: AtomicBool::new(true),
        }
    }

    pub fn latency(&self, src: IpAddr, dst: IpAddr) -> Option<SimulationTime> {
        let src = self.ip_assignment.get_node(src)?;
        let dst = self.ip_assignment.get_node(dst)?;

        Some(SimulationTime::from_nanos(
            self.routing_info.path(src, dst)?.latency_ns,
        ))
    }

    pub fn reliability(&self, src: IpAddr, dst: IpAddr) -> Option<f32> {
        let src = self.ip_assignment.get_node(src)?;
        let dst = self.ip_assignment.get_node(dst)?;

        Some(1.0 - self.routing_info.path(src, dst)?.packet_loss)
    }

    pub fn bandwidth(&self, ip: IpAddr) -> Option<&Bandwidth> {
        self.host_bandwidths.get(&ip)
    }

    pub fn increment_packet_count(&self, src: IpAddr, dst: IpAddr) {
        let src = self.ip_assignment.get_node(src).unwrap();
        let dst = self.ip_assignment.get_node(dst).unwrap();

        self.routing_info.increment_packet_count(src, dst)
    }

    pub fn is_routable(&self, src: IpAddr, dst: IpAddr) -> bool {
        if self.ip_assignment.get_node(src).is_none() {
            return false;
        }

        if self.ip_assignment.get_node(dst).is_none() {
            return false;
        }

        // the network is required to be connected, so they must be routable
        true
    }

    pub fn resolve_ip_to_address(&self, ip: std::net::Ipv4Addr) -> Option<Arc<Address>> {
        self.dns.addr_to_address(ip)
    }

    pub fn resolve_name_to_address(&self, name: &str) -> Option<Arc<Address>> {
        self.dns.name_to_address(name)
    }

    pub fn increment_plugin_error_count(&self) {
        self.num_plugin_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn plugin_error_count(&self) -> u32 {
        self.num_plugin_errors.load(Ordering::SeqCst)
    }

    pub fn get_runahead(&self) -> SimulationTime {
        self.runahead.get()
    }

    /// Should only be called from the thread-local worker.
    fn update_lowest_used_latency(&self, min_path_latency: SimulationTime) {
        self.runahead.update_lowest_used_latency(min_path_latency);
    }

    /// Push an event onto the destination host's queue. Returns false if the
    /// host has no queue.
    pub fn push_to_host(&self, host: HostId, event: Event) -> bool {
        match self.event_queues.get(&host) {
            Some(event_queue) => {
                event_queue.lock().unwrap().push(event);
                true
            }
            None => false,
        }
    }

    /// Pop the next event for `host` whose time is before `end`.
    pub fn pop_next_event_before(&self, host: HostId, end: EmulatedTime) -> Option<Event> {
        let mut queue = self.event_queues.get(&host)?.lock().unwrap();
        if queue.next_event_time()? < end {
            queue.pop()
        } else {
            None
        }
    }

    /// The earliest event time across all host queues.
    pub fn next_queued_event_time(&self) -> Option<EmulatedTime> {
        self.event_queues
            .values()
            .filter_map(|queue| queue.lock().unwrap().next_event_time())
            .min()
    }

    pub fn scheduler_is_running(&self) -> bool {
        self.scheduler_running.load(Ordering::Relaxed)
    }

    /// Stop accepting new events. Tasks scheduled after this are rejected.
    pub fn stop_scheduler(&self) {
        self.scheduler_running.store(false, Ordering::Relaxed);
    }
}

/// Enable object counters. Should be called near the beginning of the
/// program.
pub fn enable_object_counters() {
    USE_OBJECT_COUNTERS.store(true, Ordering::Relaxed);
}

pub fn with_global_syscall_counter<T>(f: impl FnOnce(&Counter) -> T) -> T {
    let counter = SYSCALL_COUNTER.lock().unwrap();
    f(&counter)
}

pub fn with_global_object_counters<T>(f: impl FnOnce(&Counter, &Counter) -> T) -> T {
    let alloc_counter = ALLOC_COUNTER.lock().unwrap();
    let dealloc_counter = DEALLOC_COUNTER.lock().unwrap();
    f(&alloc_counter, &dealloc_counter)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::net::{Ipv4Addr, SocketAddrV4};

    use crate::network::dns::DnsBuilder;
    use crate::network::graph::PathProperties;

    // Tests (in this module and others) that install `WORKER_SHARED` or read
    // the process-wide counters must not run concurrently.
    pub(crate) static GLOBAL_STATE_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn lock_global_state() -> std::sync::MutexGuard<'static, ()> {
        GLOBAL_STATE_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    const HOST_A_IP: Ipv4Addr = Ipv4Addr::new(100, 0, 0, 1);
    const HOST_B_IP: Ipv4Addr = Ipv4Addr::new(100, 0, 0, 2);

    fn test_host(id: u32, ip: Ipv4Addr) -> Box<Host> {
        Box::new(Host::new(
            crate::host::HostParameters {
                id: HostId::from(id),
                name: format!("host{id}"),
                seed: 42 + u64::from(id),
                log_level: None,
            },
            ip,
        ))
    }

    /// Shared state with two hosts and a symmetric path between them.
    fn test_shared(packet_loss: f32, latency: SimulationTime) -> WorkerShared {
        let mut dns = DnsBuilder::new();
        dns.register(HostId::from(0), HOST_A_IP, "hosta".into())
            .unwrap();
        dns.register(HostId::from(1), HOST_B_IP, "hostb".into())
            .unwrap();

        let mut ip_assignment = IpAssignment::new();
        ip_assignment.assign_ip(0, IpAddr::V4(HOST_A_IP)).unwrap();
        ip_assignment.assign_ip(1, IpAddr::V4(HOST_B_IP)).unwrap();

        let path = PathProperties {
            latency_ns: u64::try_from(latency.as_nanos()).unwrap(),
            packet_loss,
        };
        let mut paths = HashMap::new();
        for src in 0..2u32 {
            for dst in 0..2u32 {
                paths.insert((src, dst), path);
            }
        }

        let mut host_bandwidths = HashMap::new();
        host_bandwidths.insert(
            IpAddr::V4(HOST_A_IP),
            Bandwidth {
                up_bytes: 1_000_000,
                down_bytes: 2_000_000,
            },
        );

        let mut event_queues = HashMap::new();
        event_queues.insert(HostId::from(0), Arc::new(Mutex::new(EventQueue::new())));
        event_queues.insert(HostId::from(1), Arc::new(Mutex::new(EventQueue::new())));

        WorkerShared::new(
            ip_assignment,
            RoutingInfo::new(paths),
            host_bandwidths,
            dns.into_dns(),
            Runahead::new(true, latency, None),
            event_queues,
            EmulatedTime::SIMULATION_START,
            EmulatedTime::MAX,
        )
    }

    /// Install `shared`, run `f` on a fresh thread with a live worker
    /// context, then uninstall. The caller must hold the global state lock.
    pub(crate) fn run_with_worker<F>(shared: WorkerShared, f: F)
    where
        F: FnOnce() + Send,
    {
        assert!(WORKER_SHARED.borrow_mut().replace(shared).is_none());

        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    Worker::new_for_this_thread(
                        WorkerThreadID(0),
                        Arc::new(crate::core::worker_pool::MinEventTimes::new_for_tests(1)),
                    );
                    f();
                })
                .join()
                .unwrap();
        });

        WORKER_SHARED.borrow_mut().take().unwrap();
    }

    fn test_packet(payload: Vec<u8>) -> Arc<Packet> {
        Arc::new(Packet::new(
            SocketAddrV4::new(HOST_A_IP, 1000),
            SocketAddrV4::new(HOST_B_IP, 2000),
            payload,
        ))
    }

    #[test]
    fn test_send_packet_reliable_path() {
        let _guard = lock_global_state();
        let latency = SimulationTime::from_millis(5);
        let shared = test_shared(0.0, latency);
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(1)).unwrap());

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);
            Worker::set_round_end_time(EmulatedTime::SIMULATION_START);

            let packet = test_packet(vec![1, 2, 3]);
            Worker::send_packet(&host, &packet);

            assert!(packet.has_status(PacketStatus::INET_SENT));
            assert!(!packet.has_status(PacketStatus::INET_DROPPED));
        });

        // delivery is scheduled after exactly the path latency
        let deliver_time = queue.lock().unwrap().next_event_time().unwrap();
        assert_eq!(
            deliver_time,
            EmulatedTime::SIMULATION_START + SimulationTime::from_millis(5)
        );
    }

    #[test]
    fn test_send_packet_unreliable_path_drops() {
        let _guard = lock_global_state();
        let shared = test_shared(1.0, SimulationTime::from_millis(5));
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(1)).unwrap());

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);
            Worker::set_round_end_time(EmulatedTime::SIMULATION_START);

            let packet = test_packet(vec![1, 2, 3]);
            Worker::send_packet(&host, &packet);

            assert!(packet.has_status(PacketStatus::INET_DROPPED));
            assert!(!packet.has_status(PacketStatus::INET_SENT));
        });

        assert!(queue.lock().unwrap().next_event_time().is_none());
    }

    #[test]
    fn test_send_packet_control_packets_bypass_drop() {
        let _guard = lock_global_state();
        let shared = test_shared(1.0, SimulationTime::from_millis(5));
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(1)).unwrap());

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);
            Worker::set_round_end_time(EmulatedTime::SIMULATION_START);

            // a zero-payload control packet is immune to the reliability draw
            let packet = test_packet(vec![]);
            Worker::send_packet(&host, &packet);

            assert!(packet.has_status(PacketStatus::INET_SENT));
        });

        assert!(queue.lock().unwrap().next_event_time().is_some());
    }

    #[test]
    fn test_send_packet_bootstrap_suppresses_drop() {
        let _guard = lock_global_state();
        let mut shared = test_shared(1.0, SimulationTime::from_millis(5));
        // bootstrapping lasts for the first second
        shared.bootstrap_end_time = EmulatedTime::SIMULATION_START + SimulationTime::SECOND;
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(1)).unwrap());

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);
            Worker::set_round_end_time(EmulatedTime::SIMULATION_START);
            assert!(Worker::is_bootstrap_active());

            let packet = test_packet(vec![1, 2, 3]);
            Worker::send_packet(&host, &packet);

            assert!(packet.has_status(PacketStatus::INET_SENT));
        });

        assert!(queue.lock().unwrap().next_event_time().is_some());
    }

    #[test]
    fn test_send_packet_delayed_to_round_end() {
        let _guard = lock_global_state();
        let latency = SimulationTime::from_millis(5);
        let shared = test_shared(0.0, latency);
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(1)).unwrap());

        let round_end = EmulatedTime::SIMULATION_START + SimulationTime::from_millis(100);

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);
            Worker::set_round_end_time(round_end);

            let packet = test_packet(vec![1]);
            Worker::send_packet(&host, &packet);
        });

        // delivery would land inside the current round, so it's pushed to the
        // round boundary
        let deliver_time = queue.lock().unwrap().next_event_time().unwrap();
        assert_eq!(deliver_time, round_end);
    }

    #[test]
    fn test_schedule_task_with_delay() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));
        let queue = Arc::clone(shared.event_queues.get(&HostId::from(0)).unwrap());

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            let now = EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(10);
            Worker::set_current_time(now);

            // an event is never scheduled before the current time
            assert!(Worker::schedule_task_with_delay(
                TaskRef::new(|_| {}),
                &host,
                SimulationTime::ZERO,
            ));
            assert!(Worker::schedule_task_with_delay(
                TaskRef::new(|_| {}),
                &host,
                SimulationTime::from_nanos(7),
            ));
        });

        let mut queue = queue.lock().unwrap();
        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(
            first.time(),
            EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(10)
        );
        assert_eq!(
            second.time(),
            EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(17)
        );
    }

    #[test]
    fn test_schedule_task_rejected_after_scheduler_stops() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));
        shared.stop_scheduler();

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            Worker::set_current_time(EmulatedTime::SIMULATION_START);

            assert!(!Worker::schedule_task_with_delay(
                TaskRef::new(|_| {}),
                &host,
                SimulationTime::SECOND,
            ));
        });
    }

    #[test]
    fn test_min_event_time_round_boundary() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        run_with_worker(shared, || {
            let start = EmulatedTime::SIMULATION_START;
            let round_end = start + SimulationTime::from_nanos(100);
            Worker::set_round_end_time(round_end);

            let min_event_times = Worker::with(|w| Arc::clone(&w.min_event_times)).unwrap();

            // earlier than the round end: runs this round, not recorded
            Worker::update_next_event_time(start + SimulationTime::from_nanos(50));
            assert_eq!(min_event_times.take_global_min(), SimulationTime::MAX);

            // at the round end: belongs to the next round, recorded
            Worker::update_next_event_time(start + SimulationTime::from_nanos(100));
            Worker::update_next_event_time(start + SimulationTime::from_nanos(101));
            assert_eq!(
                min_event_times.take_global_min(),
                SimulationTime::from_nanos(100)
            );

            // the reduction resets after each take
            assert_eq!(min_event_times.take_global_min(), SimulationTime::MAX);
        });
    }

    #[test]
    fn test_run_event_advances_clock() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        run_with_worker(shared, || {
            let host = test_host(0, HOST_A_IP);
            let time = EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(25);

            let event = Event::new(
                TaskRef::new(|_| {
                    // the clock reads the event's time while it executes
                    assert_eq!(
                        Worker::current_time().unwrap(),
                        EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(25)
                    );
                }),
                time,
                &host,
                host.id(),
            );

            Worker::set_active_host(host);
            Worker::run_event(event);
            let host = Worker::take_active_host();
            drop(host);

            // outside of an event the current time is unset, and the event
            // time became the last-event time
            assert_eq!(Worker::current_time(), None);
            assert_eq!(Worker::last_event_time(), Some(time));
        });
    }

    #[test]
    fn test_resolution_and_config_reads() {
        let _guard = lock_global_state();
        let shared = test_shared(0.25, SimulationTime::from_millis(5));

        run_with_worker(shared, || {
            let address = Worker::resolve_ip_to_address(HOST_A_IP).unwrap();
            assert_eq!(address.name(), "hosta");
            assert_eq!(address.id(), HostId::from(0));

            let address = Worker::resolve_name_to_address("hostb").unwrap();
            assert_eq!(address.addr(), HOST_B_IP);

            assert!(Worker::resolve_name_to_address("nosuchhost").is_none());

            assert_eq!(
                Worker::latency(IpAddr::V4(HOST_A_IP), IpAddr::V4(HOST_B_IP)),
                Some(SimulationTime::from_millis(5))
            );
            assert!(Worker::is_routable(
                IpAddr::V4(HOST_A_IP),
                IpAddr::V4(HOST_B_IP)
            ));
            assert!(!Worker::is_routable(
                IpAddr::V4(HOST_A_IP),
                IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))
            ));

            assert_eq!(
                Worker::bandwidth_up_bytes(IpAddr::V4(HOST_A_IP)),
                Some(1_000_000)
            );
            assert_eq!(
                Worker::bandwidth_down_bytes(IpAddr::V4(HOST_A_IP)),
                Some(2_000_000)
            );
            assert_eq!(Worker::bandwidth_up_bytes(IpAddr::V4(HOST_B_IP)), None);
        });
    }

    #[test]
    fn test_worker_identity() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        assert!(!Worker::is_alive());
        assert!(Worker::thread_id().is_none());

        run_with_worker(shared, || {
            assert!(Worker::is_alive());
            assert_eq!(Worker::thread_id().unwrap().0, 0);
        });
    }

    #[test]
    fn test_counter_fallback_without_worker() {
        let _guard = lock_global_state();

        enable_object_counters();

        // no live worker on this thread, so the increments land in the
        // process-wide counters
        let alloc_before = with_global_object_counters(|alloc, _| alloc.get_value("FallbackWidget"));
        Worker::increment_object_alloc_counter("FallbackWidget");
        Worker::increment_object_alloc_counter("FallbackWidget");
        Worker::increment_object_dealloc_counter("FallbackWidget");
        let (alloc_after, dealloc_after) = with_global_object_counters(|alloc, dealloc| {
            (
                alloc.get_value("FallbackWidget"),
                dealloc.get_value("FallbackWidget"),
            )
        });
        assert_eq!(alloc_after - alloc_before, 2);
        assert!(dealloc_after >= 1);

        let mut syscalls = Counter::new();
        syscalls.add_value("read", 3);
        let before = with_global_syscall_counter(|c| c.get_value("read"));
        Worker::add_syscall_counts(&syscalls);
        let after = with_global_syscall_counter(|c| c.get_value("read"));
        assert_eq!(after - before, 3);
    }

    #[test]
    fn test_worker_counters_hand_off_to_globals() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        enable_object_counters();

        let alloc_before = with_global_object_counters(|alloc, _| alloc.get_value("HandOffWidget"));
        let syscall_before = with_global_syscall_counter(|c| c.get_value("close"));

        run_with_worker(shared, || {
            Worker::increment_object_alloc_counter("HandOffWidget");

            let mut syscalls = Counter::new();
            syscalls.add_one("close");
            Worker::add_syscall_counts(&syscalls);

            // nothing reaches the globals until the worker hands its counters off
            assert_eq!(
                with_global_object_counters(|alloc, _| alloc.get_value("HandOffWidget")),
                alloc_before
            );

            Worker::finish_hosts(vec![test_host(0, HOST_A_IP)]);
        });

        let alloc_after = with_global_object_counters(|alloc, _| alloc.get_value("HandOffWidget"));
        let syscall_after = with_global_syscall_counter(|c| c.get_value("close"));
        assert_eq!(alloc_after - alloc_before, 1);
        assert_eq!(syscall_after - syscall_before, 1);
    }

    #[test]
    fn test_plugin_error_count() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        run_with_worker(shared, || {
            Worker::increment_plugin_error_count();
            Worker::increment_plugin_error_count();
            assert_eq!(
                Worker::with(|w| w.shared.plugin_error_count()).unwrap(),
                2
            );
        });
    }

    #[test]
    fn test_is_filtered_uses_host_log_level() {
        let _guard = lock_global_state();
        let shared = test_shared(0.0, SimulationTime::from_millis(5));

        run_with_worker(shared, || {
            // no active host; nothing is filtered
            assert!(!Worker::is_filtered(log::Level::Trace));

            let params = crate::host::HostParameters {
                id: HostId::from(0),
                name: "quiet".into(),
                seed: 0,
                log_level: Some(log::LevelFilter::Warn),
            };
            let host = Box::new(Host::new(params, HOST_A_IP));

            Worker::set_active_host(host);
            assert!(!Worker::is_filtered(log::Level::Warn));
            assert!(Worker::is_filtered(log::Level::Debug));
            drop(Worker::take_active_host());
        });
    }
}
