use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use crossbeam::queue::ArrayQueue;

use crate::core::configuration::ConfigOptions;
use crate::core::runahead::Runahead;
use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;
use crate::core::work::event_queue::EventQueue;
use crate::core::worker::{self, Bandwidth, Worker, WorkerShared, WorkerThreadID, WORKER_SHARED};
use crate::core::worker_pool::WorkerPool;
use crate::host::{Host, HostId, HostParameters};
use crate::network::dns::DnsBuilder;
use crate::network::graph::{IpAssignment, PathProperties, RoutingInfo};

/// Per-host configuration the manager turns into a simulated host.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub name: String,
    pub bandwidth_up_bytes: u64,
    pub bandwidth_down_bytes: u64,
    pub log_level: Option<log::LevelFilter>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            bandwidth_up_bytes: 1_000_000,
            bandwidth_down_bytes: 1_000_000,
            log_level: None,
        }
    }
}

/// What happened during a finished simulation.
#[derive(Debug)]
pub struct SimulationSummary {
    /// Number of scheduling rounds that executed events.
    pub rounds: u64,
    /// Packets that reached their destination host's router.
    pub packets_received: u64,
    /// Plugins that exited with a non-zero code.
    pub plugin_errors: u32,
}

/// Owns the cross-worker collaborators and drives the simulation: it builds
/// the network and the hosts, installs the state workers read, runs the
/// scheduling rounds on a worker pool, and aggregates the counters at the
/// end.
pub struct Manager {
    config: ConfigOptions,
}

impl Manager {
    pub fn new(config: ConfigOptions) -> Self {
        Self { config }
    }

    /// Run a simulation to completion. Hosts are connected pairwise with the
    /// given path properties. `setup` runs once per host on a worker thread
    /// during the boot round; it's where initial tasks are scheduled.
    pub fn run(
        &self,
        host_options: &[HostOptions],
        path: PathProperties,
        setup: impl Fn(&Host) + Send + Sync,
    ) -> anyhow::Result<SimulationSummary> {
        assert!(path.latency_ns > 0, "paths must have a non-zero latency");

        if self.config.use_object_counters {
            worker::enable_object_counters();
        }

        let bootstrap_end_time = EmulatedTime::SIMULATION_START
            + SimulationTime::from_secs(self.config.bootstrap_end_time);
        let sim_end_time =
            EmulatedTime::SIMULATION_START + SimulationTime::from_secs(self.config.stop_time);

        let mut dns = DnsBuilder::new();
        let mut ip_assignment = IpAssignment::new();
        let mut host_bandwidths = HashMap::new();
        let mut event_queues = HashMap::new();
        let mut hosts = Vec::new();

        for (i, options) in host_options.iter().enumerate() {
            let node_id = u32::try_from(i).unwrap();
            let host_id = HostId::from(node_id);

            let addr = match ip_assignment.assign(node_id) {
                IpAddr::V4(addr) => addr,
                _ => unreachable!(),
            };

            dns.register(host_id, addr, options.name.clone())
                .with_context(|| format!("Failed to register host '{}'", options.name))?;

            host_bandwidths.insert(
                IpAddr::V4(addr),
                Bandwidth {
                    up_bytes: options.bandwidth_up_bytes,
                    down_bytes: options.bandwidth_down_bytes,
                },
            );

            event_queues.insert(host_id, Arc::new(Mutex::new(EventQueue::new())));

            hosts.push(Box::new(Host::new(
                HostParameters {
                    id: host_id,
                    name: options.name.clone(),
                    seed: self.config.seed.wrapping_add(u64::from(node_id)),
                    log_level: options.log_level,
                },
                addr,
            )));
        }

        // a homogeneous full mesh between the hosts
        let num_nodes = u32::try_from(host_options.len()).unwrap();
        let mut paths = HashMap::new();
        for src in 0..num_nodes {
            for dst in 0..num_nodes {
                paths.insert((src, dst), path);
            }
        }
        let routing_info = RoutingInfo::new(paths);

        let min_possible_latency = routing_info
            .get_smallest_latency_ns()
            .map(SimulationTime::from_nanos)
            .unwrap_or(SimulationTime::MILLISECOND);
        let runahead = Runahead::new(
            self.config.use_dynamic_runahead,
            min_possible_latency,
            None,
        );

        let shared = WorkerShared::new(
            ip_assignment,
            routing_info,
            host_bandwidths,
            dns.into_dns(),
            runahead,
            event_queues,
            bootstrap_end_time,
            sim_end_time,
        );

        assert!(
            WORKER_SHARED.borrow_mut().replace(shared).is_none(),
            "Another simulation is already running"
        );

        let summary = self.run_simulation(hosts, sim_end_time, &setup);

        // publish final per-path packet counts and the aggregated counters
        let shared = WORKER_SHARED.borrow_mut().take().unwrap();
        shared.routing_info.log_packet_counts();
        worker::with_global_object_counters(|alloc, dealloc| {
            log::debug!("Simulation allocated objects: {alloc}");
            log::debug!("Simulation deallocated objects: {dealloc}");
        });
        worker::with_global_syscall_counter(|syscalls| {
            log::debug!("Simulation syscall counts: {syscalls}");
        });

        Ok(SimulationSummary {
            plugin_errors: shared.plugin_error_count(),
            ..summary
        })
    }

    fn run_simulation(
        &self,
        hosts: Vec<Box<Host>>,
        sim_end_time: EmulatedTime,
        setup: &(impl Fn(&Host) + Send + Sync),
    ) -> SimulationSummary {
        let cpu_ids = worker_cpu_ids(self.config.num_processors());
        let mut pool = WorkerPool::new(&cpu_ids, self.config.workers.get(), "simnet-worker");

        // bring up the per-thread worker contexts before any simulation work
        {
            let min_event_times = Arc::clone(pool.min_event_times());
            pool.scope(|s| {
                s.run(|t| {
                    Worker::new_for_this_thread(
                        WorkerThreadID(u32::try_from(t.thread_idx).unwrap()),
                        Arc::clone(&min_event_times),
                    );
                });
            });
        }

        // boot round: boot every host and let `setup` seed its initial events
        let start = EmulatedTime::SIMULATION_START;
        let mut hosts = run_host_round(&mut pool, hosts, move |host| {
            Worker::set_round_end_time(start);
            Worker::set_current_time(start);

            let host = Worker::boot_hosts(std::iter::once(host)).pop().unwrap();

            Worker::set_active_host(host);
            Worker::with_active_host(|host| setup(host)).unwrap();
            let host = Worker::take_active_host();

            Worker::clear_current_time();
            host
        });

        let mut rounds = 0u64;

        loop {
            // the next round starts at the earliest event anywhere: either
            // still queued, or reported by a worker during the last round
            // (e.g. a packet sent after its destination was already scanned)
            let queued = {
                let shared = WORKER_SHARED.borrow();
                shared.as_ref().unwrap().next_queued_event_time()
            };
            let reported = pool.take_global_min_event_time();
            let reported =
                (reported != SimulationTime::MAX).then(|| EmulatedTime::from_abs_simtime(reported));

            let Some(next_event_time) = [queued, reported].into_iter().flatten().min() else {
                break;
            };
            if next_event_time >= sim_end_time {
                break;
            }

            let runahead = {
                let shared = WORKER_SHARED.borrow();
                shared.as_ref().unwrap().get_runahead()
            };
            let round_end =
                std::cmp::min(next_event_time.saturating_add(runahead), sim_end_time);

            log::trace!(
                "Running round {rounds} with window [{}, {}) ns",
                next_event_time.to_abs_simtime().as_nanos(),
                round_end.to_abs_simtime().as_nanos()
            );

            hosts = run_host_round(&mut pool, hosts, move |host| {
                Worker::set_round_end_time(round_end);

                let host_id = host.id();
                Worker::set_active_host(host);
                while let Some(event) = Worker::next_event_for_host(host_id) {
                    Worker::run_event(event);
                }
                Worker::take_active_host()
            });

            rounds += 1;
        }

        // no more events will be accepted
        {
            let shared = WORKER_SHARED.borrow();
            shared.as_ref().unwrap().stop_scheduler();
        }

        // finish round: drain leftover deliveries, tear the hosts down, and
        // hand the per-worker counters to the process-wide aggregates
        let packets_received = AtomicU64::new(0);
        let num_hosts = hosts.len();
        let unprocessed = ArrayQueue::new(num_hosts.max(1));
        for host in hosts {
            unprocessed.push(host).unwrap();
        }

        pool.scope(|s| {
            s.run(|_| {
                let mut my_hosts = Vec::new();
                while let Some(host) = unprocessed.pop() {
                    while host.upstream_router().dequeue().is_some() {
                        packets_received.fetch_add(1, Ordering::Relaxed);
                    }
                    my_hosts.push(host);
                }
                Worker::finish_hosts(my_hosts);
            });
        });

        pool.join();

        SimulationSummary {
            rounds,
            packets_received: packets_received.load(Ordering::Relaxed),
            plugin_errors: 0,
        }
    }
}

/// Run `f` once for every host, with the hosts distributed over the pool's
/// workers on demand.
fn run_host_round(
    pool: &mut WorkerPool,
    hosts: Vec<Box<Host>>,
    f: impl Fn(Box<Host>) -> Box<Host> + Send + Sync,
) -> Vec<Box<Host>> {
    let num_hosts = hosts.len();
    let unprocessed = ArrayQueue::new(num_hosts.max(1));
    for host in hosts {
        unprocessed.push(host).unwrap();
    }
    let processed = ArrayQueue::new(num_hosts.max(1));

    pool.scope(|s| {
        s.run(|_| {
            while let Some(host) = unprocessed.pop() {
                processed.push(f(host)).unwrap();
            }
        });
    });

    std::iter::from_fn(|| processed.pop()).collect()
}

/// One OS processor per logical processor, cycling over the processors this
/// process is allowed to run on. Falls back to no pinning if the affinity
/// mask can't be read.
fn worker_cpu_ids(num_processors: usize) -> Vec<Option<u32>> {
    let available = available_cpus();
    if available.is_empty() {
        return vec![None; num_processors];
    }

    available
        .iter()
        .copied()
        .map(Some)
        .cycle()
        .take(num_processors)
        .collect()
}

fn available_cpus() -> Vec<u32> {
    let Ok(cpu_set) = nix::sched::sched_getaffinity(nix::unistd::Pid::from_raw(0)) else {
        return Vec::new();
    };

    (0..nix::sched::CpuSet::count())
        .filter(|i| cpu_set.is_set(*i).unwrap_or(false))
        .map(|i| u32::try_from(i).unwrap())
        .collect()
}
