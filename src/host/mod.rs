use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::network::router::Router;
use crate::utility::perf_timer::PerfTimer;
use crate::utility::ObjectCounter;

/// Identifier of a simulated host, unique within a simulation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(u32);

impl From<u32> for HostId {
    fn from(i: u32) -> Self {
        HostId(i)
    }
}

impl From<HostId> for u32 {
    fn from(id: HostId) -> Self {
        id.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for constructing a host.
#[derive(Debug, Clone)]
pub struct HostParameters {
    pub id: HostId,
    pub name: String,
    /// Seed for the host's deterministic random source.
    pub seed: u64,
    pub log_level: Option<log::LevelFilter>,
}

/// Immutable information about the host, cheap to clone out of the host for
/// code that can't hold a host reference (e.g. log filters).
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub id: HostId,
    pub name: String,
    pub default_ip: IpAddr,
    pub log_level: Option<log::LevelFilter>,
}

/// An application configured to run on a host. Applications are owned by the
/// host and torn down before the host shuts down.
#[derive(Debug)]
pub struct Application {
    name: String,
    _counter: ObjectCounter,
}

impl Application {
    pub fn new(name: String) -> Self {
        Self {
            name,
            _counter: ObjectCounter::new("Application"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A simulated host. A host is only ever run by one worker at a time, but
/// moves between workers across rounds, so its mutable state sits behind
/// interior mutability and the host as a whole is `Send`.
#[derive(Debug)]
pub struct Host {
    info: Arc<HostInfo>,

    /// Deterministic source of randomness for this host.
    random: AtomicRefCell<Xoshiro256PlusPlus>,

    /// Tracks wall-clock time spent executing this host's events.
    execution_timer: AtomicRefCell<PerfTimer>,

    /// The router that delivers inbound packets to this host.
    router: Router,

    /// Whether the router holds packets this host hasn't seen yet.
    packets_pending: AtomicBool,

    /// Monotonic source of event ids, used to break event ordering ties
    /// deterministically.
    event_id_counter: AtomicU64,

    applications: AtomicRefCell<Vec<Application>>,

    _counter: ObjectCounter,
}

/// Host must be `Send`.
impl crate::utility::IsSend for Host {}

impl Host {
    pub fn new(params: HostParameters, default_ip: Ipv4Addr) -> Self {
        Self {
            info: Arc::new(HostInfo {
                id: params.id,
                name: params.name,
                default_ip: IpAddr::V4(default_ip),
                log_level: params.log_level,
            }),
            random: AtomicRefCell::new(Xoshiro256PlusPlus::seed_from_u64(params.seed)),
            execution_timer: AtomicRefCell::new(PerfTimer::new_stopped()),
            router: Router::new(),
            packets_pending: AtomicBool::new(false),
            event_id_counter: AtomicU64::new(0),
            applications: AtomicRefCell::new(Vec::new()),
            _counter: ObjectCounter::new("Host"),
        }
    }

    pub fn id(&self) -> HostId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn default_ip(&self) -> IpAddr {
        self.info.default_ip
    }

    pub fn log_level(&self) -> Option<log::LevelFilter> {
        self.info.log_level
    }

    /// Information about the host as an `Arc` for cheap cloning into code
    /// that outlives the host borrow.
    pub fn info(&self) -> &Arc<HostInfo> {
        &self.info
    }

    /// Run `f` with this host's random source. Randomness is deterministic
    /// per-host so that simulations are reproducible.
    pub fn with_random_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Xoshiro256PlusPlus) -> R,
    {
        f(&mut self.random.borrow_mut())
    }

    pub fn get_new_event_id(&self) -> u64 {
        self.event_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Resume counting wall-clock execution time against this host.
    pub fn continue_execution_timer(&self) {
        self.execution_timer.borrow_mut().start();
    }

    /// Pause counting wall-clock execution time against this host.
    pub fn stop_execution_timer(&self) {
        self.execution_timer.borrow_mut().stop();
    }

    /// Total wall-clock time spent executing this host.
    pub fn execution_time(&self) -> std::time::Duration {
        self.execution_timer.borrow().elapsed()
    }

    pub fn add_application(&self, name: String) {
        self.applications.borrow_mut().push(Application::new(name));
    }

    pub fn boot(&self) {
        log::debug!(
            "Booting host '{}' with {} application(s)",
            self.name(),
            self.applications.borrow().len()
        );
    }

    pub fn shutdown(&self) {
        debug_assert!(self.applications.borrow().is_empty());
        log::debug!("Host '{}' has been shut down", self.name());
    }

    pub fn free_all_applications(&self) {
        let mut applications = self.applications.borrow_mut();
        for application in applications.iter() {
            log::debug!(
                "Stopping application '{}' on host '{}'",
                application.name(),
                self.name()
            );
        }
        applications.clear();
    }

    pub fn upstream_router(&self) -> &Router {
        &self.router
    }

    /// Called when this host's router becomes non-empty.
    pub fn packets_are_available_to_receive(&self) {
        self.packets_pending.store(true, Ordering::Relaxed);
    }

    pub fn has_packets_to_receive(&self) -> bool {
        self.packets_pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn test_host(seed: u64) -> Host {
        Host::new(
            HostParameters {
                id: HostId::from(0),
                name: "testhost".into(),
                seed,
                log_level: None,
            },
            Ipv4Addr::new(11, 0, 0, 1),
        )
    }

    #[test]
    fn test_deterministic_random() {
        let a = test_host(1234);
        let b = test_host(1234);
        let c = test_host(99);

        let draw_a: f64 = a.with_random_mut(|r| r.gen());
        let draw_b: f64 = b.with_random_mut(|r| r.gen());
        let draw_c: f64 = c.with_random_mut(|r| r.gen());

        assert_eq!(draw_a, draw_b);
        assert_ne!(draw_a, draw_c);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let host = test_host(0);
        let a = host.get_new_event_id();
        let b = host.get_new_event_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_applications_freed_before_shutdown() {
        let host = test_host(0);
        host.add_application("webserver".into());
        host.add_application("client".into());
        host.boot();
        host.free_all_applications();
        host.shutdown();
    }
}
