use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// Network characteristics for a path between two nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProperties {
    /// Latency in nanoseconds.
    pub latency_ns: u64,
    /// Packet loss as a fraction.
    pub packet_loss: f32,
}

impl PartialOrd for PathProperties {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // order by lowest latency first, then by lowest packet loss
        match self.latency_ns.cmp(&other.latency_ns) {
            std::cmp::Ordering::Equal => self.packet_loss.partial_cmp(&other.packet_loss),
            x => Some(x),
        }
    }
}

impl PartialEq for PathProperties {
    fn eq(&self, other: &Self) -> bool {
        // PartialEq must be consistent with PartialOrd
        self.partial_cmp(other) == Some(std::cmp::Ordering::Equal)
    }
}

impl core::ops::Add for PathProperties {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self {
            latency_ns: self.latency_ns + other.latency_ns,
            packet_loss: 1f32 - (1f32 - self.packet_loss) * (1f32 - other.packet_loss),
        }
    }
}

#[derive(Debug)]
pub struct IpPreviouslyAssignedError;

impl std::error::Error for IpPreviouslyAssignedError {}

impl std::fmt::Display for IpPreviouslyAssignedError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IP address has already been assigned")
    }
}

/// Tool for assigning IP addresses to network nodes.
#[derive(Debug)]
pub struct IpAssignment<T: Copy + Eq + Hash + std::fmt::Display> {
    /// A map of host IP addresses to node ids.
    map: HashMap<std::net::IpAddr, T>,
    /// The last dynamically assigned address.
    last_assigned_addr: std::net::IpAddr,
}

impl<T: Copy + Eq + Hash + std::fmt::Display> IpAssignment<T> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            last_assigned_addr: std::net::IpAddr::V4(std::net::Ipv4Addr::new(11, 0, 0, 0)),
        }
    }

    /// Get an unused address and assign it to a node.
    pub fn assign(&mut self, node_id: T) -> std::net::IpAddr {
        // loop until we find an unused address
        loop {
            let ip_addr = Self::increment_address(&self.last_assigned_addr);
            self.last_assigned_addr = ip_addr;
            if let Entry::Vacant(e) = self.map.entry(ip_addr) {
                e.insert(node_id);
                break ip_addr;
            }
        }
    }

    /// Assign a specific address to a node.
    pub fn assign_ip(
        &mut self,
        node_id: T,
        ip_addr: std::net::IpAddr,
    ) -> Result<(), IpPreviouslyAssignedError> {
        let entry = self.map.entry(ip_addr);
        if let Entry::Occupied(_) = &entry {
            return Err(IpPreviouslyAssignedError);
        }
        entry.or_insert(node_id);
        Ok(())
    }

    /// Get the node that an address is assigned to.
    pub fn get_node(&self, ip_addr: std::net::IpAddr) -> Option<T> {
        self.map.get(&ip_addr).copied()
    }

    /// Get all nodes with assigned addresses.
    pub fn get_nodes(&self) -> std::collections::HashSet<T> {
        self.map.values().copied().collect()
    }

    fn increment_address(addr: &std::net::IpAddr) -> std::net::IpAddr {
        match addr {
            std::net::IpAddr::V4(x) => {
                let addr_bits = u32::from(*x);
                let mut increment = 1;
                loop {
                    // if the address ends in ".0" or ".255" (broadcast), try the next
                    let next_addr = std::net::Ipv4Addr::from(addr_bits + increment);
                    match next_addr.octets()[3] {
                        0 | 255 => increment += 1,
                        _ => break std::net::IpAddr::V4(next_addr),
                    }
                }
            }
            std::net::IpAddr::V6(_) => unimplemented!(),
        }
    }
}

impl<T: Copy + Eq + Hash + std::fmt::Display> Default for IpAssignment<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing information for paths between nodes.
#[derive(Debug)]
pub struct RoutingInfo<T: Eq + Hash + std::fmt::Display + Clone + Copy> {
    paths: HashMap<(T, T), PathProperties>,
    packet_counters: std::sync::RwLock<HashMap<(T, T), u64>>,
}

impl<T: Eq + Hash + std::fmt::Display + Clone + Copy> RoutingInfo<T> {
    pub fn new(paths: HashMap<(T, T), PathProperties>) -> Self {
        Self {
            paths,
            packet_counters: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Get properties for the path from one node to another.
    pub fn path(&self, start: T, end: T) -> Option<PathProperties> {
        self.paths.get(&(start, end)).copied()
    }

    /// Increment the number of packets sent from one node to another.
    pub fn increment_packet_count(&self, start: T, end: T) {
        let key = (start, end);
        let mut packet_counters = self.packet_counters.write().unwrap();
        match packet_counters.get_mut(&key) {
            Some(x) => *x = x.saturating_add(1),
            None => assert!(packet_counters.insert(key, 1).is_none()),
        }
    }

    /// The number of packets sent from one node to another.
    pub fn packet_count(&self, start: T, end: T) -> u64 {
        self.packet_counters
            .read()
            .unwrap()
            .get(&(start, end))
            .copied()
            .unwrap_or(0)
    }

    /// Log the number of packets sent between nodes. Only logs paths that have
    /// transmitted at least one packet.
    pub fn log_packet_counts(&self) {
        for ((start, end), count) in self.packet_counters.read().unwrap().iter() {
            let path = self.paths.get(&(*start, *end)).unwrap();
            log::debug!(
                "Found path {}->{}: latency={}ns, packet_loss={}, packet_count={}",
                start,
                end,
                path.latency_ns,
                path.packet_loss,
                count,
            );
        }
    }

    /// The smallest latency of any path in the simulation.
    pub fn get_smallest_latency_ns(&self) -> Option<u64> {
        self.paths.values().map(|x| x.latency_ns).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_assignment_skips_reserved_octets() {
        let mut assignment: IpAssignment<u32> = IpAssignment::new();

        // exhaust the first /24 so the increment crosses the ".0"/".255" gap
        let mut last = None;
        for i in 0..260 {
            last = Some(assignment.assign(i));
        }

        let last = match last.unwrap() {
            std::net::IpAddr::V4(x) => x,
            _ => unreachable!(),
        };
        assert_ne!(last.octets()[3], 0);
        assert_ne!(last.octets()[3], 255);
        assert_eq!(assignment.get_nodes().len(), 260);
    }

    #[test]
    fn test_ip_assignment_lookup() {
        let mut assignment: IpAssignment<u32> = IpAssignment::new();
        let addr = assignment.assign(42);
        assert_eq!(assignment.get_node(addr), Some(42));
        assert_eq!(
            assignment.get_node("9.9.9.9".parse().unwrap()),
            None
        );

        let fixed: std::net::IpAddr = "100.1.2.3".parse().unwrap();
        assignment.assign_ip(7, fixed).unwrap();
        assert_eq!(assignment.get_node(fixed), Some(7));
        assert!(assignment.assign_ip(8, fixed).is_err());
    }

    #[test]
    fn test_routing_info_paths_and_counts() {
        let mut paths = HashMap::new();
        paths.insert(
            (0u32, 1u32),
            PathProperties {
                latency_ns: 5_000_000,
                packet_loss: 0.25,
            },
        );
        paths.insert(
            (1u32, 0u32),
            PathProperties {
                latency_ns: 10_000_000,
                packet_loss: 0.0,
            },
        );
        let routing = RoutingInfo::new(paths);

        assert_eq!(routing.path(0, 1).unwrap().latency_ns, 5_000_000);
        assert_eq!(routing.path(1, 2), None);
        assert_eq!(routing.get_smallest_latency_ns(), Some(5_000_000));

        assert_eq!(routing.packet_count(0, 1), 0);
        routing.increment_packet_count(0, 1);
        routing.increment_packet_count(0, 1);
        assert_eq!(routing.packet_count(0, 1), 2);
        assert_eq!(routing.packet_count(1, 0), 0);
    }

    #[test]
    fn test_path_properties_ordering() {
        let fast = PathProperties {
            latency_ns: 1,
            packet_loss: 0.5,
        };
        let slow = PathProperties {
            latency_ns: 2,
            packet_loss: 0.0,
        };
        assert!(fast < slow);

        let combined = fast + slow;
        assert_eq!(combined.latency_ns, 3);
        assert!((combined.packet_loss - 0.5).abs() < f32::EPSILON);
    }
}
