use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::bail;

use crate::host::HostId;

/// A name/address record for a simulated host. This is what address
/// resolution hands back to callers.
#[derive(Debug)]
pub struct Address {
    id: HostId,
    addr: Ipv4Addr,
    name: String,
}

impl Address {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
struct Database {
    name_index: HashMap<String, Arc<Address>>,
    addr_index: HashMap<Ipv4Addr, Arc<Address>>,
}

/// Builds the simulation's address registry before any worker runs.
#[derive(Debug)]
pub struct DnsBuilder {
    db: Database,
}

impl DnsBuilder {
    pub fn new() -> Self {
        Self {
            db: Database {
                name_index: HashMap::new(),
                addr_index: HashMap::new(),
            },
        }
    }

    /// Register a host under the given address and name. Loopback and
    /// unspecified addresses are not registrable.
    pub fn register(&mut self, id: HostId, addr: Ipv4Addr, name: String) -> anyhow::Result<()> {
        if addr.is_loopback() || addr.is_unspecified() {
            bail!("address {addr} is not routable");
        }
        if self.db.addr_index.contains_key(&addr) {
            bail!("address {addr} is already registered");
        }
        if self.db.name_index.contains_key(&name) {
            bail!("name {name} is already registered");
        }

        let record = Arc::new(Address {
            id,
            addr,
            name: name.clone(),
        });
        self.db.name_index.insert(name, record.clone());
        self.db.addr_index.insert(addr, record);
        Ok(())
    }

    pub fn into_dns(self) -> Dns {
        Dns { db: self.db }
    }
}

impl Default for DnsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The simulation's address registry. Immutable once built, so lookups from
/// worker threads need no locking.
#[derive(Debug)]
pub struct Dns {
    db: Database,
}

impl Dns {
    pub fn addr_to_address(&self, addr: Ipv4Addr) -> Option<Arc<Address>> {
        self.db.addr_index.get(&addr).cloned()
    }

    pub fn name_to_address(&self, name: &str) -> Option<Arc<Address>> {
        self.db.name_index.get(name).cloned()
    }

    pub fn addr_to_host_id(&self, addr: Ipv4Addr) -> Option<HostId> {
        self.db.addr_index.get(&addr).map(|record| record.id)
    }

    pub fn name_to_addr(&self, name: &str) -> Option<Ipv4Addr> {
        self.db.name_index.get(name).map(|record| record.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_a() -> (HostId, Ipv4Addr, String) {
        let id = HostId::from(0);
        let addr = Ipv4Addr::new(100, 1, 2, 3);
        let name = String::from("myhost");
        (id, addr, name)
    }

    fn host_b() -> (HostId, Ipv4Addr, String) {
        let id = HostId::from(1);
        let addr = Ipv4Addr::new(200, 3, 2, 1);
        let name = String::from("theirhost");
        (id, addr, name)
    }

    #[test]
    fn lookups() {
        let (id_a, addr_a, name_a) = host_a();
        let (id_b, addr_b, name_b) = host_b();

        let mut builder = DnsBuilder::new();
        builder.register(id_a, addr_a, name_a.clone()).unwrap();
        builder.register(id_b, addr_b, name_b.clone()).unwrap();
        let dns = builder.into_dns();

        assert_eq!(dns.addr_to_host_id(addr_a), Some(id_a));
        assert_eq!(dns.addr_to_host_id(addr_b), Some(id_b));
        assert_eq!(dns.addr_to_host_id(Ipv4Addr::new(1, 2, 3, 4)), None);

        assert_eq!(dns.name_to_addr(&name_a), Some(addr_a));
        assert_eq!(dns.name_to_addr(&name_b), Some(addr_b));
        assert_eq!(dns.name_to_addr("empty"), None);

        let record = dns.addr_to_address(addr_a).unwrap();
        assert_eq!(record.id(), id_a);
        assert_eq!(record.name(), name_a);
        assert_eq!(dns.name_to_address(&name_b).unwrap().addr(), addr_b);
    }

    #[test]
    fn rejects_bad_registrations() {
        let (id_a, addr_a, name_a) = host_a();

        let mut builder = DnsBuilder::new();
        builder.register(id_a, addr_a, name_a.clone()).unwrap();

        // duplicate address
        assert!(builder
            .register(HostId::from(9), addr_a, "other".into())
            .is_err());
        // duplicate name
        assert!(builder
            .register(HostId::from(9), Ipv4Addr::new(100, 1, 2, 4), name_a)
            .is_err());
        // loopback and unspecified addresses
        assert!(builder
            .register(HostId::from(9), Ipv4Addr::LOCALHOST, "lo".into())
            .is_err());
        assert!(builder
            .register(HostId::from(9), Ipv4Addr::UNSPECIFIED, "zero".into())
            .is_err());
    }
}
