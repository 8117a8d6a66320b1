use std::net::SocketAddrV4;

use atomic_refcell::AtomicRefCell;

use crate::utility::ObjectCounter;

bitflags::bitflags! {
    /// Delivery milestones a packet passes through. Flags accumulate over the
    /// packet's lifetime and are never cleared, so the full history stays
    /// inspectable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketStatus: u32 {
        /// The packet was created by a host.
        const CREATED = 1 << 0;
        /// The packet was handed to the network and scheduled for delivery.
        const INET_SENT = 1 << 1;
        /// The network dropped the packet due to path unreliability.
        const INET_DROPPED = 1 << 2;
        /// The packet arrived at the destination's upstream router.
        const ROUTER_ENQUEUED = 1 << 3;
        /// The destination host took the packet from its router.
        const ROUTER_DEQUEUED = 1 << 4;
    }
}

/// A simulated network packet. Shared between the source and destination
/// timelines through an [`std::sync::Arc`], so status updates go through
/// interior mutability.
#[derive(Debug)]
pub struct Packet {
    src: SocketAddrV4,
    dst: SocketAddrV4,
    payload: Vec<u8>,
    status: AtomicRefCell<PacketStatus>,
    _counter: ObjectCounter,
}

impl Packet {
    pub fn new(src: SocketAddrV4, dst: SocketAddrV4, payload: Vec<u8>) -> Self {
        Self {
            src,
            dst,
            payload,
            status: AtomicRefCell::new(PacketStatus::CREATED),
            _counter: ObjectCounter::new("Packet"),
        }
    }

    pub fn src(&self) -> SocketAddrV4 {
        self.src
    }

    pub fn dst(&self) -> SocketAddrV4 {
        self.dst
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Zero-length packets are control packets (acks, pure headers). They
    /// bypass the reliability drop check so that congestion control can react
    /// to loss.
    pub fn is_control(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn add_status(&self, status: PacketStatus) {
        *self.status.borrow_mut() |= status;
    }

    pub fn has_status(&self, status: PacketStatus) -> bool {
        self.status.borrow().contains(status)
    }

    pub fn status(&self) -> PacketStatus {
        *self.status.borrow()
    }
}
