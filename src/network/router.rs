use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::network::packet::{Packet, PacketStatus};

/// The upstream router of a host. Packets sent to the host are delivered here
/// first; the host drains the queue when it's told packets are available.
///
/// The queue is shared between the destination host and whichever worker
/// executes the delivery event, so it's guarded by a mutex.
#[derive(Debug, Default)]
pub struct Router {
    inbound: Mutex<VecDeque<Arc<Packet>>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue an incoming packet. Returns true if the queue was empty before,
    /// in which case the host should be notified that packets are available.
    pub fn enqueue(&self, packet: Arc<Packet>) -> bool {
        packet.add_status(PacketStatus::ROUTER_ENQUEUED);
        let mut inbound = self.inbound.lock().unwrap();
        inbound.push_back(packet);
        inbound.len() == 1
    }

    /// Take the next queued packet.
    pub fn dequeue(&self) -> Option<Arc<Packet>> {
        let packet = self.inbound.lock().unwrap().pop_front();
        if let Some(ref packet) = packet {
            packet.add_status(PacketStatus::ROUTER_DEQUEUED);
        }
        packet
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.lock().unwrap().is_empty()
    }
}
