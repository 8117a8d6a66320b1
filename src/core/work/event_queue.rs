use std::cmp::Reverse;
use std::collections::binary_heap::BinaryHeap;

use crate::core::support::emulated_time::EmulatedTime;

use super::event::Event;

/// A queue of [`Event`]s ordered by their times.
#[derive(Debug)]
pub struct EventQueue {
    queue: BinaryHeap<Reverse<PanickingOrd<Event>>>,
    last_popped_event_time: EmulatedTime,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            last_popped_event_time: EmulatedTime::SIMULATION_START,
        }
    }

    /// Push a new [`Event`] on to the queue.
    ///
    /// Panics if two events are pushed that have no relative order
    /// (`event_a.partial_cmp(&event_b) == None`), or if the event time is
    /// earlier than the last popped event time (time moves backward).
    pub fn push(&mut self, event: Event) {
        // make sure time never moves backward
        assert!(event.time() >= self.last_popped_event_time);

        self.queue.push(Reverse(event.into()));
    }

    /// Pop the earliest [`Event`] from the queue.
    pub fn pop(&mut self) -> Option<Event> {
        let event = self.queue.pop().map(|x| x.0.into_inner());

        // make sure time never moves backward
        if let Some(ref event) = event {
            assert!(event.time() >= self.last_popped_event_time);
            self.last_popped_event_time = event.time();
        }

        event
    }

    /// The time of the next [`Event`] (the earliest event in the queue).
    pub fn next_event_time(&self) -> Option<EmulatedTime> {
        self.queue.peek().map(|x| x.0.time())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A wrapper type that implements [`Ord`] for types that implement
/// [`PartialOrd`]. If two objects cannot be compared
/// (`PartialOrd::partial_cmp` returns `None`), the comparison panics.
#[derive(Debug, PartialEq, Eq)]
struct PanickingOrd<T: PartialOrd + Eq>(T);

impl<T: PartialOrd + Eq> PanickingOrd<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: PartialOrd + Eq> std::convert::From<T> for PanickingOrd<T> {
    fn from(x: T) -> Self {
        PanickingOrd(x)
    }
}

impl<T: PartialOrd + Eq> PartialOrd for PanickingOrd<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: PartialOrd + Eq> Ord for PanickingOrd<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap()
    }
}

impl<T: PartialOrd + Eq> std::ops::Deref for PanickingOrd<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    use crate::core::support::simulation_time::SimulationTime;
    use crate::core::work::task::TaskRef;
    use crate::host::{Host, HostId, HostParameters};

    fn test_host() -> Host {
        Host::new(
            HostParameters {
                id: HostId::from(0),
                name: "testhost".into(),
                seed: 0,
                log_level: None,
            },
            Ipv4Addr::new(11, 0, 0, 1),
        )
    }

    fn event_at(host: &Host, nanos: u64) -> Event {
        Event::new(
            TaskRef::new(|_| {}),
            EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(nanos),
            host,
            host.id(),
        )
    }

    #[test]
    fn test_pops_in_time_order() {
        let host = test_host();
        let mut queue = EventQueue::new();

        queue.push(event_at(&host, 30));
        queue.push(event_at(&host, 10));
        queue.push(event_at(&host, 20));

        assert_eq!(
            queue.next_event_time(),
            Some(EmulatedTime::SIMULATION_START + SimulationTime::from_nanos(10))
        );

        let times: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.time().to_abs_simtime().as_nanos())
            .collect();
        assert_eq!(times, vec![10, 20, 30]);
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_rejects_backward_time() {
        let host = test_host();
        let mut queue = EventQueue::new();

        queue.push(event_at(&host, 20));
        queue.pop().unwrap();

        // earlier than the last popped event
        queue.push(event_at(&host, 10));
    }
}
