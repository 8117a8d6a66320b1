use std::sync::RwLock;

use crate::core::support::simulation_time::SimulationTime;

/// Decides how far simulated time may jump at the next scheduling round (the
/// duration of the round).
///
/// A larger runahead improves performance since more hosts and more events
/// can be run in parallel during a round, but if the runahead is too large
/// then packets are delayed until the next round, beyond their intended
/// latency. With dynamic runahead disabled this uses a fixed runahead of the
/// provided minimum possible latency, and otherwise the minimum latency
/// actually used so far. Both calculations honor a static lower bound.
#[derive(Debug)]
pub struct Runahead {
    /// The lowest packet latency the simulation has used so far. Only updated
    /// if dynamic runahead is enabled.
    min_used_latency: RwLock<Option<SimulationTime>>,
    /// The lowest latency that's possible in the simulation (the path with
    /// the lowest latency).
    min_possible_latency: SimulationTime,
    /// A lower bound for the runahead as specified by the user.
    min_runahead_config: Option<SimulationTime>,
    /// Is dynamic runahead enabled?
    is_runahead_dynamic: bool,
}

impl Runahead {
    pub fn new(
        is_runahead_dynamic: bool,
        min_possible_latency: SimulationTime,
        min_runahead_config: Option<SimulationTime>,
    ) -> Self {
        assert!(!min_possible_latency.is_zero());

        Self {
            min_used_latency: RwLock::new(None),
            min_possible_latency,
            min_runahead_config,
            is_runahead_dynamic,
        }
    }

    /// Get the runahead for the next round.
    pub fn get(&self) -> SimulationTime {
        // if 'min_used_latency' is None, no latency value has been reported
        // yet (or dynamic runahead is disabled); start from the smallest
        // possible latency
        let runahead = self
            .min_used_latency
            .read()
            .unwrap()
            .unwrap_or(self.min_possible_latency);

        // the runahead config option sets a lower bound
        let runahead_config = self.min_runahead_config.unwrap_or(SimulationTime::ZERO);
        std::cmp::max(runahead, runahead_config)
    }

    /// If dynamic runahead is enabled, compare and update the stored lowest
    /// packet latency. This may shorten the runahead for future rounds.
    pub fn update_lowest_used_latency(&self, latency: SimulationTime) {
        assert!(latency > SimulationTime::ZERO);

        if !self.is_runahead_dynamic {
            return;
        }

        let should_update = |min_used_latency: &Option<SimulationTime>| match min_used_latency {
            // update if the new latency is smaller than the old latency
            Some(min_used_latency) => latency < *min_used_latency,
            // or if the latency was never set before
            None => true,
        };

        // an initial check with only a read lock
        {
            let min_used_latency = self.min_used_latency.read().unwrap();

            if !should_update(&min_used_latency) {
                return;
            }
        }

        let old_runahead;

        // check the same condition again, but with a write lock
        {
            let mut min_used_latency = self.min_used_latency.write().unwrap();

            if !should_update(&min_used_latency) {
                return;
            }

            old_runahead = *min_used_latency;
            *min_used_latency = Some(latency);
        }

        // this message may appear out-of-order in the log
        log::debug!(
            "Minimum time runahead for next scheduling round updated from {:?} to {} ns",
            old_runahead.map(|x| x.as_nanos()),
            latency.as_nanos(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_runahead() {
        let runahead = Runahead::new(false, SimulationTime::from_millis(10), None);
        assert_eq!(runahead.get(), SimulationTime::from_millis(10));

        // updates are ignored when dynamic runahead is disabled
        runahead.update_lowest_used_latency(SimulationTime::from_millis(1));
        assert_eq!(runahead.get(), SimulationTime::from_millis(10));
    }

    #[test]
    fn test_dynamic_runahead_shrinks() {
        let runahead = Runahead::new(true, SimulationTime::from_millis(10), None);
        assert_eq!(runahead.get(), SimulationTime::from_millis(10));

        runahead.update_lowest_used_latency(SimulationTime::from_millis(5));
        assert_eq!(runahead.get(), SimulationTime::from_millis(5));

        // larger latencies don't grow the runahead again
        runahead.update_lowest_used_latency(SimulationTime::from_millis(8));
        assert_eq!(runahead.get(), SimulationTime::from_millis(5));
    }

    #[test]
    fn test_config_lower_bound() {
        let runahead = Runahead::new(
            true,
            SimulationTime::from_millis(10),
            Some(SimulationTime::from_millis(3)),
        );

        runahead.update_lowest_used_latency(SimulationTime::from_millis(1));
        assert_eq!(runahead.get(), SimulationTime::from_millis(3));
    }
}
