/*!
Instants in time as seen by the simulated hosts.
*/

use crate::core::support::simulation_time::{self, RawSimulationTime, SimulationTime};

/// An instant in time (analogous to [`std::time::Instant`]) in the
/// simulation. Internally represented as a duration since the Unix epoch, so
/// that simulated applications observe a plausible recent wall-clock time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EmulatedTime(RawEmulatedTime);

/// Emulated time in nanoseconds since the Unix epoch. Emulated time is the
/// simulation time plus [`EMUTIME_SIMULATION_START`].
pub type RawEmulatedTime = u64;

pub const EMUTIME_INVALID: RawEmulatedTime = u64::MAX;
pub const EMUTIME_MAX: RawEmulatedTime = u64::MAX - 1;
pub const EMUTIME_MIN: RawEmulatedTime = 0u64;

/// The number of seconds from the Unix epoch to 00:00:00 UTC on 1 January,
/// 2000.
pub const SIMULATION_START_SEC: u64 = 946_684_800u64;

/// The number of nanoseconds from the Unix epoch to the start of the
/// simulation. Applications are told that they run in a recent time.
pub const EMUTIME_SIMULATION_START: RawEmulatedTime =
    SIMULATION_START_SEC * simulation_time::SIMTIME_ONE_SECOND;

const _: () = assert!(EMUTIME_MAX - EMUTIME_SIMULATION_START == simulation_time::SIMTIME_MAX);

impl EmulatedTime {
    /// The start time of the simulation - 00:00:00 UTC on 1 January, 2000.
    pub const SIMULATION_START: Self = Self(EMUTIME_SIMULATION_START);
    /// The Unix epoch (00:00:00 UTC on 1 January 1970).
    pub const UNIX_EPOCH: Self = Self(0);

    pub const MAX: Self = Self(EMUTIME_MAX);
    pub const MIN: Self = Self(EMUTIME_MIN);

    /// Decode a raw emulated time. Returns `None` for [`EMUTIME_INVALID`].
    pub const fn from_raw(val: RawEmulatedTime) -> Option<Self> {
        if val == EMUTIME_INVALID {
            None
        } else {
            Some(Self(val))
        }
    }

    /// Encode an optional instant; `None` encodes to [`EMUTIME_INVALID`].
    pub const fn to_raw(val: Option<Self>) -> RawEmulatedTime {
        match val {
            Some(v) => v.0,
            None => EMUTIME_INVALID,
        }
    }

    /// The instant corresponding to `val` time units after the simulation
    /// began.
    pub fn from_abs_simtime(val: SimulationTime) -> Self {
        Self::SIMULATION_START + val
    }

    /// Convert to the simulation time since the simulation began.
    pub fn to_abs_simtime(self) -> SimulationTime {
        self.duration_since(&Self::SIMULATION_START)
    }

    /// The duration since `earlier`. Panics if `earlier` is after `self`.
    pub fn duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier).unwrap()
    }

    /// The duration since `earlier`, or `None` if `earlier` is after `self`.
    pub fn checked_duration_since(&self, earlier: &EmulatedTime) -> Option<SimulationTime> {
        let d = self.0.checked_sub(earlier.0)?;
        SimulationTime::from_raw(d)
    }

    /// The duration since `earlier`, or 0 if `earlier` is after `self`.
    pub fn saturating_duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier)
            .unwrap_or(SimulationTime::ZERO)
    }

    pub fn checked_add(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        let raw = self.0.checked_add(RawSimulationTime::from(duration))?;
        if raw > EMUTIME_MAX {
            return None;
        }
        EmulatedTime::from_raw(raw)
    }

    pub fn checked_sub(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        EmulatedTime::from_raw(self.0.checked_sub(RawSimulationTime::from(duration))?)
    }

    pub fn saturating_add(&self, duration: SimulationTime) -> EmulatedTime {
        match self.checked_add(duration) {
            Some(later) => later,
            None => EmulatedTime::MAX,
        }
    }

    pub fn saturating_sub(&self, duration: SimulationTime) -> EmulatedTime {
        match self.checked_sub(duration) {
            Some(earlier) => earlier,
            None => EmulatedTime::MIN,
        }
    }
}

impl std::ops::Add<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn add(self, other: SimulationTime) -> Self {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::AddAssign<SimulationTime> for EmulatedTime {
    fn add_assign(&mut self, rhs: SimulationTime) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn sub(self, other: SimulationTime) -> Self {
        self.checked_sub(other).unwrap()
    }
}

impl std::ops::Sub<EmulatedTime> for EmulatedTime {
    type Output = SimulationTime;

    fn sub(self, other: EmulatedTime) -> Self::Output {
        self.duration_since(&other)
    }
}
