/*!
Values for working with simulated durations. Use
[`EmulatedTime`](crate::core::support::emulated_time::EmulatedTime) to
represent an instant in time, and `SimulationTime` to represent a time
interval (equivalently, nanoseconds since the simulation started).
*/

use std::time::Duration;

/// A duration or a number of nanoseconds since the simulation started.
#[derive(Copy, Clone, Eq, PartialEq, Debug, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SimulationTime(RawSimulationTime);

/// The raw representation used where a `SimulationTime` must be stored in an
/// atomic or encoded with its sentinel values ([`SIMTIME_MAX`] means "no
/// event", [`SIMTIME_INVALID`] means "not set").
pub type RawSimulationTime = u64;

/// An invalid simulation time; used to represent "no time set".
pub const SIMTIME_INVALID: RawSimulationTime = u64::MAX;

/// The upper bound of a valid simulation time. Chosen so that the maximum
/// simulation time plus the emulation offset still fits the emulated-time
/// range.
pub const SIMTIME_MAX: RawSimulationTime = 17_500_059_273_709_551_614u64;

/// The lower bound of a valid simulation time.
pub const SIMTIME_MIN: RawSimulationTime = 0u64;

/// Number of raw time units per nanosecond.
pub const SIMTIME_ONE_NANOSECOND: RawSimulationTime = 1u64;

/// Number of raw time units per microsecond.
pub const SIMTIME_ONE_MICROSECOND: RawSimulationTime = 1_000u64;

/// Number of raw time units per millisecond.
pub const SIMTIME_ONE_MILLISECOND: RawSimulationTime = 1_000_000u64;

/// Number of raw time units per second.
pub const SIMTIME_ONE_SECOND: RawSimulationTime = 1_000_000_000u64;

impl SimulationTime {
    /// Largest valid value; doubles as the "no event" sentinel in round
    /// reductions.
    pub const MAX: SimulationTime = SimulationTime(SIMTIME_MAX);
    pub const ZERO: SimulationTime = SimulationTime(0);
    pub const SECOND: SimulationTime = SimulationTime(SIMTIME_ONE_SECOND);
    pub const MILLISECOND: SimulationTime = SimulationTime(SIMTIME_ONE_MILLISECOND);
    pub const MICROSECOND: SimulationTime = SimulationTime(SIMTIME_ONE_MICROSECOND);
    pub const NANOSECOND: SimulationTime = SimulationTime(SIMTIME_ONE_NANOSECOND);

    /// Decode a raw time value. Returns `None` for [`SIMTIME_INVALID`] and
    /// anything above [`SIMTIME_MAX`].
    pub fn from_raw(val: RawSimulationTime) -> Option<Self> {
        if val == SIMTIME_INVALID {
            return None;
        }

        if val > SIMTIME_MAX {
            return None;
        }

        Some(Self(val))
    }

    /// Encode an optional time; `None` encodes to [`SIMTIME_INVALID`].
    pub fn to_raw(val: Option<Self>) -> RawSimulationTime {
        if let Some(val) = val {
            val.0
        } else {
            SIMTIME_INVALID
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / SIMTIME_ONE_SECOND
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / SIMTIME_ONE_MILLISECOND
    }

    pub fn as_micros(&self) -> u64 {
        self.0 / SIMTIME_ONE_MICROSECOND
    }

    pub fn as_nanos(&self) -> u128 {
        (self.0 / SIMTIME_ONE_NANOSECOND).into()
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => SimulationTime::from_raw(sum),
            None => None,
        }
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(difference) => SimulationTime::from_raw(difference),
            None => None,
        }
    }

    pub fn checked_mul(self, other: u64) -> Option<Self> {
        match self.0.checked_mul(other) {
            Some(product) => SimulationTime::from_raw(product),
            None => None,
        }
    }

    pub fn checked_div(self, other: u64) -> Option<Self> {
        match self.0.checked_div(other) {
            Some(quotient) => SimulationTime::from_raw(quotient),
            None => None,
        }
    }

    pub fn saturating_add(self, other: Self) -> Self {
        let sum = self.0.checked_add(other.0).unwrap_or(SIMTIME_MAX);
        SimulationTime::from_raw(std::cmp::min(sum, SIMTIME_MAX)).unwrap()
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        let difference = self.0.checked_sub(other.0).unwrap_or(SIMTIME_MIN);
        SimulationTime::from_raw(difference).unwrap()
    }

    pub fn try_from_secs(s: u64) -> Option<Self> {
        Self::SECOND.checked_mul(s)
    }

    pub fn from_secs(s: u64) -> Self {
        Self::try_from_secs(s).unwrap()
    }

    pub fn try_from_millis(s: u64) -> Option<Self> {
        Self::MILLISECOND.checked_mul(s)
    }

    pub fn from_millis(s: u64) -> Self {
        Self::try_from_millis(s).unwrap()
    }

    pub fn try_from_micros(s: u64) -> Option<Self> {
        Self::MICROSECOND.checked_mul(s)
    }

    pub fn from_micros(s: u64) -> Self {
        Self::try_from_micros(s).unwrap()
    }

    pub fn try_from_nanos(s: u64) -> Option<Self> {
        Self::NANOSECOND.checked_mul(s)
    }

    pub fn from_nanos(s: u64) -> Self {
        Self::try_from_nanos(s).unwrap()
    }

    pub fn subsec_nanos(&self) -> u32 {
        (self.as_nanos() % 1_000_000_000).try_into().unwrap()
    }
}

impl std::ops::Add<SimulationTime> for SimulationTime {
    type Output = SimulationTime;

    fn add(self, other: Self) -> Self::Output {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::AddAssign<SimulationTime> for SimulationTime {
    fn add_assign(&mut self, rhs: SimulationTime) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<SimulationTime> for SimulationTime {
    type Output = SimulationTime;

    fn sub(self, other: Self) -> Self::Output {
        self.checked_sub(other).unwrap()
    }
}

impl std::ops::SubAssign<SimulationTime> for SimulationTime {
    fn sub_assign(&mut self, rhs: SimulationTime) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<u32> for SimulationTime {
    type Output = SimulationTime;

    fn mul(self, other: u32) -> Self::Output {
        self.checked_mul(other.into()).unwrap()
    }
}

impl std::ops::Div<u32> for SimulationTime {
    type Output = SimulationTime;

    fn div(self, other: u32) -> Self::Output {
        self.checked_div(other.into()).unwrap()
    }
}

impl std::convert::TryFrom<Duration> for SimulationTime {
    type Error = ();

    fn try_from(val: Duration) -> Result<Self, Self::Error> {
        debug_assert_eq!(SIMTIME_ONE_NANOSECOND, 1);
        let val = val.as_nanos();
        if val > SIMTIME_MAX.into() {
            Err(())
        } else {
            Ok(Self(val.try_into().unwrap()))
        }
    }
}

impl std::convert::From<SimulationTime> for Duration {
    fn from(val: SimulationTime) -> Duration {
        debug_assert_eq!(SIMTIME_ONE_NANOSECOND, 1);
        Duration::from_nanos(val.0)
    }
}

impl std::convert::From<SimulationTime> for RawSimulationTime {
    fn from(val: SimulationTime) -> RawSimulationTime {
        val.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        assert_eq!(
            SimulationTime::from_raw(SIMTIME_ONE_SECOND),
            Some(SimulationTime::SECOND)
        );
        assert_eq!(SimulationTime::from_raw(SIMTIME_MAX), Some(SimulationTime::MAX));
        assert_eq!(SimulationTime::from_raw(SIMTIME_INVALID), None);
        assert_eq!(SimulationTime::from_raw(SIMTIME_MAX + 1), None);
    }

    #[test]
    fn test_to_raw() {
        assert_eq!(
            SimulationTime::to_raw(Some(SimulationTime::SECOND)),
            SIMTIME_ONE_SECOND
        );
        assert_eq!(SimulationTime::to_raw(None), SIMTIME_INVALID);
    }

    #[test]
    fn test_unit_conversions() {
        let t = SimulationTime::from_secs(2) + SimulationTime::from_millis(3);
        assert_eq!(t.as_secs(), 2);
        assert_eq!(t.as_millis(), 2_003);
        assert_eq!(t.as_micros(), 2_003_000);
        assert_eq!(t.as_nanos(), 2_003_000_000);
    }

    #[test]
    fn test_checked_ops() {
        let t = SimulationTime::from_nanos(10);
        assert_eq!(t.checked_add(t), Some(SimulationTime::from_nanos(20)));
        assert_eq!(t.checked_sub(t), Some(SimulationTime::ZERO));
        assert_eq!(
            SimulationTime::ZERO.checked_sub(SimulationTime::NANOSECOND),
            None
        );
        assert_eq!(SimulationTime::MAX.checked_add(SimulationTime::NANOSECOND), None);
    }

    #[test]
    fn test_saturating_ops() {
        assert_eq!(
            SimulationTime::MAX.saturating_add(SimulationTime::SECOND),
            SimulationTime::MAX
        );
        assert_eq!(
            SimulationTime::ZERO.saturating_sub(SimulationTime::SECOND),
            SimulationTime::ZERO
        );
    }

    #[test]
    fn test_duration_round_trip() {
        let d = Duration::from_nanos(123_456_789);
        let t = SimulationTime::try_from(d).unwrap();
        assert_eq!(Duration::from(t), d);
    }
}
