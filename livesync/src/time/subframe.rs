use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::TimeError;

/// The fractional part of a frame as `value / resolution`.
///
/// Invariant: `resolution > 0` and `value < resolution`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawSubframe", into = "RawSubframe")]
pub struct Subframe {
    value: u16,
    resolution: u16,
}

impl Subframe {
    pub const DEFAULT_RESOLUTION: u16 = 51200;
    pub const MAX_RESOLUTION: u16 = u16::MAX;

    /// The start of a frame at the default resolution.
    pub const ZERO: Self = Self {
        value: 0,
        resolution: Self::DEFAULT_RESOLUTION,
    };

    /// # Errors
    ///
    /// Returns [`TimeError::InvalidSubframe`] if `resolution` is zero or
    /// `value >= resolution`.
    pub const fn new(value: u16, resolution: u16) -> Result<Self, TimeError> {
        if resolution == 0 || value >= resolution {
            return Err(TimeError::InvalidSubframe {
                value: value as u32,
                resolution: resolution as u32,
            });
        }
        Ok(Self { value, resolution })
    }

    /// Subframe at the default resolution.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidSubframe`] if `value >= DEFAULT_RESOLUTION`.
    pub const fn from_value(value: u16) -> Result<Self, TimeError> {
        Self::new(value, Self::DEFAULT_RESOLUTION)
    }

    /// Nearest subframe to `fraction` (clamped to `[0, 1)`) at `resolution`.
    #[must_use]
    pub fn from_fraction(fraction: f64, resolution: u16) -> Self {
        let resolution = resolution.max(1);
        let scaled = (fraction.clamp(0.0, 1.0) * f64::from(resolution)).round();
        let value = (scaled as u32).min(u32::from(resolution) - 1) as u16;
        Self { value, resolution }
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.value
    }

    #[must_use]
    pub const fn resolution(&self) -> u16 {
        self.resolution
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.value == 0
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.value) / f64::from(self.resolution)
    }
}

impl Default for Subframe {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Subframe {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Subframe {}

impl Ord for Subframe {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u32::from(self.value) * u32::from(other.resolution);
        let rhs = u32::from(other.value) * u32::from(self.resolution);
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Subframe {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Subframe {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let div = super::gcd(u64::from(self.value), u64::from(self.resolution)).max(1);
        (u64::from(self.value) / div).hash(state);
        (u64::from(self.resolution) / div).hash(state);
    }
}

impl fmt::Display for Subframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.resolution)
    }
}

#[derive(Serialize, Deserialize)]
struct RawSubframe {
    value: u16,
    resolution: u16,
}

impl TryFrom<RawSubframe> for Subframe {
    type Error = TimeError;

    fn try_from(raw: RawSubframe) -> Result<Self, Self::Error> {
        Self::new(raw.value, raw.resolution)
    }
}

impl From<Subframe> for RawSubframe {
    fn from(subframe: Subframe) -> Self {
        Self {
            value: subframe.value,
            resolution: subframe.resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_value_at_or_past_resolution() {
        assert!(Subframe::new(99, 100).is_ok());
        assert_eq!(
            Subframe::new(100, 100),
            Err(TimeError::InvalidSubframe {
                value: 100,
                resolution: 100
            })
        );
        assert!(Subframe::new(0, 0).is_err());
    }

    #[test]
    fn compares_across_resolutions() {
        let half_a = Subframe::new(1, 2).unwrap();
        let half_b = Subframe::new(25600, Subframe::DEFAULT_RESOLUTION).unwrap();
        let quarter = Subframe::new(1, 4).unwrap();

        assert_eq!(half_a, half_b);
        assert!(quarter < half_a);
    }

    #[test]
    fn equal_values_hash_equal() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Subframe::new(1, 2).unwrap());
        assert!(set.contains(&Subframe::new(3, 6).unwrap()));
        assert!(!set.contains(&Subframe::new(0, 7).unwrap()));
    }

    #[test]
    fn from_fraction_stays_below_one() {
        let sub = Subframe::from_fraction(0.999_999_9, 100);
        assert_eq!(sub.value(), 99);
        assert_eq!(Subframe::from_fraction(0.25, 100).value(), 25);
    }
}
