//! Rational frame rates.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{TimeError, gcd};

/// A frame rate expressed as a reduced ratio.
///
/// Invariant: `numerator > 0`, `denominator > 0`, the ratio is fully reduced
/// and `drop_frame` is only set for NTSC ratios (24000/1001, 30000/1001,
/// 60000/1001). Because the ratio is stored reduced, field equality is
/// value equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFrameRate", into = "RawFrameRate")]
pub struct FrameRate {
    numerator: u32,
    denominator: u32,
    drop_frame: bool,
}

impl FrameRate {
    /// Creates a non-drop-frame rate.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::ZeroDenominator`] or [`TimeError::ZeroNumerator`].
    pub const fn new(numerator: u32, denominator: u32) -> Result<Self, TimeError> {
        Self::with_drop_frame(numerator, denominator, false)
    }

    /// Creates a rate, optionally flagged as drop-frame.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::NotDropFrameRate`] when `drop_frame` is requested
    /// for a ratio that is not an NTSC rate.
    pub const fn with_drop_frame(
        numerator: u32,
        denominator: u32,
        drop_frame: bool,
    ) -> Result<Self, TimeError> {
        if denominator == 0 {
            return Err(TimeError::ZeroDenominator);
        }
        if numerator == 0 {
            return Err(TimeError::ZeroNumerator);
        }

        let div = gcd(numerator as u64, denominator as u64) as u32;
        let rate = Self {
            numerator: numerator / div,
            denominator: denominator / div,
            drop_frame: false,
        };

        if drop_frame && !rate.is_ntsc() {
            return Err(TimeError::NotDropFrameRate {
                numerator,
                denominator,
            });
        }

        Ok(Self { drop_frame, ..rate })
    }

    /// Returns the reduced form of this rate.
    ///
    /// Rates are reduced on construction, so this is the identity; it exists
    /// for callers that build rates from deserialized parts.
    #[must_use]
    pub const fn reduce(self) -> Self {
        let div = gcd(self.numerator as u64, self.denominator as u64) as u32;
        Self {
            numerator: self.numerator / div,
            denominator: self.denominator / div,
            drop_frame: self.drop_frame,
        }
    }

    #[must_use]
    pub const fn numerator(&self) -> u32 {
        self.numerator
    }

    #[must_use]
    pub const fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Returns true if timecodes at this rate use drop-frame labelling.
    #[must_use]
    pub const fn is_drop_frame(&self) -> bool {
        self.drop_frame
    }

    /// Returns true for the NTSC ratios that admit drop-frame timecode.
    #[must_use]
    pub const fn is_ntsc(&self) -> bool {
        self.denominator == 1001
            && matches!(self.numerator, 24000 | 30000 | 60000)
    }

    /// Nominal whole frames per second used for timecode labels (`ceil(fps)`).
    #[must_use]
    pub const fn nominal_fps(&self) -> u32 {
        self.numerator.div_ceil(self.denominator)
    }

    /// Frames per second as a float.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }

    /// Duration of a single frame in seconds.
    #[must_use]
    pub fn frame_interval(&self) -> f64 {
        f64::from(self.denominator) / f64::from(self.numerator)
    }

    /// Returns true if this rate is an integer multiple of `other`.
    #[must_use]
    pub const fn is_multiple_of(&self, other: FrameRate) -> bool {
        let lhs = self.numerator as u64 * other.denominator as u64;
        let rhs = self.denominator as u64 * other.numerator as u64;
        lhs % rhs == 0
    }

    /// The inverse ratio, never drop-frame.
    #[must_use]
    pub const fn reciprocal(&self) -> Self {
        Self {
            numerator: self.denominator,
            denominator: self.numerator,
            drop_frame: false,
        }
    }

    /// Same ratio with the drop-frame flag cleared.
    #[must_use]
    pub const fn without_drop_frame(self) -> Self {
        Self {
            drop_frame: false,
            ..self
        }
    }
}

impl Ord for FrameRate {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.numerator) * u64::from(other.denominator);
        let rhs = u64::from(other.numerator) * u64::from(self.denominator);
        lhs.cmp(&rhs)
            .then_with(|| self.drop_frame.cmp(&other.drop_frame))
    }
}

impl PartialOrd for FrameRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        StandardFrameRate::Fps24.into()
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)?;
        } else {
            let text = format!("{:.3}", self.as_f64());
            let trimmed = text.trim_end_matches('0').trim_end_matches('.');
            f.write_str(trimmed)?;
        }
        if self.drop_frame {
            f.write_str(" DF")?;
        } else if self.is_ntsc() {
            f.write_str(" NDF")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RawFrameRate {
    numerator: u32,
    denominator: u32,
    #[serde(default)]
    drop_frame: bool,
}

impl TryFrom<RawFrameRate> for FrameRate {
    type Error = TimeError;

    fn try_from(raw: RawFrameRate) -> Result<Self, Self::Error> {
        Self::with_drop_frame(raw.numerator, raw.denominator, raw.drop_frame)
    }
}

impl From<FrameRate> for RawFrameRate {
    fn from(rate: FrameRate) -> Self {
        Self {
            numerator: rate.numerator,
            denominator: rate.denominator,
            drop_frame: rate.drop_frame,
        }
    }
}

/// Broadcast frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFrameRate {
    Fps23_976,
    Fps23_976Df,
    Fps24,
    Fps25,
    Fps29_97,
    Fps29_97Df,
    Fps30,
    Fps48,
    Fps50,
    Fps59_94,
    Fps59_94Df,
    Fps60,
}

impl StandardFrameRate {
    pub const ALL: [Self; 12] = [
        Self::Fps23_976,
        Self::Fps23_976Df,
        Self::Fps24,
        Self::Fps25,
        Self::Fps29_97,
        Self::Fps29_97Df,
        Self::Fps30,
        Self::Fps48,
        Self::Fps50,
        Self::Fps59_94,
        Self::Fps59_94Df,
        Self::Fps60,
    ];

    const fn parts(self) -> (u32, u32, bool) {
        match self {
            Self::Fps23_976 => (24000, 1001, false),
            Self::Fps23_976Df => (24000, 1001, true),
            Self::Fps24 => (24, 1, false),
            Self::Fps25 => (25, 1, false),
            Self::Fps29_97 => (30000, 1001, false),
            Self::Fps29_97Df => (30000, 1001, true),
            Self::Fps30 => (30, 1, false),
            Self::Fps48 => (48, 1, false),
            Self::Fps50 => (50, 1, false),
            Self::Fps59_94 => (60000, 1001, false),
            Self::Fps59_94Df => (60000, 1001, true),
            Self::Fps60 => (60, 1, false),
        }
    }

    /// Returns the matching standard rate, if any.
    #[must_use]
    pub fn from_frame_rate(rate: FrameRate) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|standard| FrameRate::from(*standard) == rate)
    }
}

impl From<StandardFrameRate> for FrameRate {
    fn from(standard: StandardFrameRate) -> Self {
        let (numerator, denominator, drop_frame) = standard.parts();
        // All standard parts are valid, non-zero and reduced.
        Self {
            numerator,
            denominator,
            drop_frame,
        }
    }
}
