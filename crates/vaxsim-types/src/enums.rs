//! Enumeration types for the vaccine-attitude simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Attitude ratings
// ---------------------------------------------------------------------------

/// An agent's behavioral vaccination stance on the 1-4 scale.
///
/// 1 = will not get vaccinated, 2 = probably not, 3 = probably will,
/// 4 = will get vaccinated. Serialized as the bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AttitudeRating {
    /// Will not get vaccinated.
    WillNot,
    /// Probably not going to get vaccinated.
    ProbablyNot,
    /// Probably going to get vaccinated.
    Probably,
    /// Will get vaccinated.
    Will,
}

impl AttitudeRating {
    /// All ratings in ascending order.
    pub const ALL: [Self; 4] = [Self::WillNot, Self::ProbablyNot, Self::Probably, Self::Will];

    /// The integer value of this rating (1-4).
    pub const fn value(self) -> u8 {
        match self {
            Self::WillNot => 1,
            Self::ProbablyNot => 2,
            Self::Probably => 3,
            Self::Will => 4,
        }
    }

    /// Zero-based position of this rating in a distribution.
    pub const fn index(self) -> usize {
        match self {
            Self::WillNot => 0,
            Self::ProbablyNot => 1,
            Self::Probably => 2,
            Self::Will => 3,
        }
    }

    /// Look up a rating by its integer value (1-4).
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::WillNot),
            2 => Some(Self::ProbablyNot),
            3 => Some(Self::Probably),
            4 => Some(Self::Will),
            _ => None,
        }
    }

    /// Look up a rating by its zero-based distribution index.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::WillNot),
            1 => Some(Self::ProbablyNot),
            2 => Some(Self::Probably),
            3 => Some(Self::Will),
            _ => None,
        }
    }

    /// Ratings 1 and 2 count as "against" in population aggregates.
    pub const fn is_against(self) -> bool {
        matches!(self, Self::WillNot | Self::ProbablyNot)
    }

    /// Rating 3 counts as "swing".
    pub const fn is_swing(self) -> bool {
        matches!(self, Self::Probably)
    }

    /// Rating 4 counts as "support".
    pub const fn is_support(self) -> bool {
        matches!(self, Self::Will)
    }
}

impl From<AttitudeRating> for u8 {
    fn from(rating: AttitudeRating) -> Self {
        rating.value()
    }
}

impl TryFrom<u8> for AttitudeRating {
    type Error = InvalidRating;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_value(value).ok_or(InvalidRating(value))
    }
}

impl core::fmt::Display for AttitudeRating {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A rating value outside the 1-4 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRating(pub u8);

impl core::fmt::Display for InvalidRating {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "attitude rating must be 1-4, got {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Disease risk
// ---------------------------------------------------------------------------

/// Public-health risk category reported in the weekly broadcast.
///
/// Ranked in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Risk value below 1.5.
    Minimal,
    /// Risk value in [1.5, 2.9).
    Low,
    /// Risk value in [2.9, 4.4).
    Moderate,
    /// Risk value in [4.4, 5.9).
    Substantial,
    /// Risk value of 5.9 and above.
    High,
}

impl RiskLevel {
    /// Categorize a raw risk value (weekly percentage of emergency visits).
    pub fn from_value(value: f64) -> Self {
        if value < 1.5 {
            Self::Minimal
        } else if value < 2.9 {
            Self::Low
        } else if value < 4.4 {
            Self::Moderate
        } else if value < 5.9 {
            Self::Substantial
        } else {
            Self::High
        }
    }
}

impl core::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Minimal => "Minimal",
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::Substantial => "Substantial",
            Self::High => "High",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Content stance
// ---------------------------------------------------------------------------

/// Stance of a news item or post towards vaccination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    /// Pro-vaccination content.
    Positive,
    /// Anti-vaccination content.
    Negative,
    /// No stance recorded.
    #[default]
    Neutral,
}
