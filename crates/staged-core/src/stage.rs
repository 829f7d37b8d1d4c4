//! Render stages
//!
//! A staged render moves through three ordered phases. Only forward
//! transitions exist; `Dynamic` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of a staged render
///
/// The discriminants define the total order used everywhere a stage is
/// compared: `Static < Runtime < Dynamic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RenderStage {
    /// Content that needs nothing from the request
    Static = 1,
    /// Content that may read request data but not uncached I/O
    Runtime = 2,
    /// Everything else
    Dynamic = 3,
}

impl RenderStage {
    /// All stages in order
    pub const ALL: [RenderStage; 3] = [Self::Static, Self::Runtime, Self::Dynamic];

    /// Numeric value (1..=3)
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse from the numeric value
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Static),
            2 => Some(Self::Runtime),
            3 => Some(Self::Dynamic),
            _ => None,
        }
    }

    /// Zero-based position, for per-stage arrays
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// The stage after this one, if any
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Static => Some(Self::Runtime),
            Self::Runtime => Some(Self::Dynamic),
            Self::Dynamic => None,
        }
    }

    /// Whether no transition out of this stage exists
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dynamic)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Runtime => "runtime",
            Self::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown render stage: '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for RenderStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "runtime" => Ok(Self::Runtime),
            "dynamic" => Ok(Self::Dynamic),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_totally_ordered() {
        assert!(RenderStage::Static < RenderStage::Runtime);
        assert!(RenderStage::Runtime < RenderStage::Dynamic);
        assert_eq!(RenderStage::ALL.iter().max(), Some(&RenderStage::Dynamic));
    }

    #[test]
    fn numeric_round_trip() {
        for stage in RenderStage::ALL {
            assert_eq!(RenderStage::from_u8(stage.as_u8()), Some(stage));
        }
        assert_eq!(RenderStage::from_u8(0), None);
        assert_eq!(RenderStage::from_u8(4), None);
    }

    #[test]
    fn next_walks_forward_and_stops() {
        assert_eq!(RenderStage::Static.next(), Some(RenderStage::Runtime));
        assert_eq!(RenderStage::Runtime.next(), Some(RenderStage::Dynamic));
        assert_eq!(RenderStage::Dynamic.next(), None);
        assert!(RenderStage::Dynamic.is_terminal());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Runtime".parse::<RenderStage>(), Ok(RenderStage::Runtime));
        assert!("prefetch".parse::<RenderStage>().is_err());
        assert_eq!(RenderStage::Dynamic.to_string(), "dynamic");
    }
}
