//! Model input resolution.

use crate::config::TrainingConfig;
use crate::{Result, TrainpipeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Input height and width in pixels, both multiples of the network stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub height: u32,
    pub width: u32,
}

impl Resolution {
    pub fn new(height: u32, width: u32) -> Result<Self> {
        let stride = TrainingConfig::RESOLUTION_STRIDE;
        for (field, value) in [("height", height), ("width", width)] {
            if value == 0 || value % stride != 0 {
                return Err(TrainpipeError::validation(
                    "resolution",
                    format!("{field} must be a positive multiple of {stride}, got {value}"),
                ));
            }
        }
        Ok(Self { height, width })
    }

    /// The resolution checkpoints are exported at before any input surgery.
    pub fn canonical() -> Self {
        let (height, width) = TrainingConfig::CANONICAL_RESOLUTION;
        Self { height, width }
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::canonical()
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::canonical()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

impl FromStr for Resolution {
    type Err = TrainpipeError;

    /// Parse `"<H>x<W>"`; `X` and `×` are accepted as separators.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || {
            TrainpipeError::validation(
                "resolution",
                format!("expected \"<height>x<width>\", got {s:?}"),
            )
        };

        let mut parts = s.trim().split(['x', 'X', '×']);
        let (Some(h), Some(w), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let height = h.trim().parse::<u32>().map_err(|_| malformed())?;
        let width = w.trim().parse::<u32>().map_err(|_| malformed())?;
        Self::new(height, width)
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
