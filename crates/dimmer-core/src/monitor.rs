//! Monitor identity

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a physical monitor.
///
/// Ids are positive and assigned by display enumeration (1-based, in the order
/// the display server reports active monitors). An id never changes while the
/// monitor is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MonitorId(NonZeroU32);

impl MonitorId {
    /// Returns `None` for `0`, which is never a valid monitor.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for MonitorId {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "monitor id must be a positive integer".to_string())
    }
}

impl From<MonitorId> for u32 {
    fn from(id: MonitorId) -> Self {
        id.get()
    }
}

impl FromStr for MonitorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid monitor id: {}", s))?;
        Self::try_from(value)
    }
}
