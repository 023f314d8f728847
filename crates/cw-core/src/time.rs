//! Sample-accurate time types shared by the graph and the editing engine.

use serde::{Deserialize, Serialize};

/// An absolute sample position (a multiple of the channel count by
/// convention; callers that advance a position manually are responsible for
/// keeping it frame-aligned).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate).max(0.0) as u64)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for SamplePosition {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// A duration expressed in samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleDuration(pub u64);

impl SampleDuration {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate).max(0.0) as u64)
    }

    #[inline]
    pub fn from_ms(ms: f64, sample_rate: f64) -> Self {
        Self::from_seconds(ms / 1000.0, sample_rate)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn to_ms(self, sample_rate: f64) -> f64 {
        self.to_seconds(sample_rate) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_seconds() {
        let pos = SamplePosition::from_seconds(1.5, 48_000.0);
        assert_eq!(pos.0, 72_000);
        assert!((pos.to_seconds(48_000.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn saturating_sub_never_underflows() {
        let a = SamplePosition(10);
        let b = SamplePosition(20);
        assert_eq!(a - b, 0);
    }
}
