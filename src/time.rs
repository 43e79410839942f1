//! Time interpolation: mapping source timestamps to output timestamps
//!
//! Interpolators are called once per sample, in presentation order, for each
//! track. They may keep per-track state, which is why `interpolate` takes
//! `&mut self`.

use crate::error::{Result, TranscodeError};
use crate::media::{TrackMap, TrackType};

pub trait TimeInterpolator: Send {
    /// Map a source timestamp (microseconds) to the output timeline.
    fn interpolate(&mut self, track: TrackType, time_us: i64) -> i64;
}

/// Identity mapping
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTimeInterpolator;

impl TimeInterpolator for DefaultTimeInterpolator {
    fn interpolate(&mut self, _track: TrackType, time_us: i64) -> i64 {
        time_us
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SpeedState {
    last_real_us: Option<i64>,
    last_corrected_us: i64,
}

/// Plays the output `factor` times faster than the source. Deltas between
/// consecutive timestamps are divided by the factor, so the first timestamp
/// of each track is kept as is.
#[derive(Debug, Clone)]
pub struct SpeedTimeInterpolator {
    factor: f64,
    state: TrackMap<SpeedState>,
}

impl SpeedTimeInterpolator {
    pub fn new(factor: f64) -> Result<Self> {
        if factor <= 0.0 || !factor.is_finite() {
            return Err(TranscodeError::Config(format!(
                "speed factor must be positive, got {}",
                factor
            )));
        }
        Ok(Self {
            factor,
            state: TrackMap::default(),
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl TimeInterpolator for SpeedTimeInterpolator {
    fn interpolate(&mut self, track: TrackType, time_us: i64) -> i64 {
        let factor = self.factor;
        let state = self.state.get_mut(track);
        match state.last_real_us {
            None => state.last_corrected_us = time_us,
            Some(last_real) => {
                let delta = (time_us - last_real) as f64 / factor;
                state.last_corrected_us += delta as i64;
            }
        }
        state.last_real_us = Some(time_us);
        tracing::trace!(%track, time_us, corrected = state.last_corrected_us, "speed interpolate");
        state.last_corrected_us
    }
}

/// Wraps another interpolator and keeps each track strictly increasing:
/// a timestamp that does not move forward becomes `previous + 1`.
pub struct MonotonicTimeInterpolator<I> {
    inner: I,
    last: TrackMap<Option<i64>>,
}

impl<I: TimeInterpolator> MonotonicTimeInterpolator<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            last: TrackMap::default(),
        }
    }
}

impl<I: TimeInterpolator> TimeInterpolator for MonotonicTimeInterpolator<I> {
    fn interpolate(&mut self, track: TrackType, time_us: i64) -> i64 {
        let next = self.inner.interpolate(track, time_us);
        let last = self.last.get_mut(track);
        let out = match *last {
            Some(prev) => next.max(prev + 1),
            None => next,
        };
        *last = Some(out);
        out
    }
}

impl TimeInterpolator for Box<dyn TimeInterpolator> {
    fn interpolate(&mut self, track: TrackType, time_us: i64) -> i64 {
        (**self).interpolate(track, time_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let mut i = DefaultTimeInterpolator;
        assert_eq!(i.interpolate(TrackType::Video, 1234), 1234);
    }

    #[test]
    fn test_speed_factor_two() {
        let mut i = SpeedTimeInterpolator::new(2.0).unwrap();
        let out: Vec<i64> = [0, 10_000, 20_000]
            .iter()
            .map(|t| i.interpolate(TrackType::Video, *t))
            .collect();
        assert_eq!(out, vec![0, 5_000, 10_000]);
    }

    #[test]
    fn test_speed_tracks_are_independent() {
        let mut i = SpeedTimeInterpolator::new(0.5).unwrap();
        assert_eq!(i.interpolate(TrackType::Video, 0), 0);
        assert_eq!(i.interpolate(TrackType::Video, 1_000), 2_000);
        assert_eq!(i.interpolate(TrackType::Audio, 500), 500);
        assert_eq!(i.interpolate(TrackType::Audio, 1_500), 2_500);
    }

    #[test]
    fn test_speed_rejects_non_positive() {
        assert!(SpeedTimeInterpolator::new(0.0).is_err());
        assert!(SpeedTimeInterpolator::new(-1.0).is_err());
        assert!(SpeedTimeInterpolator::new(f64::NAN).is_err());
    }

    #[test]
    fn test_monotonic() {
        let mut i = MonotonicTimeInterpolator::new(DefaultTimeInterpolator);
        let out: Vec<i64> = [20, 30, 40, 50, 10, 20, 30]
            .iter()
            .map(|t| i.interpolate(TrackType::Audio, *t))
            .collect();
        assert_eq!(out, vec![20, 30, 40, 50, 51, 52, 53]);
    }
}
