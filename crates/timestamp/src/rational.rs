use std::cmp::Ordering;
use std::time::Duration;

/// Presentation time expressed as `value / timescale` seconds.
///
/// Capture drivers report sample times in their own timescale; keeping the
/// rational form avoids rounding drift when streams with different
/// timescales end up in the same file.
#[derive(Clone, Copy, Debug)]
pub struct RationalTime {
    pub value: i64,
    pub timescale: u32,
}

impl RationalTime {
    /// Microsecond timescale used by the engine's own clocks.
    pub const MICROS: u32 = 1_000_000;

    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub const fn zero() -> Self {
        Self::new(0, Self::MICROS)
    }

    pub fn from_duration(duration: Duration, timescale: u32) -> Self {
        Self {
            value: (duration.as_secs_f64() * f64::from(timescale)).round() as i64,
            timescale,
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self::new(micros, Self::MICROS)
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / f64::from(self.timescale)
    }

    pub fn rescaled(&self, timescale: u32) -> Self {
        if self.timescale == timescale || self.timescale == 0 {
            return Self::new(self.value, timescale);
        }
        let value = (self.value as i128 * i128::from(timescale)
            / i128::from(self.timescale)) as i64;
        Self { value, timescale }
    }

    /// `self - other`, expressed in `self`'s timescale.
    pub fn sub(&self, other: RationalTime) -> Self {
        let other = other.rescaled(self.timescale);
        Self {
            value: self.value - other.value,
            timescale: self.timescale,
        }
    }

    /// `self + other`, expressed in `self`'s timescale.
    pub fn add(&self, other: RationalTime) -> Self {
        let other = other.rescaled(self.timescale);
        Self {
            value: self.value + other.value,
            timescale: self.timescale,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0
    }
}

impl PartialEq for RationalTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RationalTime {}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RationalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * i128::from(other.timescale.max(1));
        let rhs = other.value as i128 * i128::from(self.timescale.max(1));
        lhs.cmp(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_across_timescales() {
        let half_second = RationalTime::new(500_000, RationalTime::MICROS);
        let same_in_video_ticks = RationalTime::new(30, 60);
        let later = RationalTime::new(31, 60);

        assert_eq!(half_second, same_in_video_ticks);
        assert!(half_second < later);
    }

    #[test]
    fn rescale_preserves_seconds() {
        let t = RationalTime::new(90, 60);
        let rescaled = t.rescaled(RationalTime::MICROS);

        assert_eq!(rescaled.value, 1_500_000);
        assert!((rescaled.as_secs_f64() - t.as_secs_f64()).abs() < 1e-9);
    }

    #[test]
    fn sub_handles_mixed_timescales() {
        let a = RationalTime::new(2_000_000, RationalTime::MICROS);
        let b = RationalTime::new(30, 60);

        let diff = a.sub(b);
        assert!((diff.as_secs_f64() - 1.5).abs() < 1e-9);

        let negative = b.rescaled(RationalTime::MICROS).sub(a);
        assert!(negative.is_negative());
    }

    #[test]
    fn duration_round_trip() {
        let t = RationalTime::from_duration(Duration::from_millis(1500), 600);
        assert_eq!(t.value, 900);
        assert!((t.as_secs_f64() - 1.5).abs() < 1e-9);
    }
}
