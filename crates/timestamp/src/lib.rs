use std::time::{Duration, Instant, SystemTime};

mod rational;
pub use rational::RationalTime;

/// A point in time on one of the clocks a capture source may stamp frames
/// with. Sources pick whichever clock their driver exposes; everything
/// downstream compares against the session's [`Timestamps`] anchor.
#[derive(Clone, Copy, Debug)]
pub enum Timestamp {
    Instant(Instant),
    SystemTime(SystemTime),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::Instant(Instant::now())
    }

    pub fn duration_since(&self, start: Timestamps) -> Duration {
        match self {
            Self::Instant(instant) => instant.duration_since(start.instant),
            Self::SystemTime(time) => time
                .duration_since(start.system_time)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn checked_duration_since(&self, start: Timestamps) -> Option<Duration> {
        match self {
            Self::Instant(instant) => instant.checked_duration_since(start.instant),
            Self::SystemTime(time) => time.duration_since(start.system_time).ok(),
        }
    }

    pub fn signed_duration_since_secs(&self, start: Timestamps) -> f64 {
        match self {
            Self::Instant(instant) => {
                if let Some(duration) = instant.checked_duration_since(start.instant) {
                    duration.as_secs_f64()
                } else {
                    let reverse = start.instant.duration_since(*instant);
                    -(reverse.as_secs_f64())
                }
            }
            Self::SystemTime(time) => match time.duration_since(start.system_time) {
                Ok(duration) => duration.as_secs_f64(),
                Err(e) => -(e.duration().as_secs_f64()),
            },
        }
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        match self {
            Timestamp::Instant(i) => Timestamp::Instant(i + rhs),
            Timestamp::SystemTime(t) => Timestamp::SystemTime(t + rhs),
        }
    }
}

impl std::ops::Add<Duration> for &Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        *self + rhs
    }
}

/// Anchors for every clock domain, captured together when a session is
/// created. A frame's [`Timestamp`] is only meaningful relative to these.
#[derive(Clone, Copy, Debug)]
pub struct Timestamps {
    instant: Instant,
    system_time: SystemTime,
}

impl Timestamps {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            system_time: SystemTime::now(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn system_time(&self) -> SystemTime {
        self.system_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_duration_since_anchor() {
        let start = Timestamps::now();
        let later = Timestamp::Instant(start.instant() + Duration::from_millis(250));

        assert_eq!(later.duration_since(start), Duration::from_millis(250));
        assert_eq!(
            later.checked_duration_since(start),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn timestamp_before_anchor_is_negative() {
        let start = Timestamps::now();
        let earlier = Timestamp::SystemTime(start.system_time() - Duration::from_secs(1));

        assert!(earlier.signed_duration_since_secs(start) < 0.0);
        assert_eq!(earlier.checked_duration_since(start), None);
        assert_eq!(earlier.duration_since(start), Duration::ZERO);
    }

    #[test]
    fn add_duration_shifts_both_domains() {
        let start = Timestamps::now();
        let shifted = Timestamp::Instant(start.instant()) + Duration::from_secs(2);

        assert!((shifted.signed_duration_since_secs(start) - 2.0).abs() < 1e-9);
    }
}
