use reel_media_info::{AudioInfo, VideoInfo};
use reel_timestamp::{RationalTime, Timestamp};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// One captured video sample: raw pixels plus the source clock's
/// presentation time and the cross-clock capture timestamp.
#[derive(Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub info: VideoInfo,
    pub pts: RationalTime,
    pub duration: RationalTime,
    pub timestamp: Timestamp,
}

impl VideoFrame {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Wall-clock end of this frame, used for manifest end timestamps.
    pub fn end_timestamp(&self) -> Timestamp {
        self.timestamp + duration_of(self.duration)
    }
}

/// One captured audio buffer, interleaved samples.
#[derive(Clone)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub info: AudioInfo,
    pub pts: RationalTime,
    pub duration: RationalTime,
    pub timestamp: Timestamp,
}

impl AudioFrame {
    pub fn new(
        data: Vec<u8>,
        info: AudioInfo,
        pts: RationalTime,
        duration: RationalTime,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            data,
            info,
            pts,
            duration,
            timestamp,
        }
    }

    pub fn sample_count(&self) -> usize {
        let block = self.info.block_size();
        if block == 0 { 0 } else { self.data.len() / block }
    }

    pub fn end_timestamp(&self) -> Timestamp {
        self.timestamp + duration_of(self.duration)
    }
}

pub(crate) fn duration_of(time: RationalTime) -> Duration {
    let secs = time.as_secs_f64();
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media_info::SampleFormat;

    #[test]
    fn audio_sample_count_uses_block_size() {
        let info = AudioInfo::new_raw(SampleFormat::F32, 48000, 2);
        let frame = AudioFrame::new(
            vec![0u8; 1024 * 8],
            info,
            RationalTime::zero(),
            RationalTime::from_micros(21_333),
            Timestamp::now(),
        );

        assert_eq!(frame.sample_count(), 1024);
    }

    #[test]
    fn negative_duration_does_not_move_end_timestamp() {
        assert_eq!(duration_of(RationalTime::new(-10, 600)), Duration::ZERO);
    }
}
