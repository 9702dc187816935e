use serde::{Deserialize, Serialize};

/// Pixel layout of raw video payloads handed to the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Nv12,
    Yuv420p,
    P010,
}

impl PixelFormat {
    /// Bytes needed for one frame at the given dimensions.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Bgra | Self::Rgba => pixels * 4,
            Self::Nv12 | Self::Yuv420p => pixels + pixels / 2,
            Self::P010 => (pixels + pixels / 2) * 2,
        }
    }

    pub fn supports_hdr(&self) -> bool {
        matches!(self, Self::P010)
    }
}

/// Sample layout of raw audio payloads. Interleaved throughout; planar
/// capture is repacked by the source adapter before it reaches the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioInfoError {
    #[error("Unsupported number of channels: {0}")]
    ChannelCount(u16),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: u32,
}

impl AudioInfo {
    /// Capture devices occasionally report surround layouts; anything past
    /// this gets rejected rather than guessed at.
    pub const MAX_AUDIO_CHANNELS: u16 = 8;

    pub const fn new(
        sample_format: SampleFormat,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioInfoError> {
        if channels == 0 || channels > Self::MAX_AUDIO_CHANNELS {
            return Err(AudioInfoError::ChannelCount(channels));
        }

        Ok(Self {
            sample_format,
            sample_rate,
            channels,
            buffer_size: 1024,
        })
    }

    pub const fn new_raw(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_format,
            sample_rate,
            channels,
            buffer_size: 1024,
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_format.bytes()
    }

    /// Bytes per interleaved sample across all channels.
    pub fn block_size(&self) -> usize {
        self.sample_size() * self.channels.max(1) as usize
    }

    pub fn with_max_channels(&self, channels: u16) -> Self {
        let mut this = *self;
        this.channels = this.channels.min(channels.max(1));
        this
    }

    /// Truncates interleaved data down to `max_channels`, keeping the
    /// leading channels of every block. Data already narrow enough is
    /// returned unchanged.
    pub fn downmix_packed(&self, packed: &[u8], max_channels: u16) -> Vec<u8> {
        let in_channels = self.channels.max(1) as usize;
        let out_channels = in_channels.min(max_channels.max(1) as usize);

        if out_channels == in_channels {
            return packed.to_vec();
        }

        let sample_size = self.sample_size();
        let in_block = sample_size * in_channels;
        let out_block = sample_size * out_channels;
        let blocks = packed.len() / in_block;

        let mut out = Vec::with_capacity(blocks * out_block);
        for chunk in packed.chunks_exact(in_block) {
            out.extend_from_slice(&chunk[..out_block]);
        }

        out
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoInfo {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32, fps: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            fps,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }

    /// Scales down to fit `max_width`, preserving aspect ratio and keeping
    /// both dimensions even for the encoder.
    pub fn scaled(&self, max_width: u32, fps: u32) -> Self {
        let (width, height) = if self.width <= max_width {
            (self.width, self.height)
        } else {
            let new_width = max_width & !1;
            let new_height = (((new_width as f32) * (self.height as f32) / (self.width as f32))
                .round() as u32)
                & !1;
            (new_width, new_height)
        };

        Self {
            pixel_format: self.pixel_format,
            width,
            height,
            fps,
        }
    }

    pub fn with_crop(&self, width: u32, height: u32) -> Self {
        Self {
            pixel_format: self.pixel_format,
            width: ensure_even(width.min(self.width)),
            height: ensure_even(height.min(self.height)),
            fps: self.fps,
        }
    }
}

pub fn ensure_even(value: u32) -> u32 {
    let adjusted = value - (value % 2);
    if adjusted == 0 { 2 } else { adjusted }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod audio_info {
        use super::*;

        #[test]
        fn rejects_unsupported_channel_counts() {
            assert!(AudioInfo::new(SampleFormat::F32, 48000, 0).is_err());
            assert!(AudioInfo::new(SampleFormat::F32, 48000, 9).is_err());
            assert!(AudioInfo::new(SampleFormat::F32, 48000, 2).is_ok());
        }

        #[test]
        fn downmix_keeps_leading_channels() {
            let info = AudioInfo::new_raw(SampleFormat::U8, 2, 4);

            let input = &[1, 2, 3, 4, 1, 2, 3, 4];
            let out = info.downmix_packed(input, 2);

            assert_eq!(out, vec![1, 2, 1, 2]);
        }

        #[test]
        fn downmix_passthrough_when_narrow_enough() {
            let info = AudioInfo::new_raw(SampleFormat::I16, 48000, 2);

            let input = &[0, 1, 2, 3, 4, 5, 6, 7];
            assert_eq!(info.downmix_packed(input, 2), input.to_vec());
        }

        #[test]
        fn with_max_channels_never_zero() {
            let info = AudioInfo::new_raw(SampleFormat::F32, 48000, 1);
            assert_eq!(info.with_max_channels(0).channels, 1);
        }
    }

    mod video_info {
        use super::*;

        #[test]
        fn scaled_keeps_aspect_and_evenness() {
            let info = VideoInfo::new(PixelFormat::Bgra, 2560, 1440, 60);
            let scaled = info.scaled(1920, 30);

            assert_eq!(scaled.width, 1920);
            assert_eq!(scaled.height, 1080);
            assert_eq!(scaled.fps, 30);

            let odd = VideoInfo::new(PixelFormat::Bgra, 1919, 1079, 30).scaled(1801, 30);
            assert_eq!(odd.width % 2, 0);
            assert_eq!(odd.height % 2, 0);
        }

        #[test]
        fn frame_size_by_format() {
            assert_eq!(
                VideoInfo::new(PixelFormat::Bgra, 4, 2, 30).frame_size(),
                32
            );
            assert_eq!(
                VideoInfo::new(PixelFormat::Nv12, 4, 2, 30).frame_size(),
                12
            );
        }

        #[test]
        fn ensure_even_floor() {
            assert_eq!(ensure_even(1), 2);
            assert_eq!(ensure_even(7), 6);
            assert_eq!(ensure_even(8), 8);
        }
    }
}
