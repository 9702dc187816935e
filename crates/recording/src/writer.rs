use crate::frame::{AudioFrame, VideoFrame};
use reel_container::{ChunkWriter, ContainerHeader, TrackDesc, TrackKind};
use reel_media_info::{AudioInfo, VideoInfo};
use reel_timestamp::RationalTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of handing one sample to a writer input. Callers never inspect
/// writer internals; this is the whole back-pressure surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    NotReady,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Idle,
    Writing,
    Finished,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }
}

/// What a concrete writer is able to encode. Queried before settings are
/// derived so an unsupported codec request degrades instead of failing.
#[derive(Debug, Clone, Copy)]
pub struct WriterCaps {
    pub accepts_hevc: bool,
}

impl Default for WriterCaps {
    fn default() -> Self {
        Self { accepts_hevc: true }
    }
}

/// Inputs to video settings derivation, collected from the plan options.
#[derive(Debug, Clone)]
pub struct VideoEncodeOptions {
    pub use_hevc: bool,
    pub hdr: bool,
    pub target_bit_rate: Option<u32>,
    pub bpp_h264: f64,
    pub bpp_hevc: f64,
    pub min_bitrate: u32,
    pub max_bitrate: u32,
    pub fps_override: Option<u32>,
}

impl Default for VideoEncodeOptions {
    fn default() -> Self {
        Self {
            use_hevc: false,
            hdr: false,
            target_bit_rate: None,
            bpp_h264: 0.060,
            bpp_hevc: 0.035,
            min_bitrate: 1_000_000,
            max_bitrate: 40_000_000,
            fps_override: None,
        }
    }
}

/// HDR HEVC screen content rates poorly at HEVC's SDR bpp; parity runs
/// against the H.264 path flag >2x bitrate ratios otherwise.
const BPP_HEVC_HDR: f64 = 0.045;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoProfile {
    H264High,
    HevcMain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoEncodeSettings {
    pub codec: VideoCodec,
    pub profile: VideoProfile,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bit_rate: u32,
    /// Frames between forced keyframes (2 seconds worth).
    pub max_keyframe_interval: u32,
    pub allow_frame_reordering: bool,
    pub entropy_cabac: bool,
}

impl VideoEncodeSettings {
    pub fn derive(info: &VideoInfo, options: &VideoEncodeOptions, caps: WriterCaps) -> Self {
        let codec = if options.use_hevc && caps.accepts_hevc {
            VideoCodec::Hevc
        } else {
            VideoCodec::H264
        };

        let bpp = match codec {
            VideoCodec::H264 => options.bpp_h264,
            VideoCodec::Hevc if options.hdr => BPP_HEVC_HDR,
            VideoCodec::Hevc => options.bpp_hevc,
        };

        let fps = options.fps_override.unwrap_or(info.fps).max(1);
        let bit_rate = options.target_bit_rate.unwrap_or_else(|| {
            let raw = f64::from(info.width) * f64::from(info.height) * f64::from(fps) * bpp;
            (raw as u32).clamp(options.min_bitrate, options.max_bitrate)
        });

        Self {
            codec,
            profile: match codec {
                VideoCodec::H264 => VideoProfile::H264High,
                VideoCodec::Hevc => VideoProfile::HevcMain,
            },
            width: info.width,
            height: info.height,
            fps: info.fps,
            bit_rate,
            max_keyframe_interval: (info.fps * 2).max(1),
            allow_frame_reordering: true,
            entropy_cabac: codec == VideoCodec::H264,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncodeSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
}

impl AudioEncodeSettings {
    pub fn derive(info: &AudioInfo) -> Self {
        let sample_rate = if info.sample_rate == 0 {
            48_000
        } else {
            info.sample_rate
        };
        let channels = info.channels.clamp(1, 2);

        let mut bit_rate = if channels == 1 { 96_000 } else { 192_000 };
        if sample_rate < 32_000 {
            bit_rate /= 2;
        }

        Self {
            sample_rate,
            channels,
            bit_rate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub info: VideoInfo,
    pub settings: VideoEncodeSettings,
}

#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    pub info: AudioInfo,
    pub settings: AudioEncodeSettings,
}

/// Abstract sink for one output file. Implementations own the file handle;
/// the pipeline owns the call order: `setup`, `start_session` on the first
/// valid frame, appends, then exactly one of `finish`/`cancel`.
///
/// `append_*` take file-relative presentation times; all clock alignment
/// happens upstream in the pipeline.
pub trait ContainerWriter: Send + 'static {
    type Config: Send;

    fn caps(config: &Self::Config) -> WriterCaps;

    fn setup(
        config: Self::Config,
        output_path: PathBuf,
        video: Option<VideoTrackConfig>,
        audio: Option<AudioTrackConfig>,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send
    where
        Self: Sized;

    fn start_session(&mut self, origin: RationalTime) -> anyhow::Result<()>;

    fn video_ready(&self) -> bool;
    fn audio_ready(&self) -> bool;

    fn append_video(&mut self, frame: &VideoFrame, pts: RationalTime) -> AppendOutcome;
    fn append_audio(&mut self, frame: &AudioFrame, pts: RationalTime) -> AppendOutcome;

    fn status(&self) -> WriterStatus;
    fn video_codec(&self) -> Option<VideoCodec>;

    fn finish(&mut self) -> anyhow::Result<()>;
    fn cancel(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ChunkWriterConfig {
    pub caps: WriterCaps,
}

const VIDEO_TRACK: u8 = 0;
const AUDIO_TRACK: u8 = 1;

/// The in-tree `ContainerWriter`, backed by the chunked container format.
pub struct ChunkContainerWriter {
    inner: ChunkWriter,
    status: WriterStatus,
    video: Option<VideoEncodeSettings>,
    has_audio: bool,
    video_samples: u64,
}

impl ChunkContainerWriter {
    fn append(
        &mut self,
        track: u8,
        keyframe: bool,
        pts: RationalTime,
        duration: RationalTime,
        payload: &[u8],
    ) -> AppendOutcome {
        if self.status != WriterStatus::Writing {
            return AppendOutcome::NotReady;
        }

        match self.inner.append(track, keyframe, pts, duration, payload) {
            Ok(()) => AppendOutcome::Accepted,
            Err(e) => {
                tracing::error!("container append failed: {e}");
                self.status = WriterStatus::Failed;
                AppendOutcome::Failed
            }
        }
    }
}

impl ContainerWriter for ChunkContainerWriter {
    type Config = ChunkWriterConfig;

    fn caps(config: &Self::Config) -> WriterCaps {
        config.caps
    }

    async fn setup(
        _config: Self::Config,
        output_path: PathBuf,
        video: Option<VideoTrackConfig>,
        audio: Option<AudioTrackConfig>,
    ) -> anyhow::Result<Self> {
        let mut tracks = Vec::new();

        if let Some(video) = &video {
            tracks.push(TrackDesc {
                id: VIDEO_TRACK,
                kind: TrackKind::Video,
                codec: video.settings.codec.as_str().into(),
                width: Some(video.settings.width),
                height: Some(video.settings.height),
                fps: Some(video.settings.fps),
                sample_rate: None,
                channels: None,
                bit_rate: Some(video.settings.bit_rate),
            });
        }

        if let Some(audio) = &audio {
            tracks.push(TrackDesc {
                id: AUDIO_TRACK,
                kind: TrackKind::Audio,
                codec: "aac".into(),
                width: None,
                height: None,
                fps: None,
                sample_rate: Some(audio.settings.sample_rate),
                channels: Some(audio.settings.channels),
                bit_rate: Some(audio.settings.bit_rate),
            });
        }

        let inner = ChunkWriter::create(&output_path, ContainerHeader { tracks })?;

        Ok(Self {
            inner,
            status: WriterStatus::Idle,
            video: video.map(|v| v.settings),
            has_audio: audio.is_some(),
            video_samples: 0,
        })
    }

    fn start_session(&mut self, _origin: RationalTime) -> anyhow::Result<()> {
        if self.status == WriterStatus::Idle {
            self.status = WriterStatus::Writing;
        }
        Ok(())
    }

    fn video_ready(&self) -> bool {
        matches!(self.status, WriterStatus::Idle | WriterStatus::Writing)
    }

    fn audio_ready(&self) -> bool {
        self.has_audio && matches!(self.status, WriterStatus::Idle | WriterStatus::Writing)
    }

    fn append_video(&mut self, frame: &VideoFrame, pts: RationalTime) -> AppendOutcome {
        let keyframe_interval = self
            .video
            .map(|v| u64::from(v.max_keyframe_interval))
            .unwrap_or(1);
        let keyframe = self.video_samples % keyframe_interval.max(1) == 0;

        let outcome = self.append(VIDEO_TRACK, keyframe, pts, frame.duration, &frame.data);
        if outcome == AppendOutcome::Accepted {
            self.video_samples += 1;
        }
        outcome
    }

    fn append_audio(&mut self, frame: &AudioFrame, pts: RationalTime) -> AppendOutcome {
        if !self.has_audio {
            return AppendOutcome::Failed;
        }
        self.append(AUDIO_TRACK, true, pts, frame.duration, &frame.data)
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn video_codec(&self) -> Option<VideoCodec> {
        self.video.map(|v| v.codec)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        match self.status {
            WriterStatus::Finished | WriterStatus::Cancelled => return Ok(()),
            _ => {}
        }

        self.inner.finish()?;
        self.status = WriterStatus::Finished;
        Ok(())
    }

    fn cancel(&mut self) -> anyhow::Result<()> {
        match self.status {
            WriterStatus::Finished | WriterStatus::Cancelled => return Ok(()),
            _ => {}
        }

        self.inner.cancel()?;
        self.status = WriterStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media_info::{PixelFormat, SampleFormat};

    #[test]
    fn bitrate_is_clamped_to_bounds() {
        let info = VideoInfo::new(PixelFormat::Bgra, 200, 200, 60);
        let options = VideoEncodeOptions {
            min_bitrate: 2_000_000,
            max_bitrate: 8_000_000,
            ..Default::default()
        };

        // 200*200*60*0.06 = 144_000, below the floor.
        let settings = VideoEncodeSettings::derive(&info, &options, WriterCaps::default());
        assert_eq!(settings.codec, VideoCodec::H264);
        assert_eq!(settings.bit_rate, 2_000_000);

        let info = VideoInfo::new(PixelFormat::Bgra, 3840, 2160, 60);
        let settings = VideoEncodeSettings::derive(&info, &options, WriterCaps::default());
        assert_eq!(settings.bit_rate, 8_000_000);
    }

    #[test]
    fn hevc_degrades_silently_without_support() {
        let info = VideoInfo::new(PixelFormat::Bgra, 1920, 1080, 60);
        let options = VideoEncodeOptions {
            use_hevc: true,
            ..Default::default()
        };

        let settings =
            VideoEncodeSettings::derive(&info, &options, WriterCaps { accepts_hevc: false });
        assert_eq!(settings.codec, VideoCodec::H264);
        assert_eq!(settings.profile, VideoProfile::H264High);
        assert!(settings.entropy_cabac);

        let settings = VideoEncodeSettings::derive(&info, &options, WriterCaps::default());
        assert_eq!(settings.codec, VideoCodec::Hevc);
        assert_eq!(settings.profile, VideoProfile::HevcMain);
    }

    #[test]
    fn hdr_hevc_uses_conservative_bpp() {
        let info = VideoInfo::new(PixelFormat::P010, 1920, 1080, 30);
        let sdr = VideoEncodeOptions {
            use_hevc: true,
            ..Default::default()
        };
        let hdr = VideoEncodeOptions {
            use_hevc: true,
            hdr: true,
            ..sdr.clone()
        };

        let sdr_rate =
            VideoEncodeSettings::derive(&info, &sdr, WriterCaps::default()).bit_rate as f64;
        let hdr_rate =
            VideoEncodeSettings::derive(&info, &hdr, WriterCaps::default()).bit_rate as f64;

        assert!(hdr_rate > sdr_rate);
        assert!(hdr_rate / sdr_rate < 2.0);
    }

    #[test]
    fn explicit_target_bitrate_wins() {
        let info = VideoInfo::new(PixelFormat::Bgra, 1920, 1080, 60);
        let options = VideoEncodeOptions {
            target_bit_rate: Some(5_000_000),
            ..Default::default()
        };

        let settings = VideoEncodeSettings::derive(&info, &options, WriterCaps::default());
        assert_eq!(settings.bit_rate, 5_000_000);
    }

    #[test]
    fn audio_settings_fall_back_and_downmix() {
        let silent = AudioInfo::new_raw(SampleFormat::F32, 0, 6);
        let settings = AudioEncodeSettings::derive(&silent);
        assert_eq!(settings.sample_rate, 48_000);
        assert_eq!(settings.channels, 2);
        assert_eq!(settings.bit_rate, 192_000);

        let mono = AudioInfo::new_raw(SampleFormat::I16, 16_000, 1);
        let settings = AudioEncodeSettings::derive(&mono);
        assert_eq!(settings.bit_rate, 48_000);
    }

    #[test]
    fn keyframe_interval_is_two_seconds() {
        let info = VideoInfo::new(PixelFormat::Bgra, 640, 480, 24);
        let settings =
            VideoEncodeSettings::derive(&info, &VideoEncodeOptions::default(), WriterCaps::default());

        assert_eq!(settings.max_keyframe_interval, 48);
    }
}
