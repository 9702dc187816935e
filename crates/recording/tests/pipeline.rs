use futures::SinkExt;
use reel_recording::{
    AppendOutcome, WriterCaps, WriterStatus,
    diagnostics::Diagnostics,
    frame::VideoFrame,
    output_pipeline::{ChannelVideoSource, ChannelVideoSourceConfig, OutputPipeline},
    writer::{
        AudioTrackConfig, ChunkContainerWriter, ChunkWriterConfig, ContainerWriter,
        VideoCodec, VideoEncodeOptions, VideoTrackConfig,
    },
};
use reel_media_info::{PixelFormat, VideoInfo};
use reel_timestamp::{RationalTime, Timestamp};
use std::{path::PathBuf, sync::Arc, time::Duration};

fn test_info() -> VideoInfo {
    VideoInfo::new(PixelFormat::Bgra, 32, 32, 30)
}

fn test_frame(index: i64) -> VideoFrame {
    let info = test_info();
    VideoFrame {
        data: vec![0u8; info.frame_size()],
        info,
        pts: RationalTime::from_micros(index * 33_333),
        duration: RationalTime::from_micros(33_333),
        timestamp: Timestamp::now(),
    }
}

#[tokio::test]
async fn stopping_without_frames_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.mov");

    let (tx, rx) = futures::channel::mpsc::channel::<VideoFrame>(8);

    let pipeline = OutputPipeline::builder(path.clone())
        .with_diagnostics(Arc::new(Diagnostics::new()))
        .with_video::<ChannelVideoSource>(
            ChannelVideoSourceConfig {
                info: test_info(),
                rx,
            },
            VideoEncodeOptions::default(),
        )
        .build::<ChunkContainerWriter>(ChunkWriterConfig::default())
        .await
        .unwrap();

    assert!(path.exists(), "writer opens the file at prepare");

    drop(tx);
    let finished = pipeline.stop().await;

    assert!(finished.first_timestamp.is_none());
    assert!(!path.exists(), "cancelled writer must remove the file");
    assert!(finished.error.is_none());
}

#[tokio::test]
async fn frames_flow_through_to_a_finalized_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.mov");

    let (mut tx, rx) = futures::channel::mpsc::channel(8);

    let pipeline = OutputPipeline::builder(path.clone())
        .with_diagnostics(Arc::new(Diagnostics::new()))
        .with_video::<ChannelVideoSource>(
            ChannelVideoSourceConfig {
                info: test_info(),
                rx,
            },
            VideoEncodeOptions::default(),
        )
        .build::<ChunkContainerWriter>(ChunkWriterConfig::default())
        .await
        .unwrap();

    for i in 0..10 {
        tx.send(test_frame(i)).await.unwrap();
    }
    drop(tx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let finished = pipeline.stop().await;

    assert!(finished.first_timestamp.is_some());
    assert!(finished.error.is_none());
    // Ten appends plus the keepalive duplicated from the last frame.
    assert_eq!(finished.stats.appended_video, 10);

    let mut reader = reel_container::ChunkReader::open(&path).unwrap();
    let counts = reader.drain_counts().unwrap();
    assert_eq!(counts[0].1, 11);

    let trailer = reader.trailer().unwrap();
    let video = trailer.track(0).unwrap();
    assert!(video.first_pts_secs.unwrap() <= video.last_pts_secs.unwrap());
    assert!(trailer.duration_secs > 0.0);
}

/// Writer whose video input is only intermittently ready.
struct FlakyWriter {
    appended: u64,
}

struct FlakyConfig;

impl ContainerWriter for FlakyWriter {
    type Config = FlakyConfig;

    fn caps(_: &Self::Config) -> WriterCaps {
        WriterCaps::default()
    }

    async fn setup(
        _: Self::Config,
        _: PathBuf,
        _: Option<VideoTrackConfig>,
        _: Option<AudioTrackConfig>,
    ) -> anyhow::Result<Self> {
        Ok(Self { appended: 0 })
    }

    fn start_session(&mut self, _: RationalTime) -> anyhow::Result<()> {
        Ok(())
    }

    fn video_ready(&self) -> bool {
        self.appended % 2 == 0
    }

    fn audio_ready(&self) -> bool {
        false
    }

    fn append_video(
        &mut self,
        _: &VideoFrame,
        _: RationalTime,
    ) -> AppendOutcome {
        self.appended += 1;
        AppendOutcome::Accepted
    }

    fn append_audio(
        &mut self,
        _: &reel_recording::frame::AudioFrame,
        _: RationalTime,
    ) -> AppendOutcome {
        AppendOutcome::NotReady
    }

    fn status(&self) -> WriterStatus {
        WriterStatus::Writing
    }

    fn video_codec(&self) -> Option<VideoCodec> {
        Some(VideoCodec::H264)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn cancel(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn not_ready_frames_are_counted_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let diagnostics = Arc::new(Diagnostics::new());

    let (mut tx, rx) = futures::channel::mpsc::channel(32);

    let pipeline = OutputPipeline::builder(dir.path().join("flaky.mov"))
        .with_diagnostics(diagnostics.clone())
        .with_video::<ChannelVideoSource>(
            ChannelVideoSourceConfig {
                info: test_info(),
                rx,
            },
            VideoEncodeOptions::default(),
        )
        .build::<FlakyWriter>(FlakyConfig)
        .await
        .unwrap();

    for i in 0..20 {
        tx.send(test_frame(i)).await.unwrap();
    }
    drop(tx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let finished = pipeline.stop().await;

    assert!(finished.error.is_none());
    assert!(finished.stats.dropped_video_not_ready > 0);
    assert!(
        finished.stats.appended_video + finished.stats.dropped_video_not_ready <= 20,
        "dropped frames are not retried"
    );

    let snapshot = diagnostics.snapshot();
    assert_eq!(
        snapshot.dropped_video_not_ready,
        finished.stats.dropped_video_not_ready
    );
}

/// Writer that dies after a few samples.
struct DyingWriter {
    appended: u64,
    failed: bool,
}

struct DyingConfig;

impl ContainerWriter for DyingWriter {
    type Config = DyingConfig;

    fn caps(_: &Self::Config) -> WriterCaps {
        WriterCaps::default()
    }

    async fn setup(
        _: Self::Config,
        _: PathBuf,
        _: Option<VideoTrackConfig>,
        _: Option<AudioTrackConfig>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            appended: 0,
            failed: false,
        })
    }

    fn start_session(&mut self, _: RationalTime) -> anyhow::Result<()> {
        Ok(())
    }

    fn video_ready(&self) -> bool {
        true
    }

    fn audio_ready(&self) -> bool {
        false
    }

    fn append_video(
        &mut self,
        _: &VideoFrame,
        _: RationalTime,
    ) -> AppendOutcome {
        if self.appended >= 3 {
            self.failed = true;
            return AppendOutcome::Failed;
        }
        self.appended += 1;
        AppendOutcome::Accepted
    }

    fn append_audio(
        &mut self,
        _: &reel_recording::frame::AudioFrame,
        _: RationalTime,
    ) -> AppendOutcome {
        AppendOutcome::Failed
    }

    fn status(&self) -> WriterStatus {
        if self.failed {
            WriterStatus::Failed
        } else {
            WriterStatus::Writing
        }
    }

    fn video_codec(&self) -> Option<VideoCodec> {
        Some(VideoCodec::H264)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn cancel(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn writer_failure_surfaces_once_and_stops_accepting() {
    let dir = tempfile::tempdir().unwrap();
    let diagnostics = Arc::new(Diagnostics::new());

    let (mut tx, rx) = futures::channel::mpsc::channel(32);

    let pipeline = OutputPipeline::builder(dir.path().join("dying.mov"))
        .with_diagnostics(diagnostics.clone())
        .with_video::<ChannelVideoSource>(
            ChannelVideoSourceConfig {
                info: test_info(),
                rx,
            },
            VideoEncodeOptions::default(),
        )
        .build::<DyingWriter>(DyingConfig)
        .await
        .unwrap();

    let done = pipeline.done_fut();

    for i in 0..10 {
        if tx.send(test_frame(i)).await.is_err() {
            break;
        }
    }
    drop(tx);

    let error = done.await.expect_err("writer failure must fail the pipeline");
    let typed = error.to_recording_error("screen");
    assert!(matches!(
        typed,
        reel_recording::RecordingError::WriterAppendFailed(_)
    ));

    let finished = pipeline.stop().await;
    assert!(finished.error.is_some());
    assert_eq!(finished.stats.appended_video, 3);

    let snapshot = diagnostics.snapshot();
    assert_eq!(snapshot.writer_video_failed_count, 1);
    assert_eq!(snapshot.last_video_writer_status, Some(WriterStatus::Failed));
}
