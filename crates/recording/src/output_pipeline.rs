use crate::{
    diagnostics::Diagnostics,
    frame::{AudioFrame, VideoFrame, duration_of},
    writer::{
        AppendOutcome, AudioEncodeSettings, AudioTrackConfig, ContainerWriter, VideoCodec,
        VideoEncodeOptions, VideoEncodeSettings, VideoTrackConfig, WriterStatus,
    },
};
use anyhow::{Context, anyhow};
use futures::{
    FutureExt, StreamExt,
    channel::{mpsc, oneshot},
    future::{BoxFuture, Shared},
    lock::Mutex,
    stream::FuturesUnordered,
};
use reel_media_info::VideoInfo;
use reel_timestamp::{RationalTime, Timestamp};
use std::{
    any::Any,
    future,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::*;

pub struct OnceSender<T>(Option<oneshot::Sender<T>>);

impl<T> OnceSender<T> {
    pub fn send(&mut self, v: T) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(v);
        }
    }

    /// Drops the sender without firing, resolving the receiver to `None`.
    pub fn dismiss(&mut self) {
        self.0.take();
    }
}

/// Holds frame delivery closed until the orchestrator's `start`. Sources
/// await (or poll) the gate before producing.
#[derive(Clone)]
pub struct StartGate(watch::Receiver<bool>);

impl StartGate {
    pub fn already_open() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self(rx)
    }

    pub fn is_open(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when the session starts. Returns `false` if the signal was
    /// dropped without ever opening; the source must not produce frames.
    pub async fn wait(&mut self) -> bool {
        loop {
            if *self.0.borrow() {
                return true;
            }
            if self.0.changed().await.is_err() {
                return *self.0.borrow();
            }
        }
    }
}

#[derive(Default)]
pub struct StartSignal(Option<watch::Sender<bool>>);

impl StartSignal {
    pub fn new() -> Self {
        Self(Some(watch::channel(false).0))
    }

    pub fn gate(&self) -> StartGate {
        match &self.0 {
            Some(tx) => StartGate(tx.subscribe()),
            None => StartGate::already_open(),
        }
    }

    pub fn open(&self) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(true);
        }
    }
}

pub struct TaskPool(Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>);

impl TaskPool {
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.0.push((
            name,
            tokio::spawn(future.instrument(error_span!("", name)).in_current_span()),
        ));
    }
}

pub struct SetupCtx {
    tasks: TaskPool,
    start_gate: StartGate,
    diagnostics: Arc<Diagnostics>,
    stop_token: CancellationToken,
}

impl SetupCtx {
    pub fn tasks(&mut self) -> &mut TaskPool {
        &mut self.tasks
    }

    pub fn start_gate(&self) -> StartGate {
        self.start_gate.clone()
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.child_token()
    }
}

pub trait VideoSource: Send + 'static {
    type Config;

    fn setup(
        config: Self::Config,
        video_tx: mpsc::Sender<VideoFrame>,
        ctx: &mut SetupCtx,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send
    where
        Self: Sized;

    fn video_info(&self) -> VideoInfo;

    fn start(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

pub trait AudioSource: Send + 'static {
    type Config: Send;

    fn setup(
        config: Self::Config,
        tx: mpsc::Sender<AudioFrame>,
        ctx: &mut SetupCtx,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send + 'static
    where
        Self: Sized;

    fn audio_info(&self) -> reel_media_info::AudioInfo;

    fn start(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    fn stop(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }
}

struct ErasedAudioSource {
    inner: Box<dyn Any + Send>,
    audio_info: reel_media_info::AudioInfo,
    start_fn: fn(&mut dyn Any) -> BoxFuture<'_, anyhow::Result<()>>,
    stop_fn: fn(&mut dyn Any) -> BoxFuture<'_, anyhow::Result<()>>,
}

impl ErasedAudioSource {
    pub fn new<TAudio: AudioSource>(source: TAudio) -> Self {
        Self {
            audio_info: source.audio_info(),
            start_fn: |raw| {
                raw.downcast_mut::<TAudio>()
                    .expect("Wrong type")
                    .start()
                    .boxed()
            },
            stop_fn: |raw| {
                raw.downcast_mut::<TAudio>()
                    .expect("Wrong type")
                    .stop()
                    .boxed()
            },
            inner: Box::new(source),
        }
    }
}

type AudioSourceSetupFn = Box<
    dyn FnOnce(
            mpsc::Sender<AudioFrame>,
            &mut SetupCtx,
        ) -> BoxFuture<'static, anyhow::Result<ErasedAudioSource>>
        + Send,
>;

/// Forwards frames from an external channel; used when a feed outlives any
/// single pipeline.
pub struct ChannelVideoSource(VideoInfo);

pub struct ChannelVideoSourceConfig {
    pub info: VideoInfo,
    pub rx: mpsc::Receiver<VideoFrame>,
}

impl VideoSource for ChannelVideoSource {
    type Config = ChannelVideoSourceConfig;

    async fn setup(
        mut config: Self::Config,
        mut video_tx: mpsc::Sender<VideoFrame>,
        _: &mut SetupCtx,
    ) -> anyhow::Result<Self> {
        tokio::spawn(async move {
            use futures::SinkExt;
            while let Some(frame) = config.rx.next().await {
                let _ = video_tx.send(frame).await;
            }
        });

        Ok(Self(config.info))
    }

    fn video_info(&self) -> VideoInfo {
        self.0
    }
}

pub struct ChannelAudioSource(reel_media_info::AudioInfo);

pub struct ChannelAudioSourceConfig {
    pub info: reel_media_info::AudioInfo,
    pub rx: mpsc::Receiver<AudioFrame>,
}

impl AudioSource for ChannelAudioSource {
    type Config = ChannelAudioSourceConfig;

    fn setup(
        mut config: Self::Config,
        mut tx: mpsc::Sender<AudioFrame>,
        _: &mut SetupCtx,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send + 'static {
        tokio::spawn(async move {
            use futures::SinkExt;
            while let Some(frame) = config.rx.next().await {
                let _ = tx.send(frame).await;
            }
        });

        async move { Ok(Self(config.info)) }
    }

    fn audio_info(&self) -> reel_media_info::AudioInfo {
        self.0
    }
}

/// Append-path state shared between the writer loops and the owner.
pub struct PipelineShared {
    accepting: AtomicBool,
    paused: AtomicBool,
    started: AtomicBool,
    appended_video: AtomicU64,
    appended_audio: AtomicU64,
    dropped_video_not_ready: AtomicU64,
    dropped_audio_not_ready: AtomicU64,
    last_frame_end: parking_lot::Mutex<Option<Timestamp>>,
}

impl PipelineShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            accepting: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            started: AtomicBool::new(false),
            appended_video: AtomicU64::new(0),
            appended_audio: AtomicU64::new(0),
            dropped_video_not_ready: AtomicU64::new(0),
            dropped_audio_not_ready: AtomicU64::new(0),
            last_frame_end: parking_lot::Mutex::new(None),
        })
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn session_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn set_last_end(&self, timestamp: Timestamp) {
        *self.last_frame_end.lock() = Some(timestamp);
    }

    fn last_end(&self) -> Option<Timestamp> {
        *self.last_frame_end.lock()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            appended_video: self.appended_video.load(Ordering::Relaxed),
            appended_audio: self.appended_audio.load(Ordering::Relaxed),
            dropped_video_not_ready: self.dropped_video_not_ready.load(Ordering::Relaxed),
            dropped_audio_not_ready: self.dropped_audio_not_ready.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub appended_video: u64,
    pub appended_audio: u64,
    pub dropped_video_not_ready: u64,
    pub dropped_audio_not_ready: u64,
}

struct SessionState {
    origin: RationalTime,
    video_origin: Option<RationalTime>,
    /// First audio PTS minus the video origin; subtracted from every audio
    /// PTS so a foreign audio clock cannot stretch the muxed timeline.
    audio_offset: Option<RationalTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FinalizeOutcome {
    Completed,
    Cancelled,
}

const KEEPALIVE_FALLBACK_DURATION: RationalTime = RationalTime::new(16_667, RationalTime::MICROS);

/// Everything the append hot path touches, behind one async mutex: the
/// writer, session origin, and keepalive bookkeeping. `finish` and the
/// appends are mutually exclusive by construction.
struct WriterHot<TW> {
    writer: TW,
    has_video: bool,
    shared: Arc<PipelineShared>,
    diagnostics: Arc<Diagnostics>,
    first_tx: OnceSender<Timestamp>,
    session: Option<SessionState>,
    last_video: Option<(VideoFrame, RationalTime)>,
    video_error_signaled: bool,
    audio_error_signaled: bool,
    finalized: Option<FinalizeOutcome>,
}

impl<TW: ContainerWriter> WriterHot<TW> {
    fn new(
        writer: TW,
        has_video: bool,
        shared: Arc<PipelineShared>,
        diagnostics: Arc<Diagnostics>,
        first_tx: oneshot::Sender<Timestamp>,
    ) -> Self {
        Self {
            writer,
            has_video,
            shared,
            diagnostics,
            first_tx: OnceSender(Some(first_tx)),
            session: None,
            last_video: None,
            video_error_signaled: false,
            audio_error_signaled: false,
            finalized: None,
        }
    }

    fn start_session(&mut self, frame_pts: RationalTime, video: bool) -> anyhow::Result<()> {
        self.writer.start_session(frame_pts)?;
        self.session = Some(SessionState {
            origin: frame_pts,
            video_origin: video.then_some(frame_pts),
            audio_offset: None,
        });
        self.shared.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn append_video(&mut self, frame: VideoFrame) -> anyhow::Result<()> {
        if !self.shared.is_accepting() || self.shared.paused.load(Ordering::Relaxed) {
            return Ok(());
        }

        if self.session.is_none() {
            self.start_session(frame.pts, true).context("start session")?;
            self.first_tx.send(frame.timestamp);
        }

        let ready = self.writer.video_ready();
        self.diagnostics.set_video_ready_for_more(ready);
        self.diagnostics.set_video_writer_status(self.writer.status());

        if !ready {
            self.shared
                .dropped_video_not_ready
                .fetch_add(1, Ordering::Relaxed);
            self.diagnostics.video_dropped_not_ready();
            return Ok(());
        }

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let file_pts = frame.pts.sub(session.origin);

        match self.writer.append_video(&frame, file_pts) {
            AppendOutcome::Accepted => {
                self.shared.appended_video.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.video_appended();
                self.shared.set_last_end(frame.end_timestamp());
                self.last_video = Some((frame, file_pts));
            }
            AppendOutcome::NotReady => {
                self.shared
                    .dropped_video_not_ready
                    .fetch_add(1, Ordering::Relaxed);
                self.diagnostics.video_dropped_not_ready();
            }
            AppendOutcome::Failed => {
                self.diagnostics.video_writer_failed();
                self.diagnostics.set_video_writer_status(self.writer.status());
                self.shared.set_accepting(false);
                if !self.video_error_signaled {
                    self.video_error_signaled = true;
                    self.diagnostics.log_error("video writer entered failed state");
                    return Err(anyhow!("video writer entered failed state"));
                }
            }
        }

        Ok(())
    }

    fn append_audio(&mut self, frame: AudioFrame) -> anyhow::Result<()> {
        if !self.shared.is_accepting() || self.shared.paused.load(Ordering::Relaxed) {
            return Ok(());
        }

        if self.session.is_none() {
            if self.has_video {
                // Audio leads video; nothing to align against yet.
                return Ok(());
            }
            self.start_session(frame.pts, false).context("start session")?;
            self.first_tx.send(frame.timestamp);
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let offset = match session.audio_offset {
            Some(offset) => offset,
            None => {
                let reference = session.video_origin.unwrap_or(session.origin);
                let offset = frame.pts.sub(reference);
                session.audio_offset = Some(offset);
                offset
            }
        };

        let file_pts = frame.pts.sub(offset).sub(session.origin);

        let ready = self.writer.audio_ready();
        self.diagnostics.set_audio_writer_status(self.writer.status());

        if !ready {
            self.shared
                .dropped_audio_not_ready
                .fetch_add(1, Ordering::Relaxed);
            self.diagnostics.audio_dropped_not_ready();
            return Ok(());
        }

        match self.writer.append_audio(&frame, file_pts) {
            AppendOutcome::Accepted => {
                self.shared.appended_audio.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.audio_appended();
                self.shared.set_last_end(frame.end_timestamp());
            }
            AppendOutcome::NotReady => {
                self.shared
                    .dropped_audio_not_ready
                    .fetch_add(1, Ordering::Relaxed);
                self.diagnostics.audio_dropped_not_ready();
            }
            AppendOutcome::Failed => {
                self.diagnostics.audio_writer_failed();
                self.diagnostics.set_audio_writer_status(self.writer.status());
                self.shared.set_accepting(false);
                if !self.audio_error_signaled {
                    self.audio_error_signaled = true;
                    self.diagnostics.log_error("audio writer entered failed state");
                    return Err(anyhow!("audio writer entered failed state"));
                }
            }
        }

        Ok(())
    }

    /// Idempotent. Without a started session the writer is cancelled and no
    /// file remains; otherwise a keepalive frame extends the timeline to the
    /// stop instant before the writer completes.
    fn finalize(&mut self) -> anyhow::Result<FinalizeOutcome> {
        if let Some(outcome) = self.finalized {
            return Ok(outcome);
        }

        self.first_tx.dismiss();

        if self.session.is_none() {
            let result = self.writer.cancel();
            self.finalized = Some(FinalizeOutcome::Cancelled);
            self.diagnostics.set_video_writer_status(self.writer.status());
            result.context("cancel writer")?;
            return Ok(FinalizeOutcome::Cancelled);
        }

        if let Some((frame, last_pts)) = self.last_video.take() {
            if self.writer.video_ready() && self.writer.status() == WriterStatus::Writing {
                let duration = if frame.duration.value > 0 {
                    frame.duration
                } else {
                    KEEPALIVE_FALLBACK_DURATION
                };
                let keepalive_pts = last_pts.add(duration);
                let end = frame.end_timestamp() + duration_of(duration);

                // Best effort; a stalled input just skips it.
                if self.writer.append_video(&frame, keepalive_pts) == AppendOutcome::Accepted {
                    self.shared.set_last_end(end);
                    trace!("appended keepalive frame at {:?}", keepalive_pts);
                }
            }
        }

        let result = self.writer.finish();
        self.finalized = Some(FinalizeOutcome::Completed);
        self.diagnostics.set_video_writer_status(self.writer.status());
        result.context("finish writer")?;
        Ok(FinalizeOutcome::Completed)
    }

}

pub type DoneFut = Shared<BoxFuture<'static, Result<(), PipelineDoneError>>>;
pub type FirstFrameFut = Shared<BoxFuture<'static, Option<Timestamp>>>;

#[derive(Clone, Debug)]
pub struct PipelineDoneError(Arc<anyhow::Error>);

impl std::fmt::Display for PipelineDoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PipelineDoneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().source()
    }
}

impl PipelineDoneError {
    /// Recovers the typed error a source or writer raised; anything opaque
    /// is reported as a writer append failure on this pipeline.
    pub fn to_recording_error(&self, label: &str) -> crate::RecordingError {
        for cause in self.0.chain() {
            if let Some(error) = cause.downcast_ref::<crate::RecordingError>() {
                return error.clone();
            }
        }

        crate::RecordingError::WriterAppendFailed(format!("{label}: {self}"))
    }
}

pub struct OutputPipeline {
    path: PathBuf,
    first_frame: FirstFrameFut,
    stop_token: Option<DropGuard>,
    video_info: Option<VideoInfo>,
    video_codec: Option<VideoCodec>,
    audio_settings: Option<AudioEncodeSettings>,
    done_fut: DoneFut,
    shared: Arc<PipelineShared>,
}

/// Terminal view of a pipeline after `stop`. `first_timestamp` is `None`
/// when no frame ever arrived, in which case the file was removed.
pub struct FinishedOutputPipeline {
    pub path: PathBuf,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
    pub video_info: Option<VideoInfo>,
    pub video_codec: Option<VideoCodec>,
    pub audio_settings: Option<AudioEncodeSettings>,
    pub stats: PipelineStats,
    pub error: Option<PipelineDoneError>,
}

impl OutputPipeline {
    pub fn builder(path: PathBuf) -> OutputPipelineBuilder<NoVideo> {
        OutputPipelineBuilder {
            path,
            video: NoVideo,
            audio_sources: vec![],
            diagnostics: Diagnostics::global(),
            start_gate: StartGate::already_open(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn video_info(&self) -> Option<VideoInfo> {
        self.video_info
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video_codec
    }

    pub fn has_audio(&self) -> bool {
        self.audio_settings.is_some()
    }

    pub fn audio_settings(&self) -> Option<AudioEncodeSettings> {
        self.audio_settings
    }

    pub fn done_fut(&self) -> DoneFut {
        self.done_fut.clone()
    }

    pub fn first_frame_fut(&self) -> FirstFrameFut {
        self.first_frame.clone()
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.shared.set_accepting(accepting);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    pub async fn stop(mut self) -> FinishedOutputPipeline {
        self.shared.set_accepting(false);
        drop(self.stop_token.take());

        let error = self.done_fut.clone().await.err();
        let first_timestamp = self.first_frame.clone().await;

        FinishedOutputPipeline {
            path: self.path,
            first_timestamp,
            last_timestamp: self.shared.last_end(),
            video_info: self.video_info,
            video_codec: self.video_codec,
            audio_settings: self.audio_settings,
            stats: self.shared.stats(),
            error,
        }
    }
}

pub struct NoVideo;

pub struct HasVideo<TVideo: VideoSource> {
    config: TVideo::Config,
    encode: VideoEncodeOptions,
}

pub struct OutputPipelineBuilder<TVideo> {
    path: PathBuf,
    video: TVideo,
    audio_sources: Vec<AudioSourceSetupFn>,
    diagnostics: Arc<Diagnostics>,
    start_gate: StartGate,
}

impl<THasVideo> OutputPipelineBuilder<THasVideo> {
    pub fn with_audio_source<TAudio: AudioSource>(mut self, config: TAudio::Config) -> Self {
        self.audio_sources.push(Box::new(move |tx, ctx| {
            TAudio::setup(config, tx, ctx)
                .map(|v| v.map(ErasedAudioSource::new))
                .boxed()
        }));

        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_start_gate(mut self, start_gate: StartGate) -> Self {
        self.start_gate = start_gate;
        self
    }
}

impl OutputPipelineBuilder<NoVideo> {
    pub fn with_video<TVideo: VideoSource>(
        self,
        config: TVideo::Config,
        encode: VideoEncodeOptions,
    ) -> OutputPipelineBuilder<HasVideo<TVideo>> {
        OutputPipelineBuilder {
            path: self.path,
            video: HasVideo { config, encode },
            audio_sources: self.audio_sources,
            diagnostics: self.diagnostics,
            start_gate: self.start_gate,
        }
    }

    pub async fn build<TW: ContainerWriter>(
        self,
        writer_config: TW::Config,
    ) -> anyhow::Result<OutputPipeline> {
        let Self {
            path,
            audio_sources,
            diagnostics,
            start_gate,
            ..
        } = self;

        if audio_sources.is_empty() {
            return Err(anyhow!("Invariant: No audio sources"));
        }

        let (mut setup_ctx, stop_token, done_tx, done_rx, shared) =
            setup_build(diagnostics.clone(), start_gate);

        let audio = setup_audio_sources(audio_sources, &mut setup_ctx)
            .await?
            .ok_or_else(|| anyhow!("Invariant: No audio sources"))?;
        let audio_settings = audio.track.settings;

        let (first_tx, first_rx) = oneshot::channel();

        let writer = TW::setup(writer_config, path.clone(), None, Some(audio.track.clone()))
            .await
            .context("writer setup")?;
        let hot = Arc::new(Mutex::new(WriterHot::new(
            writer,
            false,
            shared.clone(),
            diagnostics.clone(),
            first_tx,
        )));

        spawn_audio_writer(&mut setup_ctx, audio.sources, audio.rx, stop_token.clone(), &hot);

        finish_build(setup_ctx, hot, done_tx, &path);

        Ok(OutputPipeline {
            path,
            first_frame: first_rx.map(|r| r.ok()).boxed().shared(),
            stop_token: Some(stop_token.drop_guard()),
            video_info: None,
            video_codec: None,
            audio_settings: Some(audio_settings),
            done_fut: done_rx,
            shared,
        })
    }
}

impl<TVideo: VideoSource> OutputPipelineBuilder<HasVideo<TVideo>> {
    pub async fn build<TW: ContainerWriter>(
        self,
        writer_config: TW::Config,
    ) -> anyhow::Result<OutputPipeline> {
        let Self {
            path,
            video,
            audio_sources,
            diagnostics,
            start_gate,
        } = self;

        let (mut setup_ctx, stop_token, done_tx, done_rx, shared) =
            setup_build(diagnostics.clone(), start_gate);

        let (video_tx, video_rx) = mpsc::channel(8);
        let video_source = TVideo::setup(video.config, video_tx, &mut setup_ctx)
            .await
            .context("video source setup")?;
        let video_info = video_source.video_info();

        let settings =
            VideoEncodeSettings::derive(&video_info, &video.encode, TW::caps(&writer_config));

        let audio = setup_audio_sources(audio_sources, &mut setup_ctx).await?;
        let audio_settings = audio.as_ref().map(|a| a.track.settings);

        let (first_tx, first_rx) = oneshot::channel();

        let writer = TW::setup(
            writer_config,
            path.clone(),
            Some(VideoTrackConfig {
                info: video_info,
                settings,
            }),
            audio.as_ref().map(|a| a.track.clone()),
        )
        .await
        .context("writer setup")?;

        let video_codec = writer.video_codec();
        let hot = Arc::new(Mutex::new(WriterHot::new(
            writer,
            true,
            shared.clone(),
            diagnostics.clone(),
            first_tx,
        )));

        spawn_video_writer(&mut setup_ctx, video_source, video_rx, stop_token.clone(), &hot);

        if let Some(audio) = audio {
            spawn_audio_writer(&mut setup_ctx, audio.sources, audio.rx, stop_token.clone(), &hot);
        }

        finish_build(setup_ctx, hot, done_tx, &path);

        Ok(OutputPipeline {
            path,
            first_frame: first_rx.map(|r| r.ok()).boxed().shared(),
            stop_token: Some(stop_token.drop_guard()),
            video_info: Some(video_info),
            video_codec,
            audio_settings,
            done_fut: done_rx,
            shared,
        })
    }
}

fn setup_build(
    diagnostics: Arc<Diagnostics>,
    start_gate: StartGate,
) -> (
    SetupCtx,
    CancellationToken,
    oneshot::Sender<anyhow::Result<()>>,
    DoneFut,
    Arc<PipelineShared>,
) {
    let stop_token = CancellationToken::new();

    let (done_tx, done_rx) = oneshot::channel();

    (
        SetupCtx {
            tasks: TaskPool(vec![]),
            start_gate,
            diagnostics,
            stop_token: stop_token.clone(),
        },
        stop_token,
        done_tx,
        done_rx
            .map(|v| {
                v.map_err(anyhow::Error::from)
                    .and_then(|v| v)
                    .map_err(|e| PipelineDoneError(Arc::new(e)))
            })
            .boxed()
            .shared(),
        PipelineShared::new(),
    )
}

struct AudioSetup {
    track: AudioTrackConfig,
    rx: mpsc::Receiver<AudioFrame>,
    sources: Vec<ErasedAudioSource>,
}

async fn setup_audio_sources(
    audio_sources: Vec<AudioSourceSetupFn>,
    setup_ctx: &mut SetupCtx,
) -> anyhow::Result<Option<AudioSetup>> {
    if audio_sources.is_empty() {
        return Ok(None);
    }

    let (tx, rx) = mpsc::channel(64);

    let mut sources = vec![];
    for audio_source_setup in audio_sources {
        let source = (audio_source_setup)(tx.clone(), setup_ctx)
            .await
            .context("audio source setup")?;
        sources.push(source);
    }
    drop(tx);

    // All sources mux into one track; the first one defines its shape.
    let info = sources[0].audio_info;
    setup_ctx.diagnostics.set_audio_sample_rate(info.sample_rate);

    Ok(Some(AudioSetup {
        track: AudioTrackConfig {
            info,
            settings: AudioEncodeSettings::derive(&info),
        },
        rx,
        sources,
    }))
}

fn spawn_video_writer<TW: ContainerWriter, TVideo: VideoSource>(
    setup_ctx: &mut SetupCtx,
    mut video_source: TVideo,
    mut video_rx: mpsc::Receiver<VideoFrame>,
    stop_token: CancellationToken,
    hot: &Arc<Mutex<WriterHot<TW>>>,
) {
    let hot = hot.clone();

    setup_ctx.tasks().spawn("mux-video", async move {
        video_source.start().await?;

        let result = stop_token
            .run_until_cancelled(async {
                while let Some(frame) = video_rx.next().await {
                    hot.lock().await.append_video(frame)?;
                }

                Ok::<(), anyhow::Error>(())
            })
            .await;

        video_source.stop().await?;

        if let Some(result) = result {
            result?;
        }

        trace!("video writer loop finished");

        Ok(())
    });
}

fn spawn_audio_writer<TW: ContainerWriter>(
    setup_ctx: &mut SetupCtx,
    mut sources: Vec<ErasedAudioSource>,
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    stop_token: CancellationToken,
    hot: &Arc<Mutex<WriterHot<TW>>>,
) {
    let hot = hot.clone();

    setup_ctx.tasks().spawn("mux-audio", async move {
        for source in &mut sources {
            (source.start_fn)(source.inner.as_mut()).await?;
        }

        let result = stop_token
            .run_until_cancelled(async {
                while let Some(frame) = audio_rx.next().await {
                    hot.lock().await.append_audio(frame)?;
                }

                Ok::<(), anyhow::Error>(())
            })
            .await;

        for source in &mut sources {
            let _ = (source.stop_fn)(source.inner.as_mut()).await;
        }

        if let Some(result) = result {
            result?;
        }

        trace!("audio writer loop finished");

        Ok(())
    });
}

fn finish_build<TW: ContainerWriter>(
    setup_ctx: SetupCtx,
    hot: Arc<Mutex<WriterHot<TW>>>,
    done_tx: oneshot::Sender<anyhow::Result<()>>,
    path: &PathBuf,
) {
    let path = path.clone();

    tokio::spawn(async move {
        let (task_names, task_handles): (Vec<_>, Vec<_>) = setup_ctx.tasks.0.into_iter().unzip();

        let mut futures = FuturesUnordered::from_iter(
            task_handles
                .into_iter()
                .zip(task_names)
                .map(|(f, n)| f.map(move |r| (r, n))),
        );

        let mut result = Ok(());
        while let Some((task_result, name)) = futures.next().await {
            match task_result {
                Err(_) => {
                    result = Err(anyhow!("Task {name} failed unexpectedly"));
                    break;
                }
                Ok(Err(e)) => {
                    result = Err(anyhow!("Task {name} failed: {e}"));
                    break;
                }
                _ => {}
            }
        }

        let finalize = hot.lock().await.finalize();

        let result = match (result, finalize) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(outcome)) => {
                debug!("pipeline for {} finalized: {outcome:?}", path.display());
                Ok(())
            }
        };

        let _ = done_tx.send(result);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_gate_releases_on_open() {
        let signal = StartSignal::new();
        let mut gate = signal.gate();
        assert!(!gate.is_open());

        let waiter = tokio::spawn(async move { gate.wait().await });

        signal.open();
        let opened = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("gate never opened")
            .unwrap();
        assert!(opened);
    }

    #[tokio::test]
    async fn dropped_signal_reports_unopened() {
        let signal = StartSignal::new();
        let mut gate = signal.gate();
        drop(signal);

        assert!(!gate.wait().await);
    }

    #[test]
    fn already_open_gate_does_not_block() {
        assert!(StartGate::already_open().is_open());
    }
}
