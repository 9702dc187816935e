use crate::{
    RecordingError,
    bundle::{BundleFile, BundleInfo, FileType, session_dir_name, system_time_to_epoch_secs},
    devices::{DeviceRegistry, DisplayDevice},
    diagnostics::Diagnostics,
    output_pipeline::{FinishedOutputPipeline, OutputPipeline, StartSignal},
    plan::{RecordingPlan, SchemeItem},
    sources::{
        CameraSource, CameraSourceConfig, MicrophoneSource, MicrophoneSourceConfig,
        ScreenBackendKind, ScreenSource, ScreenSourceConfig, SystemAudioSource,
        SystemAudioSourceConfig,
    },
    writer::{ChunkContainerWriter, ChunkWriterConfig, VideoEncodeOptions, WriterCaps},
};
use anyhow::Context as _;
use futures::{FutureExt, StreamExt, future, stream::FuturesUnordered};
use kameo::{Actor as _, prelude::*};
use reel_timestamp::Timestamps;
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{Instrument, debug, error_span, info, trace, warn};

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub type InterruptFn = Box<dyn FnOnce(RecordingError) + Send>;

/// Cached output of `stop_with_result`; repeated stops return the same
/// value.
#[derive(Debug, Clone)]
pub struct StopResult {
    pub bundle_dir: PathBuf,
    pub bundle: BundleInfo,
}

pub struct RecorderBuilder {
    plan: RecordingPlan,
    output_dir: PathBuf,
    base_name: String,
    registry: DeviceRegistry,
    diagnostics: Arc<Diagnostics>,
    start_timeout: Duration,
    stop_timeout: Duration,
    screen_backend: ScreenBackendKind,
    writer_caps: WriterCaps,
    on_interrupt: Option<InterruptFn>,
}

impl RecorderBuilder {
    pub fn new(plan: RecordingPlan, output_dir: PathBuf) -> Self {
        Self {
            plan,
            output_dir,
            base_name: "capture".into(),
            registry: DeviceRegistry::synthetic(),
            diagnostics: Diagnostics::global(),
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            screen_backend: ScreenBackendKind::Timer,
            writer_caps: WriterCaps::default(),
            on_interrupt: None,
        }
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_screen_backend(mut self, backend: ScreenBackendKind) -> Self {
        self.screen_backend = backend;
        self
    }

    pub fn with_writer_caps(mut self, caps: WriterCaps) -> Self {
        self.writer_caps = caps;
        self
    }

    pub fn with_on_interrupt(
        mut self,
        on_interrupt: impl FnOnce(RecordingError) + Send + 'static,
    ) -> Self {
        self.on_interrupt = Some(Box::new(on_interrupt));
        self
    }

    pub fn spawn(self) -> RecorderHandle {
        let (interrupt_tx, interrupt_rx) = watch::channel(None);

        let actor_ref = Recorder::spawn(Recorder {
            state: Some(RecorderState::Idle),
            ctx: SessionCtx {
                plan: self.plan,
                output_dir: self.output_dir,
                base_name: self.base_name,
                registry: self.registry,
                diagnostics: self.diagnostics,
                start_timeout: self.start_timeout,
                stop_timeout: self.stop_timeout,
                screen_backend: self.screen_backend,
                writer_caps: self.writer_caps,
                interrupt_tx,
                on_interrupt: std::sync::Mutex::new(self.on_interrupt),
            },
        });

        RecorderHandle {
            actor_ref,
            interrupt_rx,
        }
    }
}

/// Public handle over the recorder actor. Lifecycle calls are serialized
/// through the actor mailbox; dropping the handle stops the session.
pub struct RecorderHandle {
    actor_ref: kameo::actor::ActorRef<Recorder>,
    interrupt_rx: watch::Receiver<Option<RecordingError>>,
}

impl RecorderHandle {
    pub fn builder(plan: RecordingPlan, output_dir: PathBuf) -> RecorderBuilder {
        RecorderBuilder::new(plan, output_dir)
    }

    pub async fn prepare(&self) -> anyhow::Result<()> {
        Ok(self.actor_ref.ask(Prepare).await?)
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        Ok(self.actor_ref.ask(Start).await?)
    }

    pub async fn stop_with_result(&self) -> anyhow::Result<StopResult> {
        Ok(self.actor_ref.ask(StopWithResult).await?)
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        Ok(self.actor_ref.ask(Pause).await?)
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        Ok(self.actor_ref.ask(Resume).await?)
    }

    pub async fn cancel(&self) -> anyhow::Result<StopResult> {
        Ok(self.actor_ref.ask(Cancel).await?)
    }

    pub async fn is_paused(&self) -> anyhow::Result<bool> {
        Ok(self.actor_ref.ask(IsPaused).await?)
    }

    /// First fatal error observed from any source or writer, latched for
    /// the whole session.
    pub fn interrupt_rx(&self) -> watch::Receiver<Option<RecordingError>> {
        self.interrupt_rx.clone()
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        let actor_ref = self.actor_ref.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = actor_ref.tell(StopWithResult).await;
            });
        }
    }
}

struct SessionCtx {
    plan: RecordingPlan,
    output_dir: PathBuf,
    base_name: String,
    registry: DeviceRegistry,
    diagnostics: Arc<Diagnostics>,
    start_timeout: Duration,
    stop_timeout: Duration,
    screen_backend: ScreenBackendKind,
    writer_caps: WriterCaps,
    interrupt_tx: watch::Sender<Option<RecordingError>>,
    on_interrupt: std::sync::Mutex<Option<InterruptFn>>,
}

struct PipelineEntry {
    label: String,
    filename: String,
    file_type: FileType,
    pipeline: OutputPipeline,
}

struct PreparedSession {
    dir: PathBuf,
    timestamps: Timestamps,
    start_signal: StartSignal,
    pipelines: Vec<PipelineEntry>,
}

struct ActiveSession {
    dir: PathBuf,
    timestamps: Timestamps,
    pipelines: Vec<PipelineEntry>,
    paused: bool,
}

enum RecorderState {
    Idle,
    Prepared(PreparedSession),
    Recording(ActiveSession),
    Stopped(StopResult),
}

#[derive(kameo::Actor)]
pub struct Recorder {
    state: Option<RecorderState>,
    ctx: SessionCtx,
}

pub struct Prepare;

impl Message<Prepare> for Recorder {
    type Reply = anyhow::Result<()>;

    async fn handle(&mut self, _: Prepare, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        match self.state.take() {
            Some(RecorderState::Idle) => match prepare_session(&self.ctx).await {
                Ok(session) => {
                    self.state = Some(RecorderState::Prepared(session));
                    Ok(())
                }
                Err(e) => {
                    self.state = Some(RecorderState::Idle);
                    Err(e)
                }
            },
            other => {
                self.state = other;
                Err(RecordingError::StateError(
                    "prepare may only be called once, before start".into(),
                )
                .into())
            }
        }
    }
}

pub struct Start;

impl Message<Start> for Recorder {
    type Reply = anyhow::Result<()>;

    async fn handle(&mut self, _: Start, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        match self.state.take() {
            Some(RecorderState::Prepared(session)) => {
                match start_session(session, &mut self.ctx).await {
                    Ok(active) => {
                        self.state = Some(RecorderState::Recording(active));
                        Ok(())
                    }
                    Err((error, result)) => {
                        self.state = Some(RecorderState::Stopped(result));
                        Err(error)
                    }
                }
            }
            other => {
                let message = match &other {
                    Some(RecorderState::Recording(_)) => "recording already started",
                    Some(RecorderState::Stopped(_)) => "session already stopped",
                    _ => "start requires prepare first",
                };
                self.state = other;
                Err(RecordingError::StateError(message.into()).into())
            }
        }
    }
}

pub struct StopWithResult;

impl Message<StopWithResult> for Recorder {
    type Reply = anyhow::Result<StopResult>;

    async fn handle(
        &mut self,
        _: StopWithResult,
        _: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let result = self.stop(true).await?;
        Ok(result)
    }
}

pub struct Cancel;

impl Message<Cancel> for Recorder {
    type Reply = anyhow::Result<StopResult>;

    async fn handle(&mut self, _: Cancel, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let result = self.stop(false).await?;
        Ok(result)
    }
}

pub struct Pause;

impl Message<Pause> for Recorder {
    type Reply = anyhow::Result<()>;

    async fn handle(&mut self, _: Pause, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        match self.state.as_mut() {
            Some(RecorderState::Recording(session)) => {
                for entry in &session.pipelines {
                    entry.pipeline.pause();
                }
                session.paused = true;
                Ok(())
            }
            _ => Err(RecordingError::StateError("not recording".into()).into()),
        }
    }
}

pub struct Resume;

impl Message<Resume> for Recorder {
    type Reply = anyhow::Result<()>;

    async fn handle(&mut self, _: Resume, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        match self.state.as_mut() {
            Some(RecorderState::Recording(session)) => {
                for entry in &session.pipelines {
                    entry.pipeline.resume();
                }
                session.paused = false;
                Ok(())
            }
            _ => Err(RecordingError::StateError("not recording".into()).into()),
        }
    }
}

pub struct IsPaused;

impl Message<IsPaused> for Recorder {
    type Reply = bool;

    async fn handle(&mut self, _: IsPaused, _: &mut Context<Self, Self::Reply>) -> Self::Reply {
        matches!(
            self.state,
            Some(RecorderState::Recording(ActiveSession { paused: true, .. }))
        )
    }
}

impl Recorder {
    async fn stop(&mut self, write_manifest: bool) -> anyhow::Result<StopResult> {
        match self.state.take() {
            Some(RecorderState::Stopped(result)) => {
                self.state = Some(RecorderState::Stopped(result.clone()));
                Ok(result)
            }
            Some(RecorderState::Idle) | None => {
                let result = StopResult {
                    bundle_dir: self.ctx.output_dir.clone(),
                    bundle: BundleInfo::default(),
                };
                self.state = Some(RecorderState::Stopped(result.clone()));
                Ok(result)
            }
            Some(RecorderState::Prepared(session)) => {
                // Never started: cancel every writer so no files remain.
                let result = discard_session(session, &self.ctx).await;
                self.state = Some(RecorderState::Stopped(result.clone()));
                Ok(result)
            }
            Some(RecorderState::Recording(session)) => {
                let result = finalize_session(
                    session.dir,
                    session.timestamps,
                    session.pipelines,
                    &self.ctx,
                    write_manifest,
                )
                .await;
                self.state = Some(RecorderState::Stopped(result.clone()));
                Ok(result)
            }
        }
    }
}

async fn prepare_session(ctx: &SessionCtx) -> anyhow::Result<PreparedSession> {
    ctx.plan.validate(&ctx.registry)?;

    let dir = ctx.output_dir.join(session_dir_name(&ctx.base_name));
    ensure_dir(&dir)?;

    let timestamps = Timestamps::now();
    let start_signal = StartSignal::new();

    trace!("preparing session in {}", dir.display());

    // Screen pipelines first so muxed system audio attaches before
    // standalone microphones spin up.
    let mut ordered: Vec<&SchemeItem> = ctx.plan.items.iter().filter(|i| i.is_screen()).collect();
    ordered.extend(ctx.plan.items.iter().filter(|i| !i.is_screen()));

    let mut pipelines = Vec::with_capacity(ordered.len());
    for item in ordered {
        match build_pipeline(item, ctx, &dir, timestamps, &start_signal).await {
            Ok(entry) => pipelines.push(entry),
            Err(e) => {
                // Dropping the built pipelines cancels their writers; files
                // without a started session are removed by finalize.
                drop(pipelines);
                tokio::task::yield_now().await;
                let _ = std::fs::remove_dir(&dir);
                return Err(e);
            }
        }
    }

    info!("prepared {} pipelines", pipelines.len());

    Ok(PreparedSession {
        dir,
        timestamps,
        start_signal,
        pipelines,
    })
}

async fn build_pipeline(
    item: &SchemeItem,
    ctx: &SessionCtx,
    dir: &PathBuf,
    timestamps: Timestamps,
    start_signal: &StartSignal,
) -> anyhow::Result<PipelineEntry> {
    let path = dir.join(item.filename());
    let writer_config = ChunkWriterConfig {
        caps: ctx.writer_caps,
    };

    let pipeline = match item {
        SchemeItem::Display {
            display_id,
            crop,
            hdr,
            capture_system_audio,
            options,
            ..
        } => {
            let display = ctx
                .registry
                .display(*display_id)
                .ok_or_else(|| {
                    RecordingError::SourceUnavailable(format!("display {display_id} disappeared"))
                })?
                .clone();

            let hdr = *hdr || options.hdr;
            let mut builder = OutputPipeline::builder(path)
                .with_diagnostics(ctx.diagnostics.clone())
                .with_start_gate(start_signal.gate())
                .with_video::<ScreenSource>(
                    ScreenSourceConfig {
                        display,
                        crop: *crop,
                        fps: options.fps,
                        shows_cursor: options.shows_cursor,
                        hdr,
                        queue_depth: options.queue_depth,
                        backend: ctx.screen_backend,
                        timestamps,
                    },
                    VideoEncodeOptions {
                        use_hevc: options.use_hevc,
                        hdr,
                        target_bit_rate: options.target_bit_rate,
                        ..Default::default()
                    },
                );

            if *capture_system_audio || options.include_audio {
                builder = builder
                    .with_audio_source::<SystemAudioSource>(SystemAudioSourceConfig::new(timestamps));
            }

            builder
                .build::<ChunkContainerWriter>(writer_config)
                .instrument(error_span!("screen-out"))
                .await
                .map_err(classify_build_error)
                .context("screen pipeline setup")?
        }
        SchemeItem::Window {
            display_id,
            window_id,
            hdr,
            capture_system_audio,
            options,
            ..
        } => {
            let window = ctx
                .registry
                .window(*window_id)
                .ok_or_else(|| {
                    RecordingError::SourceUnavailable(format!("window {window_id} disappeared"))
                })?;
            let display = DisplayDevice {
                id: *display_id,
                name: window.title.clone(),
                width: window.width,
                height: window.height,
                refresh_rate: 60,
            };

            let hdr = *hdr || options.hdr;
            let mut builder = OutputPipeline::builder(path)
                .with_diagnostics(ctx.diagnostics.clone())
                .with_start_gate(start_signal.gate())
                .with_video::<ScreenSource>(
                    ScreenSourceConfig {
                        display,
                        crop: None,
                        fps: options.fps,
                        shows_cursor: options.shows_cursor,
                        hdr,
                        queue_depth: options.queue_depth,
                        backend: ctx.screen_backend,
                        timestamps,
                    },
                    VideoEncodeOptions {
                        use_hevc: options.use_hevc,
                        hdr,
                        target_bit_rate: options.target_bit_rate,
                        ..Default::default()
                    },
                );

            if *capture_system_audio || options.include_audio {
                builder = builder
                    .with_audio_source::<SystemAudioSource>(SystemAudioSourceConfig::new(timestamps));
            }

            builder
                .build::<ChunkContainerWriter>(writer_config)
                .instrument(error_span!("window-out"))
                .await
                .map_err(classify_build_error)
                .context("window pipeline setup")?
        }
        SchemeItem::Camera {
            camera_id, options, ..
        } => {
            let device = ctx
                .registry
                .camera(camera_id)
                .ok_or_else(|| {
                    RecordingError::SourceUnavailable(format!("camera {camera_id:?} disappeared"))
                })?
                .clone();

            OutputPipeline::builder(path)
                .with_diagnostics(ctx.diagnostics.clone())
                .with_start_gate(start_signal.gate())
                .with_video::<CameraSource>(
                    CameraSourceConfig {
                        device,
                        preset: options.preset,
                        timestamps,
                    },
                    VideoEncodeOptions {
                        use_hevc: options.prefer_hevc,
                        bpp_h264: options.bpp_h264,
                        bpp_hevc: options.bpp_hevc,
                        min_bitrate: options.min_bitrate,
                        max_bitrate: options.max_bitrate,
                        fps_override: options.bitrate_fps_override,
                        ..Default::default()
                    },
                )
                .build::<ChunkContainerWriter>(writer_config)
                .instrument(error_span!("camera-out"))
                .await
                .map_err(classify_build_error)
                .context("camera pipeline setup")?
        }
        SchemeItem::Microphone {
            microphone_id,
            options,
            ..
        } => {
            let device = ctx
                .registry
                .microphone(microphone_id)
                .ok_or_else(|| {
                    RecordingError::SourceUnavailable(format!(
                        "microphone {microphone_id:?} disappeared"
                    ))
                })?
                .clone();

            OutputPipeline::builder(path)
                .with_diagnostics(ctx.diagnostics.clone())
                .with_start_gate(start_signal.gate())
                .with_audio_source::<MicrophoneSource>(MicrophoneSourceConfig {
                    device,
                    options: options.clone(),
                    timestamps,
                })
                .build::<ChunkContainerWriter>(writer_config)
                .instrument(error_span!("mic-out"))
                .await
                .map_err(classify_build_error)
                .context("microphone pipeline setup")?
        }
    };

    Ok(PipelineEntry {
        label: item.label(),
        filename: item.filename().to_string(),
        file_type: item.file_type(),
        pipeline,
    })
}

/// Writer setup failures come out of the pipeline as anyhow chains; keep
/// the typed kind visible for callers that match on it.
fn classify_build_error(error: anyhow::Error) -> anyhow::Error {
    if error.chain().any(|e| e.is::<RecordingError>()) {
        return error;
    }

    let has_io = error.chain().any(|e| {
        e.is::<std::io::Error>()
            || matches!(
                e.downcast_ref::<reel_container::ContainerError>(),
                Some(reel_container::ContainerError::Io(_))
            )
    });

    let message = format!("{error:#}");
    if has_io {
        anyhow::Error::from(RecordingError::FileCreateFailed(message))
    } else {
        anyhow::Error::from(RecordingError::WriterSetupFailed(message))
    }
}

async fn start_session(
    session: PreparedSession,
    ctx: &mut SessionCtx,
) -> Result<ActiveSession, (anyhow::Error, StopResult)> {
    let PreparedSession {
        dir,
        timestamps,
        start_signal,
        pipelines,
    } = session;

    info!("starting {} pipelines", pipelines.len());
    start_signal.open();

    let gates: Vec<_> = pipelines
        .iter()
        .map(|entry| entry.pipeline.first_frame_fut())
        .collect();

    let all_started =
        match tokio::time::timeout(ctx.start_timeout, future::join_all(gates.clone())).await {
            Ok(firsts) => firsts.iter().all(Option::is_some),
            Err(_) => false,
        };

    if !all_started {
        let failed: Vec<String> = pipelines
            .iter()
            .zip(&gates)
            .filter(|(_, gate)| !matches!(gate.clone().clone().now_or_never(), Some(Some(_))))
            .map(|(entry, _)| entry.label.clone())
            .collect();

        warn!("start aborted; no first frame from: {}", failed.join(", "));

        // Atomic start: tear everything down before surfacing the error.
        let result = finalize_session(dir, timestamps, pipelines, ctx, true).await;
        return Err((
            anyhow::Error::from(RecordingError::StartTimeout(failed)),
            result,
        ));
    }

    debug!("all pipelines delivered a first frame");

    spawn_interrupt_watcher(&pipelines, ctx);

    Ok(ActiveSession {
        dir,
        timestamps,
        pipelines,
        paused: false,
    })
}

fn spawn_interrupt_watcher(pipelines: &[PipelineEntry], ctx: &mut SessionCtx) {
    let mut done_futs = FuturesUnordered::new();
    for entry in pipelines {
        let label = entry.label.clone();
        done_futs.push(entry.pipeline.done_fut().map(move |result| (label, result)));
    }

    let interrupt_tx = ctx.interrupt_tx.clone();
    let mut on_interrupt = ctx.on_interrupt.lock().unwrap().take();
    let diagnostics = ctx.diagnostics.clone();

    tokio::spawn(async move {
        while let Some((label, result)) = done_futs.next().await {
            if let Err(error) = result {
                diagnostics.log_error(format!("{label}: {error}"));

                // First fatal error wins; later ones are only logged.
                if interrupt_tx.borrow().is_none() {
                    let typed = error.to_recording_error(&label);
                    let _ = interrupt_tx.send(Some(typed.clone()));
                    if let Some(callback) = on_interrupt.take() {
                        callback(typed);
                    }
                }
            }
        }
    });
}

async fn discard_session(session: PreparedSession, ctx: &SessionCtx) -> StopResult {
    let PreparedSession {
        dir, pipelines, ..
    } = session;

    for entry in pipelines {
        entry.pipeline.set_accepting(false);
        let _ = tokio::time::timeout(ctx.stop_timeout, entry.pipeline.stop()).await;
    }

    // Nothing was started, so nothing was written; leave no residue.
    let _ = std::fs::remove_dir(&dir);

    StopResult {
        bundle_dir: dir,
        bundle: BundleInfo::default(),
    }
}

async fn finalize_session(
    dir: PathBuf,
    timestamps: Timestamps,
    pipelines: Vec<PipelineEntry>,
    ctx: &SessionCtx,
    write_manifest: bool,
) -> StopResult {
    for entry in &pipelines {
        entry.pipeline.set_accepting(false);
    }

    // Video-bearing pipelines finalize first (they may inject a keepalive),
    // then audio-only ones; the manifest is written last.
    let (video, audio): (Vec<_>, Vec<_>) = pipelines
        .into_iter()
        .partition(|entry| entry.pipeline.video_info().is_some());

    let deadline = Instant::now() + ctx.stop_timeout;
    let mut files = Vec::new();

    for entry in video.into_iter().chain(audio) {
        let PipelineEntry {
            label,
            filename,
            file_type,
            pipeline,
        } = entry;

        let path = pipeline.path().clone();
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(100));

        match tokio::time::timeout(remaining, pipeline.stop()).await {
            Ok(finished) => {
                if let Some(error) = &finished.error {
                    warn!("pipeline {label} finished with error: {error}");
                }
                if let Some(file) = manifest_entry(filename, file_type, &finished, timestamps) {
                    files.push(file);
                }
            }
            Err(_) => {
                // Dropping the stop future force-cancels the pipeline; list
                // the artifact only if something reached disk.
                ctx.diagnostics
                    .log_error(format!("{label} did not finalize in time; force-cancelled"));
                if path.exists() {
                    files.push(BundleFile::new(filename, file_type));
                }
            }
        }
    }

    let bundle = BundleInfo { files };

    if bundle.files.is_empty() {
        let _ = std::fs::remove_dir(&dir);
    } else if write_manifest {
        if let Err(e) = bundle.save(&dir) {
            ctx.diagnostics
                .log_error(format!("failed to write bundle manifest: {e}"));
        }
    }

    info!(
        "session stopped with {} manifest entries",
        bundle.files.len()
    );

    StopResult {
        bundle_dir: dir,
        bundle,
    }
}

fn manifest_entry(
    filename: String,
    file_type: FileType,
    finished: &FinishedOutputPipeline,
    timestamps: Timestamps,
) -> Option<BundleFile> {
    let first = finished.first_timestamp?;

    if !finished.path.exists() {
        return None;
    }

    let start_wall = timestamps.system_time() + first.duration_since(timestamps);
    let end_wall = finished
        .last_timestamp
        .map(|last| timestamps.system_time() + last.duration_since(timestamps));

    Some(BundleFile {
        recording_start_timestamp: Some(system_time_to_epoch_secs(start_wall)),
        recording_end_timestamp: end_wall.map(system_time_to_epoch_secs),
        codec: finished.video_codec.map(|c| c.as_str().to_string()),
        width: finished.video_info.map(|i| i.width),
        height: finished.video_info.map(|i| i.height),
        fps: finished.video_info.map(|i| i.fps),
        has_audio: finished
            .video_info
            .is_some()
            .then_some(finished.audio_settings.is_some()),
        sample_rate: finished.audio_settings.map(|a| a.sample_rate),
        ..BundleFile::new(filename, file_type)
    })
}

fn ensure_dir(path: &PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
