use crate::writer::WriterStatus;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

const LOG_CAPACITY: usize = 256;

static GLOBAL: LazyLock<Arc<Diagnostics>> = LazyLock::new(|| Arc::new(Diagnostics::new()));

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: SystemTime,
    pub message: String,
}

/// Hot-path observability. Counter updates are relaxed atomic increments;
/// nothing here may block or back-pressure an append. The recorder defaults
/// to the process-wide instance but accepts an isolated one.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub captured_video_frames: AtomicU64,
    pub appended_video_frames: AtomicU64,
    pub dropped_video_not_ready: AtomicU64,
    pub writer_video_failed_count: AtomicU64,

    pub captured_audio_frames: AtomicU64,
    pub appended_audio_frames: AtomicU64,
    pub dropped_audio_not_ready: AtomicU64,
    pub writer_audio_failed_count: AtomicU64,

    last_video_ready_for_more: AtomicBool,
    last_video_writer_status: Mutex<Option<WriterStatus>>,
    last_audio_writer_status: Mutex<Option<WriterStatus>>,
    queue_depth: AtomicU64,
    last_frame_wall_time: Mutex<Option<SystemTime>>,
    last_audio_sample_rate: AtomicU64,

    events: Mutex<VecDeque<LogEntry>>,
    errors: Mutex<VecDeque<LogEntry>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<Diagnostics> {
        GLOBAL.clone()
    }

    pub fn video_captured(&self) {
        self.captured_video_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn video_appended(&self) {
        self.appended_video_frames.fetch_add(1, Ordering::Relaxed);
        self.touch_frame_wall_time();
    }

    pub fn video_dropped_not_ready(&self) {
        self.dropped_video_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn video_writer_failed(&self) {
        self.writer_video_failed_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn audio_captured(&self) {
        self.captured_audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn audio_appended(&self) {
        self.appended_audio_frames.fetch_add(1, Ordering::Relaxed);
        self.touch_frame_wall_time();
    }

    pub fn audio_dropped_not_ready(&self) {
        self.dropped_audio_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn audio_writer_failed(&self) {
        self.writer_audio_failed_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_video_ready_for_more(&self, ready: bool) {
        self.last_video_ready_for_more
            .store(ready, Ordering::Relaxed);
    }

    pub fn set_video_writer_status(&self, status: WriterStatus) {
        *self.last_video_writer_status.lock() = Some(status);
    }

    pub fn set_audio_writer_status(&self, status: WriterStatus) {
        *self.last_audio_writer_status.lock() = Some(status);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_audio_sample_rate(&self, rate: u32) {
        self.last_audio_sample_rate
            .store(u64::from(rate), Ordering::Relaxed);
    }

    fn touch_frame_wall_time(&self) {
        let now = SystemTime::now();
        let mut last = self.last_frame_wall_time.lock();
        // Keeps the published value monotone even if the wall clock steps.
        match *last {
            Some(prev) if prev >= now => {}
            _ => *last = Some(now),
        }
    }

    pub fn log_event(&self, message: impl Into<String>) {
        push_bounded(&mut self.events.lock(), message.into());
    }

    pub fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        push_bounded(&mut self.errors.lock(), message);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            captured_video_frames: self.captured_video_frames.load(Ordering::Relaxed),
            appended_video_frames: self.appended_video_frames.load(Ordering::Relaxed),
            dropped_video_not_ready: self.dropped_video_not_ready.load(Ordering::Relaxed),
            writer_video_failed_count: self.writer_video_failed_count.load(Ordering::Relaxed),
            captured_audio_frames: self.captured_audio_frames.load(Ordering::Relaxed),
            appended_audio_frames: self.appended_audio_frames.load(Ordering::Relaxed),
            dropped_audio_not_ready: self.dropped_audio_not_ready.load(Ordering::Relaxed),
            writer_audio_failed_count: self.writer_audio_failed_count.load(Ordering::Relaxed),
            last_video_ready_for_more: self.last_video_ready_for_more.load(Ordering::Relaxed),
            last_video_writer_status: *self.last_video_writer_status.lock(),
            last_audio_writer_status: *self.last_audio_writer_status.lock(),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            last_frame_wall_time: *self.last_frame_wall_time.lock(),
            last_audio_sample_rate: self.last_audio_sample_rate.load(Ordering::Relaxed) as u32,
            events: self.events.lock().iter().cloned().collect(),
            errors: self.errors.lock().iter().cloned().collect(),
        }
    }
}

fn push_bounded(log: &mut VecDeque<LogEntry>, message: String) {
    if log.len() == LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(LogEntry {
        at: SystemTime::now(),
        message,
    });
}

#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    pub captured_video_frames: u64,
    pub appended_video_frames: u64,
    pub dropped_video_not_ready: u64,
    pub writer_video_failed_count: u64,
    pub captured_audio_frames: u64,
    pub appended_audio_frames: u64,
    pub dropped_audio_not_ready: u64,
    pub writer_audio_failed_count: u64,
    pub last_video_ready_for_more: bool,
    pub last_video_writer_status: Option<WriterStatus>,
    pub last_audio_writer_status: Option<WriterStatus>,
    pub queue_depth: u64,
    pub last_frame_wall_time: Option<SystemTime>,
    pub last_audio_sample_rate: u32,
    pub events: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FpsSnapshot {
    pub capture_fps: f64,
    pub append_fps: f64,
    pub drop_not_ready_fps: f64,
    pub audio_capture_fps: f64,
    pub elapsed: Duration,
}

/// Wall-clock meter publishing rate snapshots computed as counter deltas
/// over real elapsed time. Runs on its own timer; the append path never
/// waits on it.
pub struct FpsMeter {
    diagnostics: Arc<Diagnostics>,
    interval: Duration,
}

pub struct FpsMeterHandle {
    rx: watch::Receiver<FpsSnapshot>,
    _guard: DropGuard,
}

impl FpsMeterHandle {
    pub fn subscribe(&self) -> watch::Receiver<FpsSnapshot> {
        self.rx.clone()
    }

    pub fn latest(&self) -> FpsSnapshot {
        *self.rx.borrow()
    }
}

const MIN_METER_INTERVAL: Duration = Duration::from_millis(500);

impl FpsMeter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(diagnostics: Arc<Diagnostics>, interval: Duration) -> Self {
        Self {
            diagnostics,
            interval: interval.max(MIN_METER_INTERVAL),
        }
    }

    pub fn with_defaults(diagnostics: Arc<Diagnostics>) -> Self {
        Self::new(diagnostics, Self::DEFAULT_INTERVAL)
    }

    pub fn spawn(self) -> FpsMeterHandle {
        let (tx, rx) = watch::channel(FpsSnapshot::default());
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut last_at = Instant::now();
            let mut last_captured = self.diagnostics.captured_video_frames.load(Ordering::Relaxed);
            let mut last_appended = self.diagnostics.appended_video_frames.load(Ordering::Relaxed);
            let mut last_dropped = self
                .diagnostics
                .dropped_video_not_ready
                .load(Ordering::Relaxed);
            let mut last_audio = self.diagnostics.captured_audio_frames.load(Ordering::Relaxed);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = Instant::now();
                let elapsed = now.duration_since(last_at);
                let secs = elapsed.as_secs_f64();
                if secs <= 0.0 {
                    continue;
                }

                let captured = self.diagnostics.captured_video_frames.load(Ordering::Relaxed);
                let appended = self.diagnostics.appended_video_frames.load(Ordering::Relaxed);
                let dropped = self
                    .diagnostics
                    .dropped_video_not_ready
                    .load(Ordering::Relaxed);
                let audio = self.diagnostics.captured_audio_frames.load(Ordering::Relaxed);

                let snapshot = FpsSnapshot {
                    capture_fps: captured.wrapping_sub(last_captured) as f64 / secs,
                    append_fps: appended.wrapping_sub(last_appended) as f64 / secs,
                    drop_not_ready_fps: dropped.wrapping_sub(last_dropped) as f64 / secs,
                    audio_capture_fps: audio.wrapping_sub(last_audio) as f64 / secs,
                    elapsed,
                };

                last_at = now;
                last_captured = captured;
                last_appended = appended;
                last_dropped = dropped;
                last_audio = audio;

                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        FpsMeterHandle { rx, _guard: guard }
    }
}
