use crate::{
    devices::DisplayDevice,
    frame::VideoFrame,
    output_pipeline::{SetupCtx, VideoSource},
    plan::CropRect,
    queue::{BoundedFrameQueue, DropPolicy},
    sources::generate_video_frame,
};
use futures::{FutureExt, SinkExt, channel::mpsc, future::BoxFuture};
use reel_media_info::{PixelFormat, VideoInfo};
use reel_timestamp::{RationalTime, Timestamp, Timestamps};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Which capture backend drives the display source. Interchangeable per
/// plan; parity between them is covered by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScreenBackendKind {
    /// Async timer-paced capture loop on the runtime.
    Timer,
    /// Dedicated capture thread bridged over a bounded channel, the way
    /// callback-driven legacy APIs deliver frames.
    Legacy,
}

pub struct ScreenSourceConfig {
    pub display: DisplayDevice,
    pub crop: Option<CropRect>,
    pub fps: u32,
    pub shows_cursor: bool,
    pub hdr: bool,
    pub queue_depth: Option<usize>,
    pub backend: ScreenBackendKind,
    pub timestamps: Timestamps,
}

pub struct ScreenSource {
    info: VideoInfo,
    stop_flag: Arc<AtomicBool>,
}

impl ScreenSource {
    fn info_for(config: &ScreenSourceConfig) -> VideoInfo {
        let pixel_format = if config.hdr {
            PixelFormat::P010
        } else {
            PixelFormat::Bgra
        };

        let full = VideoInfo::new(
            pixel_format,
            config.display.width,
            config.display.height,
            config.fps,
        );

        match &config.crop {
            Some(crop) => full.with_crop(crop.width, crop.height),
            None => full,
        }
    }
}

impl VideoSource for ScreenSource {
    type Config = ScreenSourceConfig;

    async fn setup(
        config: Self::Config,
        video_tx: mpsc::Sender<VideoFrame>,
        ctx: &mut SetupCtx,
    ) -> anyhow::Result<Self> {
        let info = Self::info_for(&config);
        let stop_flag = Arc::new(AtomicBool::new(false));

        match config.backend {
            ScreenBackendKind::Timer => {
                spawn_timer_backend(ctx, info, config, video_tx, stop_flag.clone())
            }
            ScreenBackendKind::Legacy => {
                spawn_legacy_backend(ctx, info, config, video_tx, stop_flag.clone())
            }
        }

        Ok(Self { info, stop_flag })
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn stop(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        self.stop_flag.store(true, Ordering::Relaxed);
        async { Ok(()) }.boxed()
    }
}

fn cursor_position(info: &VideoInfo, frame_number: u64) -> (u32, u32) {
    let x = (frame_number * 4) % u64::from(info.width.max(1));
    let y = (frame_number * 2) % u64::from(info.height.max(1));
    (x as u32, y as u32)
}

fn spawn_timer_backend(
    ctx: &mut SetupCtx,
    info: VideoInfo,
    config: ScreenSourceConfig,
    mut video_tx: mpsc::Sender<VideoFrame>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut gate = ctx.start_gate();
    let diagnostics = ctx.diagnostics();
    let cancel = ctx.stop_token();

    // Optional pre-writer ring that absorbs brief writer stalls.
    let queue = config
        .queue_depth
        .map(|depth| Arc::new(BoundedFrameQueue::new(depth, DropPolicy::Oldest)));
    let notify = Arc::new(Notify::new());

    if let Some(queue) = queue.clone() {
        let notify = notify.clone();
        let cancel = cancel.clone();
        let diagnostics = diagnostics.clone();
        let mut video_tx = video_tx.clone();

        ctx.tasks().spawn("screen-queue-drain", async move {
            loop {
                while let Some(frame) = queue.pop() {
                    diagnostics.set_queue_depth(queue.len() as u64);
                    if video_tx.send(frame).await.is_err() {
                        return Ok(());
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = notify.notified() => {}
                }
            }
        });
    }

    ctx.tasks().spawn("screen-capture", async move {
        if !gate.wait().await || cancel.is_cancelled() {
            return Ok(());
        }

        let timestamps = config.timestamps;
        let start = Instant::now();
        let frame_duration = Duration::from_secs_f64(1.0 / f64::from(info.fps.max(1)));
        let pts_duration = RationalTime::from_duration(frame_duration, RationalTime::MICROS);

        let mut frame_number = 0u64;

        loop {
            if stop_flag.load(Ordering::Relaxed) || cancel.is_cancelled() {
                break;
            }

            let target = start + frame_duration * frame_number as u32;
            let now = Instant::now();
            if target > now {
                tokio::time::sleep(target - now).await;
            }

            let cursor = config
                .shows_cursor
                .then(|| cursor_position(&info, frame_number));

            let frame = VideoFrame {
                data: generate_video_frame(&info, frame_number, cursor),
                info,
                pts: RationalTime::from_duration(
                    target.duration_since(timestamps.instant()),
                    RationalTime::MICROS,
                ),
                duration: pts_duration,
                timestamp: Timestamp::Instant(target),
            };

            diagnostics.video_captured();

            match &queue {
                Some(queue) => {
                    if queue.push(frame).is_some() {
                        trace!("screen queue evicted a frame");
                    }
                    diagnostics.set_queue_depth(queue.len() as u64);
                    notify.notify_one();
                }
                None => {
                    if video_tx.try_send(frame).is_err() {
                        if video_tx.is_closed() {
                            break;
                        }
                        warn!("Video frame channel full, frame {frame_number} dropped");
                    }
                }
            }

            frame_number += 1;
        }

        trace!("screen capture finished after {frame_number} frames");
        Ok(())
    });
}

fn spawn_legacy_backend(
    ctx: &mut SetupCtx,
    info: VideoInfo,
    config: ScreenSourceConfig,
    mut video_tx: mpsc::Sender<VideoFrame>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut gate = ctx.start_gate();
    let diagnostics = ctx.diagnostics();
    let cancel = ctx.stop_token();

    let gate_open = Arc::new(AtomicBool::new(false));
    let (tx, rx) = flume::bounded::<VideoFrame>(8);

    {
        let gate_open = gate_open.clone();
        let stop_flag = stop_flag.clone();

        std::thread::spawn(move || {
            let timestamps = config.timestamps;
            let frame_interval = Duration::from_secs_f64(1.0 / f64::from(info.fps.max(1)));
            let mut frame_number = 0u64;

            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                if !gate_open.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }

                // The legacy API stamps against the wall clock.
                let now = std::time::SystemTime::now();
                let pts = RationalTime::from_duration(
                    now.duration_since(timestamps.system_time())
                        .unwrap_or(Duration::ZERO),
                    RationalTime::MICROS,
                );

                let cursor = config
                    .shows_cursor
                    .then(|| cursor_position(&info, frame_number));

                let frame = VideoFrame {
                    data: generate_video_frame(&info, frame_number, cursor),
                    info,
                    pts,
                    duration: RationalTime::from_duration(frame_interval, RationalTime::MICROS),
                    timestamp: Timestamp::SystemTime(now),
                };

                diagnostics.video_captured();

                if tx.send(frame).is_err() {
                    break;
                }

                frame_number += 1;
                std::thread::sleep(frame_interval);
            }
        });
    }

    ctx.tasks().spawn("screen-capture-legacy", async move {
        if !gate.wait().await {
            return Ok(());
        }
        gate_open.store(true, Ordering::Relaxed);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = rx.recv_async() => {
                    let Ok(frame) = frame else { break };
                    if video_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }

        trace!("legacy screen bridge finished");
        Ok(())
    });
}
