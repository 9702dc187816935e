use crate::{
    devices::CameraDevice,
    frame::VideoFrame,
    output_pipeline::{SetupCtx, VideoSource},
    plan::CameraPreset,
    sources::generate_video_frame,
};
use futures::{FutureExt, channel::mpsc, future::BoxFuture};
use reel_media_info::{PixelFormat, VideoInfo};
use reel_timestamp::{RationalTime, Timestamp, Timestamps};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{trace, warn};

pub struct CameraSourceConfig {
    pub device: CameraDevice,
    pub preset: CameraPreset,
    pub timestamps: Timestamps,
}

pub struct CameraSource {
    info: VideoInfo,
    stop_flag: Arc<AtomicBool>,
}

impl VideoSource for CameraSource {
    type Config = CameraSourceConfig;

    async fn setup(
        config: Self::Config,
        mut video_tx: mpsc::Sender<VideoFrame>,
        ctx: &mut SetupCtx,
    ) -> anyhow::Result<Self> {
        let (width, height) = config.preset.dimensions();
        let info = VideoInfo::new(PixelFormat::Bgra, width, height, config.preset.fps());

        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut gate = ctx.start_gate();
        let diagnostics = ctx.diagnostics();
        let cancel = ctx.stop_token();

        ctx.tasks().spawn("camera-capture", {
            let stop_flag = stop_flag.clone();
            let device = config.device.clone();
            let timestamps = config.timestamps;

            async move {
                if !gate.wait().await || cancel.is_cancelled() {
                    return Ok(());
                }

                trace!("camera {} delivering frames", device.id);

                let start = Instant::now();
                let frame_duration = Duration::from_secs_f64(1.0 / f64::from(info.fps.max(1)));
                let pts_duration =
                    RationalTime::from_duration(frame_duration, RationalTime::MICROS);

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

                    let frame = VideoFrame {
                        data: generate_video_frame(&info, frame_number, None),
                        info,
                        pts: RationalTime::from_duration(
                            target.duration_since(timestamps.instant()),
                            RationalTime::MICROS,
                        ),
                        duration: pts_duration,
                        timestamp: Timestamp::Instant(target),
                    };

                    diagnostics.video_captured();

                    if video_tx.try_send(frame).is_err() {
                        if video_tx.is_closed() {
                            break;
                        }
                        warn!("Camera frame channel full, frame {frame_number} dropped");
                    }

                    frame_number += 1;
                }

                trace!("camera capture finished after {frame_number} frames");
                Ok(())
            }
        });

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
