use crate::{
    frame::AudioFrame,
    output_pipeline::{AudioSource, SetupCtx},
};
use futures::{SinkExt, channel::mpsc};
use reel_media_info::{AudioInfo, SampleFormat};
use reel_timestamp::{RationalTime, Timestamp, Timestamps};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::trace;

const BUFFER_FRAMES: usize = 1024;

pub struct SystemAudioSourceConfig {
    pub timestamps: Timestamps,
    /// Offset of the audio driver's clock relative to the session clock.
    /// The pipeline's first-frame alignment is expected to cancel it.
    pub clock_skew: Duration,
}

impl SystemAudioSourceConfig {
    pub fn new(timestamps: Timestamps) -> Self {
        Self {
            timestamps,
            clock_skew: Duration::from_millis(150),
        }
    }
}

/// Desktop audio muxed into the screen file. Stereo float at 48 kHz, the
/// shape system loopback taps deliver.
pub struct SystemAudioSource {
    info: AudioInfo,
    stop_flag: Arc<AtomicBool>,
}

impl AudioSource for SystemAudioSource {
    type Config = SystemAudioSourceConfig;

    fn setup(
        config: Self::Config,
        mut tx: mpsc::Sender<AudioFrame>,
        ctx: &mut SetupCtx,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send + 'static {
        let info = AudioInfo::new_raw(SampleFormat::F32, 48_000, 2);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut gate = ctx.start_gate();
        let diagnostics = ctx.diagnostics();
        let cancel = ctx.stop_token();

        ctx.tasks().spawn("system-audio-capture", {
            let stop_flag = stop_flag.clone();
            let timestamps = config.timestamps;
            let skew = config.clock_skew;

            async move {
                if !gate.wait().await || cancel.is_cancelled() {
                    return Ok(());
                }

                let sample_rate = info.sample_rate.max(1);
                let buffer_duration =
                    Duration::from_secs_f64(BUFFER_FRAMES as f64 / f64::from(sample_rate));
                let start = Instant::now();

                let block = info.block_size();
                let mut sample_offset = 0u64;

                loop {
                    if stop_flag.load(Ordering::Relaxed) || cancel.is_cancelled() {
                        break;
                    }

                    let elapsed =
                        Duration::from_secs_f64(sample_offset as f64 / f64::from(sample_rate));

                    let frame = AudioFrame::new(
                        vec![0u8; BUFFER_FRAMES * block],
                        info,
                        RationalTime::from_duration(
                            (start + elapsed).duration_since(timestamps.instant()) + skew,
                            RationalTime::MICROS,
                        ),
                        RationalTime::from_duration(buffer_duration, RationalTime::MICROS),
                        Timestamp::Instant(start + elapsed),
                    );

                    diagnostics.audio_captured();

                    if tx.send(frame).await.is_err() {
                        break;
                    }

                    sample_offset += BUFFER_FRAMES as u64;

                    let target =
                        start + buffer_duration * (sample_offset / BUFFER_FRAMES as u64) as u32;
                    let now = Instant::now();
                    if target > now {
                        tokio::time::sleep(target - now).await;
                    }
                }

                trace!("system audio capture finished at sample {sample_offset}");
                Ok(())
            }
        });

        async move { Ok(Self { info, stop_flag }) }
    }

    fn audio_info(&self) -> AudioInfo {
        self.info
    }

    fn stop(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send {
        self.stop_flag.store(true, Ordering::Relaxed);
        async { Ok(()) }
    }
}
