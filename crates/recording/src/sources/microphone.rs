use crate::{
    audio_fx::MicGainChain,
    devices::MicrophoneDevice,
    frame::AudioFrame,
    output_pipeline::{AudioSource, SetupCtx},
    plan::MicrophoneOptions,
};
use futures::{SinkExt, channel::mpsc};
use reel_media_info::{AudioInfo, SampleFormat};
use reel_timestamp::{RationalTime, Timestamp, Timestamps};
use std::{
    f32::consts::PI,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::trace;

const BUFFER_FRAMES: usize = 1024;
const TONE_HZ: f32 = 440.0;

pub struct MicrophoneSourceConfig {
    pub device: MicrophoneDevice,
    pub options: MicrophoneOptions,
    pub timestamps: Timestamps,
}

pub struct MicrophoneSource {
    info: AudioInfo,
    stop_flag: Arc<AtomicBool>,
}

impl AudioSource for MicrophoneSource {
    type Config = MicrophoneSourceConfig;

    fn setup(
        config: Self::Config,
        mut tx: mpsc::Sender<AudioFrame>,
        ctx: &mut SetupCtx,
    ) -> impl Future<Output = anyhow::Result<Self>> + Send + 'static {
        let device = config.device;
        let options = config.options;

        // Capture at the device's native layout, deliver at most stereo.
        let device_info =
            AudioInfo::new_raw(device.sample_format, device.sample_rate, device.channels);
        let out_channels = options.channels.clamp(1, 2).min(device.channels.max(1));
        let info = device_info.with_max_channels(out_channels);

        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut gate = ctx.start_gate();
        let diagnostics = ctx.diagnostics();
        let cancel = ctx.stop_token();

        diagnostics.set_audio_sample_rate(info.sample_rate);

        ctx.tasks().spawn("microphone-capture", {
            let stop_flag = stop_flag.clone();
            let timestamps = config.timestamps;

            async move {
                if !gate.wait().await || cancel.is_cancelled() {
                    return Ok(());
                }

                let sample_rate = device_info.sample_rate.max(1);
                let buffer_duration =
                    Duration::from_secs_f64(BUFFER_FRAMES as f64 / f64::from(sample_rate));
                let start = Instant::now();

                let mut chain = options.enable_processing.then(|| MicGainChain::new(&options));
                let mut sample_offset = 0u64;

                loop {
                    if stop_flag.load(Ordering::Relaxed) || cancel.is_cancelled() {
                        break;
                    }

                    let packed = generate_tone(&device_info, sample_offset, BUFFER_FRAMES);
                    let mut data = device_info.downmix_packed(&packed, out_channels);

                    if let Some(chain) = chain.as_mut() {
                        chain.process(&mut data, info.sample_format, usize::from(out_channels));
                    }

                    let elapsed =
                        Duration::from_secs_f64(sample_offset as f64 / f64::from(sample_rate));
                    let frame = AudioFrame::new(
                        data,
                        info,
                        RationalTime::from_duration(
                            (start + elapsed).duration_since(timestamps.instant()),
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

                    let target = start + buffer_duration * (sample_offset / BUFFER_FRAMES as u64) as u32;
                    let now = Instant::now();
                    if target > now {
                        tokio::time::sleep(target - now).await;
                    }
                }

                trace!("microphone capture finished at sample {sample_offset}");
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

/// Interleaved test tone in the device's native format.
fn generate_tone(info: &AudioInfo, sample_offset: u64, frames: usize) -> Vec<u8> {
    let channels = usize::from(info.channels.max(1));
    let rate = info.sample_rate.max(1) as f32;

    let mut out = Vec::with_capacity(frames * channels * info.sample_size());

    for i in 0..frames {
        let t = (sample_offset + i as u64) as f32 / rate;
        let value = 0.25 * (2.0 * PI * TONE_HZ * t).sin();

        for _ in 0..channels {
            match info.sample_format {
                SampleFormat::I16 => {
                    out.extend_from_slice(&((value * 32767.0) as i16).to_ne_bytes())
                }
                _ => out.extend_from_slice(&value.to_ne_bytes()),
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_is_nonsilent_and_sized() {
        let info = AudioInfo::new_raw(SampleFormat::F32, 48_000, 2);
        let data = generate_tone(&info, 0, 256);

        assert_eq!(data.len(), 256 * 2 * 4);
        assert!(data.iter().any(|b| *b != 0));
    }

    #[test]
    fn i16_tone_uses_two_byte_samples() {
        let info = AudioInfo::new_raw(SampleFormat::I16, 16_000, 1);
        let data = generate_tone(&info, 100, 64);

        assert_eq!(data.len(), 64 * 2);
    }
}
