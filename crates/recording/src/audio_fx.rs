use crate::plan::MicrophoneOptions;
use reel_media_info::SampleFormat;

const RMS_EPSILON: f32 = 1e-6;
/// First-order low-pass coefficient for AGC gain smoothing.
const AGC_ALPHA: f32 = 0.1;

/// Capture-side microphone processing: static gain, an RMS-tracking AGC,
/// and an optional soft limiter. Stateful across buffers; one instance per
/// stream.
pub struct MicGainChain {
    linear_gain: f32,
    agc_enabled: bool,
    agc_target_rms: f32,
    agc_max_gain: f32,
    limiter_enabled: bool,
    smoothed_gain: f32,
}

impl MicGainChain {
    pub fn new(options: &MicrophoneOptions) -> Self {
        Self {
            linear_gain: options.linear_gain.max(0.0),
            agc_enabled: options.enable_agc,
            agc_target_rms: options.agc_target_rms,
            agc_max_gain: 10f32.powf(options.agc_max_gain_db / 20.0),
            limiter_enabled: options.enable_limiter,
            smoothed_gain: 1.0,
        }
    }

    /// Processes an interleaved buffer in place. Formats other than 16-bit
    /// PCM and 32-bit float pass through unchanged.
    pub fn process(&mut self, data: &mut [u8], format: SampleFormat, channels: usize) {
        match format {
            SampleFormat::F32 => self.process_f32_bytes(data, channels),
            SampleFormat::I16 => self.process_i16_bytes(data, channels),
            _ => {}
        }
    }

    fn process_f32_bytes(&mut self, data: &mut [u8], channels: usize) {
        let mut samples: Vec<f32> = data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        self.process_samples(&mut samples, channels);

        for (chunk, sample) in data.chunks_exact_mut(4).zip(&samples) {
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }
    }

    fn process_i16_bytes(&mut self, data: &mut [u8], channels: usize) {
        let mut samples: Vec<f32> = data
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_ne_bytes([b[0], b[1]])) / 32768.0)
            .collect();

        self.process_samples(&mut samples, channels);

        for (chunk, sample) in data.chunks_exact_mut(2).zip(&samples) {
            let quantized = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            chunk.copy_from_slice(&quantized.to_ne_bytes());
        }
    }

    pub fn process_samples(&mut self, samples: &mut [f32], channels: usize) {
        let channels = channels.max(1);

        let gain = if self.agc_enabled {
            // RMS on channel 0 drives the whole buffer's gain.
            let rms = channel_rms(samples, channels);
            let desired = (self.agc_target_rms / rms.max(RMS_EPSILON)).min(self.agc_max_gain);
            self.smoothed_gain = AGC_ALPHA * desired + (1.0 - AGC_ALPHA) * self.smoothed_gain;
            self.linear_gain * self.smoothed_gain
        } else {
            self.linear_gain
        };

        for sample in samples.iter_mut() {
            let mut value = *sample * gain;
            if self.limiter_enabled {
                value = (2.0 * value).tanh();
            }
            *sample = value.clamp(-1.0, 1.0);
        }
    }
}

fn channel_rms(samples: &[f32], channels: usize) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for sample in samples.iter().step_by(channels) {
        sum += sample * sample;
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MicrophoneOptions {
        MicrophoneOptions {
            enable_processing: true,
            linear_gain: 1.0,
            enable_agc: false,
            agc_target_rms: 0.1,
            agc_max_gain_db: 18.0,
            enable_limiter: false,
            channels: 1,
        }
    }

    #[test]
    fn static_gain_scales_samples() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            linear_gain: 2.0,
            ..options()
        });

        let mut samples = vec![0.1f32, -0.2, 0.3];
        chain.process_samples(&mut samples, 1);

        assert!((samples[0] - 0.2).abs() < 1e-6);
        assert!((samples[1] + 0.4).abs() < 1e-6);
    }

    #[test]
    fn agc_raises_quiet_signal_toward_target() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            enable_agc: true,
            agc_target_rms: 0.2,
            agc_max_gain_db: 30.0,
            ..options()
        });

        let quiet: Vec<f32> = (0..1024)
            .map(|i| 0.01 * (i as f32 * 0.3).sin())
            .collect();

        let mut last_rms = 0.0;
        for _ in 0..50 {
            let mut buffer = quiet.clone();
            chain.process_samples(&mut buffer, 1);
            last_rms = channel_rms(&buffer, 1);
        }

        assert!(last_rms > 0.1, "rms {last_rms} should approach target");
    }

    #[test]
    fn agc_gain_is_capped() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            enable_agc: true,
            agc_target_rms: 0.9,
            agc_max_gain_db: 6.0,
            ..options()
        });

        // Near-silence would demand enormous gain; the dB cap holds it.
        for _ in 0..100 {
            let mut buffer = vec![1e-5f32; 256];
            chain.process_samples(&mut buffer, 1);
        }

        assert!(chain.smoothed_gain <= 10f32.powf(6.0 / 20.0) + 1e-3);
    }

    #[test]
    fn limiter_bounds_hot_signal() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            linear_gain: 4.0,
            enable_limiter: true,
            ..options()
        });

        let mut samples = vec![0.9f32, -0.9, 0.5];
        chain.process_samples(&mut samples, 1);

        for s in &samples {
            assert!(s.abs() <= 1.0);
        }
        // tanh compresses but keeps sign and order.
        assert!(samples[0] > 0.9 && samples[1] < -0.9);
    }

    #[test]
    fn i16_buffers_round_trip() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            linear_gain: 2.0,
            ..options()
        });

        let input: Vec<i16> = vec![1000, -2000, 3000, -4000];
        let mut bytes: Vec<u8> = input.iter().flat_map(|s| s.to_ne_bytes()).collect();

        chain.process(&mut bytes, SampleFormat::I16, 2);

        let output: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert!((i32::from(output[0]) - 2000).abs() <= 1);
        assert!((i32::from(output[3]) + 8000).abs() <= 2);
    }

    #[test]
    fn unsupported_formats_pass_through() {
        let mut chain = MicGainChain::new(&MicrophoneOptions {
            linear_gain: 2.0,
            ..options()
        });

        let mut bytes = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let original = bytes.clone();
        chain.process(&mut bytes, SampleFormat::F64, 1);

        assert_eq!(bytes, original);
    }
}
