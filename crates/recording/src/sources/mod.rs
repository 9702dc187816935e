pub mod camera;
pub mod microphone;
pub mod screen;
pub mod system_audio;

pub use camera::{CameraSource, CameraSourceConfig};
pub use microphone::{MicrophoneSource, MicrophoneSourceConfig};
pub use screen::{ScreenBackendKind, ScreenSource, ScreenSourceConfig};
pub use system_audio::{SystemAudioSource, SystemAudioSourceConfig};

use reel_media_info::{PixelFormat, VideoInfo};

/// Fills a synthetic capture frame. BGRA gets a moving gradient with a frame
/// counter band (and optionally a cursor block); other layouts get flat
/// mid-range content of the right size.
pub(crate) fn generate_video_frame(
    info: &VideoInfo,
    frame_number: u64,
    cursor: Option<(u32, u32)>,
) -> Vec<u8> {
    let size = info.frame_size();

    if info.pixel_format != PixelFormat::Bgra {
        return vec![128u8; size];
    }

    let width = info.width as usize;
    let height = info.height as usize;
    let phase = (frame_number % 256) as u8;
    let mut data = vec![0u8; size];

    for y in 0..height {
        let row = y * width * 4;
        for x in 0..width {
            let offset = row + x * 4;
            data[offset] = ((x * 255 / width.max(1)) as u8).wrapping_add(phase);
            data[offset + 1] = ((y * 255 / height.max(1)) as u8).wrapping_add(phase);
            data[offset + 2] = phase;
            data[offset + 3] = 255;
        }
    }

    // Counter band along the top row encodes the frame number.
    let band = (frame_number % width.max(1) as u64) as usize;
    for x in 0..band {
        let offset = x * 4;
        data[offset..offset + 4].copy_from_slice(&[255, 255, 255, 255]);
    }

    if let Some((cx, cy)) = cursor {
        let cx = (cx as usize).min(width.saturating_sub(8));
        let cy = (cy as usize).min(height.saturating_sub(8));
        for y in cy..(cy + 8).min(height) {
            for x in cx..(cx + 8).min(width) {
                let offset = y * width * 4 + x * 4;
                data[offset..offset + 4].copy_from_slice(&[0, 0, 0, 255]);
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_frames_vary_by_frame_number() {
        let info = VideoInfo::new(PixelFormat::Bgra, 64, 64, 30);

        let a = generate_video_frame(&info, 0, None);
        let b = generate_video_frame(&info, 1, None);

        assert_eq!(a.len(), info.frame_size());
        assert_ne!(a, b);
    }

    #[test]
    fn non_bgra_frames_are_flat_but_sized() {
        let info = VideoInfo::new(PixelFormat::P010, 64, 64, 30);
        let frame = generate_video_frame(&info, 3, None);

        assert_eq!(frame.len(), info.frame_size());
    }
}
