use crate::{
    RecordingError,
    bundle::FileType,
    devices::{DeviceRegistry, DisplayId, WindowId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenOptions {
    pub fps: u32,
    pub queue_depth: Option<usize>,
    pub target_bit_rate: Option<u32>,
    pub include_audio: bool,
    pub shows_cursor: bool,
    pub hdr: bool,
    pub use_hevc: bool,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            fps: 60,
            queue_depth: None,
            target_bit_rate: None,
            include_audio: false,
            shows_cursor: true,
            hdr: false,
            use_hevc: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraPreset {
    Vga480p,
    Hd720p,
    Hd1080p,
    Uhd2160p,
}

impl CameraPreset {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Vga480p => (640, 480),
            Self::Hd720p => (1280, 720),
            Self::Hd1080p => (1920, 1080),
            Self::Uhd2160p => (3840, 2160),
        }
    }

    pub fn fps(&self) -> u32 {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraOptions {
    pub preset: CameraPreset,
    pub prefer_hevc: bool,
    pub bpp_h264: f64,
    pub bpp_hevc: f64,
    pub min_bitrate: u32,
    pub max_bitrate: u32,
    pub bitrate_fps_override: Option<u32>,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            preset: CameraPreset::Hd720p,
            prefer_hevc: false,
            bpp_h264: 0.060,
            bpp_hevc: 0.035,
            min_bitrate: 1_000_000,
            max_bitrate: 12_000_000,
            bitrate_fps_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneOptions {
    pub enable_processing: bool,
    pub linear_gain: f32,
    pub enable_agc: bool,
    pub agc_target_rms: f32,
    pub agc_max_gain_db: f32,
    pub enable_limiter: bool,
    pub channels: u16,
}

impl Default for MicrophoneOptions {
    fn default() -> Self {
        Self {
            enable_processing: true,
            linear_gain: 1.0,
            enable_agc: false,
            agc_target_rms: 0.1,
            agc_max_gain_db: 18.0,
            enable_limiter: false,
            channels: 1,
        }
    }
}

/// One capture source in a recording plan, bound to its output filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "variant")]
pub enum SchemeItem {
    Display {
        display_id: DisplayId,
        crop: Option<CropRect>,
        hdr: bool,
        capture_system_audio: bool,
        filename: String,
        options: ScreenOptions,
        #[serde(default)]
        excluded_window_titles: Vec<String>,
    },
    Window {
        display_id: DisplayId,
        window_id: WindowId,
        hdr: bool,
        capture_system_audio: bool,
        filename: String,
        options: ScreenOptions,
    },
    Camera {
        camera_id: String,
        filename: String,
        options: CameraOptions,
    },
    Microphone {
        microphone_id: String,
        filename: String,
        options: MicrophoneOptions,
    },
}

impl SchemeItem {
    pub fn filename(&self) -> &str {
        match self {
            Self::Display { filename, .. }
            | Self::Window { filename, .. }
            | Self::Camera { filename, .. }
            | Self::Microphone { filename, .. } => filename,
        }
    }

    pub fn file_type(&self) -> FileType {
        match self {
            Self::Display { .. } | Self::Window { .. } => FileType::Screen,
            Self::Camera { .. } => FileType::Camera,
            Self::Microphone { .. } => FileType::Microphone,
        }
    }

    pub fn is_screen(&self) -> bool {
        matches!(self, Self::Display { .. } | Self::Window { .. })
    }

    /// Label used in errors and diagnostics.
    pub fn label(&self) -> String {
        match self {
            Self::Display { display_id, .. } => format!("display-{display_id}"),
            Self::Window { window_id, .. } => format!("window-{window_id}"),
            Self::Camera { camera_id, .. } => format!("camera-{camera_id}"),
            Self::Microphone { microphone_id, .. } => format!("microphone-{microphone_id}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPlan {
    pub items: Vec<SchemeItem>,
}

impl RecordingPlan {
    pub fn new(items: Vec<SchemeItem>) -> Self {
        Self { items }
    }

    pub fn validate(&self, registry: &DeviceRegistry) -> Result<(), RecordingError> {
        if self.items.is_empty() {
            return Err(RecordingError::PlanInvalid("plan has no sources".into()));
        }

        let mut filenames = HashSet::new();
        for item in &self.items {
            let filename = item.filename();
            if filename.is_empty() {
                return Err(RecordingError::PlanInvalid(format!(
                    "{} has an empty filename",
                    item.label()
                )));
            }
            if filename.contains('/') || filename.contains('\\') {
                return Err(RecordingError::PlanInvalid(format!(
                    "filename {filename:?} must not contain path separators"
                )));
            }
            if !filenames.insert(filename) {
                return Err(RecordingError::PlanInvalid(format!(
                    "duplicate filename {filename:?}"
                )));
            }
        }

        let screens = self.items.iter().filter(|i| i.is_screen()).count();
        if screens > 1 {
            return Err(RecordingError::PlanInvalid(
                "at most one display or window scheme is allowed".into(),
            ));
        }

        for item in &self.items {
            self.validate_item(item, registry)?;
        }

        Ok(())
    }

    fn validate_item(
        &self,
        item: &SchemeItem,
        registry: &DeviceRegistry,
    ) -> Result<(), RecordingError> {
        let permissions = registry.permissions();

        match item {
            SchemeItem::Display {
                display_id,
                crop,
                options,
                ..
            } => {
                let display = registry.display(*display_id).ok_or_else(|| {
                    RecordingError::PlanInvalid(format!("unknown display {display_id}"))
                })?;
                if !permissions.screen {
                    return Err(RecordingError::PermissionDenied(
                        "screen capture permission is not granted".into(),
                    ));
                }
                validate_screen_options(options)?;
                if let Some(crop) = crop {
                    if crop.width == 0 || crop.height == 0 {
                        return Err(RecordingError::PlanInvalid("empty crop rect".into()));
                    }
                    if crop.x + crop.width > display.width || crop.y + crop.height > display.height
                    {
                        return Err(RecordingError::PlanInvalid(format!(
                            "crop exceeds display bounds {}x{}",
                            display.width, display.height
                        )));
                    }
                }
            }
            SchemeItem::Window {
                display_id,
                window_id,
                options,
                ..
            } => {
                registry.display(*display_id).ok_or_else(|| {
                    RecordingError::PlanInvalid(format!("unknown display {display_id}"))
                })?;
                registry.window(*window_id).ok_or_else(|| {
                    RecordingError::PlanInvalid(format!("unknown window {window_id}"))
                })?;
                if !permissions.screen {
                    return Err(RecordingError::PermissionDenied(
                        "screen capture permission is not granted".into(),
                    ));
                }
                validate_screen_options(options)?;
            }
            SchemeItem::Camera { camera_id, .. } => {
                registry.camera(camera_id).ok_or_else(|| {
                    RecordingError::PlanInvalid(format!("unknown camera {camera_id:?}"))
                })?;
                if !permissions.camera {
                    return Err(RecordingError::PermissionDenied(
                        "camera permission is not granted".into(),
                    ));
                }
            }
            SchemeItem::Microphone {
                microphone_id,
                options,
                ..
            } => {
                registry.microphone(microphone_id).ok_or_else(|| {
                    RecordingError::PlanInvalid(format!("unknown microphone {microphone_id:?}"))
                })?;
                if !permissions.microphone {
                    return Err(RecordingError::PermissionDenied(
                        "microphone permission is not granted".into(),
                    ));
                }
                validate_microphone_options(options)?;
            }
        }

        Ok(())
    }
}

fn validate_screen_options(options: &ScreenOptions) -> Result<(), RecordingError> {
    if !(1..=240).contains(&options.fps) {
        return Err(RecordingError::PlanInvalid(format!(
            "fps {} outside supported range 1..=240",
            options.fps
        )));
    }
    if options.queue_depth == Some(0) {
        return Err(RecordingError::PlanInvalid(
            "queue depth must be at least 1".into(),
        ));
    }
    Ok(())
}

fn validate_microphone_options(options: &MicrophoneOptions) -> Result<(), RecordingError> {
    if !(0.0..=4.0).contains(&options.linear_gain) {
        return Err(RecordingError::PlanInvalid(format!(
            "linear gain {} outside [0, 4]",
            options.linear_gain
        )));
    }
    if options.enable_agc && !(options.agc_target_rms > 0.0 && options.agc_target_rms <= 0.9) {
        return Err(RecordingError::PlanInvalid(format!(
            "AGC target RMS {} outside (0, 0.9]",
            options.agc_target_rms
        )));
    }
    if !matches!(options.channels, 1 | 2) {
        return Err(RecordingError::PlanInvalid(format!(
            "microphone channels {} must be 1 or 2",
            options.channels
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display_item(filename: &str) -> SchemeItem {
        SchemeItem::Display {
            display_id: 0,
            crop: None,
            hdr: false,
            capture_system_audio: false,
            filename: filename.into(),
            options: ScreenOptions::default(),
            excluded_window_titles: vec![],
        }
    }

    fn mic_item(filename: &str) -> SchemeItem {
        SchemeItem::Microphone {
            microphone_id: "default".into(),
            filename: filename.into(),
            options: MicrophoneOptions::default(),
        }
    }

    #[test]
    fn accepts_screen_camera_and_mics() {
        let registry = DeviceRegistry::synthetic();
        let plan = RecordingPlan::new(vec![
            display_item("screen.mov"),
            SchemeItem::Camera {
                camera_id: "default".into(),
                filename: "camera.mov".into(),
                options: CameraOptions::default(),
            },
            mic_item("mic.m4a"),
        ]);

        assert!(plan.validate(&registry).is_ok());
    }

    #[test]
    fn rejects_duplicate_filenames() {
        let registry = DeviceRegistry::synthetic();
        let plan = RecordingPlan::new(vec![display_item("out.mov"), mic_item("out.mov")]);

        assert!(matches!(
            plan.validate(&registry),
            Err(RecordingError::PlanInvalid(_))
        ));
    }

    #[test]
    fn filenames_are_case_sensitive() {
        let registry = DeviceRegistry::synthetic();
        let plan = RecordingPlan::new(vec![display_item("Out.mov"), mic_item("out.mov")]);

        assert!(plan.validate(&registry).is_ok());
    }

    #[test]
    fn rejects_two_screens() {
        let registry = DeviceRegistry::synthetic();
        let plan = RecordingPlan::new(vec![
            display_item("a.mov"),
            SchemeItem::Window {
                display_id: 0,
                window_id: 1,
                hdr: false,
                capture_system_audio: false,
                filename: "b.mov".into(),
                options: ScreenOptions::default(),
            },
        ]);

        assert!(matches!(
            plan.validate(&registry),
            Err(RecordingError::PlanInvalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_devices() {
        let registry = DeviceRegistry::synthetic();

        let plan = RecordingPlan::new(vec![SchemeItem::Camera {
            camera_id: "ghost".into(),
            filename: "cam.mov".into(),
            options: CameraOptions::default(),
        }]);
        assert!(matches!(
            plan.validate(&registry),
            Err(RecordingError::PlanInvalid(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_options() {
        let registry = DeviceRegistry::synthetic();

        let mut options = ScreenOptions::default();
        options.fps = 300;
        let plan = RecordingPlan::new(vec![SchemeItem::Display {
            display_id: 0,
            crop: None,
            hdr: false,
            capture_system_audio: false,
            filename: "screen.mov".into(),
            options,
            excluded_window_titles: vec![],
        }]);
        assert!(plan.validate(&registry).is_err());

        let mut mic = MicrophoneOptions::default();
        mic.linear_gain = 5.0;
        let plan = RecordingPlan::new(vec![SchemeItem::Microphone {
            microphone_id: "default".into(),
            filename: "mic.m4a".into(),
            options: mic,
        }]);
        assert!(plan.validate(&registry).is_err());
    }

    #[test]
    fn rejects_oversized_crop() {
        let registry = DeviceRegistry::synthetic();
        let plan = RecordingPlan::new(vec![SchemeItem::Display {
            display_id: 0,
            crop: Some(CropRect {
                x: 1800,
                y: 0,
                width: 400,
                height: 200,
            }),
            hdr: false,
            capture_system_audio: false,
            filename: "screen.mov".into(),
            options: ScreenOptions::default(),
            excluded_window_titles: vec![],
        }]);

        assert!(plan.validate(&registry).is_err());
    }

    #[test]
    fn permission_failures_surface_as_permission_denied() {
        let mut registry = DeviceRegistry::synthetic();
        registry.set_permissions(crate::devices::CapturePermissions {
            screen: false,
            camera: true,
            microphone: true,
        });

        let plan = RecordingPlan::new(vec![display_item("screen.mov")]);
        assert!(matches!(
            plan.validate(&registry),
            Err(RecordingError::PermissionDenied(_))
        ));
    }
}
