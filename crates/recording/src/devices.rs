use indexmap::IndexMap;
use reel_media_info::SampleFormat;
use serde::{Deserialize, Serialize};

pub type DisplayId = u32;
pub type WindowId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDevice {
    pub id: DisplayId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDevice {
    pub id: WindowId,
    pub display_id: DisplayId,
    pub title: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneDevice {
    pub id: String,
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Capture permissions as the platform layer reports them. Checked during
/// `prepare`; a revoked permission there is the earliest point the engine
/// can fail cleanly.
#[derive(Debug, Clone, Copy)]
pub struct CapturePermissions {
    pub screen: bool,
    pub camera: bool,
    pub microphone: bool,
}

impl Default for CapturePermissions {
    fn default() -> Self {
        Self {
            screen: true,
            camera: true,
            microphone: true,
        }
    }
}

/// The devices a plan may reference. Platform registries populate this from
/// their display/camera/audio enumeration APIs; the in-tree constructor
/// provides the synthetic set the bundled backends drive.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    displays: IndexMap<DisplayId, DisplayDevice>,
    windows: IndexMap<WindowId, WindowDevice>,
    cameras: IndexMap<String, CameraDevice>,
    microphones: IndexMap<String, MicrophoneDevice>,
    permissions: CapturePermissions,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            permissions: CapturePermissions::default(),
            ..Default::default()
        }
    }

    pub fn synthetic() -> Self {
        let mut registry = Self::new();

        registry.add_display(DisplayDevice {
            id: 0,
            name: "Built-in Display".into(),
            width: 1920,
            height: 1080,
            refresh_rate: 60,
        });
        registry.add_window(WindowDevice {
            id: 1,
            display_id: 0,
            title: "Demo Window".into(),
            width: 1280,
            height: 720,
        });
        registry.add_camera(CameraDevice {
            id: "default".into(),
            name: "Synthetic Camera".into(),
        });
        registry.add_microphone(MicrophoneDevice {
            id: "default".into(),
            name: "Synthetic Microphone".into(),
            sample_rate: 48_000,
            channels: 1,
            sample_format: SampleFormat::F32,
        });

        registry
    }

    pub fn add_display(&mut self, display: DisplayDevice) -> &mut Self {
        self.displays.insert(display.id, display);
        self
    }

    pub fn add_window(&mut self, window: WindowDevice) -> &mut Self {
        self.windows.insert(window.id, window);
        self
    }

    pub fn add_camera(&mut self, camera: CameraDevice) -> &mut Self {
        self.cameras.insert(camera.id.clone(), camera);
        self
    }

    pub fn add_microphone(&mut self, microphone: MicrophoneDevice) -> &mut Self {
        self.microphones.insert(microphone.id.clone(), microphone);
        self
    }

    pub fn set_permissions(&mut self, permissions: CapturePermissions) -> &mut Self {
        self.permissions = permissions;
        self
    }

    pub fn permissions(&self) -> CapturePermissions {
        self.permissions
    }

    pub fn display(&self, id: DisplayId) -> Option<&DisplayDevice> {
        self.displays.get(&id)
    }

    pub fn window(&self, id: WindowId) -> Option<&WindowDevice> {
        self.windows.get(&id)
    }

    pub fn camera(&self, id: &str) -> Option<&CameraDevice> {
        self.cameras.get(id)
    }

    pub fn microphone(&self, id: &str) -> Option<&MicrophoneDevice> {
        self.microphones.get(id)
    }

    pub fn displays(&self) -> impl Iterator<Item = &DisplayDevice> {
        self.displays.values()
    }

    pub fn microphones(&self) -> impl Iterator<Item = &MicrophoneDevice> {
        self.microphones.values()
    }
}
