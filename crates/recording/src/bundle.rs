use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

pub const BUNDLE_FILE_NAME: &str = "bundle.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Screen,
    Camera,
    Microphone,
}

/// One produced file. Optional fields are best-effort; consumers tolerate
/// their absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFile {
    pub filename: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_start_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_end_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl BundleFile {
    pub fn new(filename: impl Into<String>, file_type: FileType) -> Self {
        Self {
            filename: filename.into(),
            file_type,
            recording_start_timestamp: None,
            recording_end_timestamp: None,
            codec: None,
            width: None,
            height: None,
            fps: None,
            has_audio: None,
            sample_rate: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    pub files: Vec<BundleFile>,
}

impl BundleInfo {
    /// Session origin: the earliest start timestamp across entries. Per-file
    /// offsets are computed by consumers against this.
    pub fn earliest_start(&self) -> Option<f64> {
        self.files
            .iter()
            .filter_map(|f| f.recording_start_timestamp)
            .fold(None, |acc, t| {
                Some(match acc {
                    Some(prev) if prev <= t => prev,
                    _ => t,
                })
            })
    }

    pub fn save(&self, session_dir: &Path) -> io::Result<PathBuf> {
        let path = session_dir.join(BUNDLE_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(session_dir: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(session_dir.join(BUNDLE_FILE_NAME))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `<base>-<YYYY-MM-DD_HH-mm-ss>`; the timestamp prefix keeps concurrent
/// sessions from colliding in the same output directory.
pub fn session_dir_name(base_name: &str) -> String {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    format!("{base_name}-{stamp}")
}

pub fn system_time_to_epoch_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -(e.duration().as_secs_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle() -> BundleInfo {
        BundleInfo {
            files: vec![
                BundleFile {
                    recording_start_timestamp: Some(1000.25),
                    recording_end_timestamp: Some(1003.25),
                    codec: Some("h264".into()),
                    width: Some(200),
                    height: Some(200),
                    fps: Some(60),
                    has_audio: Some(false),
                    ..BundleFile::new("capture.mov", FileType::Screen)
                },
                BundleFile {
                    recording_start_timestamp: Some(1000.5),
                    sample_rate: Some(48_000),
                    ..BundleFile::new("capture-mic.m4a", FileType::Microphone)
                },
            ],
        }
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = sample_bundle();

        bundle.save(dir.path()).unwrap();
        let loaded = BundleInfo::load(dir.path()).unwrap();

        assert_eq!(bundle, loaded);
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let json = r#"{"files":[{"filename":"a.mov","type":"screen"}]}"#;
        let bundle: BundleInfo = serde_json::from_str(json).unwrap();

        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.files[0].file_type, FileType::Screen);
        assert!(bundle.files[0].codec.is_none());
    }

    #[test]
    fn type_tag_serializes_lowercase() {
        let json = serde_json::to_string(&sample_bundle()).unwrap();
        assert!(json.contains(r#""type": "screen""#) || json.contains(r#""type":"screen""#));
        assert!(json.contains("recordingStartTimestamp"));
    }

    #[test]
    fn earliest_start_picks_minimum() {
        let bundle = sample_bundle();
        assert_eq!(bundle.earliest_start(), Some(1000.25));

        assert_eq!(BundleInfo::default().earliest_start(), None);
    }

    #[test]
    fn session_dir_name_has_timestamp_prefix() {
        let name = session_dir_name("capture");
        assert!(name.starts_with("capture-"));
        assert_eq!(name.len(), "capture-".len() + 19);
    }
}
