//! Multi-stream recording engine.
//!
//! A [`RecordingPlan`] names capture sources (a display region, a window, a
//! camera, microphones) and the files they record into. The
//! [`RecorderHandle`] drives them through prepare/start/stop, time-aligns
//! their sample streams per pipeline, and leaves behind a session bundle: a
//! directory of output files plus a `bundle.json` manifest a composition
//! step can replay or merge.

pub mod audio_fx;
pub mod bundle;
pub mod devices;
pub mod diagnostics;
pub mod frame;
pub mod output_pipeline;
pub mod plan;
pub mod queue;
pub mod recorder;
pub mod sources;
pub mod writer;

pub use bundle::{BundleFile, BundleInfo, FileType};
pub use devices::{CapturePermissions, DeviceRegistry};
pub use plan::{
    CameraOptions, CameraPreset, CropRect, MicrophoneOptions, RecordingPlan, SchemeItem,
    ScreenOptions,
};
pub use recorder::{
    DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT, RecorderBuilder, RecorderHandle, StopResult,
};
pub use sources::ScreenBackendKind;
pub use writer::{AppendOutcome, VideoCodec, WriterCaps, WriterStatus};

/// Error taxonomy of the engine. Fatal kinds reach the interrupt callback;
/// lifecycle misuse surfaces synchronously as `StateError`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordingError {
    #[error("Invalid plan: {0}")]
    PlanInvalid(String),
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Could not create output file: {0}")]
    FileCreateFailed(String),
    #[error("Writer setup failed: {0}")]
    WriterSetupFailed(String),
    #[error("Writer append failed: {0}")]
    WriterAppendFailed(String),
    #[error("No first frame within the start window from: {}", .0.join(", "))]
    StartTimeout(Vec<String>),
    #[error("Capture interrupted: {0}")]
    ExternalInterrupt(String),
    #[error("Invalid state: {0}")]
    StateError(String),
}
