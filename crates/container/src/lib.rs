//! Chunked recording container.
//!
//! Output files are a linear stream: a magic/version header, a JSON track
//! table, length-delimited CRC-checked sample chunks, and a JSON trailer
//! written at finalization. A file without a trailer is detectably
//! truncated, which is how crash recovery tooling tells a dead recording
//! from a finished one.

mod reader;
mod writer;

pub use reader::{ChunkReader, ReadChunk};
pub use writer::ChunkWriter;

use serde::{Deserialize, Serialize};

pub(crate) const MAGIC: &[u8; 4] = b"RELC";
pub(crate) const VERSION: u16 = 1;

pub(crate) const RECORD_CHUNK: u8 = 0x01;
pub(crate) const RECORD_TRAILER: u8 = 0x02;

pub(crate) const FLAG_KEYFRAME: u8 = 0x01;

/// Hard cap on a single chunk payload. Catches corrupt length fields before
/// they turn into multi-gigabyte allocations.
pub(crate) const MAX_CHUNK_LEN: u32 = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a recording container")]
    BadMagic,
    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u16),
    #[error("Header decode failed: {0}")]
    BadHeader(serde_json::Error),
    #[error("Trailer decode failed: {0}")]
    BadTrailer(serde_json::Error),
    #[error("Chunk for unknown track {0}")]
    UnknownTrack(u8),
    #[error("Chunk length {0} exceeds limit")]
    OversizedChunk(u32),
    #[error("Chunk CRC mismatch at offset {0}")]
    CrcMismatch(u64),
    #[error("Writer already finished")]
    AlreadyFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDesc {
    pub id: u8,
    pub kind: TrackKind,
    /// Codec tag the settings derivation chose, e.g. `h264`, `hevc`, `aac`.
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHeader {
    pub tracks: Vec<TrackDesc>,
}

impl ContainerHeader {
    pub fn track(&self, id: u8) -> Option<&TrackDesc> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: u8,
    pub samples: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_pts_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pts_secs: Option<f64>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTrailer {
    pub tracks: Vec<TrackSummary>,
    /// Longest written track duration; what playback reports as file length.
    pub duration_secs: f64,
}

impl ContainerTrailer {
    pub fn track(&self, id: u8) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_timestamp::RationalTime;
    use std::time::Duration;

    fn video_header() -> ContainerHeader {
        ContainerHeader {
            tracks: vec![TrackDesc {
                id: 0,
                kind: TrackKind::Video,
                codec: "h264".into(),
                width: Some(640),
                height: Some(360),
                fps: Some(30),
                sample_rate: None,
                channels: None,
                bit_rate: Some(2_000_000),
            }],
        }
    }

    #[test]
    fn finished_file_reports_duration_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mov");

        let mut writer = ChunkWriter::create(&path, video_header()).unwrap();
        let frame_duration = RationalTime::from_duration(Duration::from_millis(33), 600);
        for i in 0..10i64 {
            writer
                .append(
                    0,
                    i == 0,
                    RationalTime::new(i * 20, 600),
                    frame_duration,
                    &[0u8; 128],
                )
                .unwrap();
        }
        let trailer = writer.finish().unwrap();

        assert_eq!(trailer.tracks[0].samples, 10);
        assert!(trailer.duration_secs > 0.3 && trailer.duration_secs < 0.4);

        let mut reader = ChunkReader::open(&path).unwrap();
        assert_eq!(reader.header().tracks[0].codec, "h264");

        let mut count = 0;
        while let Some(chunk) = reader.next_chunk().unwrap() {
            assert_eq!(chunk.track, 0);
            assert_eq!(chunk.payload.len(), 128);
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(reader.trailer().unwrap().tracks[0].samples, 10);
    }

    #[test]
    fn truncated_file_has_no_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead.mov");

        let mut writer = ChunkWriter::create(&path, video_header()).unwrap();
        writer
            .append(
                0,
                true,
                RationalTime::zero(),
                RationalTime::from_micros(33_333),
                &[1u8; 64],
            )
            .unwrap();
        // Simulate a crash: drop without finish.
        drop(writer);

        let mut reader = ChunkReader::open(&path).unwrap();
        assert!(reader.next_chunk().unwrap().is_some());
        assert!(reader.next_chunk().unwrap().is_none());
        assert!(reader.trailer().is_none());
    }

    #[test]
    fn cancel_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancelled.mov");

        let mut writer = ChunkWriter::create(&path, video_header()).unwrap();
        assert!(path.exists());
        writer.cancel().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn rejects_unknown_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mov");

        let mut writer = ChunkWriter::create(&path, video_header()).unwrap();
        let err = writer
            .append(7, false, RationalTime::zero(), RationalTime::zero(), &[])
            .unwrap_err();

        assert!(matches!(err, ContainerError::UnknownTrack(7)));
    }
}
