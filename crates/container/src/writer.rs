use crate::{
    ContainerError, ContainerHeader, ContainerTrailer, FLAG_KEYFRAME, MAGIC, RECORD_CHUNK,
    RECORD_TRAILER, TrackSummary, VERSION,
};
use byteorder::{BigEndian, WriteBytesExt};
use reel_timestamp::RationalTime;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

struct TrackState {
    id: u8,
    samples: u64,
    first_pts: Option<RationalTime>,
    last_pts: Option<RationalTime>,
    last_duration: RationalTime,
}

/// Streaming writer for the chunked container. `finish` stamps the trailer;
/// `cancel` deletes the partial file. Dropping without either leaves a
/// trailer-less file that readers report as truncated.
pub struct ChunkWriter {
    out: BufWriter<File>,
    path: PathBuf,
    tracks: Vec<TrackState>,
    finished: bool,
}

impl ChunkWriter {
    pub fn create(path: impl AsRef<Path>, header: ContainerHeader) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path)?);

        let header_json = serde_json::to_vec(&header).map_err(ContainerError::BadHeader)?;

        out.write_all(MAGIC)?;
        out.write_u16::<BigEndian>(VERSION)?;
        out.write_u32::<BigEndian>(header_json.len() as u32)?;
        out.write_all(&header_json)?;
        out.flush()?;

        let tracks = header
            .tracks
            .iter()
            .map(|t| TrackState {
                id: t.id,
                samples: 0,
                first_pts: None,
                last_pts: None,
                last_duration: RationalTime::zero(),
            })
            .collect();

        Ok(Self {
            out,
            path,
            tracks,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &mut self,
        track: u8,
        keyframe: bool,
        pts: RationalTime,
        duration: RationalTime,
        payload: &[u8],
    ) -> Result<(), ContainerError> {
        if self.finished {
            return Err(ContainerError::AlreadyFinished);
        }

        let state = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track)
            .ok_or(ContainerError::UnknownTrack(track))?;

        let mut flags = 0u8;
        if keyframe {
            flags |= FLAG_KEYFRAME;
        }

        self.out.write_u8(RECORD_CHUNK)?;
        self.out.write_u8(track)?;
        self.out.write_u8(flags)?;
        self.out.write_i64::<BigEndian>(pts.value)?;
        self.out.write_u32::<BigEndian>(pts.timescale)?;
        self.out.write_i64::<BigEndian>(duration.value)?;
        self.out.write_u32::<BigEndian>(duration.timescale)?;
        self.out.write_u32::<BigEndian>(payload.len() as u32)?;
        self.out.write_all(payload)?;
        self.out.write_u32::<BigEndian>(crc32fast::hash(payload))?;

        state.samples += 1;
        if state.first_pts.is_none() {
            state.first_pts = Some(pts);
        }
        state.last_pts = Some(pts);
        state.last_duration = duration;

        Ok(())
    }

    /// Writes the trailer and flushes. Idempotence is the caller's problem;
    /// a second call is an [`ContainerError::AlreadyFinished`] error.
    pub fn finish(&mut self) -> Result<ContainerTrailer, ContainerError> {
        if self.finished {
            return Err(ContainerError::AlreadyFinished);
        }
        self.finished = true;

        let tracks: Vec<TrackSummary> = self
            .tracks
            .iter()
            .map(|t| {
                let duration_secs = match (t.first_pts, t.last_pts) {
                    (Some(first), Some(last)) => {
                        last.sub(first).as_secs_f64() + t.last_duration.as_secs_f64()
                    }
                    _ => 0.0,
                };

                TrackSummary {
                    id: t.id,
                    samples: t.samples,
                    first_pts_secs: t.first_pts.map(|p| p.as_secs_f64()),
                    last_pts_secs: t.last_pts.map(|p| p.as_secs_f64()),
                    duration_secs,
                }
            })
            .collect();

        let trailer = ContainerTrailer {
            duration_secs: tracks
                .iter()
                .map(|t| t.duration_secs)
                .fold(0.0f64, f64::max),
            tracks,
        };

        let trailer_json = serde_json::to_vec(&trailer).map_err(ContainerError::BadTrailer)?;

        self.out.write_u8(RECORD_TRAILER)?;
        self.out.write_u32::<BigEndian>(trailer_json.len() as u32)?;
        self.out.write_all(&trailer_json)?;
        self.out.flush()?;

        Ok(trailer)
    }

    /// Abandons the recording and removes the file from disk.
    pub fn cancel(&mut self) -> Result<(), ContainerError> {
        self.finished = true;
        self.out.flush()?;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
