use crate::{
    ContainerError, ContainerHeader, ContainerTrailer, FLAG_KEYFRAME, MAGIC, MAX_CHUNK_LEN,
    RECORD_CHUNK, RECORD_TRAILER, VERSION,
};
use byteorder::{BigEndian, ReadBytesExt};
use reel_timestamp::RationalTime;
use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek},
    path::Path,
};

#[derive(Debug, Clone)]
pub struct ReadChunk {
    pub track: u8,
    pub keyframe: bool,
    pub pts: RationalTime,
    pub duration: RationalTime,
    pub payload: Vec<u8>,
}

/// Sequential reader over a container file. After `next_chunk` returns
/// `None`, `trailer()` tells whether the file was finalized or truncated.
pub struct ChunkReader {
    input: BufReader<File>,
    header: ContainerHeader,
    trailer: Option<ContainerTrailer>,
    done: bool,
}

impl ChunkReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ContainerError::BadMagic);
        }

        let version = input.read_u16::<BigEndian>()?;
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }

        let header_len = input.read_u32::<BigEndian>()?;
        if header_len > MAX_CHUNK_LEN {
            return Err(ContainerError::OversizedChunk(header_len));
        }
        let mut header_json = vec![0u8; header_len as usize];
        input.read_exact(&mut header_json)?;
        let header = serde_json::from_slice(&header_json).map_err(ContainerError::BadHeader)?;

        Ok(Self {
            input,
            header,
            trailer: None,
            done: false,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Available once the chunk stream has been consumed; `None` means the
    /// file is truncated.
    pub fn trailer(&self) -> Option<&ContainerTrailer> {
        self.trailer.as_ref()
    }

    pub fn next_chunk(&mut self) -> Result<Option<ReadChunk>, ContainerError> {
        if self.done {
            return Ok(None);
        }

        let marker = match self.input.read_u8() {
            Ok(marker) => marker,
            // Clean EOF between records: truncated file, no trailer.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match marker {
            RECORD_CHUNK => match self.read_chunk_body() {
                Ok(chunk) => Ok(Some(chunk)),
                // A record torn mid-write reads the same as a missing one.
                Err(ContainerError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.done = true;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            RECORD_TRAILER => {
                self.read_trailer()?;
                self.done = true;
                Ok(None)
            }
            _ => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn read_chunk_body(&mut self) -> Result<ReadChunk, ContainerError> {
        let track = self.input.read_u8()?;
        let flags = self.input.read_u8()?;
        let pts_value = self.input.read_i64::<BigEndian>()?;
        let pts_timescale = self.input.read_u32::<BigEndian>()?;
        let dur_value = self.input.read_i64::<BigEndian>()?;
        let dur_timescale = self.input.read_u32::<BigEndian>()?;

        let len = self.input.read_u32::<BigEndian>()?;
        if len > MAX_CHUNK_LEN {
            return Err(ContainerError::OversizedChunk(len));
        }
        let mut payload = vec![0u8; len as usize];
        self.input.read_exact(&mut payload)?;

        let crc = self.input.read_u32::<BigEndian>()?;
        if crc != crc32fast::hash(&payload) {
            let offset = self.input.stream_position().unwrap_or_default();
            return Err(ContainerError::CrcMismatch(offset));
        }

        if self.header.track(track).is_none() {
            return Err(ContainerError::UnknownTrack(track));
        }

        Ok(ReadChunk {
            track,
            keyframe: flags & FLAG_KEYFRAME != 0,
            pts: RationalTime::new(pts_value, pts_timescale),
            duration: RationalTime::new(dur_value, dur_timescale),
            payload,
        })
    }

    fn read_trailer(&mut self) -> Result<(), ContainerError> {
        let len = self.input.read_u32::<BigEndian>()?;
        if len > MAX_CHUNK_LEN {
            return Err(ContainerError::OversizedChunk(len));
        }
        let mut trailer_json = vec![0u8; len as usize];
        self.input.read_exact(&mut trailer_json)?;

        self.trailer =
            Some(serde_json::from_slice(&trailer_json).map_err(ContainerError::BadTrailer)?);
        Ok(())
    }

    /// Drains the remaining chunks, returning the per-track sample counts.
    /// Convenience for validators that only care about totals.
    pub fn drain_counts(&mut self) -> Result<Vec<(u8, u64)>, ContainerError> {
        let mut counts: Vec<(u8, u64)> = self.header.tracks.iter().map(|t| (t.id, 0)).collect();

        while let Some(chunk) = self.next_chunk()? {
            if let Some(entry) = counts.iter_mut().find(|(id, _)| *id == chunk.track) {
                entry.1 += 1;
            }
        }

        Ok(counts)
    }
}
