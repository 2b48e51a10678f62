//! Media units that flow from capture to output.

use super::clock::TimeValue;

/// Owned, opaque media payload.
///
/// Deliberately not `Clone`: a buffer has exactly one owner at a time and is
/// released when that owner drops it.
#[derive(Debug, PartialEq, Eq)]
pub struct MediaBuffer {
    bytes: Box<[u8]>,
}

impl MediaBuffer {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A captured video frame.
#[derive(Debug)]
pub struct VideoFrame {
    /// Pixel data
    pub pixels: MediaBuffer,

    /// Capture-side stream time
    pub timestamp: TimeValue,

    /// Capture-side frame duration
    pub duration: TimeValue,

    /// Position in the capture sequence
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(pixels: MediaBuffer, timestamp: TimeValue, duration: TimeValue, sequence: u64) -> Self {
        Self { pixels, timestamp, duration, sequence }
    }
}

/// A captured block of interleaved audio samples.
#[derive(Debug)]
pub struct AudioPacket {
    /// Interleaved sample data
    pub samples: MediaBuffer,

    /// Number of sample frames (one sample per channel)
    pub sample_frames: u32,

    /// Capture-side packet time, same domain as video
    pub timestamp: TimeValue,
}

impl AudioPacket {
    pub fn new(samples: MediaBuffer, sample_frames: u32, timestamp: TimeValue) -> Self {
        Self { samples, sample_frames, timestamp }
    }
}

/// Either kind of unit.
#[derive(Debug)]
pub enum MediaUnit {
    Video(VideoFrame),
    Audio(AudioPacket),
}

impl MediaUnit {
    pub fn timestamp(&self) -> TimeValue {
        match self {
            MediaUnit::Video(frame) => frame.timestamp,
            MediaUnit::Audio(packet) => packet.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MediaUnit::Video(_) => "video",
            MediaUnit::Audio(_) => "audio",
        }
    }
}

impl From<VideoFrame> for MediaUnit {
    fn from(frame: VideoFrame) -> Self {
        MediaUnit::Video(frame)
    }
}

impl From<AudioPacket> for MediaUnit {
    fn from(packet: AudioPacket) -> Self {
        MediaUnit::Audio(packet)
    }
}
