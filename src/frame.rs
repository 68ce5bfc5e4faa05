use bytes::Bytes;
use std::time::{Duration, SystemTime};

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// One opaque JPEG frame as delivered by the detection pipeline
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Sequence number, unique within the producer
    pub id: u64,
    /// Time the frame was received or loaded
    pub timestamp: SystemTime,
    /// Encoded JPEG bytes (cheap to clone)
    pub data: Bytes,
}

impl FrameData {
    pub fn new(id: u64, timestamp: SystemTime, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            timestamp,
            data: data.into(),
        }
    }

    /// Check for the JPEG start-of-image marker
    pub fn is_jpeg(&self) -> bool {
        self.data.len() >= 2 && self.data[..2] == JPEG_SOI
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn is_older_than(&self, duration: Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }

    /// Milliseconds since the Unix epoch, as sent in `X-Timestamp`
    pub fn timestamp_millis(&self) -> u128 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }
}
