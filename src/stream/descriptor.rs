//! Stream descriptor types

use std::time::SystemTime;

/// Maximum length of a stream ID in bytes
pub const MAX_STREAM_ID_LEN: usize = 256;

/// Unique identifier for a remote stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new stream ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the ID can be bound
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("stream id is empty".into());
        }
        if self.0.len() > MAX_STREAM_ID_LEN {
            return Err(format!(
                "stream id is {} bytes, limit is {}",
                self.0.len(),
                MAX_STREAM_ID_LEN
            ));
        }
        if self.0.chars().any(char::is_control) {
            return Err("stream id contains control characters".into());
        }
        Ok(())
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A remote stream and its media capabilities
///
/// Immutable once created. If the remote stream is reconfigured, a new
/// descriptor (and a new subscription) is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    id: StreamId,
    name: String,
    has_audio: bool,
    has_video: bool,
    created_at: SystemTime,
}

impl StreamDescriptor {
    /// Create a descriptor with the given capabilities
    pub fn new(id: impl Into<StreamId>, has_audio: bool, has_video: bool) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            has_audio,
            has_video,
            created_at: SystemTime::now(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stream ID
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Display name (may be empty)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stream carries audio
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Whether the stream carries video
    pub fn has_video(&self) -> bool {
        self.has_video
    }

    /// When the stream was created
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_accessors() {
        let desc = StreamDescriptor::new("cam-1", true, false).with_name("Front camera");

        assert_eq!(desc.id().as_str(), "cam-1");
        assert_eq!(desc.name(), "Front camera");
        assert!(desc.has_audio());
        assert!(!desc.has_video());
    }

    #[test]
    fn test_stream_id_validation() {
        assert!(StreamId::new("cam-1").validate().is_ok());
        assert!(StreamId::new("").validate().is_err());
        assert!(StreamId::new("a\nb").validate().is_err());
        assert!(StreamId::new("x".repeat(MAX_STREAM_ID_LEN + 1))
            .validate()
            .is_err());
        assert!(StreamId::new("x".repeat(MAX_STREAM_ID_LEN))
            .validate()
            .is_ok());
    }
}
