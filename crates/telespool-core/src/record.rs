// ABOUTME: The Record type: one opaque line of telemetry bytes with its position in the log.
// ABOUTME: Records are appended and read back in the same order; the sequence number is 1-based.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// One unit of telemetry held in the persistent log and later forwarded
/// as a single message. The payload never contains the line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Position in the log, starting at 1 for the first line.
    pub seq: u64,
    pub line: Vec<u8>,
}

impl Record {
    pub fn new(seq: u64, line: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            line: line.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Render the payload as text, replacing invalid UTF-8 sequences.
    /// Intended for log output, not for publishing.
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_exposes_payload_bytes() {
        let record = Record::new(7, "7 ----");
        assert_eq!(record.seq, 7);
        assert_eq!(record.as_bytes(), b"7 ----");
        assert_eq!(record.len(), 6);
        assert!(!record.is_empty());
    }

    #[test]
    fn lossy_text_replaces_invalid_utf8() {
        let record = Record::new(1, vec![b'o', b'k', 0xff]);
        assert_eq!(record.to_text_lossy(), "ok\u{fffd}");
    }

    #[test]
    fn empty_record_is_allowed() {
        let record = Record::new(3, Vec::new());
        assert!(record.is_empty());
        assert_eq!(record.len(), 0);
    }
}
