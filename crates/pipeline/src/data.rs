//! Data types for pipeline communication
//!
//! Units exchange opaque buffers. The payload is never interpreted by the
//! graph; only the unit that produced it knows its layout.

use bytes::Bytes;

/// A chunk of media flowing over a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
    /// Opaque payload.
    pub payload: Bytes,
    /// Names of the stages that have processed this buffer, in order.
    pub tags: Vec<String>,
}

impl Buffer {
    pub fn new(sequence: u64, payload: Bytes) -> Self {
        Self {
            sequence,
            payload,
            tags: Vec::new(),
        }
    }

    /// Record that `stage` has handled this buffer.
    pub fn tagged(mut self, stage: &str) -> Self {
        self.tags.push(stage.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// What travels over a link: data, or the in-band end-of-stream marker.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Buffer(Buffer),
    Eos,
}

impl DataItem {
    pub fn is_eos(&self) -> bool {
        matches!(self, DataItem::Eos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_tags_accumulate_in_order() {
        let buffer = Buffer::new(7, Bytes::from_static(b"abc"))
            .tagged("parser")
            .tagged("decoder");

        assert_eq!(buffer.sequence, 7);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.tags, vec!["parser", "decoder"]);
    }
}
