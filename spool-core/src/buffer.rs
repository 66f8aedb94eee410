/*!
In-memory accumulator for records received since the last disk drain.
*/

use bytes::Bytes;

use crate::{Result, SpoolError};

/// Ordered byte accumulator owned by the sink's event loop.
///
/// Content is always the concatenation of the records appended since the last
/// [`drain`](MemoryBuffer::drain), in arrival order. Records are opaque, so
/// thresholds are byte counts and there are no partial-record semantics.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    data: Vec<u8>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record.
    ///
    /// Allocation failure is reported as [`SpoolError::Buffer`] and leaves the
    /// buffer unchanged.
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        self.data.try_reserve(record.len()).map_err(|e| {
            SpoolError::buffer(format!(
                "Failed to grow buffer by {} bytes: {e}",
                record.len()
            ))
        })?;
        self.data.extend_from_slice(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the accumulated content, leaving the buffer empty.
    pub fn drain(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.data))
    }

    /// Put drained bytes back in front of anything appended since.
    pub fn restore(&mut self, drained: Bytes) {
        if drained.is_empty() {
            return;
        }
        if self.data.is_empty() {
            self.data = drained.into();
            return;
        }
        let mut merged = Vec::with_capacity(drained.len() + self.data.len());
        merged.extend_from_slice(&drained);
        merged.extend_from_slice(&self.data);
        self.data = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut buffer = MemoryBuffer::new();
        buffer.append(b"first ").unwrap();
        buffer.append(b"second ").unwrap();
        buffer.append(b"third").unwrap();

        assert_eq!(buffer.len(), 18);
        assert_eq!(&buffer.drain()[..], b"first second third");
    }

    #[test]
    fn test_drain_clears() {
        let mut buffer = MemoryBuffer::new();
        buffer.append(&[7u8; 500]).unwrap();

        let drained = buffer.drain();
        assert_eq!(drained.len(), 500);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_restore_goes_in_front() {
        let mut buffer = MemoryBuffer::new();
        buffer.append(b"abc").unwrap();
        let drained = buffer.drain();

        buffer.append(b"def").unwrap();
        buffer.restore(drained);

        assert_eq!(&buffer.drain()[..], b"abcdef");
    }

    #[test]
    fn test_restore_into_empty_buffer() {
        let mut buffer = MemoryBuffer::new();
        buffer.restore(Bytes::from_static(b"xyz"));
        assert_eq!(buffer.len(), 3);

        buffer.restore(Bytes::new());
        assert_eq!(&buffer.drain()[..], b"xyz");
    }
}
