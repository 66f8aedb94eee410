/*!
Compression adapters for upload batches.

Batches are staged uncompressed and only wrapped in a gzip envelope in memory,
right before upload. The adapter also decides the content type and the key
suffix of the uploaded object.
*/

use bytes::Bytes;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use crate::{Result, SpoolError};

/// Content type of uncompressed batches
pub const PLAIN_CONTENT_TYPE: &str = "text/plain";
/// Content type of gzip batches
pub const GZIP_CONTENT_TYPE: &str = "multipart/x-gzip";
/// Key suffix of gzip batches
pub const GZIP_SUFFIX: &str = ".gz";

/// Compression abstraction for upload batches
pub trait CompressionAdapter: Send + Sync {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Content type announced for objects produced by this adapter
    fn content_type(&self) -> &'static str;

    /// Suffix appended to destination keys
    fn suffix(&self) -> &'static str;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;

    /// True when `compress` returns its input unchanged
    fn is_passthrough(&self) -> bool {
        false
    }
}

/// A batch ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub body: Bytes,
    pub content_type: &'static str,
    pub suffix: &'static str,
}

/// Wrap a batch with the given adapter.
///
/// An encoder failure is returned as-is; the caller still owns the staged data.
pub fn wrap(adapter: &dyn CompressionAdapter, data: Bytes) -> Result<Envelope> {
    let body = if adapter.is_passthrough() {
        data
    } else {
        Bytes::from(adapter.compress(&data)?)
    };
    Ok(Envelope {
        body,
        content_type: adapter.content_type(),
        suffix: adapter.suffix(),
    })
}

/// Compress `data` with gzip when `enabled`, pass it through otherwise
pub fn transform(data: Bytes, enabled: bool) -> Result<Envelope> {
    if enabled {
        wrap(&GzipCompressor::new(), data)
    } else {
        wrap(&NoCompression, data)
    }
}

/// Pick the adapter matching a sink's compression settings
pub fn adapter_for(enabled: bool, level: u32) -> Box<dyn CompressionAdapter> {
    if enabled {
        Box::new(GzipCompressor::with_level(level))
    } else {
        Box::new(NoCompression)
    }
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use spool_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"line one\nline two\n";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed)?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), spool_core::SpoolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            SpoolError::compression(format!("Failed to write data for compression: {}", e))
        })?;

        encoder
            .finish()
            .map_err(|e| SpoolError::compression(format!("Failed to finish compression: {}", e)))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| SpoolError::compression(format!("Failed to decompress data: {}", e)))?;

        Ok(decompressed)
    }

    fn content_type(&self) -> &'static str {
        GZIP_CONTENT_TYPE
    }

    fn suffix(&self) -> &'static str {
        GZIP_SUFFIX
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter used when compression is disabled
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn content_type(&self) -> &'static str {
        PLAIN_CONTENT_TYPE
    }

    fn suffix(&self) -> &'static str {
        ""
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_disabled_is_pass_through() {
        let data = Bytes::from_static(b"raw batch bytes");
        let envelope = transform(data.clone(), false).unwrap();

        assert_eq!(envelope.body, data);
        assert_eq!(envelope.content_type, "text/plain");
        assert_eq!(envelope.suffix, "");
    }

    #[test]
    fn test_transform_enabled_round_trip() {
        let data = Bytes::from(b"GET /index.html 200\n".repeat(50));
        let envelope = transform(data.clone(), true).unwrap();

        assert_eq!(envelope.content_type, "multipart/x-gzip");
        assert_eq!(envelope.suffix, ".gz");
        assert!(envelope.body.len() < data.len());

        let decompressed = GzipCompressor::new().decompress(&envelope.body).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_adapter_for_respects_level() {
        let data = b"Some test data to compress with different levels".repeat(20);

        let fast = adapter_for(true, 1);
        let max = adapter_for(true, 9);
        assert_eq!(fast.algorithm_name(), "gzip");
        assert!(max.compress(&data).unwrap().len() <= fast.compress(&data).unwrap().len());

        let none = adapter_for(false, 9);
        assert_eq!(none.algorithm_name(), "none");
        assert_eq!(none.compress(&data).unwrap(), data);
    }

    #[test]
    fn test_gzip_empty_data() {
        let compressor = GzipCompressor::new();
        let compressed = compressor.compress(b"").unwrap();
        assert!(compressor.decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_gzip_invalid_compressed_data() {
        let compressor = GzipCompressor::new();
        let result = compressor.decompress(b"this is not compressed gzip data");
        assert!(matches!(result, Err(SpoolError::Compression(_))));
    }
}
