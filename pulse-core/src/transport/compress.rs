//! Gzip request bodies.

use crate::error::{PulseError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PulseError::CompressionFailed { reason: e.to_string() })
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PulseError::CompressionFailed { reason: e.to_string() })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_restores_payload() {
        let body = br#"{"id":"Alloc","type":"gauge","value":1024.5}"#.repeat(20);
        let packed = gzip(&body).unwrap();
        assert!(packed.len() < body.len());
        assert_eq!(gunzip(&packed).unwrap(), body);
    }

    #[test]
    fn test_gunzip_rejects_plain_text() {
        assert!(matches!(gunzip(b"plain"), Err(PulseError::CompressionFailed { .. })));
    }
}
