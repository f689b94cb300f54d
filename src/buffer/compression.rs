//! Zlib compression for staged payloads

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::DeliveryError;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| DeliveryError::Compression(format!("compress: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| DeliveryError::Compression(format!("compress finish: {}", e)))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DeliveryError::Compression(format!("decompress: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetitive_payload_shrinks() {
        let data = "hello world ".repeat(200).into_bytes();
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        assert!(matches!(
            decompress(b"definitely not zlib"),
            Err(DeliveryError::Compression(_))
        ));
    }
}
