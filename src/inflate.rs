//! Decompression of the deflate stream carried inside an HC1 token.
//!
//! Issuers compress the COSE bytes with zlib (deflate plus a two byte header
//! and an Adler-32 trailer). Bare deflate streams are accepted as well. The
//! output is always bounded by a caller supplied ceiling.

use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InflateError {
    #[error("corrupt deflate stream: {0}")]
    CorruptStream(String),
    #[error("inflated output exceeds the limit of {limit} bytes")]
    OutputTooLarge { limit: usize },
}

/// Container format detected in front of the deflate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Zlib,
    Raw,
}

impl Container {
    /// A zlib header uses compression method 8 and its first two bytes,
    /// read as a big endian integer, are a multiple of 31.
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes {
            [cmf, flg, ..] if cmf & 0x0f == 8 && cmf >> 4 <= 7 => {
                if (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 {
                    Container::Zlib
                } else {
                    Container::Raw
                }
            }
            _ => Container::Raw,
        }
    }
}

/// Inflates `bytes`, failing once more than `limit` bytes would be produced.
pub fn inflate(bytes: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
    let container = Container::detect(bytes);
    tracing::trace!(?container, compressed = bytes.len(), "inflating");
    match container {
        Container::Zlib => read_bounded(ZlibDecoder::new(bytes), limit),
        Container::Raw => read_bounded(DeflateDecoder::new(bytes), limit),
    }
}

fn read_bounded<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, InflateError> {
    // One byte past the limit is enough to tell "exactly at" from "over".
    let ceiling = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    reader
        .take(ceiling)
        .read_to_end(&mut out)
        .map_err(|e| InflateError::CorruptStream(e.to_string()))?;
    if out.len() > limit {
        return Err(InflateError::OutputTooLarge { limit });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{
        write::{DeflateEncoder, ZlibEncoder},
        Compression,
    };

    use super::*;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detects_zlib_header() {
        assert_eq!(Container::detect(&[0x78, 0xda, 0x00]), Container::Zlib);
        assert_eq!(Container::detect(&[0x78, 0x9c]), Container::Zlib);
        assert_eq!(Container::detect(&[0x78, 0x9d]), Container::Raw);
        assert_eq!(Container::detect(&[0xd2, 0x84]), Container::Raw);
        assert_eq!(Container::detect(&[0x78]), Container::Raw);
    }

    #[test]
    fn inflates_zlib_and_raw_streams() {
        let data = b"Digital Covid Certificate payload ".repeat(20);
        assert_eq!(inflate(&zlib(&data), 4096).unwrap(), data);
        assert_eq!(inflate(&deflate(&data), 4096).unwrap(), data);
    }

    #[test]
    fn accepts_output_exactly_at_limit() {
        let data = vec![0x42; 1000];
        assert_eq!(inflate(&zlib(&data), 1000).unwrap(), data);
    }

    #[test]
    fn rejects_decompression_bombs() {
        let bomb = zlib(&vec![0u8; 4 * 1024 * 1024]);
        assert!(bomb.len() < 8 * 1024);
        assert_eq!(
            inflate(&bomb, 64 * 1024),
            Err(InflateError::OutputTooLarge { limit: 64 * 1024 })
        );
    }

    #[test]
    fn rejects_corrupt_streams() {
        // BTYPE 11 is reserved
        assert!(matches!(
            inflate(&[0xff, 0xff, 0xff, 0xff], 1024),
            Err(InflateError::CorruptStream(_))
        ));
        let mut stream = zlib(b"hello hello hello hello");
        let last = stream.len() - 1;
        stream[last] ^= 0xff;
        assert!(matches!(
            inflate(&stream, 1024),
            Err(InflateError::CorruptStream(_))
        ));
    }
}
