//! Length-prefixed, zlib-compressed, bincode-framed record encoding.
//!
//! Shared by the durable stream payload, the Delta Log, and the Touch Log:
//! every record is `[4-byte big-endian length][zlib(bincode(record))]`.

use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

/// Encode a record as length-prefixed zlib-compressed bincode.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let raw = bincode::serialize(record).context("bincode serialize failed")?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).context("zlib write failed")?;
    let compressed = encoder.finish().context("zlib finish failed")?;

    let mut framed = Vec::with_capacity(4 + compressed.len());
    framed.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    framed.extend_from_slice(&compressed);
    Ok(framed)
}

/// Decode a single length-prefixed zlib-compressed bincode record.
pub fn decode_record<T: DeserializeOwned>(framed: &[u8]) -> Result<T> {
    let compressed = unframe(framed)?;
    let mut decoder = ZlibDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw).context("zlib decompress failed")?;
    bincode::deserialize(&raw).context("bincode deserialize failed")
}

fn unframe(framed: &[u8]) -> Result<&[u8]> {
    if framed.len() < 4 {
        anyhow::bail!("frame too short: {} bytes", framed.len());
    }
    let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
    let body = &framed[4..];
    if body.len() != len {
        anyhow::bail!("frame length mismatch: header says {}, got {}", len, body.len());
    }
    Ok(body)
}

/// Read consecutive `[len][payload]` frames out of a byte buffer, stopping
/// when fewer than 4 bytes remain (used for reading log files sequentially).
pub fn iter_frames(mut buf: &[u8]) -> impl Iterator<Item = Result<&[u8]>> {
    std::iter::from_fn(move || {
        if buf.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = 4 + len;
        if buf.len() < total {
            return Some(Err(anyhow::anyhow!(
                "truncated frame: need {} bytes, have {}",
                total,
                buf.len()
            )));
        }
        let frame = &buf[..total];
        buf = &buf[total..];
        Some(Ok(frame))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u64,
        b: String,
    }

    #[test]
    fn round_trips_a_record() {
        let sample = Sample { a: 42, b: "hello".to_string() };
        let framed = encode_record(&sample).unwrap();
        let decoded: Sample = decode_record(&framed).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn rejects_truncated_frame() {
        let sample = Sample { a: 1, b: "x".to_string() };
        let mut framed = encode_record(&sample).unwrap();
        framed.truncate(framed.len() - 1);
        assert!(decode_record::<Sample>(&framed).is_err());
    }

    #[test]
    fn iterates_multiple_frames_in_one_buffer() {
        let a = encode_record(&Sample { a: 1, b: "a".to_string() }).unwrap();
        let b = encode_record(&Sample { a: 2, b: "b".to_string() }).unwrap();
        let mut combined = a.clone();
        combined.extend_from_slice(&b);

        let frames: Vec<_> = iter_frames(&combined).collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 2);
        let first: Sample = decode_record(frames[0]).unwrap();
        assert_eq!(first.a, 1);
    }
}
