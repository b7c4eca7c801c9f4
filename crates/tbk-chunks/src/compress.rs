//! Chunk framing with optional zstd compression
//!
//! A framed chunk is `[1 byte: codec][payload]`, encrypted as a whole, so the
//! codec flag is authenticated along with the data. Compression is skipped
//! for formats that are already compressed and whenever it does not shrink
//! the chunk.

use std::path::Path;

use tbk_core::{VaultError, VaultResult};

const CODEC_RAW: u8 = 0;
const CODEC_ZSTD: u8 = 1;

/// Extensions whose content is already compressed
const PRECOMPRESSED: &[&str] = &[
    "zip", "gz", "xz", "bz2", "7z", "rar", "zst", "jpg", "jpeg", "png", "gif", "webp", "mp4",
    "mkv", "mp3",
];

/// Whether chunks of this file are worth compressing.
pub fn should_compress(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !PRECOMPRESSED
            .iter()
            .any(|skip| ext.eq_ignore_ascii_case(skip)),
        None => true,
    }
}

/// Frame a chunk for encryption, compressing it when `compress` is set and
/// zstd actually wins.
pub fn frame_chunk(data: &[u8], compress: bool, level: i32) -> VaultResult<Vec<u8>> {
    if compress && !data.is_empty() {
        let packed = zstd::bulk::compress(data, level)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("zstd compress: {e}")))?;
        if packed.len() < data.len() {
            let mut framed = Vec::with_capacity(1 + packed.len());
            framed.push(CODEC_ZSTD);
            framed.extend_from_slice(&packed);
            return Ok(framed);
        }
    }

    let mut framed = Vec::with_capacity(1 + data.len());
    framed.push(CODEC_RAW);
    framed.extend_from_slice(data);
    Ok(framed)
}

/// Undo [`frame_chunk`]. Output is capped at `max_len` bytes.
pub fn unframe_chunk(framed: &[u8], max_len: usize) -> VaultResult<Vec<u8>> {
    let Some((&codec, payload)) = framed.split_first() else {
        return Err(VaultError::Integrity("empty chunk frame".into()));
    };
    match codec {
        CODEC_RAW if payload.len() <= max_len => Ok(payload.to_vec()),
        CODEC_RAW => Err(VaultError::Integrity(format!(
            "chunk of {} bytes exceeds {max_len}",
            payload.len()
        ))),
        CODEC_ZSTD => zstd::bulk::decompress(payload, max_len)
            .map_err(|e| VaultError::Integrity(format!("zstd decompress: {e}"))),
        other => Err(VaultError::Integrity(format!("unknown chunk codec {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_list_is_case_insensitive() {
        assert!(!should_compress(Path::new("holiday.JPG")));
        assert!(!should_compress(Path::new("archive.tar.gz")));
        assert!(should_compress(Path::new("notes.txt")));
        assert!(should_compress(Path::new("Makefile")));
    }

    #[test]
    fn compressible_chunk_shrinks() {
        let data = vec![b'a'; 8192];
        let framed = frame_chunk(&data, true, 3).unwrap();
        assert_eq!(framed[0], CODEC_ZSTD);
        assert!(framed.len() < data.len());
        assert_eq!(unframe_chunk(&framed, 8192).unwrap(), data);
    }

    #[test]
    fn incompressible_chunk_stays_raw() {
        let data: Vec<u8> = (0..64u8).collect();
        let framed = frame_chunk(&data, true, 3).unwrap();
        assert_eq!(framed[0], CODEC_RAW);
        assert_eq!(unframe_chunk(&framed, 64).unwrap(), data);
    }

    #[test]
    fn disabled_compression_stays_raw() {
        let framed = frame_chunk(&[0u8; 4096], false, 3).unwrap();
        assert_eq!(framed[0], CODEC_RAW);
        assert_eq!(framed.len(), 4097);
    }

    #[test]
    fn empty_chunk_roundtrip() {
        let framed = frame_chunk(b"", true, 3).unwrap();
        assert_eq!(unframe_chunk(&framed, 16).unwrap(), b"");
    }

    #[test]
    fn decompression_is_capped() {
        let framed = frame_chunk(&vec![0u8; 100_000], true, 3).unwrap();
        assert!(unframe_chunk(&framed, 1024).is_err());
    }

    #[test]
    fn malformed_frames_rejected() {
        assert!(matches!(unframe_chunk(&[], 10), Err(VaultError::Integrity(_))));
        assert!(matches!(unframe_chunk(&[9, 1, 2], 10), Err(VaultError::Integrity(_))));
    }
}
