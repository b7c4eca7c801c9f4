//! FastCDC content-defined chunking
//!
//! Splits files into variable-size chunks whose boundaries are content-defined,
//! ensuring stable chunk boundaries even when data shifts (e.g. inserting bytes
//! near the start of a file doesn't invalidate all subsequent chunks).
//!
//! Chunk size targets:
//!   - Default (small files): min 2KB, avg 4KB, max 16KB
//!   - Pack/binary/media files: min 32KB, avg 64KB, max 256KB
//!
//! Each chunk is addressed by its keyed BLAKE3 id.

use std::path::Path;

use crate::blake3::{ChunkHasher, ChunkId};

/// Upper bound on any chunk's plaintext length
pub const MAX_CHUNK_SIZE: usize = ChunkSizes::PACK.max_size as usize;

/// A single content-defined chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the source file
    pub offset: u64,
    /// Chunk length in bytes
    pub length: usize,
    /// Keyed BLAKE3 id of this chunk's data
    pub id: ChunkId,
}

impl Chunk {
    /// The chunk's bytes within the file it was split from.
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.offset as usize;
        &data[start..start + self.length]
    }
}

/// Chunk size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkSizes {
    /// Default for most files (small-file optimized)
    pub const SMALL: ChunkSizes = ChunkSizes {
        min_size: 2 * 1024,  // 2KB
        avg_size: 4 * 1024,  // 4KB
        max_size: 16 * 1024, // 16KB
    };

    /// For pack/binary/media files (reduced overhead for large sequential data)
    pub const PACK: ChunkSizes = ChunkSizes {
        min_size: 32 * 1024,  // 32KB
        avg_size: 64 * 1024,  // 64KB
        max_size: 256 * 1024, // 256KB
    };

    /// Select chunk sizes based on file extension
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pack" | "bin" | "iso" | "img" | "zip" | "gz" | "xz" | "bz2" | "7z" | "rar"
            | "jpg" | "jpeg" | "png" | "gif" | "webp" | "mp4" | "mkv" | "mp3") => Self::PACK,
            _ => Self::SMALL,
        }
    }
}

/// Split `data` into content-defined chunks using FastCDC.
///
/// Identical bytes always produce identical boundaries and ids under the same
/// hasher. For empty data, returns an empty list.
pub fn split(data: &[u8], sizes: ChunkSizes, hasher: &ChunkHasher) -> Vec<Chunk> {
    if data.is_empty() {
        return vec![];
    }

    let chunker =
        fastcdc::v2020::FastCDC::new(data, sizes.min_size, sizes.avg_size, sizes.max_size);

    chunker
        .map(|c| Chunk {
            offset: c.offset as u64,
            length: c.length,
            id: hasher.id(&data[c.offset..c.offset + c.length]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zeroize::Zeroizing;

    fn hasher() -> ChunkHasher {
        ChunkHasher::new(Zeroizing::new([5u8; 32]))
    }

    #[test]
    fn empty_data_yields_no_chunks() {
        assert!(split(&[], ChunkSizes::SMALL, &hasher()).is_empty());
    }

    #[test]
    fn tiny_file_is_one_chunk() {
        let chunks = split(b"0123456789", ChunkSizes::SMALL, &hasher());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, 10);
        assert_eq!(chunks[0].id, hasher().id(b"0123456789"));
    }

    #[test]
    fn large_file_yields_many_chunks() {
        let data: Vec<u8> = (0u32..64 * 1024).map(|i| (i * 31 % 251) as u8).collect();
        let chunks = split(&data, ChunkSizes::SMALL, &hasher());
        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.length <= ChunkSizes::SMALL.max_size as usize));

        let total: usize = chunks.iter().map(|c| c.length).sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn chunk_offsets_are_contiguous() {
        let data: Vec<u8> = (0u8..=255).cycle().take(128 * 1024).collect();
        let chunks = split(&data, ChunkSizes::SMALL, &hasher());

        let mut expected_offset = 0u64;
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected_offset, "chunks must be contiguous");
            assert_eq!(chunk.id, hasher().id(chunk.bytes(&data)));
            expected_offset += chunk.length as u64;
        }
        assert_eq!(expected_offset as usize, data.len());
    }

    #[test]
    fn media_extensions_use_pack_sizes() {
        assert_eq!(ChunkSizes::for_path(Path::new("a/photo.JPG")), ChunkSizes::PACK);
        assert_eq!(ChunkSizes::for_path(Path::new("disk.iso")), ChunkSizes::PACK);
        assert_eq!(ChunkSizes::for_path(Path::new("notes.txt")), ChunkSizes::SMALL);
        assert_eq!(ChunkSizes::for_path(Path::new("Makefile")), ChunkSizes::SMALL);
    }

    proptest! {
        /// FastCDC boundary stability: same input → same chunk boundaries
        #[test]
        fn chunking_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=32768)) {
            let c1 = split(&data, ChunkSizes::SMALL, &hasher());
            let c2 = split(&data, ChunkSizes::SMALL, &hasher());
            prop_assert_eq!(c1, c2);
        }

        /// Chunks must cover the full input without gaps or overlap
        #[test]
        fn chunks_cover_full_input(data in proptest::collection::vec(any::<u8>(), 1..=65536)) {
            let chunks = split(&data, ChunkSizes::SMALL, &hasher());
            let total: usize = chunks.iter().map(|c| c.length).sum();
            prop_assert_eq!(total, data.len(), "chunks must cover full input");
        }
    }
}
