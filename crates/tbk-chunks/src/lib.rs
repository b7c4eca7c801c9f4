//! tbk-chunks: content-defined chunking, keyed BLAKE3 chunk ids, and compression
//!
//! # Overview
//! - `blake3`: whole-file content hashes and keyed chunk identifiers
//! - `fastcdc`: content-defined chunking, stable boundaries even with inserts
//! - `compress`: optional zstd framing applied to a chunk before encryption

pub mod blake3;
pub mod compress;
pub mod fastcdc;

// Convenience re-exports for the most common operations
pub use self::blake3::{hash_bytes, hash_from_hex, hash_to_hex, ChunkHasher, ChunkId, Hash};
pub use compress::{should_compress, frame_chunk, unframe_chunk};
pub use self::fastcdc::{split, Chunk, ChunkSizes, MAX_CHUNK_SIZE};
