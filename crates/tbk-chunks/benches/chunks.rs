use tbk_chunks::{frame_chunk, hash_bytes, split, unframe_chunk, ChunkHasher, ChunkSizes};
use zeroize::Zeroizing;

fn make_data(size: usize) -> Vec<u8> {
    // Semi-realistic data: repeating pattern with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn hasher() -> ChunkHasher {
    ChunkHasher::new(Zeroizing::new([0x5Au8; 32]))
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn fastcdc_split(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let hasher = hasher();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| split(divan::black_box(&data), ChunkSizes::SMALL, &hasher));
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn blake3_hash(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| hash_bytes(divan::black_box(&data)));
}

#[divan::bench(args = [4096, 65536, 262144])]
fn zstd_frame(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| frame_chunk(divan::black_box(&data), true, 3).unwrap());
}

#[divan::bench(args = [4096, 65536, 262144])]
fn zstd_unframe(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let framed = frame_chunk(&data, true, 3).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| unframe_chunk(divan::black_box(&framed), size).unwrap());
}

fn main() {
    divan::main();
}
