use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scrivo_core::{coding_cookie_value, Decoder, Encoder, UniMode};

const BLOCK: usize = 131072;
const SIZE: usize = 4 * 1024 * 1024;

fn sample_text() -> String {
    let line = "fn main() { println!(\"h\u{e9}llo w\u{f6}rld \u{1F600}\"); }\n";
    line.repeat(SIZE / line.len())
}

fn decode_blocks(bytes: &[u8]) -> usize {
    let mut decoder = Decoder::new();
    let mut out = Vec::with_capacity(bytes.len());
    for block in bytes.chunks(BLOCK) {
        decoder.decode(block, &mut out);
    }
    decoder.finish(&mut out);
    out.len()
}

fn decode(c: &mut Criterion) {
    let text = sample_text();

    let mut utf16 = vec![];
    Encoder::new(UniMode::Utf16LittleEndian).encode(text.as_bytes(), &mut utf16);

    c.bench_function("decode_raw", |bench| {
        bench.iter(|| decode_blocks(black_box(text.as_bytes())))
    });

    c.bench_function("decode_utf16le", |bench| {
        bench.iter(|| decode_blocks(black_box(&utf16)))
    });

    c.bench_function("coding_cookie", |bench| {
        bench.iter(|| coding_cookie_value(black_box(&text.as_bytes()[..BLOCK])))
    });
}

criterion_group!(benches, decode);
criterion_main!(benches);
