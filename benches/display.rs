//! Display and VT100 benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use oec::display::encoding::encode_ascii_character;
use oec::display::BufferedWriter;
use oec::vt100::Vt100;

const ROWS: usize = 24;
const COLUMNS: usize = 80;

fn bench_buffered_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("display");

    group.throughput(Throughput::Elements((ROWS * COLUMNS) as u64));

    // Fill the screen and collect the range to write
    group.bench_function("buffered_write_screen", |b| {
        b.iter(|| {
            let mut buffer = BufferedWriter::new((ROWS + 1) * COLUMNS, true);
            for address in COLUMNS..(ROWS + 1) * COLUMNS {
                buffer.write_byte(address, encode_ascii_character('x'), Some(0x00));
            }
            black_box(buffer.dirty_range())
        })
    });

    group.finish();
}

fn bench_vt100_feed(c: &mut Criterion) {
    let mut group = c.benchmark_group("vt100");

    let text: Vec<u8> = (0..100)
        .flat_map(|i| format!("Line {}: Some text content here\r\n", i).into_bytes())
        .collect();

    group.throughput(Throughput::Bytes(text.len() as u64));

    group.bench_function("feed_scroll", |b| {
        b.iter(|| {
            let mut vt100 = Vt100::new(ROWS, COLUMNS);
            vt100.feed(&text);
            black_box(vt100.take_dirty())
        })
    });

    let input = "\x1b[H\x1b[2J\x1b[1;31mHello\x1b[0m\x1b[10;20H\x1b[K".repeat(100);

    group.bench_function("feed_csi", |b| {
        b.iter(|| {
            let mut vt100 = Vt100::new(ROWS, COLUMNS);
            vt100.feed(input.as_bytes());
            black_box(vt100.cursor())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_buffered_write, bench_vt100_feed);
criterion_main!(benches);
