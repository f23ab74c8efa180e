//! Criterion benchmarks for layout planning and capture extraction.
//!
//! Key metrics:
//! - Planning latency across relaxation windows
//! - Extraction throughput for different chunk sizes
//! - Raw file write throughput
//!
//! Run with: cargo bench --bench layout_capture

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringdown_daq::capture::{extract, CaptureResult};
use ringdown_daq::completion::CompletionPointers;
use ringdown_daq::hardware::mock::MockMemory;
use ringdown_daq::layout::{plan, LayoutParams};
use ringdown_daq::storage::RawCaptureWriter;

fn params(relaxation_us: u32) -> LayoutParams {
    LayoutParams {
        waveform_sample_count: 125_000,
        sample_size: 2,
        burst_size_bytes: 128,
        relaxation_us,
        sample_rate_hz: 125e6,
        ram_base: 0x0100_0000,
        ram_size: 220 * 1024 * 1024,
    }
}

fn layout_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_plan");

    for relax in [30u32, 3_000, 300_000] {
        let p = params(relax);
        group.bench_with_input(BenchmarkId::new("plan", relax), &p, |b, p| {
            b.iter(|| plan(black_box(p)).unwrap());
        });
    }

    group.finish();
}

fn capture_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_extract");

    let total = 16 * 1024 * 1024;
    let memory = MockMemory::new(total);
    group.throughput(Throughput::Bytes(total as u64));

    let sizes = vec![("64KB", 64 * 1024), ("1MB", 1024 * 1024), ("8MB", 8 * 1024 * 1024)];
    for (name, chunk) in sizes {
        group.bench_with_input(BenchmarkId::new("collect", name), &chunk, |b, &chunk| {
            b.iter(|| {
                let extractor = extract(&memory, 0, total, chunk);
                CaptureResult::collect(extractor, CompletionPointers::default()).unwrap()
            });
        });
    }

    group.finish();
}

fn raw_file_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_write");

    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("bench.raw");
    let memory = MockMemory::new(750_080);
    group.throughput(Throughput::Bytes(750_080));

    group.bench_function("reference_capture", |b| {
        b.iter(|| {
            let mut writer = RawCaptureWriter::create(&path).unwrap();
            for chunk in extract(&memory, 0, 750_080, 0) {
                writer.write_chunk(&chunk.unwrap()).unwrap();
            }
            writer.finish().unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, layout_planning, capture_extraction, raw_file_write);
criterion_main!(benches);
