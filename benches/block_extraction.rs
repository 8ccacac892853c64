//! Benchmarks for block extraction
//!
//! Tests performance of line classification and JSON block capture over
//! renderer and scanner output.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use renderforged::job::PROGRESS_PATTERN;
use renderforged_process::{BlockExtractor, Extracted, Marker};

/// Renderer log with one progress record per frame
fn renderer_log(frames: usize) -> Vec<String> {
    let mut lines = vec![
        "aerender version 24.2x14".to_string(),
        "PROGRESS:  Launching After Effects...".to_string(),
        "PROGRESS:  Starting composition Final".to_string(),
    ];
    for frame in 1..=frames {
        lines.push(format!(
            "PROGRESS:  0:00:{:02}:{:02} ({}): 0 Seconds",
            frame / 30,
            frame % 30,
            frame
        ));
    }
    lines.push("PROGRESS:  Total Time Elapsed: 1 Min, 12 Sec".to_string());
    lines
}

/// Scanner log with a progress block per pass and a title set with `audio` tracks
fn scanner_log(passes: usize, audio: usize) -> Vec<String> {
    let mut lines = vec!["[10:00:00] Starting work at: Wed May  1 10:00:00 2024".to_string()];
    for pass in 0..passes {
        lines.extend([
            "Progress: {".to_string(),
            "    \"State\": \"SCANNING\",".to_string(),
            "    \"Scanning\": {".to_string(),
            format!("        \"Progress\": {},", pass as f64 / passes as f64),
            "        \"Title\": 1".to_string(),
            "    }".to_string(),
            "}".to_string(),
        ]);
    }
    lines.push("JSON Title Set: {".to_string());
    lines.push("    \"MainFeature\": 0,".to_string());
    lines.push("    \"TitleList\": [".to_string());
    lines.push("        {".to_string());
    lines.push("            \"AudioList\": [".to_string());
    for track in 0..audio {
        let comma = if track + 1 < audio { "," } else { "" };
        lines.push(format!(
            "                {{\"Codec\": 65536, \"Language\": \"English\", \"TrackNumber\": {}}}{}",
            track + 1,
            comma
        ));
    }
    lines.push("            ],".to_string());
    lines.push("            \"Duration\": {\"Hours\": 0, \"Minutes\": 3, \"Seconds\": 12}".to_string());
    lines.push("        }".to_string());
    lines.push("    ]".to_string());
    lines.push("}".to_string());
    lines.push("[10:00:01] scan: decoding previews for title 1".to_string());
    lines
}

fn renderer_extractor() -> BlockExtractor {
    BlockExtractor::new(vec![Marker::record("frame", PROGRESS_PATTERN).unwrap()])
}

fn scanner_extractor() -> BlockExtractor {
    BlockExtractor::new(vec![
        Marker::capture("title_set", r"JSON Title Set: \{").unwrap(),
        Marker::discard("progress", r"Progress: \{").unwrap(),
    ])
}

fn bytes(lines: &[String]) -> u64 {
    lines.iter().map(|l| l.len() as u64 + 1).sum()
}

fn bench_renderer_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("renderer_records");

    for frames in [100, 1_000, 10_000] {
        let lines = renderer_log(frames);
        group.throughput(Throughput::Bytes(bytes(&lines)));
        group.bench_with_input(BenchmarkId::new("frames", frames), &lines, |b, lines| {
            b.iter(|| {
                let mut extractor = renderer_extractor();
                let mut records = 0usize;
                for line in lines {
                    if let Extracted::Record { .. } = extractor.feed(black_box(line)).unwrap() {
                        records += 1;
                    }
                }
                records
            });
        });
    }

    group.finish();
}

fn bench_scanner_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("scanner_blocks");

    for (passes, audio) in [(10, 2), (100, 8), (1_000, 32)] {
        let lines = scanner_log(passes, audio);
        group.throughput(Throughput::Bytes(bytes(&lines)));
        group.bench_with_input(
            BenchmarkId::new("passes_audio", format!("{passes}x{audio}")),
            &lines,
            |b, lines| {
                b.iter(|| {
                    let mut extractor = scanner_extractor();
                    let mut blocks = 0usize;
                    for line in lines {
                        if let Extracted::Block { .. } = extractor.feed(black_box(line)).unwrap() {
                            blocks += 1;
                        }
                    }
                    blocks
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_renderer_records, bench_scanner_blocks);
criterion_main!(benches);
