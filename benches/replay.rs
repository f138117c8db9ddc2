#![allow(unused)]
extern crate vmscope;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::{fmt::Write, hint::black_box};
use vmscope::{
    devirt::{replay, BranchDetector, ReplayPhase, SymbolWidth},
    engine::X86Engine,
    trace::{TraceReader, TraceSummary},
};

/// Builds a synthetic trace mixing arithmetic on both inputs with stack traffic.
fn synthetic_trace(rounds: usize) -> String {
    let mut trace = String::from("r:0:0:0:0:1234:5678:0:7fff0000:0:0:0:0:0:0:0:0\n");
    let mut address = 0x1_4000_1000u64;
    // mov eax, edi; add eax, esi; push rax; xor eax, esi; pop rcx; sub eax, ecx
    let body: [&[u8]; 6] = [
        &[0x89, 0xf8],
        &[0x01, 0xf0],
        &[0x50],
        &[0x31, 0xf0],
        &[0x59],
        &[0x29, 0xc8],
    ];
    for _ in 0..rounds {
        for bytes in body {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(trace, "i:{address:x}:{}:{hex}", bytes.len());
            address += bytes.len() as u64;
        }
    }
    trace
}

fn bench_replay(c: &mut Criterion) {
    let trace = synthetic_trace(2_000);

    let mut group = c.benchmark_group("trace");
    group.throughput(Throughput::Bytes(trace.len() as u64));
    group.bench_function("summary", |b| {
        b.iter(|| {
            let summary = TraceSummary::from_reader(TraceReader::new(black_box(trace.as_bytes())))
                .unwrap();
            black_box(summary)
        });
    });
    group.bench_function("replay", |b| {
        b.iter(|| {
            let mut engine = X86Engine::new();
            let mut detector = BranchDetector::new(ReplayPhase::First, None);
            let outcome = replay(
                &mut engine,
                TraceReader::new(black_box(trace.as_bytes())),
                SymbolWidth::Dword,
                &mut detector,
            )
            .unwrap();
            black_box(outcome)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_replay);
criterion_main!(benches);
