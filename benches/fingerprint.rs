//! Benchmarks for request fingerprinting and model selection
//!
//! Both run on every analysis before any network I/O, so they should stay in
//! the low microseconds even for long prompts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use llm_access::cache::FingerprintGenerator;
use llm_access::routing::{ModelSelector, ModelTierConfig};
use llm_access::{BackendKind, Message, RequestOptions};
use serde_json::json;

fn messages(chars: usize) -> Vec<Message> {
    vec![
        Message::system("You are a senior market research analyst."),
        Message::user("keyword research ".repeat(chars / 17 + 1)),
    ]
}

fn bench_fingerprint(c: &mut Criterion) {
    let keys = FingerprintGenerator::new();
    let options = RequestOptions::json_strict()
        .with_temperature(0.3)
        .with_model("qwen-plus")
        .with_extra("top_p", json!(0.9))
        .with_extra("seed", json!(7));

    let mut group = c.benchmark_group("fingerprint");
    for size in [200usize, 2_000, 20_000] {
        let msgs = messages(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msgs, |b, msgs| {
            b.iter(|| keys.fingerprint(black_box(msgs), black_box(&options)))
        });
    }
    group.finish();

    c.bench_function("batch_key", |b| {
        b.iter(|| keys.batch_key(black_box(BackendKind::QwenCompatible), black_box(&options)))
    });
}

fn bench_selection(c: &mut Criterion) {
    let selector = ModelSelector::new(ModelTierConfig::for_backend(BackendKind::QwenCompatible))
        .with_default_backend(BackendKind::QwenCompatible);
    let options = RequestOptions::json_strict();
    let msgs = messages(5_000);
    c.bench_function("select_model", |b| {
        b.iter(|| selector.select(black_box(&msgs), black_box(&options)))
    });
}

criterion_group!(benches, bench_fingerprint, bench_selection);
criterion_main!(benches);
