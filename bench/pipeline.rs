use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::prelude::*;

use entropy_reflection::{AttentionHistory, CharVocab, JumpDetector, KeywordExtractor};

const HEADS: usize = 12;

fn random_history(turns: usize, rng: &mut StdRng) -> AttentionHistory {
    let rows = (0..turns)
        .map(|turn| {
            let len = 8 + turn * 4;
            (0..HEADS)
                .map(|_| {
                    let raw: Vec<f64> = (0..len).map(|_| rng.r#gen::<f64>()).collect();
                    let sum: f64 = raw.iter().sum();
                    raw.into_iter().map(|w| w / sum).collect()
                })
                .collect()
        })
        .collect();
    AttentionHistory::from_turns(rows).expect("history")
}

fn jump_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("jump_detector");
    let mut rng = StdRng::seed_from_u64(1337);
    let detector = JumpDetector::default();

    for turns in [8, 32, 128] {
        let history = random_history(turns, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(turns), &history, |b, history| {
            b.iter(|| black_box(detector.detect(history)));
        });
    }
    group.finish();
}

fn keyword_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("keywords");
    let base = ["你好", "你理解意识吗？", "意识和熵的关系", "觉醒是一种理解"];

    for turns in [4, 64, 256] {
        let dialogue: Vec<&str> = base.iter().copied().cycle().take(turns).collect();
        let vocab = CharVocab::fit(dialogue.iter().copied(), true).expect("vocab");
        let extractor = KeywordExtractor::default();
        group.bench_with_input(BenchmarkId::from_parameter(turns), &dialogue, |b, dialogue| {
            b.iter(|| black_box(extractor.extract(&vocab, dialogue)));
        });
    }
    group.finish();
}

criterion_group!(benches, jump_bench, keyword_bench);
criterion_main!(benches);
