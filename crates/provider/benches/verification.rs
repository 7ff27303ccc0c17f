use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use turnstile_core::{CaptureSample, Decision, DecisionFilter, Outcome, ReasonCode, RoomId};
use turnstile_provider::engine::{embed_frame, EmbeddingVerifier, VerificationEngine};
use turnstile_provider::{AccessLedger, MemoryLedger};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_frame(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 251) as u8))
        .collect()
}

fn make_decision(i: usize, user: Uuid) -> Decision {
    let room = RoomId::from(["room-a", "room-b", "room-c", "room-d"][i % 4]);
    if i % 3 == 0 {
        Decision::denied(user, room, ReasonCode::LowConfidence)
    } else {
        Decision::granted(user, room, 80 + (i % 20) as u8)
    }
}

// ---------------------------------------------------------------------------
// Benchmark: frame embedding
// ---------------------------------------------------------------------------

fn bench_embed_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("embed_frame");
    // 614_400 = one 640x480 frame at two bytes per pixel.
    for len in [4_096usize, 65_536, 614_400] {
        let frame = make_frame(0x42, len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &frame, |b, frame| {
            b.iter(|| black_box(embed_frame(frame)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: end-to-end verify
// ---------------------------------------------------------------------------

fn bench_verify(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let verifier = EmbeddingVerifier::new();
    let user = Uuid::new_v4();
    let frame = make_frame(0x42, 65_536);
    rt.block_on(verifier.enroll_from_frame(user, &frame));

    c.bench_function("verify_match", |b| {
        b.to_async(&rt).iter(|| {
            let sample = CaptureSample::new(frame.clone());
            async { black_box(verifier.verify(user, sample).await.unwrap()) }
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark: ledger filtering
// ---------------------------------------------------------------------------

fn bench_ledger_list(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("ledger_list");
    for count in [100usize, 1_000, 10_000] {
        let ledger = MemoryLedger::new();
        let user = Uuid::new_v4();
        rt.block_on(async {
            for i in 0..count {
                ledger.append(&make_decision(i, user)).await.unwrap();
            }
        });

        let filter = DecisionFilter {
            room: Some(RoomId::from("room-a")),
            outcome: Some(Outcome::Granted),
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(count), &filter, |b, filter| {
            b.to_async(&rt)
                .iter(|| async { black_box(ledger.list(filter).await.unwrap()) });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_embed_frame, bench_verify, bench_ledger_list);
criterion_main!(benches);
