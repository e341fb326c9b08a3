//! Benchmarks for backend reservation and claim accounting.
//!
//! Benchmarks cover:
//! - Uncontended acquire/release on pools of different sizes
//! - Contended acquire with more callers than backends
//! - Claim counter extend/complete
//! - A small end-to-end batch

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gen_dispatch::builders::DispatcherBuilder;
use gen_dispatch::core::{
    AcquireRequest, Artifact, BackendAllocator, BackendInfo, BackendRegistry, CancellationToken,
    ClaimCategory, DispatchError, GenerationBackend, GenerationParams, Session,
};
use tokio::runtime::Runtime;

struct InstantBackend;

#[async_trait]
impl GenerationBackend for InstantBackend {
    async fn load_model(&self, _model: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
        Ok(vec![Artifact::new(params.seed.to_le_bytes().to_vec(), "png")])
    }
}

fn allocator_with(backends: usize) -> BackendAllocator {
    let registry = Arc::new(BackendRegistry::new());
    for _ in 0..backends {
        registry.register(BackendInfo::new("bench"), Arc::new(InstantBackend));
    }
    BackendAllocator::new(registry, Duration::from_secs(2))
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("acquire_release");
    for backends in [1usize, 8, 64] {
        let allocator = allocator_with(backends);
        let request = AcquireRequest::new(None, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(backends), &backends, |b, _| {
            b.to_async(&rt).iter(|| async {
                let reservation = allocator.acquire(&request, &cancel, &|| {}).await.unwrap();
                black_box(reservation.id());
                reservation.release();
            });
        });
    }
    group.finish();
}

fn bench_contended_acquire(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let allocator = allocator_with(4);
    c.bench_function("contended_acquire_16_on_4", |b| {
        b.to_async(&rt).iter(|| {
            let allocator = allocator.clone();
            async move {
                let mut tasks = Vec::with_capacity(16);
                for i in 0..16 {
                    let allocator = allocator.clone();
                    tasks.push(tokio::spawn(async move {
                        let request = AcquireRequest::new(None, Duration::from_secs(5));
                        let reservation = allocator
                            .acquire(&request, &CancellationToken::new(), &|| {})
                            .await
                            .unwrap();
                        let params = GenerationParams {
                            seed: i,
                            ..GenerationParams::default()
                        };
                        black_box(reservation.generate(&params).await.unwrap());
                    }));
                }
                for task in tasks {
                    task.await.unwrap();
                }
            }
        });
    });
}

fn bench_claim_counters(c: &mut Criterion) {
    let session = Session::new(&CancellationToken::new());
    let claim = session.claim(0);
    c.bench_function("claim_extend_complete", |b| {
        b.iter(|| {
            claim.extend(ClaimCategory::LiveGens, 1);
            black_box(claim.complete(ClaimCategory::LiveGens, 1));
        });
    });
}

fn bench_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch");
    for count in [8usize, 64] {
        let dispatcher = rt.block_on(async {
            let mut builder = DispatcherBuilder::new();
            for _ in 0..4 {
                builder = builder.with_backend(BackendInfo::new("bench"), Arc::new(InstantBackend));
            }
            builder.build().unwrap()
        });
        let session = dispatcher.open_session();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let params = GenerationParams {
                    seed: 1,
                    ..GenerationParams::default()
                };
                let summary = dispatcher
                    .generate(&session, count, params)
                    .unwrap()
                    .into_summary()
                    .await;
                black_box(summary.images.len());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_contended_acquire,
    bench_claim_counters,
    bench_batch
);
criterion_main!(benches);
