use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use motif_core::data::synthetic::{separable, SeparableSpec};
use motif_core::summary::similarity_matrix;
use motif_core::{CancelToken, MixtureModel, PriorConfig, Sampler, SamplerConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

fn bench_sampler(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let (data, _) = separable(&mut rng, &SeparableSpec::default()).unwrap();
    let data = Arc::new(data);

    let model = MixtureModel::new(data.clone(), PriorConfig::default(), 10).unwrap();
    let sampler = Sampler::new(model, SamplerConfig::quick(), None).unwrap();
    // each batch sweeps a fresh copy so the recorded history stays bounded
    c.bench_function("sweep_180x6_j10", |b| {
        b.iter_batched_ref(|| sampler.clone(), |s| s.sweep(), BatchSize::SmallInput)
    });

    let model = MixtureModel::new(data.clone(), PriorConfig::default(), 20).unwrap();
    let sampler = Sampler::new(model, SamplerConfig::quick(), None).unwrap();
    c.bench_function("sweep_180x6_j20", |b| {
        b.iter_batched_ref(|| sampler.clone(), |s| s.sweep(), BatchSize::SmallInput)
    });

    let config = SamplerConfig { number_iter: 200, burn_in: 100, thinning: 1, ..SamplerConfig::default() };
    let model = MixtureModel::new(data.clone(), PriorConfig::default(), 10).unwrap();
    let trace = Sampler::new(model, config, None).unwrap().run(&CancelToken::new());
    c.bench_function("similarity_180_neurons_100_snapshots", |b| {
        b.iter(|| similarity_matrix(&trace, &data))
    });
}

criterion_group!(benches, bench_sampler);
criterion_main!(benches);
