//! Benchmarks for cache fingerprinting and URL signing
//!
//! Both run on every request: the fingerprint at the head of the pipeline and
//! signing whenever a job is read with stale URLs.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rf_media::UrlSigner;
use rf_pipeline::fingerprint::{fingerprint, normalize_prompt};

/// Typical short request
const PROMPT_SHORT: &str = "infiltrate the tower";

/// Longer prompt with uneven whitespace and mixed case
const PROMPT_LONG: &str = "Infiltrate   the TOWER at dawn while the   citadel guards change shifts, \
    slipping past the neon checkpoints and  the drone patrols, then  scale the \
    spire to reach the vault where the   stolen archive is kept";

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for (name, prompt) in [("short", PROMPT_SHORT), ("long", PROMPT_LONG)] {
        group.throughput(Throughput::Bytes(prompt.len() as u64));

        group.bench_with_input(BenchmarkId::new("prefix_50", name), &prompt, |b, p| {
            b.iter(|| fingerprint("standard", black_box("nft-1"), black_box(p), 50));
        });

        group.bench_with_input(BenchmarkId::new("full_prompt", name), &prompt, |b, p| {
            b.iter(|| fingerprint("standard", black_box("nft-1"), black_box(p), 0));
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_prompt/long", |b| {
        b.iter(|| normalize_prompt(black_box(PROMPT_LONG)));
    });
}

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signed_url");
    let signer = UrlSigner::new("bench-secret", "https://media.example.com/media");
    let path = "users/0x52908400098527886E0F7030069857D2E4169EE7/images/job_preview.png";
    let expires_at = Utc::now() + Duration::hours(24);

    group.bench_function("sign", |b| {
        b.iter(|| signer.sign(black_box(path), expires_at));
    });

    let signed = signer.sign(path, expires_at).unwrap();
    let query = signed.url.split_once('?').unwrap().1;
    let signature = query.split("signature=").nth(1).unwrap().to_string();
    let expires = expires_at.timestamp();
    let now = Utc::now();

    group.bench_function("verify", |b| {
        b.iter(|| signer.verify(black_box(path), expires, black_box(&signature), now));
    });

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_normalize, bench_signing);
criterion_main!(benches);
