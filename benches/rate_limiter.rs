use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::{Request, Response};
use portcullis::{presets, RateLimitLayer, TtlCache};
use std::convert::Infallible;
use std::sync::Arc;
use tower::{service_fn, Service, ServiceBuilder};

fn check_single_key(c: &mut Criterion) {
    let limiter = presets::api();
    c.bench_function("rate_limiter_check_hot_key", |b| {
        b.iter(|| black_box(limiter.check(black_box("203.0.113.7"))));
    });
}

fn check_many_keys(c: &mut Criterion) {
    let limiter = presets::api();
    let keys: Vec<String> = (0..10_000).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
    let mut i = 0usize;
    c.bench_function("rate_limiter_check_10k_keys", |b| {
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(limiter.check(&keys[i]))
        });
    });
}

fn layer_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limiter = Arc::new(presets::api());
    let svc = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter))
        .service(service_fn(|_req: Request<String>| async {
            Ok::<_, Infallible>(Response::new(String::new()))
        }));

    c.bench_function("rate_limit_layer_call", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = svc.clone();
            let mut req = Request::new(String::new());
            req.headers_mut().insert("x-forwarded-for", "198.51.100.1".parse().unwrap());
            let _ = black_box(local_svc.call(req)).await;
        });
    });
}

fn cache_get_hit(c: &mut Criterion) {
    let cache = TtlCache::new(portcullis::cache::DEFAULT_TTL);
    cache.set_default("accounts:list:1:20", vec![0u8; 256]);
    c.bench_function("ttl_cache_get_hit", |b| {
        b.iter(|| black_box(cache.get(black_box("accounts:list:1:20"))));
    });
}

criterion_group!(benches, check_single_key, check_many_keys, layer_round_trip, cache_get_hit);
criterion_main!(benches);
