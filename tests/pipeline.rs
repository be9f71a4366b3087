use portcullis::clock::ManualClock;
use portcullis::telemetry::{MemorySink, PolicyEvent, RequestOutcome, RetryEvent};
use portcullis::{
    presets, Backoff, InstantSleeper, Jitter, RateLimiter, ResilienceError, ResiliencePipeline,
    RetryPolicy, TimeoutPolicy, TrackingSleeper,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Upstream {
    Unavailable,
    BadRequest,
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test]
async fn default_schedule_is_exponential_with_bounded_jitter() {
    let sleeper = TrackingSleeper::new();
    let pipeline = ResiliencePipeline::<(), Upstream>::builder()
        .retry(RetryPolicy::builder().with_sleeper(sleeper.clone()).build())
        .build();

    let err = pipeline.execute(|| async { Err(Upstream::Unavailable) }).await.unwrap_err();
    assert_eq!(err.into_inner(), Some(Upstream::Unavailable));

    let delays = sleeper.delays();
    assert_eq!(delays.len(), 2);
    assert!(delays[0] >= Duration::from_secs(1) && delays[0] < Duration::from_secs(2));
    assert!(delays[1] >= Duration::from_secs(2) && delays[1] < Duration::from_secs(3));
}

#[tokio::test]
async fn transient_failure_recovers() {
    let calls = counter();
    let seen = calls.clone();
    let sink = MemorySink::new();
    let pipeline = ResiliencePipeline::<&'static str, Upstream>::builder()
        .retry(
            RetryPolicy::builder()
                .backoff(Backoff::exponential(Duration::from_millis(10)))
                .with_jitter(Jitter::None)
                .with_sleeper(InstantSleeper)
                .build(),
        )
        .sink(sink.clone())
        .build();

    let value = pipeline
        .execute(move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Upstream::Unavailable)
                } else {
                    Ok("accounts")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "accounts");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let events = sink.events();
    assert!(matches!(
        events[0],
        PolicyEvent::Retry(RetryEvent::Attempt { attempt: 1, delay }) if delay == Duration::from_millis(10)
    ));
    assert!(matches!(events.last(), Some(PolicyEvent::Request(RequestOutcome::Success { .. }))));
    assert_eq!(pipeline.monitor().snapshot().error_count, 0);
}

#[tokio::test]
async fn predicate_stops_non_transient_errors() {
    let calls = counter();
    let seen = calls.clone();
    let pipeline = ResiliencePipeline::<(), Upstream>::builder()
        .retry(
            RetryPolicy::builder()
                .should_retry(|e: &Upstream| *e == Upstream::Unavailable)
                .with_sleeper(InstantSleeper)
                .build(),
        )
        .build();

    let err = pipeline
        .execute(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err(Upstream::BadRequest) }
        })
        .await
        .unwrap_err();

    assert_eq!(err.as_inner(), Some(&Upstream::BadRequest));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_can_be_made_terminal() {
    let calls = counter();
    let seen = calls.clone();
    let pipeline = ResiliencePipeline::<(), Upstream>::builder()
        .timeout(TimeoutPolicy::new(Duration::from_secs(2)).unwrap())
        .retry(RetryPolicy::builder().retry_on_timeout(false).with_sleeper(InstantSleeper).build())
        .build();

    let err = pipeline
        .execute(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    match err {
        ResilienceError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(2)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn redemption_preset_times_out_at_fifteen_seconds() {
    let pipeline = presets::redemption_pipeline::<(), Upstream>()
        .retry(RetryPolicy::builder().max_retries(0).build())
        .build();
    assert_eq!(pipeline.timeout().map(TimeoutPolicy::duration), Some(Duration::from_secs(15)));

    let start = tokio::time::Instant::now();
    let err = pipeline.execute_keyed("redeem:X:a@b.c", || std::future::pending()).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn settled_key_runs_again() {
    let calls = counter();
    let pipeline = ResiliencePipeline::<u32, Upstream>::builder().no_retry().dedup().build();

    for expected in 1..=2 {
        let seen = calls.clone();
        let value = pipeline
            .execute_keyed("redeem:ABC:e@x.com", move || {
                let n = seen.fetch_add(1, Ordering::SeqCst) as u32;
                async move { Ok(n + 1) }
            })
            .await
            .unwrap();
        assert_eq!(value, expected);
    }
    assert!(pipeline.deduplicator().is_some_and(|d| d.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn joined_callers_do_not_spend_quota() {
    let clock = ManualClock::new(0);
    let limiter = Arc::new(
        RateLimiter::new("redeem", 1, Duration::from_secs(60)).unwrap().with_clock(clock),
    );
    let pipeline = ResiliencePipeline::<u8, Upstream>::builder()
        .no_retry()
        .dedup()
        .rate_limit(limiter.clone(), "admin")
        .build();

    let op = || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(5)
    };
    let (a, b, c) = tokio::join!(
        pipeline.execute_keyed("k", op),
        pipeline.execute_keyed("k", op),
        pipeline.execute_keyed("k", op)
    );
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (5, 5, 5));
    assert_eq!(limiter.peek("admin").remaining, 0);

    let over = pipeline.execute_keyed("k", op).await.unwrap_err();
    assert!(over.is_rate_limited());
    assert_eq!(pipeline.monitor().snapshot().request_count, 4);
}

#[tokio::test]
async fn slow_calls_are_counted() {
    let pipeline = ResiliencePipeline::<(), Upstream>::builder()
        .no_retry()
        .no_timeout()
        .monitor(portcullis::PerformanceMonitor::new().with_slow_threshold(Duration::from_millis(5)))
        .build();

    pipeline
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .await
        .unwrap();
    pipeline.execute(|| async { Ok(()) }).await.unwrap();

    let snap = pipeline.monitor().snapshot();
    assert_eq!(snap.slow_request_count, 1);
    assert_eq!(snap.slow_request_rate, 50.0);
}
