use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use portcullis::clock::ManualClock;
use portcullis::{AdmissionControl, PortcullisConfig, RateLimiter};
use std::convert::Infallible;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceExt};

const CONFIG: &str = r#"{
    "limiters": {
        "login": { "maxRequests": 2, "windowMs": 60000, "message": "Slow down." },
        "upload": { "maxRequests": 1, "windowMs": 1000 }
    },
    "pipeline": { "timeoutMs": 5000, "maxRetries": 0 }
}"#;

fn client(ip: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static(ip));
    headers
}

#[test]
fn configured_limiters_override_presets() {
    let config = PortcullisConfig::from_json_str(CONFIG).unwrap();
    let admission = AdmissionControl::from_config(&config);

    let mut names: Vec<_> = admission.names().collect();
    names.sort_unstable();
    assert_eq!(names, ["api", "batch", "export", "login", "redeem", "upload"]);

    let login = admission.limiter("login").unwrap();
    assert_eq!(login.max_requests(), 2);
    assert_eq!(login.message(), "Slow down.");
    assert_eq!(admission.limiter("redeem").unwrap().max_requests(), 10);
}

#[test]
fn rejection_reports_retry_after() {
    let clock = ManualClock::new(1_000_000);
    let config = PortcullisConfig::from_json_str(CONFIG).unwrap();
    let admission = AdmissionControl::with_clock(&config, clock.clone());

    admission.admit("login", &client("9.9.9.9")).unwrap().unwrap();
    admission.admit("login", &client("9.9.9.9")).unwrap().unwrap();
    clock.advance_millis(30_001);
    let rejection = admission.admit("login", &client("9.9.9.9")).unwrap().unwrap_err();

    assert_eq!(rejection.retry_after_secs(), 30);
    assert_eq!(rejection.status().remaining, 0);
    assert_eq!(rejection.body()["message"], "Slow down.");
}

#[tokio::test]
async fn inbound_layer_answers_429() {
    let admission = AdmissionControl::from_config(&PortcullisConfig::from_json_str(CONFIG).unwrap());
    let layer = admission.inbound("upload").unwrap();
    let svc = layer.layer(service_fn(|_req: Request<String>| async {
        Ok::<_, Infallible>(Response::new("stored".to_string()))
    }));

    let request = || Request::builder().header("x-real-ip", "7.7.7.7").body(String::new()).unwrap();
    let first = svc.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "1");

    let second = svc.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()["retry-after"], "1");
    assert!(admission.inbound("missing").is_none());
}

#[tokio::test(start_paused = true)]
async fn outbound_uses_configured_timeout_and_retries() {
    let admission = AdmissionControl::from_config(&PortcullisConfig::from_json_str(CONFIG).unwrap());
    let pipeline = admission.outbound::<(), String>().build();
    assert_eq!(pipeline.retry_policy().max_retries(), 0);

    let start = tokio::time::Instant::now();
    let err = pipeline.execute(|| std::future::pending()).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(admission.monitor().snapshot().error_count, 1);
}

#[tokio::test]
async fn outbound_quota_is_shared_with_the_named_limiter() {
    let mut admission = AdmissionControl::new();
    let partner = admission.insert(RateLimiter::new("partner-api", 2, Duration::from_secs(60)).unwrap());
    let pipeline = admission.outbound_limited::<u8, String>("partner-api", "self").unwrap().build();

    pipeline.execute(|| async { Ok(1) }).await.unwrap();
    pipeline.execute(|| async { Ok(2) }).await.unwrap();
    let err = pipeline.execute(|| async { Ok(3) }).await.unwrap_err();

    assert!(err.is_rate_limited());
    assert!(!partner.peek("self").allowed);
    assert!(admission.outbound_limited::<u8, String>("nope", "self").is_none());
}
