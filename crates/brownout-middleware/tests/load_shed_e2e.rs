//! End-to-end load-shedding tests.
//!
//! Every test runs the gate inside a full pipeline:
//!
//! ```text
//! Request → RequestId → LoadShed → Handler
//! ```

use brownout_config::LoadShedConfig;
use brownout_core::ShedError;
use brownout_middleware::{
    context::MiddlewareContext,
    fixtures::{CountingSource, FailingSource, FixedSource, HangingSource, SequenceSource},
    stages::{LoadShedBuilder, LoadShedMiddleware, RequestIdMiddleware, REQUEST_ID_HEADER},
    Pipeline, Request, Response, ResponseExt, ShedDecision, RETRY_AFTER,
};
use bytes::Bytes;
use http::{Request as HttpRequest, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn make_request(path: &str) -> Request {
    HttpRequest::builder()
        .uri(path)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn pipeline(load_shed: LoadShedMiddleware) -> Pipeline {
    Pipeline::builder()
        .add_pre_handler_stage(RequestIdMiddleware::new())
        .add_pre_handler_stage(load_shed)
        .build()
}

/// Builder with the reference thresholds (0.90 / 0.95) and a fixed load.
fn gate_at(load: f64) -> LoadShedBuilder {
    LoadShedMiddleware::builder()
        .lower_threshold(0.90)
        .upper_threshold(0.95)
        .metric_source(FixedSource::new(load))
}

/// Runs one request and returns the response, the handler call count, and
/// the recorded decision.
async fn send(pipeline: &Pipeline, path: &str) -> (Response, usize, Option<ShedDecision>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    let mut ctx = MiddlewareContext::new();

    let response = pipeline
        .process_with(&mut ctx, make_request(path), move |_ctx, _req| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::empty() })
        })
        .await;

    let decision = ctx.get_extension::<ShedDecision>().copied();
    (response, calls.load(Ordering::SeqCst), decision)
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_below_lower_threshold_reaches_handler() {
    let pipeline = pipeline(gate_at(0.89).build().unwrap());

    let (response, handler_calls, decision) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler_calls, 1);
    assert!(matches!(decision, Some(ShedDecision::Admitted { .. })));
}

#[tokio::test]
async fn test_above_upper_threshold_is_rejected_with_envelope() {
    let pipeline = pipeline(gate_at(0.96).retry_after(1).build().unwrap());

    let (response, handler_calls, decision) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(handler_calls, 0);
    assert!(decision.unwrap().is_shed());
    assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");

    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(json["error"]["request_id"], request_id);
}

#[tokio::test]
async fn test_inside_band_sheds_proportionally() {
    let pipeline = pipeline(gate_at(0.93).build().unwrap());

    let total = 100_000_u32;
    let mut shed = 0_u32;
    for _ in 0..total {
        let (response, _, _) = send(&pipeline, "/orders").await;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::SERVICE_UNAVAILABLE => shed += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    let rate = f64::from(shed) / f64::from(total);
    assert!((rate - 0.6).abs() < 0.02, "shed rate {rate}");
}

#[tokio::test]
async fn test_custom_handler_status_is_kept() {
    let pipeline = pipeline(
        gate_at(0.96)
            .on_shed(|_ctx, _req, res| {
                *res.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                Ok(())
            })
            .build()
            .unwrap(),
    );

    let (response, handler_calls, _) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(handler_calls, 0);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn test_custom_handler_error_wins() {
    let pipeline = pipeline(
        gate_at(0.96)
            .on_shed(|_ctx, _req, res| {
                *res.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                Err(ShedError::status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "rejection bookkeeping failed",
                ))
            })
            .build()
            .unwrap(),
    );

    let (response, _, _) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "rejection bookkeeping failed");
}

#[tokio::test]
async fn test_metric_failure_fails_open() {
    let pipeline = pipeline(
        LoadShedMiddleware::builder()
            .metric_source(FailingSource::new("cpu stats unavailable"))
            .build()
            .unwrap(),
    );

    let (response, handler_calls, decision) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler_calls, 1);
    assert_eq!(decision, Some(ShedDecision::FailedOpen));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_metric_fails_open_within_timeout() {
    let pipeline = pipeline(
        LoadShedMiddleware::builder()
            .metric_source(HangingSource)
            .interval(Duration::from_millis(500))
            .sample_timeout(Duration::from_secs(1))
            .build()
            .unwrap(),
    );

    let started = tokio::time::Instant::now();
    let (response, handler_calls, decision) = send(&pipeline, "/orders").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler_calls, 1);
    assert_eq!(decision, Some(ShedDecision::FailedOpen));
    assert!(started.elapsed() <= Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_metric_does_not_stall_every_request() {
    let pipeline = pipeline(
        LoadShedMiddleware::builder()
            .metric_source(HangingSource)
            .build()
            .unwrap(),
    );

    let started = tokio::time::Instant::now();
    for _ in 0..5 {
        let (response, _, decision) = send(&pipeline, "/orders").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(decision, Some(ShedDecision::FailedOpen));
    }

    // Only the cold request waits out the 2s sample timeout.
    assert!(started.elapsed() < Duration::from_millis(2100));
}

#[tokio::test]
async fn test_bypass_never_samples() {
    let source = CountingSource::new(FixedSource::new(1.0));
    let pipeline = pipeline(
        LoadShedMiddleware::builder()
            .metric_source(source.clone())
            .bypass_paths(["/health", "/ready"])
            .build()
            .unwrap(),
    );

    for path in ["/health", "/ready", "/health/deep"] {
        let (response, handler_calls, decision) = send(&pipeline, path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handler_calls, 1);
        assert_eq!(decision, Some(ShedDecision::Bypassed));
    }
    assert_eq!(source.calls(), 0);

    let (response, _, _) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_sample() {
    let source = CountingSource::new(FixedSource::new(0.5)).with_delay(Duration::from_millis(50));
    let pipeline = Arc::new(pipeline(
        LoadShedMiddleware::builder()
            .metric_source(source.clone())
            .interval(Duration::from_secs(1))
            .build()
            .unwrap(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            send(&pipeline, "/orders").await.0.status()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_load_change_takes_effect_after_interval() {
    let load_shed = LoadShedMiddleware::builder()
        .metric_source(SequenceSource::new([0.5, 0.99]))
        .interval(Duration::from_secs(1))
        .build()
        .unwrap();
    let cache = load_shed.metric_cache().clone();
    let pipeline = pipeline(load_shed);

    let (response, _, _) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::advance(Duration::from_secs(1)).await;

    // The stale sample still serves the request that triggers the refresh.
    let (response, _, _) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::OK);

    cache.refresh_now().await.unwrap();
    let (response, _, _) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_from_config_section() {
    let config: LoadShedConfig = toml::from_str(
        r#"
        lower_threshold = 0.90
        upper_threshold = 0.95
        bypass_paths = ["/internal"]
        retry_after_secs = 5
        rejection_message = "try again soon"
        "#,
    )
    .unwrap();

    let pipeline = pipeline(
        LoadShedBuilder::from_config(&config)
            .metric_source(FixedSource::new(0.97))
            .build()
            .unwrap(),
    );

    let (response, _, _) = send(&pipeline, "/internal/jobs").await;
    assert_eq!(response.status(), StatusCode::OK);

    let (response, _, _) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "5");
    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "try again soon");
}

#[tokio::test]
async fn test_disabled_gate_admits_everything() {
    let config = LoadShedConfig {
        enabled: false,
        ..LoadShedConfig::default()
    };
    let pipeline = pipeline(
        LoadShedBuilder::from_config(&config)
            .metric_source(FixedSource::new(1.0))
            .build()
            .unwrap(),
    );

    let (response, handler_calls, decision) = send(&pipeline, "/orders").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler_calls, 1);
    assert_eq!(decision, None);
}
