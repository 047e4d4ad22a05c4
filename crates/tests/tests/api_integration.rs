
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{json_body, sse_events, token, FakeReplicate, UpstreamMode, FRAGMENTS};
use plancheck_api::{build_app, build_router, ApiState, InflightGuard};
use plancheck_core::{ModelChoice, PlanSubmission, PolicyProfile};
use plancheck_observability::RelayMetrics;
use plancheck_relay::{PlanChecker, ReplicateBackend};
use serde_json::json;
use tower::ServiceExt;
use url::Url;

const DRYAD_PLAN: &str = "We will deposit data in Dryad within 6 months of publication.";

fn check_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/check")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn pasted_plan_is_checked_with_one_request() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({
            "text": DRYAD_PLAN,
            "input_method": "paste",
            "api_token": token()
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = sse_events(response.into_body()).await;
    let fragments = events
        .iter()
        .filter(|(name, _)| name == "fragment")
        .map(|(_, payload)| payload["text"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(fragments, FRAGMENTS);

    let (name, answer) = events.last().expect("answer event");
    assert_eq!(name, "answer");
    assert_eq!(answer["text"], FRAGMENTS.concat());

    let predictions = upstream.predictions();
    assert_eq!(predictions.len(), 1);
    let expected_prompt = PolicyProfile::nih_dms()
        .build_envelope(&PlanSubmission::pasted(DRYAD_PLAN))
        .into_string();
    assert_eq!(predictions[0].body["input"]["prompt"], expected_prompt);
    assert_eq!(predictions[0].body["version"], ModelChoice::Llama2_7B.version());
    assert_eq!(predictions[0].body["stream"], true);
    assert_eq!(predictions[0].body["input"]["temperature"], 0.1);
    assert_eq!(predictions[0].body["input"]["max_length"], 120);
    assert_eq!(
        predictions[0].authorization.as_deref(),
        Some(format!("Bearer {}", token()).as_str())
    );
}

#[tokio::test]
async fn missing_credential_is_rejected_before_any_request() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({ "text": DRYAD_PLAN, "api_token": "r8_short" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = json_body(response.into_body()).await;
    assert_eq!(payload["error"], "invalid_credential");
    assert_eq!(payload["warning"], "Please enter your credentials!");
    assert!(upstream.predictions().is_empty());
}

#[tokio::test]
async fn configured_credential_needs_no_entered_token() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let mut config = upstream.config();
    config.credential = Some(token());
    let app = build_app(config).await.expect("app should build");

    let response = app
        .clone()
        .oneshot(check_request(json!({ "text": DRYAD_PLAN })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = sse_events(response.into_body()).await;
    assert_eq!(upstream.predictions().len(), 1);

    let status = app
        .oneshot(
            Request::builder()
                .uri("/v1/credential")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let payload = json_body(status.into_body()).await;
    assert_eq!(payload["configured"], true);
    assert_eq!(payload["message"], "API key already provided!");
}

#[tokio::test]
async fn upstream_failure_is_reported_without_retry() {
    let upstream = FakeReplicate::start(UpstreamMode::Fail(500)).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({ "text": DRYAD_PLAN, "api_token": token() })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let payload = json_body(response.into_body()).await;
    assert_eq!(payload["error"], "remote_service_error");
    assert!(payload["message"]
        .as_str()
        .unwrap()
        .contains("model is warming up"));
    assert_eq!(upstream.predictions().len(), 1);
}

#[tokio::test]
async fn upstream_rejecting_the_token_asks_for_credentials() {
    let upstream = FakeReplicate::start(UpstreamMode::Fail(401)).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({ "text": DRYAD_PLAN, "api_token": token() })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = json_body(response.into_body()).await;
    assert_eq!(payload["error"], "authentication_error");
    assert_eq!(payload["warning"], "Please enter your credentials!");
    assert_eq!(upstream.predictions().len(), 1);
}

#[tokio::test]
async fn stream_error_event_reaches_the_page() {
    let upstream = FakeReplicate::start(UpstreamMode::StreamError).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({ "text": DRYAD_PLAN, "api_token": token() })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response.into_body()).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "fragment");
    assert_eq!(events[1].0, "error");
    assert_eq!(events[1].1["error"], "remote_service_error");
    assert!(events[1].1["message"]
        .as_str()
        .unwrap()
        .contains("prediction failed"));
}

#[tokio::test]
async fn selected_model_and_sampling_are_forwarded() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let response = app
        .oneshot(check_request(json!({
            "text": DRYAD_PLAN,
            "model": "Llama2-13B",
            "temperature": 0.5,
            "top_p": 0.5,
            "max_length": 256,
            "api_token": token()
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = sse_events(response.into_body()).await;

    let predictions = upstream.predictions();
    assert_eq!(predictions.len(), 1);
    let body = &predictions[0].body;
    assert_eq!(body["version"], ModelChoice::Llama2_13B.version());
    assert_eq!(body["input"]["temperature"], 0.5);
    assert_eq!(body["input"]["top_p"], 0.5);
    assert_eq!(body["input"]["max_length"], 256);
    assert_eq!(body["input"]["repetition_penalty"], 1.0);
}

#[tokio::test]
async fn invalid_input_never_reaches_the_endpoint() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let blank = app
        .clone()
        .oneshot(check_request(json!({ "text": "   ", "api_token": token() })))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(blank.into_body()).await["error"], "empty_input");

    let too_hot = app
        .oneshot(check_request(json!({
            "text": DRYAD_PLAN,
            "temperature": 7.5,
            "api_token": token()
        })))
        .await
        .unwrap();
    assert_eq!(too_hot.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(too_hot.into_body()).await["error"], "invalid_parameter");

    assert!(upstream.predictions().is_empty());
}

#[tokio::test]
async fn uploaded_document_is_forwarded_as_text() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/check/upload?file_name=dms-plan.txt&model=Llama2-13B")
        .header("content-type", "application/octet-stream")
        .header("x-replicate-token", token())
        .body(Body::from(DRYAD_PLAN.as_bytes().to_vec()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = sse_events(response.into_body()).await;
    assert_eq!(events.last().unwrap().0, "answer");

    let predictions = upstream.predictions();
    assert_eq!(predictions.len(), 1);
    let prompt = predictions[0].body["input"]["prompt"].as_str().unwrap();
    assert!(prompt.contains(DRYAD_PLAN));
    assert_eq!(
        predictions[0].body["version"],
        ModelChoice::Llama2_13B.version()
    );
}

#[tokio::test]
async fn second_check_in_the_same_session_is_refused() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let backend = ReplicateBackend::new(
        Url::parse(&upstream.base_url).unwrap(),
        Duration::from_secs(2),
    )
    .unwrap();
    let metrics = RelayMetrics::shared();
    let inflight = InflightGuard::new();
    let app = build_router(ApiState {
        checker: Arc::new(PlanChecker::new(
            backend,
            PolicyProfile::nih_dms(),
            metrics.clone(),
        )),
        metrics,
        configured_credential: None,
        inflight: inflight.clone(),
    });

    let running = inflight.try_acquire("session:tab-1").expect("first permit");
    let request = |session: &str| {
        Request::builder()
            .method("POST")
            .uri("/v1/check")
            .header("content-type", "application/json")
            .header("x-session-id", session)
            .body(Body::from(
                json!({ "text": DRYAD_PLAN, "api_token": token() }).to_string(),
            ))
            .unwrap()
    };

    let refused = app.clone().oneshot(request("tab-1")).await.unwrap();
    assert_eq!(refused.status(), StatusCode::CONFLICT);
    assert!(upstream.predictions().is_empty());

    drop(running);
    let accepted = app.oneshot(request("tab-1")).await.unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let _ = sse_events(accepted.into_body()).await;
    assert_eq!(upstream.predictions().len(), 1);
    assert_eq!(inflight.active(), 0);
}

#[tokio::test]
async fn health_page_and_options_are_public() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.headers()["x-content-type-options"], "nosniff");
    assert!(health.headers().contains_key("x-request-id"));
    let payload = json_body(health.into_body()).await;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["credential_configured"], false);

    let page = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    let html = axum::body::to_bytes(page.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(html.to_vec()).unwrap();
    assert!(html.contains("NIH Data Management &amp; Sharing Plan Checker"));
    assert!(html.contains("Check this plan (click once and wait)"));

    let options = app
        .oneshot(Request::builder().uri("/v1/options").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let payload = json_body(options.into_body()).await;
    assert_eq!(payload["models"].as_array().unwrap().len(), 2);
    assert_eq!(payload["defaults"]["max_length"], 120);
    assert_eq!(payload["bounds"]["temperature"], json!([0.01, 5.0]));
}

#[tokio::test]
async fn credential_shape_is_checked_on_entry() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");

    let validate = |api_token: String| {
        Request::builder()
            .method("POST")
            .uri("/v1/credential/validate")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "api_token": api_token }).to_string()))
            .unwrap()
    };

    let accepted = app.clone().oneshot(validate(token())).await.unwrap();
    let payload = json_body(accepted.into_body()).await;
    assert_eq!(payload["valid"], true);
    assert_eq!(payload["message"], "Proceed to entering your prompt message!");

    let rejected = app
        .oneshot(validate("sk_not_a_replicate_token".to_string()))
        .await
        .unwrap();
    let payload = json_body(rejected.into_body()).await;
    assert_eq!(payload["valid"], false);
    assert_eq!(payload["message"], "Please enter your credentials!");
}

#[tokio::test]
async fn whitespace_padded_token_is_malformed() {
    let upstream = FakeReplicate::start(UpstreamMode::Stream).await;
    let app = build_app(upstream.config()).await.expect("app should build");
    let padded = format!(" r8_{}", "a".repeat(37));

    let validate = Request::builder()
        .method("POST")
        .uri("/v1/credential/validate")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "api_token": padded }).to_string()))
        .unwrap();
    let payload = json_body(app.clone().oneshot(validate).await.unwrap().into_body()).await;
    assert_eq!(payload["valid"], false);

    let response = app
        .oneshot(check_request(json!({ "text": DRYAD_PLAN, "api_token": padded })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response.into_body()).await["error"], "invalid_credential");
    assert!(upstream.predictions().is_empty());
}
