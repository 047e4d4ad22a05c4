pub mod config;
mod inflight;
pub mod page;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Json, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use plancheck_core::credential::{
    is_well_formed, CREDENTIAL_ACCEPTED_MESSAGE, CREDENTIAL_CONFIGURED_MESSAGE,
    CREDENTIAL_MISSING_WARNING,
};
use plancheck_core::{
    AnswerAccumulator, ApiCredential, CheckError, InputMethod, ModelChoice, PlanSubmission,
    SamplingConfig, MAX_LENGTH_MAX, MAX_LENGTH_MIN, TEMPERATURE_MAX, TEMPERATURE_MIN, TOP_P_MAX,
    TOP_P_MIN,
};
use plancheck_observability::{MetricsSnapshot, RelayMetrics};
use plancheck_relay::{PlanChecker, ReplicateBackend, ResponseStream};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

pub use config::AppConfig;
pub use inflight::{InflightGuard, InflightPermit};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const TOKEN_HEADER: &str = "x-replicate-token";
const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct ApiState {
    pub checker: Arc<PlanChecker<ReplicateBackend>>,
    pub metrics: Arc<RelayMetrics>,
    pub configured_credential: Option<ApiCredential>,
    pub inflight: InflightGuard,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    credential_configured: bool,
    checks_in_flight: usize,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct OptionsResponse {
    title: String,
    models: Vec<ModelOption>,
    defaults: SamplingConfig,
    bounds: SamplingBounds,
}

#[derive(Debug, Serialize)]
struct ModelOption {
    label: &'static str,
    identifier: &'static str,
}

#[derive(Debug, Serialize)]
struct SamplingBounds {
    temperature: [f64; 2],
    top_p: [f64; 2],
    max_length: [u32; 2],
}

#[derive(Debug, Serialize)]
struct CredentialStatus {
    configured: bool,
    message: &'static str,
}

#[derive(Debug, Deserialize)]
struct ValidateCredentialRequest {
    #[serde(default)]
    api_token: String,
}

#[derive(Debug, Serialize)]
struct ValidateCredentialResponse {
    valid: bool,
    message: &'static str,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    #[serde(default)]
    text: String,
    input_method: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_length: Option<u32>,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    model: Option<String>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_length: Option<u32>,
    file_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct TextPayload {
    text: String,
}

pub async fn build_app(config: AppConfig) -> Result<Router> {
    let metrics = RelayMetrics::shared();

    let base_url = Url::parse(&config.upstream_base_url)
        .with_context(|| format!("invalid upstream url {}", config.upstream_base_url))?;
    let backend = ReplicateBackend::new(base_url, config.connect_timeout)
        .context("failed to build HTTP client")?;

    let configured_credential = match config.credential.as_deref() {
        Some(raw) => match ApiCredential::parse(raw) {
            Ok(credential) => Some(credential),
            Err(error) => {
                warn!(error = %error, "ignoring malformed configured API token");
                None
            }
        },
        None => None,
    };

    let checker = Arc::new(PlanChecker::new(backend, config.profile, metrics.clone()));

    let state = ApiState {
        checker,
        metrics,
        configured_credential,
        inflight: InflightGuard::new(),
    };

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/v1/options", get(options))
        .route("/v1/credential", get(credential_status))
        .route("/v1/credential/validate", post(credential_validate))
        .route("/v1/check", post(check))
        .route("/v1/check/upload", post(check_upload))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn index(State(state): State<ApiState>) -> Html<String> {
    Html(page::render_form(
        state.checker.profile(),
        state.configured_credential.is_some(),
    ))
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        credential_configured: state.configured_credential.is_some(),
        checks_in_flight: state.inflight.active(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn options(State(state): State<ApiState>) -> impl IntoResponse {
    Json(OptionsResponse {
        title: state.checker.profile().title.clone(),
        models: ModelChoice::ALL
            .iter()
            .map(|model| ModelOption {
                label: model.label(),
                identifier: model.identifier(),
            })
            .collect(),
        defaults: SamplingConfig::default(),
        bounds: SamplingBounds {
            temperature: [TEMPERATURE_MIN, TEMPERATURE_MAX],
            top_p: [TOP_P_MIN, TOP_P_MAX],
            max_length: [MAX_LENGTH_MIN, MAX_LENGTH_MAX],
        },
    })
}

async fn credential_status(State(state): State<ApiState>) -> impl IntoResponse {
    let configured = state.configured_credential.is_some();
    Json(CredentialStatus {
        configured,
        message: if configured {
            CREDENTIAL_CONFIGURED_MESSAGE
        } else {
            CREDENTIAL_MISSING_WARNING
        },
    })
}

async fn credential_validate(Json(input): Json<ValidateCredentialRequest>) -> impl IntoResponse {
    let valid = is_well_formed(&input.api_token);
    Json(ValidateCredentialResponse {
        valid,
        message: if valid {
            CREDENTIAL_ACCEPTED_MESSAGE
        } else {
            CREDENTIAL_MISSING_WARNING
        },
    })
}

async fn check(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(input): Json<CheckRequest>,
) -> Response {
    let input_method = input
        .input_method
        .as_deref()
        .and_then(InputMethod::parse)
        .unwrap_or(InputMethod::Paste);
    let submission = PlanSubmission {
        text: input.text,
        input_method,
        file_name: None,
    };
    let sampling = sampling_from_parts(
        input.model.as_deref(),
        input.temperature,
        input.top_p,
        input.max_length,
    );
    let entered_token = input.api_token.or_else(|| header_token(&headers));

    run_check(state, &headers, submission, sampling, entered_token).await
}

async fn check_upload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let submission = PlanSubmission::uploaded(query.file_name, &body);
    let sampling = sampling_from_parts(
        query.model.as_deref(),
        query.temperature,
        query.top_p,
        query.max_length,
    );

    run_check(state, &headers, submission, sampling, header_token(&headers)).await
}

async fn run_check(
    state: ApiState,
    headers: &HeaderMap,
    submission: PlanSubmission,
    sampling: Result<SamplingConfig, CheckError>,
    entered_token: Option<String>,
) -> Response {
    let credential = match resolve_credential(&state, entered_token.as_deref()) {
        Ok(credential) => credential,
        Err(error) => {
            state.metrics.inc_credential_rejection();
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "invalid_credential",
                    "warning": CREDENTIAL_MISSING_WARNING,
                    "message": error.to_string()
                })),
            )
                .into_response();
        }
    };

    let sampling = match sampling {
        Ok(sampling) => sampling,
        Err(error) => return check_error_response(&error),
    };

    let session = session_key(headers);
    let Some(permit) = state.inflight.try_acquire(&session) else {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "check_in_progress",
                "message": "a check is already running for this session. wait for it to finish."
            })),
        )
            .into_response();
    };

    match state
        .checker
        .check(&submission, &sampling, &credential)
        .await
    {
        Ok(stream) => {
            info!(session = %session, model = sampling.model.label(), "streaming answer");
            Sse::new(answer_events(stream, permit))
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(error) => check_error_response(&error),
    }
}

/// A configured credential always wins; otherwise the one entered on the
/// page must pass the shape check before any request is attempted.
fn resolve_credential(
    state: &ApiState,
    entered_token: Option<&str>,
) -> Result<ApiCredential, CheckError> {
    if let Some(credential) = state.configured_credential.as_ref() {
        return Ok(credential.clone());
    }
    ApiCredential::parse(entered_token.unwrap_or_default())
}

fn sampling_from_parts(
    model: Option<&str>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_length: Option<u32>,
) -> Result<SamplingConfig, CheckError> {
    let model = match model {
        Some(value) => Some(ModelChoice::parse(value).ok_or_else(|| {
            CheckError::InvalidParameter {
                name: "model",
                message: format!("unknown model `{value}`"),
            }
        })?),
        None => None,
    };
    SamplingConfig::from_optional(model, temperature, top_p, max_length)
}

/// Emits one `fragment` event per piece of text, then a single `answer`
/// event with the concatenation, or an `error` event if the stream
/// fails. The permit is released as soon as the stream is finished.
fn answer_events(
    stream: ResponseStream,
    permit: InflightPermit,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send {
    let state = Some((stream, AnswerAccumulator::new(), permit));

    stream::unfold(state, |state| async move {
        let Some((mut stream, mut answer, permit)) = state else {
            return None;
        };
        match stream.next().await {
            Some(Ok(fragment)) => {
                answer.push(&fragment);
                let event = Event::default()
                    .event("fragment")
                    .json_data(TextPayload { text: fragment });
                Some((event, Some((stream, answer, permit))))
            }
            Some(Err(error)) => {
                drop(permit);
                let event = Event::default().event("error").json_data(serde_json::json!({
                    "error": error.code(),
                    "message": error.to_string()
                }));
                Some((event, None))
            }
            None => {
                drop(permit);
                info!(fragments = answer.fragments(), "answer complete");
                let event = Event::default().event("answer").json_data(TextPayload {
                    text: answer.into_answer(),
                });
                Some((event, None))
            }
        }
    })
}

fn check_error_response(error: &CheckError) -> Response {
    let status = match error {
        CheckError::Authentication(_) => StatusCode::UNAUTHORIZED,
        CheckError::RemoteService { .. } => StatusCode::BAD_GATEWAY,
        CheckError::Network {
            timed_out: true, ..
        } => StatusCode::GATEWAY_TIMEOUT,
        CheckError::Network { .. } => StatusCode::BAD_GATEWAY,
        CheckError::EmptyInput => StatusCode::BAD_REQUEST,
        CheckError::InvalidParameter { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let mut payload = serde_json::json!({
        "error": error.code(),
        "message": error.to_string()
    });
    if matches!(error, CheckError::Authentication(_)) {
        payload["warning"] = serde_json::json!(CREDENTIAL_MISSING_WARNING);
    }

    (status, Json(payload)).into_response()
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn session_key(headers: &HeaderMap) -> String {
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(session) = session {
        return format!("session:{session}");
    }

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| "local".to_string())
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; frame-ancestors 'none'; base-uri 'none'",
        ),
    );

    response
}
