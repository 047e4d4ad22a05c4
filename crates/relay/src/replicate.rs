use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use plancheck_core::{ApiCredential, CheckError, InferenceInput, InferenceRequest};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::sse::{SseDecoder, SseEvent};
use crate::stream::ResponseStream;
use crate::InferenceBackend;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

/// Streams predictions from the Replicate HTTP API.
#[derive(Debug, Clone)]
pub struct ReplicateBackend {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
struct PredictionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: &'a InferenceInput,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    stream: Option<String>,
}

impl ReplicateBackend {
    /// The client only bounds connection set-up; a running stream is
    /// never cut off by a total timeout.
    pub fn new(base_url: Url, connect_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `owner/name:version` goes to the versioned predictions endpoint,
    /// a bare `owner/name` to the model's own endpoint.
    fn prediction_target<'a>(&self, model: &'a str) -> Result<(Url, Option<&'a str>), CheckError> {
        let (path, version) = match model.split_once(':') {
            Some((_, version)) => ("v1/predictions".to_string(), Some(version)),
            None => (format!("v1/models/{model}/predictions"), None),
        };
        let url = self.base_url.join(&path).map_err(|error| CheckError::Network {
            message: format!("invalid endpoint url: {error}"),
            timed_out: false,
        })?;
        Ok((url, version))
    }

    async fn create_prediction(
        &self,
        credential: &ApiCredential,
        request: &InferenceRequest,
    ) -> Result<Prediction, CheckError> {
        let (url, version) = self.prediction_target(&request.model)?;
        let body = PredictionBody {
            version,
            input: &request.input,
            stream: true,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;
        let status = response.status();

        response.json::<Prediction>().await.map_err(|error| {
            CheckError::remote(status.as_u16(), format!("unreadable prediction: {error}"))
        })
    }

    async fn open_stream(
        &self,
        credential: &ApiCredential,
        stream_url: &str,
    ) -> Result<Response, CheckError> {
        let response = self
            .client
            .get(stream_url)
            .bearer_auth(credential.expose())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(network_error)?;
        ensure_success(response).await
    }
}

impl InferenceBackend for ReplicateBackend {
    async fn start(
        &self,
        credential: &ApiCredential,
        request: &InferenceRequest,
    ) -> Result<ResponseStream, CheckError> {
        let prediction = self.create_prediction(credential, request).await?;
        let Some(stream_url) = prediction.urls.stream.as_deref() else {
            return Err(CheckError::remote(
                StatusCode::BAD_GATEWAY.as_u16(),
                format!("prediction {} has no stream url", prediction.id),
            ));
        };
        debug!(prediction_id = %prediction.id, "prediction created");

        let response = self.open_stream(credential, stream_url).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(network_error));

        Ok(ResponseStream::new(fragments_from_events(bytes)))
    }
}

struct EventState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Maps Replicate's `output`/`error`/`done` events onto answer fragments.
/// The stream ends after `done`, after an error, or when the body closes.
pub fn fragments_from_events<S, B>(bytes: S) -> impl Stream<Item = Result<String, CheckError>> + Send
where
    S: Stream<Item = Result<B, CheckError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = EventState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event.event.as_str() {
                    "output" if !event.data.is_empty() => return Some((Ok(event.data), state)),
                    "error" => {
                        state.finished = true;
                        state.pending.clear();
                        return Some((Err(stream_error(&event.data)), state));
                    }
                    "done" => {
                        state.finished = true;
                        state.pending.clear();
                    }
                    _ => {}
                }
                continue;
            }

            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

async fn ensure_success(response: Response) -> Result<Response, CheckError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body).unwrap_or(body);
    warn!(status = status.as_u16(), message = %message, "inference endpoint refused request");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(CheckError::Authentication(message))
    } else {
        Err(CheckError::remote(status.as_u16(), message))
    }
}

fn network_error(error: reqwest::Error) -> CheckError {
    CheckError::Network {
        message: error.to_string(),
        timed_out: error.is_timeout(),
    }
}

fn stream_error(data: &str) -> CheckError {
    let message = error_detail(data).unwrap_or_else(|| data.to_string());
    CheckError::remote(StatusCode::BAD_GATEWAY.as_u16(), message)
}

fn error_detail(body: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "title"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|value| value.as_str()))
        .map(ToString::to_string)
}
