mod replicate;
mod sse;
mod stream;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use plancheck_core::{
    ApiCredential, CheckError, InferenceRequest, PlanSubmission, PolicyProfile, SamplingConfig,
};
use plancheck_observability::RelayMetrics;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use replicate::{fragments_from_events, ReplicateBackend, DEFAULT_BASE_URL};
pub use sse::{SseDecoder, SseEvent};
pub use stream::ResponseStream;

/// A hosted model that turns one request into a stream of text.
pub trait InferenceBackend: Send + Sync {
    /// Resolves once the endpoint has accepted the request and the
    /// response stream is open.
    fn start(
        &self,
        credential: &ApiCredential,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<ResponseStream, CheckError>> + Send;
}

pub struct PlanChecker<B>
where
    B: InferenceBackend,
{
    backend: B,
    profile: PolicyProfile,
    metrics: Arc<RelayMetrics>,
}

impl<B> PlanChecker<B>
where
    B: InferenceBackend,
{
    pub fn new(backend: B, profile: PolicyProfile, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            backend,
            profile,
            metrics,
        }
    }

    pub fn profile(&self) -> &PolicyProfile {
        &self.profile
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Sends one prompt built from `submission` and returns the answer
    /// stream. Nothing is retried; every failure is returned as is.
    #[instrument(
        skip(self, submission, config, credential),
        fields(
            check_id = %Uuid::new_v4(),
            model = config.model.label(),
            input_method = ?submission.input_method,
            text_len = submission.text.len()
        )
    )]
    pub async fn check(
        &self,
        submission: &PlanSubmission,
        config: &SamplingConfig,
        credential: &ApiCredential,
    ) -> Result<ResponseStream, CheckError> {
        let started = Instant::now();
        self.metrics.inc_check();

        if submission.is_blank() {
            self.metrics.inc_failure();
            return Err(CheckError::EmptyInput);
        }

        let envelope = self.profile.build_envelope(submission);
        let request = InferenceRequest::new(envelope.into_string(), config);

        match self.backend.start(credential, &request).await {
            Ok(stream) => {
                self.metrics.observe_open_latency(started.elapsed());
                info!(
                    prompt_len = request.input.prompt.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "response stream opened"
                );

                let metrics = self.metrics.clone();
                Ok(ResponseStream::new(stream.inspect(move |item| match item {
                    Ok(_) => metrics.inc_fragment(),
                    Err(error) => {
                        metrics.inc_failure();
                        warn!(code = error.code(), error = %error, "response stream failed");
                    }
                })))
            }
            Err(error) => {
                self.metrics.inc_failure();
                if matches!(error, CheckError::Authentication(_)) {
                    self.metrics.inc_credential_rejection();
                }
                warn!(code = error.code(), error = %error, "check failed");
                Err(error)
            }
        }
    }
}
