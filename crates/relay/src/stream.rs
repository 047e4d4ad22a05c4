use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use plancheck_core::{AnswerAccumulator, CheckError};

/// Lazy, finite sequence of answer fragments for one check. It cannot be
/// restarted; concatenating every fragment yields the full answer.
pub struct ResponseStream {
    inner: BoxStream<'static, Result<String, CheckError>>,
}

impl ResponseStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String, CheckError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(fragments.into_iter().map(Ok)))
    }

    /// Drains the stream. Stops at the first error.
    pub async fn collect_answer(mut self) -> Result<String, CheckError> {
        let mut answer = AnswerAccumulator::new();
        while let Some(fragment) = self.next().await {
            answer.push(&fragment?);
        }
        Ok(answer.into_answer())
    }
}

impl Stream for ResponseStream {
    type Item = Result<String, CheckError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}
