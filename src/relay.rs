//! Pipes a completion stream into a streaming HTTP body.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::body::Body;
use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::completion::{CompletionProvider, CompletionStream};
use crate::prompt::ChatTurn;
use crate::sse::{encode_delta, DONE_FRAME};

/// Default bound on a whole completion, first byte to last.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Starts a completion and returns a body that streams it.
///
/// Waits for the first frame so a backend that fails outright surfaces as
/// `Err`. After that, errors and the deadline end the body early without
/// `[DONE]`. Dropping the body drops the upstream stream.
pub async fn start(
    provider: &dyn CompletionProvider,
    messages: &[ChatTurn],
    timeout: Duration,
) -> Result<Body> {
    let deadline = Instant::now()
        .checked_add(timeout)
        .ok_or_else(|| anyhow!("completion timeout {:?} is out of range", timeout))?;
    let completion = timeout_at(deadline, provider.stream_complete(messages))
        .await
        .map_err(|_| anyhow!("{} did not respond within {:?}", provider.name(), timeout))??;
    let mut frames = into_frames(completion);

    let first = match timeout_at(deadline, frames.next()).await {
        Ok(Some(Ok(bytes))) => bytes,
        Ok(Some(Err(err))) => return Err(err.context("completion failed before first frame")),
        Ok(None) => anyhow::bail!("{} closed the stream without output", provider.name()),
        Err(_) => anyhow::bail!("{} sent nothing within {:?}", provider.name(), timeout),
    };

    let state = RelayState {
        first: Some(first),
        upstream: frames,
        deadline,
        finished: false,
    };
    Ok(Body::from_stream(stream::unfold(state, next_frame)))
}

fn into_frames(completion: CompletionStream) -> BoxStream<'static, Result<Bytes>> {
    match completion {
        CompletionStream::Sse(bytes) => bytes,
        CompletionStream::Deltas(deltas) => deltas
            .map(|delta| delta.map(|text| encode_delta(&text)))
            .chain(stream::once(future::ready(Ok(Bytes::from_static(DONE_FRAME)))))
            .boxed(),
    }
}

struct RelayState {
    first: Option<Bytes>,
    upstream: BoxStream<'static, Result<Bytes>>,
    deadline: Instant,
    finished: bool,
}

impl Drop for RelayState {
    fn drop(&mut self) {
        if !self.finished {
            debug!("client went away mid-stream; upstream released");
        }
    }
}

async fn next_frame(mut state: RelayState) -> Option<(Result<Bytes, Infallible>, RelayState)> {
    if let Some(first) = state.first.take() {
        return Some((Ok(first), state));
    }
    match timeout_at(state.deadline, state.upstream.next()).await {
        Ok(Some(Ok(bytes))) => Some((Ok(bytes), state)),
        Ok(Some(Err(err))) => {
            warn!(error = ?err, "completion stream failed; closing response early");
            state.finished = true;
            None
        }
        Ok(None) => {
            state.finished = true;
            None
        }
        Err(_) => {
            warn!("completion stream hit its deadline; closing response early");
            state.finished = true;
            None
        }
    }
}
