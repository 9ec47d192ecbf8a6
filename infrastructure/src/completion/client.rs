//! Streaming client for OpenAI-compatible chat completion endpoints.

use super::sse::{SseEvent, SseLineDecoder};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use streamchat_application::ports::completion_gateway::{
    CompletionGateway, DeltaStream, GatewayError,
};
use streamchat_domain::CompletionMessage;
use streamchat_domain::core::string::ellipsize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Longest error body kept in [`GatewayError::Status`].
const ERROR_BODY_LIMIT: usize = 500;

/// Connection parameters for [`OpenAiCompatibleClient`].
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub url: String,
    pub model: String,
    pub temperature: f64,
    pub api_key: String,
    pub connect_timeout: Option<Duration>,
}

impl CompletionSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key: api_key.into(),
            connect_timeout: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    temperature: f64,
    stream: bool,
}

/// Cancellation handle of the request currently in flight.
///
/// Tagged with a generation so a finished stream only clears its own
/// registration, never a newer one.
#[derive(Default)]
struct ActiveRequest {
    slot: Mutex<Option<(u64, CancellationToken)>>,
    generations: AtomicU64,
}

impl ActiveRequest {
    fn register(self: &Arc<Self>) -> Registration {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((generation, token.clone()));
        Registration {
            active: self.clone(),
            generation,
            token,
        }
    }

    fn cancel(&self) -> bool {
        match self.slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

struct Registration {
    active: Arc<ActiveRequest>,
    generation: u64,
    token: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut slot = self
            .active
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((generation, _)) if *generation == self.generation) {
            *slot = None;
        }
    }
}

/// [`CompletionGateway`] over HTTP + server-sent events.
///
/// One POST per stream. At most one request is tracked for cancellation;
/// opening a new stream replaces the handle of the previous one.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    settings: Arc<CompletionSettings>,
    active: Arc<ActiveRequest>,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: CompletionSettings) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        info!(url = %settings.url, model = %settings.model, "Completion client ready");
        Ok(Self {
            http,
            settings: Arc::new(settings),
            active: Arc::new(ActiveRequest::default()),
        })
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }
}

impl CompletionGateway for OpenAiCompatibleClient {
    fn stream_completion(&self, history: Vec<CompletionMessage>) -> DeltaStream {
        Box::pin(deltas(
            self.http.clone(),
            self.settings.clone(),
            self.active.clone(),
            history,
        ))
    }

    fn cancel(&self) {
        if self.active.cancel() {
            info!("Cancelled in-flight completion request");
        } else {
            debug!("No completion request to cancel");
        }
    }
}

fn deltas(
    http: reqwest::Client,
    settings: Arc<CompletionSettings>,
    active: Arc<ActiveRequest>,
    history: Vec<CompletionMessage>,
) -> impl Stream<Item = Result<String, GatewayError>> + Send {
    try_stream! {
        let registration = active.register();
        let token = registration.token.clone();

        let request = ChatCompletionRequest {
            model: &settings.model,
            messages: &history,
            temperature: settings.temperature,
            stream: true,
        };
        debug!(messages = history.len(), "Sending completion request to {}", settings.url);

        let send = http
            .post(&settings.url)
            .bearer_auth(&settings.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send();

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = send => Some(result),
        };
        let Some(sent) = sent else {
            info!("Completion cancelled before response");
            return;
        };
        let response = sent.map_err(|e| GatewayError::Connection(e.to_string()))?;
        let response = ensure_success(response).await?;

        let mut body = Box::pin(response.bytes_stream());
        let mut decoder = SseLineDecoder::new();
        let mut delta_count = 0usize;

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            let chunk = match next {
                None => {
                    info!(deltas = delta_count, "Completion cancelled mid-stream");
                    break;
                }
                Some(None) => {
                    if decoder.pending() > 0 {
                        debug!(bytes = decoder.pending(), "Discarding incomplete trailing line");
                    }
                    break;
                }
                Some(Some(chunk)) => chunk.map_err(|e| GatewayError::Connection(e.to_string()))?,
            };

            for event in decoder.push(&chunk) {
                match event {
                    SseEvent::Delta(text) => {
                        delta_count += 1;
                        yield text;
                    }
                    SseEvent::Done => break 'read,
                }
            }
        }

        debug!(deltas = delta_count, done = decoder.is_done(), "Completion stream closed");
        drop(registration);
    }
}

/// Turn a non-2xx response into [`GatewayError::Status`] carrying the
/// (truncated) response body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Completion request rejected");
    Err(GatewayError::Status {
        status: status.as_u16(),
        body: ellipsize(&body, ERROR_BODY_LIMIT, ERROR_BODY_LIMIT - 3),
    })
}
