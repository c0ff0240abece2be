use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::DaemonApiConfig;
use crate::error::{parse_error_message, DaemonApiError};
use crate::events::{decode_fragment, Fragment};
use crate::headers::{build_headers, RequestKind};
use crate::messages::Conversation;
use crate::sse::SseFrameParser;
use crate::url::{conversation_endpoint, conversations_endpoint, normalize_base_url, stream_endpoint};

/// Optional cancellation signal shared across request and stream loops.
///
/// Setting it abandons the network read at the next await point.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct DaemonApiClient {
    http: Client,
    config: DaemonApiConfig,
}

/// Counters describing one completed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// `data:` payloads extracted by the frame parser.
    pub payloads: usize,
    /// Payloads that decoded into fragments and were handed to the caller.
    pub fragments: usize,
}

impl StreamSummary {
    pub fn skipped(&self) -> usize {
        self.payloads - self.fragments
    }
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    message: &'a str,
}

impl DaemonApiClient {
    pub fn new(config: DaemonApiConfig) -> Result<Self, DaemonApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(DaemonApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &DaemonApiConfig {
        &self.config
    }

    pub fn base_url(&self) -> String {
        normalize_base_url(&self.config.base_url)
    }

    pub fn build_headers(&self, kind: RequestKind) -> Result<HeaderMap, DaemonApiError> {
        let headers = build_headers(&self.config, kind);
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| DaemonApiError::InvalidHeader(format!("invalid key: {key}")))?,
                HeaderValue::from_str(&value)
                    .map_err(|_| DaemonApiError::InvalidHeader(format!("invalid value for {key}")))?,
            );
        }
        Ok(out)
    }

    /// Build the `POST` that starts one streamed agent turn.
    pub fn build_stream_request(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<reqwest::RequestBuilder, DaemonApiError> {
        let url = stream_endpoint(&self.config.base_url, conversation_id)?;
        let headers = self.build_headers(RequestKind::Stream)?;
        Ok(self
            .http
            .post(url)
            .headers(headers)
            .json(&SendMessageBody { message }))
    }

    /// Send the stream request and validate that a readable body came back.
    ///
    /// Non-success statuses and empty bodies are failures; the send is never
    /// retried here.
    pub async fn open_stream(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, DaemonApiError> {
        let request = self.build_stream_request(conversation_id, message)?.send();
        let response = await_or_cancel(request, cancellation).await??;
        let status = response.status();

        if !status.is_success() {
            let body = await_or_cancel(response.text(), cancellation)
                .await?
                .unwrap_or_default();
            return Err(DaemonApiError::Status(
                status,
                parse_error_message(status, &body),
            ));
        }

        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(DaemonApiError::MissingBody(status));
        }

        Ok(response)
    }

    /// Stream one agent turn, handing every decoded fragment to `on_fragment`
    /// in arrival order.
    pub async fn stream_with_handler<F>(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: Option<&CancellationSignal>,
        mut on_fragment: F,
    ) -> Result<StreamSummary, DaemonApiError>
    where
        F: FnMut(Fragment),
    {
        let response = self.open_stream(conversation_id, message, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseFrameParser::default();
        let mut summary = StreamSummary::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk.map_err(DaemonApiError::from)?;
            for payload in parser.feed(&chunk) {
                process_payload(&payload, &mut summary, &mut on_fragment);
            }
        }

        if is_cancelled(cancellation) {
            return Err(DaemonApiError::Cancelled);
        }

        if let Some(payload) = parser.finish() {
            process_payload(&payload, &mut summary, &mut on_fragment);
        }

        tracing::debug!(
            conversation_id,
            payloads = summary.payloads,
            fragments = summary.fragments,
            "stream finished"
        );
        Ok(summary)
    }

    /// Collect every fragment of one streamed turn.
    pub async fn stream(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Vec<Fragment>, DaemonApiError> {
        let mut fragments = Vec::new();
        self.stream_with_handler(conversation_id, message, cancellation, |fragment| {
            fragments.push(fragment);
        })
        .await?;
        Ok(fragments)
    }

    /// Fetch one conversation with its ordered persisted messages.
    pub async fn fetch_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, DaemonApiError> {
        let url = conversation_endpoint(&self.config.base_url, conversation_id)?;
        self.get_json(url).await
    }

    /// List conversations, scoped to `participant` when given.
    pub async fn fetch_conversations(
        &self,
        participant: Option<&str>,
    ) -> Result<Vec<Conversation>, DaemonApiError> {
        let url = conversations_endpoint(&self.config.base_url, participant)?;
        self.get_json(url).await
    }

    async fn get_json<T>(&self, url: ::url::Url) -> Result<T, DaemonApiError>
    where
        T: DeserializeOwned,
    {
        let headers = self.build_headers(RequestKind::Query)?;
        let response = self.http.get(url).headers(headers).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DaemonApiError::Status(
                status,
                parse_error_message(status, &body),
            ));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn process_payload<F>(payload: &str, summary: &mut StreamSummary, on_fragment: &mut F)
where
    F: FnMut(Fragment),
{
    summary.payloads += 1;
    if let Some(fragment) = decode_fragment(payload) {
        summary.fragments += 1;
        on_fragment(fragment);
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, DaemonApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(DaemonApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(DaemonApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
