use crate::constants::CHAT_COMPLETIONS_PATH;
use crate::specs::openai::ChatCompletionRequest;
use crate::types::*;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;

/// Raw upstream body, chunked however the network delivered it.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub idle_read: Duration,
}

/// Builds the process-wide HTTP client shared by every request.
pub fn build_http_client(timeouts: HttpTimeouts) -> Result<reqwest::Client> {
    // No total request timeout: long generations are bounded by the idle read timeout only.
    reqwest::Client::builder()
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.idle_read)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .map_err(|e| {
            RelayError::Internal(
                format!("Failed to build HTTP client: {}", e),
                tracing_error::SpanTrace::capture(),
            )
            .into()
        })
}

/// Streaming chat-completions client for an OpenAI-compatible provider.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CHAT_COMPLETIONS_PATH),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens the completion stream.
    ///
    /// Nothing is read from the body here; the caller drives the returned
    /// stream. A non-2xx status is surfaced with the provider's body text.
    pub async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream> {
        tracing::info!(
            "[⚙️  -> ☁️ ] POST {} (model: {}, messages: {})",
            self.endpoint,
            request.model,
            request.messages.len()
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(RelayError::UpstreamUnreachable)?;

        let status = response.status();
        tracing::info!("[☁️  -> ⚙️ ] Status: {}", status);

        if !status.is_success() {
            let error_body = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to read upstream error body: {}", e);
                    format!("Upstream error (body unreadable): {}", e)
                }
            };
            tracing::error!(
                "[☁️  -> ⚙️ ] Upstream rejected request: {}",
                crate::str_utils::log_snippet(&error_body, 300)
            );
            return Err(RelayError::UpstreamRejected(status, error_body).into());
        }

        Ok(response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other))
            .boxed())
    }
}
