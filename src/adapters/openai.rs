//! OpenAI-compatible provider — bearer auth, JSON body, one POST per call.
//! Works against any endpoint speaking the `/v1/chat/completions` shape.

use async_trait::async_trait;
use std::time::Duration;

use super::*;

pub struct OpenAICompatProvider {
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenAICompatProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }
}

#[async_trait]
impl ChatCompletionProvider for OpenAICompatProvider {
    fn name(&self) -> &str { "openai-compatible" }

    async fn send(
        &self,
        endpoint: &EndpointConfig,
        req: &CompletionRequest,
    ) -> Result<ProviderReply, TransportError> {
        let call = async {
            let resp = self.client.post(&endpoint.url)
                .bearer_auth(endpoint.credential.expose())
                .header(http::header::CONTENT_TYPE, "application/json")
                .json(req)
                .send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>(ProviderReply { status, body })
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}
