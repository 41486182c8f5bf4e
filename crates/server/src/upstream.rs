//! Upstream endpoint resolution and authenticated dispatch.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use transllm::Provider;

use crate::ProxyQuery;
use crate::Settings;
use crate::error::ProxyError;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Where one request goes and how it authenticates.
pub(crate) struct Target {
    pub url: String,
    pub provider: Provider,
    api_key: Option<SecretString>,
}

impl Target {
    /// Query overrides beat settings, settings beat provider defaults.
    pub(crate) fn resolve(
        settings: &Settings,
        query: &ProxyQuery,
        provider: Provider,
        model: &str,
        streaming: bool,
    ) -> Self {
        let url = query
            .url
            .clone()
            .or_else(|| settings.upstream_url.clone())
            .unwrap_or_else(|| default_url(provider, model, streaming));

        let api_key = query
            .apikey
            .clone()
            .map(SecretString::from)
            .or_else(|| settings.upstream_api_key.clone());

        Target {
            url,
            provider,
            api_key,
        }
    }

    pub(crate) async fn send(&self, client: &reqwest::Client, body: &Value) -> Result<reqwest::Response, ProxyError> {
        let mut request = client.post(&self.url).json(body);

        if let Some(key) = &self.api_key {
            request = match self.provider {
                Provider::OpenAi => request.bearer_auth(key.expose_secret()),
                Provider::Anthropic => request
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                Provider::Gemini => request.header("x-goog-api-key", key.expose_secret()),
            };
        } else if self.provider == Provider::Anthropic {
            request = request.header("anthropic-version", ANTHROPIC_VERSION);
        }

        request.send().await.map_err(|err| {
            log::error!("failed to reach upstream {}: {err}", self.url);
            ProxyError::Connection(format!("could not reach upstream: {err}"))
        })
    }
}

/// Canonical endpoint for a provider. Gemini routes by model and switches
/// verbs for streaming; the SSE flavour is requested explicitly.
pub(crate) fn default_url(provider: Provider, model: &str, streaming: bool) -> String {
    match provider {
        Provider::OpenAi => OPENAI_URL.to_string(),
        Provider::Anthropic => ANTHROPIC_URL.to_string(),
        Provider::Gemini => {
            if streaming {
                format!("{GEMINI_BASE_URL}/models/{model}:streamGenerateContent?alt=sse")
            } else {
                format!("{GEMINI_BASE_URL}/models/{model}:generateContent")
            }
        }
    }
}
